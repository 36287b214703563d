use std::process::ExitCode;

use clap::Parser;

mod cli;

fn main() -> ExitCode {
    // Session log (overwrites the previous session's log)
    listing_editor::logger::init();
    listing_editor::log_info!("listing-editor {} (CLI)", env!("CARGO_PKG_VERSION"));

    let args = cli::CliArgs::parse();
    cli::run(args)
}
