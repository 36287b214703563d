// ============================================================================
// listing-editor CLI - headless erase / standardize via command-line arguments
// ============================================================================
//
// Usage examples:
//   listing-editor -i shoe.jpg --erase-rect 40,60,120,80 -o out/
//   listing-editor -i shots/*.jpg --mask watermark.png --standardize -o out/ -f jpeg
//   listing-editor -i a.png --erase-rect 0,0,50,50 --mask-preview mask.png -v
//
// Every input runs through the same session type the interactive editor uses:
// load, mark the mask, erase (local inpainting), optionally standardize, save.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use egui::{Pos2, Rect};

use listing_editor::io::{encode_and_write, ExportFormat, FileUploader, LocalFileFetcher};
use listing_editor::project::{EraseSource, Project};
use listing_editor::settings::EditorSettings;
use listing_editor::{log_err, log_info};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Headless listing-photo cleanup.
#[derive(Parser, Debug)]
#[command(
    name = "listing-editor",
    about = "Erase marked regions from product photos and standardize them",
    long_about = "Load product photos, erase the marked regions with local inpainting,\n\
                  optionally fit them onto a square white canvas, and write the result.\n\n\
                  Example:\n  \
                  listing-editor -i shoe.jpg --erase-rect 40,60,120,80 -o out/\n  \
                  listing-editor -i '*.jpg' --mask wm.png --standardize -o out/ -f jpeg"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Grayscale mask image; pixels brighter than the mask threshold are erased.
    /// Stretched to each input's size.
    #[arg(long, value_name = "MASK")]
    pub mask: Option<PathBuf>,

    /// Region to erase as x,y,width,height in image pixels. Repeatable.
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_rect)]
    pub erase_rect: Vec<Rect>,

    /// Fit the result onto the standard square canvas.
    #[arg(long)]
    pub standardize: bool,

    /// Output directory. Files keep their stem and get the format's extension.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png or jpeg (default: from settings, png).
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100).
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// Settings file to use instead of the per-user one.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the marked mask as a striped overlay before erasing (single input only).
    #[arg(long, value_name = "FILE")]
    pub mask_preview: Option<PathBuf>,

    /// Print per-file timing and which erase path ran.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("'{}': {}", p, e)))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        &[x, y, w, h] if w > 0.0 && h > 0.0 => {
            Ok(Rect::from_min_size(Pos2::new(x, y), egui::vec2(w, h)))
        }
        &[_, _, _, _] => Err("width and height must be positive".to_string()),
        _ => Err(format!("expected X,Y,W,H, got '{}'", s)),
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }
    if inputs.len() > 1 && args.mask_preview.is_some() {
        eprintln!("error: --mask-preview only accepts a single input file.");
        return ExitCode::FAILURE;
    }

    let mut settings = match &args.config {
        Some(path) => EditorSettings::load_from(path),
        None => EditorSettings::load(),
    };
    if let Some(name) = args.format.as_deref() {
        match ExportFormat::from_name(name) {
            Some(format) => settings.export_format = format,
            None => {
                eprintln!("error: unknown output format '{}' (png or jpeg).", name);
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(quality) = args.quality {
        settings.export_quality = quality.clamp(1, 100);
    }

    let mask = match &args.mask {
        Some(path) => match image::open(path) {
            Ok(img) => Some(img.to_luma8()),
            Err(e) => {
                eprintln!("error: could not read mask '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();
        let output_path = build_output_path(input_path, args.output_dir.as_deref(), settings.export_format);
        let job = Job {
            input: input_path,
            output: &output_path,
            mask: mask.as_ref(),
            rects: &args.erase_rect,
            standardize: args.standardize,
            mask_preview: args.mask_preview.as_deref(),
            verbose: args.verbose,
        };

        match run_one(&job, settings.clone()) {
            Ok(url) => {
                if args.verbose || multi {
                    println!("  → {} ({:.0}ms)", url, file_start.elapsed().as_secs_f64() * 1000.0);
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                log_err!("{}: {}", input_path.display(), e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

struct Job<'a> {
    input: &'a Path,
    output: &'a Path,
    mask: Option<&'a image::GrayImage>,
    rects: &'a [Rect],
    standardize: bool,
    mask_preview: Option<&'a Path>,
    verbose: bool,
}

fn run_one(job: &Job<'_>, settings: EditorSettings) -> Result<String, String> {
    // -- Step 1: Load ----------------------------------------------------
    let url = job.input.to_string_lossy();
    let mut project = Project::open(&url, &LocalFileFetcher, settings);
    if let Some(e) = project.load_error() {
        return Err(format!("load failed: {}", e));
    }

    // -- Step 2: Mark ----------------------------------------------------
    if let Some(mask) = job.mask {
        project.mark_mask_image(mask).map_err(|e| e.to_string())?;
    }
    for rect in job.rects {
        project.mark_region(*rect).map_err(|e| e.to_string())?;
    }
    if let Some(path) = job.mask_preview
        && let Some(preview) = project.mask_overlay(0.0)
    {
        encode_and_write(&preview, path, ExportFormat::Png, 100)
            .map_err(|e| format!("mask preview failed: {}", e))?;
    }

    // -- Step 3: Erase ---------------------------------------------------
    match project.erase_now().map_err(|e| format!("erase failed: {}", e))? {
        Some(source) if job.verbose => {
            let path = match source {
                EraseSource::Remote => "remote edit",
                EraseSource::Local => "local inpainting",
            };
            println!("  erased via {}", path);
        }
        Some(_) => {}
        None if job.verbose => println!("  nothing marked, skipping erase"),
        None => {}
    }

    // -- Step 4: Standardize (optional) ----------------------------------
    if job.standardize {
        let placement = project.standardize_canvas().map_err(|e| e.to_string())?;
        if job.verbose {
            println!(
                "  standardized: content {}x{} at {},{}",
                placement.width, placement.height, placement.offset_x, placement.offset_y
            );
        }
    }

    // -- Step 5: Save ----------------------------------------------------
    let url = project
        .save(&FileUploader::new(job.output))
        .map_err(|e| format!("save failed: {}", e))?;
    log_info!("CLI: {} → {}", job.input.display(), url);
    project.close();
    Ok(url)
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Output path for one input: `--output-dir` (or the input's own directory)
/// with the input stem and the format's extension. `_edited` is appended
/// when that would overwrite the input.
fn build_output_path(input: &Path, output_dir: Option<&Path>, format: ExportFormat) -> PathBuf {
    let ext = format.extension();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let candidate = dir.join(format!("{}.{}", stem, ext));
    if candidate == input {
        dir.join(format!("{}_edited.{}", stem, ext))
    } else {
        candidate
    }
}
