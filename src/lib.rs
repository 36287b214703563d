//! Core of a listing-photo editor, without the UI shell:
//! viewport mapping, mask-driven object removal (remote edit with a local
//! inpainting fallback), vector annotations, a pure tool state machine and
//! snapshot-based undo. [`project::Project`] ties them into one session.

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;

pub use project::{EditorError, PointerOutcome, Project};
