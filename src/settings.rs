use std::path::{Path, PathBuf};

use crate::canvas::MASK_ON;
use crate::io::ExportFormat;

/// Default instruction sent along with the image to the remote edit call.
pub const DEFAULT_ERASE_INSTRUCTION: &str = "Remove the object inside the marked region and \
     fill the area so it blends seamlessly with the surrounding background.";

/// Every tunable of the editor core.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    /// Maximum number of history entries (pristine entry included).
    pub max_history: usize,
    /// Number of diffusion passes of the local inpainting fallback.
    pub inpaint_passes: usize,
    /// Mask intensity above which a pixel counts as marked.
    pub mask_threshold: u8,
    /// Minimum width / height of a vector object after interactive resize.
    pub min_object_size: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Multiplicative step used by zoom in / zoom out.
    pub zoom_step: f32,
    /// Hit radius of the resize / rotate handles, in screen pixels.
    pub handle_radius: f32,
    /// Distance of the rotate handle above the top edge, in screen pixels.
    pub rotate_handle_offset: f32,
    /// Side length of the square canvas produced by "standardize".
    pub standard_canvas_size: u32,
    pub standard_background: [u8; 4],
    pub brush_width: f32,
    pub erase_width: f32,
    pub stroke_color: [u8; 4],
    pub fill_color: [u8; 4],
    pub stroke_width: f32,
    pub opacity: f32,
    pub font_size: f32,
    pub export_format: ExportFormat,
    /// JPEG quality (1–100).
    pub export_quality: u8,
    pub erase_instruction: String,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_history: 30,
            inpaint_passes: 50,
            mask_threshold: 100,
            min_object_size: 10.0,
            min_zoom: 0.05,
            max_zoom: 10.0,
            zoom_step: 1.2,
            handle_radius: 8.0,
            rotate_handle_offset: 30.0,
            standard_canvas_size: 1000,
            standard_background: [255, 255, 255, 255],
            brush_width: 12.0,
            erase_width: 30.0,
            stroke_color: [255, 0, 0, 255],
            fill_color: [0, 0, 0, 0],
            stroke_width: 3.0,
            opacity: 1.0,
            font_size: 32.0,
            export_format: ExportFormat::Png,
            export_quality: 90,
            erase_instruction: DEFAULT_ERASE_INSTRUCTION.to_string(),
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/listing-editor/settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\ListingEditor\settings.cfg
    /// On macOS:   ~/Library/Application Support/ListingEditor/settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("ListingEditor").join("settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("ListingEditor")
                    .join("settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("listing-editor").join("settings.cfg"))
        }
    }

    /// Load settings from the platform config file (defaults if missing or corrupt).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the platform config file. Failures are logged, never returned.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        self.save_to(&path);
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, self.to_config_string()) {
            log_warn!("Could not write settings to {}: {}", path.display(), e);
        }
    }

    /// Parse `key=value` lines on top of the defaults. Unknown keys and
    /// unparsable values are skipped one by one.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_history" => set_parsed(&mut s.max_history, val),
                "inpaint_passes" => set_parsed(&mut s.inpaint_passes, val),
                "mask_threshold" => set_parsed(&mut s.mask_threshold, val),
                "min_object_size" => set_parsed(&mut s.min_object_size, val),
                "min_zoom" => set_parsed(&mut s.min_zoom, val),
                "max_zoom" => set_parsed(&mut s.max_zoom, val),
                "zoom_step" => set_parsed(&mut s.zoom_step, val),
                "handle_radius" => set_parsed(&mut s.handle_radius, val),
                "rotate_handle_offset" => set_parsed(&mut s.rotate_handle_offset, val),
                "standard_canvas_size" => set_parsed(&mut s.standard_canvas_size, val),
                "standard_background" => {
                    if let Some(c) = str_to_color(val) { s.standard_background = c; }
                }
                "brush_width" => set_parsed(&mut s.brush_width, val),
                "erase_width" => set_parsed(&mut s.erase_width, val),
                "stroke_color" => {
                    if let Some(c) = str_to_color(val) { s.stroke_color = c; }
                }
                "fill_color" => {
                    if let Some(c) = str_to_color(val) { s.fill_color = c; }
                }
                "stroke_width" => set_parsed(&mut s.stroke_width, val),
                "opacity" => set_parsed(&mut s.opacity, val),
                "font_size" => set_parsed(&mut s.font_size, val),
                "export_format" => {
                    if let Some(f) = ExportFormat::from_name(val) { s.export_format = f; }
                }
                "export_quality" => set_parsed(&mut s.export_quality, val),
                "erase_instruction" => {
                    if !val.is_empty() {
                        s.erase_instruction = val.to_string();
                    }
                }
                _ => {}
            }
        }
        s.sanitize();
        s
    }

    /// Keep loaded values inside the ranges the editor relies on.
    fn sanitize(&mut self) {
        let defaults = Self::default();
        self.max_history = self.max_history.max(1);
        self.export_quality = self.export_quality.clamp(1, 100);
        self.opacity = self.opacity.clamp(0.0, 1.0);
        // Marked pixels are MASK_ON and must pass the `> threshold` test
        self.mask_threshold = self.mask_threshold.min(MASK_ON - 1);
        if !(self.min_zoom > 0.0 && self.min_zoom < self.max_zoom) {
            self.min_zoom = defaults.min_zoom;
            self.max_zoom = defaults.max_zoom;
        }
        if self.zoom_step <= 1.0 {
            self.zoom_step = defaults.zoom_step;
        }
        if self.standard_canvas_size == 0 {
            self.standard_canvas_size = defaults.standard_canvas_size;
        }
        self.min_object_size = self.min_object_size.max(1.0);
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_history={}\n\
             inpaint_passes={}\n\
             mask_threshold={}\n\
             min_object_size={}\n\
             min_zoom={}\n\
             max_zoom={}\n\
             zoom_step={}\n\
             handle_radius={}\n\
             rotate_handle_offset={}\n\
             standard_canvas_size={}\n\
             standard_background={}\n\
             brush_width={}\n\
             erase_width={}\n\
             stroke_color={}\n\
             fill_color={}\n\
             stroke_width={}\n\
             opacity={}\n\
             font_size={}\n\
             export_format={}\n\
             export_quality={}\n\
             erase_instruction={}\n",
            self.max_history,
            self.inpaint_passes,
            self.mask_threshold,
            self.min_object_size,
            self.min_zoom,
            self.max_zoom,
            self.zoom_step,
            self.handle_radius,
            self.rotate_handle_offset,
            self.standard_canvas_size,
            color_to_str(self.standard_background),
            self.brush_width,
            self.erase_width,
            color_to_str(self.stroke_color),
            color_to_str(self.fill_color),
            self.stroke_width,
            self.opacity,
            self.font_size,
            self.export_format.name(),
            self.export_quality,
            self.erase_instruction,
        )
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) {
    if let Ok(v) = val.parse() {
        *slot = v;
    }
}

/// Serialize an RGBA color as "r,g,b,a"
fn color_to_str(c: [u8; 4]) -> String {
    format!("{},{},{},{}", c[0], c[1], c[2], c[3])
}

/// Parse an RGBA color from "r,g,b,a"
fn str_to_color(s: &str) -> Option<[u8; 4]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut out = [0u8; 4];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.trim().parse().ok()?;
    }
    Some(out)
}
