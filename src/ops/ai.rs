// ============================================================================
// AI-assisted object removal - remote image edit first, local inpainting after
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{GrayImage, RgbaImage};

use crate::canvas::MaskSurface;
use crate::io::{encode_image, ExportFormat};
use crate::ops::inpaint::{diffuse_fill, InpaintStats};
use crate::settings::EditorSettings;

/// Why the remote edit did not produce an image.
#[derive(Debug, Clone, PartialEq)]
pub enum AiError {
    MissingCredential,
    Network(String),
    Status(u16),
    MalformedPayload(String),
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for AiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiError::MissingCredential => write!(f, "No credential configured for the image-edit service"),
            AiError::Network(e) => write!(f, "Image-edit request failed: {}", e),
            AiError::Status(code) => write!(f, "Image-edit service answered with status {}", code),
            AiError::MalformedPayload(e) => write!(f, "Malformed image-edit response: {}", e),
            AiError::Decode(e) => write!(f, "Could not decode edited image: {}", e),
            AiError::Encode(e) => write!(f, "Could not encode image for editing: {}", e),
        }
    }
}

impl std::error::Error for AiError {}

/// Remote natural-language image editing.
///
/// Takes and returns base64-encoded image bytes. Implementations may be
/// called from a worker thread.
pub trait ImageEditService: Send + Sync {
    fn edit(&self, image_base64: &str, instruction: &str) -> Result<String, AiError>;
}

/// Everything an erase needs, detached from the editor so it can run on any thread.
#[derive(Clone, Debug)]
pub struct EraseRequest {
    pub bitmap: RgbaImage,
    pub mask: GrayImage,
    pub instruction: String,
    pub threshold: u8,
    pub passes: usize,
}

/// Result of an erase. Both branches carry the full replacement bitmap.
#[derive(Debug)]
pub enum EraseOutcome {
    Remote(RgbaImage),
    Local {
        image: RgbaImage,
        stats: InpaintStats,
        /// `None` when no remote service was configured.
        reason: Option<AiError>,
    },
}

impl EraseOutcome {
    pub fn image(&self) -> &RgbaImage {
        match self {
            EraseOutcome::Remote(image) | EraseOutcome::Local { image, .. } => image,
        }
    }

    pub fn into_image(self) -> RgbaImage {
        match self {
            EraseOutcome::Remote(image) | EraseOutcome::Local { image, .. } => image,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, EraseOutcome::Remote(_))
    }
}

impl EraseRequest {
    pub fn new(bitmap: &RgbaImage, mask: &MaskSurface, settings: &EditorSettings) -> Self {
        let threshold = settings.mask_threshold;
        let instruction = match mask.marked_bounds(threshold) {
            Some(r) => format!(
                "{} Target region: x={}, y={}, width={}, height={} in a {}x{} image.",
                settings.erase_instruction,
                r.min.x as u32,
                r.min.y as u32,
                r.width() as u32,
                r.height() as u32,
                bitmap.width(),
                bitmap.height()
            ),
            None => settings.erase_instruction.clone(),
        };
        Self {
            bitmap: bitmap.clone(),
            mask: mask.as_gray().clone(),
            instruction,
            threshold,
            passes: settings.inpaint_passes,
        }
    }

    /// Try the remote service, fall back to local diffusion on any failure.
    /// Never fails: the caller always gets a bitmap to commit.
    pub fn run(self, service: Option<&dyn ImageEditService>) -> EraseOutcome {
        let reason = match service {
            Some(service) => match self.remote_edit(service) {
                Ok(image) => {
                    log_info!("Remote erase succeeded ({}x{})", image.width(), image.height());
                    return EraseOutcome::Remote(image);
                }
                Err(e) => {
                    log_warn!("Remote erase failed, falling back to local inpainting: {}", e);
                    Some(e)
                }
            },
            None => None,
        };

        let mut image = self.bitmap;
        let stats = diffuse_fill(&mut image, &self.mask, self.threshold, self.passes);
        log_info!(
            "Local inpainting: {} masked, {} filled, {} remaining after {} passes",
            stats.masked,
            stats.filled,
            stats.remaining,
            stats.passes_run
        );
        EraseOutcome::Local { image, stats, reason }
    }

    fn remote_edit(&self, service: &dyn ImageEditService) -> Result<RgbaImage, AiError> {
        let png = encode_image(&self.bitmap, ExportFormat::Png, 100)
            .map_err(|e| AiError::Encode(e.to_string()))?;
        let reply = service.edit(&STANDARD.encode(png), &self.instruction)?;
        let edited = decode_reply(&reply)?;

        let (w, h) = self.bitmap.dimensions();
        let edited = if edited.dimensions() != (w, h) {
            image::imageops::resize(&edited, w, h, image::imageops::FilterType::Lanczos3)
        } else {
            edited
        };

        let mut out = self.bitmap.clone();
        image::imageops::overlay(&mut out, &edited, 0, 0);
        Ok(out)
    }
}

/// Accepts bare base64 or a `data:image/...;base64,` URL.
fn decode_reply(reply: &str) -> Result<RgbaImage, AiError> {
    let payload = reply.trim();
    let payload = match payload.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| AiError::MalformedPayload("data URL without payload".to_string()))?,
        None => payload,
    };
    if payload.is_empty() {
        return Err(AiError::MalformedPayload("empty payload".to_string()));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| AiError::MalformedPayload(e.to_string()))?;
    image::load_from_memory(&bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| AiError::Decode(e.to_string()))
}
