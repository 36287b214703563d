// ============================================================================
// CANVAS-LEVEL OPERATIONS - standardize / crop / flatten
// ============================================================================

use ab_glyph::FontArc;
use egui::{Rect, Vec2};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};

use crate::canvas::{CanvasState, MaskSurface};
use crate::ops::shapes::{self, ObjectKind, VectorObject, MIN_COMMIT_SIZE};
use crate::ops::text;

/// Where the old bitmap ended up inside a standardized canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale the bitmap to fit inside a `size × size` canvas (aspect ratio kept),
/// center it on `background`, and carry the mask through the same mapping.
///
/// Does not touch objects or history; the controller owns those.
pub fn standardize(canvas: &mut CanvasState, size: u32, background: [u8; 4]) -> Placement {
    let (w, h) = (canvas.width().max(1), canvas.height().max(1));
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let sw = ((w as f32 * scale).round() as u32).clamp(1, size);
    let sh = ((h as f32 * scale).round() as u32).clamp(1, size);
    let placement = Placement {
        scale,
        offset_x: (size - sw) / 2,
        offset_y: (size - sh) / 2,
        width: sw,
        height: sh,
    };

    let scaled = imageops::resize(&canvas.bitmap, sw, sh, FilterType::Lanczos3);
    let mut bitmap = RgbaImage::from_pixel(size, size, Rgba(background));
    imageops::overlay(&mut bitmap, &scaled, placement.offset_x as i64, placement.offset_y as i64);

    let scaled_mask = imageops::resize(canvas.mask.as_gray(), sw, sh, FilterType::Nearest);
    let mut mask = GrayImage::new(size, size);
    imageops::replace(&mut mask, &scaled_mask, placement.offset_x as i64, placement.offset_y as i64);

    canvas.bitmap = bitmap;
    canvas.mask = MaskSurface::from_gray(mask);
    log_info!(
        "Standardized {}x{} to {}x{} canvas (content {}x{} at {},{})",
        w,
        h,
        size,
        size,
        sw,
        sh,
        placement.offset_x,
        placement.offset_y
    );
    placement
}

/// Integer crop box of `rect` clamped to a `w × h` surface, or `None` when the
/// clamped box is `MIN_COMMIT_SIZE` pixels or less in either dimension.
pub fn crop_box(rect: Rect, w: u32, h: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = rect.min.x.round().clamp(0.0, w as f32) as u32;
    let y0 = rect.min.y.round().clamp(0.0, h as f32) as u32;
    let x1 = rect.max.x.round().clamp(0.0, w as f32) as u32;
    let y1 = rect.max.y.round().clamp(0.0, h as f32) as u32;
    let (cw, ch) = (x1.saturating_sub(x0), y1.saturating_sub(y0));
    if cw as f32 <= MIN_COMMIT_SIZE || ch as f32 <= MIN_COMMIT_SIZE {
        return None;
    }
    Some((x0, y0, cw, ch))
}

/// Crop bitmap and mask in lockstep. Returns the crop origin, which callers
/// subtract from object positions.
pub fn crop(canvas: &mut CanvasState, rect: Rect) -> Option<Vec2> {
    let (x, y, w, h) = crop_box(rect, canvas.width(), canvas.height())?;
    canvas.bitmap = imageops::crop_imm(&canvas.bitmap, x, y, w, h).to_image();
    canvas.mask.crop(x, y, w, h);
    log_info!("Cropped to {}x{} at {},{}", w, h, x, y);
    Some(Vec2::new(x as f32, y as f32))
}

/// Copy of the bitmap with every object painted on top in z-order.
/// Text objects need `font`; without one they are left out.
pub fn flatten(bitmap: &RgbaImage, objects: &[VectorObject], font: Option<&FontArc>) -> RgbaImage {
    let mut out = bitmap.clone();
    let mut skipped_text = 0usize;
    for obj in objects {
        match (obj.kind, font) {
            (ObjectKind::Text, Some(font)) => text::draw_text_object(&mut out, font, obj),
            (ObjectKind::Text, None) => skipped_text += 1,
            _ => shapes::draw_object(&mut out, obj),
        }
    }
    if skipped_text > 0 {
        log_warn!("Flatten: {} text object(s) skipped, no font available", skipped_text);
    }
    out
}
