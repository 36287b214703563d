use egui::{Pos2, Rect, Vec2};
use image::{GrayImage, Luma, RgbaImage};
use rayon::prelude::*;

use crate::ops::shapes::sdf_line_segment;
use crate::settings::EditorSettings;

// ============================================================================
// VIEWPORT - zoom / pan mapping between screen space and bitmap space
// ============================================================================

/// Zoom and pan of the editing view. Purely a view concern: stored pixel and
/// object coordinates never depend on it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub zoom: f32,
    /// Screen position of the bitmap origin.
    pub pan_offset: Vec2,
    min_zoom: f32,
    max_zoom: f32,
    zoom_step: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::from_settings(&EditorSettings::default())
    }
}

impl Viewport {
    pub fn new(min_zoom: f32, max_zoom: f32, zoom_step: f32) -> Self {
        Self {
            zoom: 1.0_f32.clamp(min_zoom, max_zoom),
            pan_offset: Vec2::ZERO,
            min_zoom,
            max_zoom,
            zoom_step,
        }
    }

    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self::new(settings.min_zoom, settings.max_zoom, settings.zoom_step)
    }

    /// `bitmap = (screen - pan) / zoom`. Every pointer event goes through here.
    pub fn to_bitmap_space(&self, screen: Pos2) -> Pos2 {
        ((screen - self.pan_offset).to_vec2() / self.zoom).to_pos2()
    }

    pub fn to_screen_space(&self, bitmap: Pos2) -> Pos2 {
        (bitmap.to_vec2() * self.zoom + self.pan_offset).to_pos2()
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(self.min_zoom, self.max_zoom);
        }
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom * self.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom / self.zoom_step);
    }

    pub fn reset(&mut self) {
        self.zoom = 1.0_f32.clamp(self.min_zoom, self.max_zoom);
        self.pan_offset = Vec2::ZERO;
    }

    /// Zoom while keeping the bitmap point under `anchor` (screen space) fixed.
    pub fn zoom_around_screen_point(&mut self, zoom_factor: f32, anchor: Pos2) {
        let fixed = self.to_bitmap_space(anchor);
        self.set_zoom(self.zoom * zoom_factor);
        self.pan_offset = anchor.to_vec2() - fixed.to_vec2() * self.zoom;
    }

    /// Mouse wheel: positive `scroll_y` zooms in one step around the cursor.
    pub fn wheel(&mut self, scroll_y: f32, anchor: Pos2) {
        if scroll_y > 0.0 {
            self.zoom_around_screen_point(self.zoom_step, anchor);
        } else if scroll_y < 0.0 {
            self.zoom_around_screen_point(1.0 / self.zoom_step, anchor);
        }
    }

    /// Pan the viewport by a screen-space delta. Unbounded.
    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan_offset += delta;
    }

    /// Largest zoom (within bounds) that shows the whole bitmap inside `view`, centered.
    pub fn fit(&mut self, bitmap_size: Vec2, view: Rect) {
        if bitmap_size.x <= 0.0 || bitmap_size.y <= 0.0 {
            return;
        }
        self.set_zoom((view.width() / bitmap_size.x).min(view.height() / bitmap_size.y));
        self.pan_offset = view.center().to_vec2() - bitmap_size * self.zoom * 0.5;
    }
}

// ============================================================================
// MASK SURFACE - pixels queued for removal
// ============================================================================

/// Value written for a marked pixel.
pub const MASK_ON: u8 = 255;

/// Hidden scratch bitmap of the erase tool, always 1:1 with the bitmap.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskSurface {
    marks: GrayImage,
}

impl MaskSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { marks: GrayImage::new(width, height) }
    }

    pub fn from_gray(marks: GrayImage) -> Self {
        Self { marks }
    }

    pub fn width(&self) -> u32 {
        self.marks.width()
    }

    pub fn height(&self) -> u32 {
        self.marks.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.marks.dimensions()
    }

    /// Read-only view of the raw intensities.
    pub fn as_gray(&self) -> &GrayImage {
        &self.marks
    }

    pub fn mark(&mut self, x: u32, y: u32) {
        if x < self.width() && y < self.height() {
            self.marks.put_pixel(x, y, Luma([MASK_ON]));
        }
    }

    /// Mark every pixel whose center lies inside `rect` (bitmap space).
    pub fn mark_rect(&mut self, rect: Rect) {
        let Some((x0, y0, x1, y1)) = pixel_span(rect, self.width(), self.height()) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                self.marks.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
    }

    /// Mark a round-capped segment of the given width.
    pub fn paint_segment(&mut self, a: Pos2, b: Pos2, width: f32) {
        let half = (width * 0.5).max(0.5);
        let (w, h) = self.dimensions();
        let Some((x0, y0, x1, y1)) = pixel_span(segment_bounds(a, b, half + 1.0), w, h) else {
            return;
        };
        let stride = w as usize;
        let raw: &mut [u8] = &mut self.marks;
        raw.par_chunks_mut(stride)
            .enumerate()
            .skip(y0 as usize)
            .take((y1 - y0) as usize)
            .for_each(|(y, row)| {
                let py = y as f32 + 0.5;
                for x in x0..x1 {
                    let px = x as f32 + 0.5;
                    if sdf_line_segment(px, py, a.x, a.y, b.x, b.y) <= half {
                        row[x as usize] = MASK_ON;
                    }
                }
            });
    }

    pub fn is_marked(&self, x: u32, y: u32, threshold: u8) -> bool {
        self.marks
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[0] > threshold)
    }

    pub fn marked_count(&self, threshold: u8) -> usize {
        self.marks.as_raw().iter().filter(|&&v| v > threshold).count()
    }

    pub fn is_clear(&self, threshold: u8) -> bool {
        !self.marks.as_raw().iter().any(|&v| v > threshold)
    }

    /// Smallest pixel rectangle containing every marked pixel.
    pub fn marked_bounds(&self, threshold: u8) -> Option<Rect> {
        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0u32, 0u32);
        let mut any = false;
        for (x, y, p) in self.marks.enumerate_pixels() {
            if p.0[0] > threshold {
                any = true;
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
            }
        }
        any.then(|| {
            Rect::from_min_max(
                Pos2::new(min.0 as f32, min.1 as f32),
                Pos2::new((max.0 + 1) as f32, (max.1 + 1) as f32),
            )
        })
    }

    pub fn clear(&mut self) {
        self.marks.fill(0);
    }

    /// Resize in lockstep with the bitmap. Nearest-neighbour keeps marks binary.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.dimensions() == (width, height) {
            return;
        }
        self.marks = image::imageops::resize(
            &self.marks,
            width,
            height,
            image::imageops::FilterType::Nearest,
        );
    }

    pub fn crop(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.marks = image::imageops::crop_imm(&self.marks, x, y, width, height).to_image();
    }

    /// "Erase in progress" overlay: marked pixels painted with diagonal stripes
    /// whose position is shifted by `phase` (animate by advancing it).
    pub fn overlay_preview(&self, threshold: u8, phase: f32, color: [u8; 4]) -> RgbaImage {
        const PERIOD: f32 = 16.0;
        let (w, h) = self.dimensions();
        let mut out = RgbaImage::new(w, h);
        let stride = w as usize * 4;
        let src = self.marks.as_raw();
        let dst: &mut [u8] = &mut out;
        dst.par_chunks_mut(stride.max(1)).enumerate().for_each(|(y, row)| {
            for x in 0..w as usize {
                if src[y * w as usize + x] <= threshold {
                    continue;
                }
                let t = ((x + y) as f32 + phase).rem_euclid(PERIOD);
                let alpha = if t < PERIOD * 0.5 { color[3] } else { color[3] / 2 };
                row[x * 4..x * 4 + 4].copy_from_slice(&[color[0], color[1], color[2], alpha]);
            }
        });
        out
    }
}

// ============================================================================
// CANVAS STATE - bitmap + mask owned by one editing session
// ============================================================================

pub struct CanvasState {
    pub bitmap: RgbaImage,
    pub mask: MaskSurface,
}

impl CanvasState {
    pub fn new(bitmap: RgbaImage) -> Self {
        let mask = MaskSurface::new(bitmap.width(), bitmap.height());
        Self { bitmap, mask }
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width() as f32, self.height() as f32)
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_min_size(Pos2::ZERO, self.size())
    }

    /// Swap in a new bitmap; a mask of different size is reset to match.
    pub fn replace_bitmap(&mut self, bitmap: RgbaImage) {
        if self.mask.dimensions() != bitmap.dimensions() {
            self.mask = MaskSurface::new(bitmap.width(), bitmap.height());
        }
        self.bitmap = bitmap;
    }

    /// Paint one anti-aliased, round-capped brush segment into the bitmap.
    pub fn paint_segment(&mut self, a: Pos2, b: Pos2, width: f32, color: [u8; 4]) {
        paint_segment_rgba(&mut self.bitmap, a, b, width, color);
    }
}

/// Pixel range `[x0, x1) × [y0, y1)` of the pixels whose centers lie in `rect`,
/// clamped to the surface. `None` if empty.
pub fn pixel_span(rect: Rect, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = (rect.min.x - 0.5).ceil().max(0.0);
    let y0 = (rect.min.y - 0.5).ceil().max(0.0);
    let x1 = ((rect.max.x - 0.5).floor() + 1.0).min(width as f32);
    let y1 = ((rect.max.y - 0.5).floor() + 1.0).min(height as f32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

fn segment_bounds(a: Pos2, b: Pos2, pad: f32) -> Rect {
    Rect::from_two_pos(a, b).expand(pad)
}

pub fn paint_segment_rgba(img: &mut RgbaImage, a: Pos2, b: Pos2, width: f32, color: [u8; 4]) {
    let half = (width * 0.5).max(0.5);
    let (w, h) = img.dimensions();
    let Some((x0, y0, x1, y1)) = pixel_span(segment_bounds(a, b, half + 1.0), w, h) else {
        return;
    };
    let stride = w as usize * 4;
    let raw: &mut [u8] = &mut *img;
    raw.par_chunks_mut(stride)
        .enumerate()
        .skip(y0 as usize)
        .take((y1 - y0) as usize)
        .for_each(|(y, row)| {
            let py = y as f32 + 0.5;
            for x in x0..x1 {
                let px = x as f32 + 0.5;
                let d = sdf_line_segment(px, py, a.x, a.y, b.x, b.y);
                let coverage = (half + 0.5 - d).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    let i = x as usize * 4;
                    blend_over(&mut row[i..i + 4], color, coverage);
                }
            }
        });
}

/// Source-over blend of a straight-alpha color onto one RGBA pixel.
#[inline]
pub fn blend_over(dst: &mut [u8], src: [u8; 4], coverage: f32) {
    let sa = src[3] as f32 / 255.0 * coverage.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
