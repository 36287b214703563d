use egui::{Pos2, Rect, Vec2};
use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::blend_over;
use crate::settings::EditorSettings;

/// Drags whose box is this thin (or thinner) in either dimension are jitter.
pub const MIN_COMMIT_SIZE: f32 = 2.0;

/// Average glyph advance as a fraction of the font size, used to auto-size text boxes.
pub const TEXT_ADVANCE_FACTOR: f32 = 0.6;
pub const TEXT_LINE_HEIGHT: f32 = 1.2;

/// Vector object primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Rectangle,
    Ellipse,
    Line,
    Text,
}

impl ObjectKind {
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::Rectangle => "rectangle",
            ObjectKind::Ellipse => "ellipse",
            ObjectKind::Line => "line",
            ObjectKind::Text => "text",
        }
    }
}

/// Handle for interacting with the selected object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeHandle {
    Resize,
    Rotate,
}

/// Current stroke / fill / size settings new objects are created with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectStyle {
    pub stroke_color: [u8; 4],
    pub fill_color: [u8; 4],
    pub stroke_width: f32,
    pub opacity: f32,
    pub font_size: f32,
}

impl Default for ObjectStyle {
    fn default() -> Self {
        Self::from_settings(&EditorSettings::default())
    }
}

impl ObjectStyle {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self {
            stroke_color: settings.stroke_color,
            fill_color: settings.fill_color,
            stroke_width: settings.stroke_width,
            opacity: settings.opacity.clamp(0.0, 1.0),
            font_size: settings.font_size,
        }
    }
}

/// An annotation object in bitmap-pixel coordinates, painted above the bitmap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorObject {
    pub id: Uuid,
    pub kind: ObjectKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Radians, clockwise on screen, pivot = box center.
    pub rotation: f32,
    pub stroke_color: [u8; 4],
    pub fill_color: [u8; 4],
    pub stroke_width: f32,
    pub opacity: f32,
    pub font_size: f32,
    pub text: String,
    /// Lines only: the line runs bottom-left to top-right instead of
    /// top-left to bottom-right.
    pub mirrored: bool,
}

/// Hit zones of the selection handles, already converted to bitmap pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandleMetrics {
    pub radius: f32,
    pub rotate_offset: f32,
}

impl HandleMetrics {
    /// Handles keep a constant screen size, so their bitmap size shrinks as zoom grows.
    pub fn at_zoom(settings: &EditorSettings, zoom: f32) -> Self {
        Self {
            radius: settings.handle_radius / zoom,
            rotate_offset: settings.rotate_handle_offset / zoom,
        }
    }
}

impl VectorObject {
    fn with_style(kind: ObjectKind, rect: Rect, style: &ObjectStyle) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            x: rect.min.x,
            y: rect.min.y,
            width: rect.width(),
            height: rect.height(),
            rotation: 0.0,
            stroke_color: style.stroke_color,
            fill_color: style.fill_color,
            stroke_width: style.stroke_width,
            opacity: style.opacity.clamp(0.0, 1.0),
            font_size: style.font_size,
            text: String::new(),
            mirrored: false,
        }
    }

    /// Build a shape from a rubber-band drag. `None` for drags of
    /// `MIN_COMMIT_SIZE` or less in either dimension.
    pub fn from_drag(kind: ObjectKind, from: Pos2, to: Pos2, style: &ObjectStyle) -> Option<Self> {
        let rect = Rect::from_two_pos(from, to);
        if rect.width() <= MIN_COMMIT_SIZE || rect.height() <= MIN_COMMIT_SIZE {
            return None;
        }
        let mut obj = Self::with_style(kind, rect, style);
        if kind == ObjectKind::Line {
            obj.mirrored = (to.x - from.x) * (to.y - from.y) < 0.0;
        }
        Some(obj)
    }

    /// Fill-select: a rectangle filled with the current fill color and no
    /// visible stroke. A fully transparent fill falls back to the stroke color.
    pub fn filled_rect(from: Pos2, to: Pos2, style: &ObjectStyle) -> Option<Self> {
        let mut obj = Self::from_drag(ObjectKind::Rectangle, from, to, style)?;
        obj.fill_color = if style.fill_color[3] > 0 { style.fill_color } else { style.stroke_color };
        obj.stroke_color = [0, 0, 0, 0];
        obj.stroke_width = 0.0;
        Some(obj)
    }

    /// A text object whose box is sized from the character count and font size.
    pub fn text(at: Pos2, text: &str, style: &ObjectStyle) -> Option<Self> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return None;
        }
        let (width, height) = text_box_size(text, style.font_size);
        let rect = Rect::from_min_size(at, Vec2::new(width, height));
        let mut obj = Self::with_style(ObjectKind::Text, rect, style);
        obj.text = text.to_string();
        Some(obj)
    }

    pub fn rect(&self) -> Rect {
        Rect::from_min_size(Pos2::new(self.x, self.y), Vec2::new(self.width, self.height))
    }

    pub fn center(&self) -> Pos2 {
        Pos2::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Axis-aligned test on the unrotated box. Rotated objects are therefore
    /// hit slightly outside (and missed slightly inside) their drawn outline.
    pub fn contains(&self, p: Pos2) -> bool {
        self.rect().contains(p)
    }

    /// Bottom-right corner of the unrotated box.
    pub fn resize_handle_pos(&self) -> Pos2 {
        Pos2::new(self.x + self.width, self.y + self.height)
    }

    /// Above the top-center of the unrotated box.
    pub fn rotate_handle_pos(&self, metrics: &HandleMetrics) -> Pos2 {
        Pos2::new(self.x + self.width * 0.5, self.y - metrics.rotate_offset)
    }

    /// Which handle (if any) lies under `p`. Resize wins over rotate.
    pub fn handle_at(&self, p: Pos2, metrics: &HandleMetrics) -> Option<ShapeHandle> {
        if p.distance(self.resize_handle_pos()) <= metrics.radius {
            Some(ShapeHandle::Resize)
        } else if p.distance(self.rotate_handle_pos(metrics)) <= metrics.radius {
            Some(ShapeHandle::Rotate)
        } else {
            None
        }
    }

    /// Move so that the point grabbed at `grab_offset` (relative to the
    /// top-left corner) follows the pointer.
    pub fn drag_to(&mut self, pointer: Pos2, grab_offset: Vec2) {
        self.x = pointer.x - grab_offset.x;
        self.y = pointer.y - grab_offset.y;
    }

    /// Resize from the fixed top-left corner, never below `min_size`.
    pub fn resize_to(&mut self, pointer: Pos2, min_size: f32) {
        self.width = (pointer.x - self.x).max(min_size);
        self.height = (pointer.y - self.y).max(min_size);
        if self.kind == ObjectKind::Text {
            self.font_size = self.height / TEXT_LINE_HEIGHT;
        }
    }

    /// Angle of the pointer around the center, offset by a quarter turn so
    /// that a pointer straight above the center means "no rotation".
    pub fn rotate_to(&mut self, pointer: Pos2) {
        let c = self.center();
        self.rotation = (pointer.y - c.y).atan2(pointer.x - c.x) + std::f32::consts::FRAC_PI_2;
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.x += delta.x;
        self.y += delta.y;
    }

    pub fn set_font_size(&mut self, font_size: f32) {
        self.font_size = font_size;
        if self.kind == ObjectKind::Text {
            let (w, h) = text_box_size(&self.text, font_size);
            self.width = w;
            self.height = h;
        }
    }
}

pub fn text_box_size(text: &str, font_size: f32) -> (f32, f32) {
    let chars = text.chars().count().max(1) as f32;
    (chars * font_size * TEXT_ADVANCE_FACTOR, font_size * TEXT_LINE_HEIGHT)
}

/// Topmost (last in paint order) object containing `p`.
pub fn hit_test(objects: &[VectorObject], p: Pos2) -> Option<&VectorObject> {
    objects.iter().rev().find(|o| o.contains(p))
}

// ============================================================================
// SDF functions - return signed distance (negative = inside)
// ============================================================================

/// SDF for a box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// SDF for an ellipse (approximation).
#[inline]
fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

/// Distance to a line segment. Degenerate segments measure to the point.
#[inline]
pub(crate) fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 1e-12 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

/// Smoothstep between edge0 and edge1.
#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

// ============================================================================
// Rasterization
// ============================================================================

/// A straight-alpha RGBA patch positioned on the canvas.
pub struct Patch {
    pub buf: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

/// Canvas-clamped pixel bounds of `local` (relative to `center`) after rotating
/// it around `center`. Returns `(x0, y0, width, height)`.
pub(crate) fn rotated_bounds(
    center: Pos2,
    local: Rect,
    rotation: f32,
    pad: f32,
    canvas_w: u32,
    canvas_h: u32,
) -> Option<(i32, i32, u32, u32)> {
    let (sin_r, cos_r) = rotation.sin_cos();
    let corners = [local.left_top(), local.right_top(), local.right_bottom(), local.left_bottom()];
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for p in corners {
        let rx = p.x * cos_r - p.y * sin_r + center.x;
        let ry = p.x * sin_r + p.y * cos_r + center.y;
        min_x = min_x.min(rx);
        min_y = min_y.min(ry);
        max_x = max_x.max(rx);
        max_y = max_y.max(ry);
    }
    let x0 = ((min_x - pad).floor() as i32).max(0);
    let y0 = ((min_y - pad).floor() as i32).max(0);
    let x1 = ((max_x + pad).ceil() as i32).min(canvas_w as i32);
    let y1 = ((max_y + pad).ceil() as i32).min(canvas_h as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Rasterize a rectangle, ellipse or line object into a patch covering its
/// rotated bounding box (clamped to the canvas). Text objects go through
/// `ops::text`.
pub fn rasterize_object(obj: &VectorObject, canvas_w: u32, canvas_h: u32) -> Option<Patch> {
    if obj.kind == ObjectKind::Text {
        return None;
    }
    let hx = obj.width * 0.5;
    let hy = obj.height * 0.5;
    let c = obj.center();
    let (x0, y0, buf_w, buf_h) = rotated_bounds(
        c,
        Rect::from_center_size(Pos2::ZERO, Vec2::new(obj.width, obj.height)),
        obj.rotation,
        obj.stroke_width + 2.0,
        canvas_w,
        canvas_h,
    )?;

    let row_bytes = buf_w as usize * 4;
    let mut buf = vec![0u8; row_bytes * buf_h as usize];

    // Inverse rotation = transpose for rotation matrices
    let (sin_r, cos_r) = obj.rotation.sin_cos();
    let inv_sin = -sin_r;
    let stroke_half = obj.stroke_width * 0.5;
    let draw_stroke = obj.stroke_width > 0.0 && obj.stroke_color[3] > 0;
    let draw_fill = obj.fill_color[3] > 0;
    let (ly0, ly1) = if obj.mirrored { (hy, -hy) } else { (-hy, hy) };

    buf.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row, row_buf)| {
            let py_canvas = (y0 + row as i32) as f32 + 0.5;
            for col in 0..buf_w as usize {
                let px_canvas = (x0 + col as i32) as f32 + 0.5;

                // Transform to object-local coordinates (inverse rotate around center)
                let dx = px_canvas - c.x;
                let dy = py_canvas - c.y;
                let lx = dx * cos_r - dy * inv_sin;
                let ly = dx * inv_sin + dy * cos_r;

                let idx = col * 4;
                let px = &mut row_buf[idx..idx + 4];
                match obj.kind {
                    ObjectKind::Line => {
                        let d = sdf_line_segment(lx, ly, -hx, ly0, hx, ly1) - stroke_half.max(0.5);
                        blend_over(px, obj.stroke_color, smoothstep(0.5, -0.5, d));
                    }
                    ObjectKind::Rectangle | ObjectKind::Ellipse => {
                        let d = if obj.kind == ObjectKind::Rectangle {
                            sdf_box(lx, ly, hx, hy)
                        } else {
                            sdf_ellipse(lx, ly, hx, hy)
                        };
                        if draw_fill {
                            blend_over(px, obj.fill_color, smoothstep(0.5, -0.5, d));
                        }
                        if draw_stroke {
                            // Outline on top
                            let band = d.abs() - stroke_half;
                            blend_over(px, obj.stroke_color, smoothstep(0.5, -0.5, band));
                        }
                    }
                    ObjectKind::Text => {}
                }
            }
        });

    Some(Patch { buf, width: buf_w, height: buf_h, offset_x: x0, offset_y: y0 })
}

/// Source-over a patch onto the canvas with a global opacity.
pub fn composite_patch(dst: &mut RgbaImage, patch: &Patch, opacity: f32) {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || patch.width == 0 {
        return;
    }
    let dw = dst.width();
    let stride = dw as usize * 4;
    let patch_row = patch.width as usize * 4;
    let raw: &mut [u8] = &mut *dst;
    raw.par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row)| {
            let py = y as i32 - patch.offset_y;
            if py < 0 || py >= patch.height as i32 {
                return;
            }
            let src_row = &patch.buf[py as usize * patch_row..(py as usize + 1) * patch_row];
            for px in 0..patch.width as i32 {
                let x = patch.offset_x + px;
                if x < 0 || x >= dw as i32 {
                    continue;
                }
                let s = &src_row[px as usize * 4..px as usize * 4 + 4];
                if s[3] == 0 {
                    continue;
                }
                let d = x as usize * 4;
                blend_over(&mut row[d..d + 4], [s[0], s[1], s[2], s[3]], opacity);
            }
        });
}

/// Rasterize and composite a non-text object.
pub fn draw_object(dst: &mut RgbaImage, obj: &VectorObject) {
    if let Some(patch) = rasterize_object(obj, dst.width(), dst.height()) {
        composite_patch(dst, &patch, obj.opacity);
    }
}
