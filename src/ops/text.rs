use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};
use egui::{Pos2, Rect};
use image::RgbaImage;
use rayon::prelude::*;
use std::sync::OnceLock;

use crate::ops::shapes::{composite_patch, rotated_bounds, ObjectKind, Patch, VectorObject};

/// Families tried, in order, before falling back to the generic sans-serif.
const PREFERRED_FAMILIES: &[&str] = &["Arial", "Helvetica", "DejaVu Sans", "Liberation Sans", "Noto Sans"];

static DEFAULT_FONT: OnceLock<Option<FontArc>> = OnceLock::new();

/// Lay out a single line of text starting at x = 0 with the baseline at `ascent`.
/// Returns `(glyphs, total_width, ascent)`.
pub fn layout_line(font: &FontArc, text: &str, font_size: f32) -> (Vec<(GlyphId, f32, f32)>, f32, f32) {
    let scaled = font.as_scaled(font_size);
    let ascent = scaled.ascent();

    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last_glyph: Option<GlyphId> = None;
    for ch in text.chars() {
        if ch.is_control() {
            continue;
        }
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = last_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, cursor_x, ascent));
        cursor_x += scaled.h_advance(glyph_id);
        last_glyph = Some(glyph_id);
    }

    (glyphs, cursor_x, ascent)
}

/// Coverage mask of one laid-out line, in text space (origin = object top-left).
struct Coverage {
    data: Vec<f32>,
    x0: i32,
    y0: i32,
    width: u32,
    height: u32,
}

fn rasterize_coverage(font: &FontArc, text: &str, font_size: f32) -> Option<Coverage> {
    let (glyphs, _, _) = layout_line(font, text, font_size);

    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for &(glyph_id, gx, gy) in &glyphs {
        let glyph = glyph_id.with_scale_and_position(font_size, point(gx, gy));
        let bounds = font.glyph_bounds(&glyph);
        min_x = min_x.min(bounds.min.x);
        min_y = min_y.min(bounds.min.y);
        max_x = max_x.max(bounds.max.x);
        max_y = max_y.max(bounds.max.y);
    }
    if min_x >= max_x || min_y >= max_y {
        return None;
    }

    let x0 = min_x.floor() as i32 - 1;
    let y0 = min_y.floor() as i32 - 1;
    let width = (max_x.ceil() as i32 + 1 - x0) as u32;
    let height = (max_y.ceil() as i32 + 1 - y0) as u32;
    let mut data = vec![0.0f32; width as usize * height as usize];

    for &(glyph_id, gx, gy) in &glyphs {
        let glyph = glyph_id.with_scale_and_position(font_size, point(gx.round(), gy.round()));
        let Some(outlined) = font.outline_glyph(glyph) else { continue };
        let b = outlined.px_bounds();
        outlined.draw(|px, py, cov| {
            let ix = b.min.x as i32 + px as i32 - x0;
            let iy = b.min.y as i32 + py as i32 - y0;
            if ix >= 0 && iy >= 0 && (ix as u32) < width && (iy as u32) < height {
                let idx = iy as usize * width as usize + ix as usize;
                data[idx] = data[idx].max(cov);
            }
        });
    }

    Some(Coverage { data, x0, y0, width, height })
}

/// Rasterize a text object (top-left anchored, rotated around its box center)
/// into a canvas patch colored with the object's stroke color.
pub fn rasterize_text_object(
    font: &FontArc,
    obj: &VectorObject,
    canvas_w: u32,
    canvas_h: u32,
) -> Option<Patch> {
    if obj.kind != ObjectKind::Text || obj.text.is_empty() || obj.font_size <= 0.0 {
        return None;
    }
    let cov = rasterize_coverage(font, &obj.text, obj.font_size)?;

    let c = obj.center();
    let local = Rect::from_min_max(
        Pos2::new(obj.x + cov.x0 as f32 - c.x, obj.y + cov.y0 as f32 - c.y),
        Pos2::new(
            obj.x + (cov.x0 + cov.width as i32) as f32 - c.x,
            obj.y + (cov.y0 + cov.height as i32) as f32 - c.y,
        ),
    );
    let (x0, y0, buf_w, buf_h) = rotated_bounds(c, local, obj.rotation, 1.0, canvas_w, canvas_h)?;

    let row_bytes = buf_w as usize * 4;
    let mut buf = vec![0u8; row_bytes * buf_h as usize];
    let (sin_r, cos_r) = obj.rotation.sin_cos();
    let color = obj.stroke_color;

    buf.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(row, row_buf)| {
            let py_canvas = (y0 + row as i32) as f32 + 0.5;
            for col in 0..buf_w as usize {
                let px_canvas = (x0 + col as i32) as f32 + 0.5;
                let dx = px_canvas - c.x;
                let dy = py_canvas - c.y;
                // Inverse rotate, then shift from center-relative to text space
                let u = dx * cos_r + dy * sin_r + c.x - obj.x;
                let v = -dx * sin_r + dy * cos_r + c.y - obj.y;
                let ix = u.floor() as i32 - cov.x0;
                let iy = v.floor() as i32 - cov.y0;
                if ix < 0 || iy < 0 || ix as u32 >= cov.width || iy as u32 >= cov.height {
                    continue;
                }
                let coverage = cov.data[iy as usize * cov.width as usize + ix as usize];
                if coverage > 0.001 {
                    let idx = col * 4;
                    row_buf[idx] = color[0];
                    row_buf[idx + 1] = color[1];
                    row_buf[idx + 2] = color[2];
                    row_buf[idx + 3] = (color[3] as f32 * coverage).round().min(255.0) as u8;
                }
            }
        });

    Some(Patch { buf, width: buf_w, height: buf_h, offset_x: x0, offset_y: y0 })
}

/// Rasterize and composite a text object with its opacity.
pub fn draw_text_object(dst: &mut RgbaImage, font: &FontArc, obj: &VectorObject) {
    if let Some(patch) = rasterize_text_object(font, obj, dst.width(), dst.height()) {
        composite_patch(dst, &patch, obj.opacity);
    }
}

/// The font text objects are flattened with: the first preferred family the
/// system has, else its default sans-serif. Looked up once per process.
pub fn default_font() -> Option<FontArc> {
    DEFAULT_FONT
        .get_or_init(|| {
            let font = PREFERRED_FAMILIES
                .iter()
                .find_map(|family| load_system_font(family, 400, false))
                .or_else(load_sans_serif);
            match &font {
                Some(_) => log_info!("Text font loaded"),
                None => log_warn!("No system font available; text objects will not be flattened"),
            }
            font
        })
        .clone()
}

/// Load a font by family name, weight, and style from the system.
/// `weight` is a CSS-style weight value (100=Thin, 400=Regular, 700=Bold, etc.)
/// Returns None if the font cannot be found.
pub fn load_system_font(family: &str, weight: u16, italic: bool) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    select_font(FamilyName::Title(family.to_string()), weight, italic)
}

fn load_sans_serif() -> Option<FontArc> {
    select_font(font_kit::family_name::FamilyName::SansSerif, 400, false)
}

fn select_font(family: font_kit::family_name::FamilyName, weight: u16, italic: bool) -> Option<FontArc> {
    use font_kit::properties::{Properties, Style, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight(weight as f32);
    if italic {
        props.style = Style::Italic;
    }

    let handle = SystemSource::new().select_best_match(&[family], &props).ok()?;
    let font_data = handle.load().ok()?;
    let bytes: Vec<u8> = (*font_data.copy_font_data()?).clone();
    FontArc::try_from_vec(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::shapes::ObjectStyle;

    fn font_or_skip() -> Option<FontArc> {
        let font = default_font();
        if font.is_none() {
            eprintln!("no system font available, skipping");
        }
        font
    }

    fn text_object(text: &str) -> VectorObject {
        let style = ObjectStyle {
            stroke_color: [0, 0, 0, 255],
            fill_color: [0, 0, 0, 0],
            stroke_width: 1.0,
            opacity: 1.0,
            font_size: 24.0,
        };
        VectorObject::text(Pos2::new(20.0, 20.0), text, &style).unwrap()
    }

    fn inked(img: &RgbaImage) -> usize {
        img.pixels().filter(|p| p[3] > 0).count()
    }

    #[test]
    fn longer_lines_lay_out_wider() {
        let Some(font) = font_or_skip() else { return };
        let (_, short, _) = layout_line(&font, "ab", 20.0);
        let (glyphs, long, ascent) = layout_line(&font, "abcdef", 20.0);
        assert_eq!(glyphs.len(), 6);
        assert!(long > short);
        assert!(ascent > 0.0);
    }

    #[test]
    fn text_is_drawn_near_its_box() {
        let Some(font) = font_or_skip() else { return };
        let obj = text_object("Hello");
        let mut canvas = RgbaImage::new(200, 100);
        draw_text_object(&mut canvas, &font, &obj);
        assert!(inked(&canvas) > 0);
        // Nothing left of the box or far below it.
        for y in 0..100 {
            assert_eq!(canvas.get_pixel(5, y)[3], 0);
        }
        for x in 0..200 {
            assert_eq!(canvas.get_pixel(x, 90)[3], 0);
        }
    }

    #[test]
    fn rotation_keeps_ink_amount_roughly() {
        let Some(font) = font_or_skip() else { return };
        let mut obj = text_object("Rotate");
        let mut flat = RgbaImage::new(300, 300);
        obj.x = 100.0;
        obj.y = 130.0;
        draw_text_object(&mut flat, &font, &obj);
        let mut turned = RgbaImage::new(300, 300);
        obj.rotation = std::f32::consts::FRAC_PI_2;
        draw_text_object(&mut turned, &font, &obj);
        let (a, b) = (inked(&flat) as f32, inked(&turned) as f32);
        assert!(a > 0.0 && (a - b).abs() / a < 0.35);
    }

    #[test]
    fn non_text_objects_are_ignored() {
        let Some(font) = font_or_skip() else { return };
        let mut obj = text_object("x");
        obj.kind = ObjectKind::Rectangle;
        assert!(rasterize_text_object(&font, &obj, 100, 100).is_none());
    }
}
