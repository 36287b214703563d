// ============================================================================
// Local inpainting - iterative neighbour-averaging (Jacobi diffusion)
// ============================================================================

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;

/// 8-connected neighbourhood.
const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// What a fill run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InpaintStats {
    /// Pixels above the mask threshold when the run started.
    pub masked: usize,
    /// Pixels written by the diffusion passes and the border sweep.
    pub filled: usize,
    /// Pixels still marked afterwards (only non-zero when the passes ran out
    /// or the whole image was masked).
    pub remaining: usize,
    pub passes_run: usize,
}

/// Fill every pixel whose mask value exceeds `threshold` by repeatedly
/// averaging its unmasked 8-neighbours.
///
/// Each pass reads a snapshot of the pixels and the mask taken before the
/// pass, so a pixel filled in pass `n` only becomes a source in pass `n + 1`
/// and the result does not depend on scan order. Interior pixels are handled
/// by up to `passes` diffusion passes; masked pixels on the 1-pixel image
/// border are then filled by a separate sweep that only looks at in-bounds
/// neighbours. Filled pixels are written fully opaque.
///
/// With nothing masked the bitmap is left untouched.
pub fn diffuse_fill(bitmap: &mut RgbaImage, mask: &GrayImage, threshold: u8, passes: usize) -> InpaintStats {
    if bitmap.dimensions() != mask.dimensions() {
        log_warn!(
            "Inpaint skipped: mask {:?} does not match bitmap {:?}",
            mask.dimensions(),
            bitmap.dimensions()
        );
        return InpaintStats::default();
    }

    let (w, h) = (bitmap.width() as usize, bitmap.height() as usize);
    let mut marks: Vec<bool> = mask.as_raw().iter().map(|&v| v > threshold).collect();
    let masked = marks.iter().filter(|&&m| m).count();
    let mut stats = InpaintStats { masked, remaining: masked, ..Default::default() };
    if masked == 0 {
        return stats;
    }

    // -- Diffusion over interior pixels --------------------------------------
    if w >= 3 && h >= 3 {
        for _ in 0..passes {
            let fills = {
                let src = bitmap.as_raw();
                let marks_snap = &marks;
                (1..h - 1)
                    .into_par_iter()
                    .map(|y| {
                        let mut row_fills = Vec::new();
                        for x in 1..w - 1 {
                            if !marks_snap[y * w + x] {
                                continue;
                            }
                            if let Some(px) = average_unmasked(src, marks_snap, w, h, x, y) {
                                row_fills.push((y * w + x, px));
                            }
                        }
                        row_fills
                    })
                    .collect::<Vec<_>>()
            };

            stats.passes_run += 1;
            let filled = apply_fills(bitmap, &mut marks, fills.into_iter().flatten());
            stats.filled += filled;
            stats.remaining -= filled;
            if filled == 0 || stats.remaining == 0 {
                break;
            }
        }
    }

    // -- Border sweep ------------------------------------------------------------
    let border: Vec<usize> = (0..w * h)
        .filter(|&i| {
            let (x, y) = (i % w, i / w);
            x == 0 || y == 0 || x == w - 1 || y == h - 1
        })
        .collect();
    for _ in 0..(w + h) {
        if stats.remaining == 0 {
            break;
        }
        let fills: Vec<(usize, [u8; 4])> = {
            let src = bitmap.as_raw();
            border
                .iter()
                .filter(|&&i| marks[i])
                .filter_map(|&i| average_unmasked(src, &marks, w, h, i % w, i / w).map(|px| (i, px)))
                .collect()
        };
        let filled = apply_fills(bitmap, &mut marks, fills);
        stats.filled += filled;
        stats.remaining -= filled;
        if filled == 0 {
            break;
        }
    }

    stats
}

/// Rounded mean colour of the in-bounds, unmasked 8-neighbours of `(x, y)`.
fn average_unmasked(src: &[u8], marks: &[bool], w: usize, h: usize, x: usize, y: usize) -> Option<[u8; 4]> {
    let mut sum = [0u32; 3];
    let mut n = 0u32;
    for (dx, dy) in NEIGHBOURS {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
            continue;
        }
        let ni = ny as usize * w + nx as usize;
        if marks[ni] {
            continue;
        }
        let p = &src[ni * 4..ni * 4 + 3];
        sum[0] += p[0] as u32;
        sum[1] += p[1] as u32;
        sum[2] += p[2] as u32;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    let avg = |s: u32| ((s + n / 2) / n) as u8;
    Some([avg(sum[0]), avg(sum[1]), avg(sum[2]), 255])
}

fn apply_fills(
    bitmap: &mut RgbaImage,
    marks: &mut [bool],
    fills: impl IntoIterator<Item = (usize, [u8; 4])>,
) -> usize {
    let raw: &mut [u8] = &mut *bitmap;
    let mut count = 0;
    for (idx, px) in fills {
        raw[idx * 4..idx * 4 + 4].copy_from_slice(&px);
        marks[idx] = false;
        count += 1;
    }
    count
}
