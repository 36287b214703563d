use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat, RgbaImage};
use std::collections::VecDeque;

use crate::ops::shapes::VectorObject;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum HistoryError {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::Encode(e) => write!(f, "Could not snapshot editor state: {}", e),
            HistoryError::Decode(e) => write!(f, "Could not restore editor state: {}", e),
        }
    }
}

impl std::error::Error for HistoryError {}

impl From<Box<bincode::ErrorKind>> for HistoryError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        HistoryError::Decode(e.to_string())
    }
}

// ============================================================================
// HISTORY ENTRY - owned, encoded snapshot of bitmap + objects
// ============================================================================

/// Immutable snapshot. Holds compressed copies only, never a reference into
/// the live bitmap or object list.
#[derive(Clone)]
pub struct HistoryEntry {
    description: String,
    width: u32,
    height: u32,
    png: Vec<u8>,
    objects: Vec<u8>,
}

/// Decoded contents of an entry, owned by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct RestoredState {
    pub bitmap: RgbaImage,
    pub objects: Vec<VectorObject>,
    pub description: String,
}

impl HistoryEntry {
    pub fn capture(
        bitmap: &RgbaImage,
        objects: &[VectorObject],
        description: impl Into<String>,
    ) -> Result<Self, HistoryError> {
        let mut png = Vec::new();
        // Fast compression: snapshots are taken after every committed edit
        let encoder = PngEncoder::new_with_quality(&mut png, CompressionType::Fast, FilterType::Adaptive);
        encoder
            .write_image(bitmap.as_raw(), bitmap.width(), bitmap.height(), image::ColorType::Rgba8)
            .map_err(|e| HistoryError::Encode(e.to_string()))?;
        let objects = bincode::serialize(objects).map_err(|e| HistoryError::Encode(e.to_string()))?;
        Ok(Self {
            description: description.into(),
            width: bitmap.width(),
            height: bitmap.height(),
            png,
            objects,
        })
    }

    pub fn restore(&self) -> Result<RestoredState, HistoryError> {
        let bitmap = image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .map_err(|e| HistoryError::Decode(e.to_string()))?
            .to_rgba8();
        Ok(RestoredState {
            bitmap,
            objects: self.objects()?,
            description: self.description.clone(),
        })
    }

    pub fn objects(&self) -> Result<Vec<VectorObject>, HistoryError> {
        Ok(bincode::deserialize(&self.objects)?)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn memory_size(&self) -> usize {
        self.png.len() + self.objects.len() + self.description.len()
    }
}

// ============================================================================
// HISTORY STACK - linear undo with a pinned pristine entry
// ============================================================================

/// Entry 0 is the image as loaded with no objects. It is never popped by
/// undo and never evicted; overflow drops the oldest entry after it.
pub struct HistoryStack {
    entries: VecDeque<HistoryEntry>,
    max_history_size: usize,
    /// Running memory total across all entries.
    total_memory: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(30)
    }
}

impl HistoryStack {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            total_memory: 0,
        }
    }

    /// Drop everything and start over from a pristine entry.
    pub fn reset(&mut self, bitmap: &RgbaImage) -> Result<(), HistoryError> {
        let pristine = HistoryEntry::capture(bitmap, &[], "Open")?;
        self.entries.clear();
        self.total_memory = pristine.memory_size();
        self.entries.push_back(pristine);
        Ok(())
    }

    pub fn push(
        &mut self,
        bitmap: &RgbaImage,
        objects: &[VectorObject],
        description: impl Into<String>,
    ) -> Result<(), HistoryError> {
        let entry = HistoryEntry::capture(bitmap, objects, description)?;
        self.total_memory += entry.memory_size();
        self.entries.push_back(entry);
        self.prune();
        Ok(())
    }

    /// Pop the current state and return the one before it, decoded.
    /// `Ok(None)` when only the pristine entry is left.
    pub fn undo(&mut self) -> Result<Option<RestoredState>, HistoryError> {
        let len = self.entries.len();
        if len <= 1 {
            return Ok(None);
        }
        // Decode first so a corrupt entry leaves the stack untouched
        let restored = self.entries[len - 2].restore()?;
        if let Some(removed) = self.entries.pop_back() {
            self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
        }
        Ok(Some(restored))
    }

    pub fn can_undo(&self) -> bool {
        self.entries.len() > 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.entries.iter().rev().map(|e| e.description.clone()).collect()
    }

    /// Get the current memory usage of the history (O(1) via cached total)
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.entries.len() > self.max_history_size && self.entries.len() > 1 {
            if let Some(removed) = self.entries.remove(1) {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                log_info!("History full, dropped \"{}\"", removed.description);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::shapes::{ObjectKind, ObjectStyle};
    use egui::Pos2;
    use image::Rgba;

    fn rect_obj(x: f32) -> VectorObject {
        VectorObject::from_drag(
            ObjectKind::Rectangle,
            Pos2::new(x, 0.0),
            Pos2::new(x + 20.0, 20.0),
            &ObjectStyle::default(),
        )
        .unwrap()
    }

    fn stack_with_pristine(cap: usize) -> (HistoryStack, RgbaImage) {
        let img = RgbaImage::from_fn(12, 9, |x, y| Rgba([x as u8 * 20, y as u8 * 25, 3, 255]));
        let mut stack = HistoryStack::new(cap);
        stack.reset(&img).unwrap();
        (stack, img)
    }

    #[test]
    fn undo_round_trip_restores_exact_state() {
        let (mut stack, img_a) = stack_with_pristine(30);
        let objects_a = vec![rect_obj(0.0), rect_obj(30.0)];
        stack.push(&img_a, &objects_a, "State A").unwrap();

        let mut img_b = img_a.clone();
        img_b.put_pixel(3, 3, Rgba([1, 2, 3, 4]));
        let mut objects_b = objects_a.clone();
        objects_b[0].x = 99.0;
        objects_b.push(rect_obj(60.0));
        stack.push(&img_b, &objects_b, "State B").unwrap();

        let restored = stack.undo().unwrap().unwrap();
        assert_eq!(restored.bitmap, img_a);
        assert_eq!(restored.objects, objects_a);
        assert_eq!(restored.description, "State A");
    }

    #[test]
    fn entries_do_not_alias_live_state() {
        let (mut stack, mut img) = stack_with_pristine(30);
        let mut objects = vec![rect_obj(0.0)];
        stack.push(&img, &objects, "snap").unwrap();
        img.put_pixel(0, 0, Rgba([9, 9, 9, 9]));
        objects[0].width = 500.0;
        let snap = stack.latest().unwrap().restore().unwrap();
        assert_ne!(snap.bitmap, img);
        assert_eq!(snap.objects[0].width, 20.0);
    }

    #[test]
    fn pristine_entry_is_never_popped() {
        let (mut stack, img) = stack_with_pristine(30);
        assert!(!stack.can_undo());
        assert!(stack.undo().unwrap().is_none());
        stack.push(&img, &[rect_obj(0.0)], "Add rectangle").unwrap();
        let restored = stack.undo().unwrap().unwrap();
        assert!(restored.objects.is_empty());
        assert_eq!(restored.bitmap, img);
        assert!(stack.undo().unwrap().is_none());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn overflow_keeps_cap_entries_and_pristine() {
        let (mut stack, img) = stack_with_pristine(5);
        for i in 0..12 {
            stack.push(&img, &[], format!("edit {}", i)).unwrap();
        }
        assert_eq!(stack.len(), 5);
        let descriptions = stack.undo_history();
        assert_eq!(descriptions, vec!["edit 11", "edit 10", "edit 9", "edit 8", "Open"]);
    }

    #[test]
    fn memory_total_tracks_entries() {
        let (mut stack, img) = stack_with_pristine(3);
        for i in 0..6 {
            stack.push(&img, &[rect_obj(i as f32)], "edit").unwrap();
        }
        let sum: usize = stack.entries().map(|e| e.memory_size()).sum();
        assert_eq!(stack.memory_usage(), sum);
        stack.undo().unwrap();
        let sum: usize = stack.entries().map(|e| e.memory_size()).sum();
        assert_eq!(stack.memory_usage(), sum);
    }

    #[test]
    fn corrupt_entry_reports_decode_error() {
        let (mut stack, img) = stack_with_pristine(30);
        stack.push(&img, &[], "edit").unwrap();
        stack.entries[0].png.truncate(10);
        assert!(matches!(stack.undo(), Err(HistoryError::Decode(_))));
        assert_eq!(stack.len(), 2);
    }
}
