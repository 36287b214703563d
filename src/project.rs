use egui::{Pos2, Rect, Vec2};
use image::{GrayImage, RgbaImage};
use std::sync::Arc;
use uuid::Uuid;

use crate::canvas::{CanvasState, Viewport};
use crate::components::history::{HistoryError, HistoryStack};
use crate::components::tools::{
    Commit, MoveEffect, PointerHit, SelectionChange, StrokeTarget, Tool, ToolState, TransformKind,
};
use crate::io::{encode_image, load_source, LoadError, SaveError, SourceFetcher, UploadService};
use crate::ops::ai::{EraseOutcome, EraseRequest, ImageEditService};
use crate::ops::canvas_ops::{self, Placement};
use crate::ops::shapes::{hit_test, HandleMetrics, ObjectKind, ObjectStyle, VectorObject};
use crate::ops::text;
use crate::settings::EditorSettings;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum EditorError {
    /// No valid bitmap: the source never loaded (or failed to).
    NotLoaded,
    /// An erase is in flight; the command would race with its result.
    Busy,
    /// `finish_erase` without a matching `take_erase_request`.
    NoPendingErase,
    Load(LoadError),
    Save(SaveError),
    History(HistoryError),
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::NotLoaded => write!(f, "No image is loaded"),
            EditorError::Busy => write!(f, "An erase is still in progress"),
            EditorError::NoPendingErase => write!(f, "No erase is in progress"),
            EditorError::Load(e) => write!(f, "{}", e),
            EditorError::Save(e) => write!(f, "{}", e),
            EditorError::History(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EditorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditorError::Load(e) => Some(e),
            EditorError::Save(e) => Some(e),
            EditorError::History(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LoadError> for EditorError {
    fn from(e: LoadError) -> Self {
        EditorError::Load(e)
    }
}

impl From<SaveError> for EditorError {
    fn from(e: SaveError) -> Self {
        EditorError::Save(e)
    }
}

impl From<HistoryError> for EditorError {
    fn from(e: HistoryError) -> Self {
        EditorError::History(e)
    }
}

// ============================================================================
// POINTER OUTCOMES
// ============================================================================

/// What a pointer event did. Pointer handlers never fail; anything that
/// cannot be applied comes back as `Ignored`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerOutcome {
    Ignored,
    Handled,
    ObjectCreated(Uuid),
    /// The host should ask for a line of text and call `commit_text`.
    TextInputRequested(Pos2),
    /// An erase request is ready in `take_erase_request`.
    EraseRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EraseSource {
    Remote,
    Local,
}

type SaveCallback = Box<dyn FnMut(String)>;
type CloseCallback = Box<dyn FnOnce()>;

// ============================================================================
// PROJECT - one editing session
// ============================================================================

/// One editing session over a single source image: owns the bitmap, mask,
/// objects, selection, history and tool state.
pub struct Project {
    pub id: Uuid,
    pub source_url: Option<String>,
    pub viewport: Viewport,
    pub style: ObjectStyle,
    pub brush_width: f32,
    pub erase_width: f32,
    settings: EditorSettings,
    canvas: Option<CanvasState>,
    load_error: Option<String>,
    objects: Vec<VectorObject>,
    selected: Option<Uuid>,
    history: HistoryStack,
    tools: ToolState,
    pending_text: Option<Pos2>,
    pending_erase: Option<EraseRequest>,
    erase_in_flight: bool,
    edit_service: Option<Arc<dyn ImageEditService>>,
    is_dirty: bool,
    /// Last user-facing error (load / save), cleared by the next success.
    status: Option<String>,
    on_save: Option<SaveCallback>,
    on_close: Option<CloseCallback>,
}

impl Project {
    pub fn new(settings: EditorSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_url: None,
            viewport: Viewport::from_settings(&settings),
            style: ObjectStyle::from_settings(&settings),
            brush_width: settings.brush_width,
            erase_width: settings.erase_width,
            history: HistoryStack::new(settings.max_history),
            settings,
            canvas: None,
            load_error: None,
            objects: Vec::new(),
            selected: None,
            tools: ToolState::new(),
            pending_text: None,
            pending_erase: None,
            erase_in_flight: false,
            edit_service: None,
            is_dirty: false,
            status: None,
            on_save: None,
            on_close: None,
        }
    }

    /// Open a session on `url`. A failed fetch leaves the session in the
    /// "failed to load" state (see `load_error`) rather than returning nothing.
    pub fn open(url: &str, fetcher: &dyn SourceFetcher, settings: EditorSettings) -> Self {
        let mut project = Self::new(settings);
        let _ = project.load(fetcher, url);
        project
    }

    pub fn from_image(bitmap: RgbaImage, settings: EditorSettings) -> Result<Self, EditorError> {
        let mut project = Self::new(settings);
        project.install(bitmap)?;
        Ok(project)
    }

    /// Called with the public URL after every successful save.
    pub fn with_save_callback(mut self, callback: impl FnMut(String) + 'static) -> Self {
        self.on_save = Some(Box::new(callback));
        self
    }

    /// Called once when the session is closed.
    pub fn with_close_callback(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_close = Some(Box::new(callback));
        self
    }

    pub fn with_edit_service(mut self, service: Arc<dyn ImageEditService>) -> Self {
        self.edit_service = Some(service);
        self
    }

    pub fn load(&mut self, fetcher: &dyn SourceFetcher, url: &str) -> Result<(), EditorError> {
        self.source_url = Some(url.to_string());
        match load_source(fetcher, url) {
            Ok(bitmap) => {
                let (w, h) = bitmap.dimensions();
                self.install(bitmap)?;
                log_info!("Loaded {} ({}x{})", url, w, h);
                Ok(())
            }
            Err(e) => {
                log_err!("Failed to load {}: {}", url, e);
                self.canvas = None;
                self.objects.clear();
                self.selected = None;
                self.load_error = Some(e.to_string());
                self.status = Some(e.to_string());
                Err(EditorError::Load(e))
            }
        }
    }

    fn install(&mut self, bitmap: RgbaImage) -> Result<(), EditorError> {
        if bitmap.width() == 0 || bitmap.height() == 0 {
            self.canvas = None;
            self.load_error = Some(LoadError::EmptyImage.to_string());
            return Err(EditorError::Load(LoadError::EmptyImage));
        }
        self.history.reset(&bitmap)?;
        self.canvas = Some(CanvasState::new(bitmap));
        self.objects.clear();
        self.selected = None;
        self.tools = ToolState::new();
        self.viewport.reset();
        self.pending_text = None;
        self.pending_erase = None;
        self.erase_in_flight = false;
        self.load_error = None;
        self.status = None;
        self.is_dirty = false;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn is_loaded(&self) -> bool {
        self.canvas.is_some()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn canvas(&self) -> Option<&CanvasState> {
        self.canvas.as_ref()
    }

    pub fn bitmap(&self) -> Option<&RgbaImage> {
        self.canvas.as_ref().map(|c| &c.bitmap)
    }

    pub fn objects(&self) -> &[VectorObject] {
        &self.objects
    }

    pub fn object(&self, id: Uuid) -> Option<&VectorObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// The selected object, if it still exists.
    pub fn selected_object(&self) -> Option<&VectorObject> {
        self.selected.and_then(|id| self.object(id))
    }

    pub fn selected_id(&self) -> Option<Uuid> {
        self.selected_object().map(|o| o.id)
    }

    pub fn tool(&self) -> Tool {
        self.tools.tool()
    }

    pub fn tool_state(&self) -> &ToolState {
        &self.tools
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn erase_in_flight(&self) -> bool {
        self.erase_in_flight
    }

    pub fn handle_metrics(&self) -> HandleMetrics {
        HandleMetrics::at_zoom(&self.settings, self.viewport.zoom)
    }

    // ------------------------------------------------------------------------
    // Tools & selection
    // ------------------------------------------------------------------------

    pub fn set_tool(&mut self, tool: Tool) {
        self.tools.set_tool(tool);
        self.cancel_text();
    }

    pub fn select(&mut self, id: Uuid) -> bool {
        if self.object(id).is_some() {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    fn resolve_hit(&self, point: Pos2) -> PointerHit {
        if self.tools.tool() != Tool::Select {
            return PointerHit::Nothing;
        }
        if let Some(selected) = self.selected_object()
            && let Some(handle) = selected.handle_at(point, &self.handle_metrics())
        {
            return PointerHit::Handle(selected.id, handle);
        }
        match hit_test(&self.objects, point) {
            Some(obj) => PointerHit::Body {
                id: obj.id,
                grab_offset: point - Pos2::new(obj.x, obj.y),
            },
            None => PointerHit::Nothing,
        }
    }

    // ------------------------------------------------------------------------
    // Pointer input (screen space in, bitmap space inside)
    // ------------------------------------------------------------------------

    pub fn pointer_down(&mut self, screen: Pos2) -> PointerOutcome {
        if self.canvas.is_none() || self.erase_in_flight {
            return PointerOutcome::Ignored;
        }
        let point = self.viewport.to_bitmap_space(screen);
        self.cancel_text();
        let hit = self.resolve_hit(point);
        let has_selection = self.selected_object().is_some();
        match self.tools.pointer_down(hit, has_selection, screen, point) {
            SelectionChange::Keep => {}
            SelectionChange::Select(id) => self.selected = Some(id),
            SelectionChange::Clear => self.selected = None,
        }

        // A click without movement still leaves a dot
        if let Some(&[first]) = self.tools.freehand_points() {
            let target = match self.tools.tool() {
                Tool::AiErase => StrokeTarget::Mask,
                _ => StrokeTarget::Bitmap,
            };
            self.paint_segment(target, first, first);
        }
        PointerOutcome::Handled
    }

    pub fn pointer_move(&mut self, screen: Pos2) -> PointerOutcome {
        if self.canvas.is_none() {
            return PointerOutcome::Ignored;
        }
        let point = self.viewport.to_bitmap_space(screen);
        match self.tools.pointer_move(screen, point) {
            MoveEffect::None => PointerOutcome::Ignored,
            MoveEffect::Pan(delta) => {
                self.viewport.pan_by(delta);
                PointerOutcome::Handled
            }
            MoveEffect::StrokeSegment { target, from, to } => {
                self.paint_segment(target, from, to);
                PointerOutcome::Handled
            }
            MoveEffect::Transform { id, kind, pointer } => {
                let min_size = self.settings.min_object_size;
                let Some(obj) = self.objects.iter_mut().find(|o| o.id == id) else {
                    return PointerOutcome::Ignored;
                };
                match kind {
                    TransformKind::Drag { grab_offset } => obj.drag_to(pointer, grab_offset),
                    TransformKind::Resize => obj.resize_to(pointer, min_size),
                    TransformKind::Rotate => obj.rotate_to(pointer),
                }
                PointerOutcome::Handled
            }
        }
    }

    pub fn pointer_up(&mut self, screen: Pos2) -> PointerOutcome {
        let point = self.viewport.to_bitmap_space(screen);
        // Always reset the interaction, even when nothing can be committed
        let commit = self.tools.pointer_up(point);
        if self.canvas.is_none() {
            return PointerOutcome::Ignored;
        }
        match commit {
            Commit::None => PointerOutcome::Handled,
            Commit::CreateShape { kind, from, to } => {
                match VectorObject::from_drag(kind, from, to, &self.style) {
                    Some(obj) => {
                        let id = self.add_object(obj, &format!("Add {}", kind.label()));
                        self.tools.set_tool(Tool::Select);
                        PointerOutcome::ObjectCreated(id)
                    }
                    None => PointerOutcome::Handled,
                }
            }
            Commit::FillRect { from, to } => match VectorObject::filled_rect(from, to, &self.style) {
                Some(obj) => PointerOutcome::ObjectCreated(self.add_object(obj, "Fill selection")),
                None => PointerOutcome::Handled,
            },
            Commit::Crop(rect) => {
                if let Err(e) = self.crop(rect) {
                    log_warn!("Crop not applied: {}", e);
                }
                PointerOutcome::Handled
            }
            Commit::RequestText { at } => {
                self.pending_text = Some(at);
                PointerOutcome::TextInputRequested(at)
            }
            Commit::BrushStroke { .. } => {
                self.record_or_log("Brush stroke");
                PointerOutcome::Handled
            }
            Commit::Erase { .. } => match self.prepare_erase() {
                Ok(true) => PointerOutcome::EraseRequested,
                Ok(false) => PointerOutcome::Handled,
                Err(e) => {
                    log_warn!("Erase not started: {}", e);
                    PointerOutcome::Ignored
                }
            },
            Commit::TransformDone { moved, .. } => {
                if moved {
                    self.record_or_log("Transform object");
                }
                PointerOutcome::Handled
            }
        }
    }

    /// Finish a text placement requested by `TextInputRequested`. Empty text
    /// (or no pending placement) creates nothing.
    pub fn commit_text(&mut self, text: &str) -> Option<Uuid> {
        let at = self.pending_text.take()?;
        let obj = VectorObject::text(at, text, &self.style)?;
        Some(self.add_object(obj, "Add text"))
    }

    pub fn cancel_text(&mut self) {
        self.pending_text = None;
    }

    fn paint_segment(&mut self, target: StrokeTarget, from: Pos2, to: Pos2) {
        let (color, brush_width, erase_width) = (self.style.stroke_color, self.brush_width, self.erase_width);
        let Some(canvas) = self.canvas.as_mut() else { return };
        match target {
            StrokeTarget::Bitmap => canvas.paint_segment(from, to, brush_width, color),
            StrokeTarget::Mask => canvas.mask.paint_segment(from, to, erase_width),
        }
    }

    fn add_object(&mut self, obj: VectorObject, description: &str) -> Uuid {
        let id = obj.id;
        self.objects.push(obj);
        self.selected = Some(id);
        self.record_or_log(description);
        id
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    fn record(&mut self, description: &str) -> Result<(), HistoryError> {
        let Some(canvas) = self.canvas.as_ref() else { return Ok(()) };
        self.history.push(&canvas.bitmap, &self.objects, description)?;
        self.is_dirty = true;
        Ok(())
    }

    /// Pointer paths cannot return errors; a failed snapshot is logged.
    fn record_or_log(&mut self, description: &str) {
        if let Err(e) = self.record(description) {
            log_err!("History snapshot \"{}\" failed: {}", description, e);
            self.status = Some(e.to_string());
        }
    }

    fn ensure_ready(&self) -> Result<(), EditorError> {
        if self.canvas.is_none() {
            return Err(EditorError::NotLoaded);
        }
        if self.erase_in_flight {
            return Err(EditorError::Busy);
        }
        Ok(())
    }

    /// Restore the previous history entry. `Ok(false)` at the pristine entry.
    pub fn undo(&mut self) -> Result<bool, EditorError> {
        self.ensure_ready()?;
        let Some(restored) = self.history.undo()? else { return Ok(false) };
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.replace_bitmap(restored.bitmap);
        }
        self.objects = restored.objects;
        if self.selected_object().is_none() {
            self.selected = None;
        }
        self.tools.set_tool(self.tools.tool());
        self.is_dirty = true;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Object commands
    // ------------------------------------------------------------------------

    pub fn delete_object(&mut self, id: Uuid) -> Result<bool, EditorError> {
        self.ensure_ready()?;
        let before = self.objects.len();
        self.objects.retain(|o| o.id != id);
        if self.objects.len() == before {
            return Ok(false);
        }
        if self.selected == Some(id) {
            self.selected = None;
        }
        self.record("Delete object")?;
        Ok(true)
    }

    pub fn delete_selected(&mut self) -> Result<bool, EditorError> {
        match self.selected_id() {
            Some(id) => self.delete_object(id),
            None => Ok(false),
        }
    }

    fn edit_style(
        &mut self,
        description: &str,
        apply_style: impl Fn(&mut ObjectStyle),
        apply_object: impl Fn(&mut VectorObject),
    ) -> Result<(), EditorError> {
        apply_style(&mut self.style);
        let Some(id) = self.selected else { return Ok(()) };
        let Some(obj) = self.objects.iter_mut().find(|o| o.id == id) else { return Ok(()) };
        apply_object(obj);
        self.record(description)?;
        Ok(())
    }

    pub fn set_stroke_color(&mut self, color: [u8; 4]) -> Result<(), EditorError> {
        self.edit_style("Stroke color", |s| s.stroke_color = color, |o| o.stroke_color = color)
    }

    pub fn set_fill_color(&mut self, color: [u8; 4]) -> Result<(), EditorError> {
        self.edit_style("Fill color", |s| s.fill_color = color, |o| o.fill_color = color)
    }

    pub fn set_stroke_width(&mut self, width: f32) -> Result<(), EditorError> {
        let width = width.max(0.0);
        self.edit_style("Stroke width", |s| s.stroke_width = width, |o| o.stroke_width = width)
    }

    pub fn set_opacity(&mut self, opacity: f32) -> Result<(), EditorError> {
        let opacity = opacity.clamp(0.0, 1.0);
        self.edit_style("Opacity", |s| s.opacity = opacity, |o| o.opacity = opacity)
    }

    pub fn set_font_size(&mut self, size: f32) -> Result<(), EditorError> {
        let size = size.max(1.0);
        self.edit_style("Font size", |s| s.font_size = size, |o| o.set_font_size(size))
    }

    // ------------------------------------------------------------------------
    // Canvas commands
    // ------------------------------------------------------------------------

    /// Fit the bitmap into the standard square canvas. Clears every object
    /// and the selection and records a fresh history entry.
    pub fn standardize_canvas(&mut self) -> Result<Placement, EditorError> {
        self.ensure_ready()?;
        let (size, background) = (self.settings.standard_canvas_size, self.settings.standard_background);
        let canvas = self.canvas.as_mut().ok_or(EditorError::NotLoaded)?;
        let placement = canvas_ops::standardize(canvas, size, background);
        self.objects.clear();
        self.selected = None;
        self.record("Standardize canvas")?;
        Ok(placement)
    }

    /// Crop to `rect` (bitmap space). `Ok(false)` when the clamped rectangle
    /// is too small to be a real crop.
    pub fn crop(&mut self, rect: Rect) -> Result<bool, EditorError> {
        self.ensure_ready()?;
        let canvas = self.canvas.as_mut().ok_or(EditorError::NotLoaded)?;
        let Some(origin) = canvas_ops::crop(canvas, rect) else { return Ok(false) };
        for obj in &mut self.objects {
            obj.translate(-origin);
        }
        self.record("Crop")?;
        Ok(true)
    }

    pub fn mark_region(&mut self, rect: Rect) -> Result<(), EditorError> {
        self.ensure_ready()?;
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.mask.mark_rect(rect);
        }
        Ok(())
    }

    /// Mark every pixel of `mask` above the threshold. A mask of another
    /// size is stretched to the bitmap first.
    pub fn mark_mask_image(&mut self, mask: &GrayImage) -> Result<(), EditorError> {
        self.ensure_ready()?;
        let threshold = self.settings.mask_threshold;
        let Some(canvas) = self.canvas.as_mut() else { return Err(EditorError::NotLoaded) };
        let (w, h) = canvas.mask.dimensions();
        let scaled;
        let mask = if mask.dimensions() != (w, h) {
            scaled = image::imageops::resize(mask, w, h, image::imageops::FilterType::Nearest);
            &scaled
        } else {
            mask
        };
        for (x, y, p) in mask.enumerate_pixels() {
            if p.0[0] > threshold {
                canvas.mask.mark(x, y);
            }
        }
        Ok(())
    }

    pub fn clear_mask(&mut self) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.mask.clear();
        }
    }

    // ------------------------------------------------------------------------
    // Erase (two phases: request → outcome)
    // ------------------------------------------------------------------------

    /// Snapshot the bitmap and mask into a pending request. `Ok(false)` and a
    /// cleared mask when nothing is marked.
    fn prepare_erase(&mut self) -> Result<bool, EditorError> {
        self.ensure_ready()?;
        let threshold = self.settings.mask_threshold;
        let Some(canvas) = self.canvas.as_mut() else { return Err(EditorError::NotLoaded) };
        if canvas.mask.is_clear(threshold) {
            canvas.mask.clear();
            return Ok(false);
        }
        self.pending_erase = Some(EraseRequest::new(&canvas.bitmap, &canvas.mask, &self.settings));
        self.erase_in_flight = true;
        Ok(true)
    }

    /// Hand out the pending request (it may run on any thread). The session
    /// stays busy until `finish_erase` or `abort_erase`.
    pub fn take_erase_request(&mut self) -> Option<EraseRequest> {
        self.pending_erase.take()
    }

    /// Give up on the erase in flight (worker lost, request dropped). The
    /// bitmap and history are left as they were; the marks are cleared.
    /// Returns whether an erase was actually in flight.
    pub fn abort_erase(&mut self) -> bool {
        if !self.erase_in_flight {
            return false;
        }
        self.erase_in_flight = false;
        self.pending_erase = None;
        self.clear_mask();
        log_warn!("Erase aborted; bitmap left unchanged");
        true
    }

    /// Commit the result of an erase: replace the bitmap, clear the mask and
    /// record a history entry.
    pub fn finish_erase(&mut self, outcome: EraseOutcome) -> Result<EraseSource, EditorError> {
        if !self.erase_in_flight {
            return Err(EditorError::NoPendingErase);
        }
        self.erase_in_flight = false;
        self.pending_erase = None;
        let source = if outcome.is_remote() { EraseSource::Remote } else { EraseSource::Local };
        let Some(canvas) = self.canvas.as_mut() else { return Err(EditorError::NotLoaded) };
        canvas.mask.clear();
        let image = outcome.into_image();
        if image.dimensions() == canvas.bitmap.dimensions() {
            canvas.bitmap = image;
        } else {
            log_err!(
                "Erase result {:?} does not match bitmap {:?}; discarded",
                image.dimensions(),
                canvas.bitmap.dimensions()
            );
        }
        self.record("Erase")?;
        Ok(source)
    }

    /// Run an erase to completion on the calling thread: the pending request
    /// if one exists, else one built from the current mask. `Ok(None)` when
    /// nothing is marked.
    pub fn erase_now(&mut self) -> Result<Option<EraseSource>, EditorError> {
        let request = match self.pending_erase.take() {
            Some(request) => request,
            None => {
                if !self.prepare_erase()? {
                    return Ok(None);
                }
                match self.pending_erase.take() {
                    Some(request) => request,
                    None => return Ok(None),
                }
            }
        };
        let outcome = request.run(self.edit_service.as_deref());
        self.finish_erase(outcome).map(Some)
    }

    // ------------------------------------------------------------------------
    // Rendering helpers
    // ------------------------------------------------------------------------

    /// Striped "erase in progress" overlay for the current mask.
    pub fn mask_overlay(&self, phase: f32) -> Option<RgbaImage> {
        let canvas = self.canvas.as_ref()?;
        Some(canvas.mask.overlay_preview(self.settings.mask_threshold, phase, [255, 64, 64, 160]))
    }

    /// Bitmap with every object painted on top.
    pub fn flatten(&self) -> Result<RgbaImage, EditorError> {
        let canvas = self.canvas.as_ref().ok_or(EditorError::NotLoaded)?;
        let font = if self.objects.iter().any(|o| o.kind == ObjectKind::Text) {
            text::default_font()
        } else {
            None
        };
        Ok(canvas_ops::flatten(&canvas.bitmap, &self.objects, font.as_ref()))
    }

    pub fn zoom_in(&mut self) {
        self.viewport.zoom_in();
    }

    pub fn zoom_out(&mut self) {
        self.viewport.zoom_out();
    }

    pub fn wheel(&mut self, scroll_y: f32, anchor: Pos2) {
        self.viewport.wheel(scroll_y, anchor);
    }

    pub fn fit_to_view(&mut self, view: Rect) {
        if let Some(canvas) = self.canvas.as_ref() {
            let size: Vec2 = canvas.size();
            self.viewport.fit(size, view);
        }
    }

    // ------------------------------------------------------------------------
    // Save / close
    // ------------------------------------------------------------------------

    /// Flatten, encode and upload. On success the save callback receives the
    /// URL; on failure the error is kept in `status` and nothing is lost.
    pub fn save(&mut self, uploader: &dyn UploadService) -> Result<String, EditorError> {
        self.ensure_ready()?;
        let (format, quality) = (self.settings.export_format, self.settings.export_quality);
        let result = self
            .flatten()
            .and_then(|flat| encode_image(&flat, format, quality).map_err(EditorError::from))
            .and_then(|bytes| uploader.upload(&bytes, format).map_err(EditorError::from));
        match result {
            Ok(url) => {
                log_info!("Saved to {}", url);
                self.status = None;
                self.is_dirty = false;
                if let Some(callback) = self.on_save.as_mut() {
                    callback(url.clone());
                }
                Ok(url)
            }
            Err(e) => {
                log_err!("Save failed: {}", e);
                self.status = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// End the session without saving. The source image is never touched.
    pub fn close(mut self) {
        log_info!("Closing editor session {}", self.id);
        if let Some(callback) = self.on_close.take() {
            callback();
        }
    }
}
