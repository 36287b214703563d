//! End-to-end editing sessions driven through the public `Project` API with
//! in-memory collaborators.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use egui::{Pos2, Rect, Vec2};
use image::{Rgba, RgbaImage};

use listing_editor::components::tools::Tool;
use listing_editor::io::{encode_image, ExportFormat, LoadError, SaveError, SourceFetcher, UploadService};
use listing_editor::ops::ai::{AiError, ImageEditService};
use listing_editor::ops::inpaint::diffuse_fill;
use listing_editor::project::{EditorError, EraseSource, PointerOutcome, Project};
use listing_editor::settings::EditorSettings;

const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

// ----------------------------------------------------------------------------
// Collaborators
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    fn with_png(url: &str, img: &RgbaImage) -> Self {
        let mut files = HashMap::new();
        files.insert(url.to_string(), encode_image(img, ExportFormat::Png, 100).unwrap());
        Self { files }
    }
}

impl SourceFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| LoadError::Fetch(format!("404 {}", url)))
    }
}

#[derive(Default)]
struct MemoryUploader {
    uploads: RefCell<Vec<(Vec<u8>, ExportFormat)>>,
    fail: bool,
}

impl UploadService for MemoryUploader {
    fn upload(&self, bytes: &[u8], format: ExportFormat) -> Result<String, SaveError> {
        if self.fail {
            return Err(SaveError::Upload("connection reset".into()));
        }
        let mut uploads = self.uploads.borrow_mut();
        uploads.push((bytes.to_vec(), format));
        Ok(format!("https://cdn.test/edit-{}.{}", uploads.len(), format.extension()))
    }
}

struct FakeEditService {
    reply: Result<String, AiError>,
    calls: Mutex<usize>,
}

impl FakeEditService {
    fn replying(reply: Result<String, AiError>) -> Arc<Self> {
        Arc::new(Self { reply, calls: Mutex::new(0) })
    }
}

impl ImageEditService for FakeEditService {
    fn edit(&self, _image_base64: &str, instruction: &str) -> Result<String, AiError> {
        assert!(instruction.contains("width=20, height=20"));
        *self.calls.lock().unwrap() += 1;
        self.reply.clone()
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn solid(w: u32, h: u32, color: Rgba<u8>) -> Project {
    Project::from_image(RgbaImage::from_pixel(w, h, color), EditorSettings::default()).unwrap()
}

fn drag(project: &mut Project, from: (f32, f32), to: (f32, f32)) -> PointerOutcome {
    project.pointer_down(Pos2::new(from.0, from.1));
    project.pointer_move(Pos2::new(to.0, to.1));
    project.pointer_up(Pos2::new(to.0, to.1))
}

fn square(x: f32, y: f32, side: f32) -> Rect {
    Rect::from_min_size(Pos2::new(x, y), Vec2::splat(side))
}

// ----------------------------------------------------------------------------
// Erase
// ----------------------------------------------------------------------------

#[test]
fn local_erase_of_uniform_image_is_seamless() {
    let mut project = solid(100, 100, BLUE);
    project.mark_region(square(40.0, 40.0, 20.0)).unwrap();
    assert_eq!(project.erase_now().unwrap(), Some(EraseSource::Local));

    let bitmap = project.bitmap().unwrap();
    assert!(bitmap.pixels().all(|p| *p == BLUE));
    assert!(project.canvas().unwrap().mask.is_clear(0));
    assert_eq!(project.history().len(), 2);
}

#[test]
fn remote_erase_result_replaces_bitmap() {
    let green = RgbaImage::from_pixel(100, 100, GREEN);
    let reply = STANDARD.encode(encode_image(&green, ExportFormat::Png, 100).unwrap());
    let service = FakeEditService::replying(Ok(reply));
    let mut project = solid(100, 100, BLUE).with_edit_service(service.clone());

    project.mark_region(square(10.0, 10.0, 20.0)).unwrap();
    assert_eq!(project.erase_now().unwrap(), Some(EraseSource::Remote));
    assert_eq!(*project.bitmap().unwrap().get_pixel(50, 50), GREEN);
    assert_eq!(*service.calls.lock().unwrap(), 1);
}

#[test]
fn remote_failure_falls_back_to_local_fill() {
    let service = FakeEditService::replying(Err(AiError::Status(429)));
    let mut project = solid(100, 100, BLUE).with_edit_service(service);
    project.mark_region(square(10.0, 10.0, 20.0)).unwrap();
    assert_eq!(project.erase_now().unwrap(), Some(EraseSource::Local));
    assert!(project.bitmap().unwrap().pixels().all(|p| *p == BLUE));
    assert!(project.canvas().unwrap().mask.is_clear(0));
}

#[test]
fn erase_with_nothing_marked_is_a_no_op() {
    let mut project = solid(30, 30, BLUE);
    assert_eq!(project.erase_now().unwrap(), None);
    assert_eq!(project.history().len(), 1);
    assert!(!project.erase_in_flight());
}

#[test]
fn erase_tool_runs_through_the_request_handoff() {
    let mut project = solid(100, 100, BLUE);
    project.set_tool(Tool::AiErase);
    assert_eq!(drag(&mut project, (20.0, 50.0), (80.0, 50.0)), PointerOutcome::EraseRequested);

    let request = project.take_erase_request().unwrap();
    assert!(request.mask.pixels().any(|p| p.0[0] > 100));
    let outcome = std::thread::spawn(move || request.run(None)).join().unwrap();
    project.finish_erase(outcome).unwrap();

    assert!(project.bitmap().unwrap().pixels().all(|p| *p == BLUE));
    assert_eq!(project.pointer_down(Pos2::new(5.0, 5.0)), PointerOutcome::Handled);
}

#[test]
fn inpainting_converges_towards_border_values() {
    let mut img = RgbaImage::from_fn(40, 40, |x, _| if x < 20 { Rgba([0, 0, 0, 255]) } else { Rgba([200, 200, 200, 255]) });
    let mut mask = image::GrayImage::new(40, 40);
    for y in 10..30 {
        for x in 15..25 {
            mask.put_pixel(x, y, image::Luma([255]));
        }
    }
    let stats = diffuse_fill(&mut img, &mask, 100, 200);
    assert_eq!(stats.masked, 200);
    assert_eq!(stats.remaining, 0);
    let left = img.get_pixel(15, 20).0[0];
    let right = img.get_pixel(24, 20).0[0];
    assert!(left < right);
    assert!(img.pixels().all(|p| p.0[3] == 255));
}

// ----------------------------------------------------------------------------
// Objects
// ----------------------------------------------------------------------------

#[test]
fn rectangle_drag_creates_selected_object() {
    let mut project = solid(200, 200, BLUE);
    project.set_tool(Tool::Rect);
    let PointerOutcome::ObjectCreated(id) = drag(&mut project, (10.0, 10.0), (50.0, 40.0)) else {
        panic!("rectangle not created");
    };
    let obj = project.object(id).unwrap();
    assert_eq!((obj.x, obj.y, obj.width, obj.height), (10.0, 10.0, 40.0, 30.0));
    assert_eq!(project.tool(), Tool::Select);
    assert_eq!(project.selected_id(), Some(id));
    assert_eq!(project.history().len(), 2);
}

#[test]
fn topmost_object_wins_the_hit_test() {
    let mut project = solid(200, 200, BLUE);
    project.set_tool(Tool::Rect);
    let PointerOutcome::ObjectCreated(below) = drag(&mut project, (10.0, 10.0), (60.0, 60.0)) else {
        panic!("first rectangle");
    };
    project.set_tool(Tool::Rect);
    let PointerOutcome::ObjectCreated(above) = drag(&mut project, (40.0, 40.0), (90.0, 90.0)) else {
        panic!("second rectangle");
    };
    project.clear_selection();

    project.pointer_down(Pos2::new(50.0, 50.0));
    project.pointer_up(Pos2::new(50.0, 50.0));
    assert_eq!(project.selected_id(), Some(above));

    project.pointer_down(Pos2::new(20.0, 20.0));
    project.pointer_up(Pos2::new(20.0, 20.0));
    assert_eq!(project.selected_id(), Some(below));
}

#[test]
fn resize_never_goes_below_minimum() {
    let mut project = solid(200, 200, BLUE);
    project.set_tool(Tool::Circle);
    let PointerOutcome::ObjectCreated(id) = drag(&mut project, (50.0, 50.0), (100.0, 100.0)) else {
        panic!("circle not created");
    };
    drag(&mut project, (100.0, 100.0), (20.0, 60.0));
    let obj = project.object(id).unwrap();
    assert_eq!((obj.width, obj.height), (10.0, 10.0));
}

#[test]
fn handles_scale_with_zoom() {
    let mut project = solid(400, 400, BLUE);
    project.set_tool(Tool::Rect);
    let PointerOutcome::ObjectCreated(id) = drag(&mut project, (100.0, 100.0), (200.0, 200.0)) else {
        panic!("rectangle not created");
    };
    project.viewport.set_zoom(4.0);
    // 8 screen px at zoom 4 is 2 bitmap px: (203,203) misses the handle and the body.
    project.pointer_down(project.viewport.to_screen_space(Pos2::new(203.0, 203.0)));
    project.pointer_up(project.viewport.to_screen_space(Pos2::new(203.0, 203.0)));
    assert_eq!(project.selected_id(), None);

    project.select(id);
    let start = project.viewport.to_screen_space(Pos2::new(201.0, 201.0));
    let end = project.viewport.to_screen_space(Pos2::new(250.0, 240.0));
    project.pointer_down(start);
    project.pointer_move(end);
    project.pointer_up(end);
    let obj = project.object(id).unwrap();
    assert_eq!((obj.width, obj.height), (150.0, 140.0));
}

#[test]
fn wheel_zoom_keeps_point_under_cursor() {
    let mut project = solid(100, 100, BLUE);
    let anchor = Pos2::new(37.0, 81.0);
    let before = project.viewport.to_bitmap_space(anchor);
    project.wheel(1.0, anchor);
    project.wheel(1.0, anchor);
    let after = project.viewport.to_bitmap_space(anchor);
    assert!((before - after).length() < 1e-3);
    assert!((project.viewport.zoom - 1.44).abs() < 1e-5);
}

// ----------------------------------------------------------------------------
// Canvas and history
// ----------------------------------------------------------------------------

#[test]
fn standardize_clears_objects_and_records_entry() {
    let mut project = solid(200, 100, Rgba([255, 0, 0, 255]));
    for i in 0..3 {
        let x = 10.0 + i as f32 * 50.0;
        project.set_tool(Tool::Rect);
        drag(&mut project, (x, 10.0), (x + 30.0, 60.0));
    }
    assert_eq!(project.objects().len(), 3);
    let before = project.history().len();

    project.standardize_canvas().unwrap();
    assert!(project.objects().is_empty());
    assert!(project.selected_id().is_none());
    assert_eq!(project.bitmap().unwrap().dimensions(), (1000, 1000));
    assert_eq!(project.history().len(), before + 1);
    assert!(project.history().latest().unwrap().objects().unwrap().is_empty());
}

#[test]
fn undo_walks_back_to_the_original() {
    let original = RgbaImage::from_pixel(60, 60, BLUE);
    let mut project = Project::from_image(original.clone(), EditorSettings::default()).unwrap();

    project.set_tool(Tool::Brush);
    drag(&mut project, (5.0, 30.0), (55.0, 30.0));
    let after_brush = project.bitmap().unwrap().clone();
    assert_ne!(after_brush, original);

    project.set_tool(Tool::Rect);
    drag(&mut project, (10.0, 10.0), (40.0, 40.0));
    assert_eq!(project.objects().len(), 1);

    assert!(project.undo().unwrap());
    assert!(project.objects().is_empty());
    assert!(project.selected_id().is_none());
    assert_eq!(*project.bitmap().unwrap(), after_brush);

    assert!(project.undo().unwrap());
    assert_eq!(*project.bitmap().unwrap(), original);
    assert!(!project.undo().unwrap());
}

#[test]
fn history_is_bounded_by_settings() {
    let settings = EditorSettings { max_history: 5, ..EditorSettings::default() };
    let mut project = Project::from_image(RgbaImage::from_pixel(20, 20, BLUE), settings).unwrap();
    project.set_tool(Tool::Brush);
    for i in 0..12 {
        let y = i as f32;
        drag(&mut project, (0.0, y), (19.0, y));
    }
    assert_eq!(project.history().len(), 5);
    let mut undone = 0;
    while project.undo().unwrap() {
        undone += 1;
    }
    assert_eq!(undone, 4);
    assert_eq!(*project.bitmap().unwrap(), RgbaImage::from_pixel(20, 20, BLUE));
}

// ----------------------------------------------------------------------------
// Session lifecycle
// ----------------------------------------------------------------------------

#[test]
fn load_failure_leaves_session_unloaded() {
    let project = Project::open("https://img.test/missing.png", &MemoryFetcher::default(), EditorSettings::default());
    assert!(!project.is_loaded());
    assert!(project.load_error().unwrap().contains("404"));

    let mut project = project;
    assert_eq!(project.pointer_down(Pos2::new(1.0, 1.0)), PointerOutcome::Ignored);
    assert!(matches!(project.standardize_canvas(), Err(EditorError::NotLoaded)));
}

#[test]
fn load_resets_previous_session_state() {
    let url = "https://img.test/a.png";
    let fetcher = MemoryFetcher::with_png(url, &RgbaImage::from_pixel(32, 24, BLUE));
    let mut project = Project::open(url, &fetcher, EditorSettings::default());
    assert_eq!(project.bitmap().unwrap().dimensions(), (32, 24));

    project.set_tool(Tool::Rect);
    drag(&mut project, (1.0, 1.0), (20.0, 20.0));
    project.load(&fetcher, url).unwrap();
    assert!(project.objects().is_empty());
    assert_eq!(project.history().len(), 1);
    assert!(project.load(&fetcher, "https://img.test/b.png").is_err());
    assert!(!project.is_loaded());
}

#[test]
fn save_uploads_flattened_composition_once() {
    let urls = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&urls);
    let mut project = solid(60, 60, BLUE).with_save_callback(move |url| sink.borrow_mut().push(url));

    project.set_fill_color(GREEN.0).unwrap();
    project.set_tool(Tool::FillSelect);
    assert!(matches!(drag(&mut project, (10.0, 10.0), (30.0, 30.0)), PointerOutcome::ObjectCreated(_)));

    let uploader = MemoryUploader::default();
    let url = project.save(&uploader).unwrap();
    assert_eq!(*urls.borrow(), vec![url]);

    let uploads = uploader.uploads.borrow();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, ExportFormat::Png);
    let saved = image::load_from_memory(&uploads[0].0).unwrap().to_rgba8();
    assert_eq!(*saved.get_pixel(20, 20), GREEN);
    assert_eq!(*saved.get_pixel(50, 50), BLUE);
    // The live bitmap keeps objects separate.
    assert_eq!(*project.bitmap().unwrap().get_pixel(20, 20), BLUE);
}

#[test]
fn failed_save_keeps_everything_for_retry() {
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let mut project = solid(40, 40, BLUE).with_save_callback(move |_| *counter.borrow_mut() += 1);
    project.set_tool(Tool::Line);
    drag(&mut project, (5.0, 5.0), (35.0, 30.0));

    let failing = MemoryUploader { fail: true, ..MemoryUploader::default() };
    assert!(matches!(project.save(&failing), Err(EditorError::Save(_))));
    assert!(project.status().is_some());
    assert_eq!(*calls.borrow(), 0);
    assert_eq!(project.objects().len(), 1);
    assert_eq!(project.history().len(), 2);

    project.save(&MemoryUploader::default()).unwrap();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn close_notifies_host_without_saving() {
    let closed = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&closed);
    let saves = Rc::new(RefCell::new(0));
    let save_counter = Rc::clone(&saves);
    let project = solid(10, 10, BLUE)
        .with_save_callback(move |_| *save_counter.borrow_mut() += 1)
        .with_close_callback(move || *flag.borrow_mut() = true);
    project.close();
    assert!(*closed.borrow());
    assert_eq!(*saves.borrow(), 0);
}
