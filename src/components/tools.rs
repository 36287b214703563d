use egui::{Pos2, Rect, Vec2};
use uuid::Uuid;

use crate::ops::shapes::{ObjectKind, ShapeHandle};

// ============================================================================
// TOOL STATE MACHINE
// ============================================================================
//
// `ToolState` is a reducer: pointer events go in, a description of what
// should happen comes out. It never touches the bitmap, the mask or the
// object list; the editor controller applies the returned effects.

/// The active tool. Exactly one at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Tool {
    #[default]
    Select,
    FillSelect,
    Brush,
    AiErase,
    Crop,
    Rect,
    Circle,
    Line,
    Text,
    Pan,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        &[
            Tool::Select,
            Tool::FillSelect,
            Tool::Brush,
            Tool::AiErase,
            Tool::Crop,
            Tool::Rect,
            Tool::Circle,
            Tool::Line,
            Tool::Text,
            Tool::Pan,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tool::Select => "select",
            Tool::FillSelect => "fill-select",
            Tool::Brush => "brush",
            Tool::AiErase => "ai-erase",
            Tool::Crop => "crop",
            Tool::Rect => "rect",
            Tool::Circle => "circle",
            Tool::Line => "line",
            Tool::Text => "text",
            Tool::Pan => "pan",
        }
    }

    pub fn from_label(label: &str) -> Option<Tool> {
        Tool::all().iter().copied().find(|t| t.label() == label)
    }

    /// Object kind created by the shape tools.
    pub fn shape_kind(&self) -> Option<ObjectKind> {
        match self {
            Tool::Rect => Some(ObjectKind::Rectangle),
            Tool::Circle => Some(ObjectKind::Ellipse),
            Tool::Line => Some(ObjectKind::Line),
            _ => None,
        }
    }
}

/// Surface a freehand stroke is painted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeTarget {
    Bitmap,
    Mask,
}

/// Transient pointer interaction. At most one is active; pointer-up always
/// returns to `Idle`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Interaction {
    #[default]
    Idle,
    Panning { last_screen: Pos2 },
    RubberBand { origin: Pos2, current: Pos2 },
    Freehand { target: StrokeTarget, points: Vec<Pos2> },
    PlacingText { at: Pos2 },
    Dragging { id: Uuid, grab_offset: Vec2, moved: bool },
    Resizing { id: Uuid, moved: bool },
    Rotating { id: Uuid, moved: bool },
}

/// What lies under the pointer, as resolved by the controller
/// (handles of the selected object first, then object bodies).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerHit {
    Handle(Uuid, ShapeHandle),
    Body { id: Uuid, grab_offset: Vec2 },
    Nothing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionChange {
    Keep,
    Select(Uuid),
    Clear,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransformKind {
    Drag { grab_offset: Vec2 },
    Resize,
    Rotate,
}

/// Effect of a pointer move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MoveEffect {
    None,
    /// Screen-space viewport pan.
    Pan(Vec2),
    /// Paint one freehand segment (bitmap space).
    StrokeSegment { target: StrokeTarget, from: Pos2, to: Pos2 },
    Transform { id: Uuid, kind: TransformKind, pointer: Pos2 },
}

/// Effect of a pointer release.
#[derive(Clone, Debug, PartialEq)]
pub enum Commit {
    None,
    CreateShape { kind: ObjectKind, from: Pos2, to: Pos2 },
    FillRect { from: Pos2, to: Pos2 },
    Crop(Rect),
    RequestText { at: Pos2 },
    BrushStroke { points: Vec<Pos2> },
    Erase { points: Vec<Pos2> },
    TransformDone { id: Uuid, moved: bool },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolState {
    tool: Tool,
    interaction: Interaction,
}

impl ToolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn is_idle(&self) -> bool {
        self.interaction == Interaction::Idle
    }

    /// Switching tools abandons any interaction in progress.
    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
        self.interaction = Interaction::Idle;
    }

    /// Current rubber-band rectangle, for preview drawing.
    pub fn rubber_band(&self) -> Option<Rect> {
        match self.interaction {
            Interaction::RubberBand { origin, current } => Some(Rect::from_two_pos(origin, current)),
            _ => None,
        }
    }

    pub fn freehand_points(&self) -> Option<&[Pos2]> {
        match &self.interaction {
            Interaction::Freehand { points, .. } => Some(points),
            _ => None,
        }
    }

    /// Begin an interaction. `screen` is the raw pointer position, `point`
    /// the same position in bitmap space.
    pub fn pointer_down(&mut self, hit: PointerHit, has_selection: bool, screen: Pos2, point: Pos2) -> SelectionChange {
        let (interaction, selection) = match self.tool {
            Tool::Pan => (Interaction::Panning { last_screen: screen }, SelectionChange::Keep),
            Tool::Select => match hit {
                PointerHit::Handle(id, ShapeHandle::Resize) => {
                    (Interaction::Resizing { id, moved: false }, SelectionChange::Keep)
                }
                PointerHit::Handle(id, ShapeHandle::Rotate) => {
                    (Interaction::Rotating { id, moved: false }, SelectionChange::Keep)
                }
                PointerHit::Body { id, grab_offset } => (
                    Interaction::Dragging { id, grab_offset, moved: false },
                    SelectionChange::Select(id),
                ),
                PointerHit::Nothing if has_selection => (Interaction::Idle, SelectionChange::Clear),
                PointerHit::Nothing => (Interaction::Panning { last_screen: screen }, SelectionChange::Keep),
            },
            Tool::Rect | Tool::Circle | Tool::Line | Tool::FillSelect | Tool::Crop => (
                Interaction::RubberBand { origin: point, current: point },
                SelectionChange::Keep,
            ),
            Tool::Brush => (
                Interaction::Freehand { target: StrokeTarget::Bitmap, points: vec![point] },
                SelectionChange::Keep,
            ),
            Tool::AiErase => (
                Interaction::Freehand { target: StrokeTarget::Mask, points: vec![point] },
                SelectionChange::Keep,
            ),
            Tool::Text => (Interaction::PlacingText { at: point }, SelectionChange::Keep),
        };
        self.interaction = interaction;
        selection
    }

    pub fn pointer_move(&mut self, screen: Pos2, point: Pos2) -> MoveEffect {
        match &mut self.interaction {
            Interaction::Idle | Interaction::PlacingText { .. } => MoveEffect::None,
            Interaction::Panning { last_screen } => {
                let delta = screen - *last_screen;
                *last_screen = screen;
                MoveEffect::Pan(delta)
            }
            Interaction::RubberBand { current, .. } => {
                *current = point;
                MoveEffect::None
            }
            Interaction::Freehand { target, points } => {
                let from = points.last().copied().unwrap_or(point);
                points.push(point);
                MoveEffect::StrokeSegment { target: *target, from, to: point }
            }
            Interaction::Dragging { id, grab_offset, moved } => {
                *moved = true;
                MoveEffect::Transform { id: *id, kind: TransformKind::Drag { grab_offset: *grab_offset }, pointer: point }
            }
            Interaction::Resizing { id, moved } => {
                *moved = true;
                MoveEffect::Transform { id: *id, kind: TransformKind::Resize, pointer: point }
            }
            Interaction::Rotating { id, moved } => {
                *moved = true;
                MoveEffect::Transform { id: *id, kind: TransformKind::Rotate, pointer: point }
            }
        }
    }

    /// Finish the interaction. Always leaves the machine idle, whatever the commit.
    pub fn pointer_up(&mut self, point: Pos2) -> Commit {
        let finished = std::mem::take(&mut self.interaction);
        match finished {
            Interaction::Idle | Interaction::Panning { .. } => Commit::None,
            Interaction::RubberBand { origin, .. } => match self.tool {
                Tool::FillSelect => Commit::FillRect { from: origin, to: point },
                Tool::Crop => Commit::Crop(Rect::from_two_pos(origin, point)),
                tool => match tool.shape_kind() {
                    Some(kind) => Commit::CreateShape { kind, from: origin, to: point },
                    None => Commit::None,
                },
            },
            Interaction::Freehand { target, points } => match target {
                StrokeTarget::Bitmap => Commit::BrushStroke { points },
                StrokeTarget::Mask => Commit::Erase { points },
            },
            Interaction::PlacingText { at } => Commit::RequestText { at },
            Interaction::Dragging { id, moved, .. }
            | Interaction::Resizing { id, moved }
            | Interaction::Rotating { id, moved } => Commit::TransformDone { id, moved },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> Pos2 {
        Pos2::new(x, y)
    }

    #[test]
    fn select_on_empty_space_pans_when_nothing_selected() {
        let mut state = ToolState::new();
        let change = state.pointer_down(PointerHit::Nothing, false, p(100.0, 100.0), p(10.0, 10.0));
        assert_eq!(change, SelectionChange::Keep);
        assert_eq!(state.pointer_move(p(110.0, 95.0), p(11.0, 9.5)), MoveEffect::Pan(Vec2::new(10.0, -5.0)));
        assert_eq!(state.pointer_move(p(111.0, 95.0), p(11.1, 9.5)), MoveEffect::Pan(Vec2::new(1.0, 0.0)));
        assert_eq!(state.pointer_up(p(11.1, 9.5)), Commit::None);
        assert!(state.is_idle());
    }

    #[test]
    fn select_on_empty_space_clears_existing_selection() {
        let mut state = ToolState::new();
        let change = state.pointer_down(PointerHit::Nothing, true, p(0.0, 0.0), p(0.0, 0.0));
        assert_eq!(change, SelectionChange::Clear);
        assert!(state.is_idle());
    }

    #[test]
    fn body_hit_selects_and_drags() {
        let mut state = ToolState::new();
        let id = Uuid::new_v4();
        let grab = Vec2::new(3.0, 4.0);
        let change = state.pointer_down(PointerHit::Body { id, grab_offset: grab }, false, p(0.0, 0.0), p(5.0, 5.0));
        assert_eq!(change, SelectionChange::Select(id));
        let effect = state.pointer_move(p(0.0, 0.0), p(20.0, 20.0));
        assert_eq!(
            effect,
            MoveEffect::Transform { id, kind: TransformKind::Drag { grab_offset: grab }, pointer: p(20.0, 20.0) }
        );
        assert_eq!(state.pointer_up(p(20.0, 20.0)), Commit::TransformDone { id, moved: true });
    }

    #[test]
    fn click_without_move_is_not_a_mutation() {
        let mut state = ToolState::new();
        let id = Uuid::new_v4();
        state.pointer_down(PointerHit::Handle(id, ShapeHandle::Rotate), true, p(0.0, 0.0), p(0.0, 0.0));
        assert!(matches!(state.interaction(), Interaction::Rotating { .. }));
        assert_eq!(state.pointer_up(p(0.0, 0.0)), Commit::TransformDone { id, moved: false });
    }

    #[test]
    fn resize_handle_starts_resizing() {
        let mut state = ToolState::new();
        let id = Uuid::new_v4();
        let change = state.pointer_down(PointerHit::Handle(id, ShapeHandle::Resize), true, p(0.0, 0.0), p(1.0, 1.0));
        assert_eq!(change, SelectionChange::Keep);
        assert_eq!(
            state.pointer_move(p(0.0, 0.0), p(9.0, 9.0)),
            MoveEffect::Transform { id, kind: TransformKind::Resize, pointer: p(9.0, 9.0) }
        );
    }

    #[test]
    fn shape_tools_commit_their_rubber_band() {
        for (tool, kind) in [
            (Tool::Rect, ObjectKind::Rectangle),
            (Tool::Circle, ObjectKind::Ellipse),
            (Tool::Line, ObjectKind::Line),
        ] {
            let mut state = ToolState::new();
            state.set_tool(tool);
            state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(10.0, 10.0));
            state.pointer_move(p(0.0, 0.0), p(30.0, 30.0));
            assert_eq!(state.rubber_band(), Some(Rect::from_min_max(p(10.0, 10.0), p(30.0, 30.0))));
            assert_eq!(
                state.pointer_up(p(50.0, 40.0)),
                Commit::CreateShape { kind, from: p(10.0, 10.0), to: p(50.0, 40.0) }
            );
            assert!(state.is_idle());
        }
    }

    #[test]
    fn fill_select_and_crop_commit_rectangles() {
        let mut state = ToolState::new();
        state.set_tool(Tool::FillSelect);
        state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(1.0, 2.0));
        assert_eq!(state.pointer_up(p(5.0, 6.0)), Commit::FillRect { from: p(1.0, 2.0), to: p(5.0, 6.0) });

        state.set_tool(Tool::Crop);
        state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(9.0, 9.0));
        assert_eq!(state.pointer_up(p(1.0, 2.0)), Commit::Crop(Rect::from_min_max(p(1.0, 2.0), p(9.0, 9.0))));
    }

    #[test]
    fn freehand_strokes_emit_connected_segments() {
        let mut state = ToolState::new();
        state.set_tool(Tool::AiErase);
        state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(1.0, 1.0));
        assert_eq!(
            state.pointer_move(p(0.0, 0.0), p(4.0, 1.0)),
            MoveEffect::StrokeSegment { target: StrokeTarget::Mask, from: p(1.0, 1.0), to: p(4.0, 1.0) }
        );
        assert_eq!(
            state.pointer_move(p(0.0, 0.0), p(4.0, 6.0)),
            MoveEffect::StrokeSegment { target: StrokeTarget::Mask, from: p(4.0, 1.0), to: p(4.0, 6.0) }
        );
        assert_eq!(
            state.pointer_up(p(4.0, 6.0)),
            Commit::Erase { points: vec![p(1.0, 1.0), p(4.0, 1.0), p(4.0, 6.0)] }
        );

        state.set_tool(Tool::Brush);
        state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(2.0, 2.0));
        assert_eq!(state.pointer_up(p(2.0, 2.0)), Commit::BrushStroke { points: vec![p(2.0, 2.0)] });
    }

    #[test]
    fn text_tool_requests_text_on_release() {
        let mut state = ToolState::new();
        state.set_tool(Tool::Text);
        state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(7.0, 8.0));
        assert_eq!(state.pointer_move(p(1.0, 1.0), p(9.0, 9.0)), MoveEffect::None);
        assert_eq!(state.pointer_up(p(9.0, 9.0)), Commit::RequestText { at: p(7.0, 8.0) });
    }

    #[test]
    fn pan_tool_ignores_hits() {
        let mut state = ToolState::new();
        state.set_tool(Tool::Pan);
        let id = Uuid::new_v4();
        let change = state.pointer_down(PointerHit::Body { id, grab_offset: Vec2::ZERO }, false, p(0.0, 0.0), p(0.0, 0.0));
        assert_eq!(change, SelectionChange::Keep);
        assert!(matches!(state.interaction(), Interaction::Panning { .. }));
    }

    #[test]
    fn switching_tool_cancels_interaction() {
        let mut state = ToolState::new();
        state.set_tool(Tool::Rect);
        state.pointer_down(PointerHit::Nothing, false, p(0.0, 0.0), p(0.0, 0.0));
        state.set_tool(Tool::Select);
        assert!(state.is_idle());
        assert_eq!(state.pointer_up(p(50.0, 50.0)), Commit::None);
    }

    #[test]
    fn moves_without_interaction_do_nothing() {
        let mut state = ToolState::new();
        assert_eq!(state.pointer_move(p(1.0, 1.0), p(1.0, 1.0)), MoveEffect::None);
        assert_eq!(state.pointer_up(p(1.0, 1.0)), Commit::None);
    }

    #[test]
    fn labels_round_trip() {
        for tool in Tool::all() {
            assert_eq!(Tool::from_label(tool.label()), Some(*tool));
        }
    }
}
