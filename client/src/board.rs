//! Per-student drawing state machine: committed paths, the in-progress
//! stroke, background, and the undo/redo history.

use log::debug;
use slateboard_shared::messages::CanvasState;
use slateboard_shared::{
    sanitize_color, sanitize_opacity, sanitize_width, sanitize_wire_paths, Composite, Path, Point,
    VectorTemplate, MAX_PATHS,
};
use uuid::Uuid;

use crate::geometry::{hit_test, sweep_positions, BrushConfig};
use crate::render::ResolvedBackground;

#[derive(Clone, Debug)]
pub struct PathStyle {
    pub color: String,
    pub width: f32,
    pub erase: bool,
    pub opacity: f32,
}

impl Default for PathStyle {
    fn default() -> Self {
        Self {
            color: "#1e1b4b".to_string(),
            width: 5.0,
            erase: false,
            opacity: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EraseEntry {
    pub path: Path,
    pub index: usize,
}

/// One reversible history step. `index` records where in `paths` the action
/// happened so undo can restore ordering even after concurrent removals.
#[derive(Clone, Debug)]
pub enum Action {
    Draw { path: Path, index: usize },
    Erase { entries: Vec<EraseEntry> },
    Clear { snapshot: Vec<Path> },
}

struct EraseGesture {
    entries: Vec<EraseEntry>,
    last: Option<(f32, f32)>,
}

pub struct Board {
    pub paths: Vec<Path>,
    pub background_image: Option<String>,
    pub background_vector: Option<VectorTemplate>,
    pub background: ResolvedBackground,
    pub brush: BrushConfig,
    history: Vec<Action>,
    redo_stack: Vec<Action>,
    live: Option<Path>,
    erase_gesture: Option<EraseGesture>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self::with_brush(BrushConfig::default())
    }

    pub fn with_brush(brush: BrushConfig) -> Self {
        Self {
            paths: Vec::new(),
            background_image: None,
            background_vector: None,
            background: ResolvedBackground::NotLoaded,
            brush,
            history: Vec::new(),
            redo_stack: Vec::new(),
            live: None,
            erase_gesture: None,
        }
    }

    fn make_path_id() -> String {
        Uuid::new_v4().to_string()
    }

    // --- Stroke lifecycle ---

    pub fn begin_stroke(&mut self, style: PathStyle) {
        if self.live.is_some() {
            debug!("discarding unfinished stroke before starting a new one");
        }
        self.live = Some(Path {
            id: Self::make_path_id(),
            color: sanitize_color(style.color),
            width: sanitize_width(style.width),
            erase: style.erase,
            opacity: sanitize_opacity(style.opacity),
            composite: if style.erase {
                Composite::DestinationOut
            } else {
                Composite::SourceOver
            },
            points: Vec::new(),
        });
    }

    /// Appends one input sample to the in-progress stroke. Returns the
    /// previous and newly added points so the caller can derive a draw
    /// fragment for the live wire preview.
    pub fn append_stroke_point(
        &mut self,
        x: f32,
        y: f32,
        pressure: f32,
    ) -> Option<(Option<Point>, Point)> {
        let live = self.live.as_mut()?;
        let before = live.points.len();
        let previous = live.points.last().copied();
        live.push_point(x, y, pressure);
        if live.points.len() == before {
            return None;
        }
        Some((previous, *live.points.last()?))
    }

    pub fn live_path(&self) -> Option<&Path> {
        self.live.as_ref()
    }

    /// Commits the in-progress stroke. A stroke that captured no points is
    /// discarded without touching `paths` or history.
    pub fn end_stroke(&mut self) -> Option<Path> {
        let live = self.live.take()?;
        if live.points.is_empty() {
            return None;
        }
        let index = self.paths.len();
        self.paths.push(live.clone());
        self.trim_overflow();
        self.history.push(Action::Draw {
            path: live.clone(),
            index,
        });
        self.redo_stack.clear();
        Some(live)
    }

    pub fn cancel_stroke(&mut self) {
        if let Some(live) = self.live.take() {
            if !live.points.is_empty() {
                debug!("cancelled stroke with {} buffered points", live.points.len());
            }
        }
    }

    // --- Erase gestures ---

    pub fn begin_erase(&mut self) {
        if self.erase_gesture.is_some() {
            self.end_erase();
        }
        self.erase_gesture = Some(EraseGesture {
            entries: Vec::new(),
            last: None,
        });
    }

    /// One eraser sample. Tests every interpolated sub-step since the last
    /// sample; each sub-step removes at most the topmost hit path. Returns
    /// the ids removed by this call.
    pub fn erase_at(&mut self, x: f32, y: f32) -> Vec<String> {
        let Some(mut gesture) = self.erase_gesture.take() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for position in sweep_positions(gesture.last, (x, y), self.brush.erase_step) {
            let hit = self
                .paths
                .iter()
                .rposition(|path| hit_test(path, position.0, position.1, self.brush.erase_padding));
            if let Some(index) = hit {
                let path = self.paths.remove(index);
                removed.push(path.id.clone());
                gesture.entries.push(EraseEntry { path, index });
            }
        }
        gesture.last = Some((x, y));
        self.erase_gesture = Some(gesture);
        removed
    }

    /// Finalizes the gesture, recording all removals as a single undo step.
    pub fn end_erase(&mut self) -> bool {
        let Some(gesture) = self.erase_gesture.take() else {
            return false;
        };
        if gesture.entries.is_empty() {
            return false;
        }
        self.history.push(Action::Erase {
            entries: gesture.entries,
        });
        self.redo_stack.clear();
        true
    }

    // --- Clear / undo / redo ---

    pub fn clear(&mut self) -> bool {
        let snapshot = std::mem::take(&mut self.paths);
        let had_paths = !snapshot.is_empty();
        self.history.push(Action::Clear { snapshot });
        self.redo_stack.clear();
        had_paths
    }

    pub fn undo(&mut self) -> bool {
        let Some(action) = self.history.pop() else {
            return false;
        };
        self.revert(&action);
        self.redo_stack.push(action);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(action) = self.redo_stack.pop() else {
            return false;
        };
        self.reapply(&action);
        self.history.push(action);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    fn revert(&mut self, action: &Action) {
        match action {
            Action::Draw { path, index } => {
                // Identity first; the stored index is only a fallback because
                // a concurrent erase may have shifted positions.
                if let Some(position) = self.paths.iter().position(|p| p.id == path.id) {
                    self.paths.remove(position);
                } else if *index < self.paths.len() {
                    self.paths.remove(*index);
                }
            }
            Action::Erase { entries } => {
                for entry in entries.iter().rev() {
                    let at = entry.index.min(self.paths.len());
                    self.paths.insert(at, entry.path.clone());
                }
            }
            Action::Clear { snapshot } => {
                self.paths = snapshot.clone();
            }
        }
    }

    fn reapply(&mut self, action: &Action) {
        match action {
            Action::Draw { path, index } => {
                let at = (*index).min(self.paths.len());
                self.paths.insert(at, path.clone());
            }
            Action::Erase { entries } => {
                for entry in entries {
                    if let Some(position) = self.paths.iter().position(|p| p.id == entry.path.id) {
                        self.paths.remove(position);
                    } else if entry.index < self.paths.len() {
                        self.paths.remove(entry.index);
                    }
                }
            }
            Action::Clear { .. } => {
                self.paths.clear();
            }
        }
    }

    // --- Background ---

    pub fn apply_background(&mut self, image: Option<String>, vector: Option<VectorTemplate>) {
        self.background_image = image;
        self.background_vector = vector;
        self.background = ResolvedBackground::NotLoaded;
    }

    pub fn background_loaded(&mut self, width: f32, height: f32) {
        if self.background_image.is_some() {
            self.background = ResolvedBackground::Loaded { width, height };
        }
    }

    pub fn background_failed(&mut self) {
        self.background = ResolvedBackground::Failed;
    }

    // --- Lifecycle / mirroring ---

    /// Next-question reset: everything goes, including history.
    pub fn reset(&mut self) {
        self.paths.clear();
        self.history.clear();
        self.redo_stack.clear();
        self.live = None;
        self.erase_gesture = None;
        self.background_image = None;
        self.background_vector = None;
        self.background = ResolvedBackground::NotLoaded;
    }

    /// Replaces content from a full-state push. Used for mirrored boards,
    /// which never navigate history themselves.
    pub fn adopt_state(&mut self, state: &CanvasState, width: f32, height: f32) {
        self.paths = sanitize_wire_paths(state.paths.clone())
            .iter()
            .map(|wire| wire.to_path(width, height))
            .collect();
        if self.background_image != state.background_image {
            self.background_image = state.background_image.clone();
            self.background = ResolvedBackground::NotLoaded;
        }
        self.background_vector = state.background_vectors.clone();
    }

    /// Serializes committed paths and background for a full-state push.
    pub fn snapshot_state(&self, width: f32, height: f32) -> CanvasState {
        CanvasState {
            paths: self
                .paths
                .iter()
                .map(|path| path.to_wire(width, height))
                .collect(),
            background_image: self.background_image.clone(),
            background_vectors: self.background_vector.clone(),
        }
    }

    /// Committed paths plus the in-progress stroke, in z-order.
    pub fn visible_paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().chain(
            self.live
                .iter()
                .filter(|live| !live.points.is_empty()),
        )
    }

    fn trim_overflow(&mut self) {
        let overflow = self.paths.len().saturating_sub(MAX_PATHS);
        if overflow > 0 {
            debug!("dropping {overflow} oldest paths past the board cap");
            self.paths.drain(0..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(board: &mut Board, points: &[(f32, f32)]) -> Path {
        board.begin_stroke(PathStyle::default());
        for (x, y) in points {
            board.append_stroke_point(*x, *y, 0.5);
        }
        board.end_stroke().unwrap()
    }

    fn ids(board: &Board) -> Vec<String> {
        board.paths.iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn zero_point_stroke_is_discarded() {
        let mut board = Board::new();
        board.begin_stroke(PathStyle::default());
        assert!(board.end_stroke().is_none());
        assert!(board.paths.is_empty());
        assert!(!board.can_undo());
    }

    #[test]
    fn cancel_rolls_back_buffered_points() {
        let mut board = Board::new();
        board.begin_stroke(PathStyle::default());
        board.append_stroke_point(1.0, 1.0, 0.5);
        board.cancel_stroke();
        assert!(board.paths.is_empty());
        assert!(!board.can_undo());
    }

    #[test]
    fn undo_then_redo_restores_state_exactly() {
        let mut board = Board::new();
        draw(&mut board, &[(10.0, 10.0), (20.0, 10.0)]);
        draw(&mut board, &[(30.0, 30.0), (40.0, 30.0)]);
        let before = board.paths.clone();

        assert!(board.undo());
        assert_eq!(board.paths.len(), 1);
        assert!(board.redo());
        assert_eq!(board.paths, before);

        board.clear();
        assert!(board.paths.is_empty());
        assert!(board.undo());
        assert_eq!(board.paths, before);
        assert!(board.redo());
        assert!(board.paths.is_empty());
    }

    #[test]
    fn undo_after_erase_restores_original_order() {
        let mut board = Board::new();
        let p1 = draw(&mut board, &[(10.0, 10.0), (60.0, 10.0)]);
        let p2 = draw(&mut board, &[(10.0, 50.0), (60.0, 50.0)]);

        board.begin_erase();
        let removed = board.erase_at(30.0, 10.0);
        assert_eq!(removed, vec![p1.id.clone()]);
        assert!(board.end_erase());
        assert_eq!(ids(&board), vec![p2.id.clone()]);

        assert!(board.undo());
        assert_eq!(ids(&board), vec![p1.id, p2.id]);
    }

    #[test]
    fn erase_gesture_is_one_undo_step() {
        let mut board = Board::new();
        draw(&mut board, &[(10.0, 10.0), (60.0, 10.0)]);
        draw(&mut board, &[(10.0, 50.0), (60.0, 50.0)]);

        board.begin_erase();
        board.erase_at(30.0, 10.0);
        board.erase_at(30.0, 50.0);
        assert!(board.end_erase());
        assert!(board.paths.is_empty());

        // Both removals come back with a single undo.
        assert!(board.undo());
        assert_eq!(board.paths.len(), 2);
    }

    #[test]
    fn eraser_sweep_does_not_skip_thin_strokes() {
        let mut board = Board::new();
        let thin = draw(&mut board, &[(50.0, 0.0), (50.0, 100.0)]);

        board.begin_erase();
        // First sample far left, second far right: the stroke lies between.
        board.erase_at(0.0, 50.0);
        let removed = board.erase_at(100.0, 50.0);
        assert_eq!(removed, vec![thin.id]);
    }

    #[test]
    fn topmost_path_is_erased_first() {
        let mut board = Board::new();
        let bottom = draw(&mut board, &[(10.0, 10.0), (60.0, 10.0)]);
        let top = draw(&mut board, &[(10.0, 10.0), (60.0, 10.0)]);

        board.begin_erase();
        let removed = board.erase_at(30.0, 10.0);
        assert_eq!(removed, vec![top.id]);
        assert_eq!(ids(&board), vec![bottom.id]);
    }

    #[test]
    fn new_actions_clear_the_redo_stack() {
        let mut board = Board::new();
        draw(&mut board, &[(10.0, 10.0), (20.0, 10.0)]);
        board.undo();
        assert!(board.can_redo());
        draw(&mut board, &[(30.0, 30.0), (40.0, 30.0)]);
        assert!(!board.can_redo());
    }

    #[test]
    fn draw_undo_falls_back_to_index_when_identity_is_gone() {
        let mut board = Board::new();
        draw(&mut board, &[(10.0, 10.0), (20.0, 10.0)]);
        // Simulate an external replacement that changed the id.
        board.paths[0].id = "rewritten".to_string();
        assert!(board.undo());
        assert!(board.paths.is_empty());
    }

    #[test]
    fn adopt_state_round_trips_snapshot() {
        let mut source = Board::new();
        draw(&mut source, &[(100.0, 100.0), (200.0, 200.0)]);
        source.apply_background(Some("data:image/png;base64,abc".to_string()), None);
        let state = source.snapshot_state(800.0, 600.0);

        let mut mirror = Board::new();
        mirror.adopt_state(&state, 800.0, 600.0);
        assert_eq!(mirror.paths.len(), 1);
        assert_eq!(mirror.paths[0].id, source.paths[0].id);
        assert_eq!(mirror.background_image, source.background_image);
        assert_eq!(mirror.background, ResolvedBackground::NotLoaded);
    }
}
