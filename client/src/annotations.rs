//! Teacher-side live markup over a student's canvas.
//!
//! The stream tracks what the remote peer is known to hold (path ids and
//! point-count watermarks) and emits minimal deltas against that; anything
//! not reconstructable falls back to a full replace.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use slateboard_shared::{sanitize_wire_path, AnnotationDelta, Path};

pub const DELTA_BATCH_INTERVAL_MS: u64 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPhase {
    Detached,
    Steady,
}

#[derive(Clone, Copy, Debug)]
struct PathWatermark {
    index: usize,
    point_count: usize,
}

#[derive(Default)]
struct StreamState {
    order: Vec<String>,
    paths: HashMap<String, PathWatermark>,
}

impl StreamState {
    fn of(paths: &[Path]) -> Self {
        let mut state = Self::default();
        for (index, path) in paths.iter().enumerate() {
            state.order.push(path.id.clone());
            state.paths.insert(
                path.id.clone(),
                PathWatermark {
                    index,
                    point_count: path.points.len(),
                },
            );
        }
        state
    }
}

/// One annotation stream per (teacher, student) pairing.
pub struct AnnotationStream {
    phase: StreamPhase,
    remote: StreamState,
    width: f32,
    height: f32,
}

impl AnnotationStream {
    pub fn new() -> Self {
        Self {
            phase: StreamPhase::Detached,
            remote: StreamState::default(),
            width: crate::BASE_CANVAS_WIDTH,
            height: crate::BASE_CANVAS_HEIGHT,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Opens the stream. The attach transition is the only one allowed to
    /// push the complete annotation set.
    pub fn attach(&mut self, paths: &[Path], width: f32, height: f32) -> Vec<AnnotationDelta> {
        self.width = width.max(1.0);
        self.height = height.max(1.0);
        self.phase = StreamPhase::Steady;
        self.force_replace(paths)
    }

    /// Flushes a final sync and closes the stream.
    pub fn detach(&mut self, paths: &[Path]) -> Vec<AnnotationDelta> {
        let deltas = self.sync(paths);
        self.phase = StreamPhase::Detached;
        self.remote = StreamState::default();
        deltas
    }

    /// Computes the minimal deltas between the current annotation set and
    /// the remote watermark, then advances the watermark.
    pub fn sync(&mut self, paths: &[Path]) -> Vec<AnnotationDelta> {
        if self.phase == StreamPhase::Detached {
            return Vec::new();
        }
        if paths.is_empty() {
            if self.remote.order.is_empty() {
                return Vec::new();
            }
            self.remote = StreamState::default();
            return vec![AnnotationDelta::Clear];
        }
        // A shrinking path is not representable as a delta; resync instead.
        for path in paths {
            if let Some(watermark) = self.remote.paths.get(&path.id) {
                if path.points.len() < watermark.point_count {
                    warn!("annotation watermark shrank for {}, forcing resync", path.id);
                    return self.force_replace(paths);
                }
            }
        }

        let current_ids = paths.iter().map(|p| p.id.as_str()).collect::<HashSet<_>>();
        let mut deltas = Vec::new();
        for id in &self.remote.order {
            if !current_ids.contains(id.as_str()) {
                let index = self
                    .remote
                    .paths
                    .get(id)
                    .map(|watermark| watermark.index)
                    .unwrap_or(0);
                deltas.push(AnnotationDelta::RemovePath {
                    id: id.clone(),
                    index,
                });
            }
        }
        for (index, path) in paths.iter().enumerate() {
            match self.remote.paths.get(&path.id) {
                None => deltas.push(AnnotationDelta::AddPath {
                    index,
                    path: path.to_wire(self.width, self.height),
                }),
                Some(watermark) if path.points.len() > watermark.point_count => {
                    let wire = path.to_wire(self.width, self.height);
                    deltas.push(AnnotationDelta::AppendPoints {
                        id: path.id.clone(),
                        offset: watermark.point_count,
                        points: wire.points[watermark.point_count..].to_vec(),
                    });
                }
                Some(_) => {}
            }
        }
        self.remote = StreamState::of(paths);
        deltas
    }

    fn force_replace(&mut self, paths: &[Path]) -> Vec<AnnotationDelta> {
        self.remote = StreamState::of(paths);
        vec![AnnotationDelta::Replace {
            annotations: paths
                .iter()
                .map(|path| path.to_wire(self.width, self.height))
                .collect(),
        }]
    }
}

impl Default for AnnotationStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Coalesces point-level deltas onto a short timer. Discrete actions bypass
/// it and flush immediately.
pub struct DeltaBatcher {
    interval_ms: u64,
    dirty: bool,
    last_flush_ms: u64,
}

impl DeltaBatcher {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            dirty: false,
            last_flush_ms: 0,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// True when a coalesced flush is due. Resets the timer.
    pub fn take_due(&mut self, now_ms: u64) -> bool {
        if self.dirty && now_ms.saturating_sub(self.last_flush_ms) >= self.interval_ms {
            self.flushed(now_ms);
            return true;
        }
        false
    }

    pub fn flushed(&mut self, now_ms: u64) {
        self.dirty = false;
        self.last_flush_ms = now_ms;
    }
}

impl Default for DeltaBatcher {
    fn default() -> Self {
        Self::new(DELTA_BATCH_INTERVAL_MS)
    }
}

/// Student-side replica of the teacher's markup. Applies deltas
/// idempotently; a non-reconstructable delta parks the replica until the
/// next replace heals it.
pub struct AnnotationReplica {
    pub paths: Vec<Path>,
    width: f32,
    height: f32,
    desynced: bool,
}

impl AnnotationReplica {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            paths: Vec::new(),
            width: width.max(1.0),
            height: height.max(1.0),
            desynced: false,
        }
    }

    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    pub fn apply_all(&mut self, deltas: &[AnnotationDelta]) {
        for delta in deltas {
            self.apply(delta);
        }
    }

    pub fn apply(&mut self, delta: &AnnotationDelta) {
        match delta {
            AnnotationDelta::Replace { annotations } => {
                self.paths = annotations
                    .iter()
                    .filter_map(|wire| sanitize_wire_path(wire.clone()))
                    .map(|wire| wire.to_path(self.width, self.height))
                    .collect();
                self.desynced = false;
            }
            AnnotationDelta::Clear => {
                self.paths.clear();
                self.desynced = false;
            }
            _ if self.desynced => {
                debug!("replica desynced, waiting for replace");
            }
            AnnotationDelta::AddPath { index, path } => {
                let Some(wire) = sanitize_wire_path(path.clone()) else {
                    return;
                };
                let path = wire.to_path(self.width, self.height);
                if let Some(position) = self.paths.iter().position(|p| p.id == path.id) {
                    // Duplicate delivery: replace in place.
                    self.paths[position] = path;
                } else {
                    let at = (*index).min(self.paths.len());
                    self.paths.insert(at, path);
                }
            }
            AnnotationDelta::AppendPoints { id, offset, points } => {
                let Some(path) = self.paths.iter_mut().find(|p| p.id == *id) else {
                    warn!("append for unknown annotation {id}, marking desynced");
                    self.desynced = true;
                    return;
                };
                let current = path.points.len();
                if *offset > current {
                    warn!("append gap for annotation {id}, marking desynced");
                    self.desynced = true;
                    return;
                }
                let skip = current - offset;
                for point in points.iter().skip(skip) {
                    path.push_point(point.x * self.width, point.y * self.height, point.p);
                }
            }
            AnnotationDelta::RemovePath { id, .. } => {
                if let Some(position) = self.paths.iter().position(|p| p.id == *id) {
                    self.paths.remove(position);
                }
            }
        }
    }
}
