//! The teacher console controller: mirrors every student's canvas, owns the
//! control-plane sequence counter, answers catch-up requests, and drives the
//! annotation stream for the opened detail view.
//!
//! Poll-style: incoming transport events are handled synchronously, outgoing
//! envelopes accumulate until the shell drains `take_outgoing()`.

use log::debug;
use slateboard_shared::messages::{
    AnnotationReason, BackgroundMode, BackgroundSpec, BatchFragment, CanvasReason, Envelope,
    Message, NextQuestion, PresenceMeta, RequestCanvas, SessionClosed, SessionSnapshot,
    SessionState, SetBackground, TeacherAnnotations, TeacherReady,
};
use slateboard_shared::{vector, AnnotationDelta};

use crate::annotations::{AnnotationStream, DeltaBatcher};
use crate::board::{Board, PathStyle};
use crate::reliable::{Outbox, Reconnector, ReliableChannel};
use crate::session::SessionRegistry;
use crate::transport::{ConnectionState, TransportEvent};

pub const CANVAS_REQUEST_INTERVAL_MS: u64 = 4_000;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Tick {
    /// The shell should recreate the channel and resubscribe now.
    pub reconnect: bool,
}

struct AttachedView {
    username: String,
    layer: Board,
    stream: AnnotationStream,
    batcher: DeltaBatcher,
}

pub struct TeacherSession {
    session_code: String,
    registry: SessionRegistry,
    reliable: ReliableChannel,
    reconnector: Reconnector,
    outbox: Outbox,
    question_number: u32,
    background_mode: BackgroundMode,
    active_background: Option<BackgroundSpec>,
    attached: Option<AttachedView>,
    canvas_width: f32,
    canvas_height: f32,
    next_canvas_request_ms: u64,
    overlays: Vec<(String, Vec<BatchFragment>)>,
}

impl TeacherSession {
    pub fn new(session_code: &str) -> Self {
        Self {
            session_code: session_code.to_string(),
            registry: SessionRegistry::new(),
            reliable: ReliableChannel::new(),
            reconnector: Reconnector::default(),
            outbox: Outbox::default(),
            question_number: 0,
            background_mode: BackgroundMode::Blank,
            active_background: None,
            attached: None,
            canvas_width: crate::BASE_CANVAS_WIDTH,
            canvas_height: crate::BASE_CANVAS_HEIGHT,
            next_canvas_request_ms: 0,
            overlays: Vec::new(),
        }
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn question_number(&self) -> u32 {
        self.question_number
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnector.state()
    }

    pub fn students(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn attached_username(&self) -> Option<&str> {
        self.attached.as_ref().map(|view| view.username.as_str())
    }

    pub fn attached_layer(&self) -> Option<&Board> {
        self.attached.as_ref().map(|view| &view.layer)
    }

    pub fn set_canvas_size(&mut self, width: f32, height: f32) {
        self.canvas_width = width.max(1.0);
        self.canvas_height = height.max(1.0);
    }

    /// Drains queued envelopes when the channel is up. While it is down they
    /// stay in the bounded outbox and flush in order after resubscribe.
    pub fn take_outgoing(&mut self) -> Vec<Envelope> {
        if self.reconnector.is_connected() {
            self.outbox.drain()
        } else {
            Vec::new()
        }
    }

    /// Live draw fragments received since the last call, per student. The
    /// shell paints these directly; they never touch mirrored path state.
    pub fn take_overlays(&mut self) -> Vec<(String, Vec<BatchFragment>)> {
        std::mem::take(&mut self.overlays)
    }

    pub fn handle_event(&mut self, event: TransportEvent, now_ms: u64) {
        match event {
            TransportEvent::Subscribed => {
                self.reconnector.on_subscribed();
                self.send(Message::TeacherReady(TeacherReady {
                    session_code: self.session_code.clone(),
                }));
            }
            TransportEvent::ChannelError | TransportEvent::TimedOut | TransportEvent::Closed => {
                self.reconnector.on_lost(now_ms);
            }
            TransportEvent::PresenceSync(peers) => self.handle_presence(&peers, now_ms),
            TransportEvent::Broadcast(envelope) => match Message::from_envelope(&envelope) {
                Ok(message) => self.handle_message(message, now_ms),
                Err(error) => debug!("ignoring broadcast: {error}"),
            },
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> Tick {
        let reconnect = self.reconnector.poll(now_ms);
        if self.reconnector.is_connected()
            && !self.registry.is_empty()
            && now_ms >= self.next_canvas_request_ms
        {
            self.next_canvas_request_ms = now_ms + CANVAS_REQUEST_INTERVAL_MS;
            for username in self.registry.usernames() {
                self.request_canvas(&username);
            }
        }
        let batch_due = self
            .attached
            .as_mut()
            .map(|view| view.batcher.take_due(now_ms))
            .unwrap_or(false);
        if batch_due {
            self.flush_annotations(AnnotationReason::Batch, now_ms);
        }
        Tick { reconnect }
    }

    pub fn close(&mut self) {
        self.send(Message::SessionClosed(SessionClosed {
            reason: "teacher_left".to_string(),
        }));
    }

    // --- Control plane ---

    /// Broadcasts a new background for the current question and remembers it
    /// for late joiners. Returns the assigned sequence id.
    pub fn set_background(
        &mut self,
        spec: BackgroundSpec,
        file_name: Option<String>,
        now_ms: u64,
    ) -> u64 {
        let spec = self.resolve_background(spec);
        let seq = self.reliable.next_id();
        let message = Message::SetBackground(SetBackground {
            image_data: spec.image_data.clone(),
            vector: spec.vector.clone(),
            target: None,
            preset_id: spec.preset_id.clone(),
            file_name,
            seq,
        });
        self.background_mode = mode_of(Some(&spec));
        self.active_background = if spec.image_data.is_none() && spec.vector.is_none() {
            None
        } else {
            Some(spec)
        };
        self.push_guarded(message, seq, now_ms);
        seq
    }

    /// Advances to the next question: bumps the counter, resets every
    /// mirror and reviewed flag, and applies the new background.
    pub fn next_question(&mut self, background: Option<BackgroundSpec>, now_ms: u64) -> u64 {
        let background = background.map(|spec| self.resolve_background(spec));
        self.question_number += 1;
        self.background_mode = mode_of(background.as_ref());
        self.active_background = background.clone();
        let seq = self.reliable.next_id();
        let message = Message::NextQuestion(NextQuestion {
            initiated_at: now_ms,
            question_number: self.question_number,
            mode: self.background_mode,
            background,
            seq,
        });
        self.push_guarded(message, seq, now_ms);
        self.registry.reset_for_next_question();
        if let Some(view) = self.attached.as_mut() {
            view.layer.reset();
            let deltas = view
                .stream
                .attach(&[], self.canvas_width, self.canvas_height);
            let username = view.username.clone();
            self.push_annotations(&username, AnnotationReason::Sync, false, deltas);
        }
        seq
    }

    pub fn request_canvas(&mut self, username: &str) {
        if let Some(entry) = self.registry.get_mut(username) {
            entry.awaiting_sync = true;
        }
        self.send(Message::RequestCanvas(RequestCanvas {
            target: username.to_string(),
            requested_by: "teacher".to_string(),
        }));
    }

    // --- Annotation detail view ---

    /// Opens the detail view for a student: hydrates the markup layer from
    /// whatever was annotated before and pushes the one full replace the
    /// attach transition is allowed.
    pub fn attach_student(&mut self, username: &str, now_ms: u64) -> bool {
        if !self.registry.contains(username) {
            return false;
        }
        if self.attached.is_some() {
            self.detach_student(now_ms);
        }
        let mut layer = Board::new();
        let reviewed = match self.registry.get(username) {
            Some(entry) => {
                layer.paths = entry.annotations.clone();
                entry.reviewed
            }
            None => false,
        };
        let mut stream = AnnotationStream::new();
        let paths = layer.visible_paths().cloned().collect::<Vec<_>>();
        let deltas = stream.attach(&paths, self.canvas_width, self.canvas_height);
        self.attached = Some(AttachedView {
            username: username.to_string(),
            layer,
            stream,
            batcher: DeltaBatcher::default(),
        });
        self.push_annotations(username, AnnotationReason::Sync, reviewed, deltas);
        true
    }

    /// Closes the detail view, flushing any pending delta first.
    pub fn detach_student(&mut self, _now_ms: u64) {
        let Some(mut view) = self.attached.take() else {
            return;
        };
        let paths = view.layer.visible_paths().cloned().collect::<Vec<_>>();
        let deltas = view.stream.detach(&paths);
        let reviewed = self
            .registry
            .get(&view.username)
            .map(|entry| entry.reviewed)
            .unwrap_or(false);
        if !deltas.is_empty() {
            self.push_annotations(&view.username, AnnotationReason::Sync, reviewed, deltas);
        }
        if let Some(entry) = self.registry.get_mut(&view.username) {
            entry.annotations = view.layer.paths.clone();
        }
    }

    pub fn annotation_begin_stroke(&mut self, style: PathStyle) {
        if let Some(view) = self.attached.as_mut() {
            view.layer.begin_stroke(style);
        }
    }

    pub fn annotation_append_point(&mut self, x: f32, y: f32, pressure: f32) {
        if let Some(view) = self.attached.as_mut() {
            if view.layer.append_stroke_point(x, y, pressure).is_some() {
                view.batcher.mark_dirty();
            }
        }
    }

    pub fn annotation_end_stroke(&mut self, now_ms: u64) {
        let Some(view) = self.attached.as_mut() else {
            return;
        };
        view.layer.end_stroke();
        self.flush_annotations(AnnotationReason::Stroke, now_ms);
    }

    /// The streamed in-progress points are healed by the removal delta the
    /// next sync computes.
    pub fn annotation_cancel_stroke(&mut self, now_ms: u64) {
        let Some(view) = self.attached.as_mut() else {
            return;
        };
        view.layer.cancel_stroke();
        self.flush_annotations(AnnotationReason::Stroke, now_ms);
    }

    pub fn annotation_begin_erase(&mut self) {
        if let Some(view) = self.attached.as_mut() {
            view.layer.begin_erase();
        }
    }

    pub fn annotation_erase_at(&mut self, x: f32, y: f32) -> Vec<String> {
        let Some(view) = self.attached.as_mut() else {
            return Vec::new();
        };
        let removed = view.layer.erase_at(x, y);
        if !removed.is_empty() {
            view.batcher.mark_dirty();
        }
        removed
    }

    pub fn annotation_end_erase(&mut self, now_ms: u64) {
        let Some(view) = self.attached.as_mut() else {
            return;
        };
        if view.layer.end_erase() {
            self.flush_annotations(AnnotationReason::Erase, now_ms);
        }
    }

    pub fn annotation_clear(&mut self, now_ms: u64) {
        let Some(view) = self.attached.as_mut() else {
            return;
        };
        view.layer.clear();
        self.flush_annotations(AnnotationReason::Clear, now_ms);
    }

    pub fn annotation_undo(&mut self, now_ms: u64) {
        let undone = self
            .attached
            .as_mut()
            .map(|view| view.layer.undo())
            .unwrap_or(false);
        if undone {
            self.flush_annotations(AnnotationReason::Undo, now_ms);
        }
    }

    pub fn annotation_redo(&mut self, now_ms: u64) {
        let redone = self
            .attached
            .as_mut()
            .map(|view| view.layer.redo())
            .unwrap_or(false);
        if redone {
            self.flush_annotations(AnnotationReason::Redo, now_ms);
        }
    }

    // --- Internals ---

    fn handle_presence(&mut self, peers: &[PresenceMeta], now_ms: u64) {
        let changes = self.registry.sync_presence(peers);
        for username in &changes.left {
            let attached_here = self
                .attached
                .as_ref()
                .map(|view| &view.username == username)
                .unwrap_or(false);
            if attached_here {
                // The peer is gone; there is nothing left to flush to.
                self.attached = None;
            }
        }
        for username in &changes.joined {
            self.request_canvas(username);
            self.send_background_to(username, now_ms);
        }
    }

    fn handle_message(&mut self, message: Message, now_ms: u64) {
        match message {
            Message::StudentReady(ready) => {
                if ready.username.is_empty() {
                    return;
                }
                let is_new = !self.registry.contains(&ready.username);
                self.registry.ensure(&ready.username);
                if is_new {
                    self.request_canvas(&ready.username);
                    self.send_background_to(&ready.username, now_ms);
                }
            }
            Message::DrawBatch(batch) => {
                if batch.username.is_empty() || batch.batch.is_empty() {
                    return;
                }
                let entry = self.registry.ensure(&batch.username);
                entry.reviewed = true;
                entry.last_activity = now_ms;
                self.overlays.push((batch.username, batch.batch));
            }
            Message::StudentCanvas(canvas) => {
                if canvas.username.is_empty() {
                    return;
                }
                let width = self.canvas_width;
                let height = self.canvas_height;
                let entry = self.registry.ensure(&canvas.username);
                entry.board.adopt_state(&canvas.canvas_state, width, height);
                entry.last_activity = now_ms;
                entry.awaiting_sync = false;
                if matches!(
                    canvas.reason,
                    CanvasReason::Update
                        | CanvasReason::Clear
                        | CanvasReason::Erase
                        | CanvasReason::Undo
                        | CanvasReason::Redo
                ) {
                    entry.reviewed = true;
                }
            }
            Message::SessionStateRequest(request) => {
                let snapshot = SessionSnapshot {
                    sequence: self.reliable.last_sequence(),
                    question_number: self.question_number,
                    mode: self.background_mode,
                    background: self.active_background.clone(),
                };
                let events = self.reliable.events_since(request.last_sequence);
                self.send(Message::SessionState(SessionState {
                    target: Some(request.username),
                    snapshot,
                    events,
                }));
            }
            other => debug!("teacher ignoring {}", other.event_name()),
        }
    }

    fn resolve_background(&self, mut spec: BackgroundSpec) -> BackgroundSpec {
        if spec.vector.is_none() {
            if let Some(preset_id) = &spec.preset_id {
                spec.vector = vector::preset(preset_id, self.canvas_width, self.canvas_height);
            }
        }
        spec
    }

    fn send_background_to(&mut self, username: &str, now_ms: u64) {
        let Some(background) = self.active_background.clone() else {
            return;
        };
        let seq = self.reliable.next_id();
        let message = Message::SetBackground(SetBackground {
            image_data: background.image_data,
            vector: background.vector,
            target: Some(username.to_string()),
            preset_id: background.preset_id,
            file_name: None,
            seq,
        });
        self.push_guarded(message, seq, now_ms);
    }

    fn flush_annotations(&mut self, reason: AnnotationReason, now_ms: u64) {
        let Some(view) = self.attached.as_mut() else {
            return;
        };
        let paths = view.layer.visible_paths().cloned().collect::<Vec<_>>();
        let deltas = view.stream.sync(&paths);
        view.batcher.flushed(now_ms);
        if deltas.is_empty() {
            return;
        }
        let username = view.username.clone();
        let reviewed = if let Some(entry) = self.registry.get_mut(&username) {
            entry.reviewed = true;
            entry.last_activity = now_ms;
            true
        } else {
            false
        };
        self.push_annotations(&username, reason, reviewed, deltas);
    }

    fn push_annotations(
        &mut self,
        username: &str,
        reason: AnnotationReason,
        reviewed: bool,
        deltas: Vec<AnnotationDelta>,
    ) {
        let message = match deltas.as_slice() {
            [AnnotationDelta::Replace { annotations }] => {
                Message::TeacherAnnotations(TeacherAnnotations {
                    target: username.to_string(),
                    reason,
                    reviewed,
                    annotations: Some(annotations.clone()),
                    delta: None,
                })
            }
            _ => Message::TeacherAnnotations(TeacherAnnotations {
                target: username.to_string(),
                reason,
                reviewed,
                annotations: None,
                delta: Some(deltas),
            }),
        };
        self.send(message);
    }

    fn push_guarded(&mut self, message: Message, seq: u64, now_ms: u64) {
        let envelope = message.to_envelope();
        self.reliable
            .record(seq, &envelope.event, envelope.payload.clone(), now_ms);
        self.outbox.push(envelope);
    }

    fn send(&mut self, message: Message) {
        self.outbox.push(message.to_envelope());
    }
}

fn mode_of(spec: Option<&BackgroundSpec>) -> BackgroundMode {
    match spec {
        Some(spec) if spec.image_data.is_some() => BackgroundMode::Image,
        Some(spec) if spec.vector.is_some() => BackgroundMode::Vector,
        _ => BackgroundMode::Blank,
    }
}
