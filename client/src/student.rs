//! The student client controller: owns the private canvas, guards the
//! sequence-stamped control plane, answers canvas requests, and mirrors the
//! teacher's annotation layer.

use log::debug;
use slateboard_shared::messages::{
    BackgroundSpec, BatchFragment, CanvasReason, DrawBatch, Envelope, Message, NextQuestion,
    Role, SessionState, SessionStateRequest, SetBackground, StudentCanvas, StudentReady,
};
use slateboard_shared::{vector, AnnotationDelta, ResumeState};

use crate::annotations::AnnotationReplica;
use crate::board::{Board, PathStyle};
use crate::reliable::{Outbox, Reconnector, SequenceGuard};
use crate::teacher::Tick;
use crate::transport::{ConnectionState, TransportEvent};

/// The persistent connected/pending/error indicator, the only user-facing
/// error surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    WaitingForTeacher,
    Connected,
    Error,
    Closed,
}

pub struct StudentSession {
    username: String,
    session_code: String,
    pub board: Board,
    pub annotations: AnnotationReplica,
    guard: SequenceGuard,
    reconnector: Reconnector,
    outbox: Outbox,
    question_number: u32,
    status: SessionStatus,
    teacher_online: bool,
    canvas_width: f32,
    canvas_height: f32,
    pending_batch: Vec<BatchFragment>,
    closed_reason: Option<String>,
}

impl StudentSession {
    pub fn new(username: &str, session_code: &str) -> Self {
        Self {
            username: username.to_string(),
            session_code: session_code.to_string(),
            board: Board::new(),
            annotations: AnnotationReplica::new(crate::BASE_CANVAS_WIDTH, crate::BASE_CANVAS_HEIGHT),
            guard: SequenceGuard::default(),
            reconnector: Reconnector::default(),
            outbox: Outbox::default(),
            question_number: 0,
            status: SessionStatus::Connecting,
            teacher_online: false,
            canvas_width: crate::BASE_CANVAS_WIDTH,
            canvas_height: crate::BASE_CANVAS_HEIGHT,
            pending_batch: Vec::new(),
            closed_reason: None,
        }
    }

    /// Resumes within the same tab: the persisted guard position keeps
    /// already-applied control events from replaying after a reload.
    pub fn with_resume(username: &str, session_code: &str, resume: &ResumeState) -> Self {
        let mut session = Self::new(username, session_code);
        if resume.username == username && resume.session_code == session_code {
            session.guard = SequenceGuard::new(resume.last_sequence);
            session.question_number = resume.question_number;
        }
        session
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnector.state()
    }

    pub fn question_number(&self) -> u32 {
        self.question_number
    }

    /// Reason the session was closed by the teacher, if it was.
    pub fn closed_reason(&self) -> Option<&str> {
        self.closed_reason.as_deref()
    }

    pub fn resume_state(&self) -> ResumeState {
        ResumeState {
            username: self.username.clone(),
            session_code: self.session_code.clone(),
            last_sequence: self.guard.last_applied(),
            question_number: self.question_number,
        }
    }

    pub fn set_canvas_size(&mut self, width: f32, height: f32) {
        self.canvas_width = width.max(1.0);
        self.canvas_height = height.max(1.0);
    }

    pub fn take_outgoing(&mut self) -> Vec<Envelope> {
        if self.reconnector.is_connected() {
            self.outbox.drain()
        } else {
            Vec::new()
        }
    }

    pub fn handle_event(&mut self, event: TransportEvent, now_ms: u64) {
        match event {
            TransportEvent::Subscribed => {
                self.reconnector.on_subscribed();
                if self.status != SessionStatus::Closed {
                    self.status = if self.teacher_online {
                        SessionStatus::Connected
                    } else {
                        SessionStatus::WaitingForTeacher
                    };
                }
                self.send(Message::StudentReady(StudentReady {
                    username: self.username.clone(),
                }));
                self.push_canvas(CanvasReason::Joined);
                self.send(Message::SessionStateRequest(SessionStateRequest {
                    username: self.username.clone(),
                    last_sequence: self.guard.last_applied(),
                }));
            }
            TransportEvent::ChannelError | TransportEvent::TimedOut | TransportEvent::Closed => {
                if self.status != SessionStatus::Closed {
                    self.status = SessionStatus::Error;
                }
                self.reconnector.on_lost(now_ms);
            }
            TransportEvent::PresenceSync(peers) => {
                self.teacher_online = peers.iter().any(|meta| meta.role == Role::Teacher);
                if self.status != SessionStatus::Closed && self.status != SessionStatus::Error {
                    self.status = if self.teacher_online {
                        SessionStatus::Connected
                    } else {
                        SessionStatus::WaitingForTeacher
                    };
                }
            }
            TransportEvent::Broadcast(envelope) => match Message::from_envelope(&envelope) {
                Ok(message) => self.handle_message(message),
                Err(error) => debug!("ignoring broadcast: {error}"),
            },
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> Tick {
        self.flush_draw_batch();
        Tick {
            reconnect: self.reconnector.poll(now_ms),
        }
    }

    // --- Drawing ---

    pub fn begin_stroke(&mut self, style: PathStyle, x: f32, y: f32, pressure: f32) {
        let color = style.color.clone();
        let width = style.width;
        self.board.begin_stroke(style);
        if let Some((_, point)) = self.board.append_stroke_point(x, y, pressure) {
            self.pending_batch.push(BatchFragment::Dot {
                x: point.x,
                y: point.y,
                radius: width / 2.0,
                color,
            });
        }
    }

    pub fn append_stroke(&mut self, x: f32, y: f32, pressure: f32) {
        let Some((previous, point)) = self.board.append_stroke_point(x, y, pressure) else {
            return;
        };
        let Some(live) = self.board.live_path() else {
            return;
        };
        let (color, width) = (live.color.clone(), live.width);
        match previous {
            Some(prev) => self.pending_batch.push(BatchFragment::Line {
                start_x: prev.x,
                start_y: prev.y,
                end_x: point.x,
                end_y: point.y,
                width,
                color,
            }),
            None => self.pending_batch.push(BatchFragment::Dot {
                x: point.x,
                y: point.y,
                radius: width / 2.0,
                color,
            }),
        }
    }

    /// Sends buffered in-progress fragments. Called per pointer event by the
    /// shell and once per tick as a backstop.
    pub fn flush_draw_batch(&mut self) {
        if self.pending_batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending_batch);
        self.send(Message::DrawBatch(DrawBatch {
            username: self.username.clone(),
            batch,
        }));
    }

    pub fn end_stroke(&mut self) {
        self.flush_draw_batch();
        if self.board.end_stroke().is_some() {
            self.push_canvas(CanvasReason::Update);
        }
    }

    pub fn cancel_stroke(&mut self) {
        self.pending_batch.clear();
        self.board.cancel_stroke();
    }

    pub fn begin_erase(&mut self) {
        self.board.begin_erase();
    }

    pub fn erase_at(&mut self, x: f32, y: f32) -> bool {
        !self.board.erase_at(x, y).is_empty()
    }

    pub fn end_erase(&mut self) {
        if self.board.end_erase() {
            self.push_canvas(CanvasReason::Erase);
        }
    }

    pub fn clear(&mut self) {
        self.board.clear();
        self.push_canvas(CanvasReason::Clear);
    }

    pub fn undo(&mut self) {
        if self.board.undo() {
            self.push_canvas(CanvasReason::Undo);
        }
    }

    pub fn redo(&mut self) {
        if self.board.redo() {
            self.push_canvas(CanvasReason::Redo);
        }
    }

    pub fn background_loaded(&mut self, width: f32, height: f32) {
        self.board.background_loaded(width, height);
    }

    pub fn background_failed(&mut self) {
        self.board.background_failed();
    }

    // --- Incoming ---

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::TeacherReady(_) => {
                self.teacher_online = true;
                if self.status != SessionStatus::Closed {
                    self.status = SessionStatus::Connected;
                }
                self.push_canvas(CanvasReason::Sync);
            }
            Message::RequestCanvas(request) => {
                if request.target == self.username {
                    self.push_canvas(CanvasReason::Sync);
                }
            }
            Message::SetBackground(background) => self.apply_set_background(background),
            Message::NextQuestion(question) => self.apply_next_question(question),
            Message::SessionState(state) => self.apply_session_state(state),
            Message::TeacherAnnotations(note) => {
                if note.target != self.username {
                    return;
                }
                if let Some(annotations) = &note.annotations {
                    self.annotations.apply(&AnnotationDelta::Replace {
                        annotations: annotations.clone(),
                    });
                }
                if let Some(deltas) = &note.delta {
                    self.annotations.apply_all(deltas);
                }
            }
            Message::SessionClosed(closed) => {
                self.closed_reason = Some(closed.reason);
                self.status = SessionStatus::Closed;
            }
            // Other students' traffic and our own echoes.
            other => debug!("student ignoring {}", other.event_name()),
        }
    }

    fn apply_set_background(&mut self, background: SetBackground) {
        if let Some(target) = &background.target {
            if target != &self.username {
                return;
            }
        }
        if !self.guard.accept(background.seq) {
            return;
        }
        self.apply_background_spec(Some(BackgroundSpec {
            image_data: background.image_data,
            vector: background.vector,
            preset_id: background.preset_id,
        }));
        self.push_canvas(CanvasReason::Background);
    }

    fn apply_next_question(&mut self, question: NextQuestion) {
        if !self.guard.accept(question.seq) {
            return;
        }
        // Only strictly increasing question numbers advance the session.
        if question.question_number <= self.question_number {
            debug!(
                "ignoring non-increasing question number {}",
                question.question_number
            );
            return;
        }
        self.question_number = question.question_number;
        self.board.reset();
        self.annotations = AnnotationReplica::new(self.canvas_width, self.canvas_height);
        self.apply_background_spec(question.background);
        self.push_canvas(CanvasReason::Clear);
    }

    fn apply_session_state(&mut self, state: SessionState) {
        if let Some(target) = &state.target {
            if target != &self.username {
                return;
            }
        }
        let snapshot = state.snapshot;
        // Adopt at `>=` so a targeted event that already advanced the guard
        // cannot mask a snapshot captured at the same point.
        if snapshot.sequence >= self.guard.last_applied() {
            if snapshot.question_number > self.question_number {
                self.question_number = snapshot.question_number;
                self.board.reset();
                self.annotations = AnnotationReplica::new(self.canvas_width, self.canvas_height);
            }
            self.apply_background_spec(snapshot.background);
            self.guard.advance_to(snapshot.sequence);
            self.push_canvas(CanvasReason::Sync);
        }
        let mut events = state.events;
        events.sort_by_key(|event| event.id);
        for logged in events {
            let envelope = Envelope {
                event: logged.event,
                payload: logged.payload,
            };
            match Message::from_envelope(&envelope) {
                Ok(Message::SetBackground(background)) => self.apply_set_background(background),
                Ok(Message::NextQuestion(question)) => self.apply_next_question(question),
                Ok(other) => debug!("not replaying {}", other.event_name()),
                Err(error) => debug!("ignoring unreplayable event: {error}"),
            }
        }
    }

    fn apply_background_spec(&mut self, spec: Option<BackgroundSpec>) {
        match spec {
            None => self.board.apply_background(None, None),
            Some(spec) => {
                let vector = spec.vector.or_else(|| {
                    spec.preset_id
                        .as_deref()
                        .and_then(|id| vector::preset(id, self.canvas_width, self.canvas_height))
                });
                self.board.apply_background(spec.image_data, vector);
            }
        }
    }

    fn push_canvas(&mut self, reason: CanvasReason) {
        let message = Message::StudentCanvas(StudentCanvas {
            username: self.username.clone(),
            reason,
            canvas_state: self
                .board
                .snapshot_state(self.canvas_width, self.canvas_height),
        });
        self.send(message);
    }

    fn send(&mut self, message: Message) {
        self.outbox.push(message.to_envelope());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slateboard_shared::messages::{LoggedEvent, SessionSnapshot};
    use serde_json::json;

    fn background_message(seq: u64, data: &str, target: Option<&str>) -> TransportEvent {
        TransportEvent::Broadcast(
            Message::SetBackground(SetBackground {
                image_data: Some(data.to_string()),
                vector: None,
                target: target.map(str::to_string),
                preset_id: None,
                file_name: None,
                seq,
            })
            .to_envelope(),
        )
    }

    fn next_question_message(seq: u64, question_number: u32) -> TransportEvent {
        TransportEvent::Broadcast(
            Message::NextQuestion(NextQuestion {
                initiated_at: 0,
                question_number,
                mode: Default::default(),
                background: None,
                seq,
            })
            .to_envelope(),
        )
    }

    #[test]
    fn duplicate_control_events_apply_once() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.take_outgoing();

        student.handle_event(background_message(1, "data:a", None), 10);
        let after_first = student.board.background_image.clone();
        let sent = student.take_outgoing();
        assert_eq!(sent.len(), 1);

        student.handle_event(background_message(1, "data:b", None), 20);
        assert_eq!(student.board.background_image, after_first);
        assert!(student.take_outgoing().is_empty());
    }

    #[test]
    fn stale_question_numbers_are_ignored() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.handle_event(next_question_message(1, 3), 10);
        assert_eq!(student.question_number(), 3);

        // An older-but-different number must not regress the session.
        student.handle_event(next_question_message(2, 2), 20);
        assert_eq!(student.question_number(), 3);

        student.handle_event(next_question_message(3, 4), 30);
        assert_eq!(student.question_number(), 4);
    }

    #[test]
    fn targeted_background_for_someone_else_is_ignored() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.handle_event(background_message(1, "data:other", Some("bo")), 10);
        assert!(student.board.background_image.is_none());
        // The guard did not consume the sequence id.
        student.handle_event(background_message(1, "data:mine", Some("ada")), 20);
        assert_eq!(student.board.background_image.as_deref(), Some("data:mine"));
    }

    #[test]
    fn session_state_replays_only_unapplied_events() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.handle_event(background_message(5, "data:old", None), 10);
        student.take_outgoing();

        let state = SessionState {
            target: Some("ada".to_string()),
            snapshot: SessionSnapshot {
                sequence: 7,
                question_number: 2,
                mode: Default::default(),
                background: Some(BackgroundSpec {
                    image_data: Some("data:new".to_string()),
                    ..BackgroundSpec::default()
                }),
            },
            events: vec![
                LoggedEvent {
                    id: 5,
                    event: "set_background".to_string(),
                    payload: json!({"imageData": "data:old", "__seq": 5}),
                    timestamp: 1,
                },
                LoggedEvent {
                    id: 7,
                    event: "set_background".to_string(),
                    payload: json!({"imageData": "data:new", "__seq": 7}),
                    timestamp: 3,
                },
            ],
        };
        student.handle_event(
            TransportEvent::Broadcast(Message::SessionState(state).to_envelope()),
            20,
        );
        assert_eq!(student.question_number(), 2);
        assert_eq!(student.board.background_image.as_deref(), Some("data:new"));
    }

    #[test]
    fn stroke_lifecycle_emits_fragments_then_full_state() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.take_outgoing();

        student.begin_stroke(PathStyle::default(), 10.0, 10.0, 0.5);
        student.append_stroke(20.0, 20.0, 0.5);
        student.append_stroke(30.0, 30.0, 0.5);
        student.end_stroke();

        let events = student
            .take_outgoing()
            .into_iter()
            .map(|env| env.event)
            .collect::<Vec<_>>();
        assert_eq!(events, vec!["draw_batch", "student_canvas"]);
        assert_eq!(student.board.paths.len(), 1);
    }

    #[test]
    fn cancelled_stroke_sends_no_full_state() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.take_outgoing();

        student.begin_stroke(PathStyle::default(), 10.0, 10.0, 0.5);
        student.cancel_stroke();
        assert!(student.take_outgoing().is_empty());
        assert!(student.board.paths.is_empty());
    }

    #[test]
    fn session_closed_forces_exit() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.handle_event(
            TransportEvent::Broadcast(
                Message::SessionClosed(slateboard_shared::messages::SessionClosed {
                    reason: "teacher_left".to_string(),
                })
                .to_envelope(),
            ),
            10,
        );
        assert_eq!(student.status(), SessionStatus::Closed);
        assert_eq!(student.closed_reason(), Some("teacher_left"));
    }

    #[test]
    fn resume_restores_guard_and_question() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.handle_event(background_message(4, "data:a", None), 10);
        student.handle_event(next_question_message(5, 2), 20);
        let resume = student.resume_state();

        let mut reloaded = StudentSession::with_resume("ada", "K3XQ2P", &resume);
        reloaded.handle_event(TransportEvent::Subscribed, 100);
        // A replayed duplicate of an already-applied event is rejected.
        reloaded.take_outgoing();
        reloaded.handle_event(next_question_message(5, 2), 110);
        assert!(reloaded.take_outgoing().is_empty());
        assert_eq!(reloaded.question_number(), 2);
    }

    #[test]
    fn sends_queue_in_order_while_disconnected() {
        let mut student = StudentSession::new("ada", "K3XQ2P");
        student.handle_event(TransportEvent::Subscribed, 0);
        student.take_outgoing();

        student.handle_event(TransportEvent::ChannelError, 1_000);
        assert_eq!(student.status(), SessionStatus::Error);
        student.clear();
        student.undo();
        student.redo();
        assert!(student.take_outgoing().is_empty());

        assert!(student.tick(3_200).reconnect);
        student.handle_event(TransportEvent::Subscribed, 3_300);
        let events = student
            .take_outgoing()
            .into_iter()
            .map(|env| env.event)
            .collect::<Vec<_>>();
        // Everything queued while down, then the resubscribe handshake,
        // in issue order with nothing dropped.
        assert_eq!(
            events,
            vec![
                "student_canvas",
                "student_canvas",
                "student_canvas",
                "student_ready",
                "student_canvas",
                "session_state_request"
            ]
        );
    }
}
