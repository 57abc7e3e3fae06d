//! Wire message catalogue for the session channel.
//!
//! Every payload travels as `{"event": <name>, "payload": {...}}`. Decoding
//! happens at exactly one boundary so malformed input turns into a single
//! `DecodeError` instead of being re-validated in every handler.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::delta::AnnotationDelta;
use crate::vector::VectorTemplate;
use crate::WirePath;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PresenceMeta {
    pub role: Role,
    pub username: String,
}

/// Frames spoken between a client and the relay. `Broadcast` fans the
/// envelope out to every other subscriber of the channel; `Track` registers
/// the presence record delivered back to everyone via `PresenceSync`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Broadcast { event: String, payload: Value },
    Track { meta: PresenceMeta },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Broadcast { event: String, payload: Value },
    PresenceSync { peers: Vec<PresenceMeta> },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StudentReady {
    pub username: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeacherReady {
    pub session_code: String,
}

/// Low-latency in-progress stroke fragments. Fire-and-forget and visual
/// only, so they are never sequence-guarded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchFragment {
    #[serde(rename_all = "camelCase")]
    Dot {
        x: f32,
        y: f32,
        radius: f32,
        color: String,
    },
    #[serde(rename_all = "camelCase")]
    Line {
        start_x: f32,
        start_y: f32,
        end_x: f32,
        end_y: f32,
        width: f32,
        color: String,
    },
    #[serde(rename_all = "camelCase")]
    Quadratic {
        start_x: f32,
        start_y: f32,
        control_x: f32,
        control_y: f32,
        end_x: f32,
        end_y: f32,
        width: f32,
        color: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DrawBatch {
    pub username: String,
    pub batch: Vec<BatchFragment>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CanvasReason {
    Joined,
    Sync,
    Update,
    Clear,
    Erase,
    Undo,
    Redo,
    Background,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CanvasState {
    #[serde(default)]
    pub paths: Vec<WirePath>,
    #[serde(default)]
    pub background_image: Option<String>,
    #[serde(default)]
    pub background_vectors: Option<VectorTemplate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentCanvas {
    pub username: String,
    pub reason: CanvasReason,
    pub canvas_state: CanvasState,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    #[default]
    Blank,
    Image,
    Vector,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundSpec {
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub vector: Option<VectorTemplate>,
    #[serde(default)]
    pub preset_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetBackground {
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub vector: Option<VectorTemplate>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub preset_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(rename = "__seq")]
    pub seq: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestion {
    pub initiated_at: u64,
    pub question_number: u32,
    pub mode: BackgroundMode,
    #[serde(default)]
    pub background: Option<BackgroundSpec>,
    #[serde(rename = "__seq")]
    pub seq: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateRequest {
    pub username: String,
    pub last_sequence: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LoggedEvent {
    pub id: u64,
    pub event: String,
    pub payload: Value,
    pub timestamp: u64,
}

/// Aggregate control state at the moment `sequence` was assigned. Replaying
/// logged events with larger ids on top of it reproduces the current state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub sequence: u64,
    pub question_number: u32,
    pub mode: BackgroundMode,
    #[serde(default)]
    pub background: Option<BackgroundSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub target: Option<String>,
    pub snapshot: SessionSnapshot,
    #[serde(default)]
    pub events: Vec<LoggedEvent>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationReason {
    Sync,
    Stroke,
    Erase,
    Clear,
    Undo,
    Redo,
    Batch,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAnnotations {
    pub target: String,
    pub reason: AnnotationReason,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub annotations: Option<Vec<WirePath>>,
    #[serde(default)]
    pub delta: Option<Vec<AnnotationDelta>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestCanvas {
    pub target: String,
    pub requested_by: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionClosed {
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    StudentReady(StudentReady),
    TeacherReady(TeacherReady),
    DrawBatch(DrawBatch),
    StudentCanvas(StudentCanvas),
    SetBackground(SetBackground),
    NextQuestion(NextQuestion),
    SessionStateRequest(SessionStateRequest),
    SessionState(SessionState),
    TeacherAnnotations(TeacherAnnotations),
    RequestCanvas(RequestCanvas),
    SessionClosed(SessionClosed),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message envelope is not valid JSON")]
    InvalidEnvelope,
    #[error("unknown event \"{0}\"")]
    UnknownEvent(String),
    #[error("payload for \"{event}\" does not match its schema")]
    InvalidPayload { event: String },
}

fn payload_as<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, DecodeError> {
    serde_json::from_value(envelope.payload.clone()).map_err(|_| DecodeError::InvalidPayload {
        event: envelope.event.clone(),
    })
}

impl Message {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope =
            serde_json::from_str::<Envelope>(raw).map_err(|_| DecodeError::InvalidEnvelope)?;
        Self::from_envelope(&envelope)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, DecodeError> {
        let message = match envelope.event.as_str() {
            "student_ready" => Message::StudentReady(payload_as(envelope)?),
            "teacher_ready" => Message::TeacherReady(payload_as(envelope)?),
            "draw_batch" => Message::DrawBatch(payload_as(envelope)?),
            // The history-navigation aliases carry the same payload shape as
            // a plain canvas push.
            "student_canvas" | "clear" | "erase" | "undo" | "redo" => {
                Message::StudentCanvas(payload_as(envelope)?)
            }
            "set_background" => Message::SetBackground(payload_as(envelope)?),
            "next_question" => Message::NextQuestion(payload_as(envelope)?),
            "session_state_request" => Message::SessionStateRequest(payload_as(envelope)?),
            "session_state" => Message::SessionState(payload_as(envelope)?),
            "teacher_annotations" => Message::TeacherAnnotations(payload_as(envelope)?),
            "request_canvas" => Message::RequestCanvas(payload_as(envelope)?),
            "session_closed" => Message::SessionClosed(payload_as(envelope)?),
            other => return Err(DecodeError::UnknownEvent(other.to_string())),
        };
        Ok(message)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Message::StudentReady(_) => "student_ready",
            Message::TeacherReady(_) => "teacher_ready",
            Message::DrawBatch(_) => "draw_batch",
            Message::StudentCanvas(_) => "student_canvas",
            Message::SetBackground(_) => "set_background",
            Message::NextQuestion(_) => "next_question",
            Message::SessionStateRequest(_) => "session_state_request",
            Message::SessionState(_) => "session_state",
            Message::TeacherAnnotations(_) => "teacher_annotations",
            Message::RequestCanvas(_) => "request_canvas",
            Message::SessionClosed(_) => "session_closed",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            Message::StudentReady(p) => serde_json::to_value(p),
            Message::TeacherReady(p) => serde_json::to_value(p),
            Message::DrawBatch(p) => serde_json::to_value(p),
            Message::StudentCanvas(p) => serde_json::to_value(p),
            Message::SetBackground(p) => serde_json::to_value(p),
            Message::NextQuestion(p) => serde_json::to_value(p),
            Message::SessionStateRequest(p) => serde_json::to_value(p),
            Message::SessionState(p) => serde_json::to_value(p),
            Message::TeacherAnnotations(p) => serde_json::to_value(p),
            Message::RequestCanvas(p) => serde_json::to_value(p),
            Message::SessionClosed(p) => serde_json::to_value(p),
        };
        Envelope {
            event: self.event_name().to_string(),
            payload: payload.unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_aliases_decode_to_the_same_variant() {
        let payload = r#"{"username":"ada","reason":"undo","canvasState":{"paths":[]}}"#;
        for event in ["student_canvas", "clear", "erase", "undo", "redo"] {
            let raw = format!(r#"{{"event":"{event}","payload":{payload}}}"#);
            match Message::decode(&raw) {
                Ok(Message::StudentCanvas(canvas)) => assert_eq!(canvas.username, "ada"),
                other => panic!("unexpected decode for {event}: {other:?}"),
            }
        }
    }

    #[test]
    fn guarded_events_require_the_sequence_stamp() {
        let raw = r#"{"event":"set_background","payload":{"imageData":null}}"#;
        assert!(matches!(
            Message::decode(raw),
            Err(DecodeError::InvalidPayload { .. })
        ));

        let raw = r#"{"event":"set_background","payload":{"imageData":null,"__seq":4}}"#;
        match Message::decode(raw) {
            Ok(Message::SetBackground(background)) => assert_eq!(background.seq, 4),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_rejected_not_panicked() {
        let raw = r#"{"event":"force_feedback","payload":{}}"#;
        assert!(matches!(
            Message::decode(raw),
            Err(DecodeError::UnknownEvent(event)) if event == "force_feedback"
        ));
        assert!(matches!(
            Message::decode("not json"),
            Err(DecodeError::InvalidEnvelope)
        ));
    }

    #[test]
    fn encode_decode_round_trip() {
        let message = Message::NextQuestion(NextQuestion {
            initiated_at: 1_700_000_000_000,
            question_number: 3,
            mode: BackgroundMode::Vector,
            background: Some(BackgroundSpec {
                image_data: None,
                vector: Some(crate::vector::axes(800.0, 600.0)),
                preset_id: Some("axes".to_string()),
            }),
            seq: 9,
        });
        let envelope = message.to_envelope();
        assert_eq!(envelope.event, "next_question");
        assert_eq!(envelope.payload.get("__seq").and_then(Value::as_u64), Some(9));
        let decoded = Message::from_envelope(&envelope).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn draw_batch_fragments_use_camel_case_fields() {
        let raw = r##"{"event":"draw_batch","payload":{"username":"ada","batch":[
            {"type":"dot","x":1.0,"y":2.0,"radius":2.5,"color":"#111"},
            {"type":"line","startX":1.0,"startY":2.0,"endX":3.0,"endY":4.0,"width":5.0,"color":"#111"}
        ]}}"##;
        match Message::decode(raw) {
            Ok(Message::DrawBatch(batch)) => assert_eq!(batch.batch.len(), 2),
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
