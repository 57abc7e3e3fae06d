use bincode::{Decode, Encode};
use thiserror::Error;

pub const RESUME_MAGIC: [u8; 4] = *b"SBRS";
pub const RESUME_VERSION: u32 = 1;
const RESUME_HEADER_LEN: usize = RESUME_MAGIC.len() + std::mem::size_of::<u32>();

/// Tab-scoped session identity. Persisting it lets a page reload resume the
/// session instead of replaying control events it already applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode, serde::Serialize, serde::Deserialize)]
pub struct ResumeState {
    pub username: String,
    pub session_code: String,
    pub last_sequence: u64,
    pub question_number: u32,
}

#[derive(Debug, Error)]
pub enum ResumeDecodeError {
    #[error("unsupported resume state version {0}")]
    UnsupportedVersion(u32),
    #[error("resume state payload is not decodable")]
    InvalidData,
}

pub fn encode_resume_state(state: &ResumeState) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&RESUME_MAGIC);
    payload.extend_from_slice(&RESUME_VERSION.to_le_bytes());
    let body = bincode::encode_to_vec(state, bincode::config::standard()).unwrap_or_default();
    payload.extend_from_slice(&body);
    payload
}

pub fn decode_resume_state(payload: &[u8]) -> Result<ResumeState, ResumeDecodeError> {
    if !(payload.len() >= RESUME_HEADER_LEN && payload.starts_with(&RESUME_MAGIC)) {
        return Err(ResumeDecodeError::InvalidData);
    }
    let version = u32::from_le_bytes(
        payload[RESUME_MAGIC.len()..RESUME_HEADER_LEN]
            .try_into()
            .map_err(|_| ResumeDecodeError::InvalidData)?,
    );
    let body = &payload[RESUME_HEADER_LEN..];
    match version {
        1 => bincode::decode_from_slice(body, bincode::config::standard())
            .map(|(state, _)| state)
            .map_err(|_| ResumeDecodeError::InvalidData),
        _ => Err(ResumeDecodeError::UnsupportedVersion(version)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_state_round_trips() {
        let state = ResumeState {
            username: "ada".to_string(),
            session_code: "K3XQ2P".to_string(),
            last_sequence: 17,
            question_number: 4,
        };
        let decoded = decode_resume_state(&encode_resume_state(&state)).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn rejects_foreign_payloads() {
        assert!(matches!(
            decode_resume_state(b"not a resume blob"),
            Err(ResumeDecodeError::InvalidData)
        ));

        let mut future = encode_resume_state(&ResumeState::default());
        future[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            decode_resume_state(&future),
            Err(ResumeDecodeError::UnsupportedVersion(9))
        ));
    }
}
