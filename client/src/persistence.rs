//! Tab-scoped resume persistence. The shell provides the actual key/value
//! store (session storage in a browser); the core only speaks the codec.

use std::collections::HashMap;

use log::warn;
use slateboard_shared::{decode_resume_state, encode_resume_state, ResumeState};

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: &[u8]);
    fn remove(&mut self, key: &str);
}

/// In-memory store for tests and headless shells.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.entries.insert(key.to_string(), value.to_vec());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

pub fn resume_key(session_code: &str) -> String {
    format!("slateboard-resume-{session_code}")
}

pub fn load_resume_state(store: &dyn KeyValueStore, session_code: &str) -> Option<ResumeState> {
    let payload = store.get(&resume_key(session_code))?;
    match decode_resume_state(&payload) {
        Ok(state) => Some(state),
        Err(error) => {
            warn!("discarding unreadable resume state: {error}");
            None
        }
    }
}

pub fn save_resume_state(store: &mut dyn KeyValueStore, state: &ResumeState) {
    store.set(
        &resume_key(&state.session_code),
        &encode_resume_state(state),
    );
}

pub fn clear_resume_state(store: &mut dyn KeyValueStore, session_code: &str) {
    store.remove(&resume_key(session_code));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_round_trip() {
        let mut store = MemoryStore::default();
        let state = ResumeState {
            username: "ada".to_string(),
            session_code: "K3XQ2P".to_string(),
            last_sequence: 12,
            question_number: 2,
        };
        save_resume_state(&mut store, &state);
        assert_eq!(load_resume_state(&store, "K3XQ2P"), Some(state));
        assert!(load_resume_state(&store, "OTHER1").is_none());
    }

    #[test]
    fn corrupt_payloads_load_as_none() {
        let mut store = MemoryStore::default();
        store.set(&resume_key("K3XQ2P"), b"garbage");
        assert!(load_resume_state(&store, "K3XQ2P").is_none());

        save_resume_state(
            &mut store,
            &ResumeState {
                session_code: "K3XQ2P".to_string(),
                ..ResumeState::default()
            },
        );
        clear_resume_state(&mut store, "K3XQ2P");
        assert!(load_resume_state(&store, "K3XQ2P").is_none());
    }
}
