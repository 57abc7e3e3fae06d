//! The teacher's registry of known students, reconciled against presence.

use std::collections::{HashMap, HashSet};

use slateboard_shared::messages::{PresenceMeta, Role};
use slateboard_shared::Path;

use crate::board::Board;

pub struct StudentEntry {
    /// Mirror of the student's own canvas.
    pub board: Board,
    /// Teacher markup over this student, kept across attach/detach.
    pub annotations: Vec<Path>,
    /// Set when the student draws or the teacher annotates; monotonic within
    /// a question, reset only on next-question.
    pub reviewed: bool,
    pub last_activity: u64,
    /// True while a canvas re-request is outstanding.
    pub awaiting_sync: bool,
}

impl StudentEntry {
    fn new() -> Self {
        Self {
            board: Board::new(),
            annotations: Vec::new(),
            reviewed: false,
            last_activity: 0,
            awaiting_sync: false,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PresenceChanges {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

/// Owns every per-student state, with creation and destruction tied to the
/// presence registry rather than scattered through event handlers.
#[derive(Default)]
pub struct SessionRegistry {
    students: HashMap<String, StudentEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.students.contains_key(username)
    }

    pub fn ensure(&mut self, username: &str) -> &mut StudentEntry {
        self.students
            .entry(username.to_string())
            .or_insert_with(StudentEntry::new)
    }

    pub fn get(&self, username: &str) -> Option<&StudentEntry> {
        self.students.get(username)
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut StudentEntry> {
        self.students.get_mut(username)
    }

    pub fn remove(&mut self, username: &str) -> Option<StudentEntry> {
        self.students.remove(username)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names = self.students.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StudentEntry)> {
        self.students.iter()
    }

    /// Reconciles against the current presence roster: creates entries for
    /// newly present students, drops entries for departed ones.
    pub fn sync_presence(&mut self, peers: &[PresenceMeta]) -> PresenceChanges {
        let present = peers
            .iter()
            .filter(|meta| meta.role == Role::Student && !meta.username.is_empty())
            .map(|meta| meta.username.as_str())
            .collect::<HashSet<_>>();

        let mut changes = PresenceChanges::default();
        for username in &present {
            if !self.students.contains_key(*username) {
                self.students
                    .insert((*username).to_string(), StudentEntry::new());
                changes.joined.push((*username).to_string());
            }
        }
        let departed = self
            .students
            .keys()
            .filter(|name| !present.contains(name.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        for username in departed {
            self.students.remove(&username);
            changes.left.push(username);
        }
        changes.joined.sort();
        changes.left.sort();
        changes
    }

    /// Next-question: every mirror, annotation layer, and reviewed flag
    /// starts over.
    pub fn reset_for_next_question(&mut self) {
        for entry in self.students.values_mut() {
            entry.board.reset();
            entry.annotations.clear();
            entry.reviewed = false;
            entry.awaiting_sync = false;
        }
    }
}
