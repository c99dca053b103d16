//! Note and branch snapshots mirrored from the server.
//!
//! A [Note] is a vertex, a [Branch] is the only representation of a parent -> child edge. A note
//! reachable through more than one branch is a clone. Both are immutable snapshots: an update for
//! the same identifier replaces the stored value wholesale.

use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    fmt::{Display, Formatter},
};

/// Identifier of the root sentinel note. Every resolvable path terminates at it.
pub const ROOT_NOTE_ID: &str = "root";

#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        NoteId(id.into())
    }

    pub fn root() -> Self {
        NoteId(ROOT_NOTE_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NoteId {
    fn from(id: &str) -> Self {
        NoteId(id.to_string())
    }
}

impl From<String> for NoteId {
    fn from(id: String) -> Self {
        NoteId(id)
    }
}

impl Borrow<str> for NoteId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NoteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for NoteId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NoteId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        BranchId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BranchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BranchId {
    fn from(id: &str) -> Self {
        BranchId(id.to_string())
    }
}

impl From<String> for BranchId {
    fn from(id: String) -> Self {
        BranchId(id)
    }
}

impl Borrow<str> for BranchId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub note_id: NoteId,
    pub title: String,
    #[serde(default)]
    pub is_protected: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// Incoming branches as the server knew them when the snapshot was taken. Used to hydrate the
    /// cache on a fetch; live parent lookups go through the branch index instead.
    #[serde(default)]
    pub parent_branch_ids: Vec<BranchId>,
}

impl Note {
    pub fn new<I: Into<NoteId>, T: Into<String>>(note_id: I, title: T) -> Self {
        Note {
            note_id: note_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn root() -> Self {
        Note::new(NoteId::root(), ROOT_NOTE_ID)
    }

    pub fn with_parents<I: IntoIterator<Item = BranchId>>(mut self, branch_ids: I) -> Self {
        self.parent_branch_ids = branch_ids.into_iter().collect();
        self
    }

    /// Returns a copy of this snapshot flagged as deleted.
    pub fn deleted(&self) -> Self {
        Note {
            is_deleted: true,
            ..self.clone()
        }
    }
}

impl Display for Note {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.note_id, self.title)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub branch_id: BranchId,
    pub parent_note_id: NoteId,
    pub note_id: NoteId,
    /// Sibling ordering key. Lower sorts first.
    #[serde(default)]
    pub note_position: i64,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Branch {
    pub fn new<B, P, C>(branch_id: B, parent_note_id: P, note_id: C, note_position: i64) -> Self
    where
        B: Into<BranchId>,
        P: Into<NoteId>,
        C: Into<NoteId>,
    {
        Branch {
            branch_id: branch_id.into(),
            parent_note_id: parent_note_id.into(),
            note_id: note_id.into(),
            note_position,
            prefix: None,
        }
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The ordered (parent, child) pair this branch connects.
    pub fn pair(&self) -> (NoteId, NoteId) {
        (self.parent_note_id.clone(), self.note_id.clone())
    }

    pub fn touches(&self, note_id: &NoteId) -> bool {
        &self.parent_note_id == note_id || &self.note_id == note_id
    }
}

impl Display for Branch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} -> {} @ {})",
            self.branch_id, self.parent_note_id, self.note_id, self.note_position
        )
    }
}
