use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{config::NoteGraphConfig, error::NoteGraphError, properties::NoteId};

/// Remove the UI-only tab disambiguator (everything from the first `delimiter`) and surrounding
/// whitespace.
pub fn strip_suffix(raw: &str, delimiter: char) -> &str {
    raw.split(delimiter).next().unwrap_or_default().trim()
}

pub fn join_segments(segments: &[NoteId], separator: char) -> String {
    segments
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

/// A raw note path after suffix stripping, as an ordered list of segments. Nothing here says the
/// segments form a valid chain of branches: see [super::PathResolver] for that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePath {
    segments: Vec<NoteId>,
}

impl NotePath {
    pub fn parse(raw: &str, config: &NoteGraphConfig) -> Result<NotePath, NoteGraphError> {
        let stripped = strip_suffix(raw, config.suffix_delimiter);
        if stripped.is_empty() {
            return Err(NoteGraphError::InvalidInput(format!(
                "empty note path '{raw}'"
            )));
        }
        let segments = stripped
            .split(config.path_separator)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(NoteId::from)
            .collect::<Vec<_>>();
        if segments.is_empty() {
            return Err(NoteGraphError::InvalidInput(format!(
                "note path '{raw}' has no segments"
            )));
        }
        Ok(NotePath { segments })
    }

    pub fn from_segments(segments: Vec<NoteId>) -> Self {
        NotePath { segments }
    }

    pub fn segments(&self) -> &[NoteId] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The target note: the last segment.
    pub fn note_id(&self) -> Option<&NoteId> {
        self.segments.last()
    }

    /// The segment right before the target, if the path names one.
    pub fn parent_note_id(&self) -> Option<&NoteId> {
        self.segments.iter().rev().nth(1)
    }

    /// Segments in child -> root order, with `root` appended unless the path already names it.
    pub fn child_to_root(&self, root: &NoteId) -> Vec<NoteId> {
        let mut reversed = self.segments.iter().rev().cloned().collect::<Vec<_>>();
        if !reversed.contains(root) {
            reversed.push(root.clone());
        }
        reversed
    }

    pub fn join(&self, separator: char) -> String {
        join_segments(&self.segments, separator)
    }
}

impl Display for NotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.join('/'))
    }
}

/// Target note of a raw path.
pub fn note_id_from_path(raw: &str, config: &NoteGraphConfig) -> Option<NoteId> {
    NotePath::parse(raw, config)
        .ok()
        .and_then(|path| path.note_id().cloned())
}

/// `(parent, note)` named by the last two segments of a raw path. A single-segment path is taken
/// to hang directly off root.
pub fn parent_and_note_id_from_path(
    raw: &str,
    config: &NoteGraphConfig,
) -> Option<(NoteId, NoteId)> {
    let path = NotePath::parse(raw, config).ok()?;
    let note_id = path.note_id()?.clone();
    let parent_note_id = path
        .parent_note_id()
        .cloned()
        .unwrap_or_else(|| config.root_note_id.clone());
    Some((parent_note_id, note_id))
}
