//! Fetch-on-demand access to the authoritative note store.

use std::{future::Future, sync::Arc};

use crate::{
    error::NoteGraphError,
    graphcache::NoteGraph,
    properties::{Branch, BranchId, Note, NoteId},
};

/// Server side of the on-demand fetch channel. [crate::graphcache::GraphCache] calls it on a
/// cache miss.
///
/// Implementations report unknown identifiers as [NoteGraphError::NotFound]. A returned note's
/// `parent_branch_ids` should list its incoming branches so the cache can hydrate them.
pub trait NoteSource: Send + Sync {
    fn fetch_note(
        &self,
        note_id: &NoteId,
    ) -> impl Future<Output = Result<Note, NoteGraphError>> + Send;

    fn fetch_branch(
        &self,
        branch_id: &BranchId,
    ) -> impl Future<Output = Result<Branch, NoteGraphError>> + Send;
}

/// A source that knows nothing. Every lookup misses, so the cache only ever serves what it was
/// seeded with or what the sync channel delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSource;

impl NoteSource for DetachedSource {
    fn fetch_note(
        &self,
        note_id: &NoteId,
    ) -> impl Future<Output = Result<Note, NoteGraphError>> + Send {
        let err = NoteGraphError::NotFound(format!("note {note_id} (detached source)"));
        async move { Err(err) }
    }

    fn fetch_branch(
        &self,
        branch_id: &BranchId,
    ) -> impl Future<Output = Result<Branch, NoteGraphError>> + Send {
        let err = NoteGraphError::NotFound(format!("branch {branch_id} (detached source)"));
        async move { Err(err) }
    }
}

/// Serves snapshots out of an in-memory graph. The note's `parent_branch_ids` are recomputed from
/// the graph's branches so the answer is always consistent with it.
impl NoteSource for NoteGraph {
    fn fetch_note(
        &self,
        note_id: &NoteId,
    ) -> impl Future<Output = Result<Note, NoteGraphError>> + Send {
        let result = match self.notes.get(note_id) {
            Some(note) => Ok(note.clone().with_parents(
                self.parent_branches(note_id.as_str())
                    .into_iter()
                    .map(|branch| branch.branch_id.clone()),
            )),
            None => Err(NoteGraphError::NotFound(format!("note {note_id}"))),
        };
        async move { result }
    }

    fn fetch_branch(
        &self,
        branch_id: &BranchId,
    ) -> impl Future<Output = Result<Branch, NoteGraphError>> + Send {
        let result = self
            .branches
            .get(branch_id)
            .cloned()
            .ok_or_else(|| NoteGraphError::NotFound(format!("branch {branch_id}")));
        async move { result }
    }
}

impl<S: NoteSource> NoteSource for Arc<S> {
    fn fetch_note(
        &self,
        note_id: &NoteId,
    ) -> impl Future<Output = Result<Note, NoteGraphError>> + Send {
        self.as_ref().fetch_note(note_id)
    }

    fn fetch_branch(
        &self,
        branch_id: &BranchId,
    ) -> impl Future<Output = Result<Branch, NoteGraphError>> + Send {
        self.as_ref().fetch_branch(branch_id)
    }
}
