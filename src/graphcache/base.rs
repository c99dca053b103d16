//! GraphCache: the in-memory mirror of server notes and branches.
//!
//! Notes and branches are stored as whole snapshots keyed by identifier. The [BranchIndex] is
//! derived from them and kept in step on every mutation. All mutation happens under a single
//! write lock so readers see either the whole of a batch or none of it.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedReceiver;

use super::{graph::find_cycles, BranchIndex, NoteGraph};
use crate::{
    error::NoteGraphError,
    event::{ChangeOperation, ChangeRecord, Entity, Event, EventBus, NoteChange},
    properties::{Branch, BranchId, Note, NoteId},
    source::NoteSource,
};

type SharedLock<T> = Arc<RwLock<T>>;

type PendingFetch = Shared<BoxFuture<'static, Result<Note, NoteGraphError>>>;

/// A note snapshot together with the incoming branches fetched alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedNote {
    pub note: Note,
    pub branches: Vec<Branch>,
}

/// One step of a batch handed to [GraphCache::apply_batch].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    Reset(NoteGraph),
    Change(ChangeRecord),
}

/// Structural problems found by [GraphCache::diagnostics].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphDiagnostic {
    /// A live, non-root note with no live parent branch.
    Orphan(NoteId),
    /// Notes forming a cycle that does not contain root.
    Cycle(Vec<NoteId>),
}

impl fmt::Display for GraphDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphDiagnostic::Orphan(note_id) => write!(f, "orphan note {note_id}"),
            GraphDiagnostic::Cycle(ids) => write!(
                f,
                "cycle through {}",
                ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct CacheState {
    notes: BTreeMap<NoteId, Note>,
    branches: BTreeMap<BranchId, Branch>,
    /// Branches removed by a change notification, keyed to the child note whose fetch could
    /// bring them back. Dropped once that child is cached with no fetch pending.
    removed_branches: BTreeMap<BranchId, NoteId>,
    index: BranchIndex,
    revision: u64,
}

impl CacheState {
    fn from_graph(graph: NoteGraph, revision: u64) -> Self {
        let mut state = CacheState {
            notes: graph.notes,
            branches: graph.branches,
            revision,
            ..Default::default()
        };
        state.rebuild_index();
        state
    }

    /// Unknown notes count as live: they may simply not have been fetched yet.
    fn is_live(&self, note_id: &NoteId) -> bool {
        !self.notes.get(note_id).is_some_and(|note| note.is_deleted)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        let live = self
            .branches
            .values()
            .filter(|b| self.is_live(&b.parent_note_id) && self.is_live(&b.note_id))
            .cloned()
            .collect::<Vec<_>>();
        for branch in live {
            self.index.insert(branch);
        }
    }

    fn index_branch(&mut self, branch: &Branch) {
        if self.is_live(&branch.parent_note_id) && self.is_live(&branch.note_id) {
            self.index.insert(branch.clone());
        } else {
            self.index.remove(branch.branch_id.as_str());
        }
    }

    /// Re-derive the index entries of every stored branch touching `note_id`. Returns the ids of
    /// the children on the other end, whose paths just changed.
    fn reindex_note(&mut self, note_id: &NoteId) -> Vec<NoteId> {
        let touching = self
            .branches
            .values()
            .filter(|branch| branch.touches(note_id))
            .cloned()
            .collect::<Vec<_>>();
        let mut children = Vec::new();
        for branch in touching.iter() {
            self.index_branch(branch);
            if &branch.parent_note_id == note_id {
                children.push(branch.note_id.clone());
            }
        }
        children
    }

    fn note_change(&self, note_id: &NoteId) -> Event {
        Event::NoteChanged(NoteChange {
            note_id: note_id.clone(),
            is_deleted: !self.is_live(note_id),
        })
    }

    /// Merge one change. Returns `None` when the change leaves the state as it was, otherwise the
    /// events describing what moved.
    fn apply(&mut self, change: &ChangeRecord) -> Option<Vec<Event>> {
        let events = match (&change.entity, change.operation) {
            (Entity::Note(note), ChangeOperation::Created | ChangeOperation::Updated) => {
                self.upsert_note(note.clone())
            }
            (Entity::Note(note), ChangeOperation::Deleted) => {
                let tombstone = self
                    .notes
                    .get(&note.note_id)
                    .map(|stored| stored.deleted())
                    .unwrap_or_else(|| note.deleted());
                self.upsert_note(tombstone)
            }
            (Entity::Branch(branch), ChangeOperation::Created | ChangeOperation::Updated) => {
                self.upsert_branch(branch.clone())
            }
            (Entity::Branch(branch), ChangeOperation::Deleted) => self.remove_branch(branch),
        }?;
        self.revision += 1;
        Some(events)
    }

    fn upsert_note(&mut self, note: Note) -> Option<Vec<Event>> {
        if self.notes.get(&note.note_id) == Some(&note) {
            return None;
        }
        let note_id = note.note_id.clone();
        let was_live = self.is_live(&note_id);
        self.notes.insert(note_id.clone(), note);
        let mut events = vec![self.note_change(&note_id)];
        if was_live != self.is_live(&note_id) {
            for child in self.reindex_note(&note_id) {
                events.push(self.note_change(&child));
            }
        }
        Some(events)
    }

    fn upsert_branch(&mut self, branch: Branch) -> Option<Vec<Event>> {
        if self.branches.get(&branch.branch_id) == Some(&branch) {
            return None;
        }
        let mut events = Vec::new();
        if let Some(old) = self.branches.get(&branch.branch_id) {
            if old.note_id != branch.note_id {
                events.push(self.note_change(&old.note_id.clone()));
            }
        }
        self.removed_branches.remove(&branch.branch_id);
        self.branches
            .insert(branch.branch_id.clone(), branch.clone());
        self.index_branch(&branch);
        events.push(self.note_change(&branch.note_id));
        Some(events)
    }

    fn remove_branch(&mut self, removed: &Branch) -> Option<Vec<Event>> {
        let branch_id = &removed.branch_id;
        let child = self
            .branches
            .get(branch_id)
            .map(|stored| stored.note_id.clone())
            .unwrap_or_else(|| removed.note_id.clone());
        // tombstone even when never fetched, so a later fill can't bring it back
        self.removed_branches.insert(branch_id.clone(), child);
        let branch = self.branches.remove(branch_id)?;
        self.index.remove(branch_id.as_str());
        Some(vec![
            Event::BranchRemoved(branch_id.clone()),
            self.note_change(&branch.note_id),
        ])
    }

    /// Drop tombstones no fill can hit any more: the child is cached and `fetching` says no fetch
    /// for it is pending.
    fn prune_tombstones(&mut self, fetching: impl Fn(&NoteId) -> bool) {
        let notes = &self.notes;
        self.removed_branches
            .retain(|_, child| !notes.contains_key(child) || fetching(child));
    }

    /// Store a fetch result. Entries already present win: anything a change notification
    /// delivered is at least as new as the fetch.
    fn fill(&mut self, fetched: FetchedNote) -> Note {
        for branch in fetched.branches {
            if self.branches.contains_key(&branch.branch_id)
                || self.removed_branches.contains_key(&branch.branch_id)
            {
                continue;
            }
            self.branches
                .insert(branch.branch_id.clone(), branch.clone());
            self.index_branch(&branch);
        }
        let note_id = fetched.note.note_id.clone();
        // once cached the note is never fetched again, so its tombstones are spent
        self.removed_branches.retain(|_, child| child != &note_id);
        if !self.notes.contains_key(&note_id) {
            let is_deleted = fetched.note.is_deleted;
            self.notes.insert(note_id.clone(), fetched.note);
            if is_deleted {
                self.reindex_note(&note_id);
            }
        }
        self.notes
            .get(&note_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// In-memory mirror of the server's note graph.
///
/// Reads never fetch except [GraphCache::get_note], which suspends on a miss and shares a single
/// in-flight request per identifier between concurrent callers.
pub struct GraphCache<S> {
    source: Arc<S>,
    state: SharedLock<CacheState>,
    in_flight: Mutex<BTreeMap<NoteId, PendingFetch>>,
    events: EventBus,
}

impl<S> fmt::Debug for GraphCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("GraphCache")
            .field("notes", &state.notes.len())
            .field("branches", &state.branches.len())
            .field("live_branches", &state.index.len())
            .field("revision", &state.revision)
            .finish()
    }
}

impl<S> fmt::Display for GraphCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        write!(
            f,
            "GraphCache({} notes, {} branches, r{})",
            state.notes.len(),
            state.index.len(),
            state.revision
        )
    }
}

impl<S: NoteSource + 'static> GraphCache<S> {
    pub fn new(source: S) -> Self {
        GraphCache::with_graph(source, NoteGraph::default())
    }

    /// A cache seeded with `graph`, at revision 0.
    pub fn with_graph(source: S, graph: NoteGraph) -> Self {
        GraphCache {
            source: Arc::new(source),
            state: Arc::new(RwLock::new(CacheState::from_graph(graph, 0))),
            in_flight: Mutex::new(BTreeMap::new()),
            events: EventBus::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> UnboundedReceiver<Event> {
        self.events.subscribe()
    }

    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    pub fn note_count(&self) -> usize {
        self.state.read().notes.len()
    }

    pub fn branch_count(&self) -> usize {
        self.state.read().index.len()
    }

    /// Cached snapshot only, never fetches.
    pub fn cached_note(&self, note_id: &str) -> Option<Note> {
        self.state.read().notes.get(note_id).cloned()
    }

    /// Returns the cached note, fetching it (and its incoming branches) on a miss.
    ///
    /// Concurrent callers asking for the same missing id await the same request.
    pub async fn get_note(&self, note_id: &NoteId) -> Result<Note, NoteGraphError> {
        if let Some(note) = self.cached_note(note_id.as_str()) {
            return Ok(note);
        }
        let pending = self.pending_fetch(note_id);
        let result = pending.clone().await;
        self.finish_fetch(note_id, &pending);
        if let Err(e) = &result {
            tracing::debug!("[GraphCache::get_note] fetch of {note_id} failed: {e}");
        }
        result
    }

    /// Forget the in-flight entry for `note_id`, unless it already belongs to a newer fetch.
    pub(super) fn finish_fetch(&self, note_id: &NoteId, pending: &PendingFetch) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(note_id)
            .is_some_and(|current| current.ptr_eq(pending))
        {
            in_flight.remove(note_id);
        }
    }

    pub(super) fn pending_fetch(&self, note_id: &NoteId) -> PendingFetch {
        let mut in_flight = self.in_flight.lock();
        if let Some(pending) = in_flight.get(note_id) {
            tracing::debug!("[GraphCache] joining in-flight fetch for {note_id}");
            return pending.clone();
        }
        tracing::debug!("[GraphCache] cache miss, fetching {note_id}");
        let pending = fetch_hydrated(self.source.clone(), self.state.clone(), note_id.clone())
            .boxed()
            .shared();
        in_flight.insert(note_id.clone(), pending.clone());
        pending
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Deleted branches still guarded against being hydrated back by a fetch.
    pub fn tombstone_count(&self) -> usize {
        self.state.read().removed_branches.len()
    }

    /// Live parent branches of `note_id` from cached state, in (ordering key, parent id) order.
    pub fn get_parent_branches(&self, note_id: &str) -> Vec<Branch> {
        self.state
            .read()
            .index
            .parent_branches(note_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Live child branches of `parent_note_id`, in sibling order.
    pub fn get_child_branches(&self, parent_note_id: &str) -> Vec<Branch> {
        self.state
            .read()
            .index
            .child_branches(parent_note_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get_branch_id(&self, parent_note_id: &str, note_id: &str) -> Option<BranchId> {
        self.state
            .read()
            .index
            .get_branch_id(parent_note_id, note_id)
            .cloned()
    }

    pub fn get_branch(&self, branch_id: &str) -> Option<Branch> {
        self.state.read().index.get_branch(branch_id).cloned()
    }

    /// Whether `note_id` currently has more than one live parent.
    pub fn is_clone(&self, note_id: &str) -> bool {
        self.state.read().index.parent_count(note_id) > 1
    }

    /// Merge a single change record. Returns whether anything changed.
    pub fn apply_change(&self, change: &ChangeRecord) -> bool {
        self.apply_batch(vec![CacheUpdate::Change(change.clone())]) > 0
    }

    pub fn apply_changes(&self, changes: &[ChangeRecord]) -> usize {
        self.apply_batch(changes.iter().cloned().map(CacheUpdate::Change).collect())
    }

    /// Apply `updates` in order as one indivisible step: no reader observes a partial batch.
    /// Events are published after the write lock is released. Returns the number of updates that
    /// changed the cache.
    pub fn apply_batch(&self, updates: Vec<CacheUpdate>) -> usize {
        let mut effective = 0;
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            for update in updates {
                match update {
                    CacheUpdate::Reset(graph) => {
                        let revision = state.revision + 1;
                        *state = CacheState::from_graph(graph, revision);
                        tracing::debug!("[GraphCache] reset to r{revision}");
                        events.push(Event::CacheReset { revision });
                        effective += 1;
                    }
                    CacheUpdate::Change(change) => match state.apply(&change) {
                        Some(mut change_events) => {
                            tracing::debug!("[GraphCache] applied {change}");
                            events.append(&mut change_events);
                            effective += 1;
                        }
                        None => tracing::debug!("[GraphCache] no-op {change}"),
                    },
                }
            }
            // lock order is always state, then in_flight
            let in_flight = self.in_flight.lock();
            state.prune_tombstones(|note_id| in_flight.contains_key(note_id));
        }
        self.events.publish_all(events);
        effective
    }

    /// Replace the whole mirror with `graph`.
    pub fn reset(&self, graph: NoteGraph) {
        self.apply_batch(vec![CacheUpdate::Reset(graph)]);
    }

    pub fn export(&self) -> NoteGraph {
        let state = self.state.read();
        NoteGraph {
            notes: state.notes.clone(),
            branches: state.branches.clone(),
        }
    }

    /// Scan the live graph for orphans and for cycles not containing `root_note_id`. Each finding
    /// is also logged.
    pub fn diagnostics(&self, root_note_id: &str) -> Vec<GraphDiagnostic> {
        let state = self.state.read();
        let mut found = state
            .notes
            .values()
            .filter(|note| !note.is_deleted && note.note_id != root_note_id)
            .filter(|note| state.index.parent_count(note.note_id.as_str()) == 0)
            .map(|note| GraphDiagnostic::Orphan(note.note_id.clone()))
            .collect::<Vec<_>>();
        found.extend(
            find_cycles(state.index.iter(), root_note_id)
                .into_iter()
                .map(GraphDiagnostic::Cycle),
        );
        for diagnostic in found.iter() {
            tracing::warn!("[GraphCache::diagnostics] {diagnostic}");
        }
        found
    }
}

/// Fetch `note_id` with its missing incoming branches and store the result. Runs once per shared
/// fetch, however many callers await it.
async fn fetch_hydrated<S: NoteSource>(
    source: Arc<S>,
    state: SharedLock<CacheState>,
    note_id: NoteId,
) -> Result<Note, NoteGraphError> {
    let note = source.fetch_note(&note_id).await?;
    let missing = {
        let state = state.read();
        note.parent_branch_ids
            .iter()
            .filter(|id| {
                !state.branches.contains_key(*id) && !state.removed_branches.contains_key(*id)
            })
            .cloned()
            .collect::<Vec<_>>()
    };
    let mut branches = Vec::with_capacity(missing.len());
    for branch_id in missing {
        match source.fetch_branch(&branch_id).await {
            Ok(branch) => branches.push(branch),
            Err(NoteGraphError::NotFound(msg)) => {
                tracing::warn!("[GraphCache] parent branch of {note_id} vanished: {msg}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(state.write().fill(FetchedNote { note, branches }))
}
