//! Shared test utilities for cache, resolver and sync tests

use crate::{
    config::NoteGraphConfig,
    error::NoteGraphError,
    event::{ChangeOperation, ChangeRecord},
    graphcache::{GraphCache, NoteGraph},
    paths::PathResolver,
    properties::{Branch, BranchId, Note, NoteId},
    source::{DetachedSource, NoteSource},
};
use parking_lot::RwLock;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock, Weak,
    },
    time::Duration,
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// root -> A (0), root -> C (1), A -> B (0)
pub fn scenario_graph() -> NoteGraph {
    NoteGraph::from_parts(
        [
            Note::root(),
            Note::new("A", "Alpha"),
            Note::new("B", "Beta"),
            Note::new("C", "Gamma"),
        ],
        [
            Branch::new("root_A", "root", "A", 0),
            Branch::new("root_C", "root", "C", 1),
            Branch::new("A_B", "A", "B", 0),
        ],
    )
}

pub fn ids(path: &[&str]) -> Vec<NoteId> {
    path.iter().map(|id| NoteId::from(*id)).collect()
}

pub fn detached_resolver(graph: NoteGraph) -> PathResolver<DetachedSource> {
    init_logging();
    PathResolver::new(
        Arc::new(GraphCache::with_graph(DetachedSource, graph)),
        NoteGraphConfig::default(),
    )
}

pub fn create_branch(sequence: u64, branch: Branch) -> ChangeRecord {
    ChangeRecord::branch(sequence, ChangeOperation::Created, branch)
}

pub fn delete_branch(sequence: u64, branch: Branch) -> ChangeRecord {
    ChangeRecord::branch(sequence, ChangeOperation::Deleted, branch)
}

pub fn create_note(sequence: u64, note: Note) -> ChangeRecord {
    ChangeRecord::note(sequence, ChangeOperation::Created, note)
}

/// Server stand-in that counts fetches and answers after a short delay.
pub struct CountingSource {
    pub graph: RwLock<NoteGraph>,
    pub note_fetches: AtomicUsize,
    pub branch_fetches: AtomicUsize,
    pub delay: Duration,
}

impl CountingSource {
    pub fn new(graph: NoteGraph) -> Self {
        CountingSource {
            graph: RwLock::new(graph),
            note_fetches: AtomicUsize::new(0),
            branch_fetches: AtomicUsize::new(0),
            delay: Duration::from_millis(5),
        }
    }

    pub fn note_fetches(&self) -> usize {
        self.note_fetches.load(Ordering::SeqCst)
    }

    pub fn branch_fetches(&self) -> usize {
        self.branch_fetches.load(Ordering::SeqCst)
    }
}

impl NoteSource for CountingSource {
    fn fetch_note(
        &self,
        note_id: &NoteId,
    ) -> impl Future<Output = Result<Note, NoteGraphError>> + Send {
        self.note_fetches.fetch_add(1, Ordering::SeqCst);
        let graph = self.graph.read().clone();
        let note_id = note_id.clone();
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            graph.fetch_note(&note_id).await
        }
    }

    fn fetch_branch(
        &self,
        branch_id: &BranchId,
    ) -> impl Future<Output = Result<Branch, NoteGraphError>> + Send {
        self.branch_fetches.fetch_add(1, Ordering::SeqCst);
        let graph = self.graph.read().clone();
        let branch_id = branch_id.clone();
        async move { graph.fetch_branch(&branch_id).await }
    }
}

/// Server stand-in that pushes an unrelated note into the cache every time it serves a note
/// fetch, so any resolution that fetches sees the revision move underneath it.
pub struct MeddlingSource {
    pub graph: NoteGraph,
    pub cache: OnceLock<Weak<GraphCache<MeddlingSource>>>,
    pub meddled: AtomicUsize,
}

impl MeddlingSource {
    pub fn attach(graph: NoteGraph) -> Arc<GraphCache<MeddlingSource>> {
        let cache = Arc::new(GraphCache::new(MeddlingSource {
            graph,
            cache: OnceLock::new(),
            meddled: AtomicUsize::new(0),
        }));
        cache.source().cache.set(Arc::downgrade(&cache)).ok();
        cache
    }
}

impl NoteSource for MeddlingSource {
    fn fetch_note(
        &self,
        note_id: &NoteId,
    ) -> impl Future<Output = Result<Note, NoteGraphError>> + Send {
        if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
            let n = self.meddled.fetch_add(1, Ordering::SeqCst);
            cache.apply_change(&create_note(0, Note::new(format!("noise{n}"), "noise")));
        }
        self.graph.fetch_note(note_id)
    }

    fn fetch_branch(
        &self,
        branch_id: &BranchId,
    ) -> impl Future<Output = Result<Branch, NoteGraphError>> + Send {
        self.graph.fetch_branch(branch_id)
    }
}
