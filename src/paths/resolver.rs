//! Validation and repair of note paths against the cached graph.
//!
//! A path is checked from its target note upward: each segment must be a live parent of the
//! segment below it. At the first segment that is not, the remainder is replaced by a fallback
//! route to root through the note's first live parent, and resolution stops there. Whatever was
//! already accepted below the break is kept verbatim.

use std::{collections::BTreeSet, future::Future, sync::Arc};

use crate::{
    config::NoteGraphConfig,
    error::NoteGraphError,
    graphcache::GraphCache,
    paths::notepath::{join_segments, NotePath},
    properties::{Branch, BranchId, Note, NoteId},
    source::NoteSource,
};

pub struct PathResolver<S> {
    cache: Arc<GraphCache<S>>,
    config: NoteGraphConfig,
}

impl<S: NoteSource + 'static> PathResolver<S> {
    pub fn new(cache: Arc<GraphCache<S>>, config: NoteGraphConfig) -> Self {
        PathResolver { cache, config }
    }

    pub fn cache(&self) -> &GraphCache<S> {
        &self.cache
    }

    pub fn config(&self) -> &NoteGraphConfig {
        &self.config
    }

    /// Resolve `raw_path` to a root-first sequence of note ids consistent with the current graph.
    pub async fn resolve_to_segments(
        &self,
        raw_path: &str,
    ) -> Result<Vec<NoteId>, NoteGraphError> {
        let path = NotePath::parse(raw_path, &self.config)?;
        self.with_stale_retry(raw_path, || self.resolve_once(raw_path, &path))
            .await
    }

    /// [Self::resolve_to_segments] joined with the path separator, or `None` when no path is
    /// available. The failure is logged.
    pub async fn resolve_path(&self, raw_path: &str) -> Option<String> {
        self.try_resolve_to_segments(raw_path)
            .await
            .map(|segments| join_segments(&segments, self.config.path_separator))
    }

    pub async fn try_resolve_to_segments(&self, raw_path: &str) -> Option<Vec<NoteId>> {
        match self.resolve_to_segments(raw_path).await {
            Ok(segments) => Some(segments),
            Err(e) => {
                log_failure(raw_path, &e);
                None
            }
        }
    }

    /// Some valid route from root to `note_id`, following the first parent of every note.
    pub async fn get_any_valid_segments(
        &self,
        note_id: &NoteId,
    ) -> Result<Vec<NoteId>, NoteGraphError> {
        let nothing_excluded = BTreeSet::new();
        self.with_stale_retry(note_id.as_str(), || {
            self.walk_to_root(note_id, &nothing_excluded)
        })
        .await
    }

    pub async fn get_any_valid_path(&self, note_id: &NoteId) -> Result<String, NoteGraphError> {
        let segments = self.get_any_valid_segments(note_id).await?;
        Ok(join_segments(&segments, self.config.path_separator))
    }

    pub async fn try_get_any_valid_path(&self, note_id: &NoteId) -> Option<String> {
        match self.get_any_valid_path(note_id).await {
            Ok(path) => Some(path),
            Err(e) => {
                log_failure(note_id.as_str(), &e);
                None
            }
        }
    }

    pub fn get_branch_id(&self, parent_note_id: &str, note_id: &str) -> Option<BranchId> {
        self.cache.get_branch_id(parent_note_id, note_id)
    }

    /// Human readable rendering of the resolved form of `raw_path`: titles joined by `" / "`, a
    /// branch prefix shown as `"<prefix> - <title>"`. Root is left out unless it is the target.
    pub async fn get_path_title(&self, raw_path: &str) -> Result<String, NoteGraphError> {
        let segments = self.resolve_to_segments(raw_path).await?;
        let root = &self.config.root_note_id;
        if segments.len() == 1 {
            return Ok(self.cache.get_note(&segments[0]).await?.title);
        }
        let mut titles = Vec::with_capacity(segments.len() - 1);
        for pair in segments.windows(2) {
            let (parent_id, note_id) = (&pair[0], &pair[1]);
            if note_id == root {
                continue;
            }
            let note = self.cache.get_note(note_id).await?;
            let prefix = self
                .cache
                .get_branch_id(parent_id.as_str(), note_id.as_str())
                .and_then(|branch_id| self.cache.get_branch(branch_id.as_str()))
                .and_then(|branch| branch.prefix)
                .filter(|prefix| !prefix.is_empty());
            titles.push(match prefix {
                Some(prefix) => format!("{prefix} - {}", note.title),
                None => note.title,
            });
        }
        Ok(titles.join(" / "))
    }

    /// Run `attempt`, and run it again from scratch if the cache revision moved while it was in
    /// progress. Gives up with [NoteGraphError::StaleCache] once the retries are spent.
    async fn with_stale_retry<T, F, Fut>(
        &self,
        subject: &str,
        attempt: F,
    ) -> Result<T, NoteGraphError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, NoteGraphError>>,
    {
        let mut retries_left = self.config.stale_retries;
        loop {
            let start = self.cache.revision();
            let result = attempt().await;
            let end = self.cache.revision();
            if start == end {
                return result;
            }
            if let Err(e) = &result {
                if !e.is_retryable() {
                    return result;
                }
            }
            if retries_left == 0 {
                let e = NoteGraphError::StaleCache(format!(
                    "'{subject}': cache moved from r{start} to r{end} during resolution"
                ));
                tracing::error!("[PathResolver] {e}");
                return Err(e);
            }
            retries_left -= 1;
            tracing::debug!(
                "[PathResolver] cache moved from r{start} to r{end} while resolving '{subject}', retrying"
            );
        }
    }

    async fn live_note(&self, note_id: &NoteId) -> Result<Note, NoteGraphError> {
        let note = self.cache.get_note(note_id).await?;
        if note.is_deleted {
            return Err(NoteGraphError::NotFound(format!("note {note} is deleted")));
        }
        Ok(note)
    }

    async fn resolve_once(
        &self,
        raw_path: &str,
        path: &NotePath,
    ) -> Result<Vec<NoteId>, NoteGraphError> {
        let root = &self.config.root_note_id;
        let mut candidates = path.child_to_root(root).into_iter();
        let Some(target) = candidates.next() else {
            return Err(NoteGraphError::InvalidInput(format!(
                "note path '{raw_path}' has no segments"
            )));
        };
        if &target == root {
            return Ok(vec![target]);
        }
        self.live_note(&target).await?;

        // child -> root order while walking
        let mut accepted = vec![target];
        for candidate in candidates {
            let child_id = accepted[accepted.len() - 1].clone();
            let child = self.cache.get_note(&child_id).await?;
            if self.is_live_parent(&child_id, &candidate).await? {
                let reached_root = &candidate == root;
                accepted.push(candidate);
                if reached_root {
                    break;
                }
                continue;
            }

            // read after the candidate fetch, which may have dropped a deleted parent
            let parents = self.cache.get_parent_branches(child_id.as_str());
            if parents.is_empty() {
                let e = NoteGraphError::Orphan(format!(
                    "no parents found for {child} while resolving '{raw_path}'"
                ));
                tracing::error!("[PathResolver] {e}");
                return Err(e);
            }

            let broken = NoteGraphError::BrokenPath(format!(
                "{candidate} is not a parent of {child}, available parents: {}",
                parents
                    .iter()
                    .map(|b| b.parent_note_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            tracing::info!("[PathResolver] repairing '{raw_path}': {broken}");
            let prefix = self.repair_prefix(&child_id, &parents, &accepted).await?;
            return Ok(prefix.into_iter().chain(accepted.into_iter().rev()).collect());
        }

        if accepted.last() != Some(root) {
            let e = NoteGraphError::Orphan(format!("'{raw_path}' never reached {root}"));
            tracing::error!("[PathResolver] {e}");
            return Err(e);
        }
        accepted.reverse();
        Ok(accepted)
    }

    /// Root-first route ending at one of `parents`, tried in order. Notes in `accepted` may not
    /// appear on it. Surfaces the first parent's failure if none works.
    async fn repair_prefix(
        &self,
        child_id: &NoteId,
        parents: &[Branch],
        accepted: &[NoteId],
    ) -> Result<Vec<NoteId>, NoteGraphError> {
        let excluded = accepted.iter().cloned().collect::<BTreeSet<_>>();
        let mut first_failure = None;
        for branch in parents {
            match self.walk_to_root(&branch.parent_note_id, &excluded).await {
                Ok(prefix) => return Ok(prefix),
                Err(e) => {
                    tracing::debug!(
                        "[PathResolver] fallback through {} for {child_id} failed: {e}",
                        branch.parent_note_id
                    );
                    first_failure.get_or_insert(e);
                }
            }
        }
        Err(first_failure.unwrap_or_else(|| {
            NoteGraphError::Orphan(format!("no parents found for {child_id}"))
        }))
    }

    /// Follow the first parent of each note from `start` up to root. Returns the route root-first.
    /// Visiting any note twice, or any note in `excluded`, is a cycle.
    async fn walk_to_root(
        &self,
        start: &NoteId,
        excluded: &BTreeSet<NoteId>,
    ) -> Result<Vec<NoteId>, NoteGraphError> {
        let root = &self.config.root_note_id;
        let mut visited = BTreeSet::new();
        let mut route = Vec::new();
        let mut current = start.clone();
        loop {
            if excluded.contains(&current) || !visited.insert(current.clone()) {
                let e = NoteGraphError::Cycle(format!(
                    "{current} revisited after {} steps walking up from {start}",
                    route.len()
                ));
                tracing::error!("[PathResolver] {e}");
                return Err(e);
            }
            route.push(current.clone());
            if &current == root {
                break;
            }
            if route.len() > self.config.max_walk_depth {
                let e = NoteGraphError::Cycle(format!(
                    "walk up from {start} exceeded {} notes",
                    self.config.max_walk_depth
                ));
                tracing::error!("[PathResolver] {e}");
                return Err(e);
            }
            let note = self.live_note(&current).await?;
            let Some(first) = self.first_live_parent(&current).await? else {
                let e = NoteGraphError::Orphan(format!(
                    "can't find parents for {note} walking up from {start}"
                ));
                tracing::error!("[PathResolver] {e}");
                return Err(e);
            };
            current = first;
        }
        route.reverse();
        Ok(route)
    }

    /// Whether `parent_id` is still a live parent of `child_id` once fetched. A parent that turns
    /// out deleted (or gone) on fetch takes its edge out of the index.
    async fn is_live_parent(
        &self,
        child_id: &NoteId,
        parent_id: &NoteId,
    ) -> Result<bool, NoteGraphError> {
        let indexed = || {
            self.cache
                .get_branch_id(parent_id.as_str(), child_id.as_str())
                .is_some()
        };
        if !indexed() {
            return Ok(false);
        }
        if parent_id == &self.config.root_note_id {
            return Ok(true);
        }
        match self.cache.get_note(parent_id).await {
            Ok(parent) if parent.is_deleted => {
                tracing::debug!("[PathResolver] parent {parent} of {child_id} is deleted");
                Ok(false)
            }
            Ok(_) => Ok(indexed()),
            Err(NoteGraphError::NotFound(msg)) => {
                tracing::debug!("[PathResolver] parent of {child_id} is gone: {msg}");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// The first parent of `note_id`, in ordering key order, that is live once fetched.
    async fn first_live_parent(&self, note_id: &NoteId) -> Result<Option<NoteId>, NoteGraphError> {
        for branch in self.cache.get_parent_branches(note_id.as_str()) {
            if self.is_live_parent(note_id, &branch.parent_note_id).await? {
                return Ok(Some(branch.parent_note_id));
            }
        }
        Ok(None)
    }
}

fn log_failure(subject: &str, e: &NoteGraphError) {
    match e {
        NoteGraphError::InvalidInput(_) | NoteGraphError::NotFound(_) => {
            tracing::warn!("[PathResolver] no path for '{subject}': {e}")
        }
        _ => tracing::error!("[PathResolver] no path for '{subject}': {e}"),
    }
}
