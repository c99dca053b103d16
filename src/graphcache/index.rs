//! Lookup accelerator over the live branches of a [super::GraphCache].
//!
//! Holds nothing the cache does not already know: every entry is derived from a stored branch
//! whose endpoints are not deleted. Dropping the index and rebuilding it from the cache yields the
//! same lookups.

use std::collections::BTreeMap;

use crate::properties::{Branch, BranchId, NoteId};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BranchIndex {
    /// parent -> child -> branch
    children: BTreeMap<NoteId, BTreeMap<NoteId, BranchId>>,
    /// child -> parent -> branch
    parents: BTreeMap<NoteId, BTreeMap<NoteId, BranchId>>,
    branches: BTreeMap<BranchId, Branch>,
}

impl BranchIndex {
    pub fn from_branches<'a, I: IntoIterator<Item = &'a Branch>>(branches: I) -> Self {
        let mut index = BranchIndex::default();
        for branch in branches {
            index.insert(branch.clone());
        }
        index
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn clear(&mut self) {
        self.children.clear();
        self.parents.clear();
        self.branches.clear();
    }

    pub fn contains(&self, branch_id: &str) -> bool {
        self.branches.contains_key(branch_id)
    }

    pub fn get_branch_id(&self, parent_note_id: &str, note_id: &str) -> Option<&BranchId> {
        self.children
            .get(parent_note_id)
            .and_then(|children| children.get(note_id))
    }

    pub fn get_branch(&self, branch_id: &str) -> Option<&Branch> {
        self.branches.get(branch_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    /// Branches pointing at `note_id`, ordered by (ordering key, parent id).
    pub fn parent_branches(&self, note_id: &str) -> Vec<&Branch> {
        let mut branches = self
            .parents
            .get(note_id)
            .map(|parents| self.resolve_all(parents.values()))
            .unwrap_or_default();
        branches.sort_by(|a, b| {
            a.note_position
                .cmp(&b.note_position)
                .then_with(|| a.parent_note_id.cmp(&b.parent_note_id))
        });
        branches
    }

    /// Branches leaving `parent_note_id`, ordered by (ordering key, child id).
    pub fn child_branches(&self, parent_note_id: &str) -> Vec<&Branch> {
        let mut branches = self
            .children
            .get(parent_note_id)
            .map(|children| self.resolve_all(children.values()))
            .unwrap_or_default();
        branches.sort_by(|a, b| {
            a.note_position
                .cmp(&b.note_position)
                .then_with(|| a.note_id.cmp(&b.note_id))
        });
        branches
    }

    pub fn parent_count(&self, note_id: &str) -> usize {
        self.parents.get(note_id).map(|p| p.len()).unwrap_or(0)
    }

    /// Index `branch`, replacing any entry with the same branch id or the same (parent, child)
    /// pair. Returns the entries it displaced.
    pub fn insert(&mut self, branch: Branch) -> Vec<Branch> {
        let mut displaced = Vec::new();
        if let Some(old) = self.remove(branch.branch_id.as_str()) {
            if old != branch {
                displaced.push(old);
            }
        }
        if let Some(other_id) = self
            .get_branch_id(branch.parent_note_id.as_str(), branch.note_id.as_str())
            .cloned()
        {
            tracing::warn!(
                "Branch {} replaces {} for pair ({}, {})",
                branch.branch_id,
                other_id,
                branch.parent_note_id,
                branch.note_id
            );
            if let Some(old) = self.remove(other_id.as_str()) {
                displaced.push(old);
            }
        }
        self.children
            .entry(branch.parent_note_id.clone())
            .or_default()
            .insert(branch.note_id.clone(), branch.branch_id.clone());
        self.parents
            .entry(branch.note_id.clone())
            .or_default()
            .insert(branch.parent_note_id.clone(), branch.branch_id.clone());
        self.branches.insert(branch.branch_id.clone(), branch);
        displaced
    }

    pub fn remove(&mut self, branch_id: &str) -> Option<Branch> {
        let branch = self.branches.remove(branch_id)?;
        if let Some(children) = self.children.get_mut(&branch.parent_note_id) {
            children.remove(&branch.note_id);
            if children.is_empty() {
                self.children.remove(&branch.parent_note_id);
            }
        }
        if let Some(parents) = self.parents.get_mut(&branch.note_id) {
            parents.remove(&branch.parent_note_id);
            if parents.is_empty() {
                self.parents.remove(&branch.note_id);
            }
        }
        Some(branch)
    }

    fn resolve_all<'a, I: Iterator<Item = &'a BranchId>>(&'a self, ids: I) -> Vec<&'a Branch> {
        ids.filter_map(|id| self.branches.get(id)).collect()
    }
}
