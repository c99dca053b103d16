//! Serializable graph snapshots.
//!
//! [NoteGraph] carries a full set of notes and branches. It seeds a [super::GraphCache], travels
//! over the wire as a full replay, and is what [super::GraphCache::export] hands back.

use petgraph::{algo::kosaraju_scc, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::properties::{Branch, BranchId, Note, NoteId};

/// Parent -> child view over a set of branches, weighted by ordering key.
pub type NoteSubGraph<'a> = DiGraphMap<&'a str, i64>;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteGraph {
    #[serde(default)]
    pub notes: BTreeMap<NoteId, Note>,
    #[serde(default)]
    pub branches: BTreeMap<BranchId, Branch>,
}

impl NoteGraph {
    pub fn new() -> Self {
        NoteGraph::default()
    }

    pub fn from_parts<N, B>(notes: N, branches: B) -> Self
    where
        N: IntoIterator<Item = Note>,
        B: IntoIterator<Item = Branch>,
    {
        let mut graph = NoteGraph::default();
        for note in notes {
            graph.insert_note(note);
        }
        for branch in branches {
            graph.insert_branch(branch);
        }
        graph
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.branches.is_empty()
    }

    pub fn insert_note(&mut self, note: Note) -> Option<Note> {
        self.notes.insert(note.note_id.clone(), note)
    }

    pub fn insert_branch(&mut self, branch: Branch) -> Option<Branch> {
        self.branches.insert(branch.branch_id.clone(), branch)
    }

    pub fn remove_branch(&mut self, branch_id: &str) -> Option<Branch> {
        self.branches.remove(branch_id)
    }

    /// Branches whose child is `note_id`, in sibling order.
    pub fn parent_branches(&self, note_id: &str) -> Vec<&Branch> {
        let mut parents = self
            .branches
            .values()
            .filter(|branch| branch.note_id == note_id)
            .collect::<Vec<_>>();
        parents.sort_by(|a, b| {
            a.note_position
                .cmp(&b.note_position)
                .then_with(|| a.parent_note_id.cmp(&b.parent_note_id))
        });
        parents
    }

    pub fn as_subgraph(&self) -> NoteSubGraph<'_> {
        as_subgraph(self.branches.values())
    }

    pub fn display_contents(&self) -> String {
        let edges = self
            .branches
            .values()
            .map(|branch| {
                let title = |id: &NoteId| {
                    self.notes
                        .get(id)
                        .map(|note| note.title.clone())
                        .unwrap_or_else(|| id.to_string())
                };
                format!(
                    "{} -> {} ({})",
                    title(&branch.parent_note_id),
                    title(&branch.note_id),
                    branch.note_position
                )
            })
            .collect::<Vec<_>>();
        format!(
            "notes:\n{}\nbranches:\n{}",
            self.notes
                .values()
                .map(|note| format!("  {note}"))
                .collect::<Vec<_>>()
                .join("\n"),
            edges
                .iter()
                .map(|edge| format!("  {edge}"))
                .collect::<Vec<_>>()
                .join("\n")
        )
    }
}

impl fmt::Display for NoteGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NoteGraph({} notes, {} branches)",
            self.notes.len(),
            self.branches.len()
        )
    }
}

pub fn as_subgraph<'a, I>(branches: I) -> NoteSubGraph<'a>
where
    I: IntoIterator<Item = &'a Branch>,
{
    NoteSubGraph::from_edges(branches.into_iter().map(|branch| {
        (
            branch.parent_note_id.as_str(),
            branch.note_id.as_str(),
            branch.note_position,
        )
    }))
}

/// Strongly connected components of more than one note, plus self loops, that do not include
/// `root`. Each component is sorted by note id.
pub fn find_cycles<'a, I>(branches: I, root: &str) -> Vec<Vec<NoteId>>
where
    I: IntoIterator<Item = &'a Branch>,
{
    let subgraph = as_subgraph(branches);
    let mut cycles = kosaraju_scc(&subgraph)
        .into_iter()
        .filter(|component| {
            component.len() > 1
                || component
                    .first()
                    .is_some_and(|node| subgraph.contains_edge(*node, *node))
        })
        .filter(|component| !component.iter().any(|node| *node == root))
        .map(|component| {
            let mut ids = component.into_iter().map(NoteId::from).collect::<Vec<_>>();
            ids.sort();
            ids
        })
        .collect::<Vec<_>>();
    cycles.sort();
    cycles
}
