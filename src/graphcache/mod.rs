//! GraphCache module: the client-side mirror of the server's note hierarchy.
//!
//! # Module Organization
//!
//! - [`graph`]: Serializable snapshots ([NoteGraph]) and the petgraph view used for diagnostics
//! - [`index`]: [BranchIndex], the derived (parent, child) -> branch lookup
//! - [`base`]: [GraphCache] itself: snapshot storage, on-demand fetch, atomic batch merge
//!
//! ```rust
//! use notegraph_core::graphcache::{GraphCache, NoteGraph};
//! use notegraph_core::source::DetachedSource;
//!
//! let cache = GraphCache::with_graph(DetachedSource, NoteGraph::default());
//! assert_eq!(cache.revision(), 0);
//! ```

mod base;
pub mod graph;
mod index;


pub use base::{CacheUpdate, FetchedNote, GraphCache, GraphDiagnostic};
pub use graph::{NoteGraph, NoteSubGraph};
pub use index::BranchIndex;
