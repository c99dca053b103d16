//! # notegraph-core
//!
//! A client-side mirror of a note hierarchy in which a note may have several parents (clones),
//! and the machinery to keep note paths pointing somewhere real while that hierarchy changes
//! underneath them.
//!
//! ## Overview
//!
//! UI state (tabs, URLs) stores *note paths*: `root/A/B` names note `B` as reached through `A`.
//! Those strings go stale when notes are moved, cloned or deleted on the server. This crate keeps
//! an eventually consistent copy of the server's notes and branches and repairs stale paths
//! against it:
//!
//! - **[`graphcache`]**: the mirror itself ([`graphcache::GraphCache`]) plus the derived
//!   (parent, child) -> branch index. Misses are fetched on demand through a [`source::NoteSource`].
//! - **[`paths`]**: path parsing and the [`paths::PathResolver`], which validates a path and, at
//!   the first broken edge, splices in a fallback route to root.
//! - **[`sync`]**: the [`sync::SyncChannel`] state machine applying server-pushed changes in
//!   emission order.
//! - **[`event`]**: typed change records and the fan-out [`event::EventBus`].
//!
//! ## Quick Start
//!
//! ```rust
//! use notegraph_core::{
//!     config::NoteGraphConfig,
//!     graphcache::{GraphCache, NoteGraph},
//!     paths::PathResolver,
//!     properties::{Branch, Note},
//!     source::DetachedSource,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let graph = NoteGraph::from_parts(
//!         [Note::root(), Note::new("A", "Alpha"), Note::new("B", "Beta")],
//!         [Branch::new("r_a", "root", "A", 0), Branch::new("a_b", "A", "B", 0)],
//!     );
//!     let cache = Arc::new(GraphCache::with_graph(DetachedSource, graph));
//!     let resolver = PathResolver::new(cache, NoteGraphConfig::default());
//!
//!     assert_eq!(
//!         resolver.resolve_path("A/B-tab2").await.as_deref(),
//!         Some("root/A/B")
//!     );
//! }
//! ```
//!
//! ## Concurrency
//!
//! Everything runs on one logical thread. Fetches are the only suspension points besides the
//! sync channel's receive. The cache carries a revision counter; a resolution that sees it move
//! starts over (once, by default) before giving up with
//! [`NoteGraphError::StaleCache`].

pub mod config;
pub mod error;
pub mod event;
pub mod graphcache;
pub mod paths;
pub mod properties;
pub mod source;
pub mod sync;
#[cfg(test)]
mod tests;

pub use error::*;
