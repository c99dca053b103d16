//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use notegraph_core::{
    config::{ConfigProvider, NoteGraphConfig, TomlConfigProvider},
    graphcache::NoteGraph,
    properties::{Branch, Note},
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A small workspace tree with one clone:
///
/// ```text
/// root
/// ├── projects (0)
/// │   ├── alpha (0)
/// │   │   └── design (0)
/// │   └── beta (1)
/// │       └── design (1)   <- clone of projects/alpha/design
/// └── archive (1)
/// ```
#[allow(dead_code)]
pub fn workspace_graph() -> NoteGraph {
    NoteGraph::from_parts(
        [
            Note::root(),
            Note::new("projects", "Projects"),
            Note::new("alpha", "Alpha"),
            Note::new("beta", "Beta"),
            Note::new("design", "Design"),
            Note::new("archive", "Archive"),
        ],
        [
            Branch::new("b-projects", "root", "projects", 0),
            Branch::new("b-archive", "root", "archive", 1),
            Branch::new("b-alpha", "projects", "alpha", 0).with_prefix("Active"),
            Branch::new("b-beta", "projects", "beta", 1),
            Branch::new("b-alpha-design", "alpha", "design", 0),
            Branch::new("b-beta-design", "beta", "design", 1),
        ],
    )
}

/// Write a `[notegraph]` config table into a fresh temp dir and return the provider for it.
#[allow(dead_code)]
pub fn write_config(
    temp_dir: &TempDir,
    config: &NoteGraphConfig,
) -> Result<(PathBuf, TomlConfigProvider), Box<dyn std::error::Error>> {
    let path = temp_dir.path().join("notegraph.toml");
    let provider = TomlConfigProvider::new(path.clone());
    provider.set_config(config)?;
    Ok((path, provider))
}
