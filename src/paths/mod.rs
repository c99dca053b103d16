pub mod notepath;
pub mod resolver;

pub use notepath::{
    join_segments, note_id_from_path, parent_and_note_id_from_path, strip_suffix, NotePath,
};
pub use resolver::PathResolver;
