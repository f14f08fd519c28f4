//! Project data model: planned files, generated files, and the evolving
//! implementation that the orchestrator refines.
//!
//! | Type                    | Produced by          | Consumed by                     |
//! |-------------------------|----------------------|---------------------------------|
//! | `ProjectFile`           | structure planner    | initial generation              |
//! | `GeneratedFile`         | file generator       | build/test/analysis, refinement |
//! | `ProjectImplementation` | orchestrator         | caller (terminal artifact)      |

pub mod grouping;
pub mod placeholder;
mod types;

pub use grouping::{partition, FileGroup, GroupKind};
pub use placeholder::placeholder_file;
pub use types::{
    content_hash, Blueprint, CommentStyle, FileMetadata, FileType, GeneratedFile,
    ImplementationMetadata, ProjectFile, ProjectImplementation,
};
