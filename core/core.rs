pub mod archive;
pub mod assemble;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod render;
pub mod tree;

pub use archive::{ArchiveKind, ArchiveMember, MemberHandle};
pub use assemble::assemble;
pub use config::Config;
pub use entry::{Entry, EntryKind, EntrySource, Origin};
pub use error::{AppError, ArchiveError, Result};
pub use filter::{IgnoreRules, included};
pub use pipeline::{BlockStats, Document, generate_document};
pub use render::{ContentRenderer, OverLimit, RenderOutcome, RenderPolicy, RenderedBlock};
pub use tree::{BuiltTree, SortOrder, TreeNode, TreeOptions, TreeSummary, build_tree};
