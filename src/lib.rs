//! `beads` - a local, dependency-aware issue tracker with a `SQLite` store
//! mirrored bidirectionally to a JSONL file meant to be checked into git.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod format;
pub mod logging;
pub mod model;
pub mod storage;
pub mod sync;
pub mod util;
pub mod validation;
pub mod worktree;

pub use error::{BeadsError, Result, StructuredError};
