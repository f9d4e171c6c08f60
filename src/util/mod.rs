//! Shared utilities for `beads_rust`.
//!
//! Common functionality used across modules:
//! - Content hashing (SHA256)
//! - Time parsing and formatting (RFC3339)
//! - Path handling (.beads discovery)
//! - ID generation (base36 adaptive)
//! - Last-touched tracking
//! - Progress indicators (for long-running operations)

mod hash;
pub mod id;
pub mod progress;
pub mod time;

pub use hash::{ContentHashable, content_hash, content_hash_from_parts};
pub use id::{
    IdConfig, IdGenerator, IdResolver, MatchType, ParsedId, ResolvedId, ResolverConfig,
    compute_repo_id, child_id, detect_dominant_prefix, extract_prefix, find_matching_ids,
    generate_id, id_depth, is_child_id, is_hash_id, is_valid_id_format, make_hash_id,
    normalize_id, parse_id, resolve_id, validate_prefix,
};

use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const LAST_TOUCHED_FILE: &str = "last-touched";

/// Default database filename, relative to the `.beads` directory.
const DEFAULT_DB_FILENAME: &str = "beads.db";

/// Build the default path to the SQLite database inside a `.beads` directory.
///
/// This is only the *default*; callers resolve the effective path through
/// [`crate::config::resolve_db_path`], which also honors `metadata.json` and
/// CLI overrides.
#[must_use]
pub fn db_path(beads_dir: &Path) -> PathBuf {
    beads_dir.join(DEFAULT_DB_FILENAME)
}

/// Build the path to `.beads/last-touched` from the beads directory.
#[must_use]
pub fn last_touched_path(beads_dir: &Path) -> PathBuf {
    beads_dir.join(LAST_TOUCHED_FILE)
}

/// Best-effort write of the last-touched issue ID.
///
/// Errors are ignored to match classic bd behavior.
pub fn set_last_touched_id(beads_dir: &Path, id: &str) {
    let path = last_touched_path(beads_dir);
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    if let Ok(mut file) = options.open(path) {
        let _ = writeln!(file, "{id}");
    }
}

/// Read the last-touched issue ID.
///
/// Returns an empty string if the file is missing or unreadable.
#[must_use]
pub fn get_last_touched_id(beads_dir: &Path) -> String {
    let path = last_touched_path(beads_dir);
    let mut contents = String::new();

    if let Ok(mut file) = fs::File::open(path) {
        if file.read_to_string(&mut contents).is_ok() {
            return contents.lines().next().unwrap_or("").trim().to_string();
        }
    }

    String::new()
}

/// Best-effort delete of the last-touched file.
pub fn clear_last_touched(beads_dir: &Path) {
    let path = last_touched_path(beads_dir);
    let _ = fs::remove_file(path);
}
