//! Sync Arbiter - centralizes the decision of whether a mutating command
//! should trigger an auto-flush to JSONL, instead of each CLI command
//! calling the flush pipeline directly.

use crate::config::CliOverrides;
use crate::error::Result;
use crate::storage::SqliteStorage;
use std::path::Path;

use super::{AutoFlushResult, auto_flush};

/// Mark the store dirty after a mutating command and let the arbiter decide
/// whether to flush immediately.
///
/// Mutating commands (`create`, `update`, `close`, ...) call this instead of
/// invoking the flush pipeline themselves. The actual dirty bit is already
/// set by the storage layer when the mutation was applied; this function
/// only decides whether that dirty state should be exported to JSONL now.
///
/// Respects `--no-auto-flush`: when set, the dirty issues remain queued in
/// the database and are picked up by the next `bd sync` or by a later
/// command that does not suppress auto-flush.
///
/// # Errors
///
/// Returns an error if the flush itself fails.
pub fn mark_dirty(
    beads_dir: &Path,
    storage: &mut SqliteStorage,
    cli: &CliOverrides,
) -> Result<AutoFlushResult> {
    if cli.no_auto_flush.unwrap_or(false) {
        tracing::debug!("Auto-flush suppressed by --no-auto-flush");
        return Ok(AutoFlushResult::default());
    }

    auto_flush(storage, beads_dir)
}
