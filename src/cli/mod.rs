//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// `bd` - a local, dependency-aware issue tracker with a `SQLite` store
/// mirrored bidirectionally to a JSONL file meant to be checked into git.
#[derive(Parser, Debug)]
#[command(name = "bd", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the SQLite database (overrides `.beads` discovery).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Actor name recorded against mutations (defaults to the resolved identity).
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable routing through a background daemon, even if one is configured.
    #[arg(long = "no-daemon", global = true)]
    pub no_daemon: bool,

    /// Skip the post-command auto-flush to JSONL.
    #[arg(long = "no-auto-flush", global = true)]
    pub no_auto_flush: bool,

    /// Skip the pre-command auto-import from JSONL.
    #[arg(long = "no-auto-import", global = true)]
    pub no_auto_import: bool,

    /// Operate directly on the `SQLite` database, bypassing file-based state entirely.
    #[arg(long = "no-db", global = true)]
    pub no_db: bool,

    /// Increase log verbosity. Repeat for more detail (-v, -vv, -vvv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all but error-level output.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Disable ANSI color in human-readable output.
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Seconds to wait for an advisory lock on the database before giving up.
    #[arg(long = "lock-timeout", global = true)]
    pub lock_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new `.beads/` workspace (SQLite store + JSONL mirror).
    Init {
        /// Issue ID prefix for this workspace (e.g. "bd").
        #[arg(long)]
        prefix: Option<String>,
        /// Overwrite an existing workspace.
        #[arg(long)]
        force: bool,
    },
    /// Create a new issue.
    Create(CreateArgs),
    /// List issues, with classic filter semantics.
    List(ListArgs),
    /// Show full details for one or more issues.
    Show(ShowArgs),
    /// Explicit JSONL sync actions (flush, import, merge, status).
    Sync(SyncArgs),
    /// Read or modify the layered configuration.
    Config(ConfigArgs),
    /// Print the `bd` binary's version.
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Issue title (positional).
    pub title: Option<String>,

    /// Issue title (flag form, for scripting where positional args are awkward).
    #[arg(long = "title")]
    pub title_flag: Option<String>,

    /// Issue type (task, bug, feature, epic, chore, or a custom string).
    #[arg(short = 't', long = "type")]
    pub type_: Option<String>,

    /// Priority, 0 (critical) through 4 (lowest).
    #[arg(short = 'p', long)]
    pub priority: Option<String>,

    /// Free-form description body.
    #[arg(short = 'd', long)]
    pub description: Option<String>,

    /// Assignee (person working the issue).
    #[arg(long)]
    pub assignee: Option<String>,

    /// Owner (person accountable for the issue).
    #[arg(long)]
    pub owner: Option<String>,

    /// Labels to attach.
    #[arg(short = 'l', long)]
    pub labels: Vec<String>,

    /// Parent issue ID (creates a parent-child dependency).
    #[arg(long)]
    pub parent: Option<String>,

    /// Dependency specs, as `<id>` or `<type>:<id>`.
    #[arg(long = "dep")]
    pub deps: Vec<String>,

    /// Estimated effort in minutes.
    #[arg(long)]
    pub estimate: Option<i32>,

    /// Due date, in RFC3339 or a flexible date format.
    #[arg(long)]
    pub due: Option<String>,

    /// Defer-until date, in RFC3339 or a flexible date format.
    #[arg(long)]
    pub defer: Option<String>,

    /// External reference (e.g. a ticket URL).
    #[arg(long = "external-ref")]
    pub external_ref: Option<String>,

    /// Mark the issue as ephemeral (excluded from normal JSONL export).
    #[arg(long)]
    pub ephemeral: bool,

    /// Validate and print the issue without writing it.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Print only the created issue's ID.
    #[arg(long)]
    pub silent: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ListArgs {
    /// Filter by status (repeatable).
    #[arg(long = "status")]
    pub status: Vec<String>,

    /// Filter by issue type (repeatable).
    #[arg(short = 't', long = "type")]
    pub type_: Vec<String>,

    /// Filter by priority (repeatable).
    #[arg(short = 'p', long = "priority")]
    pub priority: Vec<u8>,

    /// Filter by assignee.
    #[arg(long)]
    pub assignee: Option<String>,

    /// Only show unassigned issues.
    #[arg(long)]
    pub unassigned: bool,

    /// Filter to specific issue IDs (repeatable).
    #[arg(long = "id")]
    pub id: Vec<String>,

    /// Require all of these labels (repeatable).
    #[arg(long = "label")]
    pub label: Vec<String>,

    /// Require any of these labels (repeatable).
    #[arg(long = "label-any")]
    pub label_any: Vec<String>,

    /// Minimum priority (inclusive).
    #[arg(long = "priority-min")]
    pub priority_min: Option<u8>,

    /// Maximum priority (inclusive).
    #[arg(long = "priority-max")]
    pub priority_max: Option<u8>,

    /// Substring filter on title.
    #[arg(long = "title-contains")]
    pub title_contains: Option<String>,

    /// Substring filter on description.
    #[arg(long = "desc-contains")]
    pub desc_contains: Option<String>,

    /// Substring filter on notes.
    #[arg(long = "notes-contains")]
    pub notes_contains: Option<String>,

    /// Include closed/tombstoned issues.
    #[arg(long)]
    pub all: bool,

    /// Maximum number of issues to return.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Sort key: priority, created_at, updated_at, or title.
    #[arg(long)]
    pub sort: Option<String>,

    /// Reverse the sort order.
    #[arg(long)]
    pub reverse: bool,

    /// Include deferred issues (excluded by default).
    #[arg(long)]
    pub deferred: bool,

    /// Only show overdue, non-terminal issues.
    #[arg(long)]
    pub overdue: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ShowArgs {
    /// Issue IDs to show. Defaults to the last-touched issue if omitted.
    pub ids: Vec<String>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Print the paths of the project and user config files.
    #[arg(long)]
    pub path: bool,

    /// Open the project config file in `$EDITOR`.
    #[arg(long)]
    pub edit: bool,

    /// List the fully merged configuration.
    #[arg(long)]
    pub list: bool,

    /// Set a config value, as `<key>=<value>`.
    #[arg(long = "set")]
    pub set: Option<String>,

    /// Delete a config key.
    #[arg(long = "delete")]
    pub delete: Option<String>,

    /// Print the value of a single config key.
    #[arg(long = "get")]
    pub get: Option<String>,

    /// Operate on the project config file (`.beads/config.yaml`).
    #[arg(long)]
    pub project: bool,

    /// Operate on the user config file (`~/.config/beads/config.yaml`).
    #[arg(long)]
    pub user: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct SyncArgs {
    /// Emit the same JSON output as --json regardless of the global flag (for robot callers).
    #[arg(long)]
    pub robot: bool,

    /// Allow a JSONL path outside `.beads/`.
    #[arg(long = "allow-external-jsonl")]
    pub allow_external_jsonl: bool,

    /// Print sync status (dirty count, staleness) instead of syncing.
    #[arg(long)]
    pub status: bool,

    /// Only export (SQLite -> JSONL).
    #[arg(long = "flush-only")]
    pub flush_only: bool,

    /// Only import (JSONL -> SQLite).
    #[arg(long = "import-only")]
    pub import_only: bool,

    /// Run a 3-way merge between the last known base, the local DB, and the JSONL file.
    #[arg(long)]
    pub merge: bool,

    /// Override safety checks (staleness, empty-DB, prefix mismatch).
    #[arg(long)]
    pub force: bool,

    /// Write a `.manifest.json` describing the export alongside the JSONL file.
    #[arg(long)]
    pub manifest: bool,

    /// Export error policy: strict, skip, or best-effort.
    #[arg(long = "error-policy")]
    pub error_policy: Option<String>,

    /// Orphan-dependency handling on import: strict, resurrect, skip, or allow.
    #[arg(long)]
    pub orphans: Option<String>,

    /// Rewrite IDs with a mismatched prefix instead of rejecting them on import.
    #[arg(long = "rename-prefix")]
    pub rename_prefix: bool,
}
