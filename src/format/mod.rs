//! Plain-text rendering helpers shared by the `list` and `show` commands.

use crate::model::{Comment, Event, Issue, Priority, Status};
use serde::Serialize;

/// An issue annotated with its dependency/dependent counts, for `list` output.
#[derive(Debug, Clone, Serialize)]
pub struct IssueWithCounts {
    #[serde(flatten)]
    pub issue: Issue,
    pub dependency_count: usize,
    pub dependent_count: usize,
}

/// A dependency or dependent, annotated with enough of the linked issue to
/// render it without a second lookup.
#[derive(Debug, Clone, Serialize)]
pub struct IssueWithDependencyMetadata {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub dep_type: String,
}

/// Full detail view of an issue: the issue itself plus labels, dependency
/// graph edges, comments, history events and parent.
#[derive(Debug, Clone, Serialize)]
pub struct IssueDetails {
    #[serde(flatten)]
    pub issue: Issue,
    pub labels: Vec<String>,
    pub dependencies: Vec<IssueWithDependencyMetadata>,
    pub dependents: Vec<IssueWithDependencyMetadata>,
    pub comments: Vec<Comment>,
    pub events: Vec<Event>,
    pub parent: Option<String>,
}

/// One-line summary of an issue, as shown by `bd list`.
#[must_use]
pub fn format_issue_line(issue: &Issue) -> String {
    format!(
        "{} {} {} [{}]",
        format_status_icon_colored(&issue.status, false),
        issue.id,
        issue.title,
        issue.priority
    )
}

/// Short status marker, e.g. an ASCII glyph, with optional ANSI coloring.
#[must_use]
pub fn format_status_icon_colored(status: &Status, use_color: bool) -> String {
    let (icon, color) = match status {
        Status::Open => ("o", "32"),
        Status::InProgress => ("~", "33"),
        Status::Blocked => ("x", "31"),
        Status::Deferred => ("z", "36"),
        Status::Closed => ("v", "90"),
        Status::Tombstone => ("#", "90"),
        Status::Pinned => ("*", "35"),
        Status::Custom(_) => ("?", "37"),
    };

    if use_color {
        format!("\x1b[{color}m{icon}\x1b[0m")
    } else {
        icon.to_string()
    }
}

/// Human-readable priority label (e.g. `P0`), with optional ANSI coloring.
#[must_use]
pub fn format_priority_label(priority: &Priority, use_color: bool) -> String {
    let label = priority.to_string();
    if !use_color {
        return label;
    }
    let color = match priority.0 {
        0 => "31",
        1 => "33",
        2 => "32",
        3 => "36",
        _ => "90",
    };
    format!("\x1b[{color}m{label}\x1b[0m")
}
