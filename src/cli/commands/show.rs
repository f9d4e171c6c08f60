//! Show command implementation.

use crate::cli::ShowArgs;
use crate::config;
use crate::error::{BeadsError, Result};
use crate::format::{format_priority_label, format_status_icon_colored};
use crate::util::id::{IdResolver, ResolverConfig};
use std::fmt::Write as FmtWrite;

/// Execute the show command.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or issues are not found.
pub fn execute(args: &ShowArgs, json: bool, cli: &config::CliOverrides) -> Result<()> {
    let beads_dir = config::discover_beads_dir_with_cli(cli)?;
    let storage_ctx = config::open_storage_with_cli(&beads_dir, cli)?;
    let storage = &storage_ctx.storage;

    let mut target_ids = args.ids.clone();
    if target_ids.is_empty() {
        let last_touched = crate::util::get_last_touched_id(&beads_dir);
        if last_touched.is_empty() {
            return Err(BeadsError::validation(
                "ids",
                "no issue IDs provided and no last-touched issue",
            ));
        }
        target_ids.push(last_touched);
    }

    let config_layer = config::load_config(&beads_dir, Some(storage), cli)?;
    let id_config = config::id_config_from_layer(&config_layer);
    let resolver = IdResolver::new(ResolverConfig::with_prefix(id_config.prefix));
    let use_color = config::should_use_color(&config_layer) && !json;

    let mut details_list = Vec::new();
    for id_input in target_ids {
        let resolution = resolver.resolve(
            &id_input,
            |id| storage.id_exists(id).unwrap_or(false),
            |hash| storage.find_ids_by_hash(hash).unwrap_or_default(),
        )?;

        // Fetch full details including comments and events.
        if let Some(details) = storage.get_issue_details(&resolution.id, true, true, 10)? {
            details_list.push(details);
        } else {
            return Err(BeadsError::IssueNotFound { id: resolution.id });
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&details_list)?);
    } else {
        for (i, details) in details_list.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print_issue_details(details, use_color);
        }
    }

    Ok(())
}

fn print_issue_details(details: &crate::format::IssueDetails, use_color: bool) {
    let output = format_issue_details(details, use_color);
    print!("{output}");
}

fn format_issue_details(details: &crate::format::IssueDetails, use_color: bool) -> String {
    let mut output = String::new();
    let issue = &details.issue;
    let status_icon = format_status_icon_colored(&issue.status, use_color);
    let priority_label = format_priority_label(&issue.priority, use_color);
    let status_upper = issue.status.as_str().to_uppercase();

    // Match bd format: {status_icon} {id} · {title}   [● {priority} · {STATUS}]
    let _ = writeln!(
        output,
        "{} {} · {}   [● {} · {}]",
        status_icon, issue.id, issue.title, priority_label, status_upper
    );

    // Owner/Type line: Owner: {owner} · Type: {type}
    let owner = issue
        .owner
        .clone()
        .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()));
    let _ = writeln!(
        output,
        "Owner: {} · Type: {}",
        owner,
        issue.issue_type.as_str()
    );

    // Created/Updated line
    let _ = writeln!(
        output,
        "Created: {} · Updated: {}",
        issue.created_at.format("%Y-%m-%d"),
        issue.updated_at.format("%Y-%m-%d")
    );

    if let Some(assignee) = &issue.assignee {
        let _ = writeln!(output, "Assignee: {assignee}");
    }

    if !details.labels.is_empty() {
        let _ = writeln!(output, "Labels: {}", details.labels.join(", "));
    }

    if let Some(desc) = &issue.description {
        output.push('\n');
        let _ = writeln!(output, "{desc}");
    }

    if !details.dependencies.is_empty() {
        output.push('\n');
        let _ = writeln!(output, "Dependencies:");
        for dep in &details.dependencies {
            let _ = writeln!(output, "  -> {} ({}) - {}", dep.id, dep.dep_type, dep.title);
        }
    }

    if !details.dependents.is_empty() {
        output.push('\n');
        let _ = writeln!(output, "Dependents:");
        for dep in &details.dependents {
            let _ = writeln!(output, "  <- {} ({}) - {}", dep.id, dep.dep_type, dep.title);
        }
    }

    if !details.comments.is_empty() {
        output.push('\n');
        let _ = writeln!(output, "Comments:");
        for comment in &details.comments {
            let _ = writeln!(
                output,
                "  [{}] {}: {}",
                comment.created_at.format("%Y-%m-%d %H:%M UTC"),
                comment.author,
                comment.body
            );
        }
    }

    output
}
