use crate::cli::CreateArgs;
use crate::config;
use crate::error::{BeadsError, Result};
use crate::model::{Dependency, DependencyType, Issue, IssueType, Priority, Status};
use crate::storage::SqliteStorage;
use crate::sync::arbiter;
use crate::util::id::IdGenerator;
use crate::util::time::parse_flexible_timestamp;
use crate::validation::{IssueValidator, LabelValidator};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::str::FromStr;

/// Configuration for creating an issue.
pub struct CreateConfig {
    pub id_config: crate::util::id::IdConfig,
    pub default_priority: Priority,
    pub default_issue_type: IssueType,
    pub actor: String,
}

/// Execute the create command.
///
/// # Errors
///
/// Returns an error if validation fails, the database cannot be opened, or the issue cannot be created.
#[allow(clippy::too_many_lines)]
pub fn execute(args: &CreateArgs, cli: &config::CliOverrides) -> Result<()> {
    // 1. Open storage (unless dry run without DB)
    let beads_dir = config::discover_beads_dir(Some(Path::new(".")))?;

    // We open storage even for dry-run to check ID collisions.
    let mut storage_ctx = config::open_storage_with_cli(&beads_dir, cli)?;
    let layer = config::load_config(&beads_dir, Some(&storage_ctx.storage), cli)?;

    let config = CreateConfig {
        id_config: config::id_config_from_layer(&layer),
        default_priority: config::default_priority_from_layer(&layer)?,
        default_issue_type: config::default_issue_type_from_layer(&layer)?,
        actor: config::resolve_actor(&layer),
    };

    let issue = create_issue_impl(&mut storage_ctx.storage, args, &config)?;

    // Output
    if args.silent {
        println!("{}", issue.id);
    } else if cli.json.unwrap_or(false) {
        if args.dry_run {
            println!("{}", serde_json::to_string_pretty(&issue)?);
        } else {
            let full_issue = storage_ctx
                .storage
                .get_issue_for_export(&issue.id)?
                .ok_or_else(|| BeadsError::IssueNotFound {
                    id: issue.id.clone(),
                })?;
            println!("{}", serde_json::to_string_pretty(&full_issue)?);
        }
    } else if args.dry_run {
        println!("Dry run: would create issue {}", issue.id);
        println!("Title: {}", issue.title);
        println!("Type: {}", issue.issue_type);
        println!("Priority: {}", issue.priority);
        if !args.labels.is_empty() {
            println!("Labels: {}", args.labels.join(", "));
        }
        if let Some(parent) = &args.parent {
            println!("Parent: {parent}");
        }
        if !args.deps.is_empty() {
            println!("Dependencies: {}", args.deps.join(", "));
        }
    } else {
        println!("Created {}: {}", issue.id, issue.title);
    }

    if !args.dry_run {
        arbiter::mark_dirty(&beads_dir, &mut storage_ctx.storage, cli)?;
    }
    Ok(())
}

/// Core logic for creating an issue.
///
/// Handles ID generation, validation, and storage insertion.
/// Returns the constructed Issue.
///
/// # Errors
///
/// Returns error if:
/// - Title is empty
/// - ID generation fails
/// - Validation fails
/// - Storage write fails
pub fn create_issue_impl(
    storage: &mut SqliteStorage,
    args: &CreateArgs,
    config: &CreateConfig,
) -> Result<Issue> {
    // 1. Resolve title
    let title = args
        .title
        .as_ref()
        .or(args.title_flag.as_ref())
        .ok_or_else(|| BeadsError::validation("title", "cannot be empty"))?;

    if title.is_empty() {
        return Err(BeadsError::validation("title", "cannot be empty"));
    }

    // 2. Generate ID
    let id_gen = IdGenerator::new(config.id_config.clone());
    let now = Utc::now();
    let count = storage.count_issues()?;

    let id = id_gen.generate(
        title,
        None, // description
        None, // creator
        now,
        count,
        |id| storage.id_exists(id).unwrap_or(false),
    );

    // 3. Parse fields
    let priority = if let Some(p) = &args.priority {
        Priority::from_str(p)?
    } else {
        config.default_priority
    };

    let issue_type = if let Some(t) = &args.type_ {
        IssueType::from_str(t)?
    } else {
        config.default_issue_type.clone()
    };

    let due_at = parse_optional_date(args.due.as_deref())?;
    let defer_until = parse_optional_date(args.defer.as_deref())?;

    // 4. Construct Issue
    let mut issue = Issue {
        id: id.clone(),
        title: title.clone(),
        description: args.description.clone(),
        status: Status::Open,
        priority,
        issue_type,
        created_at: now,
        updated_at: now,
        assignee: args.assignee.clone(),
        owner: args.owner.clone(),
        estimated_minutes: args.estimate,
        due_at,
        defer_until,
        external_ref: args.external_ref.clone(),
        ephemeral: args.ephemeral,
        // Defaults
        content_hash: None,
        design: None,
        acceptance_criteria: None,
        notes: None,
        created_by: None,
        closed_at: None,
        close_reason: None,
        closed_by_session: None,
        source_system: None,
        deleted_at: None,
        deleted_by: None,
        delete_reason: None,
        original_type: None,
        compaction_level: None,
        compacted_at: None,
        compacted_at_commit: None,
        original_size: None,
        sender: None,
        pinned: false,
        is_template: false,
        labels: vec![],
        dependencies: vec![],
        comments: vec![],
    };

    // Compute content hash
    issue.content_hash = Some(issue.compute_content_hash());

    // 5. Validate Issue
    IssueValidator::validate(&issue).map_err(BeadsError::from_validation_errors)?;

    // 5b. Validate Relations (fail fast before DB writes)
    validate_relations(args, &id)?;

    // 6. Dry Run check - return early
    if args.dry_run {
        return Ok(issue);
    }

    // 7. Create
    storage.create_issue(&issue, &config.actor)?;

    // 8. Add auxiliary data
    add_relations(storage, &id, args, &config.actor, &mut issue, now)?;

    Ok(issue)
}

fn validate_relations(args: &CreateArgs, id: &str) -> Result<()> {
    // Validate Labels
    for label in &args.labels {
        if !label.trim().is_empty() {
            LabelValidator::validate(label)
                .map_err(|e| BeadsError::validation("label", e.message))?;
        }
    }

    // Validate Parent
    if let Some(parent_id) = &args.parent {
        if parent_id == id {
            return Err(BeadsError::validation(
                "parent",
                "cannot be parent of itself",
            ));
        }
    }

    // Validate Dependencies
    for dep_str in &args.deps {
        let (type_str, dep_id) = if let Some((t, i)) = dep_str.split_once(':') {
            (t, i)
        } else {
            ("blocks", dep_str.as_str())
        };

        if dep_id == id {
            return Err(BeadsError::validation("deps", "cannot depend on itself"));
        }

        // Strict dependency type validation
        let dep_type: DependencyType = type_str.parse().map_err(|_| BeadsError::Validation {
            field: "deps".to_string(),
            reason: format!("Invalid dependency type: {type_str}"),
        })?;

        // Disallow accidental custom types from typos
        if let DependencyType::Custom(_) = dep_type {
            return Err(BeadsError::Validation {
                field: "deps".to_string(),
                reason: format!(
                    "Unknown dependency type: '{type_str}'. \
                     Allowed types: blocks, parent-child, conditional-blocks, waits-for, \
                     related, discovered-from, replies-to, relates-to, duplicates, \
                     supersedes, caused-by"
                ),
            });
        }
    }

    Ok(())
}

fn add_relations(
    storage: &mut SqliteStorage,
    id: &str,
    args: &CreateArgs,
    actor: &str,
    issue: &mut Issue,
    now: DateTime<Utc>,
) -> Result<()> {
    // Labels
    for label in &args.labels {
        let label = label.trim();
        if !label.is_empty() {
            // Validation already done in validate_relations
            storage.add_label(id, label, actor)?;
            issue.labels.push(label.to_string());
        }
    }

    // Parent
    if let Some(parent_id) = &args.parent {
        // Validation already done
        storage.add_dependency(id, parent_id, "parent-child", actor)?;

        issue.dependencies.push(Dependency {
            issue_id: id.to_string(),
            depends_on_id: parent_id.clone(),
            dep_type: DependencyType::ParentChild,
            created_at: now,
            created_by: Some(actor.to_string()),
            metadata: None,
            thread_id: None,
        });
    }

    // Dependencies
    for dep_str in &args.deps {
        let (type_str, dep_id) = if let Some((t, i)) = dep_str.split_once(':') {
            (t, i)
        } else {
            ("blocks", dep_str.as_str())
        };

        // Validation already done
        storage.add_dependency(id, dep_id, type_str, actor)?;

        let dep_type = type_str
            .parse()
            .unwrap_or_else(|_| DependencyType::Custom(type_str.to_string()));
        issue.dependencies.push(Dependency {
            issue_id: id.to_string(),
            depends_on_id: dep_id.to_string(),
            dep_type,
            created_at: now,
            created_by: Some(actor.to_string()),
            metadata: None,
            thread_id: None,
        });
    }

    Ok(())
}

fn parse_optional_date(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match s {
        Some(s) if !s.is_empty() => parse_flexible_timestamp(s, "date").map(Some),
        _ => Ok(None),
    }
}
