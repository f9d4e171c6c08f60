//! `bd init` - create a `.beads/` workspace (SQLite store + JSONL mirror).

use crate::error::{BeadsError, Result};
use crate::storage::SqliteStorage;
use crate::util::db_path;
use std::fs;
use std::path::Path;

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created.
pub fn execute(
    prefix: Option<String>,
    force: bool,
    root_dir: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let base_dir = root_dir.unwrap_or_else(|| Path::new("."));
    let beads_dir = base_dir.join(".beads");

    if beads_dir.exists() {
        let effective_db_path = db_path(&beads_dir);
        if effective_db_path.exists() && !force {
            return Err(BeadsError::AlreadyInitialized {
                path: effective_db_path,
            });
        }
    } else {
        fs::create_dir(&beads_dir)?;
    }

    let effective_db_path = db_path(&beads_dir);
    if let Some(parent) = effective_db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Initialize DB (creates file and applies schema)
    let mut storage = SqliteStorage::open(&effective_db_path)?;

    // Normalize to lowercase since ID validation requires lowercase prefixes
    let mut prefix_set = None;
    if let Some(p) = prefix {
        let normalized = p.to_ascii_lowercase();
        storage.set_config("issue_prefix", &normalized)?;
        prefix_set = Some(normalized);
    }

    let metadata_path = beads_dir.join("metadata.json");
    if !metadata_path.exists() || force {
        let metadata = r#"{
  "database": "beads.db",
  "jsonl_export": "issues.jsonl"
}"#;
        fs::write(metadata_path, metadata)?;
    }

    let config_path = beads_dir.join("config.yaml");
    if !config_path.exists() {
        let config = r"# Beads Project Configuration
# issue_prefix: bd
# default_priority: 2
# default_type: task
# sync:
#   branch: beads-sync
";
        fs::write(config_path, config)?;
    }

    let gitignore_path = beads_dir.join(".gitignore");
    if !gitignore_path.exists() {
        let gitignore = r"# Database
*.db
*.db-shm
*.db-wal

# Lock files
*.lock

# Temporary
last-touched
*.tmp
";
        fs::write(gitignore_path, gitignore)?;
    }

    // Empty issues.jsonl so the sync engine always has something to diff against.
    let jsonl_path = beads_dir.join("issues.jsonl");
    if !jsonl_path.exists() {
        fs::write(&jsonl_path, "")?;
    }

    if quiet {
        return Ok(());
    }

    if let Some(p) = prefix_set.as_deref() {
        println!("Prefix set to: {p}");
    }
    println!("Initialized beads workspace in {}", beads_dir.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_beads_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = execute(None, false, Some(temp_dir.path()), true);

        assert!(result.is_ok());
        assert!(temp_dir.path().join(".beads").exists());
        assert!(temp_dir.path().join(".beads/beads.db").exists());
        assert!(temp_dir.path().join(".beads/metadata.json").exists());
        assert!(temp_dir.path().join(".beads/config.yaml").exists());
        assert!(temp_dir.path().join(".beads/.gitignore").exists());
        assert!(temp_dir.path().join(".beads/issues.jsonl").exists());
    }

    #[test]
    fn test_init_with_prefix() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let result = execute(Some("test".to_string()), false, Some(temp_dir.path()), true);
        assert!(result.is_ok());

        let db_path = temp_dir.path().join(".beads/beads.db");
        let storage = SqliteStorage::open(&db_path).unwrap();
        let prefix = storage.get_config("issue_prefix").unwrap();
        assert_eq!(prefix, Some("test".to_string()));
    }

    #[test]
    fn test_init_fails_if_already_initialized() {
        let temp_dir = tempfile::TempDir::new().unwrap();

        let result1 = execute(None, false, Some(temp_dir.path()), true);
        assert!(result1.is_ok());

        let result2 = execute(None, false, Some(temp_dir.path()), true);
        assert!(result2.is_err());
        assert!(matches!(
            result2.unwrap_err(),
            BeadsError::AlreadyInitialized { .. }
        ));
    }

    #[test]
    fn test_init_force_overwrites_existing() {
        let temp_dir = tempfile::TempDir::new().unwrap();

        execute(Some("first".to_string()), false, Some(temp_dir.path()), true).unwrap();
        let result = execute(Some("second".to_string()), true, Some(temp_dir.path()), true);
        assert!(result.is_ok());

        let db_path = temp_dir.path().join(".beads/beads.db");
        let storage = SqliteStorage::open(&db_path).unwrap();
        let prefix = storage.get_config("issue_prefix").unwrap();
        assert_eq!(prefix, Some("second".to_string()));
    }

    #[test]
    fn test_metadata_json_content() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        execute(None, false, Some(temp_dir.path()), true).unwrap();

        let metadata_path = temp_dir.path().join(".beads/metadata.json");
        let content = fs::read_to_string(metadata_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(parsed["database"], "beads.db");
        assert_eq!(parsed["jsonl_export"], "issues.jsonl");
    }

    #[test]
    fn test_gitignore_excludes_db_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        execute(None, false, Some(temp_dir.path()), true).unwrap();

        let gitignore_path = temp_dir.path().join(".beads/.gitignore");
        let content = fs::read_to_string(gitignore_path).unwrap();

        assert!(content.contains("*.db"));
        assert!(content.contains("*.db-wal"));
        assert!(content.contains("*.db-shm"));
        assert!(content.contains("*.lock"));
    }
}
