//! Project Database Layout
//!
//! One database per project under `<home>/.alexandria/projects/`, named by a
//! slug of the project directory plus a 12-hex hash of its canonical path. A
//! sibling `project.json` records provenance. `ALEXANDRIA_DB_PATH` overrides
//! everything; with no project root, a global fallback database is used.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::content::short_hash12;
use crate::error::{EngineError, Result};

/// Environment variable overriding the resolved database file path.
pub const DB_PATH_ENV: &str = "ALEXANDRIA_DB_PATH";

/// Resolved locations for one project database.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    /// The SQLite file itself
    pub db_path: PathBuf,
    /// Directory holding the database and `project.json`
    pub project_dir: PathBuf,
}

/// Provenance sidecar written next to the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectManifest {
    project_path: String,
    project_name: String,
    created_at: String,
}

fn alexandria_home() -> Result<PathBuf> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| EngineError::Init("could not determine home directory".to_string()))?;
    Ok(base.home_dir().join(".alexandria"))
}

fn project_slug(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.chars().take(32).collect()
}

/// Resolve the database path for `project_root`.
///
/// Resolution order: `ALEXANDRIA_DB_PATH` env override, then the per-project
/// directory, then the global fallback when no root is known. Creates the
/// project directory and `project.json` on first use.
pub fn resolve_db_path(project_root: Option<&Path>) -> Result<ProjectPaths> {
    if let Ok(override_path) = std::env::var(DB_PATH_ENV) {
        if !override_path.is_empty() {
            let db_path = PathBuf::from(override_path);
            let project_dir = db_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            return Ok(ProjectPaths { db_path, project_dir });
        }
    }

    let home = alexandria_home()?;

    let project_dir = match project_root {
        Some(root) => {
            let canonical = root
                .canonicalize()
                .unwrap_or_else(|_| root.to_path_buf());
            let dir = home.join("projects").join(format!(
                "{}_{}",
                project_slug(&canonical),
                short_hash12(&canonical.to_string_lossy())
            ));
            std::fs::create_dir_all(&dir)?;
            write_manifest_if_missing(&dir, &canonical)?;
            dir
        }
        None => {
            let dir = home.join("global");
            std::fs::create_dir_all(&dir)?;
            dir
        }
    };

    Ok(ProjectPaths {
        db_path: project_dir.join("alexandria.db"),
        project_dir,
    })
}

fn write_manifest_if_missing(dir: &Path, root: &Path) -> Result<()> {
    let manifest_path = dir.join("project.json");
    if manifest_path.exists() {
        return Ok(());
    }
    let manifest = ProjectManifest {
        project_path: root.to_string_lossy().to_string(),
        project_name: root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string()),
        created_at: Utc::now().to_rfc3339(),
    };
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_sanitizes() {
        assert_eq!(project_slug(Path::new("/tmp/My Project!")), "my-project-");
        assert_eq!(project_slug(Path::new("/tmp/web-app")), "web-app");
    }

    #[test]
    fn test_env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("custom.db");
        // Serialize env mutation within this test binary
        unsafe { std::env::set_var(DB_PATH_ENV, &target) };
        let paths = resolve_db_path(Some(Path::new("/does/not/matter"))).unwrap();
        unsafe { std::env::remove_var(DB_PATH_ENV) };
        assert_eq!(paths.db_path, target);
    }

    #[test]
    fn test_slug_and_hash_are_stable() {
        let a = short_hash12("/home/user/proj");
        let b = short_hash12("/home/user/proj");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }
}
