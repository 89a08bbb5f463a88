// ⚙️ Configuration - Where the data lives and how a run behaves
//
// quota-match.json (all fields optional):
// {
//   "database_path": "payroll_database.db",
//   "registry_path": "categories.json",
//   "batch_limit": 100,
//   "decision_policy": "pending"
// }
//
// QUOTA_MATCH_DB overrides database_path.

use crate::decision::DecisionPolicy;
use crate::registry::CategoryRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DATABASE_ENV: &str = "QUOTA_MATCH_DB";

fn default_database_path() -> PathBuf {
    PathBuf::from("payroll_database.db")
}

fn default_batch_limit() -> Option<usize> {
    Some(100)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// JSON registry file; the built-in registry is used when absent
    #[serde(default)]
    pub registry_path: Option<PathBuf>,

    /// Maximum lines per batch run (null = no limit)
    #[serde(default = "default_batch_limit")]
    pub batch_limit: Option<usize>,

    #[serde(default)]
    pub decision_policy: DecisionPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: default_database_path(),
            registry_path: None,
            batch_limit: default_batch_limit(),
            decision_policy: DecisionPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Read `path` if it exists (defaults otherwise), then apply the environment
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let config: AppConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            info!(path = ?path, "configuration loaded");
            config
        } else {
            debug!(path = ?path, "no config file, using defaults");
            AppConfig::default()
        };

        if let Ok(db) = std::env::var(DATABASE_ENV) {
            config.apply_database_override(&db);
        }

        Ok(config)
    }

    fn apply_database_override(&mut self, value: &str) {
        if !value.trim().is_empty() {
            self.database_path = PathBuf::from(value);
        }
    }

    /// Registry named by the config, or the built-in one
    pub fn load_registry(&self) -> Result<CategoryRegistry> {
        match &self.registry_path {
            Some(path) => CategoryRegistry::from_file(path),
            None => Ok(CategoryRegistry::with_defaults()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.database_path, PathBuf::from("payroll_database.db"));
        assert_eq!(config.batch_limit, Some(100));
        assert_eq!(config.decision_policy, DecisionPolicy::Pending);
        assert!(config.registry_path.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "decision_policy": "single_candidate", "batch_limit": null }}"#).unwrap();

        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.decision_policy, DecisionPolicy::SingleCandidate);
        assert_eq!(config.batch_limit, None);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();

        assert_eq!(config.decision_policy, AppConfig::default().decision_policy);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_database_override() {
        let mut config = AppConfig::default();

        config.apply_database_override("  ");
        assert_eq!(config.database_path, PathBuf::from("payroll_database.db"));

        config.apply_database_override("/data/payroll.db");
        assert_eq!(config.database_path, PathBuf::from("/data/payroll.db"));
    }

    #[test]
    fn test_load_registry_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("categories.json");
        fs::write(&registry_path, r#"{ "精加工": { "19000101": ["精加工"] } }"#).unwrap();

        let config = AppConfig {
            registry_path: Some(registry_path),
            ..AppConfig::default()
        };

        let registry = config.load_registry().unwrap();
        assert_eq!(registry.category_count(), 1);
        assert!(registry.contains_category("精加工"));
    }
}
