// 🗂️ Category Registry - Versioned member labels per payroll sheet
//
// category → version token (YYYYMMDD) → primary-category labels valid under it
//
// Built once at startup (defaults or a JSON file), then only read.
// Components borrow it; there is no global instance.

use crate::error::{MatchError, MatchResult};
use crate::temporal::token_prefix;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Labels valid for one (category, version) pair
pub type MemberLabels = BTreeSet<String>;

/// Versions defined for one category, ordered by token
pub type CategoryVersions = BTreeMap<String, MemberLabels>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryRegistry {
    categories: BTreeMap<String, CategoryVersions>,
}

impl CategoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        CategoryRegistry {
            categories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in sheet configuration
    ///
    /// 19000101 is the catch-all version for files older than every
    /// dated revision of a sheet.
    pub fn with_defaults() -> Self {
        let defaults: [(&str, &str, &[&str]); 10] = [
            ("绕嵌排", "19000101", &["绕线", "嵌线"]),
            ("绕嵌排", "20200401", &["绕嵌排"]),
            ("绕嵌排", "20201201", &["绕嵌排", "绕线"]),
            ("绕嵌排", "20210101", &["绕嵌排"]),
            ("绕嵌排", "20211001", &["绕嵌排", "嵌线"]),
            ("绕嵌排", "20211201", &["绕嵌排"]),
            ("精加工", "19000101", &["精加工"]),
            ("精加工", "20200401", &["精加工", "车床"]),
            ("喷漆装配", "19000101", &[]),
            ("喷漆装配", "20200401", &["喷漆", "装配"]),
        ];

        let mut categories: BTreeMap<String, CategoryVersions> = BTreeMap::new();
        for (category, token, labels) in defaults {
            categories
                .entry(category.to_string())
                .or_default()
                .insert(
                    token.to_string(),
                    labels.iter().map(|l| l.to_string()).collect(),
                );
        }

        CategoryRegistry { categories }
    }

    /// Build from a fully specified mapping, validating every token
    pub fn from_map(categories: BTreeMap<String, CategoryVersions>) -> MatchResult<Self> {
        let registry = CategoryRegistry { categories };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse a registry from JSON: `{ "<category>": { "<token>": ["label", ...] } }`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let categories: BTreeMap<String, CategoryVersions> =
            serde_json::from_str(json).context("Failed to parse category registry JSON")?;

        Ok(CategoryRegistry::from_map(categories)?)
    }

    /// Load a registry from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read registry file: {:?}", path.as_ref()))?;

        CategoryRegistry::from_json_str(&content)
            .with_context(|| format!("Invalid registry file: {:?}", path.as_ref()))
    }

    /// Builder: define one version of a category
    pub fn define<I, S>(mut self, category: &str, token: &str, labels: I) -> MatchResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if token_prefix(token).is_none() {
            return Err(MatchError::InvalidVersionToken {
                category: category.to_string(),
                token: token.to_string(),
            });
        }

        self.categories
            .entry(category.to_string())
            .or_default()
            .insert(token.to_string(), labels.into_iter().map(Into::into).collect());

        Ok(self)
    }

    fn validate(&self) -> MatchResult<()> {
        for (category, versions) in &self.categories {
            for token in versions.keys() {
                if token_prefix(token).is_none() {
                    return Err(MatchError::InvalidVersionToken {
                        category: category.clone(),
                        token: token.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // LOOKUPS (read-only)
    // ========================================================================

    /// Labels valid for `category` under `version`, if both are defined
    pub fn members(&self, category: &str, version: &str) -> Option<&MemberLabels> {
        self.categories.get(category)?.get(version)
    }

    /// All versions of a category
    pub fn versions(&self, category: &str) -> Option<&CategoryVersions> {
        self.categories.get(category)
    }

    /// Version tokens of a category in ascending order
    pub fn version_tokens(&self, category: &str) -> Option<Vec<&str>> {
        self.categories
            .get(category)
            .map(|versions| versions.keys().map(String::as_str).collect())
    }

    pub fn contains_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }

    /// Category names in ascending order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_define_known_sheets() {
        let registry = CategoryRegistry::with_defaults();

        assert_eq!(registry.category_count(), 3);
        assert_eq!(
            registry.version_tokens("绕嵌排").unwrap(),
            vec!["19000101", "20200401", "20201201", "20210101", "20211001", "20211201"]
        );
        assert!(registry.members("绕嵌排", "20200401").unwrap().contains("绕嵌排"));
    }

    #[test]
    fn test_members_missing_category_or_version() {
        let registry = CategoryRegistry::with_defaults();

        assert!(registry.members("不存在的部门", "20200401").is_none());
        assert!(registry.members("绕嵌排", "20990101").is_none());
    }

    #[test]
    fn test_empty_member_set_is_allowed() {
        let registry = CategoryRegistry::with_defaults();

        let members = registry.members("喷漆装配", "19000101").unwrap();
        assert!(members.is_empty());
    }

    #[test]
    fn test_define_rejects_token_without_prefix() {
        let result = CategoryRegistry::new().define("绕嵌排", "2020", ["绕嵌排"]);

        assert_eq!(
            result.unwrap_err(),
            MatchError::InvalidVersionToken {
                category: "绕嵌排".to_string(),
                token: "2020".to_string(),
            }
        );
    }

    #[test]
    fn test_from_json_str() {
        let registry = CategoryRegistry::from_json_str(
            r#"{ "精加工": { "19000101": ["精加工"], "20200401": ["精加工", "车床"] } }"#,
        )
        .unwrap();

        assert!(registry.contains_category("精加工"));
        assert_eq!(registry.members("精加工", "20200401").unwrap().len(), 2);
    }

    #[test]
    fn test_from_json_str_rejects_bad_token() {
        let result = CategoryRegistry::from_json_str(r#"{ "精加工": { "abc": [] } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            serde_json::to_string(&CategoryRegistry::with_defaults()).unwrap()
        )
        .unwrap();

        let loaded = CategoryRegistry::from_file(file.path()).unwrap();
        assert_eq!(loaded, CategoryRegistry::with_defaults());
    }
}
