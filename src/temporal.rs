// ⏰ Temporal Model - Which quota version was in effect for a payroll file
//
// Payroll files are named after the month they cover ("202005.xls",
// "202101_1.xlsx"). Quota revisions are keyed by YYYYMMDD tokens, but only
// their YYYYMM prefix takes part in the comparison:
//
//   target = year * 100 + month
//   version = greatest token with prefix <= target
//             else the earliest token of the category
//
// No clock is consulted; the answer depends only on the identifier,
// the category and the registry.

use crate::error::{MatchError, MatchResult};
use crate::registry::CategoryRegistry;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Resolved version token (opaque YYYYMMDD string)
pub type VersionToken = String;

// ============================================================================
// YEAR-MONTH
// ============================================================================

/// Month a payroll file covers, taken from its leading YYYYMM digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    /// Parse the leading six digits of a source identifier
    ///
    /// "202012.xlsx" → 2020-12, "202101_1.xls" → 2021-01.
    /// Anything without six leading digits, or with a month outside
    /// 01..=12, is `MalformedIdentifier`.
    pub fn from_identifier(identifier: &str) -> MatchResult<Self> {
        let malformed = || MatchError::MalformedIdentifier {
            identifier: identifier.to_string(),
        };

        let prefix = identifier.get(..6).ok_or_else(malformed)?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        let year: i32 = prefix[..4].parse().map_err(|_| malformed())?;
        let month: u32 = prefix[4..].parse().map_err(|_| malformed())?;

        // Stricter than a bare six-digit prefix: the month must be 01-12
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(malformed)?;

        Ok(YearMonth {
            year: first_day.year(),
            month: first_day.month(),
        })
    }

    /// Integer form used for comparisons (2020-05 → 202005)
    pub fn as_yyyymm(&self) -> u32 {
        self.year as u32 * 100 + self.month
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// YYYYMM prefix of a version token, if its first six characters are digits
pub fn token_prefix(token: &str) -> Option<u32> {
    let prefix = token.get(..6)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

// ============================================================================
// EFFECTIVE DATE RESOLVER
// ============================================================================

pub struct EffectiveDateResolver<'a> {
    registry: &'a CategoryRegistry,
}

impl<'a> EffectiveDateResolver<'a> {
    pub fn new(registry: &'a CategoryRegistry) -> Self {
        EffectiveDateResolver { registry }
    }

    pub fn registry(&self) -> &'a CategoryRegistry {
        self.registry
    }

    /// Version token of `category` in effect for the file `source_identifier`
    ///
    /// Example:
    /// ```
    /// use quota_match::{CategoryRegistry, EffectiveDateResolver};
    ///
    /// let registry = CategoryRegistry::with_defaults();
    /// let resolver = EffectiveDateResolver::new(&registry);
    ///
    /// assert_eq!(resolver.resolve("202005.xls", "绕嵌排").unwrap(), "20200401");
    /// assert_eq!(resolver.resolve("201505.xls", "绕嵌排").unwrap(), "19000101");
    /// ```
    pub fn resolve(&self, source_identifier: &str, category: &str) -> MatchResult<VersionToken> {
        let target = YearMonth::from_identifier(source_identifier)?.as_yyyymm();

        let unknown = || MatchError::UnknownCategory {
            category: category.to_string(),
        };
        let versions = self.registry.versions(category).ok_or_else(unknown)?;

        // Tokens sharing the winning prefix: the greatest full token wins
        let in_effect = versions
            .keys()
            .filter_map(|token| token_prefix(token).map(|prefix| (prefix, token)))
            .filter(|(prefix, _)| *prefix <= target)
            .max();

        let chosen = match in_effect {
            Some((_, token)) => token,
            None => {
                // Older than every revision: fall back to the earliest one
                versions
                    .keys()
                    .min_by(|a, b| (token_prefix(a), a).cmp(&(token_prefix(b), b)))
                    // A category with no versions cannot resolve anything
                    .ok_or_else(unknown)?
            }
        };

        trace!(source_identifier, category, target_yyyymm = target, version = %chosen, "resolved effective version");

        Ok(chosen.clone())
    }
}

// ============================================================================
// TESTS
// ============================================================================
