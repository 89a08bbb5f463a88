// ⚖️ Match Engine - Narrow the quota snapshot down to one payroll line
//
// Stage 1: 类别1 is a member label of (sheet, version)
//          AND effected_from == version (string equality)
// Stage 2: 定额 == quoted rate (exact)
//
// Every call is a full scan over the snapshot; nothing is indexed or cached.

use crate::db::{PayrollLineItem, RateEntry};
use crate::error::{MatchError, MatchResult};
use crate::registry::CategoryRegistry;
use crate::temporal::{EffectiveDateResolver, VersionToken};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// FILTER OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    /// Version the line was resolved to (None when its sheet is not registered)
    pub version: Option<VersionToken>,

    /// Entries passing stage 1 (labels + version)
    pub stage1_count: usize,

    /// Entries passing stages 1 and 2 (rate)
    pub stage2_count: usize,

    /// Stage-2 entries in snapshot order
    pub candidates: Vec<RateEntry>,
}

impl FilterOutcome {
    fn empty(version: Option<VersionToken>) -> Self {
        FilterOutcome {
            version,
            stage1_count: 0,
            stage2_count: 0,
            candidates: Vec::new(),
        }
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "version {}: stage1={}, stage1+2={}",
            self.version.as_deref().unwrap_or("-"),
            self.stage1_count,
            self.stage2_count
        )
    }
}

// ============================================================================
// MATCH ENGINE
// ============================================================================

pub struct MatchEngine<'a> {
    resolver: EffectiveDateResolver<'a>,
}

impl<'a> MatchEngine<'a> {
    pub fn new(registry: &'a CategoryRegistry) -> Self {
        MatchEngine {
            resolver: EffectiveDateResolver::new(registry),
        }
    }

    pub fn resolver(&self) -> &EffectiveDateResolver<'a> {
        &self.resolver
    }

    /// Filter `snapshot` down to the rates applicable to `line_item`
    ///
    /// `source_identifier` is the payroll file the line belongs to.
    /// A malformed identifier is an error; an unregistered sheet or a
    /// version without labels simply matches nothing.
    ///
    /// Callers must not pass lines whose quoted rate is 0.
    pub fn filter(
        &self,
        snapshot: &[RateEntry],
        line_item: &PayrollLineItem,
        source_identifier: &str,
    ) -> MatchResult<FilterOutcome> {
        let category = line_item.category();

        let version = match self.resolver.resolve(source_identifier, category) {
            Ok(version) => version,
            Err(MatchError::UnknownCategory { .. }) => {
                warn!(source_identifier, category, "sheet not registered, no quota can match");
                return Ok(FilterOutcome::empty(None));
            }
            Err(e) => return Err(e),
        };

        let Some(valid_labels) = self.resolver.registry().members(category, &version) else {
            return Ok(FilterOutcome::empty(Some(version)));
        };

        let stage1: Vec<&RateEntry> = snapshot
            .iter()
            .filter(|entry| {
                valid_labels.contains(&entry.primary_category) && entry.effected_from == version
            })
            .collect();

        let candidates: Vec<RateEntry> = stage1
            .iter()
            .filter(|entry| entry.rate == line_item.quoted_rate)
            .map(|entry| (*entry).clone())
            .collect();

        let outcome = FilterOutcome {
            stage1_count: stage1.len(),
            stage2_count: candidates.len(),
            candidates,
            version: Some(version),
        };

        debug!(
            source_identifier,
            category,
            employee = %line_item.employee,
            "{}",
            outcome.summary()
        );

        Ok(outcome)
    }
}

// ============================================================================
// TESTS
// ============================================================================
