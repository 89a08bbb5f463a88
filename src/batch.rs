// 📦 Batch Matching - Run every payroll line through filter + decision
//
// Per line:
//   quoted rate 0            → skipped (never reaches the match engine)
//   resolver error           → error
//   no stage-2 candidate     → skipped (no match)
//   decision                 → success
//   NoDecision               → error, reported, run continues

use crate::db::{PayrollLineItem, RateEntry};
use crate::decision::DecisionStage;
use crate::error::MatchError;
use crate::matching::{FilterOutcome, MatchEngine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ============================================================================
// LINE OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LineOutcome {
    /// Quoted rate is 0: no quota applies
    SkippedZeroRate,

    /// Filtering left no candidate
    NoMatch { filter: FilterOutcome },

    /// Decision stage picked a quota
    Decided { filter: FilterOutcome, decision: RateEntry },

    /// Candidates exist but no single quota could be chosen
    Undecided { filter: FilterOutcome, reason: String },

    /// The line could not be matched at all (e.g. malformed file name)
    Failed { error: String },
}

impl LineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LineOutcome::Decided { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, LineOutcome::SkippedZeroRate | LineOutcome::NoMatch { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LineOutcome::Undecided { .. } | LineOutcome::Failed { .. })
    }

    pub fn filter(&self) -> Option<&FilterOutcome> {
        match self {
            LineOutcome::NoMatch { filter }
            | LineOutcome::Decided { filter, .. }
            | LineOutcome::Undecided { filter, .. } => Some(filter),
            LineOutcome::SkippedZeroRate | LineOutcome::Failed { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            LineOutcome::SkippedZeroRate => "定额为0，跳过匹配".to_string(),
            LineOutcome::NoMatch { .. } => "无匹配记录".to_string(),
            LineOutcome::Decided { decision, .. } => format!(
                "最终决策: {} / {} / {} = {}",
                decision.primary_category, decision.secondary_category, decision.process, decision.rate
            ),
            LineOutcome::Undecided { reason, .. } => format!("决策失败: {}", reason),
            LineOutcome::Failed { error } => format!("处理错误: {}", error),
        }
    }
}

/// One processed line, in source order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReport {
    /// 1-based position within the run
    pub ordinal: usize,
    pub file_name: String,
    pub sheet_name: String,
    pub employee: String,
    pub quoted_rate: f64,
    pub outcome: LineOutcome,
}

// ============================================================================
// BATCH REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub processed: usize,
    pub success: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl BatchCounts {
    fn record(&mut self, outcome: &LineOutcome) {
        self.processed += 1;
        if outcome.is_success() {
            self.success += 1;
        } else if outcome.is_skip() {
            self.skipped += 1;
        } else {
            self.errors += 1;
        }
    }

    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        format!(
            "{rule}\n处理摘要:\n  总处理记录数: {}\n  成功匹配数: {}\n  跳过数 (定额为0或无匹配): {}\n  错误数: {}\n{rule}",
            self.processed, self.success, self.skipped, self.errors
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot_size: usize,
    pub limit: Option<usize>,
    /// True when the run stopped because the limit was reached
    pub limit_reached: bool,
    pub counts: BatchCounts,
    pub lines: Vec<LineReport>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        self.counts.summary()
    }
}

// ============================================================================
// BATCH RUNNER
// ============================================================================

pub struct BatchRunner<'a> {
    engine: MatchEngine<'a>,
    decision: &'a dyn DecisionStage,
    limit: Option<usize>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: MatchEngine<'a>, decision: &'a dyn DecisionStage) -> Self {
        BatchRunner {
            engine,
            decision,
            limit: None,
        }
    }

    /// Stop after `limit` lines (None = until the source is exhausted)
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Match a single line against the snapshot
    pub fn process_line(&self, snapshot: &[RateEntry], line_item: &PayrollLineItem) -> LineOutcome {
        if !line_item.has_quoted_rate() {
            return LineOutcome::SkippedZeroRate;
        }

        let filter = match self.engine.filter(snapshot, line_item, &line_item.file_name) {
            Ok(filter) => filter,
            Err(e) => {
                warn!(file_name = %line_item.file_name, error = %e, "line could not be matched");
                return LineOutcome::Failed { error: e.to_string() };
            }
        };

        if !filter.has_candidates() {
            return LineOutcome::NoMatch { filter };
        }

        match self.decision.decide(line_item, &filter.candidates) {
            Ok(decision) => LineOutcome::Decided { filter, decision },
            Err(e @ MatchError::NoDecision { .. }) => {
                warn!(file_name = %line_item.file_name, employee = %line_item.employee, "{}", e);
                LineOutcome::Undecided {
                    filter,
                    reason: e.to_string(),
                }
            }
            Err(e) => LineOutcome::Failed { error: e.to_string() },
        }
    }

    /// Stream lines through the matcher, handing each report to `on_line`
    ///
    /// Only the current line is held; returns the counts and whether the
    /// limit cut the run short.
    pub fn run_with<I, F>(&self, snapshot: &[RateEntry], items: I, mut on_line: F) -> (BatchCounts, bool)
    where
        I: IntoIterator<Item = PayrollLineItem>,
        F: FnMut(LineReport),
    {
        let mut counts = BatchCounts::default();
        let limit = self.limit.unwrap_or(usize::MAX);

        for line_item in items.into_iter().take(limit) {
            let outcome = self.process_line(snapshot, &line_item);
            counts.record(&outcome);

            debug!(
                ordinal = counts.processed,
                file_name = %line_item.file_name,
                outcome = %outcome.describe(),
                "line processed"
            );

            on_line(LineReport {
                ordinal: counts.processed,
                file_name: line_item.file_name,
                sheet_name: line_item.sheet_name,
                employee: line_item.employee,
                quoted_rate: line_item.quoted_rate,
                outcome,
            });
        }

        let limit_reached = self.limit.map_or(false, |l| counts.processed >= l);
        (counts, limit_reached)
    }

    /// Run and collect every line report
    pub fn run<I>(&self, snapshot: &[RateEntry], items: I) -> BatchReport
    where
        I: IntoIterator<Item = PayrollLineItem>,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(%run_id, snapshot_size = snapshot.len(), limit = ?self.limit, "batch matching started");

        let mut lines = Vec::new();
        let (counts, limit_reached) = self.run_with(snapshot, items, |line| lines.push(line));

        info!(
            %run_id,
            processed = counts.processed,
            success = counts.success,
            skipped = counts.skipped,
            errors = counts.errors,
            "batch matching finished"
        );

        BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            snapshot_size: snapshot.len(),
            limit: self.limit,
            limit_reached,
            counts,
            lines,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{create_test_line_item, create_test_rate_entry};
    use crate::decision::{PendingDecision, SingleCandidateDecision};
    use crate::registry::CategoryRegistry;
    use std::cell::Cell;

    fn snapshot() -> Vec<RateEntry> {
        vec![
            create_test_rate_entry("绕嵌排", 4.0, "20200401"),
            create_test_rate_entry("绕嵌排", 0.0, "20200401"),
            create_test_rate_entry("绕嵌排", 6.0, "20200401"),
            create_test_rate_entry("绕嵌排", 6.0, "20200401"),
        ]
    }

    fn lines() -> Vec<PayrollLineItem> {
        vec![
            create_test_line_item("202005.xls", "绕嵌排", "张三", 4.0), // one candidate
            create_test_line_item("202005.xls", "绕嵌排", "李四", 0.0), // zero rate
            create_test_line_item("202005.xls", "绕嵌排", "王五", 9.0), // no match
            create_test_line_item("202005.xls", "绕嵌排", "赵六", 6.0), // two candidates
            create_test_line_item("bad.xls", "绕嵌排", "钱七", 4.0),    // malformed
        ]
    }

    #[test]
    fn test_batch_with_single_candidate_policy() {
        let registry = CategoryRegistry::with_defaults();
        let decision = SingleCandidateDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision);

        let report = runner.run(&snapshot(), lines());

        assert_eq!(
            report.counts,
            BatchCounts { processed: 5, success: 1, skipped: 2, errors: 2 }
        );
        assert!(!report.limit_reached);

        let employees: Vec<&str> = report.lines.iter().map(|l| l.employee.as_str()).collect();
        assert_eq!(employees, vec!["张三", "李四", "王五", "赵六", "钱七"]);

        assert!(matches!(report.lines[0].outcome, LineOutcome::Decided { .. }));
        assert_eq!(report.lines[1].outcome, LineOutcome::SkippedZeroRate);
        assert!(matches!(report.lines[2].outcome, LineOutcome::NoMatch { .. }));
        assert!(matches!(report.lines[3].outcome, LineOutcome::Undecided { .. }));
        assert!(matches!(report.lines[4].outcome, LineOutcome::Failed { .. }));
    }

    #[test]
    fn test_batch_with_pending_policy_surfaces_counts_first() {
        let registry = CategoryRegistry::with_defaults();
        let decision = PendingDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision);

        let report = runner.run(&snapshot(), lines());

        assert_eq!(report.counts.success, 0);
        assert_eq!(report.counts.errors, 3);

        // Stage counts are available even though the decision failed
        let filter = report.lines[0].outcome.filter().unwrap();
        assert_eq!(filter.stage1_count, 4);
        assert_eq!(filter.stage2_count, 1);
    }

    #[test]
    fn test_zero_rate_line_never_reaches_filter() {
        let registry = CategoryRegistry::with_defaults();
        let decision = SingleCandidateDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision);

        // A 0-rate quota exists at the right version, yet the line is skipped
        let line = create_test_line_item("202005.xls", "绕嵌排", "李四", 0.0);
        let outcome = runner.process_line(&snapshot(), &line);

        assert_eq!(outcome, LineOutcome::SkippedZeroRate);
        assert!(outcome.filter().is_none());
    }

    #[test]
    fn test_limit_stops_pulling_from_source() {
        let registry = CategoryRegistry::with_defaults();
        let decision = PendingDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision).with_limit(Some(2));

        let pulled = Cell::new(0);
        let source = lines().into_iter().inspect(|_| pulled.set(pulled.get() + 1));

        let report = runner.run(&snapshot(), source);

        assert_eq!(report.counts.processed, 2);
        assert!(report.limit_reached);
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn test_empty_snapshot_yields_no_matches() {
        let registry = CategoryRegistry::with_defaults();
        let decision = SingleCandidateDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision);

        let report = runner.run(&[], lines());

        assert_eq!(report.counts.success, 0);
        assert_eq!(report.counts.skipped, 4);
        assert_eq!(report.counts.errors, 1);
    }

    #[test]
    fn test_run_with_streams_in_order() {
        let registry = CategoryRegistry::with_defaults();
        let decision = PendingDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision);

        let mut ordinals = Vec::new();
        let (counts, _) = runner.run_with(&snapshot(), lines(), |line| ordinals.push(line.ordinal));

        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
        assert_eq!(counts.processed, 5);
    }

    #[test]
    fn test_summary_text() {
        let registry = CategoryRegistry::with_defaults();
        let decision = PendingDecision;
        let runner = BatchRunner::new(MatchEngine::new(&registry), &decision);

        let summary = runner.run(&snapshot(), lines()).summary();
        assert!(summary.contains("总处理记录数: 5"));
        assert!(summary.contains("错误数: 3"));
    }
}
