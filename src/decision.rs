// 🎯 Decision Stage - Pick the final quota for a line-item
//
// The business rules for choosing among several stage-2 candidates have not
// been specified. Two policies exist:
//
//   PendingDecision          never decides (every call is NoDecision)
//   SingleCandidateDecision  decides only when exactly one candidate is left
//
// NoDecision is a soft failure: batch callers count it and keep going.

use crate::db::{PayrollLineItem, RateEntry};
use crate::error::{MatchError, MatchResult};
use serde::{Deserialize, Serialize};

pub trait DecisionStage {
    fn decide(&self, line_item: &PayrollLineItem, candidates: &[RateEntry]) -> MatchResult<RateEntry>;
}

fn no_decision(line_item: &PayrollLineItem, reason: String) -> MatchError {
    MatchError::NoDecision {
        file_name: line_item.file_name.clone(),
        employee: line_item.employee.clone(),
        reason,
    }
}

/// Placeholder policy: the decision rules are still to be defined
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingDecision;

impl DecisionStage for PendingDecision {
    fn decide(&self, line_item: &PayrollLineItem, candidates: &[RateEntry]) -> MatchResult<RateEntry> {
        Err(no_decision(
            line_item,
            format!("decision rules not defined ({} candidates)", candidates.len()),
        ))
    }
}

/// Accepts a candidate only when it is the only one
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleCandidateDecision;

impl DecisionStage for SingleCandidateDecision {
    fn decide(&self, line_item: &PayrollLineItem, candidates: &[RateEntry]) -> MatchResult<RateEntry> {
        match candidates {
            [only] => Ok(only.clone()),
            [] => Err(no_decision(line_item, "no candidates".to_string())),
            many => Err(no_decision(
                line_item,
                format!("{} candidates, tie-breaking rules not defined", many.len()),
            )),
        }
    }
}

// ============================================================================
// POLICY (configuration)
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicy {
    #[default]
    Pending,
    SingleCandidate,
}

impl DecisionPolicy {
    pub fn stage(&self) -> Box<dyn DecisionStage> {
        match self {
            DecisionPolicy::Pending => Box::new(PendingDecision),
            DecisionPolicy::SingleCandidate => Box::new(SingleCandidateDecision),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionPolicy::Pending => "pending",
            DecisionPolicy::SingleCandidate => "single_candidate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{create_test_line_item, create_test_rate_entry};

    #[test]
    fn test_pending_never_decides() {
        let line = create_test_line_item("202005.xls", "绕嵌排", "张三", 4.0);
        let candidates = vec![create_test_rate_entry("绕嵌排", 4.0, "20200401")];

        let err = PendingDecision.decide(&line, &candidates).unwrap_err();
        assert!(matches!(err, MatchError::NoDecision { .. }));

        assert!(PendingDecision.decide(&line, &[]).is_err());
    }

    #[test]
    fn test_single_candidate() {
        let line = create_test_line_item("202005.xls", "绕嵌排", "张三", 4.0);
        let entry = create_test_rate_entry("绕嵌排", 4.0, "20200401");

        let decided = SingleCandidateDecision.decide(&line, &[entry.clone()]).unwrap();
        assert_eq!(decided, entry);
    }

    #[test]
    fn test_single_candidate_refuses_ties() {
        let line = create_test_line_item("202005.xls", "绕嵌排", "张三", 4.0);
        let candidates = vec![
            create_test_rate_entry("绕嵌排", 4.0, "20200401"),
            create_test_rate_entry("绕嵌排", 4.0, "20200401"),
        ];

        match SingleCandidateDecision.decide(&line, &candidates) {
            Err(MatchError::NoDecision { reason, .. }) => assert!(reason.starts_with("2 candidates")),
            other => panic!("expected NoDecision, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_serde() {
        let policy: DecisionPolicy = serde_json::from_str("\"single_candidate\"").unwrap();
        assert_eq!(policy, DecisionPolicy::SingleCandidate);
        assert_eq!(DecisionPolicy::default().as_str(), "pending");
    }
}
