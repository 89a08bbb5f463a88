// Quota Match - Core Library
// Matches piecework payroll lines against the quota revision in effect
// for the month each payroll file covers.

pub mod error;
pub mod logging;
pub mod config;
pub mod registry;       // Category → version → member labels
pub mod temporal;       // Effective-date resolution
pub mod db;             // Records, schema, CSV import
pub mod source;         // Quota snapshot + lazy payroll cursor
pub mod matching;       // Two-stage filter
pub mod decision;       // Final quota choice
pub mod batch;          // Batch driver and report

// Re-export commonly used types
pub use error::{MatchError, MatchResult};
pub use config::AppConfig;
pub use registry::{CategoryRegistry, CategoryVersions, MemberLabels};
pub use temporal::{token_prefix, EffectiveDateResolver, VersionToken, YearMonth};
pub use db::{
    PayrollLineItem, RateEntry, Table, ColumnInfo, ImportStats,
    setup_database, load_payroll_csv, load_quota_csv,
    insert_payroll_items, insert_rate_entries, table_columns, count_rows,
};
pub use source::{PayrollCursor, PayrollFilter, PayrollSource, RateTableSource, SqliteStore};
pub use matching::{FilterOutcome, MatchEngine};
pub use decision::{DecisionPolicy, DecisionStage, PendingDecision, SingleCandidateDecision};
pub use batch::{BatchCounts, BatchReport, BatchRunner, LineOutcome, LineReport};
