use anyhow::{Context, Result};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// One payroll line as recorded in a monthly payroll file
/// Column names follow the payroll_details table
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PayrollLineItem {
    // ========================================================================
    // MATCHING FIELDS
    // ========================================================================
    /// Source file identifier, e.g. "202005.xls" (leading YYYYMM = month covered)
    #[serde(rename = "文件名")]
    pub file_name: String,

    /// Sheet the line came from; doubles as the registry category
    #[serde(rename = "sheet名")]
    pub sheet_name: String,

    /// Quoted piecework rate (0 = no rate applies)
    #[serde(rename = "定额", default)]
    pub quoted_rate: f64,

    #[serde(rename = "职员全名")]
    pub employee: String,

    // ========================================================================
    // DESCRIPTIVE FIELDS (not used for matching)
    // ========================================================================
    #[serde(rename = "日期", default)]
    pub date: String,

    #[serde(rename = "客户名称", default)]
    pub customer: String,

    #[serde(rename = "型号", default)]
    pub model: String,

    #[serde(rename = "工序全名", default)]
    pub process_full_name: String,

    #[serde(rename = "工序", default)]
    pub process: String,

    #[serde(rename = "计件数量", default)]
    pub piece_count: f64,

    #[serde(rename = "系数", default)]
    pub coefficient: f64,

    #[serde(rename = "金额", default)]
    pub amount: f64,

    #[serde(rename = "备注", default)]
    pub remark: String,
}

impl PayrollLineItem {
    /// Registry category of this line (the sheet name)
    pub fn category(&self) -> &str {
        &self.sheet_name
    }

    /// Zero means "rate not applicable"; such lines are never matched
    pub fn has_quoted_rate(&self) -> bool {
        self.quoted_rate != 0.0
    }

    /// Hash of the line content plus its position in the import,
    /// so re-importing a file is a no-op but repeated lines survive
    pub fn compute_row_hash(&self, ordinal: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            ordinal,
            self.file_name,
            self.sheet_name,
            self.employee,
            self.date,
            self.customer,
            self.model,
            self.process_full_name,
            self.process,
            self.piece_count,
            self.coefficient,
            self.quoted_rate,
            self.amount,
            self.remark
        ));
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for PayrollLineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "文件名: {}", self.file_name)?;
        writeln!(f, "工作表名: {}", self.sheet_name)?;
        writeln!(f, "职员全名: {}", self.employee)?;
        writeln!(f, "日期: {}", self.date)?;
        writeln!(f, "客户名称: {}", self.customer)?;
        writeln!(f, "型号: {}", self.model)?;
        writeln!(f, "工序全名: {}", self.process_full_name)?;
        writeln!(f, "工序: {}", self.process)?;
        writeln!(f, "计件数量: {}", self.piece_count)?;
        writeln!(f, "系数: {}", self.coefficient)?;
        writeln!(f, "定额: {}", self.quoted_rate)?;
        writeln!(f, "金额: ¥{:.2}", self.amount)?;
        writeln!(f, "备注: {}", self.remark)?;
        write!(f, "{}", "=".repeat(50))
    }
}

/// One row of the quota (rate) table
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RateEntry {
    #[serde(rename = "类别1")]
    pub primary_category: String,

    #[serde(rename = "类别2", default)]
    pub secondary_category: String,

    #[serde(rename = "加工工序", default)]
    pub process: String,

    #[serde(rename = "型号", default)]
    pub model: String,

    #[serde(rename = "定额")]
    pub rate: f64,

    /// Version token (YYYYMMDD) of the quota revision this row belongs to
    #[serde(rename = "effected_from")]
    pub effected_from: String,
}

impl RateEntry {
    pub fn compute_row_hash(&self, ordinal: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}",
            ordinal,
            self.primary_category,
            self.secondary_category,
            self.process,
            self.model,
            self.rate,
            self.effected_from
        ));
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for RateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "类别1: {}", self.primary_category)?;
        writeln!(f, "类别2: {}", self.secondary_category)?;
        writeln!(f, "加工工序: {}", self.process)?;
        writeln!(f, "型号: {}", self.model)?;
        writeln!(f, "定额: {}", self.rate)?;
        writeln!(f, "effected_from: {}", self.effected_from)?;
        write!(f, "{}", "=".repeat(40))
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Tables owned by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    PayrollDetails,
    Quota,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::PayrollDetails => "payroll_details",
            Table::Quota => "quota",
        }
    }

    pub fn all() -> [Table; 2] {
        [Table::PayrollDetails, Table::Quota]
    }
}

pub(crate) const PAYROLL_COLUMNS: &str =
    "文件名, sheet名, 职员全名, 日期, 客户名称, 型号, 工序全名, 工序, 计件数量, 系数, 定额, 金额, 备注";

pub(crate) const QUOTA_COLUMNS: &str = "类别1, 类别2, 加工工序, 型号, 定额, effected_from";

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Payroll line-items (one row per line of a monthly payroll file)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payroll_details (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            row_hash TEXT UNIQUE NOT NULL,
            文件名 TEXT NOT NULL,
            sheet名 TEXT NOT NULL,
            职员全名 TEXT NOT NULL,
            日期 TEXT,
            客户名称 TEXT,
            型号 TEXT,
            工序全名 TEXT,
            工序 TEXT,
            计件数量 REAL,
            系数 REAL,
            定额 REAL NOT NULL DEFAULT 0,
            金额 REAL,
            备注 TEXT,
            imported_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Quota table (all revisions side by side, keyed by effected_from)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS quota (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            row_hash TEXT UNIQUE NOT NULL,
            类别1 TEXT NOT NULL,
            类别2 TEXT,
            加工工序 TEXT,
            型号 TEXT,
            定额 REAL NOT NULL,
            effected_from TEXT NOT NULL,
            imported_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payroll_file ON payroll_details(文件名)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payroll_sheet ON payroll_details(sheet名)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quota_effected_from ON quota(effected_from)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Text form of a cell whatever its storage class. Tables written by other
/// tools hold codes such as 型号 or effected_from as INTEGER.
fn cell_text(row: &Row, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

/// Numeric form of a cell; NULL and blank text read as 0
fn cell_number(row: &Row, idx: usize) -> rusqlite::Result<f64> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(0.0),
        ValueRef::Integer(i) => Ok(i as f64),
        ValueRef::Real(f) => Ok(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse::<f64>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
        }
        ValueRef::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "numeric".to_string(),
            Type::Blob,
        )),
    }
}

/// Map a row selected with PAYROLL_COLUMNS starting at column `offset`
pub(crate) fn payroll_from_row(row: &Row, offset: usize) -> rusqlite::Result<PayrollLineItem> {
    let text = |i: usize| cell_text(row, offset + i);
    let number = |i: usize| cell_number(row, offset + i);

    Ok(PayrollLineItem {
        file_name: text(0)?,
        sheet_name: text(1)?,
        employee: text(2)?,
        date: text(3)?,
        customer: text(4)?,
        model: text(5)?,
        process_full_name: text(6)?,
        process: text(7)?,
        piece_count: number(8)?,
        coefficient: number(9)?,
        quoted_rate: number(10)?,
        amount: number(11)?,
        remark: text(12)?,
    })
}

/// Map a row selected with QUOTA_COLUMNS starting at column `offset`
pub(crate) fn rate_from_row(row: &Row, offset: usize) -> rusqlite::Result<RateEntry> {
    let text = |i: usize| cell_text(row, offset + i);

    Ok(RateEntry {
        primary_category: text(0)?,
        secondary_category: text(1)?,
        process: text(2)?,
        model: text(3)?,
        rate: cell_number(row, offset + 4)?,
        effected_from: text(5)?,
    })
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// Rows inserted vs. rows already present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
}

pub fn load_payroll_csv(csv_path: &Path) -> Result<Vec<PayrollLineItem>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open payroll CSV: {:?}", csv_path))?;

    let mut items = Vec::new();
    for result in rdr.deserialize() {
        let item: PayrollLineItem = result.context("Failed to deserialize payroll line")?;
        items.push(item);
    }

    debug!(path = ?csv_path, rows = items.len(), "loaded payroll CSV");
    Ok(items)
}

pub fn load_quota_csv(csv_path: &Path) -> Result<Vec<RateEntry>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open quota CSV: {:?}", csv_path))?;

    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let entry: RateEntry = result.context("Failed to deserialize quota row")?;
        entries.push(entry);
    }

    debug!(path = ?csv_path, rows = entries.len(), "loaded quota CSV");
    Ok(entries)
}

fn is_duplicate(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn insert_payroll_items(conn: &Connection, items: &[PayrollLineItem]) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    for (ordinal, item) in items.iter().enumerate() {
        let result = conn.execute(
            "INSERT INTO payroll_details (
                row_hash, 文件名, sheet名, 职员全名, 日期, 客户名称, 型号,
                工序全名, 工序, 计件数量, 系数, 定额, 金额, 备注
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                item.compute_row_hash(ordinal),
                item.file_name,
                item.sheet_name,
                item.employee,
                item.date,
                item.customer,
                item.model,
                item.process_full_name,
                item.process,
                item.piece_count,
                item.coefficient,
                item.quoted_rate,
                item.amount,
                item.remark,
            ],
        );

        match result {
            Ok(_) => stats.inserted += 1,
            Err(ref e) if is_duplicate(e) => stats.duplicates += 1,
            Err(e) => return Err(e).context("Failed to insert payroll line"),
        }
    }

    info!(inserted = stats.inserted, duplicates = stats.duplicates, "payroll import finished");
    Ok(stats)
}

pub fn insert_rate_entries(conn: &Connection, entries: &[RateEntry]) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    for (ordinal, entry) in entries.iter().enumerate() {
        let result = conn.execute(
            "INSERT INTO quota (
                row_hash, 类别1, 类别2, 加工工序, 型号, 定额, effected_from
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.compute_row_hash(ordinal),
                entry.primary_category,
                entry.secondary_category,
                entry.process,
                entry.model,
                entry.rate,
                entry.effected_from,
            ],
        );

        match result {
            Ok(_) => stats.inserted += 1,
            Err(ref e) if is_duplicate(e) => stats.duplicates += 1,
            Err(e) => return Err(e).context("Failed to insert quota row"),
        }
    }

    info!(inserted = stats.inserted, duplicates = stats.duplicates, "quota import finished");
    Ok(stats)
}

// ============================================================================
// INSPECTION
// ============================================================================

/// Column as reported by PRAGMA table_info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub position: i64,
    pub name: String,
    pub declared_type: String,
}

pub fn table_columns(conn: &Connection, table: Table) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table.name()))?;

    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                position: row.get(0)?,
                name: row.get(1)?,
                declared_type: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns)
}

pub fn count_rows(conn: &Connection, table: Table) -> Result<i64> {
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows of {}", table.name()))?;

    Ok(count)
}
