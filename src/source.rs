// 📥 Record Sources - Where line-items and quota snapshots come from
//
// RateTableSource: one bulk read per run. Failures are logged and yield an
//                  empty snapshot (no match is possible, the run goes on).
// PayrollSource:   lazy, forward-only sequence of line-items. End of data is
//                  `None`; a storage failure is logged and also ends it.
//
// Cells are read by value type, so tables written by other tools (codes and
// dates stored as INTEGER) decode. A row that still fails is logged and skipped.

use crate::db::{payroll_from_row, rate_from_row, PayrollLineItem, RateEntry, PAYROLL_COLUMNS, QUOTA_COLUMNS};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, error, warn};

// ============================================================================
// TRAITS
// ============================================================================

pub trait RateTableSource {
    /// Every quota row, in storage order
    fn load_all(&self) -> Vec<RateEntry>;
}

pub trait PayrollSource {
    /// Line-items whose file identifier starts with `prefix` (all when None),
    /// optionally restricted to one sheet/category
    fn for_file<'s>(
        &'s self,
        prefix: Option<&str>,
        category: Option<&str>,
    ) -> Box<dyn Iterator<Item = PayrollLineItem> + 's>;
}

/// Selection applied by a payroll source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayrollFilter {
    pub prefix: Option<String>,
    pub category: Option<String>,
}

impl PayrollFilter {
    pub fn new(prefix: Option<&str>, category: Option<&str>) -> Self {
        PayrollFilter {
            prefix: prefix.map(str::to_string),
            category: category.map(str::to_string),
        }
    }

    pub fn accepts(&self, item: &PayrollLineItem) -> bool {
        let prefix_ok = self
            .prefix
            .as_deref()
            .map_or(true, |p| item.file_name.starts_with(p));
        let category_ok = self
            .category
            .as_deref()
            .map_or(true, |c| item.sheet_name == c);

        prefix_ok && category_ok
    }
}

// ============================================================================
// IN-MEMORY SOURCES
// ============================================================================

impl RateTableSource for Vec<RateEntry> {
    fn load_all(&self) -> Vec<RateEntry> {
        self.clone()
    }
}

impl PayrollSource for Vec<PayrollLineItem> {
    fn for_file<'s>(
        &'s self,
        prefix: Option<&str>,
        category: Option<&str>,
    ) -> Box<dyn Iterator<Item = PayrollLineItem> + 's> {
        let filter = PayrollFilter::new(prefix, category);
        Box::new(self.iter().filter(move |item| filter.accepts(item)).cloned())
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Ok(SqliteStore { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        SqliteStore { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Bulk read of the quota table, surfacing storage errors
    ///
    /// A row whose cells cannot be decoded is logged and left out of the
    /// snapshot; the remaining rows are still returned.
    pub fn try_load_all(&self) -> Result<Vec<RateEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT rowid, {} FROM quota ORDER BY rowid", QUOTA_COLUMNS))
            .context("Failed to prepare quota query")?;

        let mut rows = stmt.query([]).context("Failed to query quota table")?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next().context("Failed to read quota rows")? {
            match rate_from_row(row, 1) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    let rowid: Option<i64> = row.get(0).ok();
                    warn!(?rowid, error = %e, "skipping undecodable quota row");
                }
            }
        }

        Ok(entries)
    }

    /// Cursor over payroll_details honouring `filter`
    pub fn payroll_cursor(&self, filter: PayrollFilter) -> PayrollCursor<'_> {
        PayrollCursor::new(&self.conn, filter)
    }
}

impl RateTableSource for SqliteStore {
    fn load_all(&self) -> Vec<RateEntry> {
        match self.try_load_all() {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %format!("{:#}", e), "quota table read failed, continuing with an empty snapshot");
                Vec::new()
            }
        }
    }
}

impl PayrollSource for SqliteStore {
    fn for_file<'s>(
        &'s self,
        prefix: Option<&str>,
        category: Option<&str>,
    ) -> Box<dyn Iterator<Item = PayrollLineItem> + 's> {
        Box::new(self.payroll_cursor(PayrollFilter::new(prefix, category)))
    }
}

// ============================================================================
// PAYROLL CURSOR
// ============================================================================

/// Reads one row per `next()` call, keyed on rowid, so nothing beyond the
/// current line-item is held in memory
pub struct PayrollCursor<'conn> {
    conn: &'conn Connection,
    filter: PayrollFilter,
    last_rowid: i64,
    skipped_rows: usize,
    exhausted: bool,
}

impl<'conn> PayrollCursor<'conn> {
    pub fn new(conn: &'conn Connection, filter: PayrollFilter) -> Self {
        PayrollCursor {
            conn,
            filter,
            last_rowid: 0,
            skipped_rows: 0,
            exhausted: false,
        }
    }

    /// Rows stepped over because their cells could not be decoded
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Next row past `last_rowid`; the decode result is kept separate so a
    /// bad row can be stepped over
    fn fetch_next(&self) -> Result<Option<(i64, rusqlite::Result<PayrollLineItem>)>> {
        let sql = format!(
            "SELECT rowid, {}
             FROM payroll_details
             WHERE rowid > ?1
               AND (?2 IS NULL OR substr(文件名, 1, length(?2)) = ?2)
               AND (?3 IS NULL OR sheet名 = ?3)
             ORDER BY rowid
             LIMIT 1",
            PAYROLL_COLUMNS
        );

        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .context("Failed to prepare payroll query")?;

        let row = stmt
            .query_row(
                params![self.last_rowid, self.filter.prefix, self.filter.category],
                |row| Ok((row.get::<_, i64>(0)?, payroll_from_row(row, 1))),
            )
            .optional()
            .context("Failed to read payroll row")?;

        Ok(row)
    }
}

impl Iterator for PayrollCursor<'_> {
    type Item = PayrollLineItem;

    fn next(&mut self) -> Option<PayrollLineItem> {
        while !self.exhausted {
            match self.fetch_next() {
                Ok(Some((rowid, Ok(item)))) => {
                    self.last_rowid = rowid;
                    return Some(item);
                }
                Ok(Some((rowid, Err(e)))) => {
                    warn!(rowid, error = %e, "skipping undecodable payroll row");
                    self.last_rowid = rowid;
                    self.skipped_rows += 1;
                }
                Ok(None) => {
                    debug!(last_rowid = self.last_rowid, skipped_rows = self.skipped_rows, "payroll cursor exhausted");
                    self.exhausted = true;
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "payroll read failed, ending sequence");
                    self.exhausted = true;
                }
            }
        }

        None
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{create_test_line_item, create_test_rate_entry};
    use crate::db::{insert_payroll_items, insert_rate_entries, setup_database};

    fn seeded_store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        insert_payroll_items(
            &conn,
            &[
                create_test_line_item("202005.xls", "绕嵌排", "张三", 4.0),
                create_test_line_item("202005.xls", "精加工", "李四", 2.5),
                create_test_line_item("202005_1.xls", "绕嵌排", "王五", 0.0),
                create_test_line_item("202006.xls", "绕嵌排", "赵六", 4.0),
            ],
        )
        .unwrap();

        insert_rate_entries(
            &conn,
            &[
                create_test_rate_entry("绕嵌排", 4.0, "20200401"),
                create_test_rate_entry("精加工", 2.5, "20200401"),
            ],
        )
        .unwrap();

        SqliteStore::from_connection(conn)
    }

    #[test]
    fn test_load_all_preserves_order() {
        let store = seeded_store();
        let entries = store.load_all();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].primary_category, "绕嵌排");
        assert_eq!(entries[1].primary_category, "精加工");
    }

    #[test]
    fn test_load_all_degrades_to_empty_on_error() {
        // No schema: the read fails and the snapshot is empty
        let store = SqliteStore::from_connection(Connection::open_in_memory().unwrap());

        assert!(store.try_load_all().is_err());
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_cursor_prefix_filter() {
        let store = seeded_store();
        let employees: Vec<String> = store
            .for_file(Some("202005"), None)
            .map(|item| item.employee)
            .collect();

        assert_eq!(employees, vec!["张三", "李四", "王五"]);
    }

    #[test]
    fn test_cursor_prefix_and_category_filter() {
        let store = seeded_store();
        let employees: Vec<String> = store
            .for_file(Some("202005"), Some("绕嵌排"))
            .map(|item| item.employee)
            .collect();

        assert_eq!(employees, vec!["张三", "王五"]);
    }

    #[test]
    fn test_cursor_without_filter_reads_everything() {
        let store = seeded_store();
        assert_eq!(store.for_file(None, None).count(), 4);
    }

    #[test]
    fn test_cursor_stays_exhausted() {
        let store = seeded_store();
        let mut cursor = store.payroll_cursor(PayrollFilter::new(Some("202006"), None));

        assert_eq!(cursor.next().unwrap().employee, "赵六");
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_cursor_ends_on_storage_error() {
        let store = SqliteStore::from_connection(Connection::open_in_memory().unwrap());
        assert_eq!(store.for_file(None, None).count(), 0);
    }

    /// Untyped tables, as left behind by other writers, with numeric cells
    fn untyped_store() -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE quota (类别1, 类别2, 加工工序, 型号, 定额, effected_from);
             INSERT INTO quota VALUES ('绕嵌排', '定子', '下线', 'Y2-132', 4, 20200401);
             INSERT INTO quota VALUES ('绕嵌排', '定子', '下线', 'Y2-160', 5, '20200401');
             INSERT INTO quota VALUES ('绕嵌排', '定子', '下线', 'Y2-180', 'n/a', '20200401');

             CREATE TABLE payroll_details (文件名, sheet名, 职员全名, 日期, 客户名称, 型号,
                                           工序全名, 工序, 计件数量, 系数, 定额, 金额, 备注);
             INSERT INTO payroll_details VALUES
                 ('202005.xls', '绕嵌排', '张三', '2020-05-01', '客户', 'Y2-132', '绕嵌排-下线', '下线', 10, 1, 4, 40, NULL);
             INSERT INTO payroll_details VALUES
                 ('202005.xls', '绕嵌排', '李四', 20200502, '客户', 132, '绕嵌排-下线', '下线', 10, 1.0, 4.0, 40, '');
             INSERT INTO payroll_details VALUES
                 ('202005.xls', '绕嵌排', '王五', '2020-05-03', '客户', 'Y2-132', '绕嵌排-下线', '下线', 'ten', 1, 4, 40, '');
             INSERT INTO payroll_details VALUES
                 ('202005.xls', '绕嵌排', '赵六', '2020-05-04', '客户', 'Y2-132', '绕嵌排-下线', '下线', 10, 1, 4, 40, '');",
        )
        .unwrap();

        SqliteStore::from_connection(conn)
    }

    #[test]
    fn test_load_all_reads_numeric_cells() {
        crate::logging::init_test();
        let store = untyped_store();

        let entries = store.load_all();

        // Third row has a non-numeric rate and is left out
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].effected_from, "20200401");
        assert_eq!(entries[0].rate, 4.0);
        assert_eq!(entries[1].model, "Y2-160");
    }

    #[test]
    fn test_cursor_reads_numeric_cells_and_skips_bad_rows() {
        crate::logging::init_test();
        let store = untyped_store();
        let mut cursor = store.payroll_cursor(PayrollFilter::new(Some("202005"), None));

        let employees: Vec<String> = cursor.by_ref().map(|item| item.employee).collect();

        assert_eq!(employees, vec!["张三", "李四", "赵六"]);
        assert_eq!(cursor.skipped_rows(), 1);
    }

    #[test]
    fn test_cursor_integer_model_becomes_text() {
        let store = untyped_store();
        let item = store.for_file(None, None).nth(1).unwrap();

        assert_eq!(item.model, "132");
        assert_eq!(item.date, "20200502");
        assert_eq!(item.quoted_rate, 4.0);
    }

    #[test]
    fn test_memory_sources() {
        let items = vec![
            create_test_line_item("202005.xls", "绕嵌排", "张三", 4.0),
            create_test_line_item("202006.xls", "绕嵌排", "李四", 4.0),
        ];

        let selected: Vec<_> = items.for_file(Some("202006"), Some("绕嵌排")).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].employee, "李四");

        let snapshot = vec![create_test_rate_entry("绕嵌排", 4.0, "20200401")];
        assert_eq!(snapshot.load_all(), snapshot);
    }
}
