//! 只读SQLite查询服务。
//!
//! 所有SQL（模板或即席）都经过同一条通道：规范化、只读校验、自动LIMIT、
//! 以只读方式打开连接执行，成功后把完整结果落盘为CSV并返回数据集登记信息。

use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

/// 步骤结果里允许内联完整行数据的上限
pub const INLINE_ROWS_CAP: usize = 50;

/// 数据集样例预览的行数
pub const SAMPLE_PREVIEW_ROWS: usize = 5;

static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\blimit\s+\d+").expect("valid limit pattern"));

/// 查询服务错误
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("only read-only SELECT statements are allowed")]
    NotReadOnly,
    #[error("failed to persist result csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to persist result csv: {0}")]
    Io(#[from] std::io::Error),
}

/// 一次查询的完整产出
#[derive(Debug, Clone)]
pub struct QueryResultSet {
    pub dataset_id: String,
    pub csv_path: PathBuf,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, Value>>,
    pub row_count: usize,
}

impl QueryResultSet {
    /// 前几行样例，用于数据集登记与提示拼装
    pub fn sample_preview(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .take(SAMPLE_PREVIEW_ROWS)
            .cloned()
            .collect()
    }
}

/// 只读SQLite查询服务
pub struct SqliteQueryService {
    db_path: PathBuf,
    runtime_dir: PathBuf,
    max_rows: usize,
}

impl SqliteQueryService {
    pub fn new(
        db_path: impl Into<PathBuf>,
        runtime_dir: impl Into<PathBuf>,
        max_rows: usize,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            runtime_dir: runtime_dir.into(),
            max_rows,
        }
    }

    /// 规范化SQL：去掉前导注释行、首尾空白与末尾分号
    pub fn normalize_sql(sql: &str) -> String {
        let without_comments: Vec<&str> = sql
            .lines()
            .skip_while(|line| {
                let trimmed = line.trim();
                trimmed.is_empty() || trimmed.starts_with("--")
            })
            .collect();

        without_comments
            .join("\n")
            .trim()
            .trim_end_matches(';')
            .trim()
            .to_string()
    }

    /// 只读校验：规范化后首个关键字必须是SELECT或WITH
    pub fn is_read_only(sql: &str) -> bool {
        let normalized = Self::normalize_sql(sql).to_lowercase();
        normalized.starts_with("select") || normalized.starts_with("with")
    }

    /// 未显式限定行数的SQL自动追加LIMIT
    pub fn ensure_limit(sql: &str, max_rows: usize) -> String {
        if LIMIT_RE.is_match(sql) {
            return sql.to_string();
        }
        format!("{} LIMIT {}", sql, max_rows)
    }

    /// 执行即席SQL（不带参数）
    pub fn execute(&self, sql: &str) -> Result<QueryResultSet, QueryError> {
        self.execute_with_params(sql, &[])
    }

    /// 执行带命名参数的SQL
    pub fn execute_with_params(
        &self,
        sql: &str,
        params: &[(&str, &dyn rusqlite::ToSql)],
    ) -> Result<QueryResultSet, QueryError> {
        let normalized = Self::normalize_sql(sql);
        if !Self::is_read_only(&normalized) {
            return Err(QueryError::NotReadOnly);
        }
        let bounded = Self::ensure_limit(&normalized, self.max_rows);

        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let mut stmt = conn.prepare(&bounded)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();

        let mut rows = Vec::new();
        let mut raw_rows = stmt.query(params)?;
        while let Some(row) = raw_rows.next()? {
            let mut record = BTreeMap::new();
            for (idx, column) in columns.iter().enumerate() {
                record.insert(column.clone(), value_ref_to_json(row.get_ref(idx)?));
            }
            rows.push(record);
        }

        let dataset_id = new_dataset_id();
        let csv_path = self.persist_csv(&dataset_id, &columns, &rows)?;

        Ok(QueryResultSet {
            dataset_id,
            csv_path,
            row_count: rows.len(),
            columns,
            rows,
        })
    }

    fn persist_csv(
        &self,
        dataset_id: &str,
        columns: &[String],
        rows: &[BTreeMap<String, Value>],
    ) -> Result<PathBuf, QueryError> {
        std::fs::create_dir_all(&self.runtime_dir)?;
        let path = self.runtime_dir.join(format!("{}.csv", dataset_id));

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(columns)?;
        for row in rows {
            let record: Vec<String> = columns
                .iter()
                .map(|column| render_csv_cell(row.get(column)))
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;

        Ok(path)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn new_dataset_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("query_result_{}", &uuid[..8])
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).to_string()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn render_csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// Include tests
#[cfg(test)]
mod tests;
