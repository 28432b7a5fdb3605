//! 数据库结构快照。
//!
//! 每轮问答开始前对量测库做一次结构内省，生成供提示与规划使用的
//! Markdown快照。

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 列结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// 表结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// 数据库结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    /// 内省SQLite数据库结构
    pub fn introspect(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open database: {:?}", db_path))?;

        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .context("Failed to list tables")?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to read table names")?
            .collect::<std::result::Result<_, _>>()?;

        let mut tables = Vec::new();
        for table_name in table_names {
            let mut info =
                conn.prepare(&format!("PRAGMA table_info(\"{}\")", table_name))?;
            let columns: Vec<ColumnSchema> = info
                .query_map([], |row| {
                    Ok(ColumnSchema {
                        name: row.get::<_, String>(1)?,
                        data_type: row.get::<_, String>(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                        primary_key: row.get::<_, i64>(5)? != 0,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;

            tables.push(TableSchema {
                name: table_name,
                columns,
            });
        }

        Ok(Self { tables })
    }

    /// 渲染为Markdown快照
    pub fn to_markdown(&self) -> String {
        if self.tables.is_empty() {
            return "(no tables found)".to_string();
        }

        let mut out = String::new();
        for table in &self.tables {
            out.push_str(&format!("## Table: {}\n", table.name));
            for column in &table.columns {
                let mut flags = Vec::new();
                if column.primary_key {
                    flags.push("PK");
                }
                if column.not_null {
                    flags.push("NOT NULL");
                }
                let suffix = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                out.push_str(&format!(
                    "- {} ({}){}\n",
                    column.name, column.data_type, suffix
                ));
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}
