//! 领域知识库。
//!
//! 每轮问答开始前从文档目录加载Markdown领域知识，拼出全文与按表名
//! 索引的片段，供规划提示与领域解读使用。

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

static TABLE_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s+Table:\s*(\S+)\s*$").expect("valid section pattern"));

/// 领域知识：全文与按表名索引的片段
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    pub full_text: String,
    pub sections: BTreeMap<String, String>,
}

impl KnowledgeBase {
    /// 从文档目录加载所有Markdown文件
    pub fn load(docs_path: &Path) -> Result<Self> {
        if !docs_path.exists() {
            return Ok(Self::default());
        }

        let pattern = docs_path.join("*.md");
        let pattern = pattern.to_string_lossy();
        let mut paths: Vec<_> = glob::glob(&pattern)
            .context("Invalid docs path pattern")?
            .filter_map(|entry| entry.ok())
            .collect();
        paths.sort();

        let mut full_text = String::new();
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read knowledge file: {:?}", path))?;
            if !full_text.is_empty() {
                full_text.push_str("\n\n");
            }
            full_text.push_str(content.trim_end());
        }

        let sections = Self::index_sections(&full_text);
        Ok(Self {
            full_text,
            sections,
        })
    }

    /// 按`## Table: <name>`标题切分全文
    fn index_sections(text: &str) -> BTreeMap<String, String> {
        let mut sections = BTreeMap::new();

        let matches: Vec<_> = TABLE_SECTION_RE.captures_iter(text).collect();
        for (idx, captures) in matches.iter().enumerate() {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let Some(name) = captures.get(1) else {
                continue;
            };

            let body_start = whole.end();
            let body_end = matches
                .get(idx + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());

            sections.insert(
                name.as_str().to_string(),
                text[body_start..body_end].trim().to_string(),
            );
        }

        sections
    }

    /// 截断到指定长度的知识摘录，供提示拼装
    pub fn excerpt(&self, max_chars: usize) -> String {
        if self.full_text.chars().count() <= max_chars {
            return self.full_text.clone();
        }
        let truncated: String = self.full_text.chars().take(max_chars).collect();
        format!("{}\n...(truncated)", truncated)
    }

    pub fn is_empty(&self) -> bool {
        self.full_text.is_empty()
    }
}
