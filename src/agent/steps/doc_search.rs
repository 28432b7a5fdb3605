//! 文档检索步骤。
//!
//! 把问题交给手册检索索引做Top-K近邻查询，命中原样存入结果日志。
//! 一旦出现有命中的检索结果，调度器会在下一轮直接收尾，避免检索
//! 与重规划之间来回震荡。

use serde_json::json;
use std::sync::Arc;

use crate::agent::state::{AgentState, StepKind, StepResult};
use crate::sources::doc_index::DocIndex;

/// 文档检索步骤
pub struct DocSearchStep {
    index: Arc<DocIndex>,
    default_top_k: usize,
}

impl DocSearchStep {
    pub fn new(index: Arc<DocIndex>, default_top_k: usize) -> Self {
        Self {
            index,
            default_top_k,
        }
    }

    /// 检索手册并把命中写回状态
    pub fn execute(&self, state: &mut AgentState, query: Option<String>, top_k: Option<usize>) {
        let query = query.unwrap_or_else(|| state.user_query.clone());
        let top_k = top_k.unwrap_or(self.default_top_k);

        let result = if self.index.is_empty() {
            StepResult::failure(
                StepKind::DocumentSearch,
                "Manual index is empty; run ingestion first.",
            )
        } else {
            let hits = self.index.search(&query, top_k);
            let summary = if hits.is_empty() {
                format!("No manual passages matched \"{}\".", query)
            } else {
                format!("Found {} manual passage(s) for \"{}\".", hits.len(), query)
            };
            StepResult::success(
                StepKind::DocumentSearch,
                summary,
                json!({ "query": query, "top_k": top_k, "hits": hits }),
            )
        };

        state.record_step(result);
    }
}
