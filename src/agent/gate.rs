//! 澄清闸口与跨轮会话记忆。
//!
//! 会话层字段（对话历史、澄清答案、上次设备号、未回答的澄清请求）由
//! 调用方持有并在多轮之间回传。闸口在调度器运行之前处理新输入：若上
//! 一轮以澄清请求结束，新输入记作该请求的答案并恢复原始问题——澄清
//! 回答的是子问题，不替换主问题。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::state::{ChatMessage, ClarificationRequest};

/// 上一轮遗留的澄清请求与被暂停的主问题
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTurn {
    pub clarification: ClarificationRequest,
    pub original_query: String,
}

/// 调用方持有的跨轮会话记忆
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMemory {
    pub chat_history: Vec<ChatMessage>,
    pub clarification_answers: BTreeMap<String, String>,
    pub last_tool: Option<String>,
    pub pending: Option<PendingTurn>,
}

/// 接纳一轮新输入，返回本轮实际要回答的问题。
///
/// 存在未回答的澄清请求时，新输入并入澄清答案并恢复原始问题；
/// 否则新输入本身就是问题。
pub fn admit(memory: &mut SessionMemory, input: &str) -> String {
    match memory.pending.take() {
        Some(pending) => {
            memory
                .clarification_answers
                .insert(pending.clarification.id, input.trim().to_string());
            pending.original_query
        }
        None => input.to_string(),
    }
}

// Include tests
#[cfg(test)]
mod tests;
