//! Agent共享执行状态。
//!
//! 一次问答的全部可变状态都集中在`AgentState`里：当前问题、对话记忆、
//! 待执行动作与动作队列、步骤结果日志、数据集工件、澄清请求与最终答案。
//! 调用方持有对话层字段（历史、澄清答案、上次设备号）并在多轮之间回传。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

use crate::agent::action::NextAction;

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// 对话消息，按从旧到新的顺序排列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 能力步骤种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SqlAnalysis,
    CodeAnalysis,
    DomainInterpretation,
    Visualization,
    DocumentSearch,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::SqlAnalysis => "sql_analysis",
            StepKind::CodeAnalysis => "code_analysis",
            StepKind::DomainInterpretation => "domain_interpretation",
            StepKind::Visualization => "visualization",
            StepKind::DocumentSearch => "document_search",
        };
        write!(f, "{}", name)
    }
}

/// 单个能力步骤的执行结果。
///
/// 结果日志只允许追加，后续步骤不得改写已有条目。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: StepKind,
    pub summary: String,
    /// 结构化明细：行数据、指标、检索命中等
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
    /// 失败时的错误描述；成功时为None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    pub fn success(step: StepKind, summary: impl Into<String>, detail: Value) -> Self {
        Self {
            step,
            summary: summary.into(),
            detail,
            error: None,
        }
    }

    pub fn failure(step: StepKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            step,
            summary: message.clone(),
            detail: Value::Null,
            error: Some(message),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 查询结果数据集的登记信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetArtifact {
    /// 落盘CSV的路径
    pub location: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// 前几行样例，用于提示与图表规划
    pub sample_preview: Vec<BTreeMap<String, Value>>,
}

/// 待用户回答的澄清请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub id: String,
    pub question: String,
}

/// 一次问答的共享执行状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// 当前问题
    pub user_query: String,

    /// 对话历史（调用方持有，本轮内只读）
    pub chat_history: Vec<ChatMessage>,

    /// 跨轮累积的澄清答案，键为澄清请求id
    pub clarification_answers: BTreeMap<String, String>,

    /// 上一次解析出的设备号，用于后续轮次免提问
    pub last_tool: Option<String>,

    /// 数据库结构快照（本轮只读）
    pub schema_snapshot: String,

    /// 领域知识全文（本轮只读）
    pub knowledge_text: String,

    /// 按表名索引的知识片段（本轮只读）
    pub knowledge_index: BTreeMap<String, String>,

    /// 当前待执行动作，至多一个
    pub pending_action: Option<NextAction>,

    /// 计划动作队列，从队首依次消费
    pub action_queue: VecDeque<NextAction>,

    /// 步骤结果日志，只追加
    pub step_results: Vec<StepResult>,

    /// 数据集工件登记表，同一id只写入一次
    pub data_artifacts: BTreeMap<String, DatasetArtifact>,

    /// 待用户回答的澄清请求；与final_answer互斥
    pub pending_clarification: Option<ClarificationRequest>,

    /// 最终答案；与pending_clarification互斥
    pub final_answer: Option<String>,

    /// 控制循环计数
    pub loop_count: u32,

    /// 子系统聚焦模式：限定允许给出结论的证据来源
    pub subsystem_mode: bool,
}

impl AgentState {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            chat_history: Vec::new(),
            clarification_answers: BTreeMap::new(),
            last_tool: None,
            schema_snapshot: String::new(),
            knowledge_text: String::new(),
            knowledge_index: BTreeMap::new(),
            pending_action: None,
            action_queue: VecDeque::new(),
            step_results: Vec::new(),
            data_artifacts: BTreeMap::new(),
            pending_clarification: None,
            final_answer: None,
            loop_count: 0,
            subsystem_mode: false,
        }
    }

    /// 追加步骤结果并清除当前待执行动作
    pub fn record_step(&mut self, result: StepResult) {
        self.step_results.push(result);
        self.pending_action = None;
    }

    /// 登记数据集工件。同一id重复登记会被拒绝，返回false。
    pub fn register_artifact(&mut self, dataset_id: &str, artifact: DatasetArtifact) -> bool {
        if self.data_artifacts.contains_key(dataset_id) {
            return false;
        }
        self.data_artifacts.insert(dataset_id.to_string(), artifact);
        true
    }

    /// 最近n条步骤结果的摘要行，供决策提示使用
    pub fn recent_digest(&self, n: usize) -> String {
        let start = self.step_results.len().saturating_sub(n);
        self.step_results[start..]
            .iter()
            .map(|r| format!("{}: {}", r.step, r.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 本轮是否已出现可直接收尾的文档检索结果（有命中且无错误）
    pub fn has_decisive_doc_result(&self) -> bool {
        self.step_results.iter().any(|r| {
            r.step == StepKind::DocumentSearch
                && !r.is_error()
                && r.detail
                    .get("hits")
                    .and_then(|h| h.as_array())
                    .is_some_and(|hits| !hits.is_empty())
        })
    }

    /// 是否已达到终态（给出答案或等待用户澄清）
    pub fn is_terminal(&self) -> bool {
        self.final_answer.is_some() || self.pending_clarification.is_some()
    }
}

// Include tests
#[cfg(test)]
mod tests;
