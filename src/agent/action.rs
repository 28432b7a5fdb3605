//! 控制循环的动作模型。
//!
//! 动作以`action_type`作为判别标签序列化，决策服务返回的JSON按同一标签
//! 解析；解析失败不报错，由调度方降级为携带原始文本的收尾动作。

use serde::{Deserialize, Serialize};

use crate::llm::client::utils::strip_code_fence;

/// 确定性SQL分析模板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlTemplate {
    /// 周环比缺陷漂移分类
    DefectDriftWeekly,
    /// 校准逾期清单
    CalibrationOverdue,
    /// 本周平台坐标超差比例
    StageWcWeekly,
    /// 指定日期范围的缺陷走势
    DefectTrendRange,
}

/// 下一步动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum NextAction {
    /// SQL分析：给定模板或即席问题
    SqlAnalysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<SqlTemplate>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_date: Option<String>,
        /// 即席路径下交给模型翻译成SQL的问题
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question: Option<String>,
        /// 规划器从问题推断出的候选表，即席路径用作提示
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tables: Vec<String>,
    },
    /// 代码分析：对已登记数据集执行生成的分析代码
    CodeAnalysis {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
    },
    /// 领域解读：把既有证据转成健康结论
    DomainInterpretation,
    /// 可视化：对指定或首个数据集出图
    Visualization {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dataset_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chart_type: Option<String>,
    },
    /// 文档检索
    DocumentSearch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_k: Option<usize>,
    },
    /// 向用户提出澄清问题（终态）
    AskUser { id: String, question: String },
    /// 收尾并进入答案合成（终态）
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// 决策解析失败时携带的原始模型输出
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_decision: Option<String>,
    },
}

impl NextAction {
    pub fn finish(reason: impl Into<String>) -> Self {
        NextAction::Finish {
            reason: Some(reason.into()),
            raw_decision: None,
        }
    }

    pub fn finish_with_raw(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        NextAction::Finish {
            reason: Some(reason.into()),
            raw_decision: Some(raw.into()),
        }
    }

    /// 动作短名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            NextAction::SqlAnalysis { .. } => "sql_analysis",
            NextAction::CodeAnalysis { .. } => "code_analysis",
            NextAction::DomainInterpretation => "domain_interpretation",
            NextAction::Visualization { .. } => "visualization",
            NextAction::DocumentSearch { .. } => "document_search",
            NextAction::AskUser { .. } => "ask_user",
            NextAction::Finish { .. } => "finish",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NextAction::AskUser { .. } | NextAction::Finish { .. }
        )
    }

    /// 解析决策服务返回的动作JSON。
    ///
    /// 先整体解析，失败后回退到首个`{`与末个`}`之间的片段再试一次；
    /// 仍失败则返回None，由调用方降级处理。
    pub fn parse_decision(raw: &str) -> Option<NextAction> {
        let cleaned = strip_code_fence(raw);

        if let Ok(action) = serde_json::from_str::<NextAction>(&cleaned) {
            return Some(action);
        }

        let start = cleaned.find('{')?;
        let end = cleaned.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<NextAction>(&cleaned[start..=end]).ok()
    }
}
