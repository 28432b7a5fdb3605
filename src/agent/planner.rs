//! 确定性规划器。
//!
//! 规划器是`(当前问题, 澄清答案, 设备记忆, 对话历史, 步骤日志)`的纯函数：
//! 能用关键词与设备号直接判定的问题绝不消耗模型调用。判定不了时明确放弃，
//! 由调度器转交决策服务兜底。

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

use crate::agent::action::{NextAction, SqlTemplate};
use crate::agent::state::{AgentState, StepKind};

/// 受支持的检测设备号
pub const TOOL_IDS: [&str; 4] = ["8950XR-P1", "8950XR-P2", "8950XR-P3", "8950XR-P4"];

static TOOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b8950XR-P([1-4])\b").expect("valid tool pattern"));

static SHORT_TOOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bP([1-4])\b").expect("valid short tool pattern"));

static DATE_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{8})\s*(?:-|~|to)\s*(\d{8})").expect("valid date range pattern")
});

const HEALTH_KEYWORDS: [&str; 7] = [
    "health",
    "healthy",
    "unhealthy",
    "drift",
    "abnormal",
    "anomal",
    "degrad",
];

const REASON_KEYWORDS: [&str; 3] = ["why", "reason", "root cause"];

const SUBSYSTEM_KEYWORDS: [&str; 5] = ["stage", "camera", "focus", "illumination", "subsystem"];

const TREND_KEYWORDS: [&str; 6] = ["trend", "over time", "history", "plot", "chart", "visualiz"];

const DOC_KEYWORDS: [&str; 9] = [
    "how do",
    "how to",
    "manual",
    "guide",
    "document",
    "troubleshoot",
    "procedure",
    "instruction",
    "spec sheet",
];

const DATA_VERB_KEYWORDS: [&str; 8] = [
    "count", "show", "list", "average", "how many", "rows", "data", "sum",
];

/// 规划结果
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutcome {
    /// 依次入队执行
    Queue(Vec<NextAction>),
    /// 立即作为当前动作执行，不入队
    Immediate(NextAction),
    /// 规划器放弃，交给决策服务
    Decline,
}

/// 一次规划的完整输出
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerPlan {
    pub outcome: PlannerOutcome,
    /// 本次解析出的设备号（来自问题、澄清、记忆或历史）
    pub resolved_tool: Option<String>,
    /// 是否进入子系统聚焦模式
    pub subsystem_mode: bool,
}

impl PlannerPlan {
    fn decline(resolved_tool: Option<String>) -> Self {
        Self {
            outcome: PlannerOutcome::Decline,
            resolved_tool,
            subsystem_mode: false,
        }
    }
}

/// 对当前状态做一次确定性规划
pub fn plan(state: &AgentState) -> PlannerPlan {
    let query = state.user_query.to_lowercase();
    let resolved_tool = resolve_tool(state);

    if contains_any(&query, &HEALTH_KEYWORDS) {
        return plan_health(&query, resolved_tool);
    }

    if contains_any(&query, &TREND_KEYWORDS)
        && let Some(tool) = resolved_tool.clone()
        && let Some((start_date, end_date)) = extract_date_range(&state.user_query)
    {
        let queue = vec![
            NextAction::SqlAnalysis {
                template: Some(SqlTemplate::DefectTrendRange),
                tool: Some(tool),
                start_date: Some(start_date),
                end_date: Some(end_date),
                question: None,
                tables: Vec::new(),
            },
            NextAction::Visualization {
                dataset_id: None,
                chart_type: Some("line".to_string()),
            },
            NextAction::finish("trend analysis complete"),
        ];
        return PlannerPlan {
            outcome: PlannerOutcome::Queue(queue),
            resolved_tool,
            subsystem_mode: false,
        };
    }

    if contains_any(&query, &DOC_KEYWORDS) {
        let queue = vec![
            NextAction::DocumentSearch {
                query: Some(state.user_query.clone()),
                top_k: None,
            },
            NextAction::finish("documentation lookup complete"),
        ];
        return PlannerPlan {
            outcome: PlannerOutcome::Queue(queue),
            resolved_tool,
            subsystem_mode: false,
        };
    }

    if contains_any(&query, &DATA_VERB_KEYWORDS) {
        let tables = infer_tables(&query);
        if !tables.is_empty() {
            // 即席SQL只跑一次：已有成功结果就直接收尾
            if has_successful_adhoc_sql(state) {
                return PlannerPlan {
                    outcome: PlannerOutcome::Immediate(NextAction::finish(
                        "ad-hoc query already answered",
                    )),
                    resolved_tool,
                    subsystem_mode: false,
                };
            }
            return PlannerPlan {
                outcome: PlannerOutcome::Immediate(NextAction::SqlAnalysis {
                    template: None,
                    tool: resolved_tool.clone(),
                    start_date: None,
                    end_date: None,
                    question: Some(state.user_query.clone()),
                    tables,
                }),
                resolved_tool,
                subsystem_mode: false,
            };
        }
    }

    PlannerPlan::decline(resolved_tool)
}

fn plan_health(query: &str, resolved_tool: Option<String>) -> PlannerPlan {
    let Some(tool) = resolved_tool.clone() else {
        let question = format!(
            "Which tool should I check? Please answer with one of: {}.",
            TOOL_IDS.join(", ")
        );
        return PlannerPlan {
            outcome: PlannerOutcome::Immediate(NextAction::AskUser {
                id: "tool".to_string(),
                question,
            }),
            resolved_tool: None,
            subsystem_mode: false,
        };
    };

    if contains_any(query, &SUBSYSTEM_KEYWORDS) {
        let queue = vec![
            NextAction::SqlAnalysis {
                template: Some(SqlTemplate::CalibrationOverdue),
                tool: Some(tool.clone()),
                start_date: None,
                end_date: None,
                question: None,
                tables: Vec::new(),
            },
            NextAction::SqlAnalysis {
                template: Some(SqlTemplate::StageWcWeekly),
                tool: Some(tool.clone()),
                start_date: None,
                end_date: None,
                question: None,
                tables: Vec::new(),
            },
            NextAction::DomainInterpretation,
            NextAction::finish("subsystem health review complete"),
        ];
        return PlannerPlan {
            outcome: PlannerOutcome::Queue(queue),
            resolved_tool,
            subsystem_mode: true,
        };
    }

    let mut queue = vec![NextAction::SqlAnalysis {
        template: Some(SqlTemplate::DefectDriftWeekly),
        tool: Some(tool.clone()),
        start_date: None,
        end_date: None,
        question: None,
        tables: Vec::new(),
    }];

    // 追问原因时补充校准与平台坐标两类辅助证据
    if contains_any(query, &REASON_KEYWORDS) {
        queue.push(NextAction::SqlAnalysis {
            template: Some(SqlTemplate::CalibrationOverdue),
            tool: Some(tool.clone()),
            start_date: None,
            end_date: None,
            question: None,
            tables: Vec::new(),
        });
        queue.push(NextAction::SqlAnalysis {
            template: Some(SqlTemplate::StageWcWeekly),
            tool: Some(tool.clone()),
            start_date: None,
            end_date: None,
            question: None,
            tables: Vec::new(),
        });
    }

    queue.push(NextAction::DomainInterpretation);
    queue.push(NextAction::finish("health review complete"));

    PlannerPlan {
        outcome: PlannerOutcome::Queue(queue),
        resolved_tool,
        subsystem_mode: false,
    }
}

/// 设备号解析，优先级：当前问题 > 澄清答案 > 上次设备号 > 对话历史倒查
fn resolve_tool(state: &AgentState) -> Option<String> {
    if let Some(tool) = extract_tool(&state.user_query) {
        return Some(tool);
    }

    if let Some(answer) = state.clarification_answers.get("tool")
        && let Some(tool) = extract_tool(answer)
    {
        return Some(tool);
    }
    for answer in state.clarification_answers.values() {
        if let Some(tool) = extract_tool(answer) {
            return Some(tool);
        }
    }

    if let Some(last) = &state.last_tool
        && let Some(tool) = extract_tool(last)
    {
        return Some(tool);
    }

    for message in state.chat_history.iter().rev() {
        if let Some(tool) = extract_tool(&message.content) {
            return Some(tool);
        }
    }

    None
}

/// 从文本中提取设备号并规范化为大写全称
fn extract_tool(text: &str) -> Option<String> {
    if let Some(captures) = TOOL_RE.captures(text) {
        return captures.get(1).map(|n| format!("8950XR-P{}", n.as_str()));
    }
    if let Some(captures) = SHORT_TOOL_RE.captures(text) {
        return captures.get(1).map(|n| format!("8950XR-P{}", n.as_str()));
    }
    None
}

/// 提取`YYYYMMDD`-`YYYYMMDD`形式的日期范围，输出`YYYY-MM-DD`
fn extract_date_range(text: &str) -> Option<(String, String)> {
    let captures = DATE_RANGE_RE.captures(text)?;
    let start = parse_compact_date(captures.get(1)?.as_str())?;
    let end = parse_compact_date(captures.get(2)?.as_str())?;

    if start > end {
        return Some((format_date(end), format_date(start)));
    }
    Some((format_date(start), format_date(end)))
}

fn parse_compact_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// 从泛数据问题推断候选目标表
fn infer_tables(query: &str) -> Vec<String> {
    let mut tables = Vec::new();
    if query.contains("defect") {
        tables.push("defects_daily".to_string());
    }
    if query.contains("calibration") || query.contains("cal ") {
        tables.push("calibrations".to_string());
    }
    if query.contains("coordinate") || query.contains("position") || query.contains("wc point") {
        tables.push("wc_points".to_string());
    }
    tables
}

fn has_successful_adhoc_sql(state: &AgentState) -> bool {
    state.step_results.iter().any(|r| {
        r.step == StepKind::SqlAnalysis
            && !r.is_error()
            && r.detail.get("mode").and_then(|m| m.as_str()) == Some("ad_hoc")
    })
}

fn contains_any(query: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| query.contains(k))
}

// Include tests
#[cfg(test)]
mod tests;
