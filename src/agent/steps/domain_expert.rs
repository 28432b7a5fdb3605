//! 领域解读步骤。
//!
//! 子系统模式是纯算法：把校准逾期与平台坐标超差比例聚合成按子系统的
//! 健康表，不调用模型。通用模式的结论标签只由主证据（周环比漂移分类）
//! 在调用模型之前算定，辅助证据只进入叙述提示，结构上无法改写结论。

use serde_json::{Value, json};
use std::sync::Arc;

use crate::agent::state::{AgentState, StepKind, StepResult};
use crate::llm::generative::GenerativeService;

/// 平台子系统超差比例的严重阈值
const STAGE_RATIO_THRESHOLD: f64 = 0.05;

/// 叙述提示里证据摘要的条数上限
const FINDINGS_WINDOW: usize = 5;

/// 叙述提示里知识摘录的截断长度
const KNOWLEDGE_EXCERPT_CHARS: usize = 4000;

const NARRATIVE_SYSTEM_PROMPT: &str = "\
You are a fab equipment-health domain expert. The health verdict has already \
been decided from the weekly drift classification and is final; you must not \
change it. Explain the verdict to a process engineer in a short paragraph, \
citing the drift labels and, where relevant, the supporting calibration and \
stage-position evidence.";

/// 领域解读步骤
pub struct DomainExpertStep {
    generative: Arc<dyn GenerativeService>,
}

impl DomainExpertStep {
    pub fn new(generative: Arc<dyn GenerativeService>) -> Self {
        Self { generative }
    }

    /// 依据状态里的既有证据给出健康解读并写回结果
    pub async fn execute(&self, state: &mut AgentState) {
        let result = if state.subsystem_mode {
            interpret_subsystems(state)
        } else {
            self.interpret_general(state).await
        };
        state.record_step(result);
    }

    async fn interpret_general(&self, state: &AgentState) -> StepResult {
        // 结论只看主证据：周环比漂移分类
        let Some(drift) = latest_template_detail(state, "defect_drift_weekly") else {
            return StepResult::failure(
                StepKind::DomainInterpretation,
                "No primary drift evidence to interpret.",
            );
        };

        let verdict = match drift.get("tool_health").and_then(|v| v.as_str()) {
            Some("UNHEALTHY") => "Unhealthy",
            _ => "Healthy",
        };
        let tool = drift
            .get("tool")
            .and_then(|v| v.as_str())
            .unwrap_or("the tool");

        let supporting = supporting_evidence(state);
        let prompt = format!(
            "Tool: {}\nFinal verdict: {}\n\n# Primary evidence (weekly drift)\n{}\n\n\
             # Supporting evidence\n{}\n\n# Recent findings\n{}\n\n# Domain notes\n{}",
            tool,
            verdict,
            drift,
            supporting,
            state.recent_digest(FINDINGS_WINDOW),
            excerpt(&state.knowledge_text, KNOWLEDGE_EXCERPT_CHARS),
        );

        let detail = json!({
            "mode": "general",
            "verdict": verdict,
            "tool": tool,
            "supporting": supporting,
        });

        match self.generative.generate(NARRATIVE_SYSTEM_PROMPT, &prompt).await {
            Ok(narrative) => {
                let mut detail = detail;
                if let Value::Object(map) = &mut detail {
                    map.insert("narrative".into(), json!(narrative));
                }
                StepResult::success(
                    StepKind::DomainInterpretation,
                    format!("{} is {} based on weekly drift.", tool, verdict),
                    detail,
                )
            }
            // 叙述失败不影响结论：结果仍携带算定的verdict，错误留痕
            Err(err) => StepResult {
                step: StepKind::DomainInterpretation,
                summary: format!("{} is {} (narrative unavailable).", tool, verdict),
                detail,
                error: Some(format!("narrative generation failed: {}", err)),
            },
        }
    }
}

/// 子系统健康表：任一逾期校准即Unhealthy；平台子系统另看超差比例
fn interpret_subsystems(state: &AgentState) -> StepResult {
    let calibrations = latest_template_detail(state, "calibration_overdue");
    let wc_ratio = latest_template_detail(state, "stage_wc_weekly");

    if calibrations.is_none() && wc_ratio.is_none() {
        return StepResult::failure(
            StepKind::DomainInterpretation,
            "No subsystem evidence to interpret.",
        );
    }

    // 逾期行与子系统清单由SQL步骤随明细携带，不依赖行内联（大结果集下行不内联）
    let overdue_rows = array_field(calibrations, "overdue_rows");
    let tool = calibrations
        .and_then(|d| d.get("tool"))
        .or_else(|| wc_ratio.and_then(|d| d.get("tool")))
        .and_then(|v| v.as_str())
        .unwrap_or("the tool")
        .to_string();

    let mut subsystem_names: Vec<String> = array_field(calibrations, "subsystems")
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.to_string())
        .collect();
    if !subsystem_names.iter().any(|s| s == "stage") {
        subsystem_names.push("stage".to_string());
    }
    subsystem_names.sort();
    subsystem_names.dedup();

    let max_ratio = wc_ratio
        .and_then(|d| d.get("max_abnormal_ratio"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let mut table = Vec::new();
    let mut unhealthy = Vec::new();
    for name in subsystem_names {
        let mut notes = Vec::new();

        for row in overdue_rows
            .iter()
            .filter(|row| row.get("subsystem").and_then(|v| v.as_str()) == Some(name.as_str()))
        {
            let cal_name = row.get("cal_name").and_then(|v| v.as_str()).unwrap_or("?");
            let due = row.get("due_date").and_then(|v| v.as_str()).unwrap_or("?");
            notes.push(format!("Overdue: {} (due {})", cal_name, due));
        }

        if name == "stage" && max_ratio > STAGE_RATIO_THRESHOLD {
            notes.push(format!(
                "Out-of-spec position ratio {:.4} this week (threshold {})",
                max_ratio, STAGE_RATIO_THRESHOLD
            ));
        }

        let status = if notes.is_empty() { "Healthy" } else { "Unhealthy" };
        if status == "Unhealthy" {
            unhealthy.push(name.clone());
        }
        table.push(json!({
            "subsystem": name,
            "status": status,
            "note": notes.join("; "),
        }));
    }

    let verdict = if unhealthy.is_empty() {
        "Healthy"
    } else {
        "Unhealthy"
    };
    let summary = if unhealthy.is_empty() {
        format!("Subsystem review for {}: all subsystems Healthy.", tool)
    } else {
        format!(
            "Subsystem review for {}: Unhealthy ({}).",
            tool,
            unhealthy.join(", ")
        )
    };

    StepResult::success(
        StepKind::DomainInterpretation,
        summary,
        json!({
            "mode": "subsystem",
            "verdict": verdict,
            "tool": tool,
            "subsystems": table,
        }),
    )
}

/// 最近一次指定模板的成功SQL结果明细
fn latest_template_detail<'a>(state: &'a AgentState, template: &str) -> Option<&'a Value> {
    state
        .step_results
        .iter()
        .rev()
        .find(|r| {
            r.step == StepKind::SqlAnalysis
                && !r.is_error()
                && r.detail.get("template").and_then(|t| t.as_str()) == Some(template)
        })
        .map(|r| &r.detail)
}

fn array_field<'a>(detail: Option<&'a Value>, key: &str) -> Vec<&'a Value> {
    detail
        .and_then(|d| d.get(key))
        .and_then(|values| values.as_array())
        .map(|values| values.iter().collect())
        .unwrap_or_default()
}

/// 辅助证据摘要：只作为叙述语境，不参与结论
fn supporting_evidence(state: &AgentState) -> Value {
    let overdue = latest_template_detail(state, "calibration_overdue")
        .and_then(|d| d.get("overdue_count"))
        .cloned();
    let max_ratio = latest_template_detail(state, "stage_wc_weekly")
        .and_then(|d| d.get("max_abnormal_ratio"))
        .cloned();

    json!({
        "calibration_overdue_count": overdue,
        "stage_max_abnormal_ratio": max_ratio,
    })
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}...", kept)
}

// Include tests
#[cfg(test)]
mod tests;
