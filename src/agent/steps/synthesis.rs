//! 最终答案合成。
//!
//! 收尾动作触达后，把问题、澄清答案与证据日志交给生成式服务写成
//! 面向用户的回答。强制收尾（循环越界、决策解析失败）同样用已积累的
//! 证据作答；步骤失败以行内附注而不是堆栈形式出现在答案里。

use anyhow::Result;

use crate::agent::state::AgentState;
use crate::llm::generative::GenerativeService;

/// 合成提示里证据摘要的条数上限
const EVIDENCE_WINDOW: usize = 10;

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You write the final answer for a fab equipment-health analyst. Ground every \
claim in the evidence log below; quote concrete numbers and labels where they \
exist. If a step failed, mention the gap as a short inline caveat instead of \
showing any raw error. Answer the user's question directly and concisely.";

/// 依据完整状态合成最终答案
pub async fn synthesize_final_answer(
    generative: &dyn GenerativeService,
    state: &AgentState,
    reason: Option<&str>,
    raw_decision: Option<&str>,
) -> Result<String> {
    let mut prompt = format!(
        "# Question\n{}\n\n# Evidence log\n{}",
        state.user_query,
        evidence_log(state)
    );

    if !state.clarification_answers.is_empty() {
        let answers = state
            .clarification_answers
            .iter()
            .map(|(id, answer)| format!("- {}: {}", id, answer))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!("\n\n# Clarifications from the user\n{}", answers));
    }

    if let Some(reason) = reason {
        prompt.push_str(&format!("\n\n# Why the run ended\n{}", reason));
    }
    if let Some(raw) = raw_decision {
        prompt.push_str(&format!(
            "\n\n# Unparsed router output (may contain a draft answer)\n{}",
            raw
        ));
    }

    generative.generate(SYNTHESIS_SYSTEM_PROMPT, &prompt).await
}

/// 证据日志：最近几条步骤结果的摘要与关键明细
fn evidence_log(state: &AgentState) -> String {
    if state.step_results.is_empty() {
        return "(no evidence was collected)".to_string();
    }

    let start = state.step_results.len().saturating_sub(EVIDENCE_WINDOW);
    state.step_results[start..]
        .iter()
        .map(|result| {
            let mut line = format!("- [{}] {}", result.step, result.summary);
            if let Some(error) = &result.error {
                line.push_str(&format!(" (failed: {})", error));
            }
            for key in ["verdict", "tool_health", "rows", "hits", "subsystems", "metrics"] {
                if let Some(value) = result.detail.get(key) {
                    line.push_str(&format!("\n  {}: {}", key, value));
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// Include tests
#[cfg(test)]
mod tests;
