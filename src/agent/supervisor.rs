//! 调度器：控制循环的单步推进。
//!
//! 每次`advance`按固定顺序决定下一个动作：循环越界强制收尾 →
//! 决定性的文档检索结果直接收尾 → 消费确定性队列 → 确定性规划器 →
//! 决策服务兜底。决策服务的应答解析失败不致命，降级为携带原始文本的
//! 收尾动作。

use serde_json::json;

use crate::agent::action::NextAction;
use crate::agent::planner::{self, PlannerOutcome};
use crate::agent::state::{AgentState, ClarificationRequest};
use crate::llm::generative::GenerativeService;

/// 单次问答内控制循环的安全上限
pub const MAX_LOOPS: u32 = 20;

/// 决策提示里步骤摘要的条数
const DECISION_DIGEST_STEPS: usize = 5;

/// 决策提示里知识摘录的截断长度
const KNOWLEDGE_EXCERPT_CHARS: usize = 2000;

const DECISION_SYSTEM_PROMPT: &str = "\
You route the next step of a fab equipment-health analysis agent. Reply with a \
single JSON object whose `action_type` is one of: sql_analysis, code_analysis, \
domain_interpretation, visualization, document_search, ask_user, finish. \
Optional fields: sql_analysis {question, tool}; code_analysis {instruction}; \
visualization {dataset_id, chart_type}; document_search {query, top_k}; \
ask_user {id, question}; finish {reason}. Prefer finish once the evidence \
already answers the question. No prose outside the JSON.";

/// 推进控制循环一步：结束时`pending_action`已就绪，或已进入待澄清终态
pub async fn advance(state: &mut AgentState, decision: &dyn GenerativeService) {
    state.loop_count += 1;

    // 安全上限：强制收尾，清掉待澄清请求
    if state.loop_count > MAX_LOOPS {
        state.pending_clarification = None;
        state.action_queue.clear();
        state.pending_action = Some(NextAction::finish("loop bound reached"));
        return;
    }

    // 已有可收尾的文档检索结果时不再重规划，避免震荡
    if state.has_decisive_doc_result() {
        state.pending_action = Some(NextAction::finish("documentation evidence collected"));
        return;
    }

    // 确定性队列优先
    if let Some(action) = state.action_queue.pop_front() {
        apply_action(state, action);
        return;
    }

    // 确定性规划器
    let plan = planner::plan(state);
    if let Some(tool) = &plan.resolved_tool {
        state.last_tool = Some(tool.clone());
    }
    if plan.subsystem_mode {
        state.subsystem_mode = true;
    }
    match plan.outcome {
        PlannerOutcome::Queue(actions) => {
            state.action_queue.extend(actions);
            if let Some(action) = state.action_queue.pop_front() {
                apply_action(state, action);
            }
            return;
        }
        PlannerOutcome::Immediate(action) => {
            apply_action(state, action);
            return;
        }
        PlannerOutcome::Decline => {}
    }

    // 决策服务兜底
    let action = consult_decision_service(state, decision).await;
    apply_action(state, action);
}

/// 把选定动作放进状态；澄清动作直接进入待澄清终态
fn apply_action(state: &mut AgentState, action: NextAction) {
    if let NextAction::AskUser { id, question } = action {
        state.pending_action = None;
        state.action_queue.clear();
        state.pending_clarification = Some(ClarificationRequest { id, question });
        return;
    }
    state.pending_action = Some(action);
}

/// 决策服务兜底：应答必须解析成带`action_type`的JSON，否则降级收尾
async fn consult_decision_service(
    state: &AgentState,
    decision: &dyn GenerativeService,
) -> NextAction {
    let payload = json!({
        "question": state.user_query,
        "schema": state.schema_snapshot,
        "knowledge": excerpt(&state.knowledge_text, KNOWLEDGE_EXCERPT_CHARS),
        "clarifications": state.clarification_answers,
        "recent_results": state.recent_digest(DECISION_DIGEST_STEPS),
        "datasets": state.data_artifacts.keys().collect::<Vec<_>>(),
    });
    let prompt = payload.to_string();

    match decision.generate(DECISION_SYSTEM_PROMPT, &prompt).await {
        Ok(raw) => NextAction::parse_decision(&raw).unwrap_or_else(|| {
            NextAction::finish_with_raw("decision response was not parseable", raw)
        }),
        Err(err) => {
            NextAction::finish_with_raw("decision service unavailable", err.to_string())
        }
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}...", kept)
}
