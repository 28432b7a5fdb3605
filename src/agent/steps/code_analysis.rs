//! 代码分析步骤。
//!
//! 针对已登记的数据集工件生成分析代码并交给沙盒执行；不允许直接访问
//! 数据库。成功时记录指标、图表路径与文本摘要，失败时记录截断的错误
//! 与出错行附近的代码片段，循环继续。

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::state::{AgentState, StepKind, StepResult};
use crate::llm::client::utils::extract_code;
use crate::llm::generative::GenerativeService;
use crate::sources::sandbox::AnalysisSandbox;

const CODEGEN_SYSTEM_PROMPT: &str = "\
You write short Python analysis scripts for fab metrology datasets. The \
execution context provides: `DATASETS`, a dict mapping dataset id to a CSV \
file path; `save_plot(fig, name)` to persist a matplotlib figure; pandas and \
matplotlib are importable. Load data only from `DATASETS`. Put headline \
numbers into a dict named `metrics` and print a one-paragraph summary. \
Answer with the Python code only.";

/// 代码分析步骤
pub struct CodeAnalysisStep {
    sandbox: Arc<dyn AnalysisSandbox>,
    generative: Arc<dyn GenerativeService>,
}

impl CodeAnalysisStep {
    pub fn new(sandbox: Arc<dyn AnalysisSandbox>, generative: Arc<dyn GenerativeService>) -> Self {
        Self {
            sandbox,
            generative,
        }
    }

    /// 生成并执行一段数据集分析代码，把产出写回状态
    pub async fn execute(&self, state: &mut AgentState, instruction: Option<String>) {
        let result = self.run(state, instruction).await;
        state.record_step(result);
    }

    async fn run(&self, state: &AgentState, instruction: Option<String>) -> StepResult {
        if state.data_artifacts.is_empty() {
            return StepResult::failure(
                StepKind::CodeAnalysis,
                "No dataset available for code analysis.",
            );
        }

        let datasets: BTreeMap<String, String> = state
            .data_artifacts
            .iter()
            .map(|(id, artifact)| (id.clone(), artifact.location.clone()))
            .collect();

        let instruction = instruction.unwrap_or_else(|| state.user_query.clone());
        let prompt = format!(
            "# Task\n{}\n\n# Datasets\n{}",
            instruction,
            describe_datasets(state)
        );

        let response = match self.generative.generate(CODEGEN_SYSTEM_PROMPT, &prompt).await {
            Ok(response) => response,
            Err(err) => {
                return StepResult::failure(
                    StepKind::CodeAnalysis,
                    format!("Analysis code generation failed: {}", err),
                );
            }
        };
        let code = extract_code(&response);

        match self.sandbox.run(&code, &datasets).await {
            Ok(outcome) if outcome.is_ok() => {
                let summary = outcome
                    .stdout
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "Analysis code ran without printed output.".to_string());
                StepResult::success(
                    StepKind::CodeAnalysis,
                    summary,
                    json!({
                        "metrics": outcome.metrics,
                        "plots": outcome.plots,
                        "result": outcome.result,
                        "code": code,
                    }),
                )
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "analysis code failed".to_string());
                StepResult {
                    step: StepKind::CodeAnalysis,
                    summary: format!("Analysis code failed: {}", message),
                    detail: json!({
                        "code": code,
                        "code_context": outcome.code_context,
                    }),
                    error: Some(message),
                }
            }
            Err(err) => StepResult::failure(
                StepKind::CodeAnalysis,
                format!("Sandbox execution failed: {}", err),
            ),
        }
    }
}

/// 数据集描述：id、路径、列与样例行，供代码生成提示使用
fn describe_datasets(state: &AgentState) -> String {
    state
        .data_artifacts
        .iter()
        .map(|(id, artifact)| {
            let preview = serde_json::to_string(&artifact.sample_preview).unwrap_or_default();
            format!(
                "- {} ({} rows) at {}\n  columns: {}\n  sample: {}",
                id,
                artifact.row_count,
                artifact.location,
                artifact.columns.join(", "),
                preview
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
