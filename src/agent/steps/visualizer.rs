//! 可视化步骤。
//!
//! 以指定或首个数据集工件为目标，先由模型在既有列名的约束下规划图表
//! （至多3张，且只允许引用存在的列），再渲染成确定性的绘图代码交给
//! 沙盒执行。规划失败时退化为按提示类型画首个数值列的单张图。

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::state::{AgentState, DatasetArtifact, StepKind, StepResult};
use crate::llm::generative::{ChartPlan, ChartSpec, GenerativeService};
use crate::sources::sandbox::AnalysisSandbox;

/// 单次可视化的图表数上限
const MAX_FIGURES: usize = 3;

const CHART_PLAN_SYSTEM_PROMPT: &str = "\
You plan charts for a tabular dataset. Propose at most 3 charts. Use only the \
listed column names for x and y; never invent columns. chart_type must be one \
of line, bar or scatter.";

/// 可视化步骤
pub struct VisualizerStep {
    sandbox: Arc<dyn AnalysisSandbox>,
    generative: Arc<dyn GenerativeService>,
}

impl VisualizerStep {
    pub fn new(sandbox: Arc<dyn AnalysisSandbox>, generative: Arc<dyn GenerativeService>) -> Self {
        Self {
            sandbox,
            generative,
        }
    }

    /// 对目标数据集出图并把结果写回状态
    pub async fn execute(
        &self,
        state: &mut AgentState,
        dataset_id: Option<String>,
        chart_type: Option<String>,
    ) {
        let result = self.run(state, dataset_id, chart_type).await;
        state.record_step(result);
    }

    async fn run(
        &self,
        state: &AgentState,
        dataset_id: Option<String>,
        chart_type: Option<String>,
    ) -> StepResult {
        // 指定id优先，否则取最先登记的数据集
        let resolved = match &dataset_id {
            Some(id) => state.data_artifacts.get_key_value(id.as_str()),
            None => state.data_artifacts.iter().next(),
        };
        let Some((dataset_id, artifact)) = resolved else {
            return StepResult::failure(
                StepKind::Visualization,
                "No dataset available for visualization.",
            );
        };

        let charts = self
            .plan_charts(state, artifact, chart_type.as_deref())
            .await;
        if charts.is_empty() {
            return StepResult::failure(
                StepKind::Visualization,
                "No plottable columns in the target dataset.",
            );
        }

        let code = render_plot_code(dataset_id, &charts);
        let datasets: BTreeMap<String, String> =
            BTreeMap::from([(dataset_id.clone(), artifact.location.clone())]);

        match self.sandbox.run(&code, &datasets).await {
            Ok(outcome) if outcome.is_ok() => StepResult::success(
                StepKind::Visualization,
                format!(
                    "Rendered {} chart(s) from {}.",
                    outcome.plots.len(),
                    dataset_id
                ),
                json!({
                    "dataset_id": dataset_id,
                    "plots": outcome.plots,
                    "charts": charts,
                }),
            ),
            Ok(outcome) => StepResult::failure(
                StepKind::Visualization,
                format!(
                    "Plotting code failed: {}",
                    outcome.error.unwrap_or_else(|| "unknown error".to_string())
                ),
            ),
            Err(err) => StepResult::failure(
                StepKind::Visualization,
                format!("Sandbox execution failed: {}", err),
            ),
        }
    }

    /// 图表规划：模型提案过滤到合法列，失败则退化为默认单图
    async fn plan_charts(
        &self,
        state: &AgentState,
        artifact: &DatasetArtifact,
        chart_type: Option<&str>,
    ) -> Vec<ChartSpec> {
        let prompt = format!(
            "Columns: {}\nRows: {}\nQuestion: {}{}",
            artifact.columns.join(", "),
            artifact.row_count,
            state.user_query,
            chart_type
                .map(|t| format!("\nPreferred chart type: {}", t))
                .unwrap_or_default()
        );

        let planned = match self
            .generative
            .plan_charts(CHART_PLAN_SYSTEM_PROMPT, &prompt)
            .await
        {
            Ok(ChartPlan { charts }) => charts,
            Err(_) => Vec::new(),
        };

        let mut valid: Vec<ChartSpec> = planned
            .into_iter()
            .filter(|spec| {
                artifact.columns.contains(&spec.x) && artifact.columns.contains(&spec.y)
            })
            .take(MAX_FIGURES)
            .collect();

        if valid.is_empty()
            && let Some(spec) = default_chart(artifact, chart_type)
        {
            valid.push(spec);
        }
        valid
    }
}

/// 默认图：首列为X，首个数值列为Y
fn default_chart(artifact: &DatasetArtifact, chart_type: Option<&str>) -> Option<ChartSpec> {
    let x = artifact.columns.first()?.clone();
    let y = artifact
        .columns
        .iter()
        .find(|column| {
            *column != &x
                && artifact.sample_preview.iter().any(|row| {
                    row.get(*column)
                        .map(|value| value.is_number())
                        .unwrap_or(false)
                })
        })
        .cloned()
        .or_else(|| artifact.columns.get(1).cloned())?;

    Some(ChartSpec {
        chart_type: chart_type.unwrap_or("line").to_string(),
        title: format!("{} by {}", y, x),
        x,
        y,
    })
}

/// 由图表规划渲染确定性的matplotlib代码
fn render_plot_code(dataset_id: &str, charts: &[ChartSpec]) -> String {
    let mut code = String::from(
        "import pandas as pd\n\
         import matplotlib\n\
         matplotlib.use(\"Agg\")\n\
         import matplotlib.pyplot as plt\n\n",
    );
    code.push_str(&format!("df = pd.read_csv(DATASETS[{:?}])\n", dataset_id));

    for (idx, spec) in charts.iter().enumerate() {
        let plot_call = match spec.chart_type.as_str() {
            "bar" => format!("ax.bar(df[{:?}], df[{:?}])", spec.x, spec.y),
            "scatter" => format!("ax.scatter(df[{:?}], df[{:?}])", spec.x, spec.y),
            _ => format!("ax.plot(df[{:?}], df[{:?}], marker=\"o\")", spec.x, spec.y),
        };
        code.push_str(&format!(
            "\nfig, ax = plt.subplots(figsize=(8, 4))\n\
             {}\n\
             ax.set_title({:?})\n\
             ax.set_xlabel({:?})\n\
             ax.set_ylabel({:?})\n\
             fig.autofmt_xdate()\n\
             save_plot(fig, \"chart_{}.png\")\n\
             plt.close(fig)\n",
            plot_call,
            spec.title,
            spec.x,
            spec.y,
            idx + 1
        ));
    }

    code
}
