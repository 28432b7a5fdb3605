//! SQL分析步骤。
//!
//! 四个确定性模板（周环比漂移分类、校准逾期、本周平台坐标超差比例、
//! 日期范围走势）直接生成参数化只读SQL；其余问题走即席路径，由模型
//! 依据库结构与领域知识翻译成SQL，仍经同一只读通道执行。
//! 成功执行会登记一个数据集工件，行数不超过上限时把完整行内联进结果。

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};

use crate::agent::action::SqlTemplate;
use crate::agent::planner::TOOL_IDS;
use crate::agent::state::{AgentState, DatasetArtifact, StepKind, StepResult};
use crate::llm::client::utils::extract_sql;
use crate::llm::generative::GenerativeService;
use crate::sources::query_service::{INLINE_ROWS_CAP, QueryResultSet, SqliteQueryService};

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid iso date pattern"));

/// 即席SQL提示里知识摘录的截断长度
const KNOWLEDGE_EXCERPT_CHARS: usize = 4000;

/// 周环比漂移分类。两周窗口都取全部设备，按配方统计异常设备数k_anom，
/// 再据此给请求设备的每个配方打标签。
const DRIFT_WEEKLY_SQL: &str = "\
WITH span AS (
    SELECT tool, recipe,
           SUM(CASE WHEN date BETWEEN date(:today, '-6 days') AND :today
                    THEN pre_defectwise_count ELSE 0 END) AS this_sum,
           SUM(CASE WHEN date BETWEEN date(:today, '-13 days') AND date(:today, '-7 days')
                    THEN pre_defectwise_count ELSE 0 END) AS last_sum
    FROM defects_daily
    WHERE date BETWEEN date(:today, '-13 days') AND :today
    GROUP BY tool, recipe
),
scored AS (
    SELECT tool, recipe, this_sum, last_sum,
           CASE WHEN last_sum > 0
                THEN ABS(this_sum - last_sum) * 1.0 / last_sum END AS diff_pct,
           CASE WHEN last_sum > 0
                     AND ABS(this_sum - last_sum) * 1.0 / last_sum > 0.10
                THEN 1 ELSE 0 END AS is_anomalous
    FROM span
),
recipe_anom AS (
    SELECT recipe, SUM(is_anomalous) AS k_anom
    FROM scored
    GROUP BY recipe
)
SELECT s.tool, s.recipe, s.this_sum, s.last_sum,
       ROUND(s.diff_pct, 4) AS diff_pct,
       r.k_anom,
       CASE WHEN s.last_sum = 0 THEN 'UNKNOWN_BASELINE'
            WHEN s.is_anomalous = 0 THEN 'STABLE'
            WHEN r.k_anom = 1 THEN 'TOOL_DRIFT'
            ELSE 'PROCESS_DRIFT' END AS label
FROM scored s
JOIN recipe_anom r ON s.recipe = r.recipe
WHERE s.tool = :tool
ORDER BY CASE
             WHEN s.last_sum = 0 THEN 2
             WHEN s.is_anomalous = 0 THEN 3
             WHEN r.k_anom = 1 THEN 0
             ELSE 1
         END,
         s.recipe";

const CALIBRATION_OVERDUE_SQL: &str = "\
SELECT tool, subsystem, cal_name, last_cal_date, freq_days,
       date(last_cal_date, '+' || freq_days || ' days') AS due_date,
       CASE WHEN :today > date(last_cal_date, '+' || freq_days || ' days')
            THEN 1 ELSE 0 END AS is_overdue
FROM calibrations
WHERE tool = :tool
ORDER BY is_overdue DESC, due_date ASC";

const STAGE_WC_WEEKLY_SQL: &str = "\
SELECT recipe,
       COUNT(*) AS total_points,
       SUM(CASE WHEN ABS(x) > 150 OR ABS(y) > 150 THEN 1 ELSE 0 END) AS abnormal_points,
       ROUND(SUM(CASE WHEN ABS(x) > 150 OR ABS(y) > 150 THEN 1 ELSE 0 END) * 1.0
             / COUNT(*), 4) AS abnormal_ratio
FROM wc_points
WHERE tool = :tool
  AND date BETWEEN date(:today, '-6 days') AND :today
GROUP BY recipe
ORDER BY abnormal_ratio DESC, total_points DESC, recipe ASC";

const DEFECT_TREND_RANGE_SQL: &str = "\
SELECT date, tool, recipe,
       SUM(pre_defectwise_count) AS total_defects,
       COUNT(*) AS total_rows
FROM defects_daily
WHERE tool = :tool
  AND date BETWEEN :start_date AND :end_date
GROUP BY date, tool, recipe
ORDER BY date ASC";

const ADHOC_SQL_SYSTEM_PROMPT: &str = "\
You translate analyst questions about a fab inspection metrology database into a \
single read-only SQLite SELECT statement. Use only the tables and columns listed \
in the schema. Never modify data. Answer with the SQL statement only.";

/// SQL分析步骤
pub struct SqlAnalysisStep {
    query_service: Arc<SqliteQueryService>,
    generative: Arc<dyn GenerativeService>,
    today: NaiveDate,
}

impl SqlAnalysisStep {
    pub fn new(
        query_service: Arc<SqliteQueryService>,
        generative: Arc<dyn GenerativeService>,
        today: NaiveDate,
    ) -> Self {
        Self {
            query_service,
            generative,
            today,
        }
    }

    /// 执行一次SQL分析动作并把结果写回状态
    pub async fn execute(
        &self,
        state: &mut AgentState,
        template: Option<SqlTemplate>,
        tool: Option<String>,
        start_date: Option<String>,
        end_date: Option<String>,
        question: Option<String>,
        tables: Vec<String>,
    ) {
        let result = match template {
            Some(template) => self.run_template(state, template, tool, start_date, end_date),
            None => self.run_adhoc(state, tool, question, tables).await,
        };
        state.record_step(result);
    }

    fn run_template(
        &self,
        state: &mut AgentState,
        template: SqlTemplate,
        tool: Option<String>,
        start_date: Option<String>,
        end_date: Option<String>,
    ) -> StepResult {
        let Some(tool) = tool.filter(|t| TOOL_IDS.contains(&t.as_str())) else {
            return StepResult::failure(
                StepKind::SqlAnalysis,
                format!("Tool must be one of: {}.", TOOL_IDS.join("/")),
            );
        };
        let today = self.today.format("%Y-%m-%d").to_string();

        let execution = match template {
            SqlTemplate::DefectDriftWeekly => self.query_service.execute_with_params(
                DRIFT_WEEKLY_SQL,
                &[(":tool", &tool), (":today", &today)],
            ),
            SqlTemplate::CalibrationOverdue => self.query_service.execute_with_params(
                CALIBRATION_OVERDUE_SQL,
                &[(":tool", &tool), (":today", &today)],
            ),
            SqlTemplate::StageWcWeekly => self.query_service.execute_with_params(
                STAGE_WC_WEEKLY_SQL,
                &[(":tool", &tool), (":today", &today)],
            ),
            SqlTemplate::DefectTrendRange => {
                let (Some(start), Some(end)) = (start_date, end_date) else {
                    return StepResult::failure(
                        StepKind::SqlAnalysis,
                        "Trend analysis needs a start and an end date.",
                    );
                };
                if !ISO_DATE_RE.is_match(&start) || !ISO_DATE_RE.is_match(&end) {
                    return StepResult::failure(
                        StepKind::SqlAnalysis,
                        format!("Malformed date range: {} .. {}", start, end),
                    );
                }
                self.query_service.execute_with_params(
                    DEFECT_TREND_RANGE_SQL,
                    &[(":tool", &tool), (":start_date", &start), (":end_date", &end)],
                )
            }
        };

        match execution {
            Ok(result_set) => {
                let (summary, extra) = match template {
                    SqlTemplate::DefectDriftWeekly => summarize_drift(&tool, &result_set),
                    SqlTemplate::CalibrationOverdue => summarize_calibrations(&tool, &result_set),
                    SqlTemplate::StageWcWeekly => summarize_wc_ratio(&tool, &result_set),
                    SqlTemplate::DefectTrendRange => (
                        format!(
                            "Defect trend for {}: {} daily rows in range.",
                            tool, result_set.row_count
                        ),
                        json!({}),
                    ),
                };
                register_success(
                    state,
                    result_set,
                    summary,
                    json!({
                        "mode": "template",
                        "template": template_name(template),
                        "tool": tool,
                    }),
                    extra,
                )
            }
            Err(err) => StepResult::failure(
                StepKind::SqlAnalysis,
                format!("{} query failed: {}", template_name(template), err),
            ),
        }
    }

    async fn run_adhoc(
        &self,
        state: &mut AgentState,
        tool: Option<String>,
        question: Option<String>,
        tables: Vec<String>,
    ) -> StepResult {
        let question = question.unwrap_or_else(|| state.user_query.clone());
        let mut prompt = format!(
            "# Database schema\n{}\n\n# Domain notes\n{}\n\n# Question\n{}",
            state.schema_snapshot,
            excerpt(&state.knowledge_text, KNOWLEDGE_EXCERPT_CHARS),
            question
        );
        if let Some(tool) = &tool {
            prompt.push_str(&format!("\n\nThe question is about tool {}.", tool));
        }
        if !tables.is_empty() {
            prompt.push_str(&format!(
                "\n\nLikely relevant tables: {}.",
                tables.join(", ")
            ));
        }

        let response = match self
            .generative
            .generate(ADHOC_SQL_SYSTEM_PROMPT, &prompt)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return StepResult::failure(
                    StepKind::SqlAnalysis,
                    format!("SQL generation failed: {}", err),
                );
            }
        };

        let sql = extract_sql(&response);
        if !SqliteQueryService::is_read_only(&sql) {
            return StepResult::failure(
                StepKind::SqlAnalysis,
                "Generated SQL was rejected: only read-only SELECT statements are allowed.",
            );
        }

        match self.query_service.execute(&sql) {
            Ok(result_set) => {
                let summary = format!(
                    "Ad-hoc query returned {} rows ({} columns).",
                    result_set.row_count,
                    result_set.columns.len()
                );
                register_success(
                    state,
                    result_set,
                    summary,
                    json!({ "mode": "ad_hoc", "sql": sql, "tables": tables }),
                    json!({}),
                )
            }
            Err(err) => StepResult::failure(
                StepKind::SqlAnalysis,
                format!("Ad-hoc query failed: {}", err),
            ),
        }
    }
}

/// 登记数据集工件并构造成功结果；行数不超过上限时内联完整行
fn register_success(
    state: &mut AgentState,
    result_set: QueryResultSet,
    summary: String,
    base_detail: Value,
    extra: Value,
) -> StepResult {
    let artifact = DatasetArtifact {
        location: result_set.csv_path.to_string_lossy().to_string(),
        row_count: result_set.row_count,
        columns: result_set.columns.clone(),
        sample_preview: result_set.sample_preview(),
    };
    state.register_artifact(&result_set.dataset_id, artifact);

    let mut detail = base_detail;
    if let Value::Object(map) = &mut detail {
        map.insert("dataset_id".into(), json!(result_set.dataset_id));
        map.insert(
            "location".into(),
            json!(result_set.csv_path.to_string_lossy()),
        );
        map.insert("row_count".into(), json!(result_set.row_count));
        map.insert("columns".into(), json!(result_set.columns));
        if result_set.row_count <= INLINE_ROWS_CAP {
            map.insert("rows".into(), json!(result_set.rows));
        }
        if let Value::Object(extra_map) = extra {
            for (key, value) in extra_map {
                map.insert(key, value);
            }
        }
    }

    StepResult::success(StepKind::SqlAnalysis, summary, detail)
}

/// 漂移分类汇总：有至少一个TOOL_DRIFT配方即判UNHEALTHY
fn summarize_drift(tool: &str, result_set: &QueryResultSet) -> (String, Value) {
    let mut tool_drift = 0usize;
    let mut process_drift = 0usize;
    let mut unknown_baseline = 0usize;

    for row in &result_set.rows {
        let label = row.get("label").and_then(|v| v.as_str()).unwrap_or("");
        let k_anom = row.get("k_anom").and_then(|v| v.as_i64()).unwrap_or(0);
        match label {
            "TOOL_DRIFT" => tool_drift += 1,
            "PROCESS_DRIFT" => process_drift += 1,
            "UNKNOWN_BASELINE" => unknown_baseline += 1,
            _ => {}
        }
        // 按构造不可达：异常标签必然伴随k_anom >= 1
        if (label == "TOOL_DRIFT" || label == "PROCESS_DRIFT") && k_anom == 0 {
            eprintln!(
                "⚠️ drift row for {} carries label {} with k_anom = 0; classification query is inconsistent",
                tool, label
            );
        }
    }

    let tool_health = if tool_drift > 0 { "UNHEALTHY" } else { "HEALTHY" };
    let summary = format!(
        "Weekly drift for {}: {} ({} TOOL_DRIFT, {} PROCESS_DRIFT of {} recipes).",
        tool, tool_health, tool_drift, process_drift, result_set.row_count
    );
    let extra = json!({
        "tool_health": tool_health,
        "tool_drift_recipe_count": tool_drift,
        "process_drift_recipe_count": process_drift,
        "unknown_baseline_recipe_count": unknown_baseline,
    });
    (summary, extra)
}

/// 校准汇总。逾期行与子系统清单不受行内联上限约束，始终随明细携带，
/// 供子系统解读直接消费。
fn summarize_calibrations(tool: &str, result_set: &QueryResultSet) -> (String, Value) {
    let overdue_rows: Vec<_> = result_set
        .rows
        .iter()
        .filter(|row| row.get("is_overdue").and_then(|v| v.as_i64()) == Some(1))
        .collect();
    let mut subsystems: Vec<&str> = result_set
        .rows
        .iter()
        .filter_map(|row| row.get("subsystem").and_then(|v| v.as_str()))
        .collect();
    subsystems.sort_unstable();
    subsystems.dedup();

    let summary = format!(
        "Calibrations for {}: {} of {} overdue.",
        tool,
        overdue_rows.len(),
        result_set.row_count
    );
    let extra = json!({
        "overdue_count": overdue_rows.len(),
        "overdue_rows": overdue_rows,
        "subsystems": subsystems,
    });
    (summary, extra)
}

fn summarize_wc_ratio(tool: &str, result_set: &QueryResultSet) -> (String, Value) {
    let max_ratio = result_set
        .rows
        .iter()
        .filter_map(|row| row.get("abnormal_ratio").and_then(|v| v.as_f64()))
        .fold(0.0f64, f64::max);
    let summary = format!(
        "Stage coordinates for {}: worst out-of-spec ratio {:.4} across {} recipes.",
        tool, max_ratio, result_set.row_count
    );
    (summary, json!({ "max_abnormal_ratio": max_ratio }))
}

fn template_name(template: SqlTemplate) -> &'static str {
    match template {
        SqlTemplate::DefectDriftWeekly => "defect_drift_weekly",
        SqlTemplate::CalibrationOverdue => "calibration_overdue",
        SqlTemplate::StageWcWeekly => "stage_wc_weekly",
        SqlTemplate::DefectTrendRange => "defect_trend_range",
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}...", kept)
}
