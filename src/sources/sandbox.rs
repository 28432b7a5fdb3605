//! 代码执行沙盒。
//!
//! 引擎与沙盒的契约：入参是{分析代码, 数据集id到CSV路径的映射}，出参是
//! {状态, 指标, 图表路径, 文本摘要}或{状态, 截断的错误与代码上下文}。
//! 生产实现把代码交给受限的Python子进程执行，结果以标记行后的JSON回传。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

/// 出参JSON前的标记行
const OUTCOME_MARKER: &str = "===FABSCOPE_OUTCOME===";

/// 错误信息的截断长度
const ERROR_TRUNCATE_CHARS: usize = 800;

/// 失败行前后保留的代码上下文行数
const CODE_CONTEXT_LINES: usize = 3;

/// 沙盒错误
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to stage analysis code: {0}")]
    Io(#[from] std::io::Error),
    #[error("sandbox produced no outcome marker: {0}")]
    NoOutcome(String),
    #[error("sandbox outcome was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 一次沙盒执行的结构化出参
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutcome {
    /// `ok`或`error`
    pub status: String,
    /// 捕获的标准输出，作为文本摘要
    #[serde(default)]
    pub stdout: Option<String>,
    /// 代码里约定的`metrics`局部变量
    #[serde(default)]
    pub metrics: Value,
    /// 生成的图表文件路径
    #[serde(default)]
    pub plots: Vec<String>,
    /// 代码里约定的`result`局部变量
    #[serde(default)]
    pub result: Value,
    /// 失败时的截断错误描述
    #[serde(default)]
    pub error: Option<String>,
    /// 失败行附近的代码片段
    #[serde(default)]
    pub code_context: Option<String>,
}

impl SandboxOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// 分析沙盒接口
#[async_trait]
pub trait AnalysisSandbox: Send + Sync {
    /// 执行分析代码；`datasets`把数据集id映射到其CSV路径
    async fn run(
        &self,
        code: &str,
        datasets: &BTreeMap<String, String>,
    ) -> Result<SandboxOutcome, SandboxError>;
}

/// Python子进程沙盒
pub struct PythonSandbox {
    python_bin: String,
    runtime_dir: PathBuf,
}

impl PythonSandbox {
    pub fn new(python_bin: impl Into<String>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            python_bin: python_bin.into(),
            runtime_dir: runtime_dir.into(),
        }
    }

    /// 渲染包装脚本：注入数据集映射与save_plot，捕获标准输出与约定局部变量。
    /// 嵌入的字面量按JSON编码，在Python源码里同为合法字符串，非ASCII路径不转义
    fn render_wrapper(
        code_path: &str,
        datasets_json: &str,
        plots_dir: &str,
    ) -> Result<String, serde_json::Error> {
        let code_path = serde_json::to_string(code_path)?;
        let datasets_json = serde_json::to_string(datasets_json)?;
        let plots_dir = serde_json::to_string(plots_dir)?;
        Ok(format!(
            r#"import contextlib
import io
import json
import os
import traceback

DATASETS = json.loads({datasets_json})
_PLOTS = []
_PLOTS_DIR = {plots_dir}


def save_plot(fig, name):
    os.makedirs(_PLOTS_DIR, exist_ok=True)
    path = os.path.join(_PLOTS_DIR, name)
    fig.savefig(path, bbox_inches="tight")
    _PLOTS.append(path)
    return path


_ns = {{"DATASETS": DATASETS, "save_plot": save_plot}}
_stdout = io.StringIO()
with open({code_path}, "r", encoding="utf-8") as f:
    _code = f.read()
try:
    with contextlib.redirect_stdout(_stdout):
        exec(compile(_code, "analysis.py", "exec"), _ns)
    _outcome = {{
        "status": "ok",
        "stdout": _stdout.getvalue(),
        "metrics": _ns.get("metrics"),
        "plots": _PLOTS + list(_ns.get("plots") or []),
        "result": _ns.get("result"),
    }}
except Exception as exc:
    _tb = traceback.extract_tb(exc.__traceback__)
    _lineno = next(
        (frame.lineno for frame in reversed(_tb) if frame.filename == "analysis.py"),
        None,
    )
    _outcome = {{
        "status": "error",
        "stdout": _stdout.getvalue(),
        "error": "%s: %s" % (type(exc).__name__, exc),
        "lineno": _lineno,
    }}
print("{marker}")
print(json.dumps(_outcome, default=str))
"#,
            datasets_json = datasets_json,
            plots_dir = plots_dir,
            code_path = code_path,
            marker = OUTCOME_MARKER,
        ))
    }
}

#[async_trait]
impl AnalysisSandbox for PythonSandbox {
    async fn run(
        &self,
        code: &str,
        datasets: &BTreeMap<String, String>,
    ) -> Result<SandboxOutcome, SandboxError> {
        std::fs::create_dir_all(&self.runtime_dir)?;
        let run_id = Uuid::new_v4().simple().to_string();
        let run_id = &run_id[..8];

        let code_path = self.runtime_dir.join(format!("analysis_{}.py", run_id));
        std::fs::write(&code_path, code)?;

        let plots_dir = self.runtime_dir.join("plots");
        let datasets_json = serde_json::to_string(datasets)?;
        let wrapper = Self::render_wrapper(
            &code_path.to_string_lossy(),
            &datasets_json,
            &plots_dir.to_string_lossy(),
        )?;
        let wrapper_path = self.runtime_dir.join(format!("runner_{}.py", run_id));
        std::fs::write(&wrapper_path, wrapper)?;

        let output = Command::new(&self.python_bin)
            .arg(&wrapper_path)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let mut outcome = parse_outcome(&stdout)
            .ok_or_else(|| SandboxError::NoOutcome(truncate(&format!("{}{}", stdout, stderr))))??;

        if !outcome.is_ok() {
            outcome.error = outcome.error.map(|e| truncate(&e));
            if outcome.code_context.is_none() {
                outcome.code_context = extract_lineno(&stdout)
                    .and_then(|lineno| code_context(code, lineno, CODE_CONTEXT_LINES));
            }
        }
        Ok(outcome)
    }
}

/// 从标准输出提取标记行之后的出参JSON
fn parse_outcome(stdout: &str) -> Option<Result<SandboxOutcome, SandboxError>> {
    let (_, tail) = stdout.split_once(OUTCOME_MARKER)?;
    let json_line = tail.trim();
    Some(serde_json::from_str::<SandboxOutcome>(json_line).map_err(SandboxError::from))
}

/// 失败出参里附带的行号（包装脚本额外写入的`lineno`字段）
fn extract_lineno(stdout: &str) -> Option<usize> {
    let (_, tail) = stdout.split_once(OUTCOME_MARKER)?;
    let value: Value = serde_json::from_str(tail.trim()).ok()?;
    value.get("lineno")?.as_u64().map(|n| n as usize)
}

/// 取失败行前后各几行的代码片段，行号从1开始
fn code_context(code: &str, lineno: usize, around: usize) -> Option<String> {
    if lineno == 0 {
        return None;
    }
    let lines: Vec<&str> = code.lines().collect();
    if lineno > lines.len() {
        return None;
    }

    let start = lineno.saturating_sub(around + 1);
    let end = (lineno + around).min(lines.len());
    let snippet = lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, line)| {
            let number = start + offset + 1;
            let pointer = if number == lineno { ">>" } else { "  " };
            format!("{} {:>4} | {}", pointer, number, line)
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(truncate(&snippet))
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= ERROR_TRUNCATE_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(ERROR_TRUNCATE_CHARS).collect();
    format!("{}...(truncated)", kept)
}

/// 脚本化沙盒，按调用顺序弹出预置出参
#[cfg(test)]
pub struct ScriptedSandbox {
    outcomes: std::sync::Mutex<std::collections::VecDeque<SandboxOutcome>>,
    pub seen_code: std::sync::Mutex<Vec<String>>,
    pub seen_datasets: std::sync::Mutex<Vec<BTreeMap<String, String>>>,
}

#[cfg(test)]
impl ScriptedSandbox {
    pub fn new() -> Self {
        Self {
            outcomes: std::sync::Mutex::new(std::collections::VecDeque::new()),
            seen_code: std::sync::Mutex::new(Vec::new()),
            seen_datasets: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_ok(self, stdout: &str, plots: Vec<String>) -> Self {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .push_back(SandboxOutcome {
                status: "ok".to_string(),
                stdout: Some(stdout.to_string()),
                metrics: Value::Null,
                plots,
                result: Value::Null,
                error: None,
                code_context: None,
            });
        self
    }

    pub fn with_failure(self, error: &str, code_context: Option<&str>) -> Self {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .push_back(SandboxOutcome {
                status: "error".to_string(),
                stdout: None,
                metrics: Value::Null,
                plots: Vec::new(),
                result: Value::Null,
                error: Some(error.to_string()),
                code_context: code_context.map(|c| c.to_string()),
            });
        self
    }
}

#[cfg(test)]
#[async_trait]
impl AnalysisSandbox for ScriptedSandbox {
    async fn run(
        &self,
        code: &str,
        datasets: &BTreeMap<String, String>,
    ) -> Result<SandboxOutcome, SandboxError> {
        self.seen_code
            .lock()
            .expect("seen lock")
            .push(code.to_string());
        self.seen_datasets
            .lock()
            .expect("seen lock")
            .push(datasets.clone());
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .ok_or_else(|| SandboxError::NoOutcome("scripted sandbox exhausted".to_string()))
    }
}
