use crate::config::LLMConfig;
use regex::Regex;
use std::sync::LazyLock;

static SQL_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```sql\s*\n(.*?)```").expect("valid sql fence pattern"));

static PY_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:python|py)\s*\n(.*?)```").expect("valid python fence pattern")
});

static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```[a-zA-Z0-9_-]*[ \t]*\n").expect("valid open fence pattern"));

pub fn evaluate_befitting_model(
    llm_config: &LLMConfig,
    system_prompt: &str,
    user_prompt: &str,
) -> (String, Option<String>) {
    if system_prompt.len() + user_prompt.len() <= 32 * 1024 {
        return (
            llm_config.model_efficient.clone(),
            Some(llm_config.model_powerful.clone()),
        );
    }
    (llm_config.model_powerful.clone(), None)
}

/// 去除模型输出外层的Markdown代码围栏
pub fn strip_code_fence(text: &str) -> String {
    let mut t = text.trim().to_string();
    if t.starts_with("```") {
        t = OPEN_FENCE_RE.replace(&t, "").to_string();
        if let Some(stripped) = t.strip_suffix("```") {
            t = stripped.to_string();
        }
    }
    t.trim().to_string()
}

/// 从模型输出中提取SQL语句。
///
/// 依次尝试：带`sql`键的JSON对象、```sql 代码块、整体去围栏。
pub fn extract_sql(text: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim())
        && let Some(sql) = value.get("sql").and_then(|v| v.as_str())
    {
        return sql.trim().to_string();
    }

    if let Some(captures) = SQL_FENCE_RE.captures(text)
        && let Some(block) = captures.get(1)
    {
        return block.as_str().trim().to_string();
    }

    strip_code_fence(text)
}

/// 从模型输出中提取Python代码块
pub fn extract_code(text: &str) -> String {
    if let Some(captures) = PY_FENCE_RE.captures(text)
        && let Some(block) = captures.get(1)
    {
        return block.as_str().trim().to_string();
    }

    strip_code_fence(text)
}
