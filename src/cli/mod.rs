use crate::config::{Config, LLMProvider};
use clap::Parser;
use std::path::PathBuf;

/// Fabscope-RS - 由Rust与AI驱动的设备健康分析Agent引擎
#[derive(Parser, Debug)]
#[command(name = "fabscope-rs")]
#[command(
    about = "Orchestration engine for a fab equipment-health analysis agent. It answers natural-language questions about inspection tools by routing work across SQL analysis, code analysis, domain interpretation, visualization and document search."
)]
#[command(version)]
pub struct Args {
    /// 单次提问（省略时进入交互模式）
    #[arg(short, long)]
    pub query: Option<String>,

    /// 进入多轮交互模式
    #[arg(short, long)]
    pub interactive: bool,

    /// 量测数据库路径（SQLite）
    #[arg(short, long, default_value = "./fab_demo.sqlite")]
    pub db_path: PathBuf,

    /// 设备手册与领域知识文档目录
    #[arg(long, default_value = "./manuals")]
    pub docs_path: PathBuf,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 生成演示数据库后退出
    #[arg(long)]
    pub seed_demo: bool,

    /// 重建设备手册检索索引后退出
    #[arg(long)]
    pub ingest_manuals: bool,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,

    /// 高能效模型，优先用于引擎的常规推理任务
    #[arg(long)]
    pub model_efficient: Option<String>,

    /// 高质量模型，优先用于复杂推理任务，以及作为efficient失效情况下的兜底
    #[arg(long)]
    pub model_powerful: Option<String>,

    /// LLM API基地址
    #[arg(long)]
    pub llm_api_base_url: Option<String>,

    /// LLM API KEY
    #[arg(long)]
    pub llm_api_key: Option<String>,

    /// 最大tokens数
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// 温度参数
    #[arg(long)]
    pub temperature: Option<f64>,

    /// LLM Provider (openai, moonshot, deepseek, mistral, openrouter, anthropic, gemini, ollama)
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// 单条SQL允许返回的最大行数
    #[arg(long)]
    pub max_sql_rows: Option<usize>,

    /// 文档检索默认返回的命中条数
    #[arg(long)]
    pub doc_top_k: Option<usize>,

    /// 执行生成代码所用的Python解释器
    #[arg(long)]
    pub python_bin: Option<String>,

    /// 是否禁用缓存
    #[arg(long)]
    pub no_cache: bool,
}

impl Args {
    /// 是否进入多轮交互模式：显式`--interactive`，或未给出单次提问
    pub fn interactive_mode(&self) -> bool {
        self.interactive || self.query.is_none()
    }

    /// 将CLI参数转换为配置
    pub fn into_config(self) -> Config {
        let mut config = if let Some(config_path) = &self.config {
            // 如果显式指定了配置文件路径，从该路径加载
            return Config::from_file(config_path).unwrap_or_else(|_| {
                panic!("⚠️ 警告: 无法读取配置文件 {:?}，使用默认配置", config_path)
            });
        } else {
            // 如果没有显式指定配置文件，尝试从默认位置加载
            let default_config_path = std::env::current_dir()
                .unwrap_or_else(|_| std::path::PathBuf::from("."))
                .join("fabscope.toml");

            if default_config_path.exists() {
                return Config::from_file(&default_config_path).unwrap_or_else(|_| {
                    panic!(
                        "⚠️ 警告: 无法读取默认配置文件 {:?}，使用默认配置",
                        default_config_path
                    )
                });
            } else {
                // 默认配置文件不存在，使用默认值
                Config::default()
            }
        };

        // 覆盖配置文件中的设置
        config.db_path = self.db_path;
        config.docs_path = self.docs_path;

        // 覆盖LLM配置
        if let Some(provider_str) = self.llm_provider {
            if let Ok(provider) = provider_str.parse::<LLMProvider>() {
                config.llm.provider = provider;
            } else {
                eprintln!(
                    "⚠️ 警告: 未知的provider: {}，使用默认provider",
                    provider_str
                );
            }
        }
        if let Some(llm_api_base_url) = self.llm_api_base_url {
            config.llm.api_base_url = llm_api_base_url;
        }
        if let Some(llm_api_key) = self.llm_api_key {
            config.llm.api_key = llm_api_key;
        }
        if let Some(model_efficient) = self.model_efficient {
            config.llm.model_efficient = model_efficient;
        }
        if let Some(model_powerful) = self.model_powerful {
            config.llm.model_powerful = model_powerful;
        } else {
            config.llm.model_powerful = config.llm.model_efficient.to_string();
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }

        // 分析运行参数
        if let Some(max_sql_rows) = self.max_sql_rows {
            config.max_sql_rows = max_sql_rows;
        }
        if let Some(doc_top_k) = self.doc_top_k {
            config.doc_top_k = doc_top_k;
        }
        if let Some(python_bin) = self.python_bin {
            config.python_bin = python_bin;
        }

        // 缓存配置
        if self.no_cache {
            config.cache.enabled = false;
        }

        config.verbose = self.verbose;

        config
    }
}

// Include tests
#[cfg(test)]
mod tests;
