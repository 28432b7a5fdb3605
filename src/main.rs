use anyhow::Result;
use chrono::Local;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;

mod agent;
mod cache;
mod cli;
mod config;
mod llm;
mod sources;

use agent::gate::SessionMemory;
use agent::runner::AgentRunner;
use cache::CacheManager;
use config::Config;
use llm::client::LLMClient;
use llm::generative::RigGenerativeService;
use sources::demo::seed_demo;
use sources::doc_index::{DocIndex, HashingEmbedder};
use sources::query_service::SqliteQueryService;
use sources::sandbox::PythonSandbox;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let seed_demo_flag = args.seed_demo;
    let ingest_flag = args.ingest_manuals;
    let interactive = args.interactive_mode();
    let query = args.query.clone();
    let config = args.into_config();
    config.ensure_runtime_layout()?;

    if seed_demo_flag {
        let inserted = seed_demo(&config.db_path, Local::now().date_naive())?;
        println!("✅ 演示数据库已生成: {:?} ({}行)", config.db_path, inserted);
        return Ok(());
    }

    if ingest_flag {
        let mut index = DocIndex::open(config.doc_index_dir(), Box::new(HashingEmbedder::new()))?;
        let chunks = index.ingest(&config.docs_path)?;
        println!("✅ 设备手册索引已重建: {}块", chunks);
        return Ok(());
    }

    let runner = Arc::new(build_runner(&config)?);

    // --interactive优先于单次提问；两者都缺省时也进入交互模式
    match query {
        Some(query) if !interactive => run_single(runner, &config, query).await,
        _ => run_interactive(runner, &config).await,
    }
}

fn build_runner(config: &Config) -> Result<AgentRunner> {
    let client = LLMClient::new(config.clone())?;
    let cache = Arc::new(CacheManager::new(config.cache.clone()));
    let generative = Arc::new(RigGenerativeService::new(client, cache));

    let sandbox = Arc::new(PythonSandbox::new(
        config.python_bin.clone(),
        config.runtime_dir(),
    ));
    let query_service = Arc::new(SqliteQueryService::new(
        config.db_path.clone(),
        config.runtime_dir(),
        config.max_sql_rows,
    ));
    let doc_index = Arc::new(DocIndex::open(
        config.doc_index_dir(),
        Box::new(HashingEmbedder::new()),
    )?);

    Ok(AgentRunner::new(
        config.clone(),
        generative,
        sandbox,
        query_service,
        doc_index,
    ))
}

/// 单次提问：走流式接口，边跑边显示进度
async fn run_single(runner: Arc<AgentRunner>, config: &Config, query: String) -> Result<()> {
    println!("🚀 分析中: {}", query);

    let (mut snapshots, handle) = runner.run_streaming(query, SessionMemory::default());
    while let Some(snapshot) = snapshots.recv().await {
        if config.verbose
            && let Some(result) = snapshot.step_results.last()
        {
            println!("📊 [{}] {}", result.step, result.summary);
        }
    }

    let (state, _memory) = handle.await??;
    if let Some(clarification) = &state.pending_clarification {
        println!("❓ {}", clarification.question);
        println!("(交互模式下可直接回答澄清问题: fabscope-rs --interactive)");
    } else if let Some(answer) = &state.final_answer {
        println!("\n{}", answer);
    }
    Ok(())
}

/// 多轮交互：会话记忆跨轮保留，澄清问题可直接作答
async fn run_interactive(runner: Arc<AgentRunner>, config: &Config) -> Result<()> {
    println!("🚀 fabscope-rs 交互模式（exit退出）");
    let mut memory = SessionMemory::default();

    loop {
        print!("❯ ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        match runner.run(input, &mut memory).await {
            Ok(state) => {
                if let Some(clarification) = &state.pending_clarification {
                    println!("❓ {}", clarification.question);
                } else if let Some(answer) = &state.final_answer {
                    println!("{}", answer);
                }
            }
            // 协作方异常不终止会话：给出一般性失败提示，记忆保留可重试
            Err(err) => {
                eprintln!("❌ 本轮提问处理失败，会话已保留，可直接重试。");
                if config.verbose {
                    eprintln!("   {:#}", err);
                }
            }
        }
    }

    println!("👋 再见");
    Ok(())
}
