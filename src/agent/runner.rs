//! 问答执行器：调用方入口。
//!
//! 每轮问答：澄清闸口接纳输入 → 加载库结构快照与领域知识 → 控制循环
//! （调度一步、执行一步）直到给出最终答案或停在待澄清终态 → 会话记忆
//! 回写调用方。流式变体在每次循环推进后发出一份状态快照，供调用方做
//! 实时进度展示。

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::action::NextAction;
use crate::agent::gate::{self, PendingTurn, SessionMemory};
use crate::agent::state::{AgentState, ChatMessage, ClarificationRequest};
use crate::agent::steps::code_analysis::CodeAnalysisStep;
use crate::agent::steps::doc_search::DocSearchStep;
use crate::agent::steps::domain_expert::DomainExpertStep;
use crate::agent::steps::sql_analysis::SqlAnalysisStep;
use crate::agent::steps::synthesis::synthesize_final_answer;
use crate::agent::steps::visualizer::VisualizerStep;
use crate::agent::supervisor;
use crate::config::Config;
use crate::llm::generative::GenerativeService;
use crate::sources::doc_index::DocIndex;
use crate::sources::knowledge::KnowledgeBase;
use crate::sources::query_service::SqliteQueryService;
use crate::sources::sandbox::AnalysisSandbox;
use crate::sources::schema::DatabaseSchema;

/// 问答执行器
pub struct AgentRunner {
    config: Config,
    generative: Arc<dyn GenerativeService>,
    sandbox: Arc<dyn AnalysisSandbox>,
    query_service: Arc<SqliteQueryService>,
    doc_index: Arc<DocIndex>,
    today: NaiveDate,
}

impl AgentRunner {
    pub fn new(
        config: Config,
        generative: Arc<dyn GenerativeService>,
        sandbox: Arc<dyn AnalysisSandbox>,
        query_service: Arc<SqliteQueryService>,
        doc_index: Arc<DocIndex>,
    ) -> Self {
        Self {
            config,
            generative,
            sandbox,
            query_service,
            doc_index,
            today: Local::now().date_naive(),
        }
    }

    /// 固定“今天”的日期，供测试与回放使用
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// 单次问答：运行到最终答案或待澄清终态，并把会话记忆回写调用方
    pub async fn run(&self, input: &str, memory: &mut SessionMemory) -> Result<AgentState> {
        self.run_inner(input, memory, None).await
    }

    /// 流式问答：每次循环推进后发出一份状态快照。
    /// 返回快照接收端与产出(终态, 回写后的会话记忆)的任务句柄。
    pub fn run_streaming(
        self: Arc<Self>,
        input: String,
        mut memory: SessionMemory,
    ) -> (
        mpsc::UnboundedReceiver<AgentState>,
        JoinHandle<Result<(AgentState, SessionMemory)>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let state = self.run_inner(&input, &mut memory, Some(&tx)).await?;
            Ok((state, memory))
        });
        (rx, handle)
    }

    async fn run_inner(
        &self,
        input: &str,
        memory: &mut SessionMemory,
        observer: Option<&mpsc::UnboundedSender<AgentState>>,
    ) -> Result<AgentState> {
        let query = gate::admit(memory, input);
        let mut state = self.build_state(&query, memory)?;

        loop {
            supervisor::advance(&mut state, self.generative.as_ref()).await;
            if let Some(tx) = observer {
                let _ = tx.send(state.clone());
            }

            if state.pending_clarification.is_some() {
                if self.config.verbose {
                    println!("❓ 等待用户澄清，循环暂停");
                }
                break;
            }
            let Some(action) = state.pending_action.clone() else {
                break;
            };

            if self.config.verbose {
                println!("🔄 第{}步: {}", state.loop_count, action.name());
            }
            self.dispatch(&mut state, action).await?;
            if let Some(tx) = observer {
                let _ = tx.send(state.clone());
            }

            if state.final_answer.is_some() {
                break;
            }
        }

        self.absorb(input, &state, memory);
        Ok(state)
    }

    /// 按轮初始化状态：带入会话记忆，加载库结构快照与领域知识
    fn build_state(&self, query: &str, memory: &SessionMemory) -> Result<AgentState> {
        let mut state = AgentState::new(query);
        state.chat_history = memory.chat_history.clone();
        state.clarification_answers = memory.clarification_answers.clone();
        state.last_tool = memory.last_tool.clone();

        let schema = DatabaseSchema::introspect(&self.config.db_path)
            .context("Failed to introspect the metrology database")?;
        state.schema_snapshot = schema.to_markdown();

        let knowledge = KnowledgeBase::load(&self.config.docs_path)
            .context("Failed to load domain knowledge")?;
        state.knowledge_text = knowledge.full_text;
        state.knowledge_index = knowledge.sections;

        Ok(state)
    }

    /// 把待执行动作分发给对应能力步骤；收尾动作触发答案合成
    async fn dispatch(&self, state: &mut AgentState, action: NextAction) -> Result<()> {
        match action {
            NextAction::SqlAnalysis {
                template,
                tool,
                start_date,
                end_date,
                question,
                tables,
            } => {
                SqlAnalysisStep::new(
                    self.query_service.clone(),
                    self.generative.clone(),
                    self.today,
                )
                .execute(state, template, tool, start_date, end_date, question, tables)
                .await;
            }
            NextAction::CodeAnalysis { instruction } => {
                CodeAnalysisStep::new(self.sandbox.clone(), self.generative.clone())
                    .execute(state, instruction)
                    .await;
            }
            NextAction::DomainInterpretation => {
                DomainExpertStep::new(self.generative.clone())
                    .execute(state)
                    .await;
            }
            NextAction::Visualization {
                dataset_id,
                chart_type,
            } => {
                VisualizerStep::new(self.sandbox.clone(), self.generative.clone())
                    .execute(state, dataset_id, chart_type)
                    .await;
            }
            NextAction::DocumentSearch { query, top_k } => {
                DocSearchStep::new(self.doc_index.clone(), self.config.doc_top_k)
                    .execute(state, query, top_k);
            }
            // 调度器已把澄清动作转成终态；此处兜底同样处理
            NextAction::AskUser { id, question } => {
                state.pending_action = None;
                state.pending_clarification = Some(ClarificationRequest { id, question });
            }
            NextAction::Finish {
                reason,
                raw_decision,
            } => {
                let answer = synthesize_final_answer(
                    self.generative.as_ref(),
                    state,
                    reason.as_deref(),
                    raw_decision.as_deref(),
                )
                .await
                .context("Final answer synthesis failed")?;
                state.final_answer = Some(answer);
                state.pending_action = None;
            }
        }
        Ok(())
    }

    /// 终态回写会话记忆：对话历史、澄清答案、设备记忆与遗留的澄清请求
    fn absorb(&self, input: &str, state: &AgentState, memory: &mut SessionMemory) {
        memory.chat_history.push(ChatMessage::user(input));
        if let Some(answer) = &state.final_answer {
            memory.chat_history.push(ChatMessage::assistant(answer));
        } else if let Some(clarification) = &state.pending_clarification {
            memory
                .chat_history
                .push(ChatMessage::assistant(&clarification.question));
        }

        memory.clarification_answers = state.clarification_answers.clone();
        memory.last_tool = state.last_tool.clone();
        memory.pending = state
            .pending_clarification
            .clone()
            .map(|clarification| PendingTurn {
                clarification,
                original_query: state.user_query.clone(),
            });
    }
}
