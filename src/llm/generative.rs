//! 生成式能力的统一出入口。
//!
//! 引擎内所有需要大模型的位置（兜底决策、即席SQL、代码生成、领域叙述、
//! 最终答案合成、图表规划）都只通过`GenerativeService`这一个窄接口，
//! 便于在测试中用脚本化实现替换真实模型。

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::llm::client::LLMClient;

/// 图表规划，由模型按数据集列名约束抽取
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChartPlan {
    /// 建议绘制的图表，按优先级排列
    pub charts: Vec<ChartSpec>,
}

/// 单张图表的规划
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChartSpec {
    /// 图表类型：line、bar或scatter
    pub chart_type: String,
    /// X轴使用的列名
    pub x: String,
    /// Y轴使用的列名
    pub y: String,
    /// 图表标题
    pub title: String,
}

/// 生成式服务接口
#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// 单轮文本生成
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// 面向数据集的图表规划抽取
    async fn plan_charts(&self, system_prompt: &str, user_prompt: &str) -> Result<ChartPlan>;
}

/// 基于rig客户端的生成式服务实现，带磁盘响应缓存
pub struct RigGenerativeService {
    client: LLMClient,
    cache: Arc<CacheManager>,
}

impl RigGenerativeService {
    pub fn new(client: LLMClient, cache: Arc<CacheManager>) -> Self {
        Self { client, cache }
    }

    fn cache_key(system_prompt: &str, user_prompt: &str) -> String {
        format!("{}\n##\n{}", system_prompt, user_prompt)
    }
}

#[async_trait]
impl GenerativeService for RigGenerativeService {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let key = Self::cache_key(system_prompt, user_prompt);
        if let Some(hit) = self.cache.get::<String>("llm_generate", &key).await? {
            return Ok(hit);
        }

        let response = self.client.prompt(system_prompt, user_prompt).await?;
        let _ = self
            .cache
            .set("llm_generate", &key, response.clone())
            .await;
        Ok(response)
    }

    async fn plan_charts(&self, system_prompt: &str, user_prompt: &str) -> Result<ChartPlan> {
        let key = Self::cache_key(system_prompt, user_prompt);
        if let Some(hit) = self.cache.get::<ChartPlan>("chart_plan", &key).await? {
            return Ok(hit);
        }

        let plan: ChartPlan = self.client.extract(system_prompt, user_prompt).await?;
        let _ = self.cache.set("chart_plan", &key, plan.clone()).await;
        Ok(plan)
    }
}

/// 脚本化的生成式服务，按调用顺序弹出预置应答
#[cfg(test)]
pub struct ScriptedGenerative {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<String, String>>>,
    chart_plan: Option<ChartPlan>,
    pub seen_prompts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl ScriptedGenerative {
    pub fn new() -> Self {
        Self {
            replies: std::sync::Mutex::new(std::collections::VecDeque::new()),
            chart_plan: None,
            seen_prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, reply: &str) -> Self {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Ok(reply.to_string()));
        self
    }

    pub fn with_failure(self, message: &str) -> Self {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Err(message.to_string()));
        self
    }

    pub fn with_chart_plan(mut self, plan: ChartPlan) -> Self {
        self.chart_plan = Some(plan);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl GenerativeService for ScriptedGenerative {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.seen_prompts
            .lock()
            .expect("seen lock")
            .push(format!("{}\n##\n{}", system_prompt, user_prompt));
        match self.replies.lock().expect("replies lock").pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("scripted generative exhausted")),
        }
    }

    async fn plan_charts(&self, _system_prompt: &str, _user_prompt: &str) -> Result<ChartPlan> {
        self.chart_plan
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no scripted chart plan"))
    }
}
