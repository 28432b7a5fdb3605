//! 五个能力步骤与最终答案合成。
//!
//! 每个步骤消费共享状态、通过外部协作方完成一个工作单元、追加一条
//! 结构化结果并清除当前待执行动作；下一步去向由调度器决定。

pub mod code_analysis;
pub mod doc_search;
pub mod domain_expert;
pub mod sql_analysis;
pub mod synthesis;
pub mod visualizer;
