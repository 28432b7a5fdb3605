//! Agent核心：共享状态、动作模型、确定性规划器、调度循环与能力步骤。

pub mod action;
pub mod gate;
pub mod planner;
pub mod runner;
pub mod state;
pub mod steps;
pub mod supervisor;
