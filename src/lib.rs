pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod llm;
pub mod sources;

// Re-export commonly used types
pub use agent::runner::AgentRunner;
pub use config::Config;
