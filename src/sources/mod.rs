//! 外部数据与执行资源层：量测数据库、文档索引、代码沙盒与演示数据。

pub mod demo;
pub mod doc_index;
pub mod knowledge;
pub mod query_service;
pub mod sandbox;
pub mod schema;
