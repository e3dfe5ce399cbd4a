//! 共享库
//!
//! 包含通知 worker 共用的配置、错误处理、数据库连接、Kafka、重试和可观测性等基础设施代码。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
