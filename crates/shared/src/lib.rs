//! 共享库
//!
//! 包含事件路由服务使用的配置、错误处理、Kafka 消息源、可观测性与重试等基础设施代码。

pub mod config;
pub mod error;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
