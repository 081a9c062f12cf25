//! 事件路由服务
//!
//! 消费 Kafka 消息，推断每条消息的事件类型，按 (topic, 事件类型) 路由到一个或多个
//! 已注册的 handler，处理完成后提交 offset。出站调用通过令牌缓存附带 bearer token。

pub mod api_client;
pub mod catalog;
pub mod consumer;
pub mod credential;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod handlers;
pub mod health;
pub mod registry;
pub mod resolver;
