//! 测试工具模块
//!
//! 提供消息构造器与脚本化的内存消息源，供各服务的单元测试和集成测试复用，
//! 无需启动真实的 Kafka broker。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::error::{Result, RouterError};
use crate::kafka::{ConsumerMessage, MessageHeader, MessageSource};

// ==================== 消息构造 ====================

/// 测试消息构造器
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: ConsumerMessage,
}

impl MessageBuilder {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            message: ConsumerMessage {
                topic: topic.into(),
                partition: 0,
                offset: 0,
                key: None,
                payload: None,
                timestamp: Some(Utc::now().timestamp_millis()),
                headers: Vec::new(),
            },
        }
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.message.partition = partition;
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.message.offset = offset;
        self
    }

    pub fn key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.message.key = Some(key.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.message.payload = Some(payload.into());
        self
    }

    pub fn json(self, value: &serde_json::Value) -> Self {
        self.payload(value.to_string())
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.message.headers.push(MessageHeader::new(key, value));
        self
    }

    pub fn build(self) -> ConsumerMessage {
        self.message
    }
}

// ==================== 脚本化消息源 ====================

/// 脚本中的一步拉取结果
#[derive(Debug)]
pub enum PollStep {
    Message(ConsumerMessage),
    Empty,
    Error(RouterError),
    /// 拉取永远不返回，只能被调用方取消
    Stall,
}

/// 消息源的可观察状态，测试结束后用于断言
#[derive(Debug, Default)]
pub struct SourceState {
    pub subscribed: Vec<String>,
    pub committed: Vec<(String, i32, i64)>,
    pub polls: usize,
    pub closed: bool,
}

/// 按脚本返回消息的内存消息源
///
/// 脚本耗尽后若持有 shutdown 发送端，会发出关闭信号，使消费循环自然结束。
pub struct ScriptedSource {
    steps: VecDeque<PollStep>,
    state: Arc<Mutex<SourceState>>,
    shutdown_on_drain: Option<watch::Sender<bool>>,
    fail_subscribe: bool,
    fail_commit: bool,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = PollStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            state: Arc::new(Mutex::new(SourceState::default())),
            shutdown_on_drain: None,
            fail_subscribe: false,
            fail_commit: false,
        }
    }

    /// 仅包含消息的脚本
    pub fn with_messages(messages: impl IntoIterator<Item = ConsumerMessage>) -> Self {
        Self::new(messages.into_iter().map(PollStep::Message))
    }

    /// 脚本耗尽后发送关闭信号
    pub fn shutdown_when_drained(mut self, sender: watch::Sender<bool>) -> Self {
        self.shutdown_on_drain = Some(sender);
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// 共享状态句柄，消息源被消费循环移走后仍可读取
    pub fn state(&self) -> Arc<Mutex<SourceState>> {
        self.state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        if self.fail_subscribe {
            return Err(RouterError::Kafka("模拟订阅失败".to_string()));
        }
        self.lock().subscribed = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>> {
        self.lock().polls += 1;

        match self.steps.pop_front() {
            Some(PollStep::Message(message)) => Ok(Some(message)),
            Some(PollStep::Empty) => Ok(None),
            Some(PollStep::Error(err)) => Err(err),
            Some(PollStep::Stall) => std::future::pending().await,
            None => {
                if let Some(sender) = &self.shutdown_on_drain {
                    let _ = sender.send(true);
                }
                tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
                Ok(None)
            }
        }
    }

    fn commit(&mut self, message: &ConsumerMessage) -> Result<()> {
        if self.fail_commit {
            return Err(RouterError::Kafka("模拟提交失败".to_string()));
        }
        self.lock()
            .committed
            .push((message.topic.clone(), message.partition, message.offset));
        Ok(())
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}
