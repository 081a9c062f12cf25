//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的消息源抽象，
//! 统一消息所有权转换、错误映射与显式 offset 提交语义。

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::error::{Result, RouterError};

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消息头，保留原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl MessageHeader {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// 头部值按 UTF-8 解码，非法编码返回 None
    pub fn value_str(&self) -> Option<&str> {
        self.value
            .as_deref()
            .and_then(|raw| std::str::from_utf8(raw).ok())
    }
}

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。消息头保持 broker 下发的顺序。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// tombstone 消息没有负载
    pub payload: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub headers: Vec<MessageHeader>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let mut headers = Vec::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                headers.push(MessageHeader {
                    key: header.key.to_string(),
                    value: header.value.map(<[u8]>::to_vec),
                });
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(<[u8]>::to_vec),
            payload: msg.payload().map(<[u8]>::to_vec),
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 是否携带非空负载
    pub fn has_payload(&self) -> bool {
        self.payload.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| RouterError::Serialization("消息没有负载".to_string()))?;
        std::str::from_utf8(payload)
            .map_err(|e| RouterError::Serialization(format!("负载非 UTF-8 编码: {e}")))
    }

    /// 负载的宽松文本表示，非法字节以替换字符代替，仅用于日志与关键字匹配
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        match self.payload.as_deref() {
            Some(payload) => String::from_utf8_lossy(payload),
            None => Cow::Borrowed(""),
        }
    }

    /// 消息 key 的宽松文本表示
    pub fn key_lossy(&self) -> Option<Cow<'_, str>> {
        self.key.as_deref().map(String::from_utf8_lossy)
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self
            .payload
            .as_deref()
            .ok_or_else(|| RouterError::Serialization("消息没有负载".to_string()))?;
        serde_json::from_slice(payload)
            .map_err(|e| RouterError::Serialization(format!("负载反序列化失败: {e}")))
    }

    /// 按名称（不区分大小写）查找第一个匹配的消息头
    pub fn header(&self, name: &str) -> Option<&MessageHeader> {
        self.headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(name))
    }
}

// ---------------------------------------------------------------------------
// MessageSource
// ---------------------------------------------------------------------------

/// 消息源抽象
///
/// 消费循环只依赖这四个操作，测试时可替换为脚本化的内存实现。
#[async_trait]
pub trait MessageSource: Send {
    /// 订阅指定的 topic 列表
    fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// 拉取下一条消息，超时返回 `Ok(None)`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>>;

    /// 提交该消息的 offset
    fn commit(&mut self, message: &ConsumerMessage) -> Result<()>;

    /// 离开消费组
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 基于 `StreamConsumer` 的消息源
///
/// 关闭自动提交，由消费循环在所有 handler 执行完之后显式提交 offset。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 根据配置创建消费者
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = client_config(config)
            .create()
            .map_err(|e| RouterError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            client_id = %config.client_id,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }
}

/// 由配置构造 librdkafka 客户端参数
fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.consumer_group)
        .set("client.id", &config.client_id)
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("security.protocol", &config.security_protocol)
        .set("enable.auto.commit", "false");

    if let Some(mechanism) = &config.sasl_mechanism {
        client.set("sasl.mechanism", mechanism);
    }
    if let Some(username) = &config.sasl_username {
        client.set("sasl.username", username);
    }
    if let Some(password) = &config.sasl_password {
        client.set("sasl.password", password);
    }

    client
}

/// librdkafka 报告 Fatal 时消费者已不可用，其余错误视为瞬时错误
fn map_consume_error(err: KafkaError) -> RouterError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::Fatal) => RouterError::KafkaFatal(err.to_string()),
        _ => RouterError::Kafka(format!("接收 Kafka 消息出错: {err}")),
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| RouterError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumerMessage>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(borrowed)) => {
                let msg = ConsumerMessage::from_borrowed(&borrowed);
                debug!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    "收到 Kafka 消息"
                );
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(map_consume_error(e)),
        }
    }

    fn commit(&mut self, message: &ConsumerMessage) -> Result<()> {
        // 提交的是下一条待消费的位置
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| RouterError::Kafka(format!("构造提交 offset 失败: {e}")))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| RouterError::Kafka(format!("提交 offset 失败: {e}")))
    }

    fn close(&mut self) {
        // 实例 drop 时 librdkafka 会完成 consumer close
        self.consumer.unsubscribe();
        info!("Kafka 消费者已退出消费组");
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
