//! 事件处理器 Trait 定义
//!
//! 所有业务 handler 都实现同一个 `EventHandler` 契约，接收经过预处理的 `InboundEvent`。
//! 结构化信封的解析在路由阶段统一完成一次，handler 之间共享结果。

use async_trait::async_trait;
use router_shared::error::RouterError;
use router_shared::kafka::ConsumerMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 自描述事件信封
///
/// 顶层同时包含 `type`、`source`、`id` 三个字段的 JSON 负载被视为信封，
/// 其余属性按 CloudEvents 的命名可选解析。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub specversion: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub datacontenttype: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl EventEnvelope {
    /// 从已解析的 JSON 中识别信封，形状不符时返回 None
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let root = value.as_object()?;
        if !(root.contains_key("type") && root.contains_key("source") && root.contains_key("id"))
        {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

/// 交给 handler 的入站事件
///
/// 消息本身只读；事件类型与信封由路由阶段填充。
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub message: ConsumerMessage,
    pub event_type: Option<String>,
    pub envelope: Option<EventEnvelope>,
}

impl InboundEvent {
    pub fn new(
        message: ConsumerMessage,
        event_type: Option<String>,
        envelope: Option<EventEnvelope>,
    ) -> Self {
        Self {
            message,
            event_type,
            envelope,
        }
    }

    /// 业务数据反序列化：优先取信封的 `data`，否则把整个负载当作业务数据
    pub fn data<T: DeserializeOwned>(&self) -> std::result::Result<T, RouterError> {
        match self.envelope.as_ref().and_then(|e| e.data.as_ref()) {
            Some(data) => serde_json::from_value(data.clone())
                .map_err(|e| RouterError::Serialization(format!("信封数据反序列化失败: {e}"))),
            None => self.message.deserialize_payload(),
        }
    }

    /// 日志展示用的事件类型
    pub fn event_type_or_unknown(&self) -> &str {
        self.event_type.as_deref().unwrap_or("unknown")
    }
}

/// 事件处理器 Trait
///
/// - `name`: 注册表中使用的标识，匹配时不区分大小写
/// - `process_event`: 返回 `Ok(true)` 表示成功，`Ok(false)` 表示业务上未处理成功，
///   `Err` 表示调用异常。三种结果都不会中断同一消息的其他 handler。
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn process_event(&self, event: &InboundEvent) -> Result<bool>;
}
