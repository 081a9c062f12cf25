//! 事件类型提取
//!
//! 按固定顺序从消息中推断逻辑事件类型，返回第一个非空结果：
//! 1. 消息头 `type` / `eventType`（不区分大小写）
//! 2. 自描述信封（顶层同时包含 `type`、`source`、`id`）的 `type`
//! 3. 普通 JSON 的顶层 `type` 字段
//! 4. 当前 topic 已配置事件类型的关键字匹配（不区分大小写的子串）
//!
//! 任何一步的解析失败都只视为该步无结果，提取本身从不报错。

use std::collections::HashMap;

use router_shared::config::{TopicSubscription, WILDCARD_EVENT_TYPE};
use router_shared::kafka::ConsumerMessage;
use tracing::debug;

use crate::handler::EventEnvelope;

const TYPE_HEADERS: [&str; 2] = ["type", "eventType"];

/// 事件类型的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    Header,
    Envelope,
    JsonField,
    Keyword,
}

/// 一次提取的完整结果
///
/// 信封只要能识别就会返回，即使事件类型来自消息头。
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub event_type: Option<String>,
    pub source: Option<ExtractionSource>,
    pub envelope: Option<EventEnvelope>,
}

impl Extraction {
    fn found(mut self, event_type: String, source: ExtractionSource) -> Self {
        self.event_type = Some(event_type);
        self.source = Some(source);
        self
    }
}

/// 事件类型提取器
///
/// 关键字匹配依赖的配置在构造时显式传入，按 topic（小写）索引，
/// 保持配置中出现的顺序，排除通配符。
#[derive(Debug, Clone, Default)]
pub struct EventTypeExtractor {
    keywords: HashMap<String, Vec<Keyword>>,
}

#[derive(Debug, Clone)]
struct Keyword {
    event_type: String,
    needle: String,
}

impl EventTypeExtractor {
    pub fn new(subscriptions: &[TopicSubscription]) -> Self {
        let mut keywords: HashMap<String, Vec<Keyword>> = HashMap::new();

        for subscription in subscriptions {
            let entry = keywords
                .entry(subscription.topic_name.to_lowercase())
                .or_default();

            for event_type in &subscription.event_types {
                if event_type.is_empty() || event_type == WILDCARD_EVENT_TYPE {
                    continue;
                }
                let needle = event_type.to_lowercase();
                if entry.iter().any(|k| k.needle == needle) {
                    continue;
                }
                entry.push(Keyword {
                    event_type: event_type.clone(),
                    needle,
                });
            }
        }

        Self { keywords }
    }

    /// 提取事件类型
    pub fn extract(&self, message: &ConsumerMessage) -> Option<String> {
        self.inspect(message).event_type
    }

    /// 提取事件类型，同时返回来源与识别出的信封
    pub fn inspect(&self, message: &ConsumerMessage) -> Extraction {
        let json = message
            .payload
            .as_deref()
            .and_then(|payload| serde_json::from_slice::<serde_json::Value>(payload).ok());
        let envelope = json.as_ref().and_then(EventEnvelope::from_json);

        let extraction = Extraction {
            envelope,
            ..Default::default()
        };

        if let Some(event_type) = from_headers(message) {
            debug!(event_type = %event_type, "从消息头获取事件类型");
            return extraction.found(event_type, ExtractionSource::Header);
        }

        if let Some(json) = &json {
            if let Some(envelope) = &extraction.envelope
                && !envelope.event_type.is_empty()
            {
                let event_type = envelope.event_type.clone();
                debug!(event_type = %event_type, "从事件信封获取事件类型");
                return extraction.found(event_type, ExtractionSource::Envelope);
            }

            if let Some(event_type) = json
                .get("type")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            {
                debug!(event_type, "从 JSON 字段获取事件类型");
                return extraction.found(event_type.to_string(), ExtractionSource::JsonField);
            }
        }

        if let Some(event_type) = self.from_keywords(message) {
            debug!(event_type = %event_type, "通过配置关键字匹配到事件类型");
            return extraction.found(event_type, ExtractionSource::Keyword);
        }

        debug!(topic = %message.topic, "无法确定事件类型");
        extraction
    }

    fn from_keywords(&self, message: &ConsumerMessage) -> Option<String> {
        let keywords = self.keywords.get(&message.topic.to_lowercase())?;
        if keywords.is_empty() || !message.has_payload() {
            return None;
        }

        let haystack = message.payload_lossy().to_lowercase();
        keywords
            .iter()
            .find(|k| haystack.contains(&k.needle))
            .map(|k| k.event_type.clone())
    }
}

/// 按消息头顺序取第一个名为 type / eventType 的头部
fn from_headers(message: &ConsumerMessage) -> Option<String> {
    let header = message.headers.iter().find(|h| {
        TYPE_HEADERS
            .iter()
            .any(|name| h.key.eq_ignore_ascii_case(name))
    })?;

    header
        .value_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
