//! Topic 解析器
//!
//! 对每条消息提取事件类型，然后在路由表中查找精确匹配桶与通配桶，
//! 把两者的 handler 按"精确在前、通配在后"的顺序合并后返回。

use std::sync::Arc;

use router_shared::config::WILDCARD_EVENT_TYPE;
use router_shared::kafka::ConsumerMessage;
use tracing::{debug, warn};

use crate::catalog::HandlerCatalog;
use crate::extractor::EventTypeExtractor;
use crate::handler::{EventHandler, InboundEvent};
use crate::registry::RoutingTable;

/// 一条消息的解析结果
pub struct Resolution {
    pub event: InboundEvent,
    pub handlers: Vec<Arc<dyn EventHandler>>,
}

impl Resolution {
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }
}

/// Topic 解析器
///
/// 路由表与处理器目录都以 `Arc` 共享，解析过程只读。
pub struct TopicResolver {
    extractor: EventTypeExtractor,
    table: Arc<RoutingTable>,
    catalog: Arc<HandlerCatalog>,
}

impl TopicResolver {
    pub fn new(
        extractor: EventTypeExtractor,
        table: Arc<RoutingTable>,
        catalog: Arc<HandlerCatalog>,
    ) -> Self {
        Self {
            extractor,
            table,
            catalog,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// 解析 handler 并构造交给 handler 的入站事件
    ///
    /// 信封在这里解析一次，所有 handler 共享。
    pub fn resolve(&self, message: ConsumerMessage) -> Resolution {
        if !message.has_payload() {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "消息没有负载，跳过路由"
            );
            return Resolution {
                event: InboundEvent::new(message, None, None),
                handlers: Vec::new(),
            };
        }

        let extraction = self.extractor.inspect(&message);
        let handlers = self.lookup(&message, extraction.event_type.as_deref());

        Resolution {
            event: InboundEvent::new(message, extraction.event_type, extraction.envelope),
            handlers,
        }
    }

    /// 仅解析 handler 列表，找不到时返回空列表
    pub fn resolve_handlers(&self, message: &ConsumerMessage) -> Vec<Arc<dyn EventHandler>> {
        if !message.has_payload() {
            warn!(topic = %message.topic, offset = message.offset, "消息没有负载，跳过路由");
            return Vec::new();
        }

        let event_type = self.extractor.extract(message);
        self.lookup(message, event_type.as_deref())
    }

    fn lookup(
        &self,
        message: &ConsumerMessage,
        event_type: Option<&str>,
    ) -> Vec<Arc<dyn EventHandler>> {
        let topic = message.topic.as_str();

        let exact: &[String] = match event_type {
            Some(event_type) if event_type != WILDCARD_EVENT_TYPE => {
                self.table.handlers_for(topic, event_type)
            }
            _ => &[],
        };
        let wildcard = self.table.wildcard_handlers(topic);

        let mut handlers = Vec::with_capacity(exact.len() + wildcard.len());
        for name in exact.iter().chain(wildcard) {
            match self.catalog.resolve(name) {
                Ok(handler) => handlers.push(handler),
                Err(err) => {
                    warn!(topic, handler = %name, error = %err, "handler 实例解析失败，已跳过");
                }
            }
        }

        if handlers.is_empty() {
            warn!(
                topic,
                partition = message.partition,
                offset = message.offset,
                event_type = event_type.unwrap_or("unknown"),
                "未找到匹配的 handler"
            );
        } else {
            debug!(
                topic,
                event_type = event_type.unwrap_or("unknown"),
                exact = exact.len(),
                wildcard = wildcard.len(),
                "handler 解析完成"
            );
        }

        handlers
    }
}
