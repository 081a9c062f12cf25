//! 日志 handler
//!
//! 记录收到的每条消息的元数据与内容，通常挂在通配事件类型上做审计。

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::handler::{EventHandler, InboundEvent};

pub const HANDLER_NAME: &str = "Logger";

/// 负载超过该长度时截断输出
const MAX_LOGGED_PAYLOAD: usize = 4096;

#[derive(Debug, Default)]
pub struct Logger;

#[async_trait]
impl EventHandler for Logger {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn process_event(&self, event: &InboundEvent) -> Result<bool> {
        let message = &event.message;
        let headers: Vec<String> = message
            .headers
            .iter()
            .map(|h| format!("{}={}", h.key, h.value_str().unwrap_or("<binary>")))
            .collect();
        let key = message.key_lossy();
        let value = message.payload_lossy();

        info!(
            handler = HANDLER_NAME,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = key.as_deref().unwrap_or("-"),
            event_type = event.event_type_or_unknown(),
            headers = ?headers,
            value = truncate(&value, MAX_LOGGED_PAYLOAD),
            "收到消息"
        );

        Ok(true)
    }
}

/// 按字符边界截断
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_shared::test_utils::MessageBuilder;

    #[tokio::test]
    async fn test_logger_always_succeeds() {
        let message = MessageBuilder::new("orders")
            .key("k-1")
            .header("type", "order.updated")
            .header("blob", vec![0xFF])
            .payload("{\"orderId\":\"o-1\"}")
            .build();
        let event = InboundEvent::new(message, Some("order.updated".to_string()), None);

        assert!(Logger.process_event(&event).await.unwrap());
        assert_eq!(Logger.name(), "Logger");
    }

    #[tokio::test]
    async fn test_logger_accepts_empty_message() {
        let event = InboundEvent::new(MessageBuilder::new("orders").build(), None, None);
        assert!(Logger.process_event(&event).await.unwrap());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("订单更新", 4), "订");
    }
}
