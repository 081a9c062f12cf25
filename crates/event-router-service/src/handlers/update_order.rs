//! 订单更新 handler
//!
//! 从事件数据中解析订单更新，调用订单系统 `PUT /api/orders/{orderId}`。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::error::{Result, RouterServiceError};
use crate::handler::{EventHandler, InboundEvent};

pub const HANDLER_NAME: &str = "UpdateOrder";

/// 外部系统配置中订单系统的 API 名称
pub const ORDER_API: &str = "OrderApi";
const UPDATE_ORDER_URL_KEY: &str = "UpdateOrder";
const DEFAULT_UPDATE_ORDER_PATH: &str = "/api/orders/{orderId}";

/// 订单更新事件数据
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderEvent {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// 订单系统更新请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdateRequest {
    pub status: Option<String>,
    pub order_number: Option<String>,
    pub amount: Option<f64>,
}

impl From<&UpdateOrderEvent> for OrderUpdateRequest {
    fn from(event: &UpdateOrderEvent) -> Self {
        Self {
            status: event.status.clone(),
            order_number: event.order_number.clone(),
            amount: event.amount,
        }
    }
}

/// 订单系统接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn update_order(&self, order_id: &str, request: &OrderUpdateRequest) -> Result<()>;
}

/// 通过 `ApiClient` 调用订单系统
pub struct HttpOrderApi {
    client: Arc<ApiClient>,
}

impl HttpOrderApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// 订单更新地址：优先使用配置的相对路径，未配置时使用默认路径
    fn update_url(&self, order_id: &str) -> Option<String> {
        let urls = self.client.urls();
        let template = urls
            .absolute_url(ORDER_API, UPDATE_ORDER_URL_KEY)
            .or_else(|| {
                urls.base_url(ORDER_API).map(|base| {
                    format!(
                        "{}/{}",
                        base.trim_end_matches('/'),
                        DEFAULT_UPDATE_ORDER_PATH.trim_start_matches('/')
                    )
                })
            })?;
        Some(template.replace("{orderId}", order_id))
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn update_order(&self, order_id: &str, request: &OrderUpdateRequest) -> Result<()> {
        let url = self
            .update_url(order_id)
            .ok_or_else(|| RouterServiceError::HandlerFailed {
                handler: HANDLER_NAME.to_string(),
                reason: format!("外部系统 {ORDER_API} 未配置"),
            })?;

        self.client.put_json(ORDER_API, &url, request).await
    }
}

/// 订单更新 handler
pub struct UpdateOrder {
    api: Arc<dyn OrderApi>,
}

impl UpdateOrder {
    pub fn new(api: Arc<dyn OrderApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl EventHandler for UpdateOrder {
    fn name(&self) -> &str {
        HANDLER_NAME
    }

    async fn process_event(&self, event: &InboundEvent) -> Result<bool> {
        let order: UpdateOrderEvent = event.data()?;

        let Some(order_id) = order.order_id.as_deref().filter(|id| !id.is_empty()) else {
            warn!(
                handler = HANDLER_NAME,
                topic = %event.message.topic,
                offset = event.message.offset,
                "订单更新事件缺少 orderId"
            );
            return Ok(false);
        };

        info!(
            handler = HANDLER_NAME,
            event_type = event.event_type_or_unknown(),
            event_id = event.envelope.as_ref().map(|e| e.id.as_str()).unwrap_or("-"),
            order_id,
            status = order.status.as_deref().unwrap_or("-"),
            "处理订单更新事件"
        );

        self.api
            .update_order(order_id, &OrderUpdateRequest::from(&order))
            .await?;
        Ok(true)
    }
}
