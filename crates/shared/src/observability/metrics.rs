//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;
use std::sync::OnceLock;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "router_messages_consumed_total",
        "Total number of messages pulled from the broker"
    );
    metrics::describe_counter!(
        "router_messages_unrouted_total",
        "Messages for which no handler was resolved"
    );
    metrics::describe_counter!(
        "router_handler_invocations_total",
        "Handler invocations by handler and outcome"
    );
    metrics::describe_histogram!(
        "router_handler_duration_seconds",
        "Handler invocation duration in seconds"
    );
    metrics::describe_counter!(
        "router_offset_commits_total",
        "Offset commits by outcome"
    );
    metrics::describe_counter!(
        "router_token_refreshes_total",
        "Upstream token refreshes by outcome"
    );
    metrics::describe_gauge!("router_consumer_healthy", "1 when the consumer is healthy");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一条拉取到的消息
#[inline]
pub fn record_message_consumed(topic: &str) {
    metrics::counter!("router_messages_consumed_total", "topic" => topic.to_string()).increment(1);
}

/// 记录一条没有匹配到任何 handler 的消息
#[inline]
pub fn record_message_unrouted(topic: &str) {
    metrics::counter!("router_messages_unrouted_total", "topic" => topic.to_string()).increment(1);
}

/// 记录一次 handler 调用
///
/// outcome 取值：success / failure / error / panic
#[inline]
pub fn record_handler_invocation(handler: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "router_handler_invocations_total",
        "handler" => handler.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "router_handler_duration_seconds",
        "handler" => handler.to_string()
    )
    .record(duration_secs);
}

/// 记录 offset 提交结果
#[inline]
pub fn record_offset_commit(success: bool) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!("router_offset_commits_total", "status" => status).increment(1);
}

/// 记录令牌刷新结果
#[inline]
pub fn record_token_refresh(success: bool) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!("router_token_refreshes_total", "status" => status).increment(1);
}

/// 更新消费者健康状态
#[inline]
pub fn set_consumer_healthy(healthy: bool) {
    metrics::gauge!("router_consumer_healthy").set(if healthy { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_recorder_is_noop() {
        // 未安装 recorder 时记录指标不应 panic
        record_message_consumed("orders");
        record_message_unrouted("orders");
        record_handler_invocation("UpdateOrder", "success", 0.01);
        record_offset_commit(true);
        record_token_refresh(false);
        set_consumer_healthy(true);
        assert!(get_handle().is_none());
    }
}
