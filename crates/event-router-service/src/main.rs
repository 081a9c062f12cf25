//! 事件路由服务
//!
//! 启动流程：加载配置 -> 初始化可观测性 -> 登记 handler -> 构建路由表
//! -> 启动健康检查服务 -> 运行消费循环直到收到关闭信号。

use std::sync::Arc;
use std::time::Duration;

use event_router_service::api_client::{ApiClient, ExternalUrlResolver};
use event_router_service::catalog::HandlerCatalog;
use event_router_service::consumer::ConsumerRunLoop;
use event_router_service::credential::{CredentialCache, OktaTokenClient};
use event_router_service::extractor::EventTypeExtractor;
use event_router_service::handlers::{self, HttpOrderApi};
use event_router_service::health::{self, HealthState};
use event_router_service::registry::HandlerRegistry;
use event_router_service::resolver::TopicResolver;
use router_shared::config::AppConfig;
use router_shared::kafka::KafkaConsumer;
use router_shared::observability;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "event-router-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        current_set = %config.topics.current_set,
        "Starting event-router on {}",
        config.server_addr()
    );

    // 出站调用：令牌缓存 -> API 客户端 -> 订单系统
    let credentials = Arc::new(CredentialCache::new(
        Arc::new(OktaTokenClient::new(&config.okta)),
        &config.okta,
    ));
    let api_client = Arc::new(ApiClient::new(
        reqwest::Client::new(),
        credentials,
        ExternalUrlResolver::new(&config.external_systems),
    ));

    let mut catalog = HandlerCatalog::new();
    handlers::register_builtin(&mut catalog, Arc::new(HttpOrderApi::new(api_client)));
    let catalog = Arc::new(catalog);

    // 配置错误在这里直接终止启动
    let table = HandlerRegistry::build(&config.topics, &catalog).inspect_err(|e| {
        error!(error = %e, "路由配置无效");
    })?;
    let subscriptions = config
        .topics
        .active_set()
        .map(|(_, subscriptions)| subscriptions)
        .unwrap_or_default();
    let resolver = Arc::new(TopicResolver::new(
        EventTypeExtractor::new(subscriptions),
        Arc::new(table),
        catalog,
    ));

    let health_state = Arc::new(HealthState::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let listener = TcpListener::bind(config.server_addr()).await?;
    let health_server = tokio::spawn(health::serve(
        listener,
        health_state.clone(),
        shutdown_rx.clone(),
    ));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let consumer = KafkaConsumer::new(&config.kafka)?;
    let run_loop = ConsumerRunLoop::new(
        consumer,
        resolver,
        health_state,
        Duration::from_millis(config.kafka.poll_timeout_ms),
    );
    let result = run_loop.run(shutdown_rx).await;

    // 消费循环因错误退出时也要停止健康检查服务
    let _ = shutdown_tx.send(true);
    match health_server.await {
        Ok(Err(e)) => error!(error = %e, "健康检查服务异常退出"),
        Err(e) => error!(error = %e, "健康检查任务异常"),
        Ok(Ok(())) => {}
    }

    if let Err(e) = result {
        error!(error = %e, "消费循环异常退出");
        return Err(e.into());
    }

    info!("event-router shutdown complete");
    Ok(())
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
