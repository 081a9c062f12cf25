//! 健康状态与健康检查端点
//!
//! 消费循环是健康状态的唯一写入方；HTTP 端点只读取。
//! - `/health`、`/ready`: 消费者健康返回 200，否则 503
//! - `/live`: 进程存活即返回 200

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use router_shared::observability::metrics;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

const HEALTHY: &str = "Healthy";
const UNHEALTHY: &str = "Unhealthy";

/// 消费者健康状态
///
/// 初始为不健康，订阅成功后才置为健康。每次状态翻转都会记录日志并计数。
#[derive(Debug, Default)]
pub struct HealthState {
    healthy: AtomicBool,
    transitions: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// 更新健康状态，仅在状态变化时记录
    pub fn set_healthy(&self, healthy: bool) {
        let previous = self.healthy.swap(healthy, Ordering::AcqRel);
        if previous == healthy {
            return;
        }

        let transitions = self.transitions.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_consumer_healthy(healthy);
        if healthy {
            info!(transitions, "消费者状态变为健康");
        } else {
            warn!(transitions, "消费者状态变为不健康");
        }
    }

    /// 状态翻转次数
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }
}

/// 健康检查路由
pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(health_check))
        .route("/live", get(liveness_check))
        .with_state(state)
}

/// 启动健康检查服务，收到关闭信号后优雅退出
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "健康检查服务已启动");
    }

    axum::serve(listener, health_router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

/// 消费者健康检查（同时用作就绪探针）
async fn health_check(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let (code, status) = if state.is_healthy() {
        (StatusCode::OK, HEALTHY)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, UNHEALTHY)
    };

    (
        code,
        Json(json!({
            "status": status,
            "checks": { "kafka_consumer": status }
        })),
    )
}

/// 存活探针：进程在运行即返回健康
async fn liveness_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": HEALTHY })))
}
