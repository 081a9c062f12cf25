//! 消费循环
//!
//! 单个任务独占消息源，按 拉取 -> 分发 -> 提交 的顺序串行处理消息：
//! 同一条消息的 handler 依次执行，上一条消息的 handler 全部执行完之前不会开始下一条。
//! handler 的失败、错误或 panic 只影响它自己；无论 handler 结果如何，消息处理后都会提交 offset。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use router_shared::kafka::{ConsumerMessage, MessageSource};
use router_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{Result, RouterServiceError};
use crate::handler::{EventHandler, InboundEvent};
use crate::health::HealthState;
use crate::resolver::TopicResolver;

/// 单次 handler 调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// 返回 true
    Succeeded,
    /// 返回 false
    Failed,
    /// 返回错误
    Errored,
    Panicked,
}

impl HandlerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "success",
            Self::Failed => "failure",
            Self::Errored => "error",
            Self::Panicked => "panic",
        }
    }
}

/// 一条消息的分发结果，按调用顺序记录
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<(String, HandlerOutcome)>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(HandlerOutcome::Succeeded)
    }

    pub fn count(&self, outcome: HandlerOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// 依次调用所有 handler
///
/// 每个 handler 都会被执行，前一个 handler 的失败或 panic 不影响后续 handler。
pub async fn dispatch(event: &InboundEvent, handlers: &[Arc<dyn EventHandler>]) -> DispatchReport {
    let mut report = DispatchReport::default();

    for handler in handlers {
        let name = handler.name().to_string();
        let started = Instant::now();
        let result = AssertUnwindSafe(handler.process_event(event))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(Ok(true)) => {
                debug!(
                    handler = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "handler 处理成功"
                );
                HandlerOutcome::Succeeded
            }
            Ok(Ok(false)) => {
                warn!(
                    handler = %name,
                    topic = %event.message.topic,
                    event_type = event.event_type_or_unknown(),
                    "handler 未能处理事件"
                );
                HandlerOutcome::Failed
            }
            Ok(Err(e)) => {
                error!(
                    handler = %name,
                    topic = %event.message.topic,
                    event_type = event.event_type_or_unknown(),
                    error = %e,
                    "handler 处理出错"
                );
                HandlerOutcome::Errored
            }
            Err(panic) => {
                error!(
                    handler = %name,
                    topic = %event.message.topic,
                    event_type = event.event_type_or_unknown(),
                    panic = panic_message(panic.as_ref()),
                    "handler 发生 panic"
                );
                HandlerOutcome::Panicked
            }
        };

        metrics::record_handler_invocation(&name, outcome.as_str(), elapsed.as_secs_f64());
        report.outcomes.push((name, outcome));
    }

    report
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// 消费循环
pub struct ConsumerRunLoop<S> {
    source: S,
    resolver: Arc<TopicResolver>,
    health: Arc<HealthState>,
    poll_timeout: Duration,
}

impl<S: MessageSource> ConsumerRunLoop<S> {
    pub fn new(
        source: S,
        resolver: Arc<TopicResolver>,
        health: Arc<HealthState>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            resolver,
            health,
            poll_timeout,
        }
    }

    /// 运行消费循环，直到收到关闭信号或遇到不可恢复的错误
    ///
    /// 关闭信号不视为错误；无论以何种方式退出都会关闭消息源。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let topics = self.resolver.table().topics().to_vec();
        if topics.is_empty() {
            self.health.set_healthy(false);
            return Err(RouterServiceError::NoTopics {
                current_set: self.resolver.table().set_name().to_string(),
            });
        }

        if let Err(e) = self.source.subscribe(&topics) {
            self.health.set_healthy(false);
            error!(error = %e, ?topics, "订阅 topic 失败");
            self.source.close();
            return Err(e.into());
        }

        self.health.set_healthy(true);
        info!(?topics, "消费循环已启动");

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let polled = tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                    continue;
                }

                polled = self.source.poll(self.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    self.health.set_healthy(false);
                    error!(error = %e, "消息源出现不可恢复的错误，消费循环退出");
                    break Err(e.into());
                }
                Err(e) => {
                    self.health.set_healthy(false);
                    error!(error = %e, "拉取消息出错");
                }
            }
        };

        self.source.close();
        info!("消费循环已停止");
        result
    }

    /// 处理单条消息：解析 -> 分发 -> 提交
    async fn process(&mut self, message: ConsumerMessage) {
        metrics::record_message_consumed(&message.topic);

        let dispatch_id = Uuid::now_v7();
        let span = info_span!(
            "dispatch",
            %dispatch_id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset
        );

        let resolution = span.in_scope(|| self.resolver.resolve(message));
        async {
            if resolution.handlers.is_empty() {
                metrics::record_message_unrouted(&resolution.event.message.topic);
                return;
            }

            let report = dispatch(&resolution.event, &resolution.handlers).await;
            debug!(
                event_type = resolution.event.event_type_or_unknown(),
                handlers = report.outcomes.len(),
                succeeded = report.succeeded(),
                "消息分发完成"
            );
        }
        .instrument(span)
        .await;

        self.commit(&resolution.event.message);
    }

    /// 提交 offset，失败只记录并标记不健康，不中断循环
    fn commit(&mut self, message: &ConsumerMessage) {
        match self.source.commit(message) {
            Ok(()) => {
                metrics::record_offset_commit(true);
                debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "offset 已提交"
                );
            }
            Err(e) => {
                metrics::record_offset_commit(false);
                self.health.set_healthy(false);
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "提交 offset 失败"
                );
            }
        }
    }
}
