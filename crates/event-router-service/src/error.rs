//! 事件路由服务专用错误类型
//!
//! 在共享库 RouterError 基础上定义路由配置、handler 调用与令牌刷新等错误变体。
//! 配置类错误只会在启动阶段出现，一旦出现即终止进程，不做任何默认兜底。

use router_shared::error::RouterError;

/// 事件路由错误
#[derive(Debug, thiserror::Error)]
pub enum RouterServiceError {
    // ==================== 配置错误（启动期致命） ====================
    #[error("配置集合 '{current_set}' 未定义，可用集合: [{available}]")]
    UnknownConfigurationSet {
        current_set: String,
        available: String,
    },

    #[error("订阅 topic '{topic}' 必须至少声明一个事件类型")]
    EmptyEventTypes { topic: String },

    #[error("订阅 topic '{topic}' 必须至少声明一个 handler")]
    EmptyHandlers { topic: String },

    #[error("handler '{handler}' 未注册 (topic '{topic}')")]
    UnknownHandler { topic: String, handler: String },

    #[error("handler '{handler}' 不满足处理器契约: {reason}")]
    HandlerContract { handler: String, reason: String },

    #[error("topic '{topic}' 事件类型 '{event_type}' 没有任何有效的 handler")]
    NoValidHandlers { topic: String, event_type: String },

    #[error("配置集合 '{current_set}' 没有配置任何 topic")]
    NoTopics { current_set: String },

    // ==================== 运行期错误 ====================
    #[error("handler '{handler}' 处理失败: {reason}")]
    HandlerFailed { handler: String, reason: String },

    #[error("获取访问令牌失败: {0}")]
    TokenRefresh(String),

    /// 透传共享库错误，避免在每个 match 分支手动转换
    #[error(transparent)]
    Shared(#[from] RouterError),
}

pub type Result<T> = std::result::Result<T, RouterServiceError>;

impl RouterServiceError {
    /// 是否为启动期配置错误
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownConfigurationSet { .. }
                | Self::EmptyEventTypes { .. }
                | Self::EmptyHandlers { .. }
                | Self::UnknownHandler { .. }
                | Self::HandlerContract { .. }
                | Self::NoValidHandlers { .. }
                | Self::NoTopics { .. }
                | Self::Shared(RouterError::Config(_))
        )
    }
}
