//! 统一错误处理模块
//!
//! 定义各服务共用的基础设施错误类型，使用 thiserror 提供良好的错误信息。
//! 业务相关的错误（路由配置、Handler 调用等）由各服务在自己的错误类型中扩展。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum RouterError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    /// librdkafka 报告的不可恢复错误，消费者实例必须重建
    #[error("Kafka 致命错误: {0}")]
    KafkaFatal(String),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    Http { service: String, message: String },

    #[error("外部服务返回异常状态: {service} - HTTP {status}")]
    HttpStatus { service: String, status: u16 },

    // ==================== 通用错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::KafkaFatal(_) => "KAFKA_FATAL",
            Self::Http { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::HttpStatus { .. } => "EXTERNAL_SERVICE_STATUS",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 网络传输错误、5xx 以及 429 视为瞬时故障；致命 Kafka 错误和配置错误不可重试。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kafka(_) | Self::Http { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// 是否为需要终止消费循环的错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::KafkaFatal(_))
    }
}
