//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// 通配事件类型，匹配 topic 上的所有消息
pub const WILDCARD_EVENT_TYPE: &str = "*";

/// Kafka 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub consumer_group: String,
    pub client_id: String,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u32,
    /// plaintext / ssl / sasl_plaintext / sasl_ssl
    pub security_protocol: String,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// 单次拉取的最长阻塞时间
    pub poll_timeout_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "event-router".to_string(),
            client_id: "event-router-client".to_string(),
            auto_offset_reset: "latest".to_string(),
            session_timeout_ms: 30_000,
            security_protocol: "plaintext".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            poll_timeout_ms: 1_000,
        }
    }
}

/// Topic 订阅
///
/// 一个订阅把 topic 上的若干事件类型映射到有序的 handler 列表，
/// handler 的声明顺序即扇出调用顺序。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "SubscriptionEntry")]
pub struct TopicSubscription {
    pub topic_name: String,
    pub event_types: Vec<String>,
    pub handler_names: Vec<String>,
}

impl TopicSubscription {
    pub fn new<E, H>(topic_name: impl Into<String>, event_types: E, handler_names: H) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        H: IntoIterator,
        H::Item: Into<String>,
    {
        Self {
            topic_name: topic_name.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            handler_names: handler_names.into_iter().map(Into::into).collect(),
        }
    }
}

/// 配置文件中的订阅条目
///
/// 兼容两种写法：单事件/单 handler（`event_type` + `handler_name`）
/// 与多事件/多 handler（`event_types` + `handler_names`），统一归一化为 `TopicSubscription`。
#[derive(Debug, Deserialize)]
struct SubscriptionEntry {
    topic_name: String,
    #[serde(default)]
    event_types: Vec<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    handler_names: Vec<String>,
    #[serde(default)]
    handler_name: Option<String>,
}

impl From<SubscriptionEntry> for TopicSubscription {
    fn from(entry: SubscriptionEntry) -> Self {
        let mut event_types = entry.event_types;
        if let Some(event_type) = entry.event_type
            && !event_type.is_empty()
            && !event_types.contains(&event_type)
        {
            event_types.push(event_type);
        }

        let mut handler_names = entry.handler_names;
        if let Some(handler_name) = entry.handler_name
            && !handler_name.is_empty()
            && !handler_names.contains(&handler_name)
        {
            handler_names.push(handler_name);
        }

        Self {
            topic_name: entry.topic_name,
            event_types,
            handler_names,
        }
    }
}

/// Topic 路由配置
///
/// `sets` 中可以存放多套订阅（如 Dev / Staging / Prod），由 `current_set` 选中其中一套。
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TopicSettings {
    pub current_set: String,
    pub sets: HashMap<String, Vec<TopicSubscription>>,
    /// 为 true 时任何无法解析的 handler 名称都会导致启动失败
    pub strict_handlers: bool,
}

impl TopicSettings {
    /// 按名称查找当前激活的订阅集合
    ///
    /// 配置源可能改写 key 的大小写，这里按不区分大小写匹配。
    pub fn active_set(&self) -> Option<(&str, &[TopicSubscription])> {
        if self.current_set.is_empty() {
            return None;
        }

        self.sets
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.current_set))
            .map(|(name, subscriptions)| (name.as_str(), subscriptions.as_slice()))
    }

    /// 所有已定义的集合名称（排序后返回，便于日志输出）
    pub fn set_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Okta 客户端凭证配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OktaConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    /// 令牌端点未返回 expires_in 时使用的默认有效期
    pub default_token_lifetime_seconds: u64,
}

impl Default for OktaConfig {
    fn default() -> Self {
        Self {
            token_url: "https://okta.example.com/oauth2/default".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: "default".to_string(),
            default_token_lifetime_seconds: 3600,
        }
    }
}

/// 外部 API 定义
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiDefinition {
    pub name: String,
    pub base_url: String,
    pub relative_urls: HashMap<String, String>,
}

/// 外部系统配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExternalSystemsConfig {
    pub api_definitions: Vec<ApiDefinition>,
}

/// 服务配置（健康检查端点）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 是否输出 JSON 结构化日志
    pub json_logs: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub topics: TopicSettings,
    pub okta: OktaConfig,
    pub external_systems: ExternalSystemsConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（ROUTER_ 前缀，层级用 `__` 分隔，如 ROUTER_KAFKA__BROKERS -> kafka.brokers）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("ROUTER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("ROUTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 健康检查服务监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_toml(source: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.kafka.poll_timeout_ms, 1_000);
        assert_eq!(config.okta.default_token_lifetime_seconds, 3600);
        assert!(config.topics.active_set().is_none());
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            ..Default::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_parse_multi_subscription() {
        let config = parse_toml(
            r#"
            [topics]
            current_set = "Dev"

            [[topics.sets.Dev]]
            topic_name = "orders"
            event_types = ["order.updated", "order.created"]
            handler_names = ["UpdateOrder", "Logger"]
            "#,
        );

        let (name, subscriptions) = config.topics.active_set().unwrap();
        assert!(name.eq_ignore_ascii_case("Dev"));
        assert_eq!(subscriptions.len(), 1);
        assert_eq!(
            subscriptions[0],
            TopicSubscription::new(
                "orders",
                ["order.updated", "order.created"],
                ["UpdateOrder", "Logger"]
            )
        );
    }

    #[test]
    fn test_parse_legacy_single_subscription() {
        let config = parse_toml(
            r#"
            [topics]
            current_set = "Development"

            [[topics.sets.Development]]
            topic_name = "topic_1"
            event_type = "user.created"
            handler_name = "UpdateUser"
            "#,
        );

        let (_, subscriptions) = config.topics.active_set().unwrap();
        assert_eq!(subscriptions[0].event_types, vec!["user.created"]);
        assert_eq!(subscriptions[0].handler_names, vec!["UpdateUser"]);
    }

    #[test]
    fn test_subscription_entry_merges_both_shapes() {
        let entry = SubscriptionEntry {
            topic_name: "orders".to_string(),
            event_types: vec!["order.updated".to_string()],
            event_type: Some("order.updated".to_string()),
            handler_names: vec![],
            handler_name: Some("UpdateOrder".to_string()),
        };

        let subscription = TopicSubscription::from(entry);
        assert_eq!(subscription.event_types, vec!["order.updated"]);
        assert_eq!(subscription.handler_names, vec!["UpdateOrder"]);
    }

    #[test]
    fn test_active_set_is_case_insensitive() {
        let mut sets = HashMap::new();
        sets.insert(
            "dev".to_string(),
            vec![TopicSubscription::new("orders", ["*"], ["Logger"])],
        );
        let settings = TopicSettings {
            current_set: "Dev".to_string(),
            sets,
            strict_handlers: false,
        };

        assert!(settings.active_set().is_some());

        let missing = TopicSettings {
            current_set: "Prod".to_string(),
            ..settings
        };
        assert!(missing.active_set().is_none());
        assert_eq!(missing.set_names(), vec!["dev"]);
    }
}
