//! 配置加载集成测试
//!
//! 在临时目录写入分层配置文件，验证文件叠加与环境变量覆盖的优先级。
//! 环境变量是进程级状态，因此所有断言放在同一个测试中。

use std::fs;
use std::path::PathBuf;

use router_shared::config::{AppConfig, WILDCARD_EVENT_TYPE};

const DEFAULT_TOML: &str = r#"
[kafka]
brokers = "kafka-default:9092"
consumer_group = "router-default"

[topics]
current_set = "Dev"

[[topics.sets.Dev]]
topic_name = "orders"
event_types = ["order.updated"]
handler_names = ["UpdateOrder"]

[[topics.sets.Dev]]
topic_name = "orders"
event_types = ["*"]
handler_names = ["Logger"]

[[external_systems.api_definitions]]
name = "OrderApi"
base_url = "http://orders.local"

[external_systems.api_definitions.relative_urls]
UpdateOrder = "/api/orders/{orderId}"
"#;

const STAGING_TOML: &str = r#"
environment = "staging"

[kafka]
consumer_group = "router-staging"

[okta]
client_id = "router-client"
"#;

fn config_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("router-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("default.toml"), DEFAULT_TOML).unwrap();
    fs::write(dir.join("staging.toml"), STAGING_TOML).unwrap();
    dir
}

#[test]
fn test_load_layers_files_and_env_overrides() {
    let dir = config_dir();

    // SAFETY: 本测试二进制中只有这一个测试读写环境变量
    unsafe {
        std::env::set_var("CONFIG_DIR", &dir);
        std::env::set_var("ROUTER_ENV", "staging");
        std::env::set_var("ROUTER_KAFKA__BROKERS", "kafka-env:9092");
        std::env::set_var("ROUTER_SERVER__PORT", "18080");
    }

    let config = AppConfig::load("event-router-service").unwrap();

    unsafe {
        std::env::remove_var("CONFIG_DIR");
        std::env::remove_var("ROUTER_ENV");
        std::env::remove_var("ROUTER_KAFKA__BROKERS");
        std::env::remove_var("ROUTER_SERVER__PORT");
    }
    let _ = fs::remove_dir_all(&dir);

    assert_eq!(config.service_name, "event-router-service");
    assert_eq!(config.environment, "staging");
    assert!(!config.is_production());

    // 环境变量 > 环境配置文件 > 默认配置文件 > 代码默认值
    assert_eq!(config.kafka.brokers, "kafka-env:9092");
    assert_eq!(config.kafka.consumer_group, "router-staging");
    assert_eq!(config.kafka.poll_timeout_ms, 1_000);
    assert_eq!(config.server.port, 18080);
    assert_eq!(config.okta.client_id, "router-client");
    assert_eq!(config.okta.default_token_lifetime_seconds, 3600);

    let (set_name, subscriptions) = config.topics.active_set().unwrap();
    assert!(set_name.eq_ignore_ascii_case("Dev"));
    assert_eq!(subscriptions.len(), 2);
    assert_eq!(subscriptions[1].event_types, vec![WILDCARD_EVENT_TYPE]);
    assert!(!config.topics.strict_handlers);

    let order_api = &config.external_systems.api_definitions[0];
    assert_eq!(order_api.name, "OrderApi");
    let update_url = order_api
        .relative_urls
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("UpdateOrder"))
        .map(|(_, url)| url.as_str());
    assert_eq!(update_url, Some("/api/orders/{orderId}"));
}
