//! 路由表构建
//!
//! 启动时根据当前激活的配置集合构建 (topic, 事件类型) -> handler 列表 的路由表。
//! 路由表构建完成后只读，整个进程生命周期内不再修改，重启才会重建。

use std::collections::HashMap;

use router_shared::config::{TopicSettings, TopicSubscription, WILDCARD_EVENT_TYPE};
use tracing::{info, warn};

use crate::catalog::HandlerCatalog;
use crate::error::{Result, RouterServiceError};

/// 只读路由表
///
/// topic 与事件类型均以小写作为键；handler 名称保持配置中的写法与顺序，
/// 顺序即扇出调用顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    set_name: String,
    topics: Vec<String>,
    routes: HashMap<String, HashMap<String, Vec<String>>>,
}

impl RoutingTable {
    /// 构建所用的配置集合名称
    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// 需要订阅的 topic（按原始写法精确去重，保持首次出现的顺序）
    ///
    /// Kafka 的 topic 名称区分大小写，大小写不同的写法各自订阅；路由查找仍不区分大小写。
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// 精确查找某个桶中的 handler 名称，不存在时返回空切片
    pub fn handlers_for(&self, topic: &str, event_type: &str) -> &[String] {
        self.routes
            .get(&topic.to_lowercase())
            .and_then(|buckets| buckets.get(&event_type.to_lowercase()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 该 topic 的通配桶
    pub fn wildcard_handlers(&self, topic: &str) -> &[String] {
        self.handlers_for(topic, WILDCARD_EVENT_TYPE)
    }

    /// 路由桶总数
    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn append(&mut self, topic: &str, event_type: &str, handlers: &[String]) {
        if !self.topics.iter().any(|t| t == topic) {
            self.topics.push(topic.to_string());
        }

        self.routes
            .entry(topic.to_lowercase())
            .or_default()
            .entry(event_type.to_lowercase())
            .or_default()
            .extend(handlers.iter().cloned());
    }
}

/// 路由表构建器
pub struct HandlerRegistry;

impl HandlerRegistry {
    /// 从当前配置集合构建路由表
    ///
    /// 无效 handler（未注册或不满足契约）默认记录警告后跳过；
    /// `strict_handlers` 打开时直接失败。某个订阅没有任何有效 handler 时始终失败。
    pub fn build(settings: &TopicSettings, catalog: &HandlerCatalog) -> Result<RoutingTable> {
        let (set_name, subscriptions) =
            settings
                .active_set()
                .ok_or_else(|| RouterServiceError::UnknownConfigurationSet {
                    current_set: settings.current_set.clone(),
                    available: settings.set_names().join(", "),
                })?;

        let mut table = RoutingTable {
            set_name: set_name.to_string(),
            ..Default::default()
        };

        for subscription in subscriptions {
            let event_types = non_blank(&subscription.event_types);
            if event_types.is_empty() {
                return Err(RouterServiceError::EmptyEventTypes {
                    topic: subscription.topic_name.clone(),
                });
            }

            if non_blank(&subscription.handler_names).is_empty() {
                return Err(RouterServiceError::EmptyHandlers {
                    topic: subscription.topic_name.clone(),
                });
            }

            let handlers = valid_handlers(subscription, catalog, settings.strict_handlers)?;
            if handlers.is_empty() {
                return Err(RouterServiceError::NoValidHandlers {
                    topic: subscription.topic_name.clone(),
                    event_type: event_types.join(", "),
                });
            }

            for event_type in &event_types {
                table.append(&subscription.topic_name, event_type, &handlers);
            }
        }

        info!(
            set = %table.set_name,
            topics = ?table.topics,
            routes = table.route_count(),
            "路由表构建完成"
        );

        Ok(table)
    }
}

fn non_blank(values: &[String]) -> Vec<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

/// 校验订阅中的 handler，返回有效的名称（保持声明顺序）
fn valid_handlers(
    subscription: &TopicSubscription,
    catalog: &HandlerCatalog,
    strict: bool,
) -> Result<Vec<String>> {
    let mut valid = Vec::with_capacity(subscription.handler_names.len());

    for name in non_blank(&subscription.handler_names) {
        let outcome = if catalog.contains(name) {
            catalog.validate(name)
        } else {
            Err(RouterServiceError::UnknownHandler {
                topic: subscription.topic_name.clone(),
                handler: name.to_string(),
            })
        };

        match outcome {
            Ok(()) => valid.push(name.to_string()),
            Err(err) if strict => return Err(err),
            Err(err) => {
                warn!(
                    topic = %subscription.topic_name,
                    handler = name,
                    error = %err,
                    "handler 无效，已跳过"
                );
            }
        }
    }

    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::stub;

    fn catalog() -> HandlerCatalog {
        let mut catalog = HandlerCatalog::new();
        catalog.register_singleton("UpdateOrder", || Ok(stub("UpdateOrder")));
        catalog.register_singleton("Logger", || Ok(stub("Logger")));
        catalog.register_transient("Mislabelled", || Ok(stub("Other")));
        catalog
    }

    fn settings(subscriptions: Vec<TopicSubscription>) -> TopicSettings {
        TopicSettings {
            current_set: "Dev".to_string(),
            sets: HashMap::from([("Dev".to_string(), subscriptions)]),
            strict_handlers: false,
        }
    }

    #[test]
    fn test_build_routes_in_declaration_order() {
        let settings = settings(vec![
            TopicSubscription::new(
                "Orders",
                ["order.updated", "order.created"],
                ["UpdateOrder", "Logger"],
            ),
            TopicSubscription::new("orders", ["*"], ["Logger"]),
            TopicSubscription::new("users", ["user.created"], ["Logger"]),
        ]);

        let table = HandlerRegistry::build(&settings, &catalog()).unwrap();

        assert_eq!(table.set_name(), "Dev");
        assert_eq!(table.topics(), ["Orders", "orders", "users"]);
        assert_eq!(
            table.handlers_for("ORDERS", "Order.Updated"),
            ["UpdateOrder", "Logger"]
        );
        assert_eq!(table.wildcard_handlers("orders"), ["Logger"]);
        assert_eq!(table.route_count(), 4);
        assert!(table.handlers_for("orders", "order.deleted").is_empty());
        assert!(table.handlers_for("payments", "order.updated").is_empty());
    }

    #[test]
    fn test_topic_spellings_subscribed_separately_but_share_routes() {
        let settings = settings(vec![
            TopicSubscription::new("Orders", ["*"], ["Logger"]),
            TopicSubscription::new("orders", ["*"], ["Logger"]),
            TopicSubscription::new("orders", ["order.updated"], ["UpdateOrder"]),
        ]);

        let table = HandlerRegistry::build(&settings, &catalog()).unwrap();

        assert_eq!(table.topics(), ["Orders", "orders"]);
        assert_eq!(table.wildcard_handlers("Orders"), ["Logger", "Logger"]);
        assert_eq!(table.wildcard_handlers("orders"), ["Logger", "Logger"]);
        assert_eq!(table.handlers_for("Orders", "order.updated"), ["UpdateOrder"]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let settings = settings(vec![
            TopicSubscription::new("orders", ["order.updated"], ["UpdateOrder"]),
            TopicSubscription::new("orders", ["*"], ["Logger"]),
        ]);
        let catalog = catalog();

        let first = HandlerRegistry::build(&settings, &catalog).unwrap();
        let second = HandlerRegistry::build(&settings, &catalog).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_overlapping_subscriptions_keep_duplicates() {
        let settings = settings(vec![
            TopicSubscription::new("orders", ["order.updated"], ["Logger"]),
            TopicSubscription::new("orders", ["ORDER.UPDATED"], ["UpdateOrder", "Logger"]),
        ]);

        let table = HandlerRegistry::build(&settings, &catalog()).unwrap();
        assert_eq!(
            table.handlers_for("orders", "order.updated"),
            ["Logger", "UpdateOrder", "Logger"]
        );
    }

    #[test]
    fn test_unknown_configuration_set() {
        let mut settings = settings(vec![]);
        settings.current_set = "Prod".to_string();

        match HandlerRegistry::build(&settings, &catalog()) {
            Err(RouterServiceError::UnknownConfigurationSet {
                current_set,
                available,
            }) => {
                assert_eq!(current_set, "Prod");
                assert_eq!(available, "Dev");
            }
            other => panic!("unexpected: {other:?}"),
        }

        settings.current_set.clear();
        assert!(HandlerRegistry::build(&settings, &catalog()).is_err());
    }

    #[test]
    fn test_empty_handlers_is_configuration_error() {
        let settings = settings(vec![TopicSubscription::new(
            "orders",
            ["order.updated"],
            Vec::<String>::new(),
        )]);

        let err = HandlerRegistry::build(&settings, &catalog()).unwrap_err();
        assert!(matches!(err, RouterServiceError::EmptyHandlers { ref topic } if topic == "orders"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_event_types_is_configuration_error() {
        let settings = settings(vec![TopicSubscription::new(
            "orders",
            ["  "],
            ["UpdateOrder"],
        )]);

        assert!(matches!(
            HandlerRegistry::build(&settings, &catalog()),
            Err(RouterServiceError::EmptyEventTypes { .. })
        ));
    }

    #[test]
    fn test_partially_valid_subscription_keeps_valid_handlers() {
        let settings = settings(vec![TopicSubscription::new(
            "orders",
            ["order.updated"],
            ["Missing", "UpdateOrder", "Mislabelled"],
        )]);

        let table = HandlerRegistry::build(&settings, &catalog()).unwrap();
        assert_eq!(table.handlers_for("orders", "order.updated"), ["UpdateOrder"]);
    }

    #[test]
    fn test_no_valid_handlers_fails() {
        let settings = settings(vec![TopicSubscription::new(
            "orders",
            ["order.updated"],
            ["Missing", "Mislabelled"],
        )]);

        assert!(matches!(
            HandlerRegistry::build(&settings, &catalog()),
            Err(RouterServiceError::NoValidHandlers { .. })
        ));
    }

    #[test]
    fn test_strict_mode_rejects_any_invalid_handler() {
        let mut strict = settings(vec![TopicSubscription::new(
            "orders",
            ["order.updated"],
            ["UpdateOrder", "Missing"],
        )]);
        strict.strict_handlers = true;

        match HandlerRegistry::build(&strict, &catalog()) {
            Err(RouterServiceError::UnknownHandler { topic, handler }) => {
                assert_eq!(topic, "orders");
                assert_eq!(handler, "Missing");
            }
            other => panic!("unexpected: {other:?}"),
        }

        strict.sets.insert(
            "Dev".to_string(),
            vec![TopicSubscription::new(
                "orders",
                ["order.updated"],
                ["Mislabelled"],
            )],
        );
        assert!(matches!(
            HandlerRegistry::build(&strict, &catalog()),
            Err(RouterServiceError::HandlerContract { .. })
        ));
    }
}
