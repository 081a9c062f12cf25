//! 可观测性模块集成测试
//!
//! 未安装全局 recorder 时指标函数应为空操作；日志过滤器在非法配置下回退。

mod metrics_tests {
    use router_shared::observability::metrics::{
        get_handle, record_handler_invocation, record_message_consumed, record_message_unrouted,
        record_offset_commit, record_token_refresh, set_consumer_healthy,
    };

    #[test]
    fn test_record_message_flow() {
        record_message_consumed("orders");
        record_message_consumed("users");
        record_message_unrouted("orders");
        record_offset_commit(true);
        record_offset_commit(false);
    }

    #[test]
    fn test_record_handler_invocation_outcomes() {
        for outcome in ["success", "failure", "error", "panic"] {
            record_handler_invocation("UpdateOrder", outcome, 0.05);
        }
        record_handler_invocation("Logger", "success", 0.0);
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        record_message_consumed("");
        record_handler_invocation("", "success", f64::MAX);
        record_token_refresh(false);
        set_consumer_healthy(true);
        set_consumer_healthy(false);
    }

    #[test]
    fn test_handle_absent_without_init() {
        assert!(get_handle().is_none());
    }
}

mod tracing_tests {
    use router_shared::observability::tracing::build_filter;

    #[test]
    fn test_valid_level_is_accepted() {
        let filter = build_filter("debug,rdkafka=warn");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let filter = build_filter("=== nonsense");
        assert!(!filter.to_string().is_empty());
    }
}

mod guard_tests {
    use router_shared::observability::ObservabilityGuard;

    #[test]
    fn test_empty_guard_drop() {
        let guard = ObservabilityGuard::empty();
        drop(guard);
    }
}
