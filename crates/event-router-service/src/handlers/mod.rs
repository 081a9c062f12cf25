//! 内置 handler
//!
//! 新增 handler 时在 `register_builtin` 中登记，配置文件通过名称引用。

pub mod logger;
pub mod update_order;

use std::sync::Arc;

use crate::catalog::HandlerCatalog;
use crate::handler::EventHandler;

pub use logger::Logger;
pub use update_order::{HttpOrderApi, OrderApi, UpdateOrder};

/// 把内置 handler 登记到处理器目录
pub fn register_builtin(catalog: &mut HandlerCatalog, order_api: Arc<dyn OrderApi>) {
    catalog.register_singleton(update_order::HANDLER_NAME, move || {
        Ok(Arc::new(UpdateOrder::new(order_api.clone())) as Arc<dyn EventHandler>)
    });
    catalog.register_singleton(logger::HANDLER_NAME, || {
        Ok(Arc::new(Logger) as Arc<dyn EventHandler>)
    });
}
