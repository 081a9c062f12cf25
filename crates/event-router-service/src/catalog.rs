//! 处理器目录
//!
//! 启动时把所有可用的 handler 实现登记为 名称 -> 工厂 的显式注册表，
//! 路由阶段只按名称查表，不做任何运行期的类型查找。名称匹配不区分大小写。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Result, RouterServiceError};
use crate::handler::EventHandler;

/// handler 工厂
pub type HandlerFactory = Arc<dyn Fn() -> Result<Arc<dyn EventHandler>> + Send + Sync>;

/// handler 实例的生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerLifetime {
    /// 首次构造后按名称缓存，之后复用同一实例
    Singleton,
    /// 每次解析都构造新实例
    Transient,
}

struct Registration {
    name: String,
    lifetime: HandlerLifetime,
    factory: HandlerFactory,
}

/// 处理器目录
///
/// 注册在启动阶段完成（需要 `&mut self`），之后以 `Arc` 共享只读使用；
/// 单例缓存使用 DashMap，允许并发解析。
#[derive(Default)]
pub struct HandlerCatalog {
    registrations: HashMap<String, Registration>,
    singletons: DashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 handler，同名（不区分大小写）的旧注册会被覆盖
    pub fn register<F>(&mut self, name: impl Into<String>, lifetime: HandlerLifetime, factory: F)
    where
        F: Fn() -> Result<Arc<dyn EventHandler>> + Send + Sync + 'static,
    {
        let name = name.into();
        let key = name.to_lowercase();
        debug!(handler = %name, ?lifetime, "注册 handler");

        self.singletons.remove(&key);
        self.registrations.insert(
            key,
            Registration {
                name,
                lifetime,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn register_singleton<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn EventHandler>> + Send + Sync + 'static,
    {
        self.register(name, HandlerLifetime::Singleton, factory);
    }

    pub fn register_transient<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn EventHandler>> + Send + Sync + 'static,
    {
        self.register(name, HandlerLifetime::Transient, factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registrations.contains_key(&name.to_lowercase())
    }

    pub fn lifetime(&self, name: &str) -> Option<HandlerLifetime> {
        self.registrations
            .get(&name.to_lowercase())
            .map(|r| r.lifetime)
    }

    /// 已注册的 handler 名称（按字母排序）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .registrations
            .values()
            .map(|r| r.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// 按名称解析 handler 实例
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn EventHandler>> {
        let key = name.to_lowercase();
        let registration =
            self.registrations
                .get(&key)
                .ok_or_else(|| RouterServiceError::HandlerContract {
                    handler: name.to_string(),
                    reason: "未在处理器目录中注册".to_string(),
                })?;

        match registration.lifetime {
            HandlerLifetime::Transient => (registration.factory)(),
            HandlerLifetime::Singleton => {
                if let Some(existing) = self.singletons.get(&key) {
                    return Ok(existing.clone());
                }
                let created = (registration.factory)()?;
                // 并发首次构造时保留先写入的实例
                let instance = self.singletons.entry(key).or_insert(created).clone();
                Ok(instance)
            }
        }
    }

    /// 校验 handler 是否满足处理器契约
    ///
    /// 实际构造一次实例：工厂报错，或实例的 `name()` 与注册名不一致，都视为契约不满足。
    pub fn validate(&self, name: &str) -> Result<()> {
        let handler = self.resolve(name).map_err(|e| match e {
            contract @ RouterServiceError::HandlerContract { .. } => contract,
            other => RouterServiceError::HandlerContract {
                handler: name.to_string(),
                reason: format!("构造失败: {other}"),
            },
        })?;

        if !handler.name().eq_ignore_ascii_case(name) {
            return Err(RouterServiceError::HandlerContract {
                handler: name.to_string(),
                reason: format!("实例名称 '{}' 与注册名称不一致", handler.name()),
            });
        }

        Ok(())
    }
}

impl fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("handlers", &self.names())
            .field("cached_singletons", &self.singletons.len())
            .finish()
    }
}
