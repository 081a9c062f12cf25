//! 访问令牌缓存
//!
//! 为出站调用提供短期 bearer token。令牌在过期前 30 秒即视为失效；
//! 刷新过程是单飞的：同一时刻最多一个上游请求，其余调用方等待闸门后复用其结果。
//! 刷新失败把上游错误原样返回给触发刷新的调用方，已缓存的旧令牌保持不变，缓存内部不做重试。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use router_shared::config::OktaConfig;
use router_shared::error::RouterError;
use router_shared::observability::metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{Result, RouterServiceError};

/// 令牌到期前的安全余量
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

const TOKEN_SERVICE: &str = "Okta";

// ==================== 令牌端点模型 ====================

/// 客户端凭证模式的令牌请求（form 编码）
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl TokenRequest {
    pub fn client_credentials(config: &OktaConfig) -> Self {
        Self {
            grant_type: "client_credentials".to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
        }
    }
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("scope", &self.scope)
            .finish()
    }
}

/// 令牌端点响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// 有效期（秒），为 0 时使用配置的默认有效期
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// 令牌端点抽象
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenApi: Send + Sync {
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenResponse>;
}

/// 基于 reqwest 的令牌端点实现
pub struct OktaTokenClient {
    http: reqwest::Client,
    endpoint: String,
}

impl OktaTokenClient {
    pub fn new(config: &OktaConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &OktaConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/v1/token", config.token_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenApi for OktaTokenClient {
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(request)
            .send()
            .await
            .map_err(|e| RouterError::Http {
                service: TOKEN_SERVICE.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RouterServiceError::TokenRefresh(format!(
                "令牌端点返回 {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RouterError::Serialization(format!("令牌响应解析失败: {e}")))?;

        if token.access_token.is_empty() {
            return Err(RouterServiceError::TokenRefresh(
                "令牌端点返回了空的 access_token".to_string(),
            ));
        }

        Ok(token)
    }
}

// ==================== 缓存 ====================

/// 已缓存的令牌，替换而不原地修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCredential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedCredential {
    /// 在 `now` 时刻是否仍可交给调用方（需留出安全余量）
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        expiry_after(now, EXPIRY_MARGIN) < self.expires_at
    }
}

fn expiry_after(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 令牌缓存
///
/// 读路径只做一次原子 load；刷新路径由异步互斥闸门串行化，
/// 获取闸门后再检查一次，避免排队的调用方重复请求上游。
pub struct CredentialCache {
    api: Arc<dyn TokenApi>,
    request: TokenRequest,
    default_lifetime: Duration,
    slot: ArcSwapOption<CachedCredential>,
    refresh_gate: Mutex<()>,
}

impl CredentialCache {
    pub fn new(api: Arc<dyn TokenApi>, config: &OktaConfig) -> Self {
        Self {
            api,
            request: TokenRequest::client_credentials(config),
            default_lifetime: Duration::from_secs(config.default_token_lifetime_seconds),
            slot: ArcSwapOption::empty(),
            refresh_gate: Mutex::new(()),
        }
    }

    /// 获取可用的访问令牌，必要时刷新
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;

        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        info!("获取新的访问令牌");
        match self.api.request_token(&self.request).await {
            Ok(response) => {
                let lifetime = match response.expires_in {
                    0 => self.default_lifetime,
                    seconds => Duration::from_secs(seconds),
                };
                let credential = CachedCredential {
                    access_token: response.access_token,
                    expires_at: expiry_after(Utc::now(), lifetime),
                };
                let token = credential.access_token.clone();

                info!(
                    expires_at = %credential.expires_at,
                    lifetime_secs = lifetime.as_secs(),
                    "访问令牌已刷新"
                );
                self.slot.store(Some(Arc::new(credential)));
                metrics::record_token_refresh(true);
                Ok(token)
            }
            Err(e) => {
                error!(error = %e, "获取访问令牌失败");
                metrics::record_token_refresh(false);
                Err(e)
            }
        }
    }

    /// 当前缓存的令牌（无论是否仍在有效期内）
    pub fn cached(&self) -> Option<Arc<CachedCredential>> {
        self.slot.load_full()
    }

    fn fresh_token(&self) -> Option<String> {
        let credential = self.slot.load_full()?;
        credential
            .is_fresh_at(Utc::now())
            .then(|| credential.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn okta_config() -> OktaConfig {
        OktaConfig {
            token_url: "https://okta.test/oauth2/default/".to_string(),
            client_id: "router".to_string(),
            client_secret: "s3cret".to_string(),
            ..Default::default()
        }
    }

    fn token(access_token: &str, expires_in: u64) -> TokenResponse {
        TokenResponse {
            access_token: access_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            scope: Some("default".to_string()),
        }
    }

    /// 模拟慢速令牌端点并统计调用次数
    struct SlowTokenApi {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl TokenApi for SlowTokenApi {
        async fn request_token(&self, _request: &TokenRequest) -> Result<TokenResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(token(&format!("token-{call}"), 3600))
        }
    }

    #[test]
    fn test_token_request_from_config() {
        let request = TokenRequest::client_credentials(&okta_config());
        assert_eq!(request.grant_type, "client_credentials");
        assert_eq!(request.scope, "default");
        assert!(!format!("{request:?}").contains("s3cret"));

        let client = OktaTokenClient::new(&okta_config());
        assert_eq!(client.endpoint(), "https://okta.test/oauth2/default/v1/token");
    }

    #[test]
    fn test_freshness_honours_margin() {
        let now = Utc::now();
        let credential = CachedCredential {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(31),
        };
        assert!(credential.is_fresh_at(now));
        assert!(!credential.is_fresh_at(now + chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_single_refresh() {
        let api = Arc::new(SlowTokenApi {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let cache = Arc::new(CredentialCache::new(api.clone(), &okta_config()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect();

        let tokens: Vec<String> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == "token-1"));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let mut api = MockTokenApi::new();
        api.expect_request_token()
            .times(1)
            .returning(|_| Ok(token("cached", 3600)));

        let cache = CredentialCache::new(Arc::new(api), &okta_config());
        assert_eq!(cache.get_token().await.unwrap(), "cached");
        assert_eq!(cache.get_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_token_inside_margin_triggers_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut api = MockTokenApi::new();
        api.expect_request_token().times(2).returning(move |_| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            // 第一次返回的令牌只剩 20 秒，落在安全余量内
            Ok(token(&format!("token-{call}"), if call == 0 { 20 } else { 3600 }))
        });

        let cache = CredentialCache::new(Arc::new(api), &okta_config());
        assert_eq!(cache.get_token().await.unwrap(), "token-0");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_expires_in_uses_default_lifetime() {
        let mut api = MockTokenApi::new();
        api.expect_request_token()
            .withf(|request| request.client_id == "router" && request.scope == "default")
            .times(1)
            .returning(|_| Ok(token("t", 0)));

        let cache = CredentialCache::new(Arc::new(api), &okta_config());
        cache.get_token().await.unwrap();

        let cached = cache.cached().unwrap();
        let remaining = cached.expires_at - Utc::now();
        assert!(remaining.num_seconds() > 3500);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut api = MockTokenApi::new();
        api.expect_request_token().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(token("old", 10))
            } else {
                Err(RouterServiceError::TokenRefresh("401 Unauthorized".to_string()))
            }
        });

        let cache = CredentialCache::new(Arc::new(api), &okta_config());
        assert_eq!(cache.get_token().await.unwrap(), "old");

        let err = tokio_test::assert_err!(cache.get_token().await);
        assert!(matches!(err, RouterServiceError::TokenRefresh(_)));
        assert_eq!(cache.cached().unwrap().access_token, "old");
    }
}
