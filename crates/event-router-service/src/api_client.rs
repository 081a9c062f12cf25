//! 出站 API 调用
//!
//! - `ExternalUrlResolver`: 按 API 名称和相对路径键拼接外部系统的绝对地址
//! - `ApiClient`: 附带 bearer token 的 reqwest 客户端，瞬时故障按指数退避重试

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use router_shared::config::{ApiDefinition, ExternalSystemsConfig};
use router_shared::error::RouterError;
use router_shared::retry::{RetryPolicy, retry_with_policy};
use serde::Serialize;
use tracing::debug;

use crate::credential::CredentialCache;
use crate::error::Result;

// ==================== URL 解析 ====================

/// 外部系统地址解析器
///
/// API 名称与相对路径键均不区分大小写。
#[derive(Debug, Clone, Default)]
pub struct ExternalUrlResolver {
    apis: HashMap<String, ApiDefinition>,
}

impl ExternalUrlResolver {
    pub fn new(config: &ExternalSystemsConfig) -> Self {
        let apis = config
            .api_definitions
            .iter()
            .map(|api| (api.name.to_lowercase(), api.clone()))
            .collect();
        Self { apis }
    }

    pub fn base_url(&self, api_name: &str) -> Option<&str> {
        self.apis
            .get(&api_name.to_lowercase())
            .map(|api| api.base_url.as_str())
    }

    /// 拼接绝对地址，基础地址与相对路径之间恰好保留一个 `/`
    pub fn absolute_url(&self, api_name: &str, relative_key: &str) -> Option<String> {
        let api = self.apis.get(&api_name.to_lowercase())?;
        let relative = api
            .relative_urls
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(relative_key))
            .map(|(_, path)| path)?;

        Some(format!(
            "{}/{}",
            api.base_url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        ))
    }
}

// ==================== API 客户端 ====================

/// 出站 API 客户端
///
/// 令牌在每次调用开始时获取一次。默认退避总时长（2s + 4s + 8s）小于令牌的安全余量，
/// 重试期间令牌不会过期。
pub struct ApiClient {
    http: reqwest::Client,
    credentials: Arc<CredentialCache>,
    urls: ExternalUrlResolver,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialCache>,
        urls: ExternalUrlResolver,
    ) -> Self {
        Self {
            http,
            credentials,
            urls,
            retry: RetryPolicy::http(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn urls(&self) -> &ExternalUrlResolver {
        &self.urls
    }

    pub async fn put_json<T>(&self, service: &str, url: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.send_json(Method::PUT, service, url, body).await
    }

    /// 发送 JSON 请求，非 2xx 视为失败
    pub async fn send_json<T>(&self, method: Method, service: &str, url: &str, body: &T) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let token = self.credentials.get_token().await?;
        let operation = format!("{service} {method} {url}");

        retry_with_policy(&self.retry, &operation, RouterError::is_retryable, || {
            let request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&token)
                .json(body);

            async move {
                let response = request.send().await.map_err(|e| RouterError::Http {
                    service: service.to_string(),
                    message: e.to_string(),
                })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(RouterError::HttpStatus {
                        service: service.to_string(),
                        status: status.as_u16(),
                    });
                }

                debug!(service, %status, "出站调用成功");
                Ok(())
            }
        })
        .await?;

        Ok(())
    }
}
