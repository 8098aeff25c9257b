// NasCompanion/src/api_client/service.rs

//! [`ApiClient`]：绑定到一台服务器的 REST 客户端。
//!
//! 两种认证方式：
//! - [`AuthMode::Basic`]：每个请求都携带用户名和密码。
//! - [`AuthMode::Bearer`]：使用缓存的访问令牌；令牌缺失时先用 Basic 认证生成一个。
//!   请求返回 401 时丢弃缓存的令牌，重新生成一次并重试一次，仍然 401 则返回
//!   [`AppError::InvalidCredentials`]。

use std::sync::Mutex;
use std::time::Duration;

use common_models::appliance::{NetworkInterface, Pool, SystemInfo, SystemInfoResponse};
use common_models::server::ServerRecord;
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::HttpSettings;
use crate::error::AppError;

/// 所有接口共享的路径前缀。
pub const API_PREFIX: &str = "/api/v2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Basic,
    Bearer,
}

pub struct ApiClient {
    http: Client,
    server: ServerRecord,
    api_base: String,
    mode: AuthMode,
    token_ttl_secs: u64,
    /// Bearer 模式下缓存的访问令牌
    token: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new(server: ServerRecord, settings: &HttpSettings, mode: AuthMode) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(AppError::Network)?;
        let api_base = format!("{}{}", server.base_url(), API_PREFIX);
        debug!("[API客户端] 为服务器 {} 创建客户端，认证方式 {:?}", server.host, mode);
        Ok(Self {
            http,
            server,
            api_base,
            mode,
            token_ttl_secs: settings.token_ttl_secs,
            token: Mutex::new(None),
        })
    }

    /// 预置一个已保存的令牌 (例如从服务器列表文件中读出)。
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.store_token(Some(token.into()));
        self
    }

    pub fn server(&self) -> &ServerRecord {
        &self.server
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// 当前缓存的令牌，调用方可据此把刷新后的令牌写回存储。
    pub fn cached_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|guard| guard.clone())
    }

    fn store_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.lock() {
            *guard = token;
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub async fn system_info(&self) -> Result<SystemInfo, AppError> {
        let raw: SystemInfoResponse = self.get_json("/system/info", "system info").await?;
        Ok(SystemInfo::from(raw))
    }

    pub async fn pools(&self) -> Result<Vec<Pool>, AppError> {
        self.get_json("/pool", "pools").await
    }

    pub async fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, AppError> {
        self.get_json("/interface", "network interfaces").await
    }

    /// 使用 Basic 认证申请一个有效期为 `ttl_secs` 秒的访问令牌。
    ///
    /// 接口可能直接返回带引号的 JSON 字符串，首尾的引号会被去掉。
    pub async fn generate_token(&self, ttl_secs: u64) -> Result<String, AppError> {
        let url = self.url("/auth/generate_token");
        info!("[API客户端] 正在向 {} 申请访问令牌 (ttl={}s)", self.server.host, ttl_secs);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.server.username, Some(&self.server.password))
            .json(&json!({ "ttl": ttl_secs }))
            .send()
            .await
            .map_err(AppError::Network)?;
        let response = check_status(response, "token").await?;
        let body = response.text().await.map_err(AppError::Network)?;
        let token = strip_quotes(body.trim());
        if token.is_empty() {
            return Err(AppError::Parse {
                context: "token".into(),
                message: "响应体为空".into(),
            });
        }
        Ok(token.to_string())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, context: &str) -> Result<T, AppError> {
        let url = self.url(path);
        debug!("[API客户端] GET {}", url);
        let response = match self.mode {
            AuthMode::Basic => {
                let request = self.http.get(&url).basic_auth(&self.server.username, Some(&self.server.password));
                send(request).await?
            }
            AuthMode::Bearer => self.get_with_bearer(&url).await?,
        };
        let response = check_status(response, context).await?;
        let body = response.text().await.map_err(AppError::Network)?;
        serde_json::from_str(&body).map_err(|e| {
            error!("[API客户端] 解析 {} 响应失败: {}", context, e);
            AppError::Parse {
                context: context.to_string(),
                message: e.to_string(),
            }
        })
    }

    async fn get_with_bearer(&self, url: &str) -> Result<Response, AppError> {
        let token = match self.cached_token() {
            Some(token) => token,
            None => self.refresh_token().await?,
        };
        let response = send(self.http.get(url).bearer_auth(&token)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("[API客户端] 令牌被拒绝，重新生成后重试一次。");
        self.store_token(None);
        let token = self.refresh_token().await?;
        send(self.http.get(url).bearer_auth(&token)).await
    }

    async fn refresh_token(&self) -> Result<String, AppError> {
        let token = self.generate_token(self.token_ttl_secs).await?;
        self.store_token(Some(token.clone()));
        Ok(token)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, AppError> {
    request.send().await.map_err(|e| {
        error!("[API客户端] 请求发送失败: {}", e);
        AppError::Network(e)
    })
}

async fn check_status(response: Response, context: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        warn!("[API客户端] 请求 {} 返回 401。", context);
        return Err(AppError::InvalidCredentials);
    }
    let body = response.text().await.unwrap_or_default();
    error!("[API客户端] 请求 {} 失败: 状态码={}, 响应={}", context, status, body);
    Err(AppError::Http {
        status: status.as_u16(),
        context: context.to_string(),
    })
}

fn strip_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}
