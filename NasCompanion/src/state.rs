// NasCompanion/src/state.rs

//! 命令之间共享的应用状态。
//!
//! 启动流程构造一个 [`AppState`] 并以引用的方式交给各个命令。会话注册表在这里显式创建，
//! 测试可以注入自己的连接器。

use std::sync::Arc;

use common_models::server::ServerRecord;
use log::{debug, warn};
use tokio::sync::Mutex;

use crate::api_client::{ApiClient, AuthMode};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::realtime::{Connector, Credentials, RealtimeSession, SessionRegistry};
use crate::storage::ServerStore;

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<SessionRegistry>,
    pub store: Mutex<ServerStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: ServerStore, connector: Arc<dyn Connector>) -> Self {
        let registry = Arc::new(SessionRegistry::new(connector, config.realtime_config()));
        Self {
            config,
            registry,
            store: Mutex::new(store),
        }
    }

    /// 当前选中的服务器。
    pub async fn selected_server(&self) -> Result<ServerRecord, AppError> {
        let store = self.store.lock().await;
        store.selected().cloned().ok_or(AppError::NoServerSelected)
    }

    /// 为选中的服务器创建 REST 客户端；Bearer 模式下预置已保存的令牌。
    pub async fn api_client(&self, mode: AuthMode) -> Result<ApiClient, AppError> {
        let server = self.selected_server().await?;
        let saved_token = self.store.lock().await.token(&server.id).map(str::to_string);
        let client = ApiClient::new(server, &self.config.http, mode)?;
        Ok(match (mode, saved_token) {
            (AuthMode::Bearer, Some(token)) => client.with_token(token),
            _ => client,
        })
    }

    /// 把客户端当前缓存的令牌写回服务器列表 (令牌可能在请求过程中被刷新)。
    pub async fn remember_token(&self, client: &ApiClient) {
        let Some(token) = client.cached_token() else {
            return;
        };
        let mut store = self.store.lock().await;
        if store.token(&client.server().id) == Some(token.as_str()) {
            return;
        }
        if let Err(e) = store.set_token(&client.server().id, token) {
            warn!("[应用状态] 保存令牌失败: {}", e);
        }
    }

    /// 选中服务器的实时会话，同一服务器与用户总是共享同一个会话。
    pub async fn realtime_session(&self) -> Result<Arc<RealtimeSession>, AppError> {
        let server = self.selected_server().await?;
        let credentials = Credentials::password(&server.username, &server.password);
        debug!("[应用状态] 获取 {} 的实时会话", server.host);
        Ok(self.registry.get_or_create(&server.base_url(), &credentials)?)
    }

    /// 断开所有实时会话，程序退出前调用。
    pub fn shutdown(&self) {
        self.registry.disconnect_all();
    }
}
