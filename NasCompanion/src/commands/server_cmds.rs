// NasCompanion/src/commands/server_cmds.rs

//! 服务器列表管理：添加、列出、删除、选中。

use std::fmt::Write as _;

use common_models::server::{NewServer, ServerProtocol, ServerRecord};
use log::{info, warn};

use crate::api_client::{ApiClient, AuthMode};
use crate::error::AppError;
use crate::realtime::{Credentials, SessionKey};
use crate::state::AppState;

/// 添加服务器时的输入。
#[derive(Debug, Clone)]
pub struct AddServerRequest {
    pub protocol: ServerProtocol,
    pub host: String,
    pub username: String,
    pub password: String,
    /// 为 false 时不连接设备，版本记为 "Unknown"。
    pub probe: bool,
}

/// 添加服务器。默认先用给定凭据请求系统信息，以验证凭据并识别版本。
pub async fn add_server(state: &AppState, request: AddServerRequest) -> Result<String, AppError> {
    let mut new_server = NewServer {
        protocol: request.protocol,
        host: request.host,
        username: request.username,
        password: request.password,
        version: "Unknown".to_string(),
    };

    if request.probe {
        let candidate = ServerRecord::from_new(new_server.clone());
        info!("[服务器命令] 正在探测 {} 的版本...", candidate.base_url());
        let client = ApiClient::new(candidate, &state.config.http, AuthMode::Basic)?;
        new_server.version = client.system_info().await?.version;
    }

    let record = state.store.lock().await.add(new_server)?;
    let mut output = format!("已添加服务器 {} ({})，版本 {}", record.base_url(), record.id, record.version);
    if !record.is_supported() {
        warn!("[服务器命令] 版本 {} 不在受支持列表中。", record.version);
        output.push_str("\n警告: 该版本未经验证，部分数据可能无法显示。");
    }
    Ok(output)
}

pub async fn list_servers(state: &AppState) -> Result<String, AppError> {
    let store = state.store.lock().await;
    if store.list().is_empty() {
        return Ok("尚未添加任何服务器。".to_string());
    }
    let selected = store.selected().map(|server| server.id.clone());
    let mut output = String::new();
    for server in store.list() {
        let marker = if selected.as_deref() == Some(server.id.as_str()) { "*" } else { " " };
        let support = server.detected_pattern.as_deref().unwrap_or("unsupported");
        let _ = writeln!(
            output,
            "{} {:<36} {:<32} {:<12} {} [{}]",
            marker,
            server.id,
            server.base_url(),
            server.username,
            server.version,
            support
        );
    }
    Ok(output.trim_end().to_string())
}

pub async fn remove_server(state: &AppState, id: &str) -> Result<String, AppError> {
    let server = state.store.lock().await.get(id).cloned();
    let Some(server) = server else {
        return Err(AppError::ServerNotFound(id.to_string()));
    };
    // 先断开可能存在的实时会话
    let credentials = Credentials::password(&server.username, &server.password);
    state.registry.evict(&SessionKey::new(&server.base_url(), &credentials));
    state.store.lock().await.remove(id)?;
    Ok(format!("已删除服务器 {}", server.base_url()))
}

pub async fn select_server(state: &AppState, id: &str) -> Result<String, AppError> {
    let mut store = state.store.lock().await;
    store.select(id)?;
    let url = store.selected().map(ServerRecord::base_url).unwrap_or_default();
    Ok(format!("已选中服务器 {}", url))
}
