// NasCompanion/src/commands/data_cmds.rs

//! 通过 REST 接口拉取并展示设备数据：系统信息、存储池、网络接口，以及访问令牌的申请。
//!
//! 这些命令使用 Bearer 认证：优先使用已保存的令牌，令牌失效时自动刷新并写回服务器列表。

use std::fmt::Write as _;

use common_models::appliance::{NetworkInterface, Pool, SystemInfo};
use log::info;

use crate::api_client::AuthMode;
use crate::error::AppError;
use crate::format::{format_bytes, format_percent, format_uptime};
use crate::state::AppState;

pub async fn show_info(state: &AppState) -> Result<String, AppError> {
    let client = state.api_client(AuthMode::Bearer).await?;
    let result = client.system_info().await;
    state.remember_token(&client).await;
    Ok(render_system_info(&result?))
}

pub async fn show_pools(state: &AppState) -> Result<String, AppError> {
    let client = state.api_client(AuthMode::Bearer).await?;
    let result = client.pools().await;
    state.remember_token(&client).await;
    Ok(render_pools(&result?))
}

pub async fn show_interfaces(state: &AppState) -> Result<String, AppError> {
    let client = state.api_client(AuthMode::Bearer).await?;
    let result = client.network_interfaces().await;
    state.remember_token(&client).await;
    Ok(render_interfaces(&result?))
}

/// 申请新的访问令牌并保存，`ttl_secs` 为空时使用配置中的有效期。
pub async fn issue_token(state: &AppState, ttl_secs: Option<u64>) -> Result<String, AppError> {
    let client = state.api_client(AuthMode::Basic).await?;
    let ttl = ttl_secs.unwrap_or(state.config.http.token_ttl_secs);
    let token = client.generate_token(ttl).await?;
    state.store.lock().await.set_token(&client.server().id, token.clone())?;
    info!("[数据命令] 已为 {} 保存新的访问令牌 (ttl={}s)", client.server().host, ttl);
    Ok(format!("已保存新的访问令牌，有效期 {} 秒。", ttl))
}

pub fn render_system_info(info: &SystemInfo) -> String {
    let uptime = if info.uptime_seconds > 0.0 {
        format_uptime(info.uptime_seconds)
    } else {
        info.uptime.clone()
    };
    format!(
        "主机名:   {}\n版本:     {}\n平台:     {}\nCPU:      {}\n运行时长: {}",
        info.hostname, info.version, info.platform, info.cpu_model, uptime
    )
}

pub fn render_pools(pools: &[Pool]) -> String {
    if pools.is_empty() {
        return "没有存储池。".to_string();
    }
    let mut output = String::new();
    for pool in pools {
        let used = match (pool.allocated, pool.size) {
            (Some(allocated), Some(size)) => format!(
                "{} / {} ({})",
                format_bytes(allocated as f64, 1),
                format_bytes(size as f64, 1),
                pool.used_percent().map(format_percent).unwrap_or_default()
            ),
            _ => "容量未知".to_string(),
        };
        let health = if pool.healthy { "healthy" } else { "unhealthy" };
        let status = format!("{:?}", pool.status);
        let _ = writeln!(output, "{:<16} {:<9} {:<10} {}", pool.name, status, health, used);
        let disks = pool.disks();
        if !disks.is_empty() {
            let _ = writeln!(output, "    磁盘: {}", disks.join(", "));
        }
    }
    output.trim_end().to_string()
}

pub fn render_interfaces(interfaces: &[NetworkInterface]) -> String {
    if interfaces.is_empty() {
        return "没有网络接口。".to_string();
    }
    let mut output = String::new();
    for interface in interfaces {
        let link = if interface.is_link_up() { "UP" } else { "DOWN" };
        let addresses: Vec<String> = interface
            .aliases
            .iter()
            .map(|alias| match alias.netmask {
                Some(netmask) => format!("{}/{}", alias.address, netmask),
                None => alias.address.clone(),
            })
            .collect();
        let _ = writeln!(output, "{:<12} {:<5} {}", interface.name, link, addresses.join(", "));
    }
    output.trim_end().to_string()
}
