// NasCompanion/src/config.rs

//! 应用配置 (`app_settings.json`)。
//!
//! 启动时调用 [`load_or_create`]：文件不存在或内容损坏时使用默认配置，并把默认配置写回磁盘，
//! 方便用户在此基础上修改。配置以值的形式返回，由启动流程传给需要它的组件。

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::realtime::{AuthFailurePolicy, RealtimeConfig, ReconnectPolicy};

pub const CONFIG_FILE_NAME: &str = "app_settings.json";
const APP_DIR_NAME: &str = "nas-companion";
const SERVERS_FILE_NAME: &str = "servers.json";
/// 重连间隔下限，避免对拒绝连接的主机空转重连。
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// 实时通道相关配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// 固定重连间隔；启用指数退避时作为初始间隔 (毫秒)。
    pub reconnect_delay_ms: u64,
    pub exponential_backoff: bool,
    /// 指数退避的上限 (毫秒)。
    pub backoff_max_delay_ms: u64,
    /// 抖动比例，取值 0.0 ~ 1.0。
    pub backoff_jitter: f64,
    /// 从连接建立到登录成功的最长等待时间 (秒)。
    pub handshake_timeout_secs: u64,
    /// 登录被拒绝后是否继续重连。
    pub retry_on_auth_failure: bool,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            exponential_backoff: false,
            backoff_max_delay_ms: 60_000,
            backoff_jitter: 0.2,
            handshake_timeout_secs: 10,
            retry_on_auth_failure: false,
        }
    }
}

/// REST 客户端配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    /// 生成访问令牌时申请的有效期 (秒)。
    pub token_ttl_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            token_ttl_secs: 600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// 服务器列表文件；未设置时使用用户配置目录下的 `nas-companion/servers.json`。
    pub servers_file: Option<PathBuf>,
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub realtime: RealtimeSettings,
    pub http: HttpSettings,
    pub storage: StorageSettings,
}

impl AppConfig {
    /// 转换为实时会话使用的配置。
    pub fn realtime_config(&self) -> RealtimeConfig {
        let settings = &self.realtime;
        let delay_ms = settings.reconnect_delay_ms.max(MIN_RECONNECT_DELAY_MS);
        let base = Duration::from_millis(delay_ms);
        let reconnect = if settings.exponential_backoff {
            ReconnectPolicy::Exponential {
                base,
                max: Duration::from_millis(settings.backoff_max_delay_ms.max(delay_ms)),
                jitter: settings.backoff_jitter.clamp(0.0, 1.0),
            }
        } else {
            ReconnectPolicy::Fixed(base)
        };
        RealtimeConfig {
            reconnect,
            auth_failure: if settings.retry_on_auth_failure {
                AuthFailurePolicy::Retry
            } else {
                AuthFailurePolicy::Stop
            },
            handshake_timeout: Duration::from_secs(settings.handshake_timeout_secs.max(1)),
        }
    }

    /// 服务器列表文件的实际路径。
    pub fn servers_file(&self) -> PathBuf {
        self.storage
            .servers_file
            .clone()
            .unwrap_or_else(|| app_data_dir().join(SERVERS_FILE_NAME))
    }
}

/// 用户配置目录下的应用目录；无法获取时退回当前目录。
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// 默认配置文件路径。
pub fn default_config_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// 加载配置；文件缺失或损坏时返回默认配置并尝试写回。
pub fn load_or_create(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已从 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 从 {:?} 反序列化配置失败: {}。文件可能已损坏，将使用默认配置并覆盖。",
                    config_file_path, e
                );
                let default_config = AppConfig::default();
                save_config(&default_config, config_file_path);
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未能读取 {:?} (错误: {})，将使用默认配置并创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, config_file_path);
            default_config
        }
    }
}

/// 保存配置到文件；失败只记录警告。
pub fn save_config(config: &AppConfig, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("[配置模块] 创建配置目录 {:?} 失败: {}", parent, e);
                return;
            }
        }
    }

    match serde_json::to_string_pretty(config) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                warn!("[配置模块] 将配置写入文件 {:?} 失败: {}", path, e);
            } else {
                info!("[配置模块] 已将当前配置保存到 {:?}。", path);
            }
        }
        Err(e) => warn!("[配置模块] 序列化配置失败: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let config = load_or_create(&path);
        assert_eq!(config, AppConfig::default());
        assert!(path.exists(), "默认配置应被写回磁盘");

        let written: AppConfig = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.realtime.reconnect_delay_ms, 3_000);
    }

    #[test]
    fn corrupt_file_is_replaced_and_partial_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_or_create(&path), AppConfig::default());

        fs::write(&path, r#"{"realtime": {"exponential_backoff": true}, "http": {"token_ttl_secs": 60}}"#).unwrap();
        let config = load_or_create(&path);
        assert!(config.realtime.exponential_backoff);
        assert_eq!(config.realtime.handshake_timeout_secs, 10);
        assert_eq!(config.http.token_ttl_secs, 60);
        assert_eq!(config.http.timeout_secs, 15);
    }

    #[test]
    fn realtime_config_follows_settings() {
        let mut config = AppConfig::default();
        let realtime = config.realtime_config();
        assert_eq!(realtime.reconnect, ReconnectPolicy::Fixed(Duration::from_secs(3)));
        assert_eq!(realtime.auth_failure, AuthFailurePolicy::Stop);

        config.realtime.exponential_backoff = true;
        config.realtime.retry_on_auth_failure = true;
        config.realtime.backoff_jitter = 7.0;
        let realtime = config.realtime_config();
        assert_eq!(
            realtime.reconnect,
            ReconnectPolicy::Exponential {
                base: Duration::from_secs(3),
                max: Duration::from_secs(60),
                jitter: 1.0,
            }
        );
        assert_eq!(realtime.auth_failure, AuthFailurePolicy::Retry);
    }

    #[test]
    fn zero_reconnect_delay_is_raised_to_floor() {
        let mut config = AppConfig::default();
        config.realtime.reconnect_delay_ms = 0;
        assert_eq!(
            config.realtime_config().reconnect,
            ReconnectPolicy::Fixed(Duration::from_millis(MIN_RECONNECT_DELAY_MS))
        );

        config.realtime.exponential_backoff = true;
        config.realtime.backoff_max_delay_ms = 0;
        let floor = Duration::from_millis(MIN_RECONNECT_DELAY_MS);
        match config.realtime_config().reconnect {
            ReconnectPolicy::Exponential { base, max, .. } => {
                assert_eq!(base, floor);
                assert_eq!(max, floor);
            }
            other => panic!("预期指数退避，实际为 {:?}", other),
        }
    }
}
