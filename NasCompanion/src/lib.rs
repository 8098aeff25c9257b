//! `NasCompanion` 存储设备伴侣应用核心逻辑。
//!
//! - `realtime`: 实时指标通道 (会话、重连、会话注册表)；
//! - `api_client`: REST 接口客户端；
//! - `storage`: 本地服务器列表；
//! - `rates` / `format`: 指标的派生计算与格式化；
//! - `commands`: 命令行子命令。

pub mod api_client;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod format;
pub mod rates;
pub mod realtime;
pub mod state;
pub mod storage;
