// NasCompanion/src/api_client/mod.rs

//! 设备 REST 接口客户端。
//!
//! 仪表盘中变化不频繁的数据 (系统信息、存储池、网络接口) 通过 REST 拉取，
//! 高频指标走实时通道 (见 `realtime` 模块)。
//!
//! - `service`: [`ApiClient`] 的实现，负责认证、请求发送与错误映射。

pub mod service;

pub use service::{ApiClient, AuthMode, API_PREFIX};
