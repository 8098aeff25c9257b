//! `rust_websocket_utils` 提供实时通道所需的 WebSocket 传输与协议工具。
//!
//! 主要模块包括：
//! - `message`: 实时协议的出站消息构造与入站帧解码 (`decode`)。
//! - `error`: 库中使用的统一错误类型 `WsError`。
//! - `client`: 客户端连接与文本帧接收。
//! - `server`: 本地 WebSocket 服务端，主要供测试搭建模拟中间件使用。

pub mod client;
pub mod error;
pub mod message;
pub mod server;
