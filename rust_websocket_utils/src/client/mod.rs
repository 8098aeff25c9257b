// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! `transport` 子模块负责建立连接 (ws/wss)、发送文本帧以及从接收流中读取文本负载。

pub mod transport;
