// rust_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 出站消息序列化失败。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 入站数据无法按预期解析 (例如二进制帧不是合法的 UTF-8)。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// WebSocket 协议相关的错误，例如握手失败、连接被重置。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 连接已关闭，无法继续收发。
    #[error("连接已关闭")]
    ConnectionClosed,

    #[error("无效的URL: {0}")]
    InvalidUrl(String),
}
