// NasCompanion/src/realtime/connector.rs

//! 会话与传输层之间的接口。
//!
//! 会话只通过 [`Connector`] 打开连接、通过 [`FrameChannel`] 收发文本帧，
//! 生产环境使用 WebSocket 实现，测试中替换为内存通道。

use async_trait::async_trait;
use log::debug;
use rust_websocket_utils::client::transport::{connect_client, ClientConnection};
use rust_websocket_utils::error::WsError;

/// 一条已建立的双向文本通道。
#[async_trait]
pub trait FrameChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), WsError>;

    /// 下一条入站文本；`None` 表示通道已关闭。
    ///
    /// 实现必须是取消安全的：会话在 `tokio::select!` 中等待它。
    async fn recv_text(&mut self) -> Option<Result<String, WsError>>;

    /// 主动关闭通道。
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameChannel>, WsError>;
}

/// 基于 `rust_websocket_utils` 客户端的连接器。
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameChannel>, WsError> {
        let connection = connect_client(url).await?;
        Ok(Box::new(WebSocketChannel { connection }))
    }
}

struct WebSocketChannel {
    connection: ClientConnection,
}

#[async_trait]
impl FrameChannel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        self.connection.send_text(text).await
    }

    async fn recv_text(&mut self) -> Option<Result<String, WsError>> {
        self.connection.next_text().await
    }

    async fn close(&mut self) {
        debug!("[实时连接] 正在关闭 WebSocket 连接。");
        self.connection.close_gracefully().await;
    }
}
