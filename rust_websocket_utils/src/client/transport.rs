// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层。
//!
//! 负责建立与中间件的连接 (ws 或 wss)，把流拆分为发送端与接收端，
//! 并提供逐条读取文本负载的辅助函数。协议层面的解析交给 `message::decode`。

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use log::{debug, error, info};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    tungstenite::error::ProtocolError,
    tungstenite::Error as TungsteniteError,
    WebSocketStream,
};
use url::Url;

use crate::error::WsError;
use crate::message::OutboundMessage;

/// 可能经过 TLS 加密的客户端 WebSocket 流。
pub type ClientWsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端连接。
pub struct ClientConnection {
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一条原始文本帧。
    pub async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        debug!("客户端：发送文本帧: {}", text);
        match self.ws_sender.send(Message::Text(text)).await {
            Ok(()) => Ok(()),
            Err(TungsteniteError::ConnectionClosed)
            | Err(TungsteniteError::AlreadyClosed)
            | Err(TungsteniteError::Protocol(ProtocolError::SendAfterClosing)) => Err(WsError::ConnectionClosed),
            Err(e) => Err(WsError::WebSocketProtocolError(e)),
        }
    }

    /// 序列化并发送一条协议消息。
    pub async fn send_message(&mut self, message: &OutboundMessage) -> Result<(), WsError> {
        let text = message.to_json()?;
        self.send_text(text).await
    }

    /// 读取下一条文本负载，语义同 [`receive_text`]。
    pub async fn next_text(&mut self) -> Option<Result<String, WsError>> {
        receive_text(&mut self.ws_receiver).await
    }

    /// 发送 Close 帧并关闭发送端。连接已断开时的错误被忽略。
    pub async fn close_gracefully(&mut self) {
        if let Err(e) = self.ws_sender.close().await {
            debug!("客户端：关闭连接时出错 (通常是连接已断开): {}", e);
        }
    }
}

/// 连接到指定的 WebSocket 服务器。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    info!("客户端：开始连接 WebSocket 服务器: {}", url_str);
    let parsed_url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    match parsed_url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(WsError::InvalidUrl(format!(
                "不支持的 WebSocket 协议 '{}' (URL: {})",
                other, url_str
            )))
        }
    }

    match connect_async(parsed_url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已连接到 {} (HTTP 状态码: {})", url_str, response.status());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 从接收流中读取下一条文本负载。
///
/// - `Some(Ok(text))`：收到文本帧，或可按 UTF-8 解释的二进制帧；
/// - `Some(Err(e))`：底层错误或非法二进制帧；
/// - `None`：收到 Close 帧或流已结束。
///
/// Ping/Pong 由 tokio-tungstenite 自动处理，这里直接跳过。
/// 函数只在 `next()` 处挂起，可以安全地放在 `tokio::select!` 中被取消。
pub async fn receive_text(
    ws_receiver: &mut SplitStream<ClientWsStream>,
) -> Option<Result<String, WsError>> {
    loop {
        match ws_receiver.next().await? {
            Ok(Message::Text(text)) => return Some(Ok(text)),
            Ok(Message::Binary(bytes)) => {
                return Some(String::from_utf8(bytes).map_err(|e| {
                    WsError::DeserializationError(format!("二进制帧不是合法的 UTF-8: {}", e))
                }))
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Close(close_frame)) => {
                debug!("客户端：收到 Close 帧: {:?}", close_frame);
                return None;
            }
            Err(TungsteniteError::ConnectionClosed) | Err(TungsteniteError::AlreadyClosed) => {
                debug!("客户端：连接已关闭。");
                return None;
            }
            Err(e) => {
                error!("客户端：接收消息时发生底层错误: {}", e);
                return Some(Err(WsError::WebSocketProtocolError(e)));
            }
        }
    }
}
