// rust_websocket_utils/src/server/transport.rs

//! 服务端 WebSocket 传输层：TCP 接受循环 + WebSocket 握手。

use log::{error, info};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

use crate::error::WsError;

pub type WsStream = WebSocketStream<TcpStream>;

pub struct ServerTransport;

impl ServerTransport {
    /// 绑定 `addr` 并开始接受连接，只在绑定失败时返回。
    pub async fn start<F, Fut>(addr: SocketAddr, on_connect: F) -> Result<(), WsError>
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&addr).await.map_err(WsError::IoError)?;
        info!("WebSocket 服务器正在监听地址: {}", addr);
        Self::serve(listener, on_connect).await;
        Ok(())
    }

    /// 在已绑定的监听器上运行接受循环。
    ///
    /// 测试中通常绑定 `127.0.0.1:0` 后把监听器交给这里，以便先拿到实际端口。
    /// 每个连接在独立任务中握手，握手成功后调用 `on_connect`。
    pub async fn serve<F, Fut>(listener: TcpListener, on_connect: F)
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ws_stream, peer_addr).await;
                            }
                            Err(e) => {
                                error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("接受 TCP 连接失败: {}。服务器将继续运行。", e);
                }
            }
        }
    }
}
