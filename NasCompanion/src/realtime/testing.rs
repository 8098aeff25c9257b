// NasCompanion/src/realtime/testing.rs

//! 测试用的内存连接器：每次连接产生一个 [`MockPeer`]，测试代码扮演中间件。

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common_models::telemetry::REALTIME_TOPIC;
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::message::OutboundMessage;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use super::connector::{Connector, FrameChannel};

pub(crate) struct MockConnector {
    connects: AtomicUsize,
    refuse: AtomicUsize,
    closes: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connects: AtomicUsize::new(0),
            refuse: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            peers,
        });
        (connector, peers_rx)
    }

    /// 连接尝试次数 (包括被拒绝的)。
    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// 客户端主动关闭通道的次数。
    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// 让接下来的 `count` 次连接失败。
    pub(crate) fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn FrameChannel>, WsError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(WsError::IoError(io::Error::new(io::ErrorKind::ConnectionRefused, "连接被拒绝")));
        }

        let (to_peer, sent) = mpsc::unbounded_channel();
        let (push, from_peer) = mpsc::unbounded_channel();
        let _ = self.peers.send(MockPeer { sent, push: Some(push) });
        Ok(Box::new(MockChannel {
            to_peer,
            from_peer,
            closes: Arc::clone(&self.closes),
            closed: false,
        }))
    }
}

struct MockChannel {
    to_peer: mpsc::UnboundedSender<String>,
    from_peer: mpsc::UnboundedReceiver<String>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl FrameChannel for MockChannel {
    async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        if self.closed {
            return Err(WsError::ConnectionClosed);
        }
        self.to_peer.send(text).map_err(|_| WsError::ConnectionClosed)
    }

    async fn recv_text(&mut self) -> Option<Result<String, WsError>> {
        if self.closed {
            return None;
        }
        self.from_peer.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// 连接的服务端一侧。
pub(crate) struct MockPeer {
    sent: mpsc::UnboundedReceiver<String>,
    push: Option<mpsc::UnboundedSender<String>>,
}

impl MockPeer {
    /// 等待客户端发来的下一条消息。
    pub(crate) async fn expect(&mut self) -> OutboundMessage {
        let text = timeout(Duration::from_secs(30), self.sent.recv())
            .await
            .expect("等待客户端消息超时")
            .expect("客户端已释放连接");
        serde_json::from_str(&text).expect("客户端发送了无法解析的消息")
    }

    /// 断言短时间内客户端没有再发送消息。
    pub(crate) async fn expect_silence(&mut self) {
        if let Ok(Some(text)) = timeout(Duration::from_millis(200), self.sent.recv()).await {
            panic!("预期没有消息，实际收到: {}", text);
        }
    }

    pub(crate) fn push(&self, message: Value) {
        if let Some(push) = &self.push {
            let _ = push.send(message.to_string());
        }
    }

    /// 服务端关闭连接。
    pub(crate) fn hang_up(&mut self) {
        self.push = None;
    }

    /// 应答握手并接受登录，返回登录请求的 ID。
    pub(crate) async fn accept_login(&mut self) -> String {
        self.answer_login(true).await
    }

    pub(crate) async fn reject_login(&mut self) -> String {
        self.answer_login(false).await
    }

    async fn answer_login(&mut self, success: bool) -> String {
        assert_eq!(self.expect().await, OutboundMessage::handshake());
        self.push(json!({"msg": "connected", "session": "mock-session"}));
        match self.expect().await {
            OutboundMessage::Method { id, method, .. } => {
                assert!(method.starts_with("auth.login"), "预期登录请求，实际为 {}", method);
                self.push(json!({"msg": "result", "id": id, "result": success}));
                id
            }
            other => panic!("预期登录请求，实际为 {:?}", other),
        }
    }

    /// 确认订阅请求，返回订阅请求的 ID。
    pub(crate) async fn accept_subscribe(&mut self, subscription_id: &str) -> String {
        match self.expect().await {
            OutboundMessage::Sub { id, name } => {
                assert_eq!(name, REALTIME_TOPIC);
                self.push(json!({"msg": "ready", "subs": [subscription_id]}));
                id
            }
            other => panic!("预期订阅请求，实际为 {:?}", other),
        }
    }

    pub(crate) fn push_frame(&self, received_bytes: u64) {
        self.push(json!({
            "msg": "added",
            "collection": REALTIME_TOPIC,
            "fields": {
                "cpu": { "0": { "idle": 90.0 }, "average": { "idle": 90.0 } },
                "interfaces": { "eth0": { "received_bytes": received_bytes, "sent_bytes": 0 } }
            }
        }));
    }
}
