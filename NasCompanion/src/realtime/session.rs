// NasCompanion/src/realtime/session.rs

//! 实时会话：一条物理连接上的握手、登录、订阅状态机与遥测帧分发。
//!
//! 会话对象本身只持有监听器集合、状态广播与一个命令通道；连接、定时器以及所有协议状态
//! 都归后台驱动任务 (`SessionDriver`) 独占，驱动任务按顺序处理命令、入站消息与握手超时，
//! 因此协议状态不需要加锁。
//!
//! 阶段流转：
//! `Idle → Connecting → AwaitingAuth → Authenticated → Subscribed`，
//! 连接丢失进入 `Reconnecting`，登录被拒绝且策略为停止时进入 `AuthRejected`，
//! 显式断开进入终态 `Closed`。
//!
//! - 最后一个监听器注销时只退订，不断开连接，新的监听器可以直接重新订阅；
//! - 连接丢失后仅在仍有监听器时按重连策略重连，否则回到 `Idle`；
//! - 监听器在驱动任务中同步调用，单个监听器 panic 不影响其他监听器。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use common_models::telemetry::TelemetryFrame;
use log::{debug, error, info, trace, warn};
use rust_websocket_utils::error::WsError;
use rust_websocket_utils::message::{decode, message_id, InboundEvent, OutboundMessage};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};

use super::connector::{Connector, FrameChannel};
use super::reconnect::ReconnectTimer;
use super::{AuthFailurePolicy, Credentials, RealtimeConfig, RealtimeError, SessionKey};
use crate::event::{SessionIssue, SessionPhase, SessionStatus};

/// 遥测帧监听器。
pub type FrameListener = Arc<dyn Fn(&TelemetryFrame) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    entries: Vec<(u64, FrameListener)>,
}

/// 会话对象、注册句柄与驱动任务共享的部分。
struct SessionShared {
    listeners: Mutex<ListenerSet>,
    status: watch::Sender<SessionStatus>,
    closed: AtomicBool,
}

impl SessionShared {
    fn listeners(&self) -> MutexGuard<'_, ListenerSet> {
        // 监听器总是在锁外调用，这里只是容忍中毒
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn has_listeners(&self) -> bool {
        !self.listeners().entries.is_empty()
    }

    fn snapshot(&self) -> Vec<FrameListener> {
        self.listeners()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

#[derive(Debug)]
enum SessionCommand {
    ListenerAdded,
    ListenersEmptied,
    ReconnectDue { generation: u64 },
    Disconnect,
}

/// 一条逻辑实时连接。
///
/// 通常通过 [`super::SessionRegistry`] 获取。会话在第一个监听器注册时才开始连接；
/// 最后一个 `Arc` 被释放时等同于调用 [`RealtimeSession::disconnect`]。
pub struct RealtimeSession {
    key: SessionKey,
    credentials: Credentials,
    websocket_url: String,
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl RealtimeSession {
    /// 创建会话并启动驱动任务，必须在 tokio 运行时中调用。
    pub fn new(
        key: SessionKey,
        credentials: Credentials,
        websocket_url: String,
        connector: Arc<dyn Connector>,
        config: RealtimeConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SessionStatus::default());
        let shared = Arc::new(SessionShared {
            listeners: Mutex::new(ListenerSet::default()),
            status: status_tx,
            closed: AtomicBool::new(false),
        });

        let driver = SessionDriver {
            key: key.clone(),
            credentials: credentials.clone(),
            websocket_url: websocket_url.clone(),
            connector,
            config,
            shared: Arc::clone(&shared),
            commands_rx,
            timer_tx: commands_tx.clone(),
            channel: None,
            phase: SessionPhase::Idle,
            auth: AuthState::Unauthenticated,
            sequence: 0,
            pending_login: None,
            pending_subscribe: None,
            subscription_id: None,
            handshake_deadline: None,
            reconnect_attempt: 0,
            reconnect_timer: ReconnectTimer::new(),
            last_issue: None,
        };
        tokio::spawn(driver.run());
        info!("[实时会话] 已创建会话 {} ({})", key, websocket_url);

        Self {
            key,
            credentials,
            websocket_url,
            shared,
            commands: commands_tx,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn websocket_url(&self) -> &str {
        &self.websocket_url
    }

    /// 会话登录时使用的是否正是这组凭据。
    pub fn uses_credentials(&self, credentials: &Credentials) -> bool {
        self.credentials == *credentials
    }

    /// 注册一个遥测帧监听器。
    ///
    /// 会话空闲时触发连接；已登录但没有订阅时触发订阅。
    /// 返回的句柄被注销或释放时移除该监听器。
    pub fn register_listener<F>(&self, listener: F) -> Result<ListenerRegistration, RealtimeError>
    where
        F: Fn(&TelemetryFrame) + Send + Sync + 'static,
    {
        let id = {
            let mut set = self.shared.listeners();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(RealtimeError::SessionClosed);
            }
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(listener)));
            id
        };

        if self.commands.send(SessionCommand::ListenerAdded).is_err() {
            // 驱动任务已退出
            self.shared.listeners().entries.retain(|(entry_id, _)| *entry_id != id);
            self.shared.closed.store(true, Ordering::SeqCst);
            return Err(RealtimeError::SessionClosed);
        }
        debug!("[实时会话] {} 新增监听器 #{}", self.key, id);

        Ok(ListenerRegistration {
            id,
            shared: Arc::downgrade(&self.shared),
            commands: self.commands.clone(),
            active: true,
        })
    }

    /// 显式断开：取消重连、清空监听器、关闭连接，进入 `Closed`。可重复调用。
    pub fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("[实时会话] {} 正在断开。", self.key);
        self.shared.listeners().entries.clear();
        let _ = self.commands.send(SessionCommand::Disconnect);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners().entries.len()
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// 监听器注册句柄。调用 [`ListenerRegistration::unregister`] 或直接释放都会移除对应的监听器。
#[must_use = "释放注册句柄会立即注销监听器"]
pub struct ListenerRegistration {
    id: u64,
    shared: Weak<SessionShared>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    active: bool,
}

impl ListenerRegistration {
    pub fn unregister(mut self) {
        self.remove();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn remove(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let emptied = {
            let mut set = shared.listeners();
            let before = set.entries.len();
            set.entries.retain(|(entry_id, _)| *entry_id != self.id);
            before != set.entries.len() && set.entries.is_empty()
        };
        if emptied && !shared.closed.load(Ordering::SeqCst) {
            let _ = self.commands.send(SessionCommand::ListenersEmptied);
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
}

enum DriverEvent {
    Command(Option<SessionCommand>),
    Incoming(Option<Result<String, WsError>>),
    HandshakeTimeout,
}

struct SessionDriver {
    key: SessionKey,
    credentials: Credentials,
    websocket_url: String,
    connector: Arc<dyn Connector>,
    config: RealtimeConfig,
    shared: Arc<SessionShared>,
    commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    // 交给重连定时器回投命令
    timer_tx: mpsc::UnboundedSender<SessionCommand>,

    channel: Option<Box<dyn FrameChannel>>,
    phase: SessionPhase,
    auth: AuthState,
    /// 请求序号，整个会话生命周期内严格递增。
    sequence: u64,
    pending_login: Option<String>,
    pending_subscribe: Option<String>,
    /// 仅在已登录时存在。
    subscription_id: Option<String>,
    handshake_deadline: Option<Instant>,
    reconnect_attempt: u32,
    reconnect_timer: ReconnectTimer,
    last_issue: Option<SessionIssue>,
}

async fn next_incoming(channel: &mut Option<Box<dyn FrameChannel>>) -> Option<Result<String, WsError>> {
    match channel.as_mut() {
        Some(channel) => channel.recv_text().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionDriver {
    async fn run(mut self) {
        loop {
            let deadline = self.handshake_deadline;
            let event = tokio::select! {
                command = self.commands_rx.recv() => DriverEvent::Command(command),
                incoming = next_incoming(&mut self.channel) => DriverEvent::Incoming(incoming),
                _ = wait_deadline(deadline) => DriverEvent::HandshakeTimeout,
            };

            match event {
                DriverEvent::Command(Some(command)) => self.handle_command(command).await,
                DriverEvent::Command(None) => self.shutdown().await,
                DriverEvent::Incoming(Some(Ok(text))) => self.handle_text(&text).await,
                DriverEvent::Incoming(Some(Err(e))) => {
                    // 错误之后总会跟着关闭事件，由关闭事件驱动重连
                    debug!("[实时会话] {} 传输层错误: {}", self.key, e);
                }
                DriverEvent::Incoming(None) => {
                    self.transport_lost(SessionIssue::TransportLost("连接已关闭".to_string()));
                }
                DriverEvent::HandshakeTimeout => self.on_handshake_timeout().await,
            }

            if self.phase == SessionPhase::Closed {
                break;
            }
        }
        debug!("[实时会话] {} 驱动任务结束。", self.key);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ListenerAdded => self.on_listener_added().await,
            SessionCommand::ListenersEmptied => self.on_listeners_emptied().await,
            SessionCommand::ReconnectDue { generation } => self.on_reconnect_due(generation).await,
            SessionCommand::Disconnect => self.shutdown().await,
        }
    }

    async fn on_listener_added(&mut self) {
        if !self.shared.has_listeners() {
            return;
        }
        match self.phase {
            SessionPhase::Idle | SessionPhase::AuthRejected => self.open_transport().await,
            SessionPhase::Authenticated => self.subscribe().await,
            // 连接中或重连中：登录完成后会自动订阅
            _ => {}
        }
    }

    async fn on_listeners_emptied(&mut self) {
        if self.shared.has_listeners() {
            return;
        }
        // 订阅请求仍在途时，由订阅确认处理退订
        if self.subscription_id.is_some() {
            self.unsubscribe().await;
        }
    }

    async fn on_reconnect_due(&mut self, generation: u64) {
        if !self.reconnect_timer.accept(generation) {
            trace!("[实时会话] {} 忽略过期的重连触发。", self.key);
            return;
        }
        if self.phase != SessionPhase::Reconnecting {
            return;
        }
        if self.shared.has_listeners() {
            info!("[实时会话] {} 开始第 {} 次重连。", self.key, self.reconnect_attempt);
            self.open_transport().await;
        } else {
            debug!("[实时会话] {} 已无监听器，放弃重连。", self.key);
            self.set_phase(SessionPhase::Idle);
        }
    }

    async fn open_transport(&mut self) {
        self.reconnect_timer.cancel();
        self.reset_connection_state();
        self.set_phase(SessionPhase::Connecting);
        info!("[实时会话] {} 正在连接 {}", self.key, self.websocket_url);

        let connect = self.connector.connect(&self.websocket_url);
        let channel = match timeout(self.config.handshake_timeout, connect).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!("[实时会话] {} 连接失败: {}", self.key, e);
                self.transport_lost(SessionIssue::TransportLost(e.to_string()));
                return;
            }
            Err(_) => {
                warn!("[实时会话] {} 连接超时。", self.key);
                self.transport_lost(SessionIssue::HandshakeTimedOut);
                return;
            }
        };

        self.channel = Some(channel);
        self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);
        self.set_phase(SessionPhase::AwaitingAuth);
        self.send(OutboundMessage::handshake()).await;
    }

    /// 发送一条协议消息；发送失败按连接丢失处理。
    async fn send(&mut self, message: OutboundMessage) -> bool {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("[实时会话] {} {}", self.key, e);
                return false;
            }
        };
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        // 登录消息带有凭据，只记录 ID
        trace!("[实时会话] {} 发送消息 {:?}", self.key, message.id());
        match channel.send_text(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[实时会话] {} 发送失败: {}", self.key, e);
                self.transport_lost(SessionIssue::TransportLost(e.to_string()));
                false
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match decode(text) {
            InboundEvent::Connected => self.on_connected().await,
            InboundEvent::AuthResult { id, success } => self.on_auth_result(id, success).await,
            InboundEvent::Subscribed { subscription_id } => self.on_subscribed(subscription_id).await,
            InboundEvent::SubscriptionRefused { id, reason } => self.on_subscription_refused(id, reason),
            InboundEvent::Data(frame) => self.on_data(&frame),
            InboundEvent::Unknown => trace!("[实时会话] {} 忽略无法识别的消息。", self.key),
        }
    }

    async fn on_connected(&mut self) {
        if self.phase != SessionPhase::AwaitingAuth || self.auth != AuthState::Unauthenticated {
            debug!("[实时会话] {} 忽略非预期的握手确认。", self.key);
            return;
        }
        let id = self.next_message_id();
        self.pending_login = Some(id.clone());
        self.auth = AuthState::Authenticating;
        let login = self.credentials.login_message(id);
        self.send(login).await;
    }

    async fn on_auth_result(&mut self, id: Option<String>, success: bool) {
        if self.auth != AuthState::Authenticating || id.is_none() || id != self.pending_login {
            trace!("[实时会话] {} 忽略无关的方法结果 {:?}", self.key, id);
            return;
        }
        self.pending_login = None;

        if !success {
            self.on_auth_rejected().await;
            return;
        }

        info!("[实时会话] {} 登录成功。", self.key);
        self.auth = AuthState::Authenticated;
        self.handshake_deadline = None;
        self.reconnect_attempt = 0;
        self.last_issue = None;
        self.set_phase(SessionPhase::Authenticated);
        self.subscribe().await;
    }

    async fn on_auth_rejected(&mut self) {
        match self.config.auth_failure {
            AuthFailurePolicy::Retry => {
                warn!("[实时会话] {} 登录被拒绝，按重连策略重试。", self.key);
                self.close_channel().await;
                self.transport_lost(SessionIssue::AuthRejected);
            }
            AuthFailurePolicy::Stop => {
                warn!("[实时会话] {} 登录被拒绝，停止重连，等待新的凭据。", self.key);
                self.close_channel().await;
                self.reset_connection_state();
                self.reconnect_timer.cancel();
                self.last_issue = Some(SessionIssue::AuthRejected);
                self.set_phase(SessionPhase::AuthRejected);
            }
        }
    }

    async fn subscribe(&mut self) {
        if self.auth != AuthState::Authenticated
            || self.pending_subscribe.is_some()
            || self.subscription_id.is_some()
            || !self.shared.has_listeners()
        {
            return;
        }
        let id = self.next_message_id();
        debug!("[实时会话] {} 发起订阅 {}", self.key, id);
        self.pending_subscribe = Some(id.clone());
        self.send(OutboundMessage::subscribe(id)).await;
    }

    async fn on_subscribed(&mut self, subscription_id: String) {
        if self.pending_subscribe.take().is_none() {
            debug!("[实时会话] {} 忽略未请求的订阅确认 {}", self.key, subscription_id);
            return;
        }
        info!("[实时会话] {} 订阅就绪: {}", self.key, subscription_id);
        self.subscription_id = Some(subscription_id);
        self.last_issue = None;
        self.set_phase(SessionPhase::Subscribed);

        if !self.shared.has_listeners() {
            self.unsubscribe().await;
        }
    }

    /// 订阅被拒绝或被服务端终止：清除订阅状态并发布原因，不自动重试。
    /// 之后新注册的监听器会再次发起订阅。
    fn on_subscription_refused(&mut self, id: Option<String>, reason: Option<String>) {
        if id.is_none() {
            trace!("[实时会话] {} 忽略缺少 ID 的 nosub。", self.key);
            return;
        }
        if id == self.pending_subscribe {
            self.pending_subscribe = None;
        } else if id == self.subscription_id {
            self.subscription_id = None;
        } else {
            trace!("[实时会话] {} 忽略无关的 nosub {:?}", self.key, id);
            return;
        }
        let reason = reason.unwrap_or_else(|| "未说明原因".to_string());
        warn!("[实时会话] {} 订阅被拒绝: {}", self.key, reason);
        self.last_issue = Some(SessionIssue::SubscriptionRefused(reason));
        self.set_phase(SessionPhase::Authenticated);
    }

    async fn unsubscribe(&mut self) {
        let Some(subscription_id) = self.subscription_id.take() else {
            return;
        };
        info!("[实时会话] {} 已无监听器，退订 {} (保持连接)。", self.key, subscription_id);
        self.set_phase(SessionPhase::Authenticated);
        self.send(OutboundMessage::unsubscribe(subscription_id)).await;
    }

    fn on_data(&self, frame: &TelemetryFrame) {
        if self.subscription_id.is_none() && self.pending_subscribe.is_none() {
            trace!("[实时会话] {} 未订阅，丢弃遥测帧。", self.key);
            return;
        }
        // 先复制监听器列表再调用，监听器可以在回调中注销自己
        for listener in self.shared.snapshot() {
            let delivered = catch_unwind(AssertUnwindSafe(|| (listener.as_ref())(frame)));
            if delivered.is_err() {
                error!("[实时会话] {} 监听器处理遥测帧时 panic，已忽略。", self.key);
            }
        }
    }

    async fn on_handshake_timeout(&mut self) {
        warn!("[实时会话] {} 握手/登录超时。", self.key);
        self.close_channel().await;
        self.transport_lost(SessionIssue::HandshakeTimedOut);
    }

    /// 连接丢失 (或被视为丢失)：重置协议状态，有监听器时安排重连。
    fn transport_lost(&mut self, issue: SessionIssue) {
        self.channel = None;
        self.reset_connection_state();
        warn!("[实时会话] {} {}", self.key, issue);
        self.last_issue = Some(issue);

        if self.shared.has_listeners() {
            let delay = self.config.reconnect.delay_for(self.reconnect_attempt);
            self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
            let commands = self.timer_tx.clone();
            self.reconnect_timer.schedule(delay, move |generation| {
                let _ = commands.send(SessionCommand::ReconnectDue { generation });
            });
            info!("[实时会话] {} 将在 {:?} 后重连。", self.key, delay);
            self.set_phase(SessionPhase::Reconnecting);
        } else {
            self.reconnect_timer.cancel();
            self.set_phase(SessionPhase::Idle);
        }
    }

    async fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
    }

    fn reset_connection_state(&mut self) {
        self.auth = AuthState::Unauthenticated;
        self.pending_login = None;
        self.pending_subscribe = None;
        self.subscription_id = None;
        self.handshake_deadline = None;
    }

    async fn shutdown(&mut self) {
        self.reconnect_timer.cancel();
        self.close_channel().await;
        self.reset_connection_state();
        self.set_phase(SessionPhase::Closed);
        info!("[实时会话] {} 已关闭。", self.key);
    }

    fn next_message_id(&mut self) -> String {
        self.sequence += 1;
        message_id(self.sequence, Utc::now().timestamp_millis())
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!("[实时会话] {} 状态 {:?} -> {:?}", self.key, self.phase, phase);
        }
        self.phase = phase;
        self.shared.status.send_replace(SessionStatus {
            phase,
            last_issue: self.last_issue.clone(),
            reconnect_attempt: self.reconnect_attempt,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::reconnect::ReconnectPolicy;
    use crate::realtime::testing::{MockConnector, MockPeer};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const WAIT: Duration = Duration::from_secs(30);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn new_session(connector: Arc<MockConnector>, config: RealtimeConfig) -> RealtimeSession {
        let credentials = Credentials::password("admin", "secret");
        let key = SessionKey::new("http://nas.local", &credentials);
        RealtimeSession::new(key, credentials, "ws://nas.local/websocket".into(), connector, config)
    }

    fn counting_listener(
        session: &RealtimeSession,
    ) -> (ListenerRegistration, UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = session
            .register_listener(move |frame| {
                if let Some(counters) = frame.interfaces.get("eth0") {
                    let _ = tx.send(counters.received_bytes);
                }
            })
            .unwrap();
        (registration, rx)
    }

    async fn next_peer(peers: &mut UnboundedReceiver<MockPeer>) -> MockPeer {
        timeout(WAIT, peers.recv()).await.expect("等待连接超时").expect("连接器已关闭")
    }

    async fn next_frame(frames: &mut UnboundedReceiver<u64>) -> u64 {
        timeout(WAIT, frames.recv()).await.expect("等待遥测帧超时").expect("监听器已释放")
    }

    async fn wait_phase(session: &RealtimeSession, phase: SessionPhase) {
        let mut status = session.subscribe_status();
        timeout(WAIT, status.wait_for(|status| status.phase == phase))
            .await
            .expect("等待会话状态超时")
            .expect("状态通道已关闭");
    }

    #[tokio::test]
    async fn first_listener_drives_handshake_login_and_subscribe() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector.clone(), RealtimeConfig::default());
        assert_eq!(session.status().phase, SessionPhase::Idle);
        assert_eq!(connector.connect_count(), 0, "创建会话时不应连接");

        let (_registration, mut frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        peer.push_frame(1024);

        assert_eq!(next_frame(&mut frames).await, 1024);
        wait_phase(&session, SessionPhase::Subscribed).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn last_listener_leaving_unsubscribes_without_disconnecting() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector.clone(), RealtimeConfig::default());

        let (registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        wait_phase(&session, SessionPhase::Subscribed).await;

        registration.unregister();
        assert_eq!(peer.expect().await, OutboundMessage::unsubscribe("sub-1".into()));
        peer.expect_silence().await;
        wait_phase(&session, SessionPhase::Authenticated).await;
        assert_eq!(connector.close_count(), 0, "退订不应断开连接");

        let (_again, mut frames) = counting_listener(&session);
        peer.accept_subscribe("sub-2").await;
        peer.expect_silence().await;
        peer.push_frame(7);
        assert_eq!(next_frame(&mut frames).await, 7);
        assert_eq!(connector.connect_count(), 1, "重新订阅不应发起新连接");
        assert_eq!(connector.close_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_close_reconnects_after_fixed_delay_and_resumes_delivery() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector.clone(), RealtimeConfig::default());

        let (_registration, mut frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        peer.push_frame(1);
        assert_eq!(next_frame(&mut frames).await, 1);

        let lost_at = Instant::now();
        peer.hang_up();
        wait_phase(&session, SessionPhase::Reconnecting).await;
        assert!(matches!(session.status().last_issue, Some(SessionIssue::TransportLost(_))));

        let mut second = next_peer(&mut peers).await;
        assert!(lost_at.elapsed() >= Duration::from_secs(3), "应在固定延迟之后重连");
        second.accept_login().await;
        second.accept_subscribe("sub-9").await;
        second.push_frame(2);
        assert_eq!(next_frame(&mut frames).await, 2);

        // 每次断开只重连一次
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(connector.connect_count(), 2);
        assert!(peers.try_recv().is_err());
        assert_eq!(session.status().reconnect_attempt, 0);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_block_others() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector, RealtimeConfig::default());

        let _bad = session
            .register_listener(|_frame| panic!("监听器内部错误"))
            .unwrap();
        let (_good, mut frames) = counting_listener(&session);

        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        peer.push_frame(11);
        peer.push_frame(12);

        assert_eq!(next_frame(&mut frames).await, 11);
        assert_eq!(next_frame(&mut frames).await, 12);
        assert_eq!(session.listener_count(), 2);
    }

    #[tokio::test]
    async fn listener_removed_during_delivery_misses_only_later_frames() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector, RealtimeConfig::default());

        // 第一个监听器在收到帧时注销第二个
        let slot: Arc<Mutex<Option<ListenerRegistration>>> = Arc::new(Mutex::new(None));
        let remover_slot = Arc::clone(&slot);
        let _remover = session
            .register_listener(move |_frame| {
                if let Some(victim) = remover_slot.lock().unwrap().take() {
                    victim.unregister();
                }
            })
            .unwrap();
        let (victim, mut victim_frames) = counting_listener(&session);
        *slot.lock().unwrap() = Some(victim);
        let (_witness, mut witness_frames) = counting_listener(&session);

        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        peer.push_frame(1);
        peer.push_frame(2);

        // 本帧的监听器快照已经取出，被注销的监听器仍收到这一帧
        assert_eq!(next_frame(&mut victim_frames).await, 1);
        assert_eq!(next_frame(&mut witness_frames).await, 1);
        assert_eq!(next_frame(&mut witness_frames).await, 2);
        assert!(victim_frames.try_recv().is_err(), "注销后不应再收到后续帧");
        assert_eq!(session.listener_count(), 2);
    }

    #[tokio::test]
    async fn refused_subscription_is_reported_and_retried_by_next_listener() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector, RealtimeConfig::default());

        let (_first, mut frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        let OutboundMessage::Sub { id, .. } = peer.expect().await else {
            panic!("预期订阅请求");
        };
        peer.push(serde_json::json!({"msg": "nosub", "id": id, "error": {"reason": "denied"}}));

        let refused = SessionIssue::SubscriptionRefused("denied".into());
        let mut status = session.subscribe_status();
        timeout(WAIT, status.wait_for(|status| status.last_issue.as_ref() == Some(&refused)))
            .await
            .expect("等待订阅被拒绝超时")
            .expect("状态通道已关闭");
        assert_eq!(session.status().phase, SessionPhase::Authenticated);

        // 不自动重订阅，未订阅期间的帧被丢弃
        peer.push_frame(1);
        peer.expect_silence().await;

        let (_second, mut second_frames) = counting_listener(&session);
        peer.accept_subscribe("sub-2").await;
        peer.push_frame(2);
        assert_eq!(next_frame(&mut second_frames).await, 2);
        assert_eq!(next_frame(&mut frames).await, 2);
        wait_phase(&session, SessionPhase::Subscribed).await;
        assert_eq!(session.status().last_issue, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_stops_reconnecting_by_default() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector.clone(), RealtimeConfig::default());

        let (_registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.reject_login().await;

        wait_phase(&session, SessionPhase::AuthRejected).await;
        assert!(session.status().is_auth_rejected());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.connect_count(), 1, "凭据错误不应自动重连");
        assert_eq!(connector.close_count(), 1);

        // 新的监听器注册会重新尝试
        let (_again, mut frames) = counting_listener(&session);
        let mut retry = next_peer(&mut peers).await;
        retry.accept_login().await;
        retry.accept_subscribe("sub-1").await;
        retry.push_frame(5);
        assert_eq!(next_frame(&mut frames).await, 5);
        assert_eq!(session.status().last_issue, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_login_is_retried_when_configured() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let config = RealtimeConfig {
            auth_failure: AuthFailurePolicy::Retry,
            ..RealtimeConfig::default()
        };
        let session = new_session(connector.clone(), config);

        let (_registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.reject_login().await;
        wait_phase(&session, SessionPhase::Reconnecting).await;
        assert!(session.status().is_auth_rejected());

        let mut second = next_peer(&mut peers).await;
        second.accept_login().await;
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_hits_handshake_timeout() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let config = RealtimeConfig {
            handshake_timeout: Duration::from_secs(5),
            ..RealtimeConfig::default()
        };
        let session = new_session(connector.clone(), config);

        let (_registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        assert_eq!(peer.expect().await, OutboundMessage::handshake());
        // 不回应握手
        wait_phase(&session, SessionPhase::Reconnecting).await;
        assert_eq!(session.status().last_issue, Some(SessionIssue::HandshakeTimedOut));
        assert_eq!(connector.close_count(), 1);

        let mut second = next_peer(&mut peers).await;
        second.accept_login().await;
        second.accept_subscribe("sub-1").await;
        wait_phase(&session, SessionPhase::Subscribed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_is_retried_with_backoff() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        connector.refuse_next(2);
        let config = RealtimeConfig {
            reconnect: ReconnectPolicy::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(10),
                jitter: 0.0,
            },
            ..RealtimeConfig::default()
        };
        let session = new_session(connector.clone(), config);

        let started = Instant::now();
        let (_registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        // 第一次失败后等 1 秒，第二次失败后等 2 秒
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(connector.connect_count(), 3);
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        wait_phase(&session, SessionPhase::Subscribed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_without_listeners_goes_idle() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector.clone(), RealtimeConfig::default());

        let (registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        wait_phase(&session, SessionPhase::Subscribed).await;
        registration.unregister();
        assert_eq!(peer.expect().await, OutboundMessage::unsubscribe("sub-1".into()));

        peer.hang_up();
        wait_phase(&session, SessionPhase::Idle).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.connect_count(), 1, "没有监听器时不重连");
    }

    #[tokio::test]
    async fn subscribe_ack_after_listeners_left_is_unsubscribed() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector, RealtimeConfig::default());

        let (registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        let sub = peer.expect().await;
        assert!(matches!(sub, OutboundMessage::Sub { .. }));
        registration.unregister();
        peer.push(serde_json::json!({"msg": "ready", "subs": ["late-sub"]}));

        assert_eq!(peer.expect().await, OutboundMessage::unsubscribe("late-sub".into()));
        wait_phase(&session, SessionPhase::Authenticated).await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_terminal() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let session = new_session(connector.clone(), RealtimeConfig::default());

        let (registration, _frames) = counting_listener(&session);
        let mut peer = next_peer(&mut peers).await;
        peer.accept_login().await;
        peer.accept_subscribe("sub-1").await;
        wait_phase(&session, SessionPhase::Subscribed).await;

        session.disconnect();
        session.disconnect();
        wait_phase(&session, SessionPhase::Closed).await;
        assert!(session.is_closed());
        assert_eq!(session.listener_count(), 0);
        assert_eq!(connector.close_count(), 1);
        assert!(matches!(
            session.register_listener(|_frame| {}),
            Err(RealtimeError::SessionClosed)
        ));

        // 断开后释放旧句柄不会有任何副作用
        registration.unregister();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn message_ids_are_strictly_increasing_across_reconnects() {
        init_logger();
        let (connector, mut peers) = MockConnector::new();
        let config = RealtimeConfig {
            reconnect: ReconnectPolicy::Fixed(Duration::from_millis(10)),
            ..RealtimeConfig::default()
        };
        let session = new_session(connector, config);
        let (_registration, _frames) = counting_listener(&session);

        let mut sequences = Vec::new();
        for round in 0..2 {
            let mut peer = next_peer(&mut peers).await;
            sequences.push(peer.accept_login().await);
            sequences.push(peer.accept_subscribe(&format!("sub-{}", round)).await);
            wait_phase(&session, SessionPhase::Subscribed).await;
            peer.hang_up();
        }
        let numbers: Vec<u64> = sequences
            .iter()
            .map(|id| id.split('-').next().unwrap().parse().unwrap())
            .collect();
        assert!(numbers.windows(2).all(|pair| pair[0] < pair[1]), "序号应严格递增: {:?}", numbers);
    }
}
