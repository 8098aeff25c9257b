// NasCompanion/src/realtime/mod.rs

//! 实时统计通道。
//!
//! 每个 (服务器地址, 身份) 对应一条物理连接，由 [`session::RealtimeSession`] 驱动
//! 握手、登录、订阅流程，并把解码后的遥测帧分发给所有已注册的监听器。
//! [`registry::SessionRegistry`] 保证同一身份的多个消费者共享同一个会话。
//!
//! 监听器只会收到有效的遥测帧；连接状态 (包括登录被拒绝) 通过
//! `RealtimeSession::subscribe_status` 单独观察。

pub mod connector;
pub mod reconnect;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::time::Duration;

use rust_websocket_utils::message::OutboundMessage;
use thiserror::Error;
use url::Url;

pub use connector::{Connector, FrameChannel, WebSocketConnector};
pub use reconnect::{ReconnectPolicy, ReconnectTimer};
pub use registry::SessionRegistry;
pub use session::{FrameListener, ListenerRegistration, RealtimeSession};

/// 令牌身份在会话键中使用的占位用户名。
pub const TOKEN_IDENTITY: &str = "<token>";

/// 登录身份。凭据内容对会话而言是不透明的，只原样传给登录请求。
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    Token(String),
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// 会话键中的身份部分。
    pub fn identity(&self) -> &str {
        match self {
            Credentials::Password { username, .. } => username,
            Credentials::Token(_) => TOKEN_IDENTITY,
        }
    }

    pub(crate) fn login_message(&self, id: String) -> OutboundMessage {
        match self {
            Credentials::Password { username, password } => OutboundMessage::login_password(id, username, password),
            Credentials::Token(token) => OutboundMessage::login_token(id, token),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"***").finish(),
        }
    }
}

/// 注册表键：服务器基础地址 + 身份。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub base_url: String,
    pub identity: String,
}

impl SessionKey {
    pub fn new(base_url: &str, credentials: &Credentials) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            identity: credentials.identity().to_string(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base_url, self.identity)
    }
}

/// 登录被拒绝后的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFailurePolicy {
    /// 停止重连，等待新的监听器注册或显式断开。
    #[default]
    Stop,
    /// 与连接断开同样处理，按重连策略继续尝试。
    Retry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub reconnect: ReconnectPolicy,
    pub auth_failure: AuthFailurePolicy,
    /// 建立连接以及从连接建立到登录成功，各自允许的最长时间。
    pub handshake_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            auth_failure: AuthFailurePolicy::Stop,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Error, Debug)]
pub enum RealtimeError {
    /// 会话已被显式断开，不能再注册监听器。
    #[error("实时会话已关闭")]
    SessionClosed,

    #[error("无效的服务器地址: {0}")]
    InvalidUrl(String),

    /// 服务端拒绝了实时主题订阅。
    #[error("实时订阅被拒绝: {0}")]
    SubscriptionRefused(String),
}

/// 把 `http(s)://host` 形式的基础地址转换为实时通道地址 `ws(s)://host/websocket`。
pub fn websocket_url(base_url: &str) -> Result<String, RealtimeError> {
    let mut url = Url::parse(base_url.trim())
        .map_err(|e| RealtimeError::InvalidUrl(format!("{} ({})", base_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::InvalidUrl(format!(
                "不支持的协议 '{}' ({})",
                other, base_url
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidUrl(base_url.to_string()))?;
    let path = format!("{}/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_base_url_to_websocket_url() {
        assert_eq!(websocket_url("http://nas.local").unwrap(), "ws://nas.local/websocket");
        assert_eq!(websocket_url("https://10.0.0.2:8443/").unwrap(), "wss://10.0.0.2:8443/websocket");
        assert!(matches!(websocket_url("ftp://nas"), Err(RealtimeError::InvalidUrl(_))));
        assert!(matches!(websocket_url("nas.local"), Err(RealtimeError::InvalidUrl(_))));
    }

    #[test]
    fn token_identities_share_placeholder_and_secrets_are_redacted() {
        let token = Credentials::Token("abc123".into());
        let key = SessionKey::new("https://nas/", &token);
        assert_eq!(key.to_string(), "https://nas:<token>");
        assert!(!format!("{:?}", token).contains("abc123"));

        let password = Credentials::password("admin", "hunter2");
        assert_eq!(password.identity(), "admin");
        assert!(!format!("{:?}", password).contains("hunter2"));
        assert!(matches!(
            password.login_message("1-1".into()),
            OutboundMessage::Method { ref method, .. } if method == "auth.login"
        ));
    }
}
