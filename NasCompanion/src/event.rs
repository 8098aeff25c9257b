// NasCompanion/src/event.rs

//! 实时会话对外发布的连接状态。
//!
//! 监听器只接收遥测帧；需要区分"登录被拒绝"与"网络暂时中断"的消费者
//! 通过 `RealtimeSession::subscribe_status` 观察 [`SessionStatus`]。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 会话所处阶段。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// 未连接，且当前没有监听器需要连接。
    #[default]
    Idle,
    Connecting,
    /// 连接已建立，等待握手确认与登录结果。
    AwaitingAuth,
    /// 已登录，没有活动订阅。
    Authenticated,
    Subscribed,
    /// 连接丢失，等待重连定时器。
    Reconnecting,
    /// 登录被拒绝且策略为停止重连。
    AuthRejected,
    /// 已显式断开，终态。
    Closed,
}

/// 最近一次导致连接中断的原因。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SessionIssue {
    AuthRejected,
    TransportLost(String),
    HandshakeTimedOut,
    /// 服务端拒绝了实时订阅；连接仍保持登录状态。
    SubscriptionRefused(String),
}

impl fmt::Display for SessionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionIssue::AuthRejected => write!(f, "登录被拒绝"),
            SessionIssue::TransportLost(reason) => write!(f, "连接中断: {}", reason),
            SessionIssue::HandshakeTimedOut => write!(f, "握手超时"),
            SessionIssue::SubscriptionRefused(reason) => write!(f, "订阅被拒绝: {}", reason),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    /// 成功登录后清空。
    pub last_issue: Option<SessionIssue>,
    /// 自上次成功登录以来的重连次数。
    pub reconnect_attempt: u32,
}

impl SessionStatus {
    /// 最近一次登录是否被拒绝 (无论是否仍在重试)。
    pub fn is_auth_rejected(&self) -> bool {
        self.last_issue == Some(SessionIssue::AuthRejected)
    }
}
