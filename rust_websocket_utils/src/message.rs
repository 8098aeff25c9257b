// rust_websocket_utils/src/message.rs

//! 实时通道的协议消息。
//!
//! 设备端中间件使用 DDP 风格的 JSON 协议，每条消息以 `msg` 字段区分类型。
//! 本模块负责两件事：
//! - 构造出站消息 ([`OutboundMessage`])：握手、登录、订阅、退订；
//! - 把一条入站原始消息解码为 [`InboundEvent`] ([`decode`])。
//!
//! 解码是纯函数：相同输入总得到相同输出，任何无法识别或格式错误的输入都解码为
//! [`InboundEvent::Unknown`]，绝不 panic。

use common_models::telemetry::{TelemetryFrame, REALTIME_TOPIC};
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WsError;

/// 握手时声明的协议版本。
pub const PROTOCOL_VERSION: &str = "1";

const LOGIN_METHOD: &str = "auth.login";
const LOGIN_WITH_TOKEN_METHOD: &str = "auth.login_with_token";

/// 生成请求 ID：`"{序号}-{毫秒时间戳}"`。序号由会话维护，严格递增。
pub fn message_id(sequence: u64, unix_millis: i64) -> String {
    format!("{}-{}", sequence, unix_millis)
}

/// 客户端发往中间件的消息。
///
/// 以 `msg` 作为内部标签序列化，例如
/// `{"msg":"sub","id":"3-1700000000000","name":"reporting.realtime"}`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// 连接握手 (协议版本协商)。
    Connect { version: String, support: Vec<String> },
    /// 方法调用，这里只用于登录。
    Method {
        id: String,
        method: String,
        params: Vec<String>,
    },
    /// 订阅某个主题。
    Sub { id: String, name: String },
    /// 退订；`id` 为订阅时返回的订阅 ID。
    Unsub { id: String },
}

impl OutboundMessage {
    pub fn handshake() -> Self {
        OutboundMessage::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: vec![PROTOCOL_VERSION.to_string()],
        }
    }

    pub fn login_password(id: String, username: &str, password: &str) -> Self {
        OutboundMessage::Method {
            id,
            method: LOGIN_METHOD.to_string(),
            params: vec![username.to_string(), password.to_string()],
        }
    }

    pub fn login_token(id: String, token: &str) -> Self {
        OutboundMessage::Method {
            id,
            method: LOGIN_WITH_TOKEN_METHOD.to_string(),
            params: vec![token.to_string()],
        }
    }

    /// 订阅实时遥测主题。
    pub fn subscribe(id: String) -> Self {
        OutboundMessage::Sub {
            id,
            name: REALTIME_TOPIC.to_string(),
        }
    }

    pub fn unsubscribe(subscription_id: String) -> Self {
        OutboundMessage::Unsub { id: subscription_id }
    }

    /// 请求 ID (握手消息没有 ID)。
    pub fn id(&self) -> Option<&str> {
        match self {
            OutboundMessage::Connect { .. } => None,
            OutboundMessage::Method { id, .. }
            | OutboundMessage::Sub { id, .. }
            | OutboundMessage::Unsub { id } => Some(id),
        }
    }

    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("出站消息序列化为JSON失败: {}", e)))
    }
}

/// 解码后的入站事件。
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// 握手已被确认。
    Connected,
    /// 方法调用结果；会话据此判断登录是否成功。
    AuthResult { id: Option<String>, success: bool },
    /// 订阅已就绪，携带订阅 ID。
    Subscribed { subscription_id: String },
    /// 服务端拒绝或终止了订阅 (`nosub`)，`id` 为订阅请求的 ID。
    SubscriptionRefused { id: Option<String>, reason: Option<String> },
    /// 一帧遥测数据。
    Data(Box<TelemetryFrame>),
    /// 无法识别或无需处理的消息，调用方直接忽略。
    Unknown,
}

// 入站消息里会用到的字段，其余字段忽略
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawInbound {
    msg: Option<String>,
    id: Option<Value>,
    result: Option<Value>,
    error: Option<Value>,
    subs: Option<Vec<Value>>,
    collection: Option<String>,
    fields: Option<Value>,
}

/// 把一条文本入站消息解码为 [`InboundEvent`]。
pub fn decode(text: &str) -> InboundEvent {
    let raw: RawInbound = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            trace!("[协议解码] 无法解析的入站消息 ({}): {:.120}", e, text);
            return InboundEvent::Unknown;
        }
    };

    match raw.msg.as_deref() {
        Some("connected") => InboundEvent::Connected,
        Some("result") => {
            let no_error = raw.error.as_ref().map_or(true, Value::is_null);
            let success = no_error && raw.result == Some(Value::Bool(true));
            InboundEvent::AuthResult {
                id: raw.id.as_ref().and_then(Value::as_str).map(str::to_string),
                success,
            }
        }
        Some("ready") => raw
            .subs
            .as_ref()
            .and_then(|subs| subs.first())
            .and_then(Value::as_str)
            .map(|sub| InboundEvent::Subscribed {
                subscription_id: sub.to_string(),
            })
            .unwrap_or(InboundEvent::Unknown),
        Some("nosub") => InboundEvent::SubscriptionRefused {
            id: raw.id.as_ref().and_then(Value::as_str).map(str::to_string),
            reason: raw.error.as_ref().and_then(error_reason),
        },
        Some("added") | Some("changed") if raw.collection.as_deref() == Some(REALTIME_TOPIC) => {
            match raw.fields.map(serde_json::from_value::<TelemetryFrame>) {
                Some(Ok(frame)) => InboundEvent::Data(Box::new(frame)),
                Some(Err(e)) => {
                    trace!("[协议解码] 遥测帧字段解码失败: {}", e);
                    InboundEvent::Unknown
                }
                None => InboundEvent::Unknown,
            }
        }
        _ => InboundEvent::Unknown,
    }
}

// 错误对象可能是字符串，也可能是带 reason / message 字段的对象
fn error_reason(error: &Value) -> Option<String> {
    match error {
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => ["reason", "message", "error"]
            .iter()
            .filter_map(|name| fields.get(*name))
            .find_map(|value| match value {
                Value::String(text) => Some(text.clone()),
                Value::Number(code) => Some(code.to_string()),
                _ => None,
            }),
        _ => None,
    }
}
