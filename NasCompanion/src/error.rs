// NasCompanion/src/error.rs

//! 应用层错误类型。
//!
//! REST 调用与本地存储的失败都以 [`AppError`] 的形式返回给命令层，
//! 由命令层决定是提示重新输入凭据 ([`AppError::InvalidCredentials`]) 还是直接显示错误信息。
//! 实时通道的错误另见 `realtime::RealtimeError`。

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// 设备返回 401，或令牌刷新后仍被拒绝。
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// 非 2xx 的 HTTP 响应。
    #[error("请求 {context} 失败，HTTP 状态码 {status}")]
    Http { status: u16, context: String },

    /// 请求没有得到任何 HTTP 响应 (DNS、连接、TLS、超时等)。
    #[error("网络错误: {0}")]
    Network(#[source] reqwest::Error),

    /// 响应体无法解码为预期结构。
    #[error("响应解析失败 ({context}): {message}")]
    Parse { context: String, message: String },

    #[error("存储错误: {0}")]
    Storage(String),

    /// 尚未添加或选中任何服务器。
    #[error("未选择服务器")]
    NoServerSelected,

    #[error("未找到服务器: {0}")]
    ServerNotFound(String),

    #[error(transparent)]
    Realtime(#[from] crate::realtime::RealtimeError),
}

impl AppError {
    /// 是否应提示用户重新输入凭据。
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::InvalidCredentials)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}
