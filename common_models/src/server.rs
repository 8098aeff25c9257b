// common_models/src/server.rs

//! 本地保存的已知服务器记录，以及受支持版本的识别。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 受支持的版本片段：服务器返回的版本字符串必须包含其中之一。
pub const SUPPORTED_VERSION_PATTERNS: [&str; 1] = ["24.10"];

/// 在版本字符串中查找受支持的版本片段，未匹配时返回 `None`。
pub fn detect_supported_version(version: &str) -> Option<&'static str> {
    SUPPORTED_VERSION_PATTERNS
        .iter()
        .copied()
        .find(|pattern| version.contains(pattern))
}

/// 访问服务器所使用的协议前缀。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerProtocol {
    #[serde(rename = "http://")]
    Http,
    #[default]
    #[serde(rename = "https://")]
    Https,
}

impl ServerProtocol {
    pub fn prefix(self) -> &'static str {
        match self {
            ServerProtocol::Http => "http://",
            ServerProtocol::Https => "https://",
        }
    }
}

/// 添加服务器时由用户填写 (以及探测得到) 的字段。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewServer {
    pub protocol: ServerProtocol,
    pub host: String,
    pub username: String,
    pub password: String,
    pub version: String,
}

/// 一条已知服务器记录。
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ServerRecord {
    pub id: String,
    pub protocol: ServerProtocol,
    pub host: String,
    pub username: String,
    pub password: String,
    /// 服务器实际返回的版本字符串。
    pub version: String,
    /// 匹配到的受支持版本片段；不受支持时为 `None`。
    pub detected_pattern: Option<String>,
}

impl ServerRecord {
    /// 从新条目创建记录：生成 UUID v4 作为 ID，并识别版本。
    pub fn from_new(new_server: NewServer) -> Self {
        let detected_pattern = detect_supported_version(&new_server.version).map(str::to_string);
        Self {
            id: Uuid::new_v4().to_string(),
            protocol: new_server.protocol,
            host: new_server.host.trim().trim_end_matches('/').to_string(),
            username: new_server.username,
            password: new_server.password,
            version: new_server.version,
            detected_pattern,
        }
    }

    /// 形如 `https://nas.local` 的基础 URL。
    pub fn base_url(&self) -> String {
        format!("{}{}", self.protocol.prefix(), self.host)
    }

    pub fn is_supported(&self) -> bool {
        self.detected_pattern.is_some()
    }
}

// 手写 Debug，避免把密码打进日志
impl std::fmt::Debug for ServerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRecord")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("version", &self.version)
            .field("detected_pattern", &self.detected_pattern)
            .finish()
    }
}
