// NasCompanion/src/storage.rs

//! 已知服务器列表的本地存储 (`servers.json`)。
//!
//! 文件中保存服务器记录、当前选中的服务器以及各服务器的访问令牌。
//! 文件缺失或损坏时按空列表处理，不阻止程序启动。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use common_models::server::{NewServer, ServerRecord};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
struct StoreFile {
    servers: Vec<ServerRecord>,
    selected: Option<String>,
    /// Key: 服务器 ID；Value: 访问令牌
    tokens: HashMap<String, String>,
}

#[derive(Debug)]
pub struct ServerStore {
    path: PathBuf,
    data: StoreFile,
}

impl ServerStore {
    /// 读取服务器列表。文件不存在或无法解析时返回空列表 (损坏时记录警告)。
    pub fn load(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<StoreFile>(&content) {
                Ok(data) => {
                    debug!("[服务器存储] 从 {:?} 读取了 {} 台服务器。", path, data.servers.len());
                    data
                }
                Err(e) => {
                    warn!("[服务器存储] 解析 {:?} 失败 (错误: {})，按空列表处理。", path, e);
                    StoreFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[服务器存储] {:?} 不存在，按空列表处理。", path);
                StoreFile::default()
            }
            Err(e) => {
                warn!("[服务器存储] 读取 {:?} 失败 (错误: {})，按空列表处理。", path, e);
                StoreFile::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            data,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[ServerRecord] {
        &self.data.servers
    }

    pub fn get(&self, id: &str) -> Option<&ServerRecord> {
        self.data.servers.iter().find(|server| server.id == id)
    }

    /// 添加服务器并写盘，返回新记录。列表中的第一台服务器自动成为选中项。
    pub fn add(&mut self, new_server: NewServer) -> Result<ServerRecord, AppError> {
        let record = ServerRecord::from_new(new_server);
        info!("[服务器存储] 添加服务器 {} ({})", record.host, record.id);
        self.data.servers.push(record.clone());
        if self.data.selected.is_none() {
            self.data.selected = Some(record.id.clone());
        }
        self.save()?;
        Ok(record)
    }

    /// 删除服务器，同时清除它的选中状态和令牌。返回是否存在。
    pub fn remove(&mut self, id: &str) -> Result<bool, AppError> {
        let before = self.data.servers.len();
        self.data.servers.retain(|server| server.id != id);
        if self.data.servers.len() == before {
            return Ok(false);
        }
        if self.data.selected.as_deref() == Some(id) {
            self.data.selected = None;
        }
        self.data.tokens.remove(id);
        info!("[服务器存储] 删除服务器 {}", id);
        self.save()?;
        Ok(true)
    }

    pub fn select(&mut self, id: &str) -> Result<(), AppError> {
        if self.get(id).is_none() {
            return Err(AppError::ServerNotFound(id.to_string()));
        }
        self.data.selected = Some(id.to_string());
        self.save()
    }

    /// 当前选中的服务器；选中项已被删除时返回 `None`。
    pub fn selected(&self) -> Option<&ServerRecord> {
        self.data.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn set_token(&mut self, id: &str, token: impl Into<String>) -> Result<(), AppError> {
        if self.get(id).is_none() {
            return Err(AppError::ServerNotFound(id.to_string()));
        }
        self.data.tokens.insert(id.to_string(), token.into());
        self.save()
    }

    pub fn token(&self, id: &str) -> Option<&str> {
        self.data.tokens.get(id).map(String::as_str)
    }

    pub fn clear_token(&mut self, id: &str) -> Result<(), AppError> {
        if self.data.tokens.remove(id).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// 写盘。父目录不存在时自动创建。
    pub fn save(&self) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.data).map_err(|e| AppError::Storage(e.to_string()))?;
        fs::write(&self.path, content)?;
        debug!("[服务器存储] 已写入 {:?}", self.path);
        Ok(())
    }
}
