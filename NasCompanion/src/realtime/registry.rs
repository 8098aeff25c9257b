// NasCompanion/src/realtime/registry.rs

//! 会话注册表：同一 (服务器地址, 身份) 只对应一个实时会话。
//!
//! 注册表在启动时显式构造并注入给各个消费者，不使用全局单例。

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};

use super::connector::Connector;
use super::session::RealtimeSession;
use super::{websocket_url, Credentials, RealtimeConfig, RealtimeError, SessionKey};

pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    config: RealtimeConfig,
    /// Key: 会话键；Value: 共享的会话实例
    sessions: DashMap<SessionKey, Arc<RealtimeSession>>,
}

impl SessionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: RealtimeConfig) -> Self {
        Self {
            connector,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// 获取或创建会话。相同的键与凭据总是返回同一个实例。
    ///
    /// 已被显式断开的会话，以及凭据与本次传入不同的会话 (例如用户在登录被拒绝后
    /// 重新输入了密码)，会在这里被新会话替换；旧会话随之断开，其监听器需要在新会话上重新注册。
    pub fn get_or_create(
        &self,
        base_url: &str,
        credentials: &Credentials,
    ) -> Result<Arc<RealtimeSession>, RealtimeError> {
        let key = SessionKey::new(base_url, credentials);
        let ws_url = websocket_url(&key.base_url)?;

        // entry 持有分片写锁，检查与替换是原子的
        let mut entry = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(self.spawn_session(&key, credentials, &ws_url)));
        let stale_reason = if entry.value().is_closed() {
            Some("已关闭")
        } else if !entry.value().uses_credentials(credentials) {
            Some("凭据已变更")
        } else {
            None
        };
        if let Some(reason) = stale_reason {
            info!("[会话注册表] 会话 {} {}，创建新会话替换。", key, reason);
            let fresh = Arc::new(self.spawn_session(&key, credentials, &ws_url));
            let stale = std::mem::replace(entry.value_mut(), fresh);
            stale.disconnect();
        }
        Ok(Arc::clone(entry.value()))
    }

    fn spawn_session(&self, key: &SessionKey, credentials: &Credentials, ws_url: &str) -> RealtimeSession {
        debug!("[会话注册表] 为 {} 创建会话。", key);
        RealtimeSession::new(
            key.clone(),
            credentials.clone(),
            ws_url.to_string(),
            Arc::clone(&self.connector),
            self.config.clone(),
        )
    }

    pub fn get(&self, key: &SessionKey) -> Option<Arc<RealtimeSession>> {
        self.sessions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 移除并断开会话，返回是否存在。
    pub fn evict(&self, key: &SessionKey) -> bool {
        match self.sessions.remove(key) {
            Some((_, session)) => {
                info!("[会话注册表] 移除会话 {}", key);
                session.disconnect();
                true
            }
            None => false,
        }
    }

    /// 断开并移除所有会话 (应用退出时调用)。
    pub fn disconnect_all(&self) {
        let keys: Vec<SessionKey> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.evict(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
