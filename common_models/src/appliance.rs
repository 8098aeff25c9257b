// common_models/src/appliance.rs

//! 通过 REST 接口拉取的设备状态模型：系统信息、存储池、网络接口。
//!
//! 这些结构体描述的是第三方接口的返回值，只保留仪表盘需要的字段，
//! 其余字段在反序列化时被忽略。

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::numeric::{null_as_default, optional_counter};

/// `GET /system/info` 的原始返回，字段均可缺失。
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SystemInfoResponse {
    pub version: Option<String>,
    pub hostname: Option<String>,
    pub system_product: Option<String>,
    pub uptime: Option<String>,
    pub uptime_seconds: Option<f64>,
    pub cpu_model: Option<String>,
}

/// 仪表盘使用的系统信息。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SystemInfo {
    pub version: String,
    pub hostname: String,
    pub platform: String,
    pub uptime: String,
    pub uptime_seconds: f64,
    pub cpu_model: String,
}

impl From<SystemInfoResponse> for SystemInfo {
    fn from(raw: SystemInfoResponse) -> Self {
        let unknown = || "Unknown".to_string();
        Self {
            version: raw.version.filter(|v| !v.is_empty()).unwrap_or_else(unknown),
            hostname: raw.hostname.filter(|v| !v.is_empty()).unwrap_or_else(unknown),
            platform: raw
                .system_product
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "TrueNAS".to_string()),
            uptime: raw.uptime.filter(|v| !v.is_empty()).unwrap_or_else(unknown),
            uptime_seconds: raw.uptime_seconds.filter(|v| v.is_finite()).unwrap_or(0.0),
            cpu_model: raw.cpu_model.filter(|v| !v.is_empty()).unwrap_or_else(unknown),
        }
    }
}

/// 存储池健康状态。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolStatus {
    Online,
    Offline,
    Degraded,
    Faulted,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pool {
    pub id: i64,
    pub name: String,
    pub status: PoolStatus,
    #[serde(default, deserialize_with = "optional_counter")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub allocated: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub free: Option<u64>,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub scan: Option<PoolScan>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub topology: PoolTopology,
}

impl Pool {
    /// 已用容量占比 (0 到 100)；容量未知时返回 `None`。
    pub fn used_percent(&self) -> Option<f64> {
        match (self.size, self.allocated) {
            (Some(size), Some(allocated)) if size > 0 => {
                Some((allocated as f64 / size as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        }
    }

    /// 拓扑树中所有叶子磁盘的名称。
    pub fn disks(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for vdev in &self.topology.data {
            vdev.collect_disks(&mut names);
        }
        names
    }
}

/// 最近一次 scrub/resilver 的概况。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolScan {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub end_time: Option<MongoDate>,
    #[serde(default)]
    pub errors: u64,
}

impl PoolScan {
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.end_time
            .as_ref()
            .and_then(|end| Utc.timestamp_millis_opt(end.millis).single())
    }
}

/// 设备端以 `{"$date": 毫秒}` 形式返回的时间戳。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MongoDate {
    #[serde(rename = "$date")]
    pub millis: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PoolTopology {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<TopologyNode>,
}

/// vdev 拓扑树节点；叶子节点带有 `disk` 名称。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TopologyNode {
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub disk: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<TopologyNode>,
}

impl TopologyNode {
    fn collect_disks<'a>(&'a self, names: &mut Vec<&'a str>) {
        if let Some(disk) = self.disk.as_deref() {
            names.push(disk);
        }
        for child in &self.children {
            child.collect_disks(names);
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: InterfaceState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: Vec<InterfaceAlias>,
}

impl NetworkInterface {
    pub fn is_link_up(&self) -> bool {
        self.state.link_state.eq_ignore_ascii_case("LINK_STATE_UP")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InterfaceState {
    #[serde(default)]
    pub link_state: String,
    #[serde(default)]
    pub active_media_type: Option<String>,
    #[serde(default)]
    pub active_media_subtype: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InterfaceAlias {
    #[serde(rename = "type")]
    pub alias_type: String,
    pub address: String,
    #[serde(default)]
    pub netmask: Option<u32>,
    #[serde(default)]
    pub broadcast: Option<String>,
}
