// common_models/src/telemetry.rs

//! 实时推送通道的遥测帧模型。
//!
//! 设备端通过实时订阅 (`reporting.realtime`) 周期性推送一帧统计数据，
//! 本模块把这一帧解码为强类型的 [`TelemetryFrame`]。每一帧都会整体替换上一帧，
//! 不做持久化。
//!
//! CPU 部分在设备端是一个以动态字符串为键的对象 (`"0"`, `"1"`, ..., `"average"`,
//! `"temperature_celsius"`)，这里显式建模为保持推送顺序的 [`CpuTable`]，
//! 并通过固定的排除规则区分"核心"与"元数据"。

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::numeric::{counter, optional_counter};

/// 实时订阅的主题名称 (集合名)。
pub const REALTIME_TOPIC: &str = "reporting.realtime";

/// CPU 表中表示全体核心平均值的键。
pub const CPU_AVERAGE_KEY: &str = "average";

/// CPU 表中属于元数据而非核心的键。
pub const CPU_METADATA_KEYS: [&str; 2] = ["temperature", "temperature_celsius"];

/// 一帧实时遥测数据。
///
/// 所有字段都带默认值：设备端只推送部分字段时仍能解码成功。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TelemetryFrame {
    /// 按核心标签组织的 CPU 利用率表。
    pub cpu: CpuTable,
    /// 内存分类占用。
    pub memory: MemoryStats,
    /// 网卡名称 → 累计字节计数器。
    pub interfaces: BTreeMap<String, InterfaceCounters>,
    /// 存储池/磁盘聚合计数器。
    pub disks: DiskAggregate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_memory: Option<VirtualMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zfs: Option<ZfsStats>,
}

/// 单个 CPU 核心 (或平均值条目) 的利用率字段，单位为百分比。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CpuCoreStats {
    pub user: f64,
    pub system: f64,
    pub idle: f64,
    pub nice: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
    /// 设备端直接给出的利用率；缺失时由 `100 - idle` 推算。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<f64>,
}

impl CpuCoreStats {
    /// 当前核心的利用率 (0 到 100)。
    pub fn utilization(&self) -> f64 {
        let raw = self.usage.unwrap_or(100.0 - self.idle);
        if raw.is_finite() {
            raw.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// 一个带标签的 CPU 核心条目。
#[derive(Debug, Clone, PartialEq)]
pub struct CpuCore {
    pub label: String,
    pub stats: CpuCoreStats,
}

/// 核心标签 → 指标 的有序映射。
///
/// 排除规则：
/// - `average` 单独存放在 [`CpuTable::average`]，不计入核心；
/// - `temperature` / `temperature_celsius` 是元数据，存放在 [`CpuTable::metadata`]；
/// - 值不是对象、或对象里既没有 `idle` 也没有 `usage` 的条目被跳过。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuTable {
    cores: Vec<CpuCore>,
    average: Option<CpuCoreStats>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl CpuTable {
    /// 按推送顺序排列的核心。
    pub fn cores(&self) -> &[CpuCore] {
        &self.cores
    }

    pub fn average(&self) -> Option<&CpuCoreStats> {
        self.average.as_ref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn core(&self, label: &str) -> Option<&CpuCoreStats> {
        self.cores.iter().find(|core| core.label == label).map(|core| &core.stats)
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty() && self.average.is_none()
    }

    /// 整机平均利用率：优先使用设备给出的 `average` 条目，否则对各核心取算术平均。
    pub fn average_utilization(&self) -> Option<f64> {
        if let Some(average) = &self.average {
            return Some(average.utilization());
        }
        if self.cores.is_empty() {
            return None;
        }
        let total: f64 = self.cores.iter().map(|core| core.stats.utilization()).sum();
        Some(total / self.cores.len() as f64)
    }

    /// 按排除规则归类一个原始条目。
    pub fn insert_raw(&mut self, label: String, value: serde_json::Value) {
        if CPU_METADATA_KEYS.contains(&label.as_str()) {
            self.metadata.insert(label, value);
            return;
        }
        let looks_like_core = value
            .as_object()
            .map(|fields| fields.contains_key("idle") || fields.contains_key("usage"))
            .unwrap_or(false);
        if !looks_like_core {
            return;
        }
        let Ok(stats) = serde_json::from_value::<CpuCoreStats>(value) else {
            return;
        };
        if label == CPU_AVERAGE_KEY {
            self.average = Some(stats);
        } else if let Some(existing) = self.cores.iter_mut().find(|core| core.label == label) {
            existing.stats = stats;
        } else {
            self.cores.push(CpuCore { label, stats });
        }
    }
}

impl Serialize for CpuTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.cores.len() + self.metadata.len() + usize::from(self.average.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for core in &self.cores {
            map.serialize_entry(&core.label, &core.stats)?;
        }
        if let Some(average) = &self.average {
            map.serialize_entry(CPU_AVERAGE_KEY, average)?;
        }
        for (key, value) in &self.metadata {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CpuTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CpuTableVisitor;

        impl<'de> Visitor<'de> for CpuTableVisitor {
            type Value = CpuTable;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("CPU 核心标签到利用率指标的映射")
            }

            fn visit_unit<E: de::Error>(self) -> Result<CpuTable, E> {
                Ok(CpuTable::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<CpuTable, E> {
                Ok(CpuTable::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<CpuTable, A::Error> {
                let mut table = CpuTable::default();
                while let Some((label, value)) = access.next_entry::<String, serde_json::Value>()? {
                    table.insert_raw(label, value);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_any(CpuTableVisitor)
    }
}

/// 内存分类占用 (字节)。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct MemoryStats {
    pub classes: MemoryClasses,
    /// 设备端附带的其他字段，原样保留。
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MemoryClasses {
    #[serde(default, deserialize_with = "optional_counter")]
    pub apps: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub arc: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub buffers: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub cache: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub page_tables: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub slab_cache: Option<u64>,
    #[serde(default, deserialize_with = "optional_counter")]
    pub unused: Option<u64>,
}

impl MemoryClasses {
    /// 已知分类的合计，缺失的分类不计。
    pub fn total(&self) -> u64 {
        [
            self.apps,
            self.arc,
            self.buffers,
            self.cache,
            self.page_tables,
            self.slab_cache,
            self.unused,
        ]
        .iter()
        .flatten()
        .fold(0u64, |sum, value| sum.saturating_add(*value))
    }
}

/// 单个网卡的累计字节计数器。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InterfaceCounters {
    #[serde(default, deserialize_with = "counter")]
    pub received_bytes: u64,
    #[serde(default, deserialize_with = "counter")]
    pub received_bytes_last: u64,
    #[serde(default, deserialize_with = "counter")]
    pub sent_bytes: u64,
    #[serde(default, deserialize_with = "counter")]
    pub sent_bytes_last: u64,
}

/// 存储池/磁盘聚合计数器。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct DiskAggregate {
    pub busy: Option<f64>,
    pub read_bytes: Option<f64>,
    pub write_bytes: Option<f64>,
    pub read_ops: Option<f64>,
    pub write_ops: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct VirtualMemory {
    #[serde(default, deserialize_with = "counter")]
    pub total: u64,
    #[serde(default, deserialize_with = "counter")]
    pub available: u64,
    #[serde(default)]
    pub percent: f64,
    #[serde(default, deserialize_with = "counter")]
    pub used: u64,
    #[serde(default, deserialize_with = "counter")]
    pub free: u64,
    #[serde(default, deserialize_with = "counter")]
    pub active: u64,
    #[serde(default, deserialize_with = "counter")]
    pub inactive: u64,
    #[serde(default, deserialize_with = "counter")]
    pub buffers: u64,
    #[serde(default, deserialize_with = "counter")]
    pub cached: u64,
    #[serde(default, deserialize_with = "counter")]
    pub shared: u64,
    #[serde(default, deserialize_with = "optional_counter")]
    pub wired: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ZfsStats {
    #[serde(default, deserialize_with = "counter")]
    pub arc_max_size: u64,
    #[serde(default, deserialize_with = "counter")]
    pub arc_size: u64,
    #[serde(default)]
    pub cache_hit_ratio: f64,
}
