// NasCompanion/src/rates.rs

//! 由累计计数器计算瞬时速率。
//!
//! 设备端推送的网卡字节数是单调累计值，速率需要由相邻两次采样相减得到。
//! 采样状态归各个消费者自己持有 ([`TrafficRateTracker`])，不同界面互不影响。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common_models::telemetry::TelemetryFrame;
use serde::Serialize;

/// 一次计数器采样。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    pub count: u64,
    pub at: DateTime<Utc>,
}

impl CounterSample {
    pub fn new(count: u64, at: DateTime<Utc>) -> Self {
        Self { count, at }
    }
}

/// 每秒增量。
///
/// 以下情况返回 0：没有上一次采样、时间没有前进、计数器回退 (重置或回绕)。
pub fn compute_rate(previous: Option<CounterSample>, current: CounterSample) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let elapsed_micros = current.at.signed_duration_since(previous.at).num_microseconds();
    let elapsed_secs = match elapsed_micros {
        Some(micros) if micros > 0 => micros as f64 / 1_000_000.0,
        _ => return 0.0,
    };
    match current.count.checked_sub(previous.count) {
        Some(delta) => delta as f64 / elapsed_secs,
        None => 0.0,
    }
}

/// 单个网卡的收发速率 (字节/秒)。
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct TrafficRate {
    pub inbound: f64,
    pub outbound: f64,
}

#[derive(Debug, Clone, Copy)]
struct InterfaceSample {
    received: CounterSample,
    sent: CounterSample,
}

/// 按网卡名称保存上一次采样，逐帧计算速率。
#[derive(Debug, Default)]
pub struct TrafficRateTracker {
    previous: BTreeMap<String, InterfaceSample>,
}

impl TrafficRateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧并返回各网卡速率。第一次出现的网卡没有上一次采样，不产生条目；
    /// 从帧中消失的网卡会被遗忘。
    pub fn observe(&mut self, frame: &TelemetryFrame, at: DateTime<Utc>) -> BTreeMap<String, TrafficRate> {
        let mut rates = BTreeMap::new();
        let mut next = BTreeMap::new();

        for (name, counters) in &frame.interfaces {
            let sample = InterfaceSample {
                received: CounterSample::new(counters.received_bytes, at),
                sent: CounterSample::new(counters.sent_bytes, at),
            };
            if let Some(previous) = self.previous.get(name) {
                rates.insert(
                    name.clone(),
                    TrafficRate {
                        inbound: compute_rate(Some(previous.received), sample.received),
                        outbound: compute_rate(Some(previous.sent), sample.sent),
                    },
                );
            }
            next.insert(name.clone(), sample);
        }

        self.previous = next;
        rates
    }

    pub fn reset(&mut self) {
        self.previous.clear();
    }

    pub fn tracked_interfaces(&self) -> usize {
        self.previous.len()
    }
}
