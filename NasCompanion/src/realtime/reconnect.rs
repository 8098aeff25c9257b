// NasCompanion/src/realtime/reconnect.rs

//! 重连策略与可取消的重连定时器。

use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 默认的固定重连间隔。
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

// 2^16 倍以后一定已经超过上限
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// 每次都等待相同时间。
    Fixed(Duration),
    /// `base * 2^attempt`，不超过 `max`；`jitter` (0.0 ~ 1.0) 为随机缩短的最大比例。
    Exponential { base: Duration, max: Duration, jitter: f64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// 第 `attempt` 次 (从 0 开始) 重连前的等待时间。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Exponential { base, max, jitter } => {
                let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
                let capped = base.saturating_mul(factor).min(*max);
                let jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
                if jitter > 0.0 {
                    let cut = rand::thread_rng().gen_range(0.0..=jitter);
                    capped.mul_f64(1.0 - cut)
                } else {
                    capped
                }
            }
        }
    }
}

/// 会话持有的重连定时器。
///
/// 每次 `schedule` 都会取消上一个定时器并分配新的代号；定时器触发时把代号交给回调，
/// 会话用 [`ReconnectTimer::accept`] 核对代号，过期的触发 (已被取消的定时器) 会被丢弃。
/// `cancel` 可以重复调用。
#[derive(Debug, Default)]
pub struct ReconnectTimer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl ReconnectTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&mut self, delay: Duration, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// 核对一次触发是否属于当前定时器；是则消费该定时器。
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            self.generation = self.generation.wrapping_add(1);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
