// NasCompanion/src/commands/watch_cmds.rs

//! `watch`：在终端中持续显示实时指标。
//!
//! 两个互相独立的视图注册到同一个实时会话上：
//! - [`SystemView`]：CPU 利用率与内存占用；
//! - [`NetworkView`]：各网卡收发速率，采样状态由视图自己持有。
//!
//! 两个视图共享同一条连接与同一个订阅，任意一个退出不影响另一个。

use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common_models::telemetry::TelemetryFrame;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::event::{SessionIssue, SessionPhase};
use crate::format::{format_bytes, format_bytes_per_second, format_percent};
use crate::rates::TrafficRateTracker;
use crate::realtime::{RealtimeError, RealtimeSession};
use crate::state::AppState;

/// 视图产生的一行输出。
#[derive(Debug, Clone, PartialEq)]
enum DashboardLine {
    System(String),
    Network(String),
}

/// CPU 与内存概览。
pub struct SystemView;

impl SystemView {
    pub fn render(frame: &TelemetryFrame) -> String {
        let cpu = frame
            .cpu
            .average_utilization()
            .map(format_percent)
            .unwrap_or_else(|| "n/a".to_string());
        let classes = &frame.memory.classes;
        let total = classes.total();
        if total == 0 {
            return format!("CPU {:>6} | 内存 n/a", cpu);
        }
        let used = total.saturating_sub(classes.unused.unwrap_or(0));
        format!(
            "CPU {:>6} | 内存 {} / {} (ARC {})",
            cpu,
            format_bytes(used as f64, 1),
            format_bytes(total as f64, 1),
            format_bytes(classes.arc.unwrap_or(0) as f64, 1)
        )
    }
}

/// 网卡速率视图。
#[derive(Default)]
pub struct NetworkView {
    tracker: TrafficRateTracker,
}

impl NetworkView {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第一帧只建立基线，返回 `None`。
    pub fn render(&mut self, frame: &TelemetryFrame, at: DateTime<Utc>) -> Option<String> {
        let rates = self.tracker.observe(frame, at);
        if rates.is_empty() {
            return None;
        }
        let parts: Vec<String> = rates
            .iter()
            .map(|(name, rate)| {
                format!(
                    "{} ↓{} ↑{}",
                    name,
                    format_bytes_per_second(rate.inbound, 1),
                    format_bytes_per_second(rate.outbound, 1)
                )
            })
            .collect();
        Some(format!("网络 {}", parts.join(" | ")))
    }
}

/// 显示选中服务器的实时指标，直到收到 Ctrl-C 或显示了 `frames` 帧。
pub async fn watch<W>(state: &AppState, frames: Option<usize>, out: W) -> Result<usize, AppError>
where
    W: FnMut(&str),
{
    let session = state.realtime_session().await?;
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("[实时仪表盘] 无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    run_dashboard(&session, frames, out, stop).await
}

/// 在给定会话上运行两个视图，返回显示的帧数。
///
/// 结束条件：`stop` 完成、达到 `frames` 帧、会话被关闭、登录被拒绝 (返回
/// [`AppError::InvalidCredentials`])，或订阅被服务端拒绝。返回前注销两个视图的监听器。
pub async fn run_dashboard<W, S>(
    session: &RealtimeSession,
    frames: Option<usize>,
    mut out: W,
    stop: S,
) -> Result<usize, AppError>
where
    W: FnMut(&str),
    S: Future<Output = ()>,
{
    let limit = frames.filter(|limit| *limit > 0);
    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel();
    // 先订阅状态再注册视图，注册后立即发生的状态变化不会被漏掉
    let mut status_rx = session.subscribe_status();

    let system_tx = lines_tx.clone();
    let system = session.register_listener(move |frame| {
        let _ = system_tx.send(DashboardLine::System(SystemView::render(frame)));
    })?;

    let network_view = Mutex::new(NetworkView::new());
    let network = session.register_listener(move |frame| {
        let line = match network_view.lock() {
            Ok(mut view) => view.render(frame, Utc::now()),
            Err(_) => None,
        };
        if let Some(line) = line {
            let _ = lines_tx.send(DashboardLine::Network(line));
        }
    })?;
    info!("[实时仪表盘] 已在会话 {} 上注册两个视图。", session.key());

    tokio::pin!(stop);
    let mut shown = 0usize;

    let result = loop {
        tokio::select! {
            _ = &mut stop => {
                info!("[实时仪表盘] 收到停止信号。");
                break Ok(shown);
            }
            line = lines_rx.recv() => match line {
                Some(DashboardLine::System(text)) => {
                    out(&text);
                    shown += 1;
                    if limit.is_some_and(|limit| shown >= limit) {
                        break Ok(shown);
                    }
                }
                Some(DashboardLine::Network(text)) => out(&text),
                // 会话断开时监听器被清空，发送端随之释放
                None => break Ok(shown),
            },
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break Ok(shown);
                }
                let status = status_rx.borrow_and_update().clone();
                match status.phase {
                    SessionPhase::AuthRejected => break Err(AppError::InvalidCredentials),
                    SessionPhase::Closed => break Ok(shown),
                    SessionPhase::Authenticated => {
                        if let Some(SessionIssue::SubscriptionRefused(reason)) = &status.last_issue {
                            break Err(RealtimeError::SubscriptionRefused(reason.clone()).into());
                        }
                    }
                    SessionPhase::Reconnecting => {
                        if let Some(issue) = &status.last_issue {
                            out(&format!("{}，正在重连 (第 {} 次)...", issue, status.reconnect_attempt));
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    system.unregister();
    network.unregister();
    result
}
