//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了 NAS 伴侣应用各个 Rust 组件（`rust_websocket_utils` 传输层与协议解码、
//! `NasCompanion` 应用本体）之间共享的核心数据结构。
//!
//! 主要包含以下类型的模型：
//! - **实时遥测 (`telemetry`)**: 实时推送通道中每一帧的解码结果 (`TelemetryFrame`)，
//!   包括 CPU 核心表、内存分类、网卡字节计数器、磁盘聚合计数器等。
//! - **REST 数据 (`appliance`)**: 通过 REST 接口拉取的系统信息、存储池与网络接口。
//! - **服务器记录 (`server`)**: 本地保存的已知服务器条目以及受支持版本的识别逻辑。
//!
//! 设计原则：
//! - 所有模型都派生 `serde::Serialize` / `serde::Deserialize`、`Debug` 与 `Clone`。
//! - 远端是第三方接口，字段缺失或类型略有出入时尽量使用默认值而不是整体失败。

pub mod appliance;
pub mod server;
pub mod telemetry;

mod numeric; // 宽松的数值反序列化辅助函数 (整数/浮点数均可)
