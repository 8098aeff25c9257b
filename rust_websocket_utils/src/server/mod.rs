// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 提供一个最小的接受循环：每个完成握手的连接交给调用方的回调处理。
//! 集成测试用它模拟设备端的中间件。

pub mod transport;
