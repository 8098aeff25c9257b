// NasCompanion/src/commands/mod.rs

//! 命令行子命令的实现。
//!
//! 每个命令接收共享的 [`crate::state::AppState`]，返回要输出给用户的文本或 [`crate::error::AppError`]。
//! 命令本身不直接打印，便于在测试中检查输出。

pub mod data_cmds;
pub mod server_cmds;
pub mod watch_cmds;
