//! urlarchive 核心类型和模型
//!
//! 本 crate 提供各模块共享的核心数据结构，包括：
//! - 修订记录模型（全量快照 / 差异记录）
//! - 内容寻址资源模型
//! - 文档登记模型
//! - 持久化后端 trait

mod backend;
mod models;

pub use backend::*;
pub use models::*;
