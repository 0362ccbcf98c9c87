//! 有状态服务层模块
//!
//! 该模块包含需要维护状态的服务：
//! - 锁服务（全局写闸门、按文档串行化）
//! - 内容寻址存储（附加资源去重写入）

pub mod content_store;
pub mod locks;

pub use content_store::*;
pub use locks::*;
