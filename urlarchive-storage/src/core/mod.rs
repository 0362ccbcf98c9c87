//! 核心存储算法模块
//!
//! 该模块包含无状态的核心存储算法：
//! - 有符号变长整数编码
//! - 字节级差异（copy / skip / insert）
//! - 压缩闸门（Zstd + 最小收益阈值）
//! - 修订链策略（快照/差异决策与回放）

pub mod compression;
pub mod delta;
pub mod revision_chain;
pub mod varint;

pub use compression::*;
pub use delta::*;
pub use revision_chain::*;
pub use varint::*;
