//! urlarchive 存储层：带差异链的版本化内容存储与内容寻址资源存储
//!
//! 该 crate 提供：
//! - 字节级差异编解码（copy / skip / insert）
//! - 压缩闸门（收益不足时原样保存）
//! - 修订链策略（快照/差异决策、按时间点重建）
//! - 基于 Sled 的持久化后端
//! - 内容寻址的附加资源存储
//!
//! ## 架构设计
//!
//! ```text
//! urlarchive-storage/
//! |-- core/              # 无状态算法
//! |   |-- varint         # 有符号变长整数
//! |   |-- delta          # 差异生成与回放
//! |   |-- compression    # 压缩闸门
//! |   |-- revision_chain # 修订链策略
//! |-- services/          # 有状态服务
//! |   |-- locks          # 写闸门与文档锁
//! |   |-- content_store  # 内容寻址存储
//! |-- metadata           # Sled 后端
//! |-- storage            # 修订链存储引擎
//! ```

mod error;

pub mod core;
pub mod metadata;
pub mod services;
pub mod storage;

pub use error::{Result, StorageError};

pub use core::compression::{CompressionConfig, CompressionGate, GateOutput};
pub use core::delta::{Delta, DeltaOp, diff, patch};
pub use core::revision_chain::{Reconstruction, SnapshotReason};
pub use metadata::SledBackend;
pub use services::content_store::{ContentStore, StoredBlob, content_id};
pub use services::locks::{DocumentLocks, WriteGate};
pub use storage::{AppendMode, RevisionStore};

use serde::{Deserialize, Serialize};

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// 链段允许的差异数
    pub max_diffs: usize,
    /// 压缩与差异接受的最小收益比例
    pub min_gain: f64,
    /// Zstd 压缩等级
    pub compression_level: i32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_diffs: 20,
            min_gain: 0.80,
            compression_level: 19,
        }
    }
}

/// 常用类型
pub mod prelude {
    pub use crate::{
        AppendMode, ArchiveConfig, ContentStore, Reconstruction, Result, RevisionStore,
        SledBackend, StorageError, WriteGate,
    };
    pub use urlarchive_core::{AsOf, ContentBlob, ContentRecord, DocumentEntry, DocumentId};
}
