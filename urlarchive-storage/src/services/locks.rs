//! 锁服务
//!
//! - `WriteGate`: 全局写闸门，同一时刻只允许一个写入进入持久化后端
//! - `DocumentLocks`: 按文档串行化 "读最新状态 → 编码 → 追加" 的完整流程

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use urlarchive_core::DocumentId;

/// 超过该数量时清理无人持有的文档锁
const PRUNE_THRESHOLD: usize = 1024;

/// 全局写闸门
///
/// 克隆后共享同一把锁，修订链引擎与内容寻址存储使用同一个实例
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    inner: Arc<Mutex<()>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取写权限，守卫释放时归还
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }
}

/// 文档锁表
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    locks: Arc<RwLock<HashMap<DocumentId, Arc<Mutex<()>>>>>,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指定文档的独占锁
    ///
    /// 不同文档互不阻塞，同一文档的调用按获取顺序串行执行
    pub async fn acquire(&self, document_id: DocumentId) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(&document_id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut locks = self.locks.write().await;
                if locks.len() >= PRUNE_THRESHOLD {
                    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                }
                locks.entry(document_id).or_default().clone()
            }
        };
        lock.lock_owned().await
    }

    /// 当前登记的文档锁数量
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }
}
