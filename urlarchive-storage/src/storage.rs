//! 修订链存储引擎
//!
//! 负责单个文档的追加策略（快照/差异）与按时间点重建

use crate::ArchiveConfig;
use crate::core::compression::{CompressionConfig, CompressionGate};
use crate::core::revision_chain::{
    Reconstruction, RevisionChainConfig, RevisionChainManager, SnapshotReason,
};
use crate::error::{Result, StorageError};
use crate::services::locks::{DocumentLocks, WriteGate};
use std::sync::Arc;
use tracing::debug;
use urlarchive_core::{AsOf, ContentRecord, DocumentId, RevisionBackend, RevisionSummary};

/// 追加模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppendMode {
    /// 追加一条新记录
    #[default]
    Append,
    /// 替换最新的一条记录（修正最近一次抓取）
    ReplaceLatest,
}

/// 修订链存储引擎
pub struct RevisionStore<B> {
    backend: Arc<B>,
    chain: RevisionChainManager,
    gate: WriteGate,
    locks: DocumentLocks,
}

impl<B> Clone for RevisionStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            chain: self.chain.clone(),
            gate: self.gate.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<B> RevisionStore<B>
where
    B: RevisionBackend<Error = StorageError>,
{
    /// 创建存储引擎
    ///
    /// # 参数
    /// * `backend` - 持久化后端
    /// * `config` - 修订链与压缩配置
    /// * `gate` - 与其他写入方共享的写闸门
    pub fn new(backend: Arc<B>, config: &ArchiveConfig, gate: WriteGate) -> Self {
        let chain = RevisionChainManager::new(
            RevisionChainConfig {
                max_diffs: config.max_diffs,
                min_gain: config.min_gain,
            },
            CompressionGate::new(CompressionConfig {
                level: config.compression_level,
                min_gain: config.min_gain,
            }),
        );

        Self {
            backend,
            chain,
            gate,
            locks: DocumentLocks::new(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// 重建文档在 `as_of` 时刻的内容
    ///
    /// 文档在该时刻之前没有任何快照时返回 `None`
    pub async fn reconstruct(
        &self,
        document_id: DocumentId,
        as_of: AsOf,
    ) -> Result<Option<Reconstruction>> {
        let Some(anchor) = self.backend.latest_snapshot(document_id, as_of).await? else {
            return Ok(None);
        };

        let diffs = self
            .backend
            .diffs_after(document_id, anchor.timestamp, as_of)
            .await?;

        self.chain.replay(&anchor, &diffs).map(Some)
    }

    /// 追加一次抓取
    ///
    /// 同一文档的调用串行执行；每次调用恰好写入一条记录
    pub async fn append_revision(
        &self,
        document_id: DocumentId,
        content: &[u8],
        timestamp: i64,
        mode: AppendMode,
    ) -> Result<ContentRecord> {
        let _doc_guard = self.locks.acquire(document_id).await;

        let latest = self.backend.latest_record(document_id).await?;
        let replaced = match (mode, &latest) {
            (_, None) => None,
            (AppendMode::Append, Some(latest)) => {
                check_timestamp(document_id, timestamp, latest.timestamp, false)?;
                None
            }
            (AppendMode::ReplaceLatest, Some(latest)) => {
                check_timestamp(document_id, timestamp, latest.timestamp, true)?;
                Some(latest.timestamp)
            }
        };

        let prior = match replaced {
            // 替换时以被替换记录之前的状态为基准
            Some(old) => match old.checked_sub(1) {
                Some(before) => self.reconstruct(document_id, AsOf::At(before)).await?,
                None => None,
            },
            None => self.reconstruct(document_id, AsOf::Latest).await?,
        };

        let (encoded, reason) = self.chain.encode(prior.as_ref(), content)?;
        log_decision(document_id, timestamp, prior.as_ref(), reason);

        let record = ContentRecord {
            document_id,
            timestamp,
            is_diff: encoded.is_diff,
            is_compressed: encoded.is_compressed,
            payload: encoded.payload,
        };

        {
            let _write_guard = self.gate.acquire().await;
            match replaced {
                Some(old) => self.backend.replace_record(old, &record).await?,
                None => self.backend.insert_record(&record).await?,
            }
        }

        Ok(record)
    }

    /// 列出文档全部修订摘要
    pub async fn list_revisions(&self, document_id: DocumentId) -> Result<Vec<RevisionSummary>> {
        self.backend.list_records(document_id).await
    }

    /// 删除文档的整条修订链
    pub async fn delete_chain(&self, document_id: DocumentId) -> Result<usize> {
        let _doc_guard = self.locks.acquire(document_id).await;
        let _write_guard = self.gate.acquire().await;
        self.backend.delete_records(document_id).await
    }
}

fn check_timestamp(
    document_id: DocumentId,
    timestamp: i64,
    latest: i64,
    allow_equal: bool,
) -> Result<()> {
    if timestamp == latest && !allow_equal {
        return Err(StorageError::DuplicateTimestamp {
            document_id,
            timestamp,
        });
    }
    if timestamp < latest {
        return Err(StorageError::StaleTimestamp {
            document_id,
            timestamp,
            latest,
        });
    }
    Ok(())
}

fn log_decision(
    document_id: DocumentId,
    timestamp: i64,
    prior: Option<&Reconstruction>,
    reason: Option<SnapshotReason>,
) {
    let diff_count = prior.map(|p| p.diff_count).unwrap_or_default();
    match reason {
        None => debug!(
            "保存差异: document={}, timestamp={}, chain={}",
            document_id,
            timestamp,
            diff_count + 1
        ),
        Some(reason) => debug!(
            "保存快照: document={}, timestamp={}, reason={:?}, chain={}",
            document_id, timestamp, reason, diff_count
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SledBackend;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn create_store() -> (RevisionStore<SledBackend>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path().join("revisions.db")).unwrap();
        let store = RevisionStore::new(
            Arc::new(backend),
            &ArchiveConfig::default(),
            WriteGate::new(),
        );
        (store, temp_dir)
    }

    fn page(edits: usize) -> Vec<u8> {
        let mut body = String::from("<html><head><title>archive</title></head><body>");
        body.push_str(&"<p>stable paragraph of text</p>".repeat(8));
        body.push_str(&"x".repeat(edits));
        body.push_str("</body></html>");
        body.into_bytes()
    }

    #[tokio::test]
    async fn test_scenario_a_snapshot_then_diff() {
        let (store, _temp) = create_store();

        let first = store
            .append_revision(1, b"<html>A</html>", 0, AppendMode::Append)
            .await
            .unwrap();
        assert!(!first.is_diff);

        let second = store
            .append_revision(1, b"<html>AB</html>", 1, AppendMode::Append)
            .await
            .unwrap();
        assert!(second.is_diff);

        let latest = store.reconstruct(1, AsOf::Latest).await.unwrap().unwrap();
        assert_eq!(latest.content, b"<html>AB</html>");
        assert_eq!(latest.diff_count, 1);
    }

    #[tokio::test]
    async fn test_scenario_b_chain_bound() {
        let (store, _temp) = create_store();

        let base = store
            .append_revision(1, &page(0), 0, AppendMode::Append)
            .await
            .unwrap();
        assert!(!base.is_diff);

        for t in 1..=21 {
            let record = store
                .append_revision(1, &page(t), t as i64, AppendMode::Append)
                .await
                .unwrap();
            assert!(record.is_diff, "t={} 应保存为差异", t);
        }

        let record = store
            .append_revision(1, &page(22), 22, AppendMode::Append)
            .await
            .unwrap();
        assert!(!record.is_diff);

        // 快照之后链段重新计数
        let record = store
            .append_revision(1, &page(23), 23, AppendMode::Append)
            .await
            .unwrap();
        assert!(record.is_diff);
        let latest = store.reconstruct(1, AsOf::Latest).await.unwrap().unwrap();
        assert_eq!(latest.diff_count, 1);
        assert_eq!(latest.anchor_timestamp, 22);
    }

    #[tokio::test]
    async fn test_point_in_time_reconstruction() {
        let (store, _temp) = create_store();
        let versions: Vec<Vec<u8>> = (0..30).map(page).collect();

        for (t, content) in versions.iter().enumerate() {
            store
                .append_revision(4, content, (t as i64) * 10, AppendMode::Append)
                .await
                .unwrap();
        }

        for (t, content) in versions.iter().enumerate() {
            let at = store
                .reconstruct(4, AsOf::At((t as i64) * 10))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&at.content, content);

            // 两次抓取之间的时刻返回较早的版本
            let between = store
                .reconstruct(4, AsOf::At((t as i64) * 10 + 5))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&between.content, content);
        }

        assert!(store.reconstruct(4, AsOf::At(-1)).await.unwrap().is_none());
        assert!(store.reconstruct(5, AsOf::Latest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unrelated_content_resets_chain() {
        let (store, _temp) = create_store();
        store
            .append_revision(1, &page(0), 0, AppendMode::Append)
            .await
            .unwrap();
        store
            .append_revision(1, &page(1), 1, AppendMode::Append)
            .await
            .unwrap();

        let record = store
            .append_revision(1, b"0123456789abcdef", 2, AppendMode::Append)
            .await
            .unwrap();
        assert!(!record.is_diff);

        let latest = store.reconstruct(1, AsOf::Latest).await.unwrap().unwrap();
        assert_eq!(latest.content, b"0123456789abcdef");
        assert_eq!(latest.diff_count, 0);
    }

    #[tokio::test]
    async fn test_large_snapshot_is_compressed() {
        let (store, _temp) = create_store();
        let content = "<tr><td>row</td></tr>".repeat(500);

        let record = store
            .append_revision(1, content.as_bytes(), 0, AppendMode::Append)
            .await
            .unwrap();
        assert!(record.is_compressed);
        assert!(record.payload.len() < content.len());

        let latest = store.reconstruct(1, AsOf::Latest).await.unwrap().unwrap();
        assert_eq!(latest.content, content.as_bytes());
    }

    #[tokio::test]
    async fn test_timestamp_tiebreak() {
        let (store, _temp) = create_store();
        store
            .append_revision(1, b"one", 10, AppendMode::Append)
            .await
            .unwrap();

        let err = store
            .append_revision(1, b"two", 10, AppendMode::Append)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTimestamp { timestamp: 10, .. }));

        let err = store
            .append_revision(1, b"two", 5, AppendMode::Append)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::StaleTimestamp { latest: 10, .. }));

        assert_eq!(store.list_revisions(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_latest() {
        let (store, _temp) = create_store();
        store
            .append_revision(1, &page(0), 0, AppendMode::Append)
            .await
            .unwrap();
        store
            .append_revision(1, &page(1), 1, AppendMode::Append)
            .await
            .unwrap();

        let record = store
            .append_revision(1, &page(2), 1, AppendMode::ReplaceLatest)
            .await
            .unwrap();
        assert!(record.is_diff);

        let revisions = store.list_revisions(1).await.unwrap();
        assert_eq!(revisions.len(), 2);

        let latest = store.reconstruct(1, AsOf::Latest).await.unwrap().unwrap();
        assert_eq!(latest.content, page(2));
        assert_eq!(latest.diff_count, 1);

        let err = store
            .append_revision(1, &page(3), 0, AppendMode::ReplaceLatest)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::StaleTimestamp { .. }));
    }

    #[tokio::test]
    async fn test_replace_only_record_becomes_snapshot() {
        let (store, _temp) = create_store();
        store
            .append_revision(1, b"first", 3, AppendMode::Append)
            .await
            .unwrap();

        let record = store
            .append_revision(1, b"second", 4, AppendMode::ReplaceLatest)
            .await
            .unwrap();
        assert!(!record.is_diff);

        let revisions = store.list_revisions(1).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].timestamp, 4);
    }

    #[tokio::test]
    async fn test_delete_chain() {
        let (store, _temp) = create_store();
        for t in 0..3 {
            store
                .append_revision(1, &page(t), t as i64, AppendMode::Append)
                .await
                .unwrap();
        }
        store
            .append_revision(2, b"other", 0, AppendMode::Append)
            .await
            .unwrap();

        assert_eq!(store.delete_chain(1).await.unwrap(), 3);
        assert!(store.reconstruct(1, AsOf::Latest).await.unwrap().is_none());
        assert!(store.reconstruct(2, AsOf::Latest).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_documents() {
        let (store, _temp) = create_store();

        let tasks: Vec<_> = (1..=5u64)
            .map(|doc| {
                let store = store.clone();
                tokio::spawn(async move {
                    for t in 0..10 {
                        store
                            .append_revision(doc, &page(t + doc as usize), t as i64, AppendMode::Append)
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }

        for doc in 1..=5u64 {
            let latest = store.reconstruct(doc, AsOf::Latest).await.unwrap().unwrap();
            assert_eq!(latest.content, page(9 + doc as usize));
            assert_eq!(store.list_revisions(doc).await.unwrap().len(), 10);
        }
    }

    #[tokio::test]
    async fn test_corrupt_diff_is_integrity_error() {
        let (store, _temp) = create_store();
        store
            .append_revision(1, b"base content", 0, AppendMode::Append)
            .await
            .unwrap();

        store
            .backend()
            .insert_record(&ContentRecord {
                document_id: 1,
                timestamp: 1,
                is_diff: true,
                is_compressed: false,
                payload: vec![0x02, 0xff],
            })
            .await
            .unwrap();

        let err = store.reconstruct(1, AsOf::Latest).await.unwrap_err();
        assert!(err.is_integrity());

        // 损坏记录之前的时间点仍可读取
        let before = store.reconstruct(1, AsOf::At(0)).await.unwrap().unwrap();
        assert_eq!(before.content, b"base content");
    }

    /// 可按需让写入或快照查询失败的后端
    struct FlakyBackend {
        inner: SledBackend,
        fail_insert: AtomicBool,
        fail_snapshot: AtomicBool,
    }

    fn unavailable() -> StorageError {
        StorageError::Backend("后端不可用".to_string())
    }

    #[async_trait::async_trait]
    impl RevisionBackend for FlakyBackend {
        type Error = StorageError;

        async fn insert_record(&self, record: &ContentRecord) -> Result<()> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.inner.insert_record(record).await
        }

        async fn replace_record(&self, old_timestamp: i64, record: &ContentRecord) -> Result<()> {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.inner.replace_record(old_timestamp, record).await
        }

        async fn latest_snapshot(
            &self,
            document_id: DocumentId,
            as_of: AsOf,
        ) -> Result<Option<ContentRecord>> {
            if self.fail_snapshot.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.inner.latest_snapshot(document_id, as_of).await
        }

        async fn diffs_after(
            &self,
            document_id: DocumentId,
            after: i64,
            as_of: AsOf,
        ) -> Result<Vec<ContentRecord>> {
            self.inner.diffs_after(document_id, after, as_of).await
        }

        async fn latest_record(&self, document_id: DocumentId) -> Result<Option<ContentRecord>> {
            self.inner.latest_record(document_id).await
        }

        async fn list_records(&self, document_id: DocumentId) -> Result<Vec<RevisionSummary>> {
            self.inner.list_records(document_id).await
        }

        async fn delete_records(&self, document_id: DocumentId) -> Result<usize> {
            self.inner.delete_records(document_id).await
        }
    }

    #[tokio::test]
    async fn test_backend_failures_surface_as_backend_errors() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(FlakyBackend {
            inner: SledBackend::open(temp_dir.path().join("flaky.db")).unwrap(),
            fail_insert: AtomicBool::new(false),
            fail_snapshot: AtomicBool::new(false),
        });
        let store = RevisionStore::new(backend.clone(), &ArchiveConfig::default(), WriteGate::new());

        store
            .append_revision(1, b"<html>A</html>", 0, AppendMode::Append)
            .await
            .unwrap();

        // 写入失败：返回后端错误且不留下记录
        backend.fail_insert.store(true, Ordering::SeqCst);
        let err = store
            .append_revision(1, b"<html>AB</html>", 1, AppendMode::Append)
            .await
            .unwrap_err();
        assert!(err.is_backend());
        let err = store
            .append_revision(1, b"<html>AC</html>", 1, AppendMode::ReplaceLatest)
            .await
            .unwrap_err();
        assert!(err.is_backend());
        backend.fail_insert.store(false, Ordering::SeqCst);

        let revisions = store.list_revisions(1).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].timestamp, 0);

        // 读取失败：重建与追加都返回后端错误
        backend.fail_snapshot.store(true, Ordering::SeqCst);
        let err = store.reconstruct(1, AsOf::Latest).await.unwrap_err();
        assert!(err.is_backend());
        let err = store
            .append_revision(1, b"<html>AB</html>", 2, AppendMode::Append)
            .await
            .unwrap_err();
        assert!(err.is_backend());
        assert_eq!(store.list_revisions(1).await.unwrap().len(), 1);

        // 后端恢复后链条保持完整
        backend.fail_snapshot.store(false, Ordering::SeqCst);
        let state = store.reconstruct(1, AsOf::Latest).await.unwrap().unwrap();
        assert_eq!(state.content, b"<html>A</html>");
    }
}
