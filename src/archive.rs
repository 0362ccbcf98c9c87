//! 归档门面
//!
//! 把文档登记、修订链引擎和内容寻址存储组合在同一个后端之上

use crate::config::Config;
use crate::error::Result;
use std::sync::Arc;
use tracing::info;
use urlarchive_core::{
    AsOf, BlobBackend, ContentBlob, ContentRecord, DocumentEntry, DocumentId, DocumentRegistry,
    RevisionBackend, RevisionSummary,
};
use urlarchive_storage::{
    AppendMode, ArchiveConfig, ContentStore, RevisionStore, SledBackend, StorageError, WriteGate,
};

/// 归档所需的完整后端能力
pub trait ArchiveBackend:
    RevisionBackend<Error = StorageError>
    + BlobBackend<Error = StorageError>
    + DocumentRegistry<Error = StorageError>
    + 'static
{
}

impl<T> ArchiveBackend for T where
    T: RevisionBackend<Error = StorageError>
        + BlobBackend<Error = StorageError>
        + DocumentRegistry<Error = StorageError>
        + 'static
{
}

pub struct Archive<B> {
    backend: Arc<B>,
    revisions: RevisionStore<B>,
    blobs: ContentStore<B>,
    gate: WriteGate,
}

impl<B> Clone for Archive<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            revisions: self.revisions.clone(),
            blobs: self.blobs.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl Archive<SledBackend> {
    /// 按配置打开 Sled 数据库
    pub fn open(config: &Config) -> Result<Self> {
        if let Some(parent) = config.storage.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let backend = SledBackend::open(&config.storage.db_path)?;
        info!("归档已打开: {:?}", config.storage.db_path);
        Ok(Self::new(Arc::new(backend), &config.storage.archive_config()))
    }

    pub async fn flush(&self) -> Result<()> {
        self.backend.flush().await?;
        Ok(())
    }
}

impl<B: ArchiveBackend> Archive<B> {
    pub fn new(backend: Arc<B>, config: &ArchiveConfig) -> Self {
        // 修订记录、附加资源与文档登记共享同一个写闸门
        let gate = WriteGate::new();
        Self {
            revisions: RevisionStore::new(backend.clone(), config, gate.clone()),
            blobs: ContentStore::new(backend.clone(), gate.clone()),
            backend,
            gate,
        }
    }

    pub fn revisions(&self) -> &RevisionStore<B> {
        &self.revisions
    }

    pub fn blobs(&self) -> &ContentStore<B> {
        &self.blobs
    }

    /// 登记文档
    pub async fn register(
        &self,
        url: &str,
        important: bool,
        last_visit: i64,
    ) -> Result<(DocumentEntry, bool)> {
        let _guard = self.gate.acquire().await;
        Ok(self
            .backend
            .lookup_or_insert(url, important, last_visit)
            .await?)
    }

    pub async fn document(&self, id: DocumentId) -> Result<Option<DocumentEntry>> {
        Ok(self.backend.get_document(id).await?)
    }

    pub async fn find_document(&self, url: &str) -> Result<Option<DocumentEntry>> {
        Ok(self.backend.find_document(url).await?)
    }

    pub async fn documents(&self) -> Result<Vec<DocumentEntry>> {
        Ok(self.backend.list_documents().await?)
    }

    /// 删除文档及其整条修订链
    pub async fn remove_document(&self, id: DocumentId) -> Result<bool> {
        let removed = self.revisions.delete_chain(id).await?;
        let existed = {
            let _guard = self.gate.acquire().await;
            self.backend.remove_document(id).await?
        };
        if existed {
            info!("文档已删除: id={}, revisions={}", id, removed);
        }
        Ok(existed)
    }

    /// 追加一次抓取
    pub async fn capture(
        &self,
        id: DocumentId,
        content: &[u8],
        timestamp: i64,
        mode: AppendMode,
    ) -> Result<ContentRecord> {
        Ok(self
            .revisions
            .append_revision(id, content, timestamp, mode)
            .await?)
    }

    pub async fn revisions_of(&self, id: DocumentId) -> Result<Vec<RevisionSummary>> {
        Ok(self.revisions.list_revisions(id).await?)
    }

    /// 返回文档在指定时刻的内容
    pub async fn render_as_of(&self, id: DocumentId, as_of: AsOf) -> Result<Vec<u8>> {
        match self.revisions.reconstruct(id, as_of).await? {
            Some(state) => Ok(state.content),
            None => Err(StorageError::DocumentNotFound(id).into()),
        }
    }

    /// 按内容标识读取附加资源
    pub async fn resource(&self, content_id: &str) -> Result<Option<ContentBlob>> {
        Ok(self.blobs.get(content_id).await?)
    }
}
