//! 持久化后端 trait 定义
//!
//! 修订链引擎、内容寻址存储和文档登记都只依赖这些 trait，
//! 具体实现（如 Sled）由存储 crate 提供

use crate::{AsOf, ContentBlob, ContentRecord, DocumentEntry, DocumentId, RevisionSummary};
use async_trait::async_trait;

/// 修订记录后端
///
/// 同一文档的记录按时间戳全序，时间戳在文档内唯一
#[async_trait]
pub trait RevisionBackend: Send + Sync {
    /// 错误类型
    type Error: std::error::Error + Send + Sync + 'static;

    /// 插入一条修订记录
    async fn insert_record(&self, record: &ContentRecord) -> Result<(), Self::Error>;

    /// 原子地用 `record` 替换时间戳为 `old_timestamp` 的记录
    async fn replace_record(
        &self,
        old_timestamp: i64,
        record: &ContentRecord,
    ) -> Result<(), Self::Error>;

    /// 查询时间戳不晚于 `as_of` 的最新全量快照
    async fn latest_snapshot(
        &self,
        document_id: DocumentId,
        as_of: AsOf,
    ) -> Result<Option<ContentRecord>, Self::Error>;

    /// 查询时间戳位于 `(after, as_of]` 的差异记录，按时间升序
    async fn diffs_after(
        &self,
        document_id: DocumentId,
        after: i64,
        as_of: AsOf,
    ) -> Result<Vec<ContentRecord>, Self::Error>;

    /// 查询最新的一条记录（不区分快照或差异）
    async fn latest_record(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<ContentRecord>, Self::Error>;

    /// 列出文档的全部修订摘要，按时间升序
    async fn list_records(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<RevisionSummary>, Self::Error>;

    /// 删除文档的全部修订记录，返回删除条数
    async fn delete_records(&self, document_id: DocumentId) -> Result<usize, Self::Error>;
}

/// 内容寻址资源后端
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// 错误类型
    type Error: std::error::Error + Send + Sync + 'static;

    /// 不存在时插入，返回是否真正写入
    ///
    /// 已存在的记录保持不变（首个写入者的元数据为准）
    async fn insert_blob_if_absent(&self, blob: &ContentBlob) -> Result<bool, Self::Error>;

    /// 按 content_id 精确查找
    async fn get_blob(&self, content_id: &str) -> Result<Option<ContentBlob>, Self::Error>;
}

/// 文档登记后端
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// 错误类型
    type Error: std::error::Error + Send + Sync + 'static;

    /// 查找文档，不存在则登记
    ///
    /// # 返回
    /// 文档信息以及是否为新登记
    async fn lookup_or_insert(
        &self,
        url: &str,
        important: bool,
        last_visit: i64,
    ) -> Result<(DocumentEntry, bool), Self::Error>;

    /// 按 ID 获取文档
    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentEntry>, Self::Error>;

    /// 按 URL 获取文档
    async fn find_document(&self, url: &str) -> Result<Option<DocumentEntry>, Self::Error>;

    /// 列出全部文档，按 ID 升序
    async fn list_documents(&self) -> Result<Vec<DocumentEntry>, Self::Error>;

    /// 删除文档登记（不含修订记录）
    async fn remove_document(&self, id: DocumentId) -> Result<bool, Self::Error>;
}
