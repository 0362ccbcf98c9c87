//! Sled 持久化后端
//!
//! 实现修订记录、内容寻址资源和文档登记三类后端 trait

use crate::error::{Result, StorageError};
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::path::Path;
use tracing::{debug, info};
use urlarchive_core::{
    AsOf, BlobBackend, ContentBlob, ContentRecord, DocumentEntry, DocumentId, DocumentRegistry,
    RevisionBackend, RevisionSummary,
};

const FLAG_DIFF: u8 = 0b01;
const FLAG_COMPRESSED: u8 = 0b10;

/// Sled 数据库封装
///
/// 用于存储四棵树：
/// - 修订记录（content）：键为 文档ID ‖ 保序时间戳
/// - 附加资源（additional）：键为 content_id
/// - 文档登记（documents）：键为 文档ID
/// - URL 索引（document_urls）：URL → 文档ID
pub struct SledBackend {
    /// Sled 数据库实例
    db: sled::Db,

    /// 修订记录树
    content_tree: sled::Tree,

    /// 附加资源树
    blob_tree: sled::Tree,

    /// 文档登记树
    document_tree: sled::Tree,

    /// URL 索引树
    url_tree: sled::Tree,
}

/// 附加资源元数据（随数据一起存储在同一个值中）
#[derive(Debug, Serialize, Deserialize)]
struct BlobHeader {
    source_url: String,
    content_type: String,
}

impl SledBackend {
    /// 打开或创建 Sled 数据库
    ///
    /// # 参数
    /// * `db_path` - 数据库路径
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db = sled::open(&db_path)
            .map_err(|e| StorageError::Backend(format!("打开 Sled 数据库失败: {}", e)))?;

        let content_tree = db
            .open_tree("content")
            .map_err(|e| StorageError::Backend(format!("打开 content 树失败: {}", e)))?;

        let blob_tree = db
            .open_tree("additional")
            .map_err(|e| StorageError::Backend(format!("打开 additional 树失败: {}", e)))?;

        let document_tree = db
            .open_tree("documents")
            .map_err(|e| StorageError::Backend(format!("打开 documents 树失败: {}", e)))?;

        let url_tree = db
            .open_tree("document_urls")
            .map_err(|e| StorageError::Backend(format!("打开 document_urls 树失败: {}", e)))?;

        info!("Sled 数据库初始化完成: {:?}", db_path.as_ref());

        Ok(Self {
            db,
            content_tree,
            blob_tree,
            document_tree,
            url_tree,
        })
    }

    /// 刷新数据到磁盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| StorageError::Backend(format!("刷新数据库失败: {}", e)))?;
        Ok(())
    }

    /// 修订记录总数
    pub fn record_count(&self) -> usize {
        self.content_tree.len()
    }

    /// 附加资源总数
    pub fn blob_count(&self) -> usize {
        self.blob_tree.len()
    }

    // ========== 修订记录辅助方法 ==========

    fn records_in(
        &self,
        document_id: DocumentId,
        lower: Bound<i64>,
        as_of: AsOf,
    ) -> impl DoubleEndedIterator<Item = Result<ContentRecord>> {
        let upper = record_key(document_id, as_of.upper_bound().unwrap_or(i64::MAX));
        let lower = match lower {
            Bound::Included(ts) => Bound::Included(record_key(document_id, ts)),
            Bound::Excluded(ts) => Bound::Excluded(record_key(document_id, ts)),
            Bound::Unbounded => Bound::Included(record_key(document_id, i64::MIN)),
        };
        self.content_tree
            .range::<Vec<u8>, _>((lower, Bound::Included(upper)))
            .map(|item| {
                let (key, value) =
                    item.map_err(|e| StorageError::Backend(format!("遍历修订记录失败: {}", e)))?;
                decode_record(&key, &value)
            })
    }

    fn lookup_document_id(&self, url: &str) -> Result<Option<DocumentId>> {
        match self.url_tree.get(url.as_bytes())? {
            Some(bytes) => decode_id(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put_document(&self, entry: &DocumentEntry) -> Result<()> {
        let value = serde_json::to_vec(entry)?;
        self.document_tree
            .insert(entry.id.to_be_bytes(), value)
            .map_err(|e| StorageError::Backend(format!("保存文档登记失败: {}", e)))?;
        debug!("保存文档登记: id={}, url={}", entry.id, entry.url);
        Ok(())
    }

    fn load_document(&self, id: DocumentId) -> Result<Option<DocumentEntry>> {
        match self.document_tree.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RevisionBackend for SledBackend {
    type Error = StorageError;

    async fn insert_record(&self, record: &ContentRecord) -> Result<()> {
        self.content_tree
            .insert(
                record_key(record.document_id, record.timestamp),
                encode_record_value(record),
            )
            .map_err(|e| StorageError::Backend(format!("插入修订记录失败: {}", e)))?;

        debug!(
            "保存修订记录: document={}, timestamp={}, diff={}, compressed={}, size={}",
            record.document_id,
            record.timestamp,
            record.is_diff,
            record.is_compressed,
            record.payload.len()
        );
        Ok(())
    }

    async fn replace_record(&self, old_timestamp: i64, record: &ContentRecord) -> Result<()> {
        let mut batch = sled::Batch::default();
        batch.remove(record_key(record.document_id, old_timestamp));
        batch.insert(
            record_key(record.document_id, record.timestamp),
            encode_record_value(record),
        );
        self.content_tree
            .apply_batch(batch)
            .map_err(|e| StorageError::Backend(format!("替换修订记录失败: {}", e)))?;

        debug!(
            "替换修订记录: document={}, old={}, new={}",
            record.document_id, old_timestamp, record.timestamp
        );
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        document_id: DocumentId,
        as_of: AsOf,
    ) -> Result<Option<ContentRecord>> {
        for item in self.records_in(document_id, Bound::Unbounded, as_of).rev() {
            let record = item?;
            if record.is_snapshot() {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn diffs_after(
        &self,
        document_id: DocumentId,
        after: i64,
        as_of: AsOf,
    ) -> Result<Vec<ContentRecord>> {
        if as_of.upper_bound().unwrap_or(i64::MAX) <= after {
            return Ok(Vec::new());
        }

        let mut diffs = Vec::new();
        for item in self.records_in(document_id, Bound::Excluded(after), as_of) {
            let record = item?;
            if record.is_diff {
                diffs.push(record);
            }
        }
        Ok(diffs)
    }

    async fn latest_record(&self, document_id: DocumentId) -> Result<Option<ContentRecord>> {
        self.records_in(document_id, Bound::Unbounded, AsOf::Latest)
            .next_back()
            .transpose()
    }

    async fn list_records(&self, document_id: DocumentId) -> Result<Vec<RevisionSummary>> {
        self.records_in(document_id, Bound::Unbounded, AsOf::Latest)
            .map(|item| item.map(|record| RevisionSummary::from(&record)))
            .collect()
    }

    async fn delete_records(&self, document_id: DocumentId) -> Result<usize> {
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in self.content_tree.scan_prefix(document_id.to_be_bytes()) {
            let (key, _) =
                item.map_err(|e| StorageError::Backend(format!("遍历修订记录失败: {}", e)))?;
            batch.remove(key);
            removed += 1;
        }
        self.content_tree
            .apply_batch(batch)
            .map_err(|e| StorageError::Backend(format!("删除修订记录失败: {}", e)))?;

        debug!("删除修订记录: document={}, count={}", document_id, removed);
        Ok(removed)
    }
}

#[async_trait]
impl BlobBackend for SledBackend {
    type Error = StorageError;

    async fn insert_blob_if_absent(&self, blob: &ContentBlob) -> Result<bool> {
        let value = encode_blob_value(blob)?;
        let outcome = self
            .blob_tree
            .compare_and_swap(blob.content_id.as_bytes(), None::<&[u8]>, Some(value))
            .map_err(|e| StorageError::Backend(format!("插入附加资源失败: {}", e)))?;

        let inserted = outcome.is_ok();
        debug!(
            "附加资源: id={}, url={}, inserted={}",
            blob.content_id, blob.source_url, inserted
        );
        Ok(inserted)
    }

    async fn get_blob(&self, content_id: &str) -> Result<Option<ContentBlob>> {
        match self.blob_tree.get(content_id.as_bytes())? {
            Some(bytes) => decode_blob_value(content_id, &bytes).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentRegistry for SledBackend {
    type Error = StorageError;

    async fn lookup_or_insert(
        &self,
        url: &str,
        important: bool,
        last_visit: i64,
    ) -> Result<(DocumentEntry, bool)> {
        loop {
            if let Some(id) = self.lookup_document_id(url)? {
                let mut entry = self.load_document(id)?.ok_or_else(|| {
                    StorageError::Integrity(format!("URL 索引指向不存在的文档: {}", id))
                })?;

                // 重要文档无需更新访问时间或重要性
                if !entry.important {
                    entry.important = important;
                    entry.last_visit = last_visit;
                    self.put_document(&entry)?;
                }
                return Ok((entry, false));
            }

            let id = self.db.generate_id()? + 1;
            let entry = DocumentEntry {
                id,
                url: url.to_string(),
                important,
                last_visit,
                created_at: Local::now().naive_local(),
            };
            // 先写文档再占用 URL 索引，索引可见时文档一定存在
            self.put_document(&entry)?;
            let claimed = self
                .url_tree
                .compare_and_swap(url.as_bytes(), None::<&[u8]>, Some(id.to_be_bytes().to_vec()))
                .map_err(|e| StorageError::Backend(format!("保存 URL 索引失败: {}", e)))?;

            match claimed {
                Ok(()) => {
                    info!("登记新文档: id={}, url={}", id, url);
                    return Ok((entry, true));
                }
                Err(_) => {
                    // 其他写入方已登记同一 URL，撤销本次文档并使用已有登记
                    self.document_tree
                        .remove(id.to_be_bytes())
                        .map_err(|e| StorageError::Backend(format!("撤销文档登记失败: {}", e)))?;
                    debug!("URL 已被并发登记: url={}", url);
                }
            }
        }
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentEntry>> {
        self.load_document(id)
    }

    async fn find_document(&self, url: &str) -> Result<Option<DocumentEntry>> {
        match self.lookup_document_id(url)? {
            Some(id) => self.load_document(id),
            None => Ok(None),
        }
    }

    async fn list_documents(&self) -> Result<Vec<DocumentEntry>> {
        let mut entries = Vec::new();
        for item in self.document_tree.iter() {
            let (_, value) =
                item.map_err(|e| StorageError::Backend(format!("遍历文档登记失败: {}", e)))?;
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    async fn remove_document(&self, id: DocumentId) -> Result<bool> {
        let Some(entry) = self.load_document(id)? else {
            return Ok(false);
        };
        self.document_tree.remove(id.to_be_bytes())?;
        self.url_tree.remove(entry.url.as_bytes())?;

        debug!("删除文档登记: id={}, url={}", id, entry.url);
        Ok(true)
    }
}

// ========== 编解码 ==========

/// 修订记录键：文档ID（大端）‖ 翻转符号位后的时间戳（大端），保证字节序与时间序一致
fn record_key(document_id: DocumentId, timestamp: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&document_id.to_be_bytes());
    key.extend_from_slice(&((timestamp as u64) ^ (1 << 63)).to_be_bytes());
    key
}

fn decode_record_key(key: &[u8]) -> Result<(DocumentId, i64)> {
    if key.len() != 16 {
        return Err(StorageError::Integrity(format!(
            "修订记录键长度错误: {}",
            key.len()
        )));
    }
    let document_id = decode_id(&key[..8])?;
    let raw = decode_id(&key[8..])?;
    Ok((document_id, (raw ^ (1 << 63)) as i64))
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Integrity(format!("ID 长度错误: {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

/// 修订记录值：1 字节标志位 ‖ payload
fn encode_record_value(record: &ContentRecord) -> Vec<u8> {
    let mut flags = 0u8;
    if record.is_diff {
        flags |= FLAG_DIFF;
    }
    if record.is_compressed {
        flags |= FLAG_COMPRESSED;
    }
    let mut value = Vec::with_capacity(record.payload.len() + 1);
    value.push(flags);
    value.extend_from_slice(&record.payload);
    value
}

fn decode_record(key: &[u8], value: &[u8]) -> Result<ContentRecord> {
    let (document_id, timestamp) = decode_record_key(key)?;
    let (&flags, payload) = value.split_first().ok_or_else(|| {
        StorageError::Integrity(format!(
            "修订记录为空: document={}, timestamp={}",
            document_id, timestamp
        ))
    })?;
    if flags & !(FLAG_DIFF | FLAG_COMPRESSED) != 0 {
        return Err(StorageError::Integrity(format!(
            "修订记录标志位未知: document={}, timestamp={}, flags={:#04x}",
            document_id, timestamp, flags
        )));
    }

    Ok(ContentRecord {
        document_id,
        timestamp,
        is_diff: flags & FLAG_DIFF != 0,
        is_compressed: flags & FLAG_COMPRESSED != 0,
        payload: payload.to_vec(),
    })
}

/// 附加资源值：4 字节头长度（大端）‖ JSON 头 ‖ 原始数据
fn encode_blob_value(blob: &ContentBlob) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(&BlobHeader {
        source_url: blob.source_url.clone(),
        content_type: blob.content_type.clone(),
    })?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| StorageError::Codec("附加资源头过大".to_string()))?;

    let mut value = Vec::with_capacity(4 + header.len() + blob.payload.len());
    value.extend_from_slice(&header_len.to_be_bytes());
    value.extend_from_slice(&header);
    value.extend_from_slice(&blob.payload);
    Ok(value)
}

fn decode_blob_value(content_id: &str, value: &[u8]) -> Result<ContentBlob> {
    let corrupt = || StorageError::Integrity(format!("附加资源记录损坏: {}", content_id));

    let len_bytes: [u8; 4] = value.get(..4).ok_or_else(corrupt)?.try_into().map_err(|_| corrupt())?;
    let header_end = 4 + u32::from_be_bytes(len_bytes) as usize;
    let header: BlobHeader = serde_json::from_slice(value.get(4..header_end).ok_or_else(corrupt)?)
        .map_err(|_| corrupt())?;

    Ok(ContentBlob {
        content_id: content_id.to_string(),
        source_url: header.source_url,
        content_type: header.content_type,
        payload: value[header_end..].to_vec(),
    })
}
