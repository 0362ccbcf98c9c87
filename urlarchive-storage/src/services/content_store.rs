//! 内容寻址存储服务
//!
//! 附加资源（图片、样式表等）按内容哈希去重保存，
//! 同一内容只保留第一次写入的来源 URL 和内容类型。

use crate::error::{Result, StorageError};
use crate::services::locks::WriteGate;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;
use urlarchive_core::{BlobBackend, ContentBlob};

/// 写入结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// 内容标识（SHA-256 十六进制）
    pub content_id: String,
    /// 是否为首次写入
    pub inserted: bool,
}

/// 内容寻址存储
pub struct ContentStore<B> {
    backend: Arc<B>,
    gate: WriteGate,
}

impl<B> Clone for ContentStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            gate: self.gate.clone(),
        }
    }
}

/// 计算内容标识
pub fn content_id(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

impl<B> ContentStore<B>
where
    B: BlobBackend<Error = StorageError>,
{
    pub fn new(backend: Arc<B>, gate: WriteGate) -> Self {
        Self { backend, gate }
    }

    /// 保存资源，已存在相同内容时不覆盖
    pub async fn put(
        &self,
        source_url: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<StoredBlob> {
        let blob = ContentBlob {
            content_id: content_id(&payload),
            source_url: source_url.to_string(),
            content_type: content_type.to_string(),
            payload,
        };

        let inserted = {
            let _guard = self.gate.acquire().await;
            self.backend.insert_blob_if_absent(&blob).await?
        };

        if !inserted {
            debug!("资源已存在，跳过写入: id={}, url={}", blob.content_id, source_url);
        }

        Ok(StoredBlob {
            content_id: blob.content_id,
            inserted,
        })
    }

    /// 按内容标识读取资源
    pub async fn get(&self, content_id: &str) -> Result<Option<ContentBlob>> {
        self.backend.get_blob(content_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SledBackend;
    use tempfile::TempDir;

    fn create_store() -> (ContentStore<SledBackend>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = SledBackend::open(temp_dir.path().join("blobs.db")).unwrap();
        (ContentStore::new(Arc::new(backend), WriteGate::new()), temp_dir)
    }

    #[test]
    fn test_content_id_is_sha256_hex() {
        assert_eq!(
            content_id(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_id(b"abc").len(), 64);
    }

    #[tokio::test]
    async fn test_put_deduplicates_identical_content() {
        let (store, _temp) = create_store();

        let first = store
            .put("http://a/logo.png", "image/png", b"PNGDATA".to_vec())
            .await
            .unwrap();
        let second = store
            .put("http://b/copy.png", "image/x-png", b"PNGDATA".to_vec())
            .await
            .unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.content_id, second.content_id);

        let blob = store.get(&first.content_id).await.unwrap().unwrap();
        assert_eq!(blob.source_url, "http://a/logo.png");
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.payload, b"PNGDATA");
    }

    #[tokio::test]
    async fn test_concurrent_puts_insert_once() {
        let (store, _temp) = create_store();

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put(&format!("http://host/{}.css", i), "text/css", b"body{}".to_vec())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let inserted = results
            .into_iter()
            .filter(|r| r.as_ref().unwrap().inserted)
            .count();
        assert_eq!(inserted, 1);
    }
}
