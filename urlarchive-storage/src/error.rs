use thiserror::Error;
use urlarchive_core::DocumentId;

/// Storage 错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// 持久化后端读写失败，当前操作无法保证修订链一致性
    #[error("后端错误: {0}")]
    Backend(String),

    /// 已存储数据损坏（无法解压、差异无法应用、记录无法解码）
    #[error("完整性错误: {0}")]
    Integrity(String),

    #[error("编码错误: {0}")]
    Codec(String),

    #[error("压缩错误: {0}")]
    Compression(String),

    #[error("时间戳重复: document={document_id}, timestamp={timestamp}")]
    DuplicateTimestamp {
        document_id: DocumentId,
        timestamp: i64,
    },

    #[error("时间戳早于最新记录: document={document_id}, timestamp={timestamp}, latest={latest}")]
    StaleTimestamp {
        document_id: DocumentId,
        timestamp: i64,
        latest: i64,
    },

    #[error("文档未找到: {0}")]
    DocumentNotFound(DocumentId),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// 是否为数据完整性错误
    pub fn is_integrity(&self) -> bool {
        matches!(self, StorageError::Integrity(_) | StorageError::Codec(_))
    }

    /// 是否为后端错误
    pub fn is_backend(&self) -> bool {
        matches!(self, StorageError::Backend(_) | StorageError::Io(_))
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(format!("数据库错误: {}", err))
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, StorageError>;
