use thiserror::Error;
use urlarchive_storage::StorageError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("抓取失败: {0}")]
    Fetch(String),

    #[error("HTTP 状态异常: {url} 返回 {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("页面过大: {url} 共 {size} 字节，上限 {limit} 字节")]
    TooLarge {
        url: String,
        size: usize,
        limit: usize,
    },

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        ArchiveError::Fetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error() {
        let err = ArchiveError::Config("配置无效".to_string());
        assert_eq!(err.to_string(), "配置错误: 配置无效");
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: ArchiveError = StorageError::Integrity("差异越界".to_string()).into();
        assert_eq!(err.to_string(), "存储错误: 完整性错误: 差异越界");
        assert!(matches!(err, ArchiveError::Storage(ref e) if e.is_integrity()));
    }

    #[test]
    fn test_http_status_error() {
        let err = ArchiveError::HttpStatus {
            url: "http://example.com/".to_string(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HTTP 状态异常: http://example.com/ 返回 404");
    }

    #[test]
    fn test_too_large_error() {
        let err = ArchiveError::TooLarge {
            url: "http://example.com/big".to_string(),
            size: 600,
            limit: 500,
        };
        assert!(err.to_string().contains("上限 500 字节"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = ArchiveError::from(io_err);
        assert!(err.to_string().contains("IO 错误"));
    }

    #[test]
    fn test_other_error() {
        let err = ArchiveError::Other("其他错误".to_string());
        assert_eq!(err.to_string(), "其他错误");
    }
}
