//! 共享数据模型

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 文档ID（在文档整个历史中保持不变）
pub type DocumentId = u64;

/// 单个文档的一条已存储修订
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// 所属文档
    pub document_id: DocumentId,
    /// 抓取时间（秒），文档内唯一且全序
    pub timestamp: i64,
    /// payload 是否为相对上一重建状态的差异
    pub is_diff: bool,
    /// payload 是否经过压缩
    pub is_compressed: bool,
    /// 原始、压缩或压缩后的差异数据
    pub payload: Vec<u8>,
}

impl ContentRecord {
    /// 是否为全量快照
    pub fn is_snapshot(&self) -> bool {
        !self.is_diff
    }
}

/// 重建的时间上界
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsOf {
    /// 最新版本（无上界）
    Latest,
    /// 不晚于给定时间戳的版本
    At(i64),
}

impl AsOf {
    /// 时间上界，`Latest` 返回 `None`
    pub fn upper_bound(&self) -> Option<i64> {
        match self {
            AsOf::Latest => None,
            AsOf::At(ts) => Some(*ts),
        }
    }
}

/// 修订摘要（用于列出文档的历史）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionSummary {
    pub timestamp: i64,
    pub is_diff: bool,
    pub is_compressed: bool,
    /// 实际存储大小（压缩/差异后）
    pub stored_size: usize,
}

impl From<&ContentRecord> for RevisionSummary {
    fn from(record: &ContentRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            is_diff: record.is_diff,
            is_compressed: record.is_compressed,
            stored_size: record.payload.len(),
        }
    }
}

/// 去重后的附加资源（图片、样式表等）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlob {
    /// 原始数据摘要的十六进制表示（主键）
    pub content_id: String,
    /// 首次得到该摘要的 URL
    pub source_url: String,
    /// 首次成功抓取时的 MIME 类型
    pub content_type: String,
    /// 原始数据
    pub payload: Vec<u8>,
}

/// 文档登记信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub id: DocumentId,
    pub url: String,
    /// 重要文档保留全部历史，普通文档只保存首个版本
    pub important: bool,
    /// 最后访问时间（秒）
    pub last_visit: i64,
    /// 登记时间
    pub created_at: NaiveDateTime,
}
