//! 压缩闸门模块
//!
//! 只有压缩后足够小（小于原始大小的 `min_gain` 倍）才保存压缩结果，
//! 否则原样保存。差异接受阈值使用同一个比例。

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// 压缩闸门配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Zstd 压缩等级（1-22）
    pub level: i32,
    /// 最小收益比例（压缩后大小必须严格小于 原始大小 × min_gain）
    pub min_gain: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 19,
            min_gain: 0.80,
        }
    }
}

/// 闸门输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutput {
    /// 待存储数据（压缩结果或原始数据）
    pub data: Vec<u8>,
    /// 是否压缩
    pub is_compressed: bool,
    /// 原始数据大小
    pub original_size: usize,
}

/// 压缩闸门
#[derive(Debug, Clone)]
pub struct CompressionGate {
    config: CompressionConfig,
}

impl CompressionGate {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// 压缩数据，收益不足时返回原始数据
    pub fn compress(&self, data: &[u8]) -> Result<GateOutput> {
        let compressed = zstd::stream::encode_all(data, self.config.level)
            .map_err(|e| StorageError::Compression(format!("Zstd压缩失败: {}", e)))?;

        if meets_gain(compressed.len(), data.len(), self.config.min_gain) {
            Ok(GateOutput {
                data: compressed,
                is_compressed: true,
                original_size: data.len(),
            })
        } else {
            Ok(GateOutput {
                data: data.to_vec(),
                is_compressed: false,
                original_size: data.len(),
            })
        }
    }

    /// 解压缩已存储的数据
    ///
    /// 存储数据无法解压说明记录已损坏，返回完整性错误
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::stream::decode_all(data)
            .map_err(|e| StorageError::Integrity(format!("Zstd解压缩失败: {}", e)))
    }

    /// 按需解压
    pub fn restore(&self, data: &[u8], is_compressed: bool) -> Result<Vec<u8>> {
        if is_compressed {
            self.decompress(data)
        } else {
            Ok(data.to_vec())
        }
    }
}

impl Default for CompressionGate {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

/// 候选大小是否严格小于 原始大小 × min_gain
pub fn meets_gain(candidate: usize, original: usize, min_gain: f64) -> bool {
    (candidate as f64) < (original as f64) * min_gain
}
