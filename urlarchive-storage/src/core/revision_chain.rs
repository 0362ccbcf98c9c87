//! 修订链策略模块
//!
//! 决定新抓取的内容保存为全量快照还是差异，并负责
//! 从快照出发按顺序回放差异以重建历史版本。
//!
//! 链长计数从不持久化：每次追加前都通过重建重新推导。
//! 回退保存的全量快照本身就是 `is_diff = false` 的记录，
//! 下一次重建会以它为锚点，计数自然归零。

use crate::core::compression::{CompressionGate, meets_gain};
use crate::core::delta::{DeltaGenerator, patch};
use crate::error::Result;
use urlarchive_core::ContentRecord;

/// 修订链配置
#[derive(Debug, Clone)]
pub struct RevisionChainConfig {
    /// 链段允许的差异数（超过此数量后下一次追加强制保存快照）
    pub max_diffs: usize,
    /// 差异接受的最小收益比例
    pub min_gain: f64,
}

impl Default for RevisionChainConfig {
    fn default() -> Self {
        Self {
            max_diffs: 20,
            min_gain: 0.80,
        }
    }
}

/// 重建结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    /// 重建出的内容
    pub content: Vec<u8>,
    /// 自锚点快照以来应用的差异数
    pub diff_count: usize,
    /// 锚点快照的时间戳
    pub anchor_timestamp: i64,
    /// 最后应用的记录的时间戳
    pub latest_timestamp: i64,
}

/// 编码后的修订（待写入后端）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRevision {
    pub payload: Vec<u8>,
    pub is_diff: bool,
    pub is_compressed: bool,
}

/// 存储决策原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotReason {
    /// 文档没有任何历史
    FirstCapture,
    /// 链段已满
    ChainFull,
    /// 差异收益不足
    DiffTooLarge,
}

/// 修订链管理器
#[derive(Debug, Clone)]
pub struct RevisionChainManager {
    config: RevisionChainConfig,
    gate: CompressionGate,
    generator: DeltaGenerator,
}

impl RevisionChainManager {
    pub fn new(config: RevisionChainConfig, gate: CompressionGate) -> Self {
        Self {
            config,
            gate,
            generator: DeltaGenerator::default(),
        }
    }

    /// 判断是否必须保存全量快照（不考虑差异大小）
    pub fn requires_snapshot(&self, prior: Option<&Reconstruction>) -> Option<SnapshotReason> {
        match prior {
            None => Some(SnapshotReason::FirstCapture),
            Some(state) if state.diff_count > self.config.max_diffs => {
                Some(SnapshotReason::ChainFull)
            }
            Some(_) => None,
        }
    }

    /// 按追加策略编码新内容
    ///
    /// # 参数
    /// - prior: 当前最新状态（无历史时为 None）
    /// - content: 新抓取的内容
    pub fn encode(
        &self,
        prior: Option<&Reconstruction>,
        content: &[u8],
    ) -> Result<(EncodedRevision, Option<SnapshotReason>)> {
        if let Some(reason) = self.requires_snapshot(prior) {
            return Ok((self.snapshot(content)?, Some(reason)));
        }

        let base = prior.map(|p| p.content.as_slice()).unwrap_or_default();
        let delta = self.generator.generate(base, content).encode();

        if meets_gain(delta.len(), content.len(), self.config.min_gain) {
            let output = self.gate.compress(&delta)?;
            Ok((
                EncodedRevision {
                    payload: output.data,
                    is_diff: true,
                    is_compressed: output.is_compressed,
                },
                None,
            ))
        } else {
            Ok((self.snapshot(content)?, Some(SnapshotReason::DiffTooLarge)))
        }
    }

    fn snapshot(&self, content: &[u8]) -> Result<EncodedRevision> {
        let output = self.gate.compress(content)?;
        Ok(EncodedRevision {
            payload: output.data,
            is_diff: false,
            is_compressed: output.is_compressed,
        })
    }

    /// 从锚点快照出发按顺序回放差异
    ///
    /// `diffs` 必须是锚点之后的差异记录，按时间升序
    pub fn replay(&self, anchor: &ContentRecord, diffs: &[ContentRecord]) -> Result<Reconstruction> {
        let mut content = self.gate.restore(&anchor.payload, anchor.is_compressed)?;
        let mut latest_timestamp = anchor.timestamp;

        for record in diffs {
            let delta = self.gate.restore(&record.payload, record.is_compressed)?;
            content = patch(&content, &delta)?;
            latest_timestamp = record.timestamp;
        }

        Ok(Reconstruction {
            content,
            diff_count: diffs.len(),
            anchor_timestamp: anchor.timestamp,
            latest_timestamp,
        })
    }
}

impl Default for RevisionChainManager {
    fn default() -> Self {
        Self::new(RevisionChainConfig::default(), CompressionGate::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delta::diff;

    fn record(timestamp: i64, encoded: EncodedRevision) -> ContentRecord {
        ContentRecord {
            document_id: 1,
            timestamp,
            is_diff: encoded.is_diff,
            is_compressed: encoded.is_compressed,
            payload: encoded.payload,
        }
    }

    fn state(content: &[u8], diff_count: usize) -> Reconstruction {
        Reconstruction {
            content: content.to_vec(),
            diff_count,
            anchor_timestamp: 0,
            latest_timestamp: diff_count as i64,
        }
    }

    #[test]
    fn test_first_capture_is_snapshot() {
        let manager = RevisionChainManager::default();
        let (encoded, reason) = manager.encode(None, b"<html>A</html>").unwrap();
        assert!(!encoded.is_diff);
        assert_eq!(reason, Some(SnapshotReason::FirstCapture));
    }

    #[test]
    fn test_small_edit_is_diff() {
        let manager = RevisionChainManager::default();
        let prior = state(b"<html>A</html>", 0);
        let (encoded, reason) = manager.encode(Some(&prior), b"<html>AB</html>").unwrap();
        assert!(encoded.is_diff);
        assert!(!encoded.is_compressed);
        assert_eq!(reason, None);
    }

    #[test]
    fn test_full_chain_forces_snapshot() {
        let manager = RevisionChainManager::default();

        let at_limit = state(b"<html>AAAA</html>", 20);
        let (encoded, _) = manager.encode(Some(&at_limit), b"<html>AAAAA</html>").unwrap();
        assert!(encoded.is_diff);

        let over_limit = state(b"<html>AAAA</html>", 21);
        let (encoded, reason) = manager.encode(Some(&over_limit), b"<html>AAAAA</html>").unwrap();
        assert!(!encoded.is_diff);
        assert_eq!(reason, Some(SnapshotReason::ChainFull));
    }

    #[test]
    fn test_unrelated_content_falls_back_to_snapshot() {
        let manager = RevisionChainManager::default();
        let prior = state(b"completely different page body", 3);
        let (encoded, reason) = manager.encode(Some(&prior), b"0123456789abcdef").unwrap();
        assert!(!encoded.is_diff);
        assert_eq!(reason, Some(SnapshotReason::DiffTooLarge));
    }

    #[test]
    fn test_replay_applies_diffs_in_order() {
        let manager = RevisionChainManager::default();
        let versions: [&[u8]; 3] = [b"<p>one</p>", b"<p>one two</p>", b"<p>one two three</p>"];

        let (snap, _) = manager.encode(None, versions[0]).unwrap();
        let anchor = record(0, snap);
        let diffs = vec![
            ContentRecord {
                document_id: 1,
                timestamp: 1,
                is_diff: true,
                is_compressed: false,
                payload: diff(versions[0], versions[1]),
            },
            ContentRecord {
                document_id: 1,
                timestamp: 2,
                is_diff: true,
                is_compressed: false,
                payload: diff(versions[1], versions[2]),
            },
        ];

        let result = manager.replay(&anchor, &diffs).unwrap();
        assert_eq!(result.content, versions[2]);
        assert_eq!(result.diff_count, 2);
        assert_eq!(result.anchor_timestamp, 0);
        assert_eq!(result.latest_timestamp, 2);
    }

    #[test]
    fn test_replay_corrupt_diff_fails() {
        let manager = RevisionChainManager::default();
        let (snap, _) = manager.encode(None, b"base").unwrap();
        let anchor = record(0, snap);
        let broken = ContentRecord {
            document_id: 1,
            timestamp: 1,
            is_diff: true,
            is_compressed: true,
            payload: b"not zstd".to_vec(),
        };
        assert!(manager.replay(&anchor, &[broken]).unwrap_err().is_integrity());
    }
}
