//! 字节级差异生成与应用模块
//!
//! 差异由一组有序操作组成，每个操作依次描述：
//! 1. 从基础数据游标处原样复制的字节数（copy）
//! 2. 跳过（删除）的基础数据字节数（skip）
//! 3. 插入的字面字节（insert）
//!
//! 编码格式：操作数，随后每个操作依次为 copy、skip、insert 长度
//! 以及插入字节本身；所有长度均为有符号变长整数。
//!
//! 生成算法：先剥离公共前缀与后缀，再对剩余部分用 8 字节窗口
//! 建立基础数据的位置索引，贪心地在游标之后寻找最长匹配。
//! 游标只能前进，因此生成的差异总能按顺序回放。

use crate::core::varint::{decode_varint, encode_varint};
use crate::error::{Result, StorageError};
use std::collections::HashMap;

/// 匹配窗口大小（字节），也是可接受的最短匹配
const WINDOW: usize = 8;
/// 每个窗口最多检查的候选位置数
const MAX_CANDIDATES: usize = 32;

/// 差异操作
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaOp {
    /// 从基础数据游标处复制的字节数
    pub copy: usize,
    /// 复制后跳过的基础数据字节数
    pub skip: usize,
    /// 插入的字面字节
    pub insert: Vec<u8>,
}

/// 一份完整的差异
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    /// 编码为紧凑字节序列
    pub fn encode(&self) -> Vec<u8> {
        let literal: usize = self.ops.iter().map(|op| op.insert.len()).sum();
        let mut out = Vec::with_capacity(literal + self.ops.len() * 3 + 1);
        encode_varint(self.ops.len() as i64, &mut out);
        for op in &self.ops {
            encode_varint(op.copy as i64, &mut out);
            encode_varint(op.skip as i64, &mut out);
            encode_varint(op.insert.len() as i64, &mut out);
            out.extend_from_slice(&op.insert);
        }
        out
    }

    /// 从字节序列解码
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = OpReader::new(buf)?;
        let mut ops = Vec::with_capacity(reader.remaining_ops.min(1024));
        while let Some(op) = reader.next_op()? {
            ops.push(DeltaOp {
                copy: op.copy,
                skip: op.skip,
                insert: op.insert.to_vec(),
            });
        }
        Ok(Self { ops })
    }

    /// 在基础数据上回放差异
    pub fn apply(&self, base: &[u8]) -> Result<Vec<u8>> {
        let mut applier = Applier::new(base);
        for op in &self.ops {
            applier.step(op.copy, op.skip, &op.insert)?;
        }
        Ok(applier.finish())
    }

    /// 插入的字面字节总数
    pub fn literal_len(&self) -> usize {
        self.ops.iter().map(|op| op.insert.len()).sum()
    }
}

/// 差异生成器
#[derive(Debug, Clone, Copy, Default)]
pub struct DeltaGenerator;

impl DeltaGenerator {
    /// 生成从 `base` 到 `target` 的差异
    pub fn generate(&self, base: &[u8], target: &[u8]) -> Delta {
        let prefix = common_prefix(base, target);
        let suffix = common_suffix(&base[prefix..], &target[prefix..]);
        let base_end = base.len() - suffix;
        let target_end = target.len() - suffix;

        let index = WindowIndex::build(base, prefix, base_end);
        let mut builder = OpBuilder::new(prefix);

        let mut i = prefix;
        while i < target_end {
            match self.find_match(&index, base, base_end, target, target_end, i, builder.cursor) {
                Some((pos, len)) => {
                    builder.matched(pos, len);
                    i += len;
                }
                None => {
                    builder.literal(target[i]);
                    i += 1;
                }
            }
        }

        if suffix > 0 {
            builder.matched(base_end, suffix);
        }
        builder.finish()
    }

    /// 在游标之后寻找 `target[at..]` 的最长匹配
    #[allow(clippy::too_many_arguments)]
    fn find_match(
        &self,
        index: &WindowIndex,
        base: &[u8],
        base_end: usize,
        target: &[u8],
        target_end: usize,
        at: usize,
        cursor: usize,
    ) -> Option<(usize, usize)> {
        if at + WINDOW > target_end {
            return None;
        }
        let positions = index.positions.get(&window_key(&target[at..at + WINDOW]))?;
        let first = positions.partition_point(|&p| p < cursor);

        let mut best: Option<(usize, usize)> = None;
        for &pos in positions[first..].iter().take(MAX_CANDIDATES) {
            let mut len = 0;
            while pos + len < base_end && at + len < target_end && base[pos + len] == target[at + len]
            {
                len += 1;
            }
            if len >= WINDOW && best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((pos, len));
            }
        }
        best
    }
}

/// 计算 `base` 到 `target` 的编码差异
pub fn diff(base: &[u8], target: &[u8]) -> Vec<u8> {
    DeltaGenerator::default().generate(base, target).encode()
}

/// 将编码差异应用到 `base` 上，不物化中间操作
pub fn patch(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut reader = OpReader::new(delta)?;
    let mut applier = Applier::new(base);
    while let Some(op) = reader.next_op()? {
        applier.step(op.copy, op.skip, op.insert)?;
    }
    Ok(applier.finish())
}

/// 基础数据中窗口内容到起始位置（升序）的索引
struct WindowIndex {
    positions: HashMap<u64, Vec<usize>>,
}

impl WindowIndex {
    fn build(base: &[u8], start: usize, end: usize) -> Self {
        let mut positions: HashMap<u64, Vec<usize>> = HashMap::new();
        if end >= start + WINDOW {
            for pos in start..=end - WINDOW {
                positions
                    .entry(window_key(&base[pos..pos + WINDOW]))
                    .or_default()
                    .push(pos);
            }
        }
        Self { positions }
    }
}

fn window_key(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(WINDOW)
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

/// 按顺序累积差异操作
struct OpBuilder {
    ops: Vec<DeltaOp>,
    current: DeltaOp,
    cursor: usize,
}

impl OpBuilder {
    fn new(prefix: usize) -> Self {
        Self {
            ops: Vec::new(),
            current: DeltaOp {
                copy: prefix,
                ..Default::default()
            },
            cursor: prefix,
        }
    }

    fn literal(&mut self, byte: u8) {
        self.current.insert.push(byte);
    }

    /// 记录一次基础数据 `[pos, pos + len)` 的匹配，要求 `pos >= cursor`
    fn matched(&mut self, pos: usize, len: usize) {
        debug_assert!(pos >= self.cursor);
        if pos == self.cursor && self.current.insert.is_empty() {
            self.current.copy += len;
        } else {
            self.current.skip = pos - self.cursor;
            let next = DeltaOp {
                copy: len,
                ..Default::default()
            };
            self.ops.push(std::mem::replace(&mut self.current, next));
        }
        self.cursor = pos + len;
    }

    fn finish(mut self) -> Delta {
        if self.current.copy > 0 || !self.current.insert.is_empty() {
            self.ops.push(self.current);
        }
        Delta { ops: self.ops }
    }
}

/// 回放状态：基础数据游标与输出缓冲
struct Applier<'a> {
    base: &'a [u8],
    cursor: usize,
    out: Vec<u8>,
}

impl<'a> Applier<'a> {
    fn new(base: &'a [u8]) -> Self {
        Self {
            base,
            cursor: 0,
            out: Vec::with_capacity(base.len()),
        }
    }

    fn step(&mut self, copy: usize, skip: usize, insert: &[u8]) -> Result<()> {
        let copy_end = self
            .cursor
            .checked_add(copy)
            .filter(|&end| end <= self.base.len())
            .ok_or_else(|| {
                StorageError::Integrity(format!(
                    "复制越界: cursor={}, copy={}, base={}",
                    self.cursor,
                    copy,
                    self.base.len()
                ))
            })?;
        self.out.extend_from_slice(&self.base[self.cursor..copy_end]);

        self.cursor = copy_end
            .checked_add(skip)
            .filter(|&end| end <= self.base.len())
            .ok_or_else(|| {
                StorageError::Integrity(format!(
                    "跳过越界: cursor={}, skip={}, base={}",
                    copy_end,
                    skip,
                    self.base.len()
                ))
            })?;

        self.out.extend_from_slice(insert);
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// 借用式操作，插入字节直接引用编码缓冲
struct RawOp<'a> {
    copy: usize,
    skip: usize,
    insert: &'a [u8],
}

/// 流式解码器
struct OpReader<'a> {
    buf: &'a [u8],
    pos: usize,
    remaining_ops: usize,
}

impl<'a> OpReader<'a> {
    fn new(buf: &'a [u8]) -> Result<Self> {
        let mut reader = Self {
            buf,
            pos: 0,
            remaining_ops: 0,
        };
        reader.remaining_ops = reader.read_len("操作数")?;
        Ok(reader)
    }

    fn read_len(&mut self, what: &str) -> Result<usize> {
        let (value, used) = decode_varint(&self.buf[self.pos..])?;
        self.pos += used;
        usize::try_from(value)
            .map_err(|_| StorageError::Codec(format!("{}为负数: {}", what, value)))
    }

    fn next_op(&mut self) -> Result<Option<RawOp<'a>>> {
        if self.remaining_ops == 0 {
            if self.pos != self.buf.len() {
                return Err(StorageError::Codec(format!(
                    "差异末尾存在 {} 字节多余数据",
                    self.buf.len() - self.pos
                )));
            }
            return Ok(None);
        }

        let copy = self.read_len("复制长度")?;
        let skip = self.read_len("跳过长度")?;
        let insert_len = self.read_len("插入长度")?;

        let end = self
            .pos
            .checked_add(insert_len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                StorageError::Codec(format!(
                    "插入数据被截断: 需要 {} 字节, 剩余 {} 字节",
                    insert_len,
                    self.buf.len() - self.pos
                ))
            })?;
        let insert = &self.buf[self.pos..end];
        self.pos = end;
        self.remaining_ops -= 1;

        Ok(Some(RawOp { copy, skip, insert }))
    }
}
