//! 有符号变长整数编码
//!
//! 先做 zig-zag 映射（0, -1, 1, -2 ... → 0, 1, 2, 3 ...），
//! 再按 LEB128 每字节 7 位输出，最高位为续位标志。

use crate::error::{Result, StorageError};

/// 一个 i64 最多占用的字节数
pub const MAX_VARINT_LEN: usize = 10;

/// 将 `value` 追加编码到 `out`，返回写入的字节数
///
/// | 值  | 编码          |
/// |-----|---------------|
/// | 0   | `[0x00]`      |
/// | -1  | `[0x01]`      |
/// | 1   | `[0x02]`      |
/// | 63  | `[0x7E]`      |
/// | 64  | `[0x80, 0x01]`|
pub fn encode_varint(value: i64, out: &mut Vec<u8>) -> usize {
    let mut ux = ((value << 1) ^ (value >> 63)) as u64;
    let mut written = 0;
    while ux >= 0x80 {
        out.push((ux as u8) | 0x80);
        ux >>= 7;
        written += 1;
    }
    out.push(ux as u8);
    written + 1
}

/// 从 `buf` 开头解码一个变长整数
///
/// # 返回
/// `(值, 消耗字节数)`
pub fn decode_varint(buf: &[u8]) -> Result<(i64, usize)> {
    let mut ux: u64 = 0;
    let mut shift: u32 = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(StorageError::Codec("变长整数超过10字节".to_string()));
        }
        // 第10个字节只允许携带最高1位
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(StorageError::Codec("变长整数溢出".to_string()));
        }

        ux |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            let value = ((ux >> 1) as i64) ^ -((ux & 1) as i64);
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    Err(StorageError::Codec(format!(
        "变长整数在偏移 {} 处意外结束",
        buf.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(value, &mut out);
        out
    }

    #[test]
    fn test_encode_small_values() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(-1), vec![0x01]);
        assert_eq!(encode(1), vec![0x02]);
        assert_eq!(encode(63), vec![0x7E]);
        assert_eq!(encode(64), vec![0x80, 0x01]);
    }

    #[test]
    fn test_extremes_use_ten_bytes() {
        assert_eq!(encode(i64::MAX).len(), MAX_VARINT_LEN);
        assert_eq!(encode(i64::MIN).len(), MAX_VARINT_LEN);
        assert_eq!(decode_varint(&encode(i64::MIN)).unwrap(), (i64::MIN, 10));
        assert_eq!(decode_varint(&encode(i64::MAX)).unwrap(), (i64::MAX, 10));
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut buf = encode(300);
        buf.extend_from_slice(&[0xAA, 0xBB]);
        let (value, used) = decode_varint(&buf).unwrap();
        assert_eq!(value, 300);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_decode_truncated() {
        let err = decode_varint(&[0x80, 0x80]).unwrap_err();
        assert!(err.is_integrity());
        assert!(decode_varint(&[]).is_err());
    }

    #[test]
    fn test_decode_too_long() {
        let buf = [0xFFu8; 11];
        assert!(decode_varint(&buf).is_err());
    }
}
