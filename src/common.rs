//! 全局基础类型、错误定义与二进制读写辅助

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

// ── 类型别名 ──────────────────────────────────────────────────────────────────

/// 毫秒（或任意单位）时间戳，引擎不解释其单位
pub type Timestamp = i64;

/// 成功返回码
pub const E_OK: i32 = 0;

// ── TimeRange ─────────────────────────────────────────────────────────────────

/// [start, end] 闭区间时间范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end:   Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self { Self { start, end } }

    /// 覆盖全部可表示时间
    pub fn unbounded() -> Self { Self::new(Timestamp::MIN, Timestamp::MAX) }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub fn is_empty(&self) -> bool { self.start > self.end }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TsFileError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("timeseries already registered: {0}")]
    AlreadyRegistered(String),
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("corrupt file: {0}")]
    CorruptFile(String),
    #[error("row {row} exceeds tablet capacity {capacity}")]
    CapacityExceeded { row: usize, capacity: usize },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

impl TsFileError {
    /// 对外暴露的稳定错误码；0 保留给 [`E_OK`]
    pub fn code(&self) -> i32 {
        match self {
            Self::SchemaMismatch(_)          => 1,
            Self::UnknownColumn(_)           => 2,
            Self::UnknownTable(_)            => 3,
            Self::AlreadyRegistered(_)       => 4,
            Self::TypeMismatch { .. }        => 5,
            Self::CorruptFile(_)             => 6,
            Self::CapacityExceeded { .. }    => 7,
            Self::Io(_)                      => 8,
            Self::InvalidState(_)            => 9,
            Self::Encoding(_)                => 10,
            Self::Compression(_)             => 11,
            Self::ChecksumMismatch           => 12,
            Self::Unsupported(_)             => 13,
            Self::InvalidFilter(_)           => 14,
        }
    }

    pub(crate) fn type_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        Self::TypeMismatch { expected: expected.to_string(), actual: actual.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, TsFileError>;

/// 将结果折叠为错误码（0 表示成功）
pub fn result_code<T>(r: &Result<T>) -> i32 {
    match r {
        Ok(_)  => E_OK,
        Err(e) => e.code(),
    }
}

/// 解析文件结构时的截断 / 越界一律视为文件损坏
pub(crate) fn corrupt(e: io::Error) -> TsFileError {
    TsFileError::CorruptFile(e.to_string())
}

// ── 二进制辅助 ────────────────────────────────────────────────────────────────
//
// 所有定长整数均为 little-endian；字符串 / 字节串带 u32 长度前缀。

pub(crate) fn write_bytes<W: Write>(w: &mut W, b: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(b.len() as u32)?;
    w.write_all(b)
}

pub(crate) fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub(crate) fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let raw = read_bytes(r)?;
    String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// 可空字符串：1 字节存在标记 + 字符串
pub(crate) fn write_opt_str<W: Write>(w: &mut W, s: Option<&str>) -> io::Result<()> {
    match s {
        Some(s) => { w.write_u8(1)?; write_str(w, s) }
        None    => w.write_u8(0),
    }
}

pub(crate) fn read_opt_str<R: Read>(r: &mut R) -> io::Result<Option<String>> {
    match r.read_u8()? {
        0 => Ok(None),
        _ => read_str(r).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn time_range_overlap() {
        let r = TimeRange::new(10, 20);
        assert!(r.overlaps(&TimeRange::new(20, 30)));
        assert!(r.overlaps(&TimeRange::unbounded()));
        assert!(!r.overlaps(&TimeRange::new(21, 30)));
        assert!(TimeRange::new(5, 4).is_empty());
    }

    #[test]
    fn error_codes_are_nonzero() {
        let errs = [
            TsFileError::SchemaMismatch("x".into()),
            TsFileError::ChecksumMismatch,
            TsFileError::CapacityExceeded { row: 3, capacity: 2 },
        ];
        for e in &errs {
            assert_ne!(e.code(), E_OK);
        }
        assert_eq!(result_code(&Ok::<(), TsFileError>(())), E_OK);
    }

    #[test]
    fn optional_string_survives_encoding() {
        let mut buf = Vec::new();
        write_opt_str(&mut buf, Some("tag")).unwrap();
        write_opt_str(&mut buf, None).unwrap();
        let mut c = Cursor::new(buf);
        assert_eq!(read_opt_str(&mut c).unwrap().as_deref(), Some("tag"));
        assert_eq!(read_opt_str(&mut c).unwrap(), None);
    }
}
