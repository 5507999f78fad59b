//! 数据类型、编码 / 压缩方式与运行时值

use std::cmp::Ordering;

use crate::common::{Result, TsFileError};

// ── 数据类型 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TsDataType {
    Boolean   = 0,
    Int32     = 1,
    Int64     = 2,
    Float     = 3,
    Double    = 4,
    Text      = 5,
    /// 日期存储为 i32（yyyyMMdd）
    Date      = 9,
    Timestamp = 8,
    Blob      = 10,
    String    = 11,
}

impl TsDataType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0  => Self::Boolean,
            1  => Self::Int32,
            2  => Self::Int64,
            3  => Self::Float,
            4  => Self::Double,
            5  => Self::Text,
            8  => Self::Timestamp,
            9  => Self::Date,
            10 => Self::Blob,
            11 => Self::String,
            _  => return None,
        })
    }

    /// 固定字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Boolean                 => Some(1),
            Self::Int32 | Self::Date      => Some(4),
            Self::Int64 | Self::Timestamp => Some(8),
            Self::Float                   => Some(4),
            Self::Double                  => Some(8),
            Self::Text | Self::String | Self::Blob => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Date | Self::Timestamp)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Float | Self::Double)
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::Text | Self::String | Self::Blob)
    }

    /// 该类型列能否接收此运行时值
    pub fn accepts(self, v: &Value) -> bool {
        matches!(
            (self, v),
            (Self::Boolean, Value::Boolean(_))
                | (Self::Int32 | Self::Date, Value::Int32(_))
                | (Self::Int64 | Self::Timestamp, Value::Int64(_))
                | (Self::Float, Value::Float(_))
                | (Self::Double, Value::Double(_))
                | (Self::Text | Self::String | Self::Blob, Value::Binary(_))
        )
    }

    /// 未显式指定时的默认编码
    pub fn default_encoding(self) -> EncodingType {
        match self {
            Self::Boolean                          => EncodingType::Rle,
            Self::Int32 | Self::Int64
            | Self::Date | Self::Timestamp         => EncodingType::Ts2Diff,
            Self::Float | Self::Double             => EncodingType::Gorilla,
            Self::Text | Self::String | Self::Blob => EncodingType::Plain,
        }
    }
}

impl std::fmt::Display for TsDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Boolean   => "BOOLEAN",
            Self::Int32     => "INT32",
            Self::Int64     => "INT64",
            Self::Float     => "FLOAT",
            Self::Double    => "DOUBLE",
            Self::Text      => "TEXT",
            Self::Date      => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Blob      => "BLOB",
            Self::String    => "STRING",
        };
        f.write_str(s)
    }
}

// ── 编码 / 压缩 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EncodingType {
    Plain      = 0,
    /// 字典 + varint 码，适合重复度高的字符串列
    Dictionary = 1,
    /// (run, value) 对，适合低基数列
    Rle        = 2,
    /// 二阶差分 + zigzag varint，适合时间戳和单调整数
    Ts2Diff    = 4,
    /// XOR 浮点压缩
    Gorilla    = 8,
}

impl EncodingType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Plain,
            1 => Self::Dictionary,
            2 => Self::Rle,
            4 => Self::Ts2Diff,
            8 => Self::Gorilla,
            _ => return None,
        })
    }

    /// (类型, 编码) 组合是否受支持
    pub fn supports(self, dt: TsDataType) -> bool {
        match self {
            Self::Plain | Self::Rle => true,
            Self::Ts2Diff           => dt.is_integer(),
            Self::Gorilla           => matches!(dt, TsDataType::Float | TsDataType::Double),
            Self::Dictionary        => dt.is_binary(),
        }
    }

    pub fn check(self, dt: TsDataType) -> Result<()> {
        if self.supports(dt) {
            Ok(())
        } else {
            Err(TsFileError::Unsupported(format!("encoding {self:?} for {dt}")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionType {
    Uncompressed = 0,
    Lz4          = 7,
}

impl CompressionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Uncompressed),
            7 => Some(Self::Lz4),
            _ => None,
        }
    }
}

/// 表模型中的列类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColumnCategory {
    /// 参与设备标识
    Tag   = 0,
    /// 测量值
    Field = 1,
}

impl ColumnCategory {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Tag),
            1 => Some(Self::Field),
            _ => None,
        }
    }
}

// ── 运行时值 ──────────────────────────────────────────────────────────────────

/// 非空单元格的值；空值由外层 `Option` / 位图表示
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    /// TEXT / STRING / BLOB
    Binary(Vec<u8>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Int32(_)   => "int32",
            Self::Int64(_)   => "int64",
            Self::Float(_)   => "float",
            Self::Double(_)  => "double",
            Self::Binary(_)  => "binary",
        }
    }

    /// 同类比较；类型不同返回 None。浮点按 IEEE-754 partial_cmp。
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Int32(a),   Self::Int32(b))   => Some(a.cmp(b)),
            (Self::Int64(a),   Self::Int64(b))   => Some(a.cmp(b)),
            (Self::Float(a),   Self::Float(b))   => a.partial_cmp(b),
            (Self::Double(a),  Self::Double(b))  => a.partial_cmp(b),
            (Self::Binary(a),  Self::Binary(b))  => Some(a.as_slice().cmp(b.as_slice())),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v)  => Some(*v as f64),
            Self::Int64(v)  => Some(*v as f64),
            Self::Float(v)  => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// 估算内存占用，用于写入阈值统计
    pub fn mem_size(&self) -> usize {
        match self {
            Self::Boolean(_)                  => 1,
            Self::Int32(_) | Self::Float(_)   => 4,
            Self::Int64(_) | Self::Double(_)  => 8,
            Self::Binary(b)                   => b.len() + 4,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int32(v)   => write!(f, "{v}"),
            Self::Int64(v)   => write!(f, "{v}"),
            Self::Float(v)   => write!(f, "{v}"),
            Self::Double(v)  => write!(f, "{v}"),
            Self::Binary(b)  => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<bool>    for Value { fn from(v: bool)    -> Self { Self::Boolean(v) } }
impl From<i32>     for Value { fn from(v: i32)     -> Self { Self::Int32(v) } }
impl From<i64>     for Value { fn from(v: i64)     -> Self { Self::Int64(v) } }
impl From<f32>     for Value { fn from(v: f32)     -> Self { Self::Float(v) } }
impl From<f64>     for Value { fn from(v: f64)     -> Self { Self::Double(v) } }
impl From<&str>    for Value { fn from(v: &str)    -> Self { Self::Binary(v.as_bytes().to_vec()) } }
impl From<String>  for Value { fn from(v: String)  -> Self { Self::Binary(v.into_bytes()) } }
impl From<Vec<u8>> for Value { fn from(v: Vec<u8>) -> Self { Self::Binary(v) } }

// ── 类型化读取 ────────────────────────────────────────────────────────────────

/// 从 [`Value`] 按声明类型严格取值，类型不符返回 TypeMismatch
pub trait FromValue: Sized {
    const NAME: &'static str;
    fn from_value(v: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($t:ty, $name:expr, $variant:ident) => {
        impl FromValue for $t {
            const NAME: &'static str = $name;
            fn from_value(v: &Value) -> Option<Self> {
                match v { Value::$variant(x) => Some(x.clone()), _ => None }
            }
        }
    };
}

impl_from_value!(bool,    "boolean", Boolean);
impl_from_value!(i32,     "int32",   Int32);
impl_from_value!(i64,     "int64",   Int64);
impl_from_value!(f32,     "float",   Float);
impl_from_value!(f64,     "double",  Double);
impl_from_value!(Vec<u8>, "binary",  Binary);

impl FromValue for String {
    const NAME: &'static str = "string";
    fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Binary(b) => String::from_utf8(b.clone()).ok(),
            _ => None,
        }
    }
}

/// 不做类型检查，原样取出
impl FromValue for Value {
    const NAME: &'static str = "value";
    fn from_value(v: &Value) -> Option<Self> { Some(v.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_and_timestamp_accept_their_physical_kinds() {
        assert!(TsDataType::Date.accepts(&Value::Int32(20240101)));
        assert!(TsDataType::Timestamp.accepts(&Value::Int64(1)));
        assert!(!TsDataType::Int64.accepts(&Value::Int32(1)));
        assert!(TsDataType::Blob.accepts(&Value::from("x")));
    }

    #[test]
    fn encoding_support_matrix() {
        assert!(EncodingType::Gorilla.supports(TsDataType::Double));
        assert!(!EncodingType::Gorilla.supports(TsDataType::Int64));
        assert!(EncodingType::Ts2Diff.supports(TsDataType::Date));
        assert!(EncodingType::Dictionary.check(TsDataType::Int32).is_err());
        for dt in [TsDataType::Boolean, TsDataType::Text, TsDataType::Float] {
            assert!(dt.default_encoding().supports(dt));
        }
    }

    #[test]
    fn compare_is_strictly_typed() {
        assert_eq!(Value::Int32(1).compare(&Value::Int32(2)), Some(Ordering::Less));
        assert_eq!(Value::Int32(1).compare(&Value::Int64(1)), None);
        assert_eq!(Value::from("b").compare(&Value::from("ab")), Some(Ordering::Greater));
        assert_eq!(Value::Double(f64::NAN).compare(&Value::Double(1.0)), None);
    }

    #[test]
    fn from_value_rejects_other_kinds() {
        assert_eq!(i64::from_value(&Value::Int64(7)), Some(7));
        assert_eq!(i32::from_value(&Value::Int64(7)), None);
        assert_eq!(String::from_value(&Value::from("hi")).as_deref(), Some("hi"));
    }
}
