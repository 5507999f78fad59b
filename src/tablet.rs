//! Tablet：写入前的列式缓冲区
//!
//! ```text
//!  row │ timestamp │ col 0 │ col 1 │ ...
//! ─────┼───────────┼───────┼───────┼─────
//!   0  │    t0     │  v    │ null  │
//!   1  │    t1     │ null  │  v    │
//!  ... │           │       │       │
//! ```
//!
//! 每列一段定长的类型化数组 + 一张存在位图（`BitVec`，置位表示有值）；时间戳同样有位图，
//! 只有设置过时间戳的行才会被写入器消费。Tablet 由调用方持有，写入器只读。

use std::collections::HashMap;

use bitvec::prelude::*;

use crate::common::{Result, Timestamp, TsFileError};
use crate::field_type::{ColumnCategory, TsDataType, Value};
use crate::meta::{MeasurementSchema, TableSchema};

/// 未指定容量时的默认行数
pub const DEFAULT_MAX_ROWS: usize = 1024;

// ── 列引用 ────────────────────────────────────────────────────────────────────

/// 按序号（从 0 开始）或名字引用列
#[derive(Debug, Clone, Copy)]
pub enum ColumnRef<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for ColumnRef<'_> {
    fn from(i: usize) -> Self { Self::Index(i) }
}
/// 未标注类型的整数字面量默认为 i32；负数按越界处理
impl From<i32> for ColumnRef<'_> {
    fn from(i: i32) -> Self { Self::Index(usize::try_from(i).unwrap_or(usize::MAX)) }
}
impl<'a> From<&'a str> for ColumnRef<'a> {
    fn from(s: &'a str) -> Self { Self::Name(s) }
}
impl<'a> From<&'a String> for ColumnRef<'a> {
    fn from(s: &'a String) -> Self { Self::Name(s.as_str()) }
}

// ── 列定义与数据 ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletColumn {
    pub name:      String,
    pub data_type: TsDataType,
    /// 表模型下可省略，由写入器按表定义补全
    pub category:  Option<ColumnCategory>,
}

#[derive(Debug, Clone)]
enum ColumnData {
    Boolean(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Binary(Vec<Vec<u8>>),
}

impl ColumnData {
    fn new(dt: TsDataType, n: usize) -> Self {
        match dt {
            TsDataType::Boolean                        => Self::Boolean(vec![false; n]),
            TsDataType::Int32 | TsDataType::Date       => Self::Int32(vec![0; n]),
            TsDataType::Int64 | TsDataType::Timestamp  => Self::Int64(vec![0; n]),
            TsDataType::Float                          => Self::Float(vec![0.0; n]),
            TsDataType::Double                         => Self::Double(vec![0.0; n]),
            TsDataType::Text | TsDataType::String
            | TsDataType::Blob                         => Self::Binary(vec![Vec::new(); n]),
        }
    }

    /// 调用前已做类型检查
    fn put(&mut self, row: usize, v: Value) {
        match (self, v) {
            (Self::Boolean(a), Value::Boolean(x)) => a[row] = x,
            (Self::Int32(a),   Value::Int32(x))   => a[row] = x,
            (Self::Int64(a),   Value::Int64(x))   => a[row] = x,
            (Self::Float(a),   Value::Float(x))   => a[row] = x,
            (Self::Double(a),  Value::Double(x))  => a[row] = x,
            (Self::Binary(a),  Value::Binary(x))  => a[row] = x,
            _ => {}
        }
    }

    fn get(&self, row: usize) -> Value {
        match self {
            Self::Boolean(a) => Value::Boolean(a[row]),
            Self::Int32(a)   => Value::Int32(a[row]),
            Self::Int64(a)   => Value::Int64(a[row]),
            Self::Float(a)   => Value::Float(a[row]),
            Self::Double(a)  => Value::Double(a[row]),
            Self::Binary(a)  => Value::Binary(a[row].clone()),
        }
    }

    fn clear_binary(&mut self) {
        if let Self::Binary(a) = self {
            a.iter_mut().for_each(Vec::clear);
        }
    }
}

// ── Tablet ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Tablet {
    /// 树模型为设备路径，表模型为表名（可为空，由写入器补全）
    target:           String,
    columns:          Vec<TabletColumn>,
    name_index:       HashMap<String, usize>,
    case_insensitive: bool,
    max_rows:         usize,
    timestamps:       Vec<Timestamp>,
    ts_present:       BitVec<u8, Lsb0>,
    data:             Vec<ColumnData>,
    present:          Vec<BitVec<u8, Lsb0>>,
}

impl Tablet {
    fn build(
        target:           &str,
        columns:          Vec<TabletColumn>,
        max_rows:         usize,
        case_insensitive: bool,
    ) -> Result<Self> {
        let mut name_index = HashMap::with_capacity(columns.len());
        for (i, c) in columns.iter().enumerate() {
            let key = if case_insensitive { c.name.to_lowercase() } else { c.name.clone() };
            if name_index.insert(key, i).is_some() {
                return Err(TsFileError::SchemaMismatch(format!("duplicate column {}", c.name)));
            }
        }
        let data = columns.iter().map(|c| ColumnData::new(c.data_type, max_rows)).collect();
        let present = columns.iter().map(|_| bitvec![u8, Lsb0; 0; max_rows]).collect();
        Ok(Self {
            target: target.into(), columns, name_index, case_insensitive, max_rows,
            timestamps: vec![0; max_rows],
            ts_present: bitvec![u8, Lsb0; 0; max_rows],
            data, present,
        })
    }

    /// 树模型：某设备下若干测点
    pub fn for_device(
        device_id:    &str,
        measurements: &[MeasurementSchema],
        max_rows:     usize,
    ) -> Result<Self> {
        let columns = measurements.iter()
            .map(|m| TabletColumn { name: m.name.clone(), data_type: m.data_type, category: None })
            .collect();
        Self::build(device_id, columns, max_rows, false)
    }

    /// 表模型：显式给出列名、类型与类别
    pub fn for_table(
        table_name: &str,
        names:      &[&str],
        types:      &[TsDataType],
        categories: &[ColumnCategory],
        max_rows:   usize,
    ) -> Result<Self> {
        if names.len() != types.len() || names.len() != categories.len() {
            return Err(TsFileError::SchemaMismatch(
                "column names, types and categories differ in length".into(),
            ));
        }
        let columns = names.iter().zip(types).zip(categories)
            .map(|((n, t), c)| TabletColumn { name: (*n).into(), data_type: *t, category: Some(*c) })
            .collect();
        Self::build(table_name, columns, max_rows, true)
    }

    /// 表模型：只给列名与类型，表名和类别取自写入器的表定义
    pub fn with_columns(names: &[&str], types: &[TsDataType], max_rows: usize) -> Result<Self> {
        if names.len() != types.len() {
            return Err(TsFileError::SchemaMismatch(
                "column names and types differ in length".into(),
            ));
        }
        let columns = names.iter().zip(types)
            .map(|(n, t)| TabletColumn { name: (*n).into(), data_type: *t, category: None })
            .collect();
        Self::build("", columns, max_rows, true)
    }

    /// 表模型：覆盖表定义中的全部列
    pub fn from_table_schema(schema: &TableSchema, max_rows: usize) -> Result<Self> {
        let columns = schema.columns().iter()
            .map(|c| TabletColumn {
                name: c.name.clone(), data_type: c.data_type, category: Some(c.category),
            })
            .collect();
        Self::build(&schema.table_name, columns, max_rows, true)
    }

    // ── 写入 ──────────────────────────────────────────────────────────────────

    pub fn add_timestamp(&mut self, row: usize, ts: Timestamp) -> Result<()> {
        self.check_row(row)?;
        self.timestamps[row] = ts;
        self.ts_present.set(row, true);
        Ok(())
    }

    /// 设置单元格；值的运行时类型必须匹配列声明类型
    pub fn add_value<'a, V: Into<Value>>(
        &mut self,
        row:    usize,
        column: impl Into<ColumnRef<'a>>,
        value:  V,
    ) -> Result<()> {
        self.check_row(row)?;
        let col = self.resolve(column.into())?;
        let value = value.into();
        let dt = self.columns[col].data_type;
        if !dt.accepts(&value) {
            return Err(TsFileError::type_mismatch(dt, value.kind_name()));
        }
        self.data[col].put(row, value);
        self.present[col].set(row, true);
        Ok(())
    }

    /// 清空全部单元格以便复用
    pub fn reset(&mut self) {
        self.ts_present.fill(false);
        for (d, p) in self.data.iter_mut().zip(self.present.iter_mut()) {
            d.clear_binary();
            p.fill(false);
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.max_rows {
            return Err(TsFileError::CapacityExceeded { row, capacity: self.max_rows });
        }
        Ok(())
    }

    // ── 读取（写入器使用）────────────────────────────────────────────────────

    pub fn resolve(&self, column: ColumnRef<'_>) -> Result<usize> {
        match column {
            ColumnRef::Index(i) if i < self.columns.len() => Ok(i),
            ColumnRef::Index(i) => Err(TsFileError::UnknownColumn(format!("#{i}"))),
            ColumnRef::Name(n)  => self.find_column(n)
                .ok_or_else(|| TsFileError::UnknownColumn(n.into())),
        }
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        if self.case_insensitive {
            self.name_index.get(&name.to_lowercase()).copied()
        } else {
            self.name_index.get(name).copied()
        }
    }

    pub fn target(&self) -> &str { &self.target }
    pub fn columns(&self) -> &[TabletColumn] { &self.columns }
    pub fn max_rows(&self) -> usize { self.max_rows }

    /// 最大已设时间戳行号 + 1
    pub fn row_count(&self) -> usize {
        self.ts_present.last_one().map_or(0, |r| r + 1)
    }

    pub fn timestamp(&self, row: usize) -> Option<Timestamp> {
        is_set(&self.ts_present, row).then(|| self.timestamps[row])
    }

    pub fn value(&self, row: usize, col: usize) -> Option<Value> {
        if col >= self.columns.len() || !is_set(&self.present[col], row) {
            return None;
        }
        Some(self.data[col].get(row))
    }

    pub fn is_null(&self, row: usize, col: usize) -> bool {
        self.present.get(col).map_or(true, |p| !is_set(p, row))
    }
}

/// 越界按未置位处理
fn is_set(bits: &BitSlice<u8, Lsb0>, i: usize) -> bool {
    bits.get(i).map_or(false, |b| *b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_tablet(rows: usize) -> Tablet {
        Tablet::for_table(
            "t1",
            &["id1", "s1"],
            &[TsDataType::String, TsDataType::Int64],
            &[ColumnCategory::Tag, ColumnCategory::Field],
            rows,
        ).unwrap()
    }

    #[test]
    fn values_by_name_and_index() {
        let mut t = table_tablet(4);
        t.add_timestamp(0, 100).unwrap();
        t.add_value(0, "ID1", "dev").unwrap();
        t.add_value(0, 1usize, 5i64).unwrap();
        assert_eq!(t.value(0, 0), Some(Value::from("dev")));
        assert_eq!(t.value(0, 1), Some(Value::Int64(5)));
        assert!(t.is_null(1, 1));
        assert_eq!(t.row_count(), 1);
    }

    #[test]
    fn type_mismatch_and_capacity() {
        let mut t = table_tablet(2);
        assert!(matches!(t.add_value(0, "s1", 1i32), Err(TsFileError::TypeMismatch { .. })));
        assert!(matches!(
            t.add_timestamp(2, 1),
            Err(TsFileError::CapacityExceeded { row: 2, capacity: 2 })
        ));
        assert!(matches!(t.add_value(0, "nope", 1i64), Err(TsFileError::UnknownColumn(_))));
    }

    #[test]
    fn row_count_follows_last_timestamp() {
        let mut t = table_tablet(8);
        t.add_value(6, "s1", 1i64).unwrap();
        assert_eq!(t.row_count(), 0);
        t.add_timestamp(3, 30).unwrap();
        assert_eq!(t.row_count(), 4);
        assert_eq!(t.timestamp(2), None);
        t.reset();
        assert_eq!(t.row_count(), 0);
        assert!(t.is_null(6, 1));
    }

    #[test]
    fn tree_tablet_is_case_sensitive() {
        let ms = [MeasurementSchema::new("S1", TsDataType::Int32)];
        let mut t = Tablet::for_device("root.d1", &ms, 4).unwrap();
        assert!(t.add_value(0, "s1", 1i32).is_err());
        t.add_value(0, "S1", 1i32).unwrap();
    }

    #[test]
    fn presence_bits_follow_writes_and_reset() {
        let ms = [MeasurementSchema::new("s", TsDataType::Int64)];
        let mut t = Tablet::for_device("root.d1", &ms, 10).unwrap();
        t.add_timestamp(0, 100).unwrap();
        t.add_timestamp(9, 109).unwrap();
        t.add_value(9, 0usize, 7i64).unwrap();
        assert_eq!(t.row_count(), 10);
        assert_eq!(t.timestamp(5), None);
        assert!(t.is_null(0, 0) && !t.is_null(9, 0));
        assert!(t.is_null(10, 0) && t.is_null(0, 1));
        assert_eq!(t.value(9, 0), Some(Value::Int64(7)));
        assert_eq!(t.present[0].count_ones(), 1);

        t.reset();
        assert_eq!(t.row_count(), 0);
        assert!(t.is_null(9, 0));
        assert_eq!(t.ts_present.len(), 10);
    }
}
