//! 查询结果游标
//!
//! ```text
//!   Before ──next()=true──▶ Positioned ──next()=false──▶ Exhausted
//!     │                       │    ▲                        │
//!     │                       └────┘ next()=true            │ next()=false
//!     └──────────── close() ──────────▶ Closed ◀── close() ─┘
//! ```
//!
//! 第 1 列总是时间列 `time`，请求的列从第 2 列开始。列可以按序号
//! （从 1 开始）或名字引用；表模型下名字大小写不敏感。

use std::collections::{HashMap, VecDeque};

use crate::common::{Result, Timestamp, TsFileError};
use crate::field_type::{FromValue, TsDataType, Value};
use crate::filter::Pred;
use crate::scan::RowSource;
use crate::tablet::ColumnRef;

pub const TIME_COLUMN: &str = "time";

// ── 行流 ──────────────────────────────────────────────────────────────────────

/// 输出列的来源
#[derive(Debug, Clone)]
pub(crate) enum Proj {
    /// 数据源行中的槽位
    Slot(usize),
    /// 对整个流不变的值（表模型的 TAG 列）
    Const(Option<Value>),
}

/// 一个数据源 + 行级过滤 + 投影
pub(crate) struct RowStream {
    source:     Box<dyn RowSource>,
    pred:       Option<Pred>,
    proj:       Vec<Proj>,
    skip_empty: bool,
}

impl RowStream {
    pub fn new(source: Box<dyn RowSource>, pred: Option<Pred>, proj: Vec<Proj>) -> Self {
        Self { source, pred, proj, skip_empty: false }
    }

    /// 投影后全部为空的行不输出
    pub fn skip_empty(mut self) -> Self {
        self.skip_empty = true;
        self
    }

    fn next_row(&mut self) -> Result<Option<(Timestamp, Vec<Option<Value>>)>> {
        while let Some((ts, cells)) = self.source.pop()? {
            if let Some(p) = &self.pred {
                if !p.eval_row(ts, &cells) {
                    continue;
                }
            }
            let out: Vec<Option<Value>> = self.proj.iter()
                .map(|p| match p {
                    Proj::Slot(i)  => cells.get(*i).cloned().flatten(),
                    Proj::Const(v) => v.clone(),
                })
                .collect();
            if self.skip_empty && out.iter().all(Option::is_none) {
                continue;
            }
            return Ok(Some((ts, out)));
        }
        Ok(None)
    }
}

// ── 元数据 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResultSetMetadata {
    names: Vec<String>,
    types: Vec<TsDataType>,
}

impl ResultSetMetadata {
    /// `columns` 不含时间列
    pub(crate) fn new(columns: Vec<(String, TsDataType)>) -> Self {
        let mut names = vec![TIME_COLUMN.to_string()];
        let mut types = vec![TsDataType::Int64];
        for (n, t) in columns {
            names.push(n);
            types.push(t);
        }
        Self { names, types }
    }

    /// 含时间列
    pub fn column_count(&self) -> usize { self.names.len() }

    /// 序号从 1 开始
    pub fn column_name(&self, ordinal: usize) -> Result<&str> {
        self.check(ordinal).map(|i| self.names[i].as_str())
    }

    pub fn column_type(&self, ordinal: usize) -> Result<TsDataType> {
        self.check(ordinal).map(|i| self.types[i])
    }

    fn check(&self, ordinal: usize) -> Result<usize> {
        if ordinal == 0 || ordinal > self.names.len() {
            return Err(TsFileError::UnknownColumn(format!("column ordinal {ordinal}")));
        }
        Ok(ordinal - 1)
    }
}

// ── ResultSet ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Before,
    Positioned,
    Exhausted,
    Closed,
}

pub struct ResultSet {
    meta:             ResultSetMetadata,
    lookup:           HashMap<String, usize>,
    case_insensitive: bool,
    streams:          VecDeque<RowStream>,
    state:            CursorState,
    time:             Timestamp,
    row:              Vec<Option<Value>>,
}

impl ResultSet {
    pub(crate) fn new(meta: ResultSetMetadata, streams: Vec<RowStream>, case_insensitive: bool) -> Self {
        let mut lookup = HashMap::with_capacity(meta.names.len());
        for (i, n) in meta.names.iter().enumerate() {
            let key = if case_insensitive { n.to_lowercase() } else { n.clone() };
            lookup.entry(key).or_insert(i);
        }
        Self {
            meta, lookup, case_insensitive,
            streams: streams.into(),
            state: CursorState::Before,
            time: 0, row: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &ResultSetMetadata { &self.meta }

    pub fn state(&self) -> CursorState { self.state }

    /// 前进一行；耗尽后重复调用总是返回 false
    pub fn next(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Closed    => return Err(TsFileError::InvalidState("result set is closed".into())),
            CursorState::Exhausted => return Ok(false),
            _ => {}
        }
        while let Some(stream) = self.streams.front_mut() {
            match stream.next_row()? {
                Some((ts, row)) => {
                    self.time = ts;
                    self.row = row;
                    self.state = CursorState::Positioned;
                    return Ok(true);
                }
                None => { self.streams.pop_front(); }
            }
        }
        self.state = CursorState::Exhausted;
        self.row.clear();
        Ok(false)
    }

    /// 当前行的时间戳
    pub fn timestamp(&self) -> Result<Timestamp> {
        self.positioned()?;
        Ok(self.time)
    }

    pub fn get_value<'a, T: FromValue>(&self, column: impl Into<ColumnRef<'a>>) -> Result<T> {
        let idx = self.resolve(column.into())?;
        match self.cell(idx)? {
            Some(v) => T::from_value(&v).ok_or_else(|| TsFileError::type_mismatch(T::NAME, v.kind_name())),
            None => Err(TsFileError::type_mismatch(T::NAME, "null")),
        }
    }

    /// 空值返回 `Ok(None)`
    pub fn get_opt<'a, T: FromValue>(&self, column: impl Into<ColumnRef<'a>>) -> Result<Option<T>> {
        let idx = self.resolve(column.into())?;
        match self.cell(idx)? {
            Some(v) => T::from_value(&v)
                .map(Some)
                .ok_or_else(|| TsFileError::type_mismatch(T::NAME, v.kind_name())),
            None => Ok(None),
        }
    }

    pub fn is_null<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Result<bool> {
        let idx = self.resolve(column.into())?;
        Ok(self.cell(idx)?.is_none())
    }

    /// 释放数据源；重复关闭无副作用
    pub fn close(&mut self) {
        self.streams.clear();
        self.row.clear();
        self.state = CursorState::Closed;
    }

    fn positioned(&self) -> Result<()> {
        match self.state {
            CursorState::Positioned => Ok(()),
            CursorState::Before     => Err(TsFileError::InvalidState("next() has not been called".into())),
            CursorState::Exhausted  => Err(TsFileError::InvalidState("result set is exhausted".into())),
            CursorState::Closed     => Err(TsFileError::InvalidState("result set is closed".into())),
        }
    }

    /// 0 为时间列
    fn cell(&self, idx: usize) -> Result<Option<Value>> {
        self.positioned()?;
        Ok(match idx {
            0 => Some(Value::Int64(self.time)),
            i => self.row.get(i - 1).cloned().flatten(),
        })
    }

    /// 序号从 1 开始
    fn resolve(&self, column: ColumnRef<'_>) -> Result<usize> {
        match column {
            ColumnRef::Index(i) => self.meta.check(i),
            ColumnRef::Name(n) => {
                let found = if self.case_insensitive {
                    self.lookup.get(&n.to_lowercase())
                } else {
                    self.lookup.get(n)
                };
                found.copied().ok_or_else(|| TsFileError::UnknownColumn(n.to_string()))
            }
        }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Cells;

    struct Rows(VecDeque<(Timestamp, Cells)>);

    impl RowSource for Rows {
        fn peek(&mut self) -> Result<Option<Timestamp>> { Ok(self.0.front().map(|r| r.0)) }
        fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>> { Ok(self.0.pop_front()) }
        fn width(&self) -> usize { 1 }
    }

    fn one_column(values: Vec<Option<i64>>) -> ResultSet {
        let rows = values.into_iter().enumerate()
            .map(|(i, v)| (i as Timestamp, vec![v.map(Value::Int64)]))
            .collect();
        let stream = RowStream::new(Box::new(Rows(rows)), None, vec![Proj::Slot(0)]);
        let meta = ResultSetMetadata::new(vec![("Speed".into(), TsDataType::Int64)]);
        ResultSet::new(meta, vec![stream], true)
    }

    #[test]
    fn cursor_lifecycle() {
        let mut rs = one_column(vec![Some(7), None]);
        assert!(matches!(rs.get_value::<i64>(2), Err(TsFileError::InvalidState(_))));

        assert!(rs.next().unwrap());
        assert_eq!(rs.get_value::<i64>("speed").unwrap(), 7);
        assert_eq!(rs.get_value::<i64>(1).unwrap(), 0);
        assert!(matches!(rs.get_value::<f64>(2), Err(TsFileError::TypeMismatch { .. })));

        assert!(rs.next().unwrap());
        assert!(rs.is_null("SPEED").unwrap());
        assert_eq!(rs.get_opt::<i64>(2).unwrap(), None);

        assert!(!rs.next().unwrap());
        assert!(!rs.next().unwrap());
        assert!(matches!(rs.is_null(2), Err(TsFileError::InvalidState(_))));

        rs.close();
        rs.close();
        assert!(rs.next().is_err());
    }

    #[test]
    fn unknown_columns_are_reported() {
        let mut rs = one_column(vec![Some(1)]);
        rs.next().unwrap();
        assert!(matches!(rs.is_null("nope"), Err(TsFileError::UnknownColumn(_))));
        assert!(matches!(rs.is_null(3), Err(TsFileError::UnknownColumn(_))));
        assert_eq!(rs.metadata().column_name(1).unwrap(), "time");
        assert_eq!(rs.metadata().column_type(2).unwrap(), TsDataType::Int64);
        assert_eq!(rs.metadata().column_count(), 2);
    }
}
