//! 页 / Chunk / 序列级统计信息
//!
//! 统计只覆盖非空值：`count` 为非空值个数，`null_count` 记录对齐值列中的空行。
//! 时间列的统计只使用 `count` 与时间范围。

use std::cmp::Ordering;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{read_bytes, write_bytes, TimeRange, Timestamp};
use crate::field_type::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    pub count:      u64,
    pub null_count: u64,
    pub start_time: Timestamp,
    pub end_time:   Timestamp,
    pub min:        Option<Value>,
    pub max:        Option<Value>,
    /// 时间最早的值
    pub first:      Option<Value>,
    /// 时间最晚的值
    pub last:       Option<Value>,
    /// 仅数值类型
    pub sum:        Option<f64>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            count: 0, null_count: 0,
            start_time: Timestamp::MAX, end_time: Timestamp::MIN,
            min: None, max: None, first: None, last: None, sum: None,
        }
    }
}

impl Statistics {
    pub fn new() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// 非空值覆盖的时间范围
    pub fn time_range(&self) -> TimeRange { TimeRange::new(self.start_time, self.end_time) }

    /// 时间列：只记录时间
    pub fn update_time(&mut self, ts: Timestamp) {
        self.count += 1;
        self.start_time = self.start_time.min(ts);
        self.end_time   = self.end_time.max(ts);
    }

    pub fn update(&mut self, ts: Timestamp, v: &Value) {
        if self.first.is_none() || ts < self.start_time {
            self.first = Some(v.clone());
        }
        if self.last.is_none() || ts >= self.end_time {
            self.last = Some(v.clone());
        }
        self.update_time(ts);

        // NaN 与自身无序，不进入 min/max
        if v.compare(v).is_some() {
            if self.min.as_ref().map_or(true, |m| v.compare(m) == Some(Ordering::Less)) {
                self.min = Some(v.clone());
            }
            if self.max.as_ref().map_or(true, |m| v.compare(m) == Some(Ordering::Greater)) {
                self.max = Some(v.clone());
            }
        }
        if let Some(x) = v.as_f64() {
            *self.sum.get_or_insert(0.0) += x;
        }
    }

    pub fn update_null(&mut self) {
        self.null_count += 1;
    }

    /// 合并另一段统计（页 → chunk → 序列）
    pub fn merge(&mut self, other: &Statistics) {
        if other.count == 0 {
            self.null_count += other.null_count;
            return;
        }
        if self.count == 0 || other.start_time < self.start_time {
            self.first = other.first.clone();
        }
        if self.count == 0 || other.end_time >= self.end_time {
            self.last = other.last.clone();
        }
        if let Some(m) = &other.min {
            if self.min.as_ref().map_or(true, |cur| m.compare(cur) == Some(Ordering::Less)) {
                self.min = Some(m.clone());
            }
        }
        if let Some(m) = &other.max {
            if self.max.as_ref().map_or(true, |cur| m.compare(cur) == Some(Ordering::Greater)) {
                self.max = Some(m.clone());
            }
        }
        if let Some(s) = other.sum {
            *self.sum.get_or_insert(0.0) += s;
        }
        self.count      += other.count;
        self.null_count += other.null_count;
        self.start_time  = self.start_time.min(other.start_time);
        self.end_time    = self.end_time.max(other.end_time);
    }

    // ── 序列化 ────────────────────────────────────────────────────────────────
    //
    // count u64 | null_count u64 | start i64 | end i64
    // | min | max | first | last  (各自带类型标签，0 = 缺失)
    // | has_sum u8 [sum f64]

    pub(crate) fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.count)?;
        w.write_u64::<LittleEndian>(self.null_count)?;
        w.write_i64::<LittleEndian>(self.start_time)?;
        w.write_i64::<LittleEndian>(self.end_time)?;
        for v in [&self.min, &self.max, &self.first, &self.last] {
            write_tagged(w, v.as_ref())?;
        }
        match self.sum {
            Some(s) => { w.write_u8(1)?; w.write_f64::<LittleEndian>(s) }
            None    => w.write_u8(0),
        }
    }

    pub(crate) fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let count      = r.read_u64::<LittleEndian>()?;
        let null_count = r.read_u64::<LittleEndian>()?;
        let start_time = r.read_i64::<LittleEndian>()?;
        let end_time   = r.read_i64::<LittleEndian>()?;
        let min   = read_tagged(r)?;
        let max   = read_tagged(r)?;
        let first = read_tagged(r)?;
        let last  = read_tagged(r)?;
        let sum = match r.read_u8()? {
            0 => None,
            _ => Some(r.read_f64::<LittleEndian>()?),
        };
        Ok(Self { count, null_count, start_time, end_time, min, max, first, last, sum })
    }
}

fn write_tagged<W: Write>(w: &mut W, v: Option<&Value>) -> io::Result<()> {
    match v {
        None                    => w.write_u8(0),
        Some(Value::Boolean(x)) => { w.write_u8(1)?; w.write_u8(*x as u8) }
        Some(Value::Int32(x))   => { w.write_u8(2)?; w.write_i32::<LittleEndian>(*x) }
        Some(Value::Int64(x))   => { w.write_u8(3)?; w.write_i64::<LittleEndian>(*x) }
        Some(Value::Float(x))   => { w.write_u8(4)?; w.write_f32::<LittleEndian>(*x) }
        Some(Value::Double(x))  => { w.write_u8(5)?; w.write_f64::<LittleEndian>(*x) }
        Some(Value::Binary(b))  => { w.write_u8(6)?; write_bytes(w, b) }
    }
}

fn read_tagged<R: Read>(r: &mut R) -> io::Result<Option<Value>> {
    let v = match r.read_u8()? {
        0 => return Ok(None),
        1 => Value::Boolean(r.read_u8()? != 0),
        2 => Value::Int32(r.read_i32::<LittleEndian>()?),
        3 => Value::Int64(r.read_i64::<LittleEndian>()?),
        4 => Value::Float(r.read_f32::<LittleEndian>()?),
        5 => Value::Double(r.read_f64::<LittleEndian>()?),
        6 => Value::Binary(read_bytes(r)?),
        t => return Err(io::Error::new(
            io::ErrorKind::InvalidData, format!("invalid statistics value tag {t}"),
        )),
    };
    Ok(Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stats_of(points: &[(i64, i64)]) -> Statistics {
        let mut s = Statistics::new();
        for (t, v) in points {
            s.update(*t, &Value::Int64(*v));
        }
        s
    }

    #[test]
    fn update_tracks_extremes_and_edges() {
        let s = stats_of(&[(1, 5), (2, -3), (3, 9)]);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, Some(Value::Int64(-3)));
        assert_eq!(s.max, Some(Value::Int64(9)));
        assert_eq!(s.first, Some(Value::Int64(5)));
        assert_eq!(s.last, Some(Value::Int64(9)));
        assert_eq!(s.sum, Some(11.0));
        assert_eq!(s.time_range(), TimeRange::new(1, 3));
    }

    #[test]
    fn merge_respects_time_order() {
        let mut late = stats_of(&[(10, 1), (11, 2)]);
        let early = stats_of(&[(0, 100)]);
        late.merge(&early);
        assert_eq!(late.first, Some(Value::Int64(100)));
        assert_eq!(late.last, Some(Value::Int64(2)));
        assert_eq!(late.max, Some(Value::Int64(100)));
        assert_eq!(late.count, 3);
        assert_eq!(late.start_time, 0);
    }

    #[test]
    fn nulls_only_bump_null_count() {
        let mut s = Statistics::new();
        s.update_null();
        s.update_null();
        assert!(s.is_empty());
        assert_eq!(s.null_count, 2);

        let mut total = stats_of(&[(1, 1)]);
        total.merge(&s);
        assert_eq!(total.count, 1);
        assert_eq!(total.null_count, 2);
    }

    #[test]
    fn nan_stays_out_of_min_max() {
        let mut s = Statistics::new();
        s.update(0, &Value::Double(f64::NAN));
        s.update(1, &Value::Double(2.0));
        assert_eq!(s.count, 2);
        assert_eq!(s.min, Some(Value::Double(2.0)));
        assert_eq!(s.max, Some(Value::Double(2.0)));
    }

    #[test]
    fn strings_have_no_sum() {
        let mut s = Statistics::new();
        s.update(1, &Value::from("b"));
        s.update(2, &Value::from("a"));
        assert_eq!(s.sum, None);
        assert_eq!(s.min, Some(Value::from("a")));

        let mut buf = Vec::new();
        s.serialize(&mut buf).unwrap();
        assert_eq!(Statistics::deserialize(&mut Cursor::new(buf)).unwrap(), s);
    }
}
