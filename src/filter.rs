//! 谓词过滤
//!
//! 用户构建 [`Filter`] 表达式树（列按名字引用），查询时绑定成 [`Pred`]：
//! 列名解析为结果行中的槽位，表模型 TAG 列在每个设备上直接求值为常量。
//!
//! `Pred` 有两种求值：
//!   - `eval_stats`：基于页 / chunk 统计的三值判断，`Never` 必须可靠
//!   - `eval_row`  ：基于完整行的精确判断，空值参与的比较为 false；
//!     NaN 按 IEEE 754：只有 `!=` 成立

use std::cmp::Ordering;

use crate::common::{Result, TimeRange, Timestamp, TsFileError};
use crate::field_type::{TsDataType, Value};
use crate::statistics::Statistics;

// ── 比较运算 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// `value op literal` 在给定序关系下是否成立
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            Self::Eq    => ord == Ordering::Equal,
            Self::NotEq => ord != Ordering::Equal,
            Self::Lt    => ord == Ordering::Less,
            Self::LtEq  => ord != Ordering::Greater,
            Self::Gt    => ord == Ordering::Greater,
            Self::GtEq  => ord != Ordering::Less,
        }
    }
}

// ── Filter（用户表达式）──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// lo <= time <= hi
    Time { lo: Timestamp, hi: Timestamp },
    /// column op literal
    Value { column: String, op: CompareOp, value: Value },
    /// 表模型：TAG 列等于给定值
    TagEq { column: String, value: String },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn time_between(lo: Timestamp, hi: Timestamp) -> Self { Self::Time { lo, hi } }
    pub fn time_eq(t: Timestamp) -> Self { Self::Time { lo: t, hi: t } }
    pub fn time_gt(t: Timestamp) -> Self {
        match t.checked_add(1) {
            Some(lo) => Self::Time { lo, hi: Timestamp::MAX },
            None     => Self::Time { lo: 1, hi: 0 },
        }
    }
    pub fn time_ge(t: Timestamp) -> Self { Self::Time { lo: t, hi: Timestamp::MAX } }
    pub fn time_lt(t: Timestamp) -> Self {
        match t.checked_sub(1) {
            Some(hi) => Self::Time { lo: Timestamp::MIN, hi },
            None     => Self::Time { lo: 1, hi: 0 },
        }
    }
    pub fn time_le(t: Timestamp) -> Self { Self::Time { lo: Timestamp::MIN, hi: t } }

    pub fn value(column: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Value { column: column.into(), op, value: value.into() }
    }

    pub fn tag_eq(column: &str, value: &str) -> Self {
        Self::TagEq { column: column.into(), value: value.into() }
    }

    pub fn and(self, other: Filter) -> Self { Self::And(Box::new(self), Box::new(other)) }
    pub fn or(self, other: Filter) -> Self { Self::Or(Box::new(self), Box::new(other)) }

    /// 表达式引用到的所有列名（含 TAG 列）
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Time { .. } => {}
            Self::Value { column, .. } | Self::TagEq { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Self::Not(a) => a.collect_columns(out),
        }
    }

    /// 绑定到具体查询。`resolve` 把列名映射到槽位或设备上的 TAG 值。
    pub(crate) fn bind(&self, resolve: &mut dyn FnMut(&str) -> Result<Binding>) -> Result<Pred> {
        Ok(match self {
            Self::Time { lo, hi } => Pred::Time { lo: *lo, hi: *hi },
            Self::Value { column, op, value } => match resolve(column)? {
                Binding::Slot(slot, dt) => {
                    check_literal(dt, value)?;
                    Pred::Cmp {
                        slot, op: *op, value: value.clone(),
                        inexact: matches!(dt, TsDataType::Float | TsDataType::Double),
                    }
                }
                Binding::Tag(tag) => {
                    check_literal(TsDataType::String, value)?;
                    let hit = tag
                        .and_then(|t| Value::from(t).compare(value))
                        .is_some_and(|ord| op.matches(ord));
                    Pred::Const(hit)
                }
            },
            Self::TagEq { column, value } => match resolve(column)? {
                Binding::Tag(tag) => Pred::Const(tag.as_deref() == Some(value.as_str())),
                Binding::Slot(..) => {
                    return Err(TsFileError::InvalidFilter(format!("{column} is not a TAG column")));
                }
            },
            Self::And(a, b) => Pred::And(Box::new(a.bind(resolve)?), Box::new(b.bind(resolve)?)),
            Self::Or(a, b)  => Pred::Or(Box::new(a.bind(resolve)?), Box::new(b.bind(resolve)?)),
            Self::Not(a)    => Pred::Not(Box::new(a.bind(resolve)?)),
        })
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;
    fn not(self) -> Filter { Filter::Not(Box::new(self)) }
}

fn check_literal(dt: TsDataType, v: &Value) -> Result<()> {
    if dt.accepts(v) {
        Ok(())
    } else {
        Err(TsFileError::type_mismatch(dt, v.kind_name()))
    }
}

/// 列名绑定结果
pub(crate) enum Binding {
    /// 结果行中的槽位及其类型
    Slot(usize, TsDataType),
    /// 当前设备上该 TAG 列的取值
    Tag(Option<String>),
}

// ── 三值逻辑 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Truth {
    Never,
    Maybe,
    Always,
}

impl Truth {
    fn and(self, o: Truth) -> Truth {
        match (self, o) {
            (Truth::Never, _) | (_, Truth::Never)   => Truth::Never,
            (Truth::Always, Truth::Always)          => Truth::Always,
            _                                       => Truth::Maybe,
        }
    }
    fn or(self, o: Truth) -> Truth {
        match (self, o) {
            (Truth::Always, _) | (_, Truth::Always) => Truth::Always,
            (Truth::Never, Truth::Never)            => Truth::Never,
            _                                       => Truth::Maybe,
        }
    }
    fn not(self) -> Truth {
        match self {
            Truth::Never  => Truth::Always,
            Truth::Maybe  => Truth::Maybe,
            Truth::Always => Truth::Never,
        }
    }
    fn from_bool(b: bool) -> Truth { if b { Truth::Always } else { Truth::Never } }
}

// ── Pred（绑定后的表达式）────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum Pred {
    Time { lo: Timestamp, hi: Timestamp },
    /// `inexact` 为浮点列：NaN 不进入 min/max，不能断言 Always，
    /// `!=` 也不能断言 Never（NaN 行满足 `!=`）
    Cmp { slot: usize, op: CompareOp, value: Value, inexact: bool },
    Const(bool),
    And(Box<Pred>, Box<Pred>),
    Or(Box<Pred>, Box<Pred>),
    Not(Box<Pred>),
}

impl Pred {
    /// `time`：该页 / chunk 所有行的时间范围；`stats(slot)`：该槽位的值统计，
    /// 不可用时返回 None（按 Maybe 处理）
    pub fn eval_stats<'a, F>(&self, time: TimeRange, stats: &F) -> Truth
    where
        F: Fn(usize) -> Option<&'a Statistics>,
    {
        match self {
            Pred::Time { lo, hi } => {
                if *hi < time.start || *lo > time.end || lo > hi {
                    Truth::Never
                } else if *lo <= time.start && time.end <= *hi {
                    Truth::Always
                } else {
                    Truth::Maybe
                }
            }
            Pred::Cmp { slot, op, value, inexact } => match stats(*slot) {
                Some(s) => match cmp_stats(s, *op, value) {
                    Truth::Always if *inexact => Truth::Maybe,
                    Truth::Never if *inexact && *op == CompareOp::NotEq && s.count > 0 => Truth::Maybe,
                    t => t,
                },
                None => Truth::Maybe,
            },
            Pred::Const(b)  => Truth::from_bool(*b),
            Pred::And(a, b) => a.eval_stats(time, stats).and(b.eval_stats(time, stats)),
            Pred::Or(a, b)  => a.eval_stats(time, stats).or(b.eval_stats(time, stats)),
            Pred::Not(a)    => a.eval_stats(time, stats).not(),
        }
    }

    pub fn eval_row(&self, ts: Timestamp, cells: &[Option<Value>]) -> bool {
        match self {
            Pred::Time { lo, hi } => *lo <= ts && ts <= *hi,
            Pred::Cmp { slot, op, value, .. } => match cells.get(*slot).and_then(|c| c.as_ref()) {
                Some(v) => match v.compare(value) {
                    Some(ord) => op.matches(ord),
                    // 无序（NaN）
                    None => *op == CompareOp::NotEq,
                },
                None => false,
            },
            Pred::Const(b)  => *b,
            Pred::And(a, b) => a.eval_row(ts, cells) && b.eval_row(ts, cells),
            Pred::Or(a, b)  => a.eval_row(ts, cells) || b.eval_row(ts, cells),
            Pred::Not(a)    => !a.eval_row(ts, cells),
        }
    }

    /// 表达式成立时时间戳必然落在的范围（保守）
    pub fn time_bounds(&self) -> TimeRange {
        match self {
            Pred::Time { lo, hi } => TimeRange::new(*lo, *hi),
            Pred::And(a, b) => {
                let (x, y) = (a.time_bounds(), b.time_bounds());
                TimeRange::new(x.start.max(y.start), x.end.min(y.end))
            }
            Pred::Or(a, b) => {
                let (x, y) = (a.time_bounds(), b.time_bounds());
                if x.is_empty() { return y; }
                if y.is_empty() { return x; }
                TimeRange::new(x.start.min(y.start), x.end.max(y.end))
            }
            Pred::Const(false) => TimeRange::new(1, 0),
            _ => TimeRange::unbounded(),
        }
    }

    /// 是否引用了任一值列槽位
    pub fn references_values(&self) -> bool {
        match self {
            Pred::Cmp { .. } => true,
            Pred::And(a, b) | Pred::Or(a, b) => a.references_values() || b.references_values(),
            Pred::Not(a) => a.references_values(),
            _ => false,
        }
    }
}

fn cmp_stats(s: &Statistics, op: CompareOp, lit: &Value) -> Truth {
    let (Some(min), Some(max)) = (&s.min, &s.max) else {
        return if s.count == 0 { Truth::Never } else { Truth::Maybe };
    };
    let (Some(lo), Some(hi)) = (min.compare(lit), max.compare(lit)) else {
        return Truth::Maybe;
    };
    use Ordering::*;
    let no_nulls = s.null_count == 0;
    let t = match op {
        CompareOp::Eq => {
            if lo == Greater || hi == Less { Truth::Never }
            else if lo == Equal && hi == Equal { Truth::Always }
            else { Truth::Maybe }
        }
        CompareOp::NotEq => {
            if lo == Equal && hi == Equal { Truth::Never }
            else if lo == Greater || hi == Less { Truth::Always }
            else { Truth::Maybe }
        }
        CompareOp::Lt => {
            if lo != Less { Truth::Never } else if hi == Less { Truth::Always } else { Truth::Maybe }
        }
        CompareOp::LtEq => {
            if lo == Greater { Truth::Never } else if hi != Greater { Truth::Always } else { Truth::Maybe }
        }
        CompareOp::Gt => {
            if hi != Greater { Truth::Never } else if lo == Greater { Truth::Always } else { Truth::Maybe }
        }
        CompareOp::GtEq => {
            if hi == Less { Truth::Never } else if lo != Less { Truth::Always } else { Truth::Maybe }
        }
    };
    if t == Truth::Always && !no_nulls { Truth::Maybe } else { t }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPS: [CompareOp; 6] = [
        CompareOp::Eq, CompareOp::NotEq, CompareOp::Lt,
        CompareOp::LtEq, CompareOp::Gt, CompareOp::GtEq,
    ];

    /// 线性同余，测试用的确定性伪随机
    struct Lcg(u64);
    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }
    }

    fn bind_slot0(f: &Filter) -> Pred {
        f.bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Int64))).unwrap()
    }

    #[test]
    fn stats_pruning_is_sound() {
        let mut rng = Lcg(42);
        for _ in 0..300 {
            let n = 1 + (rng.next() % 12) as usize;
            let rows: Vec<(i64, Option<Value>)> = (0..n)
                .map(|i| {
                    let v = (rng.next() % 4 != 0).then(|| Value::Int64((rng.next() % 20) as i64));
                    (i as i64 * 10, v)
                })
                .collect();
            let mut stats = Statistics::new();
            let mut time = Statistics::new();
            for (t, v) in &rows {
                time.update_time(*t);
                match v {
                    Some(v) => stats.update(*t, v),
                    None    => stats.update_null(),
                }
            }

            for op in OPS {
                let lit = (rng.next() % 24) as i64 - 2;
                let leaf = Filter::value("v", op, lit);
                let window = Filter::time_between((rng.next() % 100) as i64, (rng.next() % 120) as i64);
                for f in [leaf.clone(), !leaf.clone(), leaf.clone().and(window.clone()), leaf.or(!window)] {
                    let p = bind_slot0(&f);
                    let verdict = p.eval_stats(time.time_range(), &|_| Some(&stats));
                    let hits = rows.iter()
                        .filter(|(t, v)| p.eval_row(*t, std::slice::from_ref(v)))
                        .count();
                    match verdict {
                        Truth::Never  => assert_eq!(hits, 0, "{f:?} on {rows:?}"),
                        Truth::Always => assert_eq!(hits, rows.len(), "{f:?} on {rows:?}"),
                        Truth::Maybe  => {}
                    }
                }
            }
        }
    }

    #[test]
    fn null_comparisons_are_false() {
        let p = bind_slot0(&Filter::value("v", CompareOp::NotEq, 3i64));
        assert!(!p.eval_row(0, &[None]));
        assert!(p.eval_row(0, &[Some(Value::Int64(4))]));
    }

    #[test]
    fn float_pages_never_claim_always() {
        let mut s = Statistics::new();
        s.update(0, &Value::Double(1.0));
        s.update(1, &Value::Double(f64::NAN));
        let f = Filter::value("v", CompareOp::Lt, 5.0f64);
        let p = f.bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Double))).unwrap();
        assert_eq!(p.eval_stats(TimeRange::new(0, 1), &|_| Some(&s)), Truth::Maybe);
        assert!(!p.eval_row(1, &[Some(Value::Double(f64::NAN))]));
    }

    #[test]
    fn nan_is_only_not_equal() {
        let bind = |op| {
            Filter::value("v", op, 1.0f64)
                .bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Double)))
                .unwrap()
        };
        let nan = [Some(Value::Double(f64::NAN))];
        for op in OPS {
            assert_eq!(bind(op).eval_row(0, &nan), op == CompareOp::NotEq, "{op:?}");
        }
        assert!(!bind(CompareOp::NotEq).eval_row(0, &[None]));
    }

    #[test]
    fn not_equal_keeps_float_pages_holding_nan() {
        // min = max = 1.0，另有一个 NaN 行
        let mut s = Statistics::new();
        s.update(0, &Value::Double(1.0));
        s.update(1, &Value::Double(f64::NAN));
        let ne = Filter::value("v", CompareOp::NotEq, 1.0f64);
        let p = ne.bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Double))).unwrap();
        let range = TimeRange::new(0, 1);
        assert_eq!(p.eval_stats(range, &|_| Some(&s)), Truth::Maybe);
        let rows = [Some(Value::Double(1.0)), Some(Value::Double(f64::NAN))];
        let hits = rows.iter().enumerate()
            .filter(|(t, v)| p.eval_row(*t as i64, std::slice::from_ref(*v)))
            .count();
        assert_eq!(hits, 1);

        // 整数列不受影响
        let mut ints = Statistics::new();
        ints.update(0, &Value::Int64(3));
        let p = bind_slot0(&Filter::value("v", CompareOp::NotEq, 3i64));
        assert_eq!(p.eval_stats(range, &|_| Some(&ints)), Truth::Never);

        // 全空页仍可剪掉
        let mut nulls = Statistics::new();
        nulls.update_null();
        let p = ne.bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Double))).unwrap();
        assert_eq!(p.eval_stats(range, &|_| Some(&nulls)), Truth::Never);
    }

    #[test]
    fn tag_predicates_fold_to_constants() {
        let f = Filter::tag_eq("region", "north").and(Filter::value("temp", CompareOp::Gt, 1.5f64));
        let mut resolve = |c: &str| -> Result<Binding> {
            Ok(match c {
                "region" => Binding::Tag(Some("south".into())),
                _        => Binding::Slot(0, TsDataType::Double),
            })
        };
        let p = f.bind(&mut resolve).unwrap();
        assert_eq!(p.eval_stats(TimeRange::unbounded(), &|_| None), Truth::Never);
    }

    #[test]
    fn binding_errors() {
        let on_field = Filter::tag_eq("temp", "x");
        let err = on_field.bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Double))).unwrap_err();
        assert!(matches!(err, TsFileError::InvalidFilter(_)));

        let wrong_type = Filter::value("temp", CompareOp::Eq, 1i32);
        let err = wrong_type.bind(&mut |_| Ok(Binding::Slot(0, TsDataType::Double))).unwrap_err();
        assert!(matches!(err, TsFileError::TypeMismatch { .. }));
    }

    #[test]
    fn time_bounds_narrow_the_scan() {
        let f = Filter::time_ge(10).and(Filter::time_le(20)).or(Filter::time_eq(50));
        let p = bind_slot0(&f);
        assert_eq!(p.time_bounds(), TimeRange::new(10, 50));
        assert!(bind_slot0(&Filter::time_gt(i64::MAX)).time_bounds().is_empty());
    }
}
