//! 时间生成器：对齐多个独立分块的数据源
//!
//! 每一步取所有源的最小下一时间戳，在该时间戳上有行的源各贡献一行，
//! 其余源填空。某个源在同一时间戳有多行时，多出的行在后续步骤中
//! 各自成行。各源的下一时间戳放在小顶堆里，总代价 O(N log k)，
//! N 为所有源的行数，k 为源个数。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::common::{Result, Timestamp};
use crate::scan::{Cells, RowSource};

pub(crate) struct TimeGenerator {
    sources: Vec<Box<dyn RowSource>>,
    /// 每个源在合并行中的起始列
    offsets: Vec<usize>,
    /// (下一时间戳, 源下标)；每个未耗尽的源恰有一项
    heap:    BinaryHeap<Reverse<(Timestamp, usize)>>,
    primed:  bool,
    width:   usize,
}

impl TimeGenerator {
    pub fn new(sources: Vec<Box<dyn RowSource>>) -> Self {
        let mut offsets = Vec::with_capacity(sources.len());
        let mut width = 0;
        for s in &sources {
            offsets.push(width);
            width += s.width();
        }
        let heap = BinaryHeap::with_capacity(sources.len());
        Self { sources, offsets, heap, primed: false, width }
    }

    /// 首次访问时才 peek 各源，避免构造时读盘
    fn prime(&mut self) -> Result<()> {
        if !self.primed {
            for (i, s) in self.sources.iter_mut().enumerate() {
                if let Some(ts) = s.peek()? {
                    self.heap.push(Reverse((ts, i)));
                }
            }
            self.primed = true;
        }
        Ok(())
    }
}

impl RowSource for TimeGenerator {
    fn peek(&mut self) -> Result<Option<Timestamp>> {
        self.prime()?;
        Ok(self.heap.peek().map(|Reverse((ts, _))| *ts))
    }

    fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>> {
        self.prime()?;
        let Some(&Reverse((ts, _))) = self.heap.peek() else { return Ok(None) };

        // 先取出本时间戳上的全部源，再逐个推进；同一源的重复时间戳留到下一行
        let mut due = Vec::new();
        while let Some(&Reverse((t, i))) = self.heap.peek() {
            if t != ts {
                break;
            }
            self.heap.pop();
            due.push(i);
        }

        let mut row: Cells = vec![None; self.width];
        for i in due {
            let s = &mut self.sources[i];
            if let Some((_, cells)) = s.pop()? {
                for (slot, c) in row[self.offsets[i]..].iter_mut().zip(cells) {
                    *slot = c;
                }
            }
            if let Some(next) = s.peek()? {
                self.heap.push(Reverse((next, i)));
            }
        }
        Ok(Some((ts, row)))
    }

    fn width(&self) -> usize { self.width }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::Value;
    use std::collections::VecDeque;

    struct Fixed(VecDeque<(Timestamp, Cells)>);

    impl RowSource for Fixed {
        fn peek(&mut self) -> Result<Option<Timestamp>> { Ok(self.0.front().map(|r| r.0)) }
        fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>> { Ok(self.0.pop_front()) }
        fn width(&self) -> usize { 1 }
    }

    fn series(points: &[(i64, i64)]) -> Box<dyn RowSource> {
        Box::new(Fixed(points.iter().map(|(t, v)| (*t, vec![Some(Value::Int64(*v))])).collect()))
    }

    fn drain(tg: &mut TimeGenerator) -> Vec<(Timestamp, Cells)> {
        let mut out = Vec::new();
        while let Some(r) = tg.pop().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn aligns_by_minimum_timestamp() {
        let mut tg = TimeGenerator::new(vec![
            series(&[(0, 10), (2, 12), (4, 14)]),
            series(&[(1, 21), (2, 22), (3, 23)]),
        ]);
        let rows = drain(&mut tg);
        let times: Vec<i64> = rows.iter().map(|r| r.0).collect();
        assert_eq!(times, vec![0, 1, 2, 3, 4]);
        assert_eq!(rows[0].1, vec![Some(Value::Int64(10)), None]);
        assert_eq!(rows[2].1, vec![Some(Value::Int64(12)), Some(Value::Int64(22))]);
        assert_eq!(rows[3].1, vec![None, Some(Value::Int64(23))]);
    }

    #[test]
    fn many_sources_merge_in_time_order() {
        // 源 k 产出 k, k+40, k+80, ...
        let sources: Vec<Box<dyn RowSource>> = (0..40i64)
            .map(|k| {
                let points: Vec<(i64, i64)> = (0..25).map(|j| (k + j * 40, k)).collect();
                series(&points)
            })
            .collect();
        let mut tg = TimeGenerator::new(sources);
        assert_eq!(tg.width(), 40);
        assert_eq!(tg.peek().unwrap(), Some(0));

        let rows = drain(&mut tg);
        assert_eq!(rows.len(), 1000);
        for (n, (ts, cells)) in rows.iter().enumerate() {
            assert_eq!(*ts, n as i64);
            let k = (*ts % 40) as usize;
            assert_eq!(cells[k], Some(Value::Int64(k as i64)));
            assert_eq!(cells.iter().filter(|c| c.is_some()).count(), 1);
        }
    }

    #[test]
    fn duplicate_timestamps_become_extra_rows() {
        let mut tg = TimeGenerator::new(vec![series(&[(5, 1), (5, 2)]), series(&[(5, 9)])]);
        let rows = drain(&mut tg);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].1, vec![Some(Value::Int64(1)), Some(Value::Int64(9))]);
        assert_eq!(rows[1].1, vec![Some(Value::Int64(2)), None]);
        assert!(tg.pop().unwrap().is_none());
    }
}
