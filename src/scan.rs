//! 扫描：把索引选中的 chunk 变成按时间有序的行流
//!
//! ```text
//!   ChunkCursor ─┐                      GroupCursor ─┐
//!   ChunkCursor ─┼─ Interleave ─▶ 行      GroupCursor ─┼─ Interleave ─▶ 行
//!   ChunkCursor ─┘  (k 路归并)             GroupCursor ─┘
//!    非对齐序列                              对齐设备
//! ```
//!
//! 游标只在真正需要时才读盘解码；页头统计先做时间与谓词剪枝。
//! 同一时间戳的多行按写入顺序（chunk 在文件中的偏移）输出，不去重。

use std::collections::VecDeque;
use std::sync::Arc;

use crate::chunk_reader::ChunkReader;
use crate::common::{Result, TimeRange, Timestamp, TsFileError};
use crate::field_type::Value;
use crate::file::ReadFile;
use crate::filter::{Pred, Truth};
use crate::index::{ChunkMeta, DeviceIndex, TimeseriesIndex};

pub(crate) type Cells = Vec<Option<Value>>;

/// 按时间戳有序产出行的数据源
pub(crate) trait RowSource {
    /// 下一行的时间戳，不消费
    fn peek(&mut self) -> Result<Option<Timestamp>>;
    fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>>;
    /// 每行的单元格数
    fn width(&self) -> usize;
}

// ── 非对齐 chunk ──────────────────────────────────────────────────────────────

pub(crate) struct ChunkCursor {
    file:   Arc<ReadFile>,
    meta:   ChunkMeta,
    range:  TimeRange,
    prune:  Option<Arc<Pred>>,
    reader: Option<ChunkReader>,
    buf:    VecDeque<(Timestamp, Value)>,
    done:   bool,
}

impl ChunkCursor {
    fn new(file: Arc<ReadFile>, meta: ChunkMeta, range: TimeRange, prune: Option<Arc<Pred>>) -> Self {
        Self { file, meta, range, prune, reader: None, buf: VecDeque::new(), done: false }
    }

    fn fill(&mut self) -> Result<()> {
        while self.buf.is_empty() && !self.done {
            if self.reader.is_none() {
                self.reader = Some(ChunkReader::load(&self.file, &self.meta)?);
            }
            let Some(reader) = self.reader.as_mut() else { break };
            let Some(page) = reader.next_page()? else {
                self.done = true;
                self.reader = None;
                break;
            };

            let stats = &page.header.statistics;
            if !stats.time_range().overlaps(&self.range) {
                continue;
            }
            if let Some(p) = &self.prune {
                if p.eval_stats(stats.time_range(), &|slot| (slot == 0).then_some(stats)) == Truth::Never {
                    continue;
                }
            }

            let decoded = reader.decode(&page)?;
            for (ts, v) in decoded.times.into_iter().zip(decoded.values) {
                if let (true, Some(v)) = (self.range.contains(ts), v) {
                    self.buf.push_back((ts, v));
                }
            }
        }
        Ok(())
    }
}

impl RowSource for ChunkCursor {
    fn peek(&mut self) -> Result<Option<Timestamp>> {
        self.fill()?;
        Ok(self.buf.front().map(|(t, _)| *t))
    }

    fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>> {
        self.fill()?;
        Ok(self.buf.pop_front().map(|(t, v)| (t, vec![Some(v)])))
    }

    fn width(&self) -> usize { 1 }
}

// ── 对齐 ChunkGroup ───────────────────────────────────────────────────────────

pub(crate) struct GroupCursor {
    file:    Arc<ReadFile>,
    time:    ChunkMeta,
    /// 与请求列一一对应；设备上没有该列时为 None（整列为空）
    values:  Vec<Option<ChunkMeta>>,
    range:   TimeRange,
    prune:   Option<Arc<Pred>>,
    readers: Option<(ChunkReader, Vec<Option<ChunkReader>>)>,
    buf:     VecDeque<(Timestamp, Cells)>,
    done:    bool,
}

impl GroupCursor {
    fn fill(&mut self) -> Result<()> {
        while self.buf.is_empty() && !self.done {
            if self.readers.is_none() {
                let time = ChunkReader::load(&self.file, &self.time)?;
                let values = self.values.iter()
                    .map(|m| m.as_ref().map(|m| ChunkReader::load(&self.file, m)).transpose())
                    .collect::<Result<Vec<_>>>()?;
                self.readers = Some((time, values));
            }
            let Some((time_reader, value_readers)) = self.readers.as_mut() else { break };

            let Some(time_page) = time_reader.next_page()? else {
                for r in value_readers.iter_mut().flatten() {
                    if r.next_page()?.is_some() {
                        return Err(TsFileError::CorruptFile("value chunk has more pages than time chunk".into()));
                    }
                }
                self.done = true;
                self.readers = None;
                break;
            };
            let rows = time_page.header.row_count;
            let mut value_pages = Vec::with_capacity(value_readers.len());
            for r in value_readers.iter_mut() {
                let page = match r {
                    Some(r) => Some(r.next_page()?.ok_or_else(|| {
                        TsFileError::CorruptFile("value chunk has fewer pages than time chunk".into())
                    })?),
                    None => None,
                };
                if page.as_ref().is_some_and(|p| p.header.row_count != rows) {
                    return Err(TsFileError::CorruptFile("value page out of step with time page".into()));
                }
                value_pages.push(page);
            }

            let time_range = time_page.header.statistics.time_range();
            if !time_range.overlaps(&self.range) {
                continue;
            }
            if let Some(p) = &self.prune {
                let stats = |slot: usize| {
                    value_pages.get(slot).and_then(|pg| pg.as_ref()).map(|pg| &pg.header.statistics)
                };
                if p.eval_stats(time_range, &stats) == Truth::Never {
                    continue;
                }
            }

            let times = time_reader.decode(&time_page)?.times;
            let mut columns = Vec::with_capacity(value_pages.len());
            for (r, page) in value_readers.iter().zip(&value_pages) {
                columns.push(match (r, page) {
                    (Some(r), Some(p)) => r.decode(p)?.values.into_iter(),
                    _ => vec![None; times.len()].into_iter(),
                });
            }
            for ts in times {
                let cells: Cells = columns.iter_mut().map(|c| c.next().flatten()).collect();
                if self.range.contains(ts) {
                    self.buf.push_back((ts, cells));
                }
            }
        }
        Ok(())
    }
}

impl RowSource for GroupCursor {
    fn peek(&mut self) -> Result<Option<Timestamp>> {
        self.fill()?;
        Ok(self.buf.front().map(|(t, _)| *t))
    }

    fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>> {
        self.fill()?;
        Ok(self.buf.pop_front())
    }

    fn width(&self) -> usize { self.values.len() }
}

// ── Interleave ────────────────────────────────────────────────────────────────

/// 同一序列 / 设备的多个 chunk 的稳定 k 路归并。
/// 游标按起始时间排队，只有归并前沿到达其起始时间才会被激活（读盘）。
pub(crate) struct Interleave<C> {
    /// (起始时间, 写入顺序键, 游标)
    pending: VecDeque<(Timestamp, u64, C)>,
    active:  Vec<(u64, C)>,
    width:   usize,
}

impl<C: RowSource> Interleave<C> {
    pub fn new(mut cursors: Vec<(Timestamp, u64, C)>, width: usize) -> Self {
        cursors.sort_by_key(|(start, key, _)| (*start, *key));
        Self { pending: cursors.into(), active: Vec::new(), width }
    }

    /// 当前应输出的游标下标
    fn head(&mut self) -> Result<Option<usize>> {
        loop {
            let mut best: Option<(Timestamp, u64, usize)> = None;
            let mut i = 0;
            while i < self.active.len() {
                let (key, cursor) = &mut self.active[i];
                let key = *key;
                match cursor.peek()? {
                    None => { self.active.swap_remove(i); continue; }
                    Some(ts) => {
                        if best.map_or(true, |(bt, bk, _)| (ts, key) < (bt, bk)) {
                            best = Some((ts, key, i));
                        }
                    }
                }
                i += 1;
            }

            let activate = match (self.pending.front(), best) {
                (Some((start, _, _)), Some((ts, _, _))) => *start <= ts,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if activate {
                if let Some((_, key, c)) = self.pending.pop_front() {
                    self.active.push((key, c));
                }
                continue;
            }
            return Ok(best.map(|(_, _, i)| i));
        }
    }
}

impl<C: RowSource> RowSource for Interleave<C> {
    fn peek(&mut self) -> Result<Option<Timestamp>> {
        match self.head()? {
            Some(i) => self.active[i].1.peek(),
            None => Ok(None),
        }
    }

    fn pop(&mut self) -> Result<Option<(Timestamp, Cells)>> {
        match self.head()? {
            Some(i) => self.active[i].1.pop(),
            None => Ok(None),
        }
    }

    fn width(&self) -> usize { self.width }
}

// ── 构建 ──────────────────────────────────────────────────────────────────────

/// 非对齐单序列。`prune` 的槽位 0 即该序列。
pub(crate) fn series_source(
    file:   &Arc<ReadFile>,
    series: &TimeseriesIndex,
    range:  TimeRange,
    prune:  Option<Arc<Pred>>,
) -> Interleave<ChunkCursor> {
    let cursors = series.chunks_in(range)
        .filter(|c| match &prune {
            Some(p) => p.eval_stats(c.time_range(), &|slot| (slot == 0).then_some(&c.statistics)) != Truth::Never,
            None => true,
        })
        .map(|c| {
            let cursor = ChunkCursor::new(file.clone(), c.clone(), range, prune.clone());
            (c.statistics.start_time, c.offset, cursor)
        })
        .collect();
    Interleave::new(cursors, 1)
}

/// 对齐设备的若干列。`prune` 的槽位 i 即 `columns[i]`。
pub(crate) fn aligned_source(
    file:    &Arc<ReadFile>,
    device:  &DeviceIndex,
    columns: &[String],
    range:   TimeRange,
    prune:   Option<Arc<Pred>>,
) -> Interleave<GroupCursor> {
    let mut cursors = Vec::new();
    if let Some(time) = &device.time {
        let series: Vec<Option<&TimeseriesIndex>> = columns.iter().map(|c| device.find(c)).collect();
        for g in device.aligned_groups(range) {
            let time_meta = &time.chunks[g];
            let values: Vec<Option<ChunkMeta>> = series.iter()
                .map(|s| s.and_then(|s| s.chunks.get(g).cloned()))
                .collect();
            if let Some(p) = &prune {
                let stats = |slot: usize| {
                    values.get(slot).and_then(|m| m.as_ref()).map(|m| &m.statistics)
                };
                if p.eval_stats(time_meta.time_range(), &stats) == Truth::Never {
                    continue;
                }
            }
            let cursor = GroupCursor {
                file: file.clone(), time: time_meta.clone(), values, range,
                prune: prune.clone(), readers: None, buf: VecDeque::new(), done: false,
            };
            cursors.push((time_meta.statistics.start_time, time_meta.offset, cursor));
        }
    }
    Interleave::new(cursors, columns.len())
}
