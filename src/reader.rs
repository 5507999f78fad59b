//! TsFile 读取器与查询入口
//!
//! 打开时校验文件头与 footer，整体读入元数据索引；之后的查询只按需读 chunk。
//!
//! 查询路径：
//! ```text
//!   表模型：DeviceId 顺序逐设备 ──▶ aligned_source ──▶ RowStream ─┐
//!                                                                  ├─▶ ResultSet
//!   树模型：单设备 ──▶ series_source / aligned_source ─────────────┤
//!           多设备 ──▶ 各序列源 ──▶ TimeGenerator ─────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::common::{corrupt, Result, TimeRange, Timestamp, TsFileError};
use crate::file::{check_header, Footer, ReadFile, FOOTER_LEN, HEADER_LEN};
use crate::filter::{Binding, Filter, Pred};
use crate::index::{DeviceIndex, MetadataIndex, TimeseriesIndex};
use crate::meta::{ColumnSchema, DeviceId, TableSchema};
use crate::result_set::{Proj, ResultSet, ResultSetMetadata, RowStream};
use crate::scan::{aligned_source, series_source, RowSource};
use crate::statistics::Statistics;
use crate::time_generator::TimeGenerator;

pub struct TsFileReader {
    file:  Option<Arc<ReadFile>>,
    index: MetadataIndex,
}

/// 树查询中一条已解析的序列
struct SeriesTarget<'a> {
    path:   String,
    device: &'a DeviceIndex,
    series: &'a TimeseriesIndex,
}

impl TsFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = ReadFile::open(path.as_ref())?;
        let len = file.len();
        if len < HEADER_LEN + FOOTER_LEN {
            return Err(TsFileError::CorruptFile(format!("file too short: {len} bytes")));
        }
        check_header(&file.read_at(0, HEADER_LEN as usize)?)?;
        let footer = Footer::parse(&file.read_at(len - FOOTER_LEN, FOOTER_LEN as usize)?)?;

        let index_end = footer.index_offset.checked_add(footer.index_len as u64);
        if footer.index_offset < HEADER_LEN || index_end != Some(len - FOOTER_LEN) {
            return Err(TsFileError::CorruptFile(format!(
                "metadata index [{}, +{}) outside file body", footer.index_offset, footer.index_len,
            )));
        }
        let data = file.read_at(footer.index_offset, footer.index_len as usize)?;
        if crc32fast::hash(&data) != footer.index_crc {
            return Err(TsFileError::CorruptFile("metadata index checksum mismatch".into()));
        }
        let index = MetadataIndex::deserialize(&data).map_err(corrupt)?;
        debug!(
            path = %path.as_ref().display(),
            bytes = len,
            tables = index.tables().len(),
            devices = index.devices().count(),
            "tsfile opened for reading"
        );
        Ok(Self { file: Some(Arc::new(file)), index })
    }

    fn file(&self) -> Result<&Arc<ReadFile>> {
        self.file.as_ref().ok_or_else(|| TsFileError::InvalidState("reader is closed".into()))
    }

    /// 释放文件；已创建的 ResultSet 持有自己的文件引用，不受影响
    pub fn close(&mut self) {
        self.file = None;
    }

    // ── 元数据 ────────────────────────────────────────────────────────────────

    pub fn table_schema(&self, name: &str) -> Result<&TableSchema> {
        self.file()?;
        self.index.table(name).ok_or_else(|| TsFileError::UnknownTable(name.to_string()))
    }

    pub fn table_schemas(&self) -> &[TableSchema] { self.index.tables() }

    /// 按 DeviceId 排序
    pub fn device_ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.index.devices().map(|d| &d.device)
    }

    /// 某序列在整个文件上的统计
    pub fn timeseries_statistics(&self, device: &DeviceId, measurement: &str) -> Result<&Statistics> {
        self.file()?;
        self.index.device(device)
            .and_then(|d| d.find(measurement).or_else(|| d.find(&measurement.to_lowercase())))
            .map(|s| &s.statistics)
            .ok_or_else(|| TsFileError::UnknownColumn(format!("{device}.{measurement}")))
    }

    // ── 表模型查询 ────────────────────────────────────────────────────────────

    /// 查询一张表的若干列，时间闭区间 `[start, end]`。
    /// 行按设备（DeviceId 顺序）分组，组内按时间升序。
    pub fn query_table(
        &self,
        table:   &str,
        columns: &[&str],
        start:   Timestamp,
        end:     Timestamp,
        filter:  Option<Filter>,
    ) -> Result<ResultSet> {
        let file = self.file()?;
        let schema = self.table_schema(table)?;

        let mut selected: Vec<&ColumnSchema> = Vec::with_capacity(columns.len());
        for name in columns {
            selected.push(schema.column(name).ok_or_else(|| TsFileError::UnknownColumn(name.to_string()))?);
        }

        // 值列槽位：先是投影中的 FIELD 列，再是只出现在过滤条件里的 FIELD 列
        let mut fields: Vec<String> = Vec::new();
        let proj_fields: Vec<Option<usize>> = selected.iter()
            .map(|c| (!c.is_tag()).then(|| field_slot(c, &mut fields)))
            .collect();
        if let Some(f) = &filter {
            for name in f.columns() {
                let c = schema.column(name).ok_or_else(|| TsFileError::UnknownColumn(name.to_string()))?;
                if !c.is_tag() {
                    field_slot(c, &mut fields);
                }
            }
        }

        let range = TimeRange::new(start, end);
        let mut streams = Vec::new();
        for dev in self.index.table_devices(schema) {
            let tag_value = |c: &ColumnSchema| {
                schema.tag_position(&c.name).and_then(|p| dev.device.tags().get(p).cloned().flatten())
            };

            let pred = match &filter {
                Some(f) => Some(f.bind(&mut |name: &str| {
                    let c = schema.column(name).ok_or_else(|| TsFileError::UnknownColumn(name.to_string()))?;
                    if c.is_tag() {
                        return Ok(Binding::Tag(tag_value(c)));
                    }
                    let lower = c.to_measurement().name;
                    let slot = fields.iter().position(|f| *f == lower)
                        .ok_or_else(|| TsFileError::UnknownColumn(name.to_string()))?;
                    Ok(Binding::Slot(slot, c.data_type))
                })?),
                None => None,
            };
            let Some(effective) = narrow(range, pred.as_ref()) else { continue };

            let prune = pred.as_ref().filter(|p| p.references_values()).map(|p| Arc::new(p.clone()));
            let source = aligned_source(file, dev, &fields, effective, prune);
            let proj = selected.iter().zip(&proj_fields)
                .map(|(c, slot)| match slot {
                    Some(i) => Proj::Slot(*i),
                    None    => Proj::Const(tag_value(c).map(Into::into)),
                })
                .collect();
            streams.push(RowStream::new(Box::new(source), pred, proj));
        }

        debug!(table, columns = columns.len(), devices = streams.len(), %range, "table query planned");
        // 列名按调用方给出的写法返回
        let meta = ResultSetMetadata::new(
            columns.iter().zip(&selected).map(|(n, c)| (n.to_string(), c.data_type)).collect(),
        );
        Ok(ResultSet::new(meta, streams, true))
    }

    // ── 树模型查询 ────────────────────────────────────────────────────────────

    /// 查询若干序列路径（`<device>.<measurement>`），时间闭区间 `[start, end]`。
    /// 多序列按时间戳对齐，缺值为空。
    pub fn query_tree(
        &self,
        paths:  &[&str],
        start:  Timestamp,
        end:    Timestamp,
        filter: Option<Filter>,
    ) -> Result<ResultSet> {
        let file = self.file()?;
        if paths.is_empty() {
            return Err(TsFileError::UnknownColumn("no series path given".into()));
        }

        let mut targets: Vec<SeriesTarget<'_>> = Vec::with_capacity(paths.len());
        for p in paths {
            let t = self.resolve_path(p)?;
            targets.push(t);
        }
        let projected = targets.len();
        if let Some(f) = &filter {
            for p in f.columns() {
                if !targets.iter().any(|t| t.path == p) {
                    let t = self.resolve_path(p)?;
                    targets.push(t);
                }
            }
        }

        let (sources, slots) = group_sources(&targets);
        let single = sources.len() == 1;
        let pred = match &filter {
            Some(f) => Some(f.bind(&mut |name: &str| {
                let i = targets.iter().position(|t| t.path == name)
                    .ok_or_else(|| TsFileError::UnknownColumn(name.to_string()))?;
                Ok(Binding::Slot(slots[i], targets[i].series.data_type()))
            })?),
            None => None,
        };

        let meta = ResultSetMetadata::new(
            targets[..projected].iter().map(|t| (t.path.clone(), t.series.data_type())).collect(),
        );
        let Some(range) = narrow(TimeRange::new(start, end), pred.as_ref()) else {
            return Ok(ResultSet::new(meta, Vec::new(), false));
        };

        // 单一数据源时谓词可下推到页级剪枝；多源对齐只做时间剪枝
        let prune = pred.as_ref()
            .filter(|p| single && p.references_values())
            .map(|p| Arc::new(p.clone()));
        let source: Box<dyn RowSource> = match sources.as_slice() {
            [Source::Series(i)] => Box::new(series_source(file, targets[*i].series, range, prune)),
            [Source::Aligned(members)] => {
                let names: Vec<String> = members.iter().map(|i| targets[*i].series.schema.name.clone()).collect();
                Box::new(aligned_source(file, targets[members[0]].device, &names, range, prune))
            }
            _ => Box::new(TimeGenerator::new(
                sources.iter().map(|s| s.build(file, &targets, range)).collect(),
            )),
        };

        debug!(paths = paths.len(), sources = sources.len(), %range, "tree query planned");
        let proj = (0..projected).map(|i| Proj::Slot(slots[i])).collect();
        let stream = RowStream::new(source, pred, proj).skip_empty();
        Ok(ResultSet::new(meta, vec![stream], false))
    }

    fn resolve_path<'a>(&'a self, path: &str) -> Result<SeriesTarget<'a>> {
        let unknown = || TsFileError::UnknownColumn(path.to_string());
        let (device, measurement) = path.rsplit_once('.').ok_or_else(unknown)?;
        if !self.index.may_contain_path(path) {
            return Err(unknown());
        }
        let dev = self.index.device(&DeviceId::tree(device)).ok_or_else(unknown)?;
        let series = dev.find(measurement).ok_or_else(unknown)?;
        Ok(SeriesTarget { path: path.to_string(), device: dev, series })
    }
}

/// 树查询的一个数据源，元素为目标下标
enum Source {
    Series(usize),
    Aligned(Vec<usize>),
}

impl Source {
    fn build(&self, file: &Arc<ReadFile>, targets: &[SeriesTarget<'_>], range: TimeRange) -> Box<dyn RowSource> {
        match self {
            Source::Series(i) => Box::new(series_source(file, targets[*i].series, range, None)),
            Source::Aligned(m) => {
                let names: Vec<String> = m.iter().map(|i| targets[*i].series.schema.name.clone()).collect();
                Box::new(aligned_source(file, targets[m[0]].device, &names, range, None))
            }
        }
    }
}

/// 将目标序列分组为数据源：非对齐序列各自一个，同一对齐设备的序列共享一个。
/// 同时返回每个目标在合并行中的槽位。
fn group_sources(targets: &[SeriesTarget<'_>]) -> (Vec<Source>, Vec<usize>) {
    let mut sources: Vec<Source> = Vec::new();
    for (i, t) in targets.iter().enumerate() {
        if !t.device.is_aligned() {
            sources.push(Source::Series(i));
            continue;
        }
        let shared = sources.iter_mut().find_map(|s| match s {
            Source::Aligned(m) if targets[m[0]].device.device == t.device.device => Some(m),
            _ => None,
        });
        match shared {
            Some(m) => m.push(i),
            None => sources.push(Source::Aligned(vec![i])),
        }
    }

    let mut slots = vec![0; targets.len()];
    let members = sources.iter().flat_map(|s| match s {
        Source::Series(i)  => std::slice::from_ref(i),
        Source::Aligned(m) => m.as_slice(),
    });
    for (slot, i) in members.enumerate() {
        slots[*i] = slot;
    }
    (sources, slots)
}

/// 值列在槽位表中的位置，不存在时追加
fn field_slot(c: &ColumnSchema, fields: &mut Vec<String>) -> usize {
    let name = c.to_measurement().name;
    match fields.iter().position(|f| *f == name) {
        Some(i) => i,
        None => { fields.push(name); fields.len() - 1 }
    }
}

/// 查询区间与谓词时间界的交集；为空时返回 None
fn narrow(range: TimeRange, pred: Option<&Pred>) -> Option<TimeRange> {
    let r = match pred {
        Some(p) => {
            let b = p.time_bounds();
            TimeRange::new(range.start.max(b.start), range.end.min(b.end))
        }
        None => range,
    };
    (!r.is_empty()).then_some(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::TsDataType;
    use crate::meta::MeasurementSchema;
    use crate::tablet::Tablet;
    use crate::writer::TreeWriter;

    fn tree_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("tree.tsfile");
        let mut w = TreeWriter::create(&path).unwrap();
        let s = MeasurementSchema::new("s1", TsDataType::Int64);
        w.register_timeseries("root.d1", s.clone()).unwrap();
        let mut t = Tablet::for_device("root.d1", &[s], 8).unwrap();
        for r in 0..8 {
            t.add_timestamp(r, r as i64 * 10).unwrap();
            t.add_value(r, 0usize, r as i64).unwrap();
        }
        w.write_tablet(&t).unwrap();
        w.close().unwrap();
        path
    }

    #[test]
    fn closed_reader_rejects_queries() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = TsFileReader::open(tree_file(dir.path())).unwrap();
        let mut rs = r.query_tree(&["root.d1.s1"], 0, 100, None).unwrap();
        r.close();
        r.close();
        assert!(matches!(r.query_tree(&["root.d1.s1"], 0, 100, None), Err(TsFileError::InvalidState(_))));
        assert!(rs.next().unwrap());
    }

    #[test]
    fn unknown_paths() {
        let dir = tempfile::tempdir().unwrap();
        let r = TsFileReader::open(tree_file(dir.path())).unwrap();
        for p in ["root.d1.s2", "root.d9.s1", "nodot"] {
            assert!(matches!(r.query_tree(&[p], 0, 100, None), Err(TsFileError::UnknownColumn(_))), "{p}");
        }
        assert!(matches!(r.query_table("t", &["a"], 0, 1, None), Err(TsFileError::UnknownTable(_))));
    }

    #[test]
    fn narrowing_by_time_filter() {
        let dir = tempfile::tempdir().unwrap();
        let r = TsFileReader::open(tree_file(dir.path())).unwrap();
        let mut rs = r.query_tree(&["root.d1.s1"], 0, 100, Some(Filter::time_between(20, 45))).unwrap();
        let mut times = Vec::new();
        while rs.next().unwrap() {
            times.push(rs.timestamp().unwrap());
        }
        assert_eq!(times, vec![20, 30, 40]);

        let mut empty = r.query_tree(&["root.d1.s1"], 50, 100, Some(Filter::time_lt(10))).unwrap();
        assert!(!empty.next().unwrap());

        let stats = r.timeseries_statistics(&DeviceId::tree("root.d1"), "s1").unwrap();
        assert_eq!((stats.count, stats.start_time, stats.end_time), (8, 0, 70));
    }
}
