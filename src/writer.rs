//! TsFile 写入器
//!
//! 一个写入引擎 `TsFileWriter<K>`，`K` 决定 schema 能力：
//!   - [`TreeModel`]：注册 (设备, 测点)，`write_tablet`
//!   - [`TableModel`]：构造时给定表定义，`write_table`
//!
//! 写入流程：
//! ```text
//!   Tablet ──校验/拆行──▶ 设备缓冲（按 DeviceId）
//!                            │ flush：按时间稳定排序 → 分页编码 → 压缩
//!                            ▼
//!                      ChunkGroup 字节 ──追加──▶ 文件
//!                            │
//!                            ▼
//!                      MetadataIndex（close 时写出 + footer）
//! ```
//!
//! 状态：Unopened → open → Open → close → Closed。Closed 状态下任何操作都失败。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, warn};

use crate::column_writer::{AlignedChunkWriter, ChunkWriter, EncodedChunk, CHUNK_GROUP_MARKER};
use crate::common::{Result, Timestamp, TsFileError};
use crate::config::WriterConfig;
use crate::field_type::{ColumnCategory, Value};
use crate::file::{Footer, OpenFlags, WriteFile, DEFAULT_MODE};
use crate::index::{ChunkMeta, MetadataIndex};
use crate::meta::{DeviceId, MeasurementSchema, TableSchema};
use crate::tablet::Tablet;

// ── SchemaKind ────────────────────────────────────────────────────────────────

/// 写入器的 schema 能力
pub trait SchemaKind {
    /// 日志中的模型名
    const MODEL: &'static str;
    /// 关闭时向索引写入 schema 记录
    fn record_schema(&self, index: &mut MetadataIndex);
}

/// 树模型：设备路径 → 测点
#[derive(Debug, Default)]
pub struct TreeModel {
    devices: HashMap<String, TreeDevice>,
}

#[derive(Debug)]
struct TreeDevice {
    aligned:      bool,
    measurements: Vec<MeasurementSchema>,
    lookup:       HashMap<String, usize>,
}

impl TreeDevice {
    fn new(aligned: bool) -> Self {
        Self { aligned, measurements: Vec::new(), lookup: HashMap::new() }
    }

    fn push(&mut self, schema: MeasurementSchema) {
        self.lookup.insert(schema.name.clone(), self.measurements.len());
        self.measurements.push(schema);
    }
}

impl SchemaKind for TreeModel {
    const MODEL: &'static str = "tree";
    /// 已注册但从未写入的测点也进索引，查询时读出为空列
    fn record_schema(&self, index: &mut MetadataIndex) {
        for (path, dev) in &self.devices {
            let id = DeviceId::tree(path);
            for m in &dev.measurements {
                index.add_series(&id, m, dev.aligned);
            }
        }
    }
}

/// 表模型：一张表，TAG 列组成设备标识，FIELD 列落盘为对齐值列
#[derive(Debug)]
pub struct TableModel {
    schema: TableSchema,
    fields: Vec<MeasurementSchema>,
    /// 表定义中每一列在设备标识或值列中的位置
    slots:  Vec<Slot>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Tag(usize),
    Field(usize),
}

impl TableModel {
    fn new(schema: TableSchema) -> Self {
        let (mut tags, mut fields) = (0, Vec::new());
        let slots = schema.columns().iter()
            .map(|c| match c.category {
                ColumnCategory::Tag => { tags += 1; Slot::Tag(tags - 1) }
                ColumnCategory::Field => {
                    fields.push(c.to_measurement());
                    Slot::Field(fields.len() - 1)
                }
            })
            .collect();
        Self { schema, fields, slots }
    }

    fn tag_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Tag(_))).count()
    }
}

impl SchemaKind for TableModel {
    const MODEL: &'static str = "table";
    fn record_schema(&self, index: &mut MetadataIndex) {
        index.add_table(self.schema.clone());
    }
}

// ── 缓冲 ──────────────────────────────────────────────────────────────────────

enum WriterState {
    Unopened,
    Open(WriteFile),
    Closed,
}

/// 一个设备在两次 flush 之间的行缓冲
struct DeviceBuffer {
    aligned: bool,
    columns: Vec<MeasurementSchema>,
    rows:    Vec<(Timestamp, Vec<Option<Value>>)>,
}

/// 编码完成、尚未落盘的 ChunkGroup。ChunkMeta 中的偏移相对于 `bytes` 起点。
struct EncodedGroup {
    bytes:  Vec<u8>,
    time:   Option<ChunkMeta>,
    chunks: Vec<(MeasurementSchema, ChunkMeta)>,
}

impl EncodedGroup {
    fn new(device: &DeviceId) -> Result<Self> {
        let mut bytes = vec![CHUNK_GROUP_MARKER];
        device.serialize(&mut bytes)?;
        Ok(Self { bytes, time: None, chunks: Vec::new() })
    }

    fn push(&mut self, chunk: EncodedChunk) -> ChunkMeta {
        let meta = ChunkMeta {
            offset:     self.bytes.len() as u64,
            size:       chunk.bytes.len() as u64,
            statistics: chunk.statistics,
        };
        self.bytes.extend_from_slice(&chunk.bytes);
        meta
    }

    fn rebase(meta: &mut ChunkMeta, base: u64) {
        meta.offset += base;
    }
}

// ── TsFileWriter ──────────────────────────────────────────────────────────────

pub struct TsFileWriter<K: SchemaKind> {
    kind:           K,
    cfg:            WriterConfig,
    state:          WriterState,
    buffers:        BTreeMap<DeviceId, DeviceBuffer>,
    buffered_bytes: u64,
    index:          MetadataIndex,
}

pub type TreeWriter  = TsFileWriter<TreeModel>;
pub type TableWriter = TsFileWriter<TableModel>;

impl<K: SchemaKind> TsFileWriter<K> {
    fn with_kind(kind: K, cfg: WriterConfig) -> Self {
        Self {
            kind, cfg,
            state: WriterState::Unopened,
            buffers: BTreeMap::new(),
            buffered_bytes: 0,
            index: MetadataIndex::new(),
        }
    }

    /// 打开文件并写入文件头
    pub fn open(&mut self, path: impl AsRef<Path>, flags: OpenFlags, mode: u32) -> Result<()> {
        match self.state {
            WriterState::Unopened => {}
            WriterState::Open(_) => return Err(TsFileError::InvalidState("writer is already open".into())),
            WriterState::Closed  => return Err(TsFileError::InvalidState("writer is closed".into())),
        }
        let file = WriteFile::create(path.as_ref(), flags, mode)?;
        debug!(path = %path.as_ref().display(), model = K::MODEL, "tsfile opened for writing");
        self.state = WriterState::Open(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool { matches!(self.state, WriterState::Open(_)) }

    pub fn config(&self) -> &WriterConfig { &self.cfg }

    /// 当前缓冲的估算字节数
    pub fn buffered_bytes(&self) -> u64 { self.buffered_bytes }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open(_)  => Ok(()),
            WriterState::Unopened => Err(TsFileError::InvalidState("writer is not open".into())),
            WriterState::Closed   => Err(TsFileError::InvalidState("writer is closed".into())),
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        match self.state {
            WriterState::Closed => Err(TsFileError::InvalidState("writer is closed".into())),
            _ => Ok(()),
        }
    }

    fn buffer_row(
        &mut self,
        device:  &DeviceId,
        aligned: bool,
        columns: &[MeasurementSchema],
        ts:      Timestamp,
        cells:   Vec<Option<Value>>,
    ) {
        let bytes = 8 + cells.len() as u64
            + cells.iter().flatten().map(|v| v.mem_size() as u64).sum::<u64>();
        let buf = self.buffers.entry(device.clone()).or_insert_with(|| DeviceBuffer {
            aligned, columns: columns.to_vec(), rows: Vec::new(),
        });
        if buf.columns.len() != columns.len() {
            buf.columns = columns.to_vec();
        }
        buf.rows.push((ts, cells));
        self.buffered_bytes += bytes;
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.buffered_bytes >= self.cfg.memory_threshold {
            debug!(buffered = self.buffered_bytes, threshold = self.cfg.memory_threshold, "memory threshold reached");
            self.flush()?;
        }
        Ok(())
    }

    /// 将全部缓冲编码为 ChunkGroup 追加到文件。没有缓冲时什么也不做。
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        let buffers = std::mem::take(&mut self.buffers);
        self.buffered_bytes = 0;

        for (device, buf) in buffers {
            let rows = buf.rows.len();
            let Some(group) = self.encode_group(&device, buf)? else { continue };
            let WriterState::Open(file) = &mut self.state else {
                return Err(TsFileError::InvalidState("writer is not open".into()));
            };
            let base = file.append(&group.bytes)?;
            debug!(device = %device, rows, bytes = group.bytes.len(), offset = base, "chunk group flushed");

            let chunks = group.chunks.into_iter().map(|(schema, mut meta)| {
                EncodedGroup::rebase(&mut meta, base);
                (schema, meta)
            });
            match group.time {
                Some(mut time) => {
                    EncodedGroup::rebase(&mut time, base);
                    self.index.add_aligned_group(&device, time, chunks.collect());
                }
                None => {
                    for (schema, meta) in chunks {
                        self.index.add_chunk(&device, &schema, meta);
                    }
                }
            }
        }
        Ok(())
    }

    fn encode_group(&self, device: &DeviceId, mut buf: DeviceBuffer) -> Result<Option<EncodedGroup>> {
        if buf.rows.is_empty() {
            return Ok(None);
        }
        buf.rows.sort_by_key(|(ts, _)| *ts);
        let width = buf.columns.len();
        let mut group = EncodedGroup::new(device)?;

        if buf.aligned {
            let mut w = AlignedChunkWriter::new(&buf.columns, &self.cfg);
            for (ts, mut cells) in buf.rows {
                cells.resize(width, None);
                w.write_row(ts, cells)?;
            }
            let (time, values) = w.finish()?;
            group.time = Some(group.push(time));
            for (schema, chunk) in buf.columns.into_iter().zip(values) {
                let meta = group.push(chunk);
                group.chunks.push((schema, meta));
            }
        } else {
            for (ci, schema) in buf.columns.into_iter().enumerate() {
                let mut w = ChunkWriter::new(&schema, &self.cfg);
                let mut points = 0usize;
                for (ts, cells) in buf.rows.iter_mut() {
                    if let Some(v) = cells.get_mut(ci).and_then(Option::take) {
                        w.write(*ts, v)?;
                        points += 1;
                    }
                }
                if points == 0 {
                    continue;
                }
                let meta = group.push(w.finish()?);
                group.chunks.push((schema, meta));
            }
            if group.chunks.is_empty() {
                return Ok(None);
            }
        }
        Ok(Some(group))
    }

    /// 最后一次 flush，写出元数据索引与 footer，释放文件
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush()?;
        let WriterState::Open(mut file) = std::mem::replace(&mut self.state, WriterState::Closed) else {
            return Err(TsFileError::InvalidState("writer is not open".into()));
        };

        self.kind.record_schema(&mut self.index);
        let index = self.index.finish(self.cfg.bloom_bits_per_series)?;
        let footer = Footer {
            index_offset: file.position(),
            index_len:    index.len() as u32,
            index_crc:    crc32fast::hash(&index),
        };
        file.append(&index)?;
        file.append(&footer.to_bytes())?;
        debug!(
            path = %file.path().display(),
            devices = self.index.devices().count(),
            index_bytes = index.len(),
            file_bytes = file.position(),
            "tsfile closed"
        );
        file.close()
    }
}

// ── 树模型 ────────────────────────────────────────────────────────────────────

impl TsFileWriter<TreeModel> {
    pub fn new(cfg: WriterConfig) -> Self {
        Self::with_kind(TreeModel::default(), cfg)
    }

    /// 默认配置创建并打开（创建 + 截断）
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let mut w = Self::new(WriterConfig::default());
        w.open(path, OpenFlags::default(), DEFAULT_MODE)?;
        Ok(w)
    }

    /// 注册一个非对齐测点。同名同类型重复注册视为成功。
    pub fn register_timeseries(&mut self, device: &str, schema: MeasurementSchema) -> Result<()> {
        self.ensure_not_closed()?;
        schema.validate()?;
        if device.is_empty() {
            return Err(TsFileError::SchemaMismatch("empty device path".into()));
        }
        let dev = self.kind.devices.entry(device.to_string()).or_insert_with(|| TreeDevice::new(false));
        if dev.aligned {
            return Err(TsFileError::SchemaMismatch(format!("{device} is an aligned device")));
        }
        match dev.lookup.get(&schema.name) {
            Some(&i) if dev.measurements[i].data_type == schema.data_type => Ok(()),
            Some(_) => Err(TsFileError::AlreadyRegistered(format!("{device}.{}", schema.name))),
            None => {
                dev.push(schema);
                Ok(())
            }
        }
    }

    /// 注册一个对齐设备：所有测点共享一列时间
    pub fn register_aligned_timeseries(&mut self, device: &str, schemas: Vec<MeasurementSchema>) -> Result<()> {
        self.ensure_not_closed()?;
        if device.is_empty() || schemas.is_empty() {
            return Err(TsFileError::SchemaMismatch("aligned device needs a path and measurements".into()));
        }
        if self.kind.devices.contains_key(device) {
            return Err(TsFileError::AlreadyRegistered(device.to_string()));
        }
        let mut dev = TreeDevice::new(true);
        for s in schemas {
            s.validate()?;
            if dev.lookup.contains_key(&s.name) {
                return Err(TsFileError::SchemaMismatch(format!("duplicate measurement {}", s.name)));
            }
            dev.push(s);
        }
        self.kind.devices.insert(device.to_string(), dev);
        Ok(())
    }

    /// 写入一个设备的 Tablet。Tablet 只读，调用后可由调用方复用。
    pub fn write_tablet(&mut self, tablet: &Tablet) -> Result<()> {
        self.ensure_open()?;
        let path = tablet.target();
        let dev = self.kind.devices.get(path)
            .ok_or_else(|| TsFileError::SchemaMismatch(format!("device {path} has no registered timeseries")))?;

        let mut mapping = Vec::with_capacity(tablet.columns().len());
        for c in tablet.columns() {
            let &i = dev.lookup.get(&c.name)
                .ok_or_else(|| TsFileError::UnknownColumn(format!("{path}.{}", c.name)))?;
            if dev.measurements[i].data_type != c.data_type {
                return Err(TsFileError::SchemaMismatch(format!(
                    "{path}.{} registered as {}, tablet has {}",
                    c.name, dev.measurements[i].data_type, c.data_type,
                )));
            }
            mapping.push(i);
        }

        let aligned = dev.aligned;
        let columns = dev.measurements.clone();
        let device = DeviceId::tree(path);
        let (mut skipped, mut empty) = (0usize, 0usize);
        for row in 0..tablet.row_count() {
            let Some(ts) = tablet.timestamp(row) else {
                skipped += 1;
                continue;
            };
            let mut cells = vec![None; columns.len()];
            for (col, &i) in mapping.iter().enumerate() {
                cells[i] = tablet.value(row, col);
            }
            if !aligned && cells.iter().all(Option::is_none) {
                empty += 1;
                continue;
            }
            self.buffer_row(&device, aligned, &columns, ts, cells);
        }
        if skipped > 0 {
            warn!(device = path, skipped, "tablet rows without timestamp skipped");
        }
        if empty > 0 {
            debug!(device = path, empty, "timestamp-only rows carry no points on a non-aligned device");
        }
        self.maybe_flush()
    }
}

// ── 表模型 ────────────────────────────────────────────────────────────────────

impl TsFileWriter<TableModel> {
    pub fn new(schema: TableSchema, cfg: WriterConfig) -> Self {
        Self::with_kind(TableModel::new(schema), cfg)
    }

    /// 默认配置创建并打开（创建 + 截断）
    pub fn create(path: impl AsRef<Path>, schema: TableSchema) -> Result<Self> {
        let mut w = Self::new(schema, WriterConfig::default());
        w.open(path, OpenFlags::default(), DEFAULT_MODE)?;
        Ok(w)
    }

    pub fn table_schema(&self) -> &TableSchema { &self.kind.schema }

    /// 写入一个表 Tablet。未出现在 Tablet 中的列按空值写入。
    pub fn write_table(&mut self, tablet: &Tablet) -> Result<()> {
        self.ensure_open()?;
        let model = &self.kind;
        let schema = &model.schema;
        if !tablet.target().is_empty() && tablet.target().to_lowercase() != schema.key() {
            return Err(TsFileError::UnknownTable(tablet.target().to_string()));
        }

        let mut mapping = Vec::with_capacity(tablet.columns().len());
        for c in tablet.columns() {
            let i = schema.find_column(&c.name)
                .ok_or_else(|| TsFileError::UnknownColumn(c.name.clone()))?;
            let declared = &schema.columns()[i];
            if declared.data_type != c.data_type {
                return Err(TsFileError::SchemaMismatch(format!(
                    "column {} declared as {}, tablet has {}", c.name, declared.data_type, c.data_type,
                )));
            }
            if c.category.is_some_and(|cat| cat != declared.category) {
                return Err(TsFileError::SchemaMismatch(format!("column {} category differs", c.name)));
            }
            mapping.push(model.slots[i]);
        }

        let table = schema.table_name.clone();
        let columns = model.fields.clone();
        let tag_count = model.tag_count();
        let mut skipped = 0usize;
        for row in 0..tablet.row_count() {
            let Some(ts) = tablet.timestamp(row) else {
                skipped += 1;
                continue;
            };
            let mut tags: Vec<Option<String>> = vec![None; tag_count];
            let mut cells: Vec<Option<Value>> = vec![None; columns.len()];
            for (col, slot) in mapping.iter().enumerate() {
                let Some(v) = tablet.value(row, col) else { continue };
                match (slot, v) {
                    (Slot::Tag(t), Value::Binary(b)) => tags[*t] = Some(String::from_utf8_lossy(&b).into_owned()),
                    (Slot::Tag(_), _) => {}
                    (Slot::Field(f), v) => cells[*f] = Some(v),
                }
            }
            let device = DeviceId::table(&table, tags);
            self.buffer_row(&device, true, &columns, ts, cells);
        }
        if skipped > 0 {
            warn!(table = %table, skipped, "tablet rows without timestamp skipped");
        }
        self.maybe_flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::TsDataType;
    use crate::meta::ColumnSchema;

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = TreeWriter::new(WriterConfig::default());
        assert!(matches!(w.flush(), Err(TsFileError::InvalidState(_))));
        w.register_timeseries("root.d1", MeasurementSchema::new("s1", TsDataType::Int64)).unwrap();

        w.open(dir.path().join("a.tsfile"), OpenFlags::default(), DEFAULT_MODE).unwrap();
        assert!(w.open(dir.path().join("b.tsfile"), OpenFlags::default(), DEFAULT_MODE).is_err());
        w.flush().unwrap();
        w.flush().unwrap();
        w.close().unwrap();

        assert!(matches!(w.close(), Err(TsFileError::InvalidState(_))));
        assert!(matches!(w.flush(), Err(TsFileError::InvalidState(_))));
        let t = Tablet::for_device("root.d1", &[MeasurementSchema::new("s1", TsDataType::Int64)], 4).unwrap();
        assert!(matches!(w.write_tablet(&t), Err(TsFileError::InvalidState(_))));
        assert!(w.register_timeseries("root.d2", MeasurementSchema::new("s", TsDataType::Int32)).is_err());
    }

    #[test]
    fn registration_conflicts() {
        let mut w = TreeWriter::new(WriterConfig::default());
        let s = MeasurementSchema::new("s1", TsDataType::Int64);
        w.register_timeseries("root.d1", s.clone()).unwrap();
        w.register_timeseries("root.d1", s).unwrap();
        assert!(matches!(
            w.register_timeseries("root.d1", MeasurementSchema::new("s1", TsDataType::Double)),
            Err(TsFileError::AlreadyRegistered(_))
        ));
        w.register_aligned_timeseries("root.d2", vec![MeasurementSchema::new("a", TsDataType::Float)]).unwrap();
        assert!(matches!(
            w.register_timeseries("root.d2", MeasurementSchema::new("b", TsDataType::Float)),
            Err(TsFileError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn memory_threshold_triggers_flush() {
        let dir = tempfile::tempdir().unwrap();
        let schema = TableSchema::new("t", vec![
            ColumnSchema::tag("id", TsDataType::String),
            ColumnSchema::field("v", TsDataType::Int64),
        ]).unwrap();
        let mut w = TableWriter::new(schema.clone(), WriterConfig::default().with_memory_threshold(64));
        w.open(dir.path().join("t.tsfile"), OpenFlags::default(), DEFAULT_MODE).unwrap();

        let mut t = Tablet::from_table_schema(&schema, 16).unwrap();
        for r in 0..16 {
            t.add_timestamp(r, r as i64).unwrap();
            t.add_value(r, "v", r as i64).unwrap();
        }
        w.write_table(&t).unwrap();
        assert_eq!(w.buffered_bytes(), 0);
        w.close().unwrap();
    }

    #[test]
    fn table_tablet_must_match_schema() {
        let dir = tempfile::tempdir().unwrap();
        let schema = TableSchema::new("t", vec![ColumnSchema::field("v", TsDataType::Int64)]).unwrap();
        let mut w = TableWriter::create(dir.path().join("t.tsfile"), schema).unwrap();

        let other = Tablet::for_table("u", &["v"], &[TsDataType::Int64], &[ColumnCategory::Field], 1).unwrap();
        assert!(matches!(w.write_table(&other), Err(TsFileError::UnknownTable(_))));
        let wrong = Tablet::with_columns(&["V"], &[TsDataType::Double], 1).unwrap();
        assert!(matches!(w.write_table(&wrong), Err(TsFileError::SchemaMismatch(_))));
        let unknown = Tablet::with_columns(&["x"], &[TsDataType::Int64], 1).unwrap();
        assert!(matches!(w.write_table(&unknown), Err(TsFileError::UnknownColumn(_))));
    }
}
