//! 元数据索引
//!
//! 文件尾部的索引区，reader 打开文件时一次性解析：
//! - **TableSchema**：表模型的 schema 记录
//! - **DeviceIndex**：每个设备（ChunkGroup 归属）的序列索引
//! - **TimeseriesIndex**：每个测点 / FIELD 列的 chunk 位置 + 统计，按时间有序
//! - **BloomFilter**：序列路径的双哈希位数组，快速排除不存在的路径
//!
//! 对齐设备额外有一条时间序列索引，第 i 个时间 chunk 与每个值序列的第 i 个
//! chunk 属于同一个 ChunkGroup。

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{read_bytes, write_bytes, TimeRange};
use crate::field_type::TsDataType;
use crate::meta::{DeviceId, MeasurementSchema, TableSchema};
use crate::statistics::Statistics;

// ── ChunkMeta ─────────────────────────────────────────────────────────────────

/// 一个 chunk 在文件中的位置（从 chunk header 起）与统计
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    pub offset:     u64,
    pub size:       u64,
    pub statistics: Statistics,
}

impl ChunkMeta {
    pub fn time_range(&self) -> TimeRange { self.statistics.time_range() }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.offset)?;
        w.write_u64::<LittleEndian>(self.size)?;
        self.statistics.serialize(w)
    }

    fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let offset = r.read_u64::<LittleEndian>()?;
        let size   = r.read_u64::<LittleEndian>()?;
        let statistics = Statistics::deserialize(r)?;
        Ok(Self { offset, size, statistics })
    }
}

// ── TimeseriesIndex ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TimeseriesIndex {
    pub schema:     MeasurementSchema,
    pub chunks:     Vec<ChunkMeta>,
    /// 全部 chunk 统计合并
    pub statistics: Statistics,
}

impl TimeseriesIndex {
    fn new(schema: MeasurementSchema) -> Self {
        Self { schema, chunks: Vec::new(), statistics: Statistics::new() }
    }

    pub fn data_type(&self) -> TsDataType { self.schema.data_type }

    fn push(&mut self, meta: ChunkMeta) {
        self.statistics.merge(&meta.statistics);
        self.chunks.push(meta);
    }

    /// 时间范围可能与 `range` 重叠的 chunk（保守，无假阴性）
    pub fn chunks_in(&self, range: TimeRange) -> impl Iterator<Item = &ChunkMeta> {
        self.chunks.iter().filter(move |c| c.statistics.count > 0 && c.time_range().overlaps(&range))
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.schema.serialize(w)?;
        self.statistics.serialize(w)?;
        w.write_u32::<LittleEndian>(self.chunks.len() as u32)?;
        for c in &self.chunks {
            c.serialize(w)?;
        }
        Ok(())
    }

    fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let schema = MeasurementSchema::deserialize(r)?;
        let statistics = Statistics::deserialize(r)?;
        let n = r.read_u32::<LittleEndian>()? as usize;
        let mut chunks = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            chunks.push(ChunkMeta::deserialize(r)?);
        }
        Ok(Self { schema, chunks, statistics })
    }
}

// ── DeviceIndex ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DeviceIndex {
    pub device: DeviceId,
    /// 对齐设备的时间列；非对齐设备为 None
    pub time:   Option<TimeseriesIndex>,
    series:     Vec<TimeseriesIndex>,
    lookup:     HashMap<String, usize>,
}

impl DeviceIndex {
    fn new(device: DeviceId, aligned: bool) -> Self {
        let time = aligned.then(|| {
            TimeseriesIndex::new(MeasurementSchema::new("", TsDataType::Int64))
        });
        Self { device, time, series: Vec::new(), lookup: HashMap::new() }
    }

    pub fn is_aligned(&self) -> bool { self.time.is_some() }

    pub fn series(&self) -> &[TimeseriesIndex] { &self.series }

    pub fn find(&self, measurement: &str) -> Option<&TimeseriesIndex> {
        self.lookup.get(measurement).map(|i| &self.series[*i])
    }

    fn series_mut(&mut self, schema: &MeasurementSchema) -> &mut TimeseriesIndex {
        let idx = match self.lookup.get(&schema.name) {
            Some(i) => *i,
            None => {
                self.series.push(TimeseriesIndex::new(schema.clone()));
                self.lookup.insert(schema.name.clone(), self.series.len() - 1);
                self.series.len() - 1
            }
        };
        &mut self.series[idx]
    }

    /// 对齐设备中与 `range` 可能重叠的 ChunkGroup 序号
    pub fn aligned_groups(&self, range: TimeRange) -> Vec<usize> {
        match &self.time {
            Some(t) => t.chunks.iter().enumerate()
                .filter(|(_, c)| c.statistics.count > 0 && c.time_range().overlaps(&range))
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        }
    }

    /// 按 chunk 起始时间稳定排序；对齐设备的时间与值 chunk 同步重排
    fn sort_by_time(&mut self) {
        match &mut self.time {
            Some(time) => {
                let mut order: Vec<usize> = (0..time.chunks.len()).collect();
                order.sort_by_key(|i| time.chunks[*i].statistics.start_time);
                let permute = |chunks: &mut Vec<ChunkMeta>| {
                    if chunks.len() == order.len() {
                        let old = std::mem::take(chunks);
                        *chunks = order.iter().map(|i| old[*i].clone()).collect();
                    }
                };
                permute(&mut time.chunks);
                for s in &mut self.series {
                    permute(&mut s.chunks);
                }
            }
            None => {
                for s in &mut self.series {
                    s.chunks.sort_by_key(|c| c.statistics.start_time);
                }
            }
        }
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.device.serialize(w)?;
        match &self.time {
            Some(t) => { w.write_u8(1)?; t.serialize(w)?; }
            None    => w.write_u8(0)?,
        }
        w.write_u32::<LittleEndian>(self.series.len() as u32)?;
        for s in &self.series {
            s.serialize(w)?;
        }
        Ok(())
    }

    fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let device = DeviceId::deserialize(r)?;
        let time = match r.read_u8()? {
            0 => None,
            _ => Some(TimeseriesIndex::deserialize(r)?),
        };
        let n = r.read_u32::<LittleEndian>()? as usize;
        let mut series = Vec::with_capacity(n.min(4096));
        let mut lookup = HashMap::with_capacity(n.min(4096));
        for i in 0..n {
            let s = TimeseriesIndex::deserialize(r)?;
            if let Some(t) = &time {
                if s.chunks.len() != t.chunks.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("aligned series {} out of step with time column", s.schema.name),
                    ));
                }
            }
            lookup.insert(s.schema.name.clone(), i);
            series.push(s);
        }
        Ok(Self { device, time, series, lookup })
    }
}

// ── MetadataIndex ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MetadataIndex {
    tables:  Vec<TableSchema>,
    devices: BTreeMap<DeviceId, DeviceIndex>,
    bloom:   Option<BloomFilter>,
}

impl MetadataIndex {
    pub fn new() -> Self { Self::default() }

    pub fn add_table(&mut self, schema: TableSchema) {
        if self.table(&schema.table_name).is_none() {
            self.tables.push(schema);
        }
    }

    pub fn tables(&self) -> &[TableSchema] { &self.tables }

    /// 表名大小写不敏感
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        let key = name.to_lowercase();
        self.tables.iter().find(|t| t.key() == key)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceIndex> { self.devices.values() }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceIndex> { self.devices.get(id) }

    /// 属于某张表的设备，按 DeviceId 有序
    pub fn table_devices<'a>(&'a self, table: &TableSchema) -> impl Iterator<Item = &'a DeviceIndex> {
        let key = table.key();
        self.devices.values().filter(move |d| d.device.first_segment() == key && d.is_aligned())
    }

    /// 序列路径是否可能存在；没有 bloom filter 时总是 true
    pub fn may_contain_path(&self, path: &str) -> bool {
        self.bloom.as_ref().map_or(true, |b| b.may_contain(path.as_bytes()))
    }

    /// 登记一条已注册的序列，不带 chunk；已存在时不变。
    /// 对齐设备只在尚无 ChunkGroup 时接受新列，保持值列与时间列逐 chunk 对应。
    pub fn add_series(&mut self, device: &DeviceId, schema: &MeasurementSchema, aligned: bool) {
        let dev = self.devices.entry(device.clone())
            .or_insert_with(|| DeviceIndex::new(device.clone(), aligned));
        let groups = dev.time.as_ref().map_or(0, |t| t.chunks.len());
        if groups == 0 || dev.lookup.contains_key(&schema.name) {
            dev.series_mut(schema);
        }
    }

    /// 登记一个非对齐 chunk
    pub fn add_chunk(&mut self, device: &DeviceId, schema: &MeasurementSchema, meta: ChunkMeta) {
        self.devices.entry(device.clone())
            .or_insert_with(|| DeviceIndex::new(device.clone(), false))
            .series_mut(schema)
            .push(meta);
    }

    /// 登记一个对齐 ChunkGroup：时间 chunk + 各值 chunk
    pub fn add_aligned_group(
        &mut self,
        device: &DeviceId,
        time:   ChunkMeta,
        values: Vec<(MeasurementSchema, ChunkMeta)>,
    ) {
        let dev = self.devices.entry(device.clone())
            .or_insert_with(|| DeviceIndex::new(device.clone(), true));
        if let Some(t) = &mut dev.time {
            t.push(time);
        }
        for (schema, meta) in values {
            dev.series_mut(&schema).push(meta);
        }
    }

    /// 排序 chunk 并构建 bloom filter，然后序列化
    pub fn finish(&mut self, bloom_bits_per_series: usize) -> io::Result<Vec<u8>> {
        let paths: Vec<String> = self.devices.values()
            .flat_map(|d| d.series.iter().map(move |s| series_path(&d.device, &s.schema.name)))
            .collect();
        let mut bloom = BloomFilter::new(paths.len(), bloom_bits_per_series);
        for p in &paths {
            bloom.add(p.as_bytes());
        }
        self.bloom = Some(bloom);
        for d in self.devices.values_mut() {
            d.sort_by_time();
        }

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.tables.len() as u32)?;
        for t in &self.tables {
            t.serialize(&mut out)?;
        }
        out.write_u32::<LittleEndian>(self.devices.len() as u32)?;
        for d in self.devices.values() {
            d.serialize(&mut out)?;
        }
        if let Some(b) = &self.bloom {
            b.serialize(&mut out)?;
        }
        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut r = io::Cursor::new(data);
        let n_tables = r.read_u32::<LittleEndian>()? as usize;
        let mut tables = Vec::with_capacity(n_tables.min(1024));
        for _ in 0..n_tables {
            tables.push(TableSchema::deserialize(&mut r)?);
        }
        let n_devices = r.read_u32::<LittleEndian>()? as usize;
        let mut devices = BTreeMap::new();
        for _ in 0..n_devices {
            let d = DeviceIndex::deserialize(&mut r)?;
            devices.insert(d.device.clone(), d);
        }
        let bloom = Some(BloomFilter::deserialize(&mut r)?);
        Ok(Self { tables, devices, bloom })
    }
}

/// Bloom filter 中的序列路径：`<device>.<measurement>`
pub fn series_path(device: &DeviceId, measurement: &str) -> String {
    format!("{device}.{measurement}")
}

// ── Bloom Filter ──────────────────────────────────────────────────────────────

/// 双哈希 Bloom Filter（两路 FNV-1a），7 个探测位
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits:     Vec<u8>,
    num_bits: usize,
}

const BLOOM_HASHES: u64 = 7;

impl BloomFilter {
    pub fn new(expected_ndv: usize, bits_per_key: usize) -> Self {
        let num_bits = (expected_ndv * bits_per_key.max(1)).max(64);
        Self { bits: vec![0u8; num_bits.div_ceil(8)], num_bits }
    }

    fn bit_positions(&self, value: &[u8]) -> impl Iterator<Item = usize> {
        let mut h1: u64 = 0xcbf29ce484222325;
        let mut h2: u64 = 0x84222325cbf29ce4;
        for &b in value {
            h1 ^= b as u64;
            h1 = h1.wrapping_mul(0x100000001b3);
            h2 = (h2 ^ b as u64).wrapping_mul(0x9e3779b97f4a7c15);
        }
        let h2 = h2 | 1;
        let nb = self.num_bits as u64;
        (0..BLOOM_HASHES).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % nb) as usize)
    }

    pub fn add(&mut self, value: &[u8]) {
        let positions: Vec<usize> = self.bit_positions(value).collect();
        for bit in positions {
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn may_contain(&self, value: &[u8]) -> bool {
        if self.num_bits == 0 {
            return true;
        }
        self.bit_positions(value).all(|bit| self.bits[bit / 8] & (1 << (bit % 8)) != 0)
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.num_bits as u32)?;
        write_bytes(w, &self.bits)
    }

    fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let num_bits = r.read_u32::<LittleEndian>()? as usize;
        let bits = read_bytes(r)?;
        if bits.len() != num_bits.div_ceil(8) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bloom filter size mismatch"));
        }
        Ok(Self { bits, num_bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::Value;

    fn meta(offset: u64, times: &[i64]) -> ChunkMeta {
        let mut statistics = Statistics::new();
        for t in times {
            statistics.update(*t, &Value::Int64(*t));
        }
        ChunkMeta { offset, size: 10, statistics }
    }

    #[test]
    fn bloom_filter_has_no_false_negatives() {
        let mut bf = BloomFilter::new(100, 10);
        for i in 0..100 {
            bf.add(format!("root.sg.d{i}.s1").as_bytes());
        }
        for i in 0..100 {
            assert!(bf.may_contain(format!("root.sg.d{i}.s1").as_bytes()));
        }
        let misses = (0..1000)
            .filter(|i| bf.may_contain(format!("root.other.d{i}").as_bytes()))
            .count();
        assert!(misses < 100, "false positive rate too high: {misses}/1000");
    }

    #[test]
    fn chunks_sorted_and_pruned_by_time() {
        let dev = DeviceId::tree("root.sg.d1");
        let schema = MeasurementSchema::new("s1", TsDataType::Int64);
        let mut idx = MetadataIndex::new();
        idx.add_chunk(&dev, &schema, meta(100, &[50, 60]));
        idx.add_chunk(&dev, &schema, meta(200, &[0, 10]));
        let bytes = idx.finish(10).unwrap();

        let back = MetadataIndex::deserialize(&bytes).unwrap();
        let ts = back.device(&dev).unwrap().find("s1").unwrap();
        assert_eq!(ts.chunks[0].offset, 200);
        assert_eq!(ts.statistics.count, 4);
        let hits: Vec<u64> = ts.chunks_in(TimeRange::new(55, 70)).map(|c| c.offset).collect();
        assert_eq!(hits, vec![100]);
        assert!(back.may_contain_path("root.sg.d1.s1"));
    }

    #[test]
    fn registered_series_without_chunks_are_indexed() {
        let dev = DeviceId::tree("root.sg.d1");
        let written = MeasurementSchema::new("s1", TsDataType::Int64);
        let idle = MeasurementSchema::new("s2", TsDataType::Double);
        let mut idx = MetadataIndex::new();
        idx.add_chunk(&dev, &written, meta(100, &[1, 2]));
        idx.add_series(&dev, &written, false);
        idx.add_series(&dev, &idle, false);
        idx.add_series(&DeviceId::tree("root.sg.d2"), &idle, true);
        let bytes = idx.finish(10).unwrap();

        let back = MetadataIndex::deserialize(&bytes).unwrap();
        let d = back.device(&dev).unwrap();
        assert_eq!(d.find("s1").unwrap().chunks.len(), 1);
        let s2 = d.find("s2").unwrap();
        assert!(s2.chunks.is_empty());
        assert_eq!(s2.statistics.count, 0);
        assert!(back.may_contain_path("root.sg.d1.s2"));
        let d2 = back.device(&DeviceId::tree("root.sg.d2")).unwrap();
        assert!(d2.is_aligned());
        assert!(d2.aligned_groups(TimeRange::new(i64::MIN, i64::MAX)).is_empty());
    }

    #[test]
    fn aligned_groups_stay_paired() {
        let dev = DeviceId::table("t", vec![Some("a".into())]);
        let schema = MeasurementSchema::new("v", TsDataType::Int64);
        let mut idx = MetadataIndex::new();
        idx.add_aligned_group(&dev, meta(10, &[5, 6]), vec![(schema.clone(), meta(20, &[5]))]);
        idx.add_aligned_group(&dev, meta(30, &[1, 2]), vec![(schema, meta(40, &[2]))]);
        let bytes = idx.finish(10).unwrap();

        let back = MetadataIndex::deserialize(&bytes).unwrap();
        let d = back.device(&dev).unwrap();
        assert_eq!(d.time.as_ref().unwrap().chunks[0].offset, 30);
        assert_eq!(d.find("v").unwrap().chunks[0].offset, 40);
        assert_eq!(d.aligned_groups(TimeRange::new(6, 100)), vec![1]);
    }
}
