//! Chunk 写入器
//!
//! 一个 chunk = ChunkHeader + 若干页。三种 chunk：
//!   - 非对齐 chunk（树模型单测点）：页内同时存时间与值
//!   - 时间 chunk（对齐设备）：只存时间
//!   - 值 chunk（对齐设备）：每列一个，页边界与时间 chunk 一致
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ marker        (u8)               │  0x01 / 0x81 / 0x41
//! │ measurement   (u32 len + utf8)   │
//! │ data_type     (u8)               │
//! │ encoding      (u8)               │
//! │ time_encoding (u8)               │
//! │ compression   (u8)               │
//! │ page_count    (u32 LE)           │
//! │ data_size     (u32 LE)           │  其后所有页的字节数
//! ├──────────────────────────────────┤
//! │ page 0 | page 1 | ...            │
//! └──────────────────────────────────┘
//! ```

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{corrupt, read_str, write_str, Result, Timestamp, TsFileError};
use crate::config::WriterConfig;
use crate::field_type::{CompressionType, EncodingType, TsDataType, Value};
use crate::meta::MeasurementSchema;
use crate::page::{PageBuilder, PageCodec, PageKind};
use crate::statistics::Statistics;

pub const CHUNK_GROUP_MARKER: u8 = 0x00;
pub const CHUNK_MARKER:       u8 = 0x01;
pub const TIME_CHUNK_MARKER:  u8 = 0x81;
pub const VALUE_CHUNK_MARKER: u8 = 0x41;

// ── ChunkHeader ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub marker:        u8,
    pub measurement:   String,
    pub data_type:     TsDataType,
    pub encoding:      EncodingType,
    pub time_encoding: EncodingType,
    pub compression:   CompressionType,
    pub page_count:    u32,
    pub data_size:     u32,
}

impl ChunkHeader {
    pub fn page_kind(&self) -> Result<PageKind> {
        match self.marker {
            CHUNK_MARKER       => Ok(PageKind::NonAligned),
            TIME_CHUNK_MARKER  => Ok(PageKind::Time),
            VALUE_CHUNK_MARKER => Ok(PageKind::Value),
            m => Err(TsFileError::CorruptFile(format!("unknown chunk marker {m:#04x}"))),
        }
    }

    pub fn codec(&self) -> Result<PageCodec> {
        Ok(PageCodec {
            kind:          self.page_kind()?,
            data_type:     self.data_type,
            encoding:      self.encoding,
            time_encoding: self.time_encoding,
            compression:   self.compression,
        })
    }

    pub(crate) fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.marker)?;
        write_str(w, &self.measurement)?;
        w.write_u8(self.data_type as u8)?;
        w.write_u8(self.encoding as u8)?;
        w.write_u8(self.time_encoding as u8)?;
        w.write_u8(self.compression as u8)?;
        w.write_u32::<LittleEndian>(self.page_count)?;
        w.write_u32::<LittleEndian>(self.data_size)?;
        Ok(())
    }

    pub(crate) fn deserialize<R: Read>(r: &mut R) -> Result<Self> {
        let marker = r.read_u8().map_err(corrupt)?;
        let measurement = read_str(r).map_err(corrupt)?;
        let bad = |what: &str| TsFileError::CorruptFile(format!("invalid {what} in chunk header"));
        let data_type = TsDataType::from_u8(r.read_u8().map_err(corrupt)?)
            .ok_or_else(|| bad("data type"))?;
        let encoding = EncodingType::from_u8(r.read_u8().map_err(corrupt)?)
            .ok_or_else(|| bad("encoding"))?;
        let time_encoding = EncodingType::from_u8(r.read_u8().map_err(corrupt)?)
            .ok_or_else(|| bad("time encoding"))?;
        let compression = CompressionType::from_u8(r.read_u8().map_err(corrupt)?)
            .ok_or_else(|| bad("compression"))?;
        let page_count = r.read_u32::<LittleEndian>().map_err(corrupt)?;
        let data_size  = r.read_u32::<LittleEndian>().map_err(corrupt)?;
        let header = Self {
            marker, measurement, data_type, encoding, time_encoding, compression,
            page_count, data_size,
        };
        header.page_kind()?;
        Ok(header)
    }
}

/// 编码完成的 chunk：header + 页字节，以及整体统计
pub struct EncodedChunk {
    pub measurement: String,
    pub data_type:   TsDataType,
    pub bytes:       Vec<u8>,
    pub statistics:  Statistics,
}

// ── 通用页序列 ────────────────────────────────────────────────────────────────

/// 累积已封页，维护 chunk 级统计
struct PageSeq {
    codec:   PageCodec,
    current: PageBuilder,
    pages:   Vec<u8>,
    count:   u32,
    stats:   Statistics,
}

impl PageSeq {
    fn new(codec: PageCodec) -> Self {
        Self {
            codec, current: PageBuilder::new(codec),
            pages: Vec::new(), count: 0, stats: Statistics::new(),
        }
    }

    fn seal(&mut self) -> Result<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let page = std::mem::replace(&mut self.current, PageBuilder::new(self.codec));
        let (bytes, stats) = page.build()?;
        self.pages.extend_from_slice(&bytes);
        self.stats.merge(&stats);
        self.count += 1;
        Ok(())
    }

    fn finish(mut self, marker: u8, measurement: String) -> Result<EncodedChunk> {
        self.seal()?;
        let header = ChunkHeader {
            marker,
            measurement:   measurement.clone(),
            data_type:     self.codec.data_type,
            encoding:      self.codec.encoding,
            time_encoding: self.codec.time_encoding,
            compression:   self.codec.compression,
            page_count:    self.count,
            data_size:     self.pages.len() as u32,
        };
        let mut bytes = Vec::with_capacity(self.pages.len() + 32);
        header.serialize(&mut bytes)?;
        bytes.extend_from_slice(&self.pages);
        Ok(EncodedChunk {
            measurement, data_type: self.codec.data_type, bytes, statistics: self.stats,
        })
    }
}

// ── 非对齐 ChunkWriter ────────────────────────────────────────────────────────

pub struct ChunkWriter {
    schema:    MeasurementSchema,
    seq:       PageSeq,
    max_rows:  usize,
    max_bytes: usize,
}

impl ChunkWriter {
    pub fn new(schema: &MeasurementSchema, cfg: &WriterConfig) -> Self {
        let codec = PageCodec {
            kind:          PageKind::NonAligned,
            data_type:     schema.data_type,
            encoding:      schema.encoding,
            time_encoding: cfg.time_encoding,
            compression:   schema.compression,
        };
        Self {
            schema: schema.clone(), seq: PageSeq::new(codec),
            max_rows: cfg.page_max_points, max_bytes: cfg.page_max_bytes,
        }
    }

    /// 追加一个点；调用方保证时间有序
    pub fn write(&mut self, ts: Timestamp, v: Value) -> Result<()> {
        self.seq.current.add_point(ts, v);
        if self.seq.current.len() >= self.max_rows || self.seq.current.est_bytes() >= self.max_bytes {
            self.seq.seal()?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<EncodedChunk> {
        self.seq.finish(CHUNK_MARKER, self.schema.name)
    }
}

// ── 对齐 ChunkWriter ──────────────────────────────────────────────────────────

/// 一个对齐设备的时间 chunk + 各值 chunk，按行写入，页边界统一
pub struct AlignedChunkWriter {
    time:      PageSeq,
    values:    Vec<(String, PageSeq)>,
    max_rows:  usize,
    max_bytes: usize,
}

impl AlignedChunkWriter {
    pub fn new(columns: &[MeasurementSchema], cfg: &WriterConfig) -> Self {
        let time = PageSeq::new(PageCodec {
            kind:          PageKind::Time,
            data_type:     TsDataType::Int64,
            encoding:      cfg.time_encoding,
            time_encoding: cfg.time_encoding,
            compression:   cfg.time_compression,
        });
        let values = columns.iter()
            .map(|m| {
                (m.name.clone(), PageSeq::new(PageCodec {
                    kind:          PageKind::Value,
                    data_type:     m.data_type,
                    encoding:      m.encoding,
                    time_encoding: cfg.time_encoding,
                    compression:   m.compression,
                }))
            })
            .collect();
        Self { time, values, max_rows: cfg.page_max_points, max_bytes: cfg.page_max_bytes }
    }

    /// `cells` 与构造时的列一一对应
    pub fn write_row(&mut self, ts: Timestamp, cells: Vec<Option<Value>>) -> Result<()> {
        if cells.len() != self.values.len() {
            return Err(TsFileError::SchemaMismatch(format!(
                "row has {} cells, device has {} columns", cells.len(), self.values.len()
            )));
        }
        self.time.current.add_time(ts);
        for ((_, seq), cell) in self.values.iter_mut().zip(cells) {
            seq.current.add_cell(ts, cell);
        }

        let bytes: usize = self.time.current.est_bytes()
            + self.values.iter().map(|(_, s)| s.current.est_bytes()).sum::<usize>();
        if self.time.current.len() >= self.max_rows || bytes >= self.max_bytes {
            self.time.seal()?;
            for (_, seq) in &mut self.values {
                seq.seal()?;
            }
        }
        Ok(())
    }

    /// 返回 (时间 chunk, 各值 chunk)
    pub fn finish(self) -> Result<(EncodedChunk, Vec<EncodedChunk>)> {
        let time = self.time.finish(TIME_CHUNK_MARKER, String::new())?;
        let values = self.values.into_iter()
            .map(|(name, seq)| seq.finish(VALUE_CHUNK_MARKER, name))
            .collect::<Result<Vec<_>>>()?;
        Ok((time, values))
    }
}
