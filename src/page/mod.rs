//! Page 读写
//!
//! ```text
//! ┌───────────────────────────────────┐
//! │ uncompressed_size (u32 LE)        │
//! │ compressed_size   (u32 LE)        │
//! │ crc32             (u32 LE)        │  压缩后 body 的校验和
//! │ row_count         (u32 LE)        │
//! │ statistics                        │
//! ├───────────────────────────────────┤
//! │ body (compressed)                 │
//! └───────────────────────────────────┘
//! ```
//!
//! body 解压后的内容按页类型区分：
//!   - NonAligned：`time_len u32 | times | values`，每行都有值
//!   - Time      ：`times`
//!   - Value     ：`bitmap (ceil(rows/8), 低位在前) | 非空 values`

use std::io::{Cursor, Read, Write};

use bitvec::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{corrupt, Result, Timestamp, TsFileError};
use crate::compression;
use crate::encoding;
use crate::field_type::{CompressionType, EncodingType, TsDataType, Value};
use crate::statistics::Statistics;

/// 页类型，由所在 chunk 的标记决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    NonAligned,
    Time,
    Value,
}

/// 编解码一页所需的参数
#[derive(Debug, Clone, Copy)]
pub struct PageCodec {
    pub kind:          PageKind,
    pub data_type:     TsDataType,
    pub encoding:      EncodingType,
    pub time_encoding: EncodingType,
    pub compression:   CompressionType,
}

// ── PageHeader ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PageHeader {
    pub uncompressed_size: u32,
    pub compressed_size:   u32,
    pub crc:               u32,
    pub row_count:         u32,
    pub statistics:        Statistics,
}

impl PageHeader {
    pub(crate) fn serialize<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.crc)?;
        w.write_u32::<LittleEndian>(self.row_count)?;
        self.statistics.serialize(w)?;
        Ok(())
    }

    pub(crate) fn deserialize<R: Read>(r: &mut R) -> Result<Self> {
        let uncompressed_size = r.read_u32::<LittleEndian>().map_err(corrupt)?;
        let compressed_size   = r.read_u32::<LittleEndian>().map_err(corrupt)?;
        let crc               = r.read_u32::<LittleEndian>().map_err(corrupt)?;
        let row_count         = r.read_u32::<LittleEndian>().map_err(corrupt)?;
        let statistics        = Statistics::deserialize(r).map_err(corrupt)?;
        Ok(Self { uncompressed_size, compressed_size, crc, row_count, statistics })
    }
}

// ── PageBuilder ───────────────────────────────────────────────────────────────

pub struct PageBuilder {
    codec:     PageCodec,
    times:     Vec<Timestamp>,
    values:    Vec<Value>,
    present:   BitVec<u8, Lsb0>,
    stats:     Statistics,
    est_bytes: usize,
}

impl PageBuilder {
    pub fn new(codec: PageCodec) -> Self {
        Self {
            codec,
            times: Vec::new(), values: Vec::new(), present: BitVec::new(),
            stats: Statistics::new(), est_bytes: 0,
        }
    }

    /// 非对齐页：一行 = 一个 (时间, 值)
    pub fn add_point(&mut self, ts: Timestamp, v: Value) {
        self.est_bytes += 8 + v.mem_size();
        self.stats.update(ts, &v);
        self.times.push(ts);
        self.values.push(v);
    }

    /// 时间页
    pub fn add_time(&mut self, ts: Timestamp) {
        self.est_bytes += 8;
        self.stats.update_time(ts);
        self.times.push(ts);
    }

    /// 对齐值页：一行对应时间页中的同一行，可能为空
    pub fn add_cell(&mut self, ts: Timestamp, v: Option<Value>) {
        match v {
            Some(v) => {
                self.est_bytes += v.mem_size();
                self.stats.update(ts, &v);
                self.values.push(v);
                self.present.push(true);
            }
            None => {
                self.stats.update_null();
                self.present.push(false);
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.codec.kind {
            PageKind::Value => self.present.len(),
            _               => self.times.len(),
        }
    }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    pub fn est_bytes(&self) -> usize { self.est_bytes }

    /// 序列化为页字节（encode → compress → 加 header）
    pub fn build(self) -> Result<(Vec<u8>, Statistics)> {
        let c = self.codec;
        let row_count = self.len() as u32;
        let mut raw = Vec::with_capacity(self.est_bytes + 8);
        match c.kind {
            PageKind::NonAligned => {
                let times = encoding::encode_times(&self.times, c.time_encoding)?;
                raw.write_u32::<LittleEndian>(times.len() as u32)?;
                raw.extend_from_slice(&times);
                raw.extend(encoding::encode(&self.values, c.data_type, c.encoding)?);
            }
            PageKind::Time => {
                raw.extend(encoding::encode_times(&self.times, c.time_encoding)?);
            }
            PageKind::Value => {
                let mut bitmap = self.present.clone();
                bitmap.set_uninitialized(false);
                raw.extend_from_slice(bitmap.as_raw_slice());
                raw.extend(encoding::encode(&self.values, c.data_type, c.encoding)?);
            }
        }

        let body = compression::compress(&raw, c.compression)?;
        let header = PageHeader {
            uncompressed_size: raw.len() as u32,
            compressed_size:   body.len() as u32,
            crc:               crc32fast::hash(&body),
            row_count,
            statistics:        self.stats.clone(),
        };
        let mut page = Vec::with_capacity(body.len() + 64);
        header.serialize(&mut page)?;
        page.extend_from_slice(&body);
        Ok((page, self.stats))
    }
}

// ── 解码 ──────────────────────────────────────────────────────────────────────

/// 解码后的页：非对齐页两者都有；时间页只有 times；值页只有 values（含空）
#[derive(Debug, Default)]
pub struct DecodedPage {
    pub times:  Vec<Timestamp>,
    pub values: Vec<Option<Value>>,
}

/// 校验 CRC → 解压 → 解码
pub fn decode_page(header: &PageHeader, body: &[u8], codec: &PageCodec) -> Result<DecodedPage> {
    if crc32fast::hash(body) != header.crc {
        return Err(TsFileError::ChecksumMismatch);
    }
    let raw = compression::decompress(body, codec.compression, header.uncompressed_size as usize)?;
    let rows = header.row_count as usize;

    match codec.kind {
        PageKind::NonAligned => {
            let mut c = Cursor::new(raw.as_slice());
            let time_len = c.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
            let split = 4 + time_len;
            if split > raw.len() {
                return Err(TsFileError::CorruptFile("page time section overruns body".into()));
            }
            let times = encoding::decode_times(&raw[4..split], codec.time_encoding, rows)?;
            let values = encoding::decode(&raw[split..], codec.data_type, codec.encoding, rows)?;
            Ok(DecodedPage { times, values: values.into_iter().map(Some).collect() })
        }
        PageKind::Time => {
            let times = encoding::decode_times(&raw, codec.time_encoding, rows)?;
            Ok(DecodedPage { times, values: Vec::new() })
        }
        PageKind::Value => {
            let bitmap_len = rows.div_ceil(8);
            if bitmap_len > raw.len() {
                return Err(TsFileError::CorruptFile("page bitmap overruns body".into()));
            }
            let mut bitmap = BitVec::<u8, Lsb0>::from_vec(raw[..bitmap_len].to_vec());
            bitmap.truncate(rows);
            let non_null = bitmap.count_ones();
            let mut decoded = encoding::decode(
                &raw[bitmap_len..], codec.data_type, codec.encoding, non_null,
            )?.into_iter();
            let values = bitmap.iter().by_vals()
                .map(|p| if p { decoded.next() } else { None })
                .collect();
            Ok(DecodedPage { times: Vec::new(), values })
        }
    }
}
