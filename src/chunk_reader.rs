//! Chunk 读取：按 ChunkMeta 定位读入整个 chunk，逐页读取页头，
//! 按需解码或跳过页体。

use std::io::Cursor;

use crate::common::{Result, TsFileError};
use crate::column_writer::ChunkHeader;
use crate::file::ReadFile;
use crate::index::ChunkMeta;
use crate::page::{decode_page, DecodedPage, PageCodec, PageHeader};

/// 已读出页头、尚未解码的页
pub struct RawPage {
    pub header: PageHeader,
    start:      usize,
    end:        usize,
}

pub struct ChunkReader {
    pub header: ChunkHeader,
    codec:      PageCodec,
    data:       Vec<u8>,
    pos:        usize,
    pages_left: u32,
}

impl ChunkReader {
    pub fn load(file: &ReadFile, meta: &ChunkMeta) -> Result<Self> {
        let data = file.read_at(meta.offset, meta.size as usize)?;
        let mut c = Cursor::new(data.as_slice());
        let header = ChunkHeader::deserialize(&mut c)?;
        let pos = c.position() as usize;
        if pos + header.data_size as usize != data.len() {
            return Err(TsFileError::CorruptFile(format!(
                "chunk {} at {}: header says {} data bytes, index says {}",
                header.measurement, meta.offset, header.data_size, data.len() - pos,
            )));
        }
        let codec = header.codec()?;
        let pages_left = header.page_count;
        Ok(Self { header, codec, data, pos, pages_left })
    }

    /// 读下一页的页头；chunk 读完返回 None
    pub fn next_page(&mut self) -> Result<Option<RawPage>> {
        if self.pages_left == 0 {
            if self.pos != self.data.len() {
                return Err(TsFileError::CorruptFile("trailing bytes after last page".into()));
            }
            return Ok(None);
        }
        let mut c = Cursor::new(&self.data[self.pos..]);
        let header = PageHeader::deserialize(&mut c)?;
        let start = self.pos + c.position() as usize;
        let end = start + header.compressed_size as usize;
        if end > self.data.len() {
            return Err(TsFileError::CorruptFile("page body overruns chunk".into()));
        }
        self.pos = end;
        self.pages_left -= 1;
        Ok(Some(RawPage { header, start, end }))
    }

    pub fn decode(&self, page: &RawPage) -> Result<DecodedPage> {
        decode_page(&page.header, &self.data[page.start..page.end], &self.codec)
    }
}
