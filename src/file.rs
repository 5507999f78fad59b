//! TsFile 文件句柄与首尾结构
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC   (6 bytes) "TsFile"        │
//! │  Version (1 byte)  = 4             │
//! ├────────────────────────────────────┤
//! │  CHUNK GROUPS                      │
//! │    0x00 | DeviceId | Chunk*        │
//! │    ...                             │
//! ├────────────────────────────────────┤
//! │  METADATA INDEX                    │
//! ├────────────────────────────────────┤
//! │  FOOTER (22 bytes)                 │
//! │    index offset (u64 LE)           │
//! │    index length (u32 LE)           │
//! │    index CRC32  (u32 LE)           │
//! │    MAGIC        (6 bytes)          │
//! └────────────────────────────────────┘
//! ```
//!
//! 写端只做顺序追加并自己记录位置；读端只做定位读，可被多个查询共享。

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::common::{Result, TsFileError};

pub const MAGIC:      &[u8; 6] = b"TsFile";
pub const VERSION:    u8       = 4;
pub const HEADER_LEN: u64      = 7;
pub const FOOTER_LEN: u64      = 22;

/// 默认文件权限
pub const DEFAULT_MODE: u32 = 0o644;

// ── 打开方式 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    /// 不存在时创建
    pub create:   bool,
    /// 已存在时截断
    pub truncate: bool,
    /// 已存在时报错
    pub exclusive: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self { create: true, truncate: true, exclusive: false }
    }
}

// ── WriteFile ─────────────────────────────────────────────────────────────────

/// 顺序追加的写端
pub struct WriteFile {
    out:  BufWriter<File>,
    pos:  u64,
    path: PathBuf,
}

impl WriteFile {
    /// 打开并写入文件头。未截断的非空文件无法追加，返回 AlreadyExists。
    pub fn create(path: &Path, flags: OpenFlags, mode: u32) -> Result<Self> {
        let mut opts = OpenOptions::new();
        opts.write(true)
            .create(flags.create)
            .truncate(flags.truncate)
            .create_new(flags.exclusive);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = opts.open(path)?;
        if file.metadata()?.len() != 0 {
            return Err(TsFileError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is not empty", path.display()),
            )));
        }

        let mut w = Self { out: BufWriter::new(file), pos: 0, path: path.to_path_buf() };
        w.append(MAGIC)?;
        w.append(&[VERSION])?;
        Ok(w)
    }

    /// 追加字节，返回写入起始偏移
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let at = self.pos;
        self.out.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(at)
    }

    pub fn position(&self) -> u64 { self.pos }

    pub fn path(&self) -> &Path { &self.path }

    /// 刷盘并释放句柄
    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

// ── ReadFile ──────────────────────────────────────────────────────────────────

/// 定位读的读端；`&self` 即可读，可经 `Arc` 在多个结果集间共享
#[derive(Debug)]
pub struct ReadFile {
    file: File,
    len:  u64,
}

impl ReadFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    pub(crate) fn len(&self) -> u64 { self.len }

    /// 读取 [offset, offset+len)；越过文件末尾视为文件损坏
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |e| e > self.len) {
            return Err(TsFileError::CorruptFile(format!(
                "read of {len} bytes at {offset} past end of file ({})", self.len
            )));
        }
        let mut buf = vec![0u8; len];
        self.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.file.seek_read(buf, offset)? {
                0 => return Err(io::ErrorKind::UnexpectedEof.into()),
                n => { buf = &mut buf[n..]; offset += n as u64; }
            }
        }
        Ok(())
    }
}

// ── Footer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub index_offset: u64,
    pub index_len:    u32,
    pub index_crc:    u32,
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_LEN as usize] {
        let mut out = [0u8; FOOTER_LEN as usize];
        out[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.index_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.index_crc.to_le_bytes());
        out[16..22].copy_from_slice(MAGIC);
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let bytes: &[u8; FOOTER_LEN as usize] = data.try_into()
            .map_err(|_| TsFileError::CorruptFile("footer has wrong size".into()))?;
        if &bytes[16..22] != MAGIC {
            return Err(TsFileError::CorruptFile("missing magic trailer".into()));
        }
        let mut off = [0u8; 8];
        off.copy_from_slice(&bytes[0..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&bytes[8..12]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&bytes[12..16]);
        Ok(Self {
            index_offset: u64::from_le_bytes(off),
            index_len:    u32::from_le_bytes(len),
            index_crc:    u32::from_le_bytes(crc),
        })
    }
}

/// 校验文件头
pub fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < HEADER_LEN as usize || &data[..6] != MAGIC {
        return Err(TsFileError::CorruptFile("missing magic header".into()));
    }
    if data[6] != VERSION {
        return Err(TsFileError::Unsupported(format!("file version {}", data[6])));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip_and_magic_check() {
        let f = Footer { index_offset: 1234, index_len: 99, index_crc: 0xdeadbeef };
        let bytes = f.to_bytes();
        assert_eq!(Footer::parse(&bytes).unwrap(), f);

        let mut bad = bytes;
        bad[21] = b'x';
        assert!(matches!(Footer::parse(&bad), Err(TsFileError::CorruptFile(_))));
    }

    #[test]
    fn positioned_reads_are_bounds_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.tsfile");
        let mut w = WriteFile::create(&path, OpenFlags::default(), DEFAULT_MODE).unwrap();
        assert_eq!(w.append(b"abc").unwrap(), HEADER_LEN);
        w.close().unwrap();

        let r = ReadFile::open(&path).unwrap();
        assert_eq!(r.len(), HEADER_LEN + 3);
        check_header(&r.read_at(0, HEADER_LEN as usize).unwrap()).unwrap();
        assert_eq!(r.read_at(HEADER_LEN, 3).unwrap(), b"abc");
        assert!(r.read_at(HEADER_LEN, 4).is_err());
    }

    #[test]
    fn exclusive_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.tsfile");
        WriteFile::create(&path, OpenFlags::default(), DEFAULT_MODE).unwrap().close().unwrap();
        let flags = OpenFlags { exclusive: true, ..OpenFlags::default() };
        assert!(WriteFile::create(&path, flags, DEFAULT_MODE).is_err());
    }
}
