//! 页体压缩/解压（LZ4 / Uncompressed）

use crate::common::{Result, TsFileError};
use crate::field_type::CompressionType;

pub fn compress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::Uncompressed => Ok(data.to_vec()),
        CompressionType::Lz4          =>
            lz4::block::compress(data, None, false)
                .map_err(|e| TsFileError::Compression(e.to_string())),
    }
}

pub fn decompress(
    data:             &[u8],
    codec:            CompressionType,
    uncompressed_len: usize,
) -> Result<Vec<u8>> {
    let out = match codec {
        CompressionType::Uncompressed => data.to_vec(),
        CompressionType::Lz4          => {
            if uncompressed_len == 0 {
                return Ok(Vec::new());
            }
            lz4::block::decompress(data, Some(uncompressed_len as i32))
                .map_err(|e| TsFileError::Compression(e.to_string()))?
        }
    };
    if out.len() != uncompressed_len {
        return Err(TsFileError::Compression(format!(
            "expected {uncompressed_len} bytes after decompression, got {}", out.len()
        )));
    }
    Ok(out)
}
