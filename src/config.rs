//! 写入参数

use crate::field_type::{CompressionType, EncodingType};

/// 写入器配置。默认值对齐常见 TsFile 部署。
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// 缓冲字节数超过该值时，`write_*` 返回前隐式 flush
    pub memory_threshold:      u64,
    /// 单页最大点数
    pub page_max_points:       usize,
    /// 单页编码前估算字节上限
    pub page_max_bytes:        usize,
    pub time_encoding:         EncodingType,
    pub time_compression:      CompressionType,
    /// 序列路径 Bloom Filter 每条序列分配的位数
    pub bloom_bits_per_series: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            memory_threshold:      128 * 1024 * 1024,
            page_max_points:       1024,
            page_max_bytes:        64 * 1024,
            time_encoding:         EncodingType::Ts2Diff,
            time_compression:      CompressionType::Lz4,
            bloom_bits_per_series: 10,
        }
    }
}

impl WriterConfig {
    pub fn with_memory_threshold(mut self, bytes: u64) -> Self {
        self.memory_threshold = bytes; self
    }
    pub fn with_page_max_points(mut self, n: usize) -> Self {
        self.page_max_points = n.max(1); self
    }
    pub fn with_page_max_bytes(mut self, n: usize) -> Self {
        self.page_max_bytes = n.max(1); self
    }
    pub fn with_time_encoding(mut self, enc: EncodingType) -> Self {
        self.time_encoding = enc; self
    }
    pub fn with_time_compression(mut self, comp: CompressionType) -> Self {
        self.time_compression = comp; self
    }
}
