//! # tsfile-engine
//!
//! TsFile 列式时序文件格式的 Rust 实现：写入引擎 + 查询引擎，支持两种数据模型：
//! - **树模型**：设备路径下挂测点（`root.db1.d1.s1`），可选对齐设备
//! - **表模型**：TAG 列标识设备、FIELD 列存值，每个设备一组对齐列
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  TsFileWriter<TreeModel | TableModel>        TsFileReader     │
//! │    Tablet ─▶ 设备缓冲 ─▶ flush           query_tree / query_table
//! │                 │                                  │          │
//! │   ChunkWriter / AlignedChunkWriter        Filter ─▶ Pred       │
//! │    ├─ PageBuilder + Statistics            scan: ChunkCursor    │
//! │    ├─ encoding (Plain/RLE/TS_2DIFF/            GroupCursor     │
//! │    │            Gorilla/Dictionary)            Interleave      │
//! │    └─ compression (LZ4/None)              TimeGenerator        │
//! │                 │                                  │          │
//! │   ChunkGroup ─▶ 文件 ◀── ChunkReader ◀─────────────┘          │
//! │   MetadataIndex（设备 → 序列 → chunk 统计 + Bloom Filter）     │
//! │                 │                        ResultSet（游标）    │
//! │   "TsFile" v4 │ ChunkGroup … │ Index │ Footer                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

// ── 基础类型 ──────────────────────────────────────────────────────────────────
pub mod common;
pub mod field_type;
pub mod meta;
pub mod config;
pub mod tablet;

// ── 存储格式 ──────────────────────────────────────────────────────────────────
pub mod encoding;
pub mod compression;
pub mod statistics;
pub mod page;
pub mod column_writer;
pub mod chunk_reader;
pub mod index;
pub mod file;

// ── 查询 ──────────────────────────────────────────────────────────────────────
pub mod filter;
mod scan;
mod time_generator;
pub mod result_set;

// ── 引擎入口 ──────────────────────────────────────────────────────────────────
pub mod writer;
pub mod reader;

pub use common::{Result, TimeRange, Timestamp, TsFileError};
pub use config::WriterConfig;
pub use field_type::{ColumnCategory, CompressionType, EncodingType, TsDataType, Value};
pub use file::OpenFlags;
pub use filter::{CompareOp, Filter};
pub use meta::{ColumnSchema, DeviceId, MeasurementSchema, TableSchema};
pub use reader::TsFileReader;
pub use result_set::{CursorState, ResultSet, ResultSetMetadata};
pub use tablet::{ColumnRef, Tablet};
pub use writer::{TableModel, TableWriter, TreeModel, TreeWriter, TsFileWriter};
