//! Schema 元数据：树模型的 MeasurementSchema、表模型的 ColumnSchema / TableSchema，
//! 以及标识一组 chunk 归属的 DeviceId。

use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{
    read_opt_str, read_str, write_opt_str, write_str, Result, TsFileError,
};
use crate::field_type::{ColumnCategory, CompressionType, EncodingType, TsDataType};

// ── 测点定义（树模型）─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementSchema {
    pub name:        String,
    pub data_type:   TsDataType,
    pub encoding:    EncodingType,
    pub compression: CompressionType,
}

impl MeasurementSchema {
    /// 使用该类型的默认编码与 LZ4 压缩
    pub fn new(name: &str, data_type: TsDataType) -> Self {
        Self {
            name: name.into(), data_type,
            encoding: data_type.default_encoding(),
            compression: CompressionType::Lz4,
        }
    }

    pub fn with_encoding(mut self, enc: EncodingType) -> Self {
        self.encoding = enc; self
    }
    pub fn with_compression(mut self, comp: CompressionType) -> Self {
        self.compression = comp; self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TsFileError::SchemaMismatch("empty measurement name".into()));
        }
        self.encoding.check(self.data_type)
    }

    pub(crate) fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_str(w, &self.name)?;
        w.write_u8(self.data_type as u8)?;
        w.write_u8(self.encoding as u8)?;
        w.write_u8(self.compression as u8)
    }

    pub(crate) fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let name = read_str(r)?;
        let data_type = TsDataType::from_u8(r.read_u8()?).ok_or_else(|| invalid("data type"))?;
        let encoding = EncodingType::from_u8(r.read_u8()?).ok_or_else(|| invalid("encoding"))?;
        let compression = CompressionType::from_u8(r.read_u8()?)
            .ok_or_else(|| invalid("compression"))?;
        Ok(Self { name, data_type, encoding, compression })
    }
}

// ── 列定义（表模型）───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name:        String,
    pub data_type:   TsDataType,
    pub encoding:    EncodingType,
    pub compression: CompressionType,
    pub category:    ColumnCategory,
}

impl ColumnSchema {
    pub fn new(name: &str, data_type: TsDataType, category: ColumnCategory) -> Self {
        Self {
            name: name.into(), data_type,
            encoding: data_type.default_encoding(),
            compression: CompressionType::Lz4,
            category,
        }
    }
    /// 构建 TAG 列
    pub fn tag(name: &str, data_type: TsDataType) -> Self {
        Self::new(name, data_type, ColumnCategory::Tag)
    }
    /// 构建 FIELD 列
    pub fn field(name: &str, data_type: TsDataType) -> Self {
        Self::new(name, data_type, ColumnCategory::Field)
    }

    pub fn with_encoding(mut self, enc: EncodingType) -> Self {
        self.encoding = enc; self
    }
    pub fn with_compression(mut self, comp: CompressionType) -> Self {
        self.compression = comp; self
    }

    pub fn is_tag(&self) -> bool { self.category == ColumnCategory::Tag }

    /// FIELD 列落盘时等价于一个测点
    pub fn to_measurement(&self) -> MeasurementSchema {
        MeasurementSchema {
            name:        self.name.to_lowercase(),
            data_type:   self.data_type,
            encoding:    self.encoding,
            compression: self.compression,
        }
    }
}

// ── 表定义 ────────────────────────────────────────────────────────────────────

/// 表名 + 有序列定义。名字大小写不敏感，内部以小写作为查找键。
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table_name: String,
    columns:        Vec<ColumnSchema>,
    name_index:     HashMap<String, usize>,
}

impl TableSchema {
    pub fn new(table_name: &str, columns: Vec<ColumnSchema>) -> Result<Self> {
        if table_name.is_empty() {
            return Err(TsFileError::SchemaMismatch("empty table name".into()));
        }
        let mut name_index = HashMap::with_capacity(columns.len());
        for (i, c) in columns.iter().enumerate() {
            if c.name.is_empty() {
                return Err(TsFileError::SchemaMismatch("empty column name".into()));
            }
            if c.is_tag() && !c.data_type.is_binary() {
                return Err(TsFileError::SchemaMismatch(
                    format!("tag column {} must be a string type", c.name),
                ));
            }
            c.encoding.check(c.data_type)?;
            if name_index.insert(c.name.to_lowercase(), i).is_some() {
                return Err(TsFileError::SchemaMismatch(format!("duplicate column {}", c.name)));
            }
        }
        Ok(Self { table_name: table_name.into(), columns, name_index })
    }

    pub fn columns(&self) -> &[ColumnSchema] { &self.columns }
    pub fn num_columns(&self) -> usize { self.columns.len() }

    /// 表名查找键
    pub fn key(&self) -> String { self.table_name.to_lowercase() }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.name_index.get(&name.to_lowercase()).copied()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.find_column(name).map(|i| &self.columns[i])
    }

    pub fn tag_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| c.is_tag())
    }
    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.iter().filter(|c| !c.is_tag())
    }

    /// 列在 TAG 列中的序号（设备标识中的位置）
    pub fn tag_position(&self, name: &str) -> Option<usize> {
        let key = name.to_lowercase();
        self.tag_columns().position(|c| c.name.to_lowercase() == key)
    }

    pub(crate) fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_str(w, &self.table_name)?;
        w.write_u32::<LittleEndian>(self.columns.len() as u32)?;
        for c in &self.columns {
            write_str(w, &c.name)?;
            w.write_u8(c.data_type as u8)?;
            w.write_u8(c.encoding as u8)?;
            w.write_u8(c.compression as u8)?;
            w.write_u8(c.category as u8)?;
        }
        Ok(())
    }

    pub(crate) fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let table_name = read_str(r)?;
        let n = r.read_u32::<LittleEndian>()? as usize;
        let mut columns = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            let name = read_str(r)?;
            let data_type = TsDataType::from_u8(r.read_u8()?).ok_or_else(|| invalid("data type"))?;
            let encoding = EncodingType::from_u8(r.read_u8()?).ok_or_else(|| invalid("encoding"))?;
            let compression = CompressionType::from_u8(r.read_u8()?)
                .ok_or_else(|| invalid("compression"))?;
            let category = ColumnCategory::from_u8(r.read_u8()?).ok_or_else(|| invalid("category"))?;
            columns.push(ColumnSchema { name, data_type, encoding, compression, category });
        }
        Self::new(&table_name, columns).map_err(|e| invalid(&e.to_string()))
    }
}

// ── 设备标识 ──────────────────────────────────────────────────────────────────

/// 一个 ChunkGroup 的归属：
///   - 树模型：单段，设备路径（如 `root.db1.d1`）
///   - 表模型：首段为表名（小写），其后依次为各 TAG 列的值，TAG 为空时为 None
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    segments: Vec<Option<String>>,
}

impl DeviceId {
    pub fn tree(path: &str) -> Self {
        Self { segments: vec![Some(path.into())] }
    }

    pub fn table(table_name: &str, tags: Vec<Option<String>>) -> Self {
        let mut segments = Vec::with_capacity(tags.len() + 1);
        segments.push(Some(table_name.to_lowercase()));
        segments.extend(tags);
        Self { segments }
    }

    /// 树模型下为设备路径，表模型下为表名
    pub fn first_segment(&self) -> &str {
        self.segments.first().and_then(|s| s.as_deref()).unwrap_or("")
    }

    /// 表模型的 TAG 值
    pub fn tags(&self) -> &[Option<String>] {
        if self.segments.is_empty() { &[] } else { &self.segments[1..] }
    }

    pub fn segments(&self) -> &[Option<String>] { &self.segments }

    pub(crate) fn serialize<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.segments.len() as u32)?;
        for s in &self.segments {
            write_opt_str(w, s.as_deref())?;
        }
        Ok(())
    }

    pub(crate) fn deserialize<R: Read>(r: &mut R) -> io::Result<Self> {
        let n = r.read_u32::<LittleEndian>()? as usize;
        if n == 0 {
            return Err(invalid("empty device id"));
        }
        let mut segments = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            segments.push(read_opt_str(r)?);
        }
        Ok(Self { segments })
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 { f.write_str(".")?; }
            f.write_str(s.as_deref().unwrap_or("null"))?;
        }
        Ok(())
    }
}

fn invalid(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("invalid {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sensors() -> TableSchema {
        TableSchema::new("Sensors", vec![
            ColumnSchema::tag("Region", TsDataType::String),
            ColumnSchema::field("Temp", TsDataType::Double),
        ]).unwrap()
    }

    #[test]
    fn column_lookup_ignores_case() {
        let s = sensors();
        assert_eq!(s.find_column("region"), Some(0));
        assert_eq!(s.find_column("TEMP"), Some(1));
        assert_eq!(s.tag_position("REGION"), Some(0));
        assert_eq!(s.key(), "sensors");
    }

    #[test]
    fn duplicate_and_bad_columns_rejected() {
        let dup = TableSchema::new("t", vec![
            ColumnSchema::field("a", TsDataType::Int32),
            ColumnSchema::field("A", TsDataType::Int64),
        ]);
        assert!(matches!(dup, Err(TsFileError::SchemaMismatch(_))));

        let bad_enc = TableSchema::new("t", vec![
            ColumnSchema::field("a", TsDataType::Int32).with_encoding(EncodingType::Gorilla),
        ]);
        assert!(matches!(bad_enc, Err(TsFileError::Unsupported(_))));
    }

    #[test]
    fn table_schema_serialization() {
        let s = sensors();
        let mut buf = Vec::new();
        s.serialize(&mut buf).unwrap();
        let back = TableSchema::deserialize(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back.columns(), s.columns());
        assert_eq!(back.table_name, "Sensors");
    }

    #[test]
    fn device_ids_order_and_display() {
        let a = DeviceId::table("T", vec![None, Some("x".into())]);
        let b = DeviceId::table("t", vec![Some("a".into()), None]);
        assert!(a < b);
        assert_eq!(a.to_string(), "t.null.x");
        assert_eq!(DeviceId::tree("root.sg.d1").first_segment(), "root.sg.d1");
    }
}
