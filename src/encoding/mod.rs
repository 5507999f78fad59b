//! 列编码
//!
//! 支持五种编码（只作用于非空值，空值由页内位图表示）：
//! - **Plain**：定长小端 / 变长带长度前缀，所有类型可用
//! - **Rle**：(run, value) 对，适合低基数或长段重复
//! - **Ts2Diff**：二阶差分 + zigzag varint，整数类型与时间列
//! - **Gorilla**：XOR 浮点位压缩，FLOAT / DOUBLE
//! - **Dictionary**：字典编码，TEXT / STRING / BLOB

mod gorilla;

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{read_bytes, write_bytes, Result, TsFileError};
use crate::field_type::{EncodingType, TsDataType, Value};

// ── 统一编/解码入口 ───────────────────────────────────────────────────────────

pub fn encode(values: &[Value], dt: TsDataType, enc: EncodingType) -> Result<Vec<u8>> {
    enc.check(dt)?;
    if let Some(bad) = values.iter().find(|v| !dt.accepts(v)) {
        return Err(TsFileError::Encoding(
            format!("{} value in {dt} column", bad.kind_name()),
        ));
    }
    match enc {
        EncodingType::Plain      => plain::encode(values),
        EncodingType::Rle        => rle::encode(values),
        EncodingType::Ts2Diff    => Ok(ts2diff::encode(&as_i64s(values))),
        EncodingType::Gorilla    => Ok(gorilla::encode(values, dt)),
        EncodingType::Dictionary => dict::encode(values),
    }
}

pub fn decode(data: &[u8], dt: TsDataType, enc: EncodingType, count: usize) -> Result<Vec<Value>> {
    enc.check(dt)?;
    match enc {
        EncodingType::Plain      => plain::decode(data, dt, count),
        EncodingType::Rle        => rle::decode(data, dt, count),
        EncodingType::Ts2Diff    => {
            let ints = ts2diff::decode(data, count)?;
            Ok(ints.into_iter().map(|v| widen(v, dt)).collect())
        }
        EncodingType::Gorilla    => gorilla::decode(data, dt, count),
        EncodingType::Dictionary => dict::decode(data, count),
    }
}

/// 时间列专用入口，避免逐个装箱成 Value
pub fn encode_times(ts: &[i64], enc: EncodingType) -> Result<Vec<u8>> {
    match enc {
        EncodingType::Ts2Diff => Ok(ts2diff::encode(ts)),
        EncodingType::Plain   => {
            let mut out = Vec::with_capacity(ts.len() * 8);
            for t in ts {
                out.write_i64::<LittleEndian>(*t)?;
            }
            Ok(out)
        }
        other => Err(TsFileError::Unsupported(format!("time encoding {other:?}"))),
    }
}

pub fn decode_times(data: &[u8], enc: EncodingType, count: usize) -> Result<Vec<i64>> {
    match enc {
        EncodingType::Ts2Diff => ts2diff::decode(data, count),
        EncodingType::Plain   => {
            let mut c = Cursor::new(data);
            (0..count).map(|_| c.read_i64::<LittleEndian>().map_err(truncated)).collect()
        }
        other => Err(TsFileError::Unsupported(format!("time encoding {other:?}"))),
    }
}

fn as_i64s(values: &[Value]) -> Vec<i64> {
    values.iter()
        .map(|v| match v {
            Value::Int32(x) => *x as i64,
            Value::Int64(x) => *x,
            _ => 0,
        })
        .collect()
}

fn widen(v: i64, dt: TsDataType) -> Value {
    match dt {
        TsDataType::Int32 | TsDataType::Date => Value::Int32(v as i32),
        _ => Value::Int64(v),
    }
}

fn truncated(e: std::io::Error) -> TsFileError {
    TsFileError::Encoding(format!("truncated page data: {e}"))
}

// ── varint / zigzag ───────────────────────────────────────────────────────────

fn zigzag(v: i64) -> u64 { ((v << 1) ^ (v >> 63)) as u64 }
fn unzigzag(v: u64) -> i64 { ((v >> 1) as i64) ^ -((v & 1) as i64) }

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn read_varint<R: Read>(r: &mut R) -> Result<u64> {
    let mut v: u64 = 0;
    for shift in (0..64).step_by(7) {
        let b = r.read_u8().map_err(truncated)?;
        v |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(v);
        }
    }
    Err(TsFileError::Encoding("varint overflow".into()))
}

// ── 单值读写（Plain / Rle 共用）───────────────────────────────────────────────

fn write_value(out: &mut Vec<u8>, v: &Value) -> Result<()> {
    match v {
        Value::Boolean(x) => out.push(*x as u8),
        Value::Int32(x)   => out.write_i32::<LittleEndian>(*x)?,
        Value::Int64(x)   => out.write_i64::<LittleEndian>(*x)?,
        Value::Float(x)   => out.write_f32::<LittleEndian>(*x)?,
        Value::Double(x)  => out.write_f64::<LittleEndian>(*x)?,
        Value::Binary(b)  => write_bytes(out, b)?,
    }
    Ok(())
}

fn read_value<R: Read>(r: &mut R, dt: TsDataType) -> Result<Value> {
    let v = match dt {
        TsDataType::Boolean                       => Value::Boolean(r.read_u8().map_err(truncated)? != 0),
        TsDataType::Int32 | TsDataType::Date      => Value::Int32(r.read_i32::<LittleEndian>().map_err(truncated)?),
        TsDataType::Int64 | TsDataType::Timestamp => Value::Int64(r.read_i64::<LittleEndian>().map_err(truncated)?),
        TsDataType::Float                         => Value::Float(r.read_f32::<LittleEndian>().map_err(truncated)?),
        TsDataType::Double                        => Value::Double(r.read_f64::<LittleEndian>().map_err(truncated)?),
        TsDataType::Text | TsDataType::String
        | TsDataType::Blob                        => Value::Binary(read_bytes(r).map_err(truncated)?),
    };
    Ok(v)
}

// ── Plain ─────────────────────────────────────────────────────────────────────
mod plain {
    use super::*;

    pub fn encode(values: &[Value]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for v in values {
            write_value(&mut out, v)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8], dt: TsDataType, count: usize) -> Result<Vec<Value>> {
        let mut c = Cursor::new(data);
        (0..count).map(|_| read_value(&mut c, dt)).collect()
    }
}

/// 按位相等：浮点区分 0.0 / -0.0，同一 NaN 位型视为相等
fn same_bits(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x),  Value::Float(y))  => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

// ── Run-Length Encoding ───────────────────────────────────────────────────────
mod rle {
    use super::*;

    pub fn encode(values: &[Value]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let Some(first) = values.first() else { return Ok(out) };
        let mut cur = first;
        let mut run: u64 = 1;

        for v in &values[1..] {
            if same_bits(v, cur) {
                run += 1;
            } else {
                write_run(&mut out, run, cur)?;
                cur = v;
                run = 1;
            }
        }
        write_run(&mut out, run, cur)?;
        Ok(out)
    }

    fn write_run(out: &mut Vec<u8>, run: u64, v: &Value) -> Result<()> {
        write_varint(out, run);
        write_value(out, v)
    }

    pub fn decode(data: &[u8], dt: TsDataType, count: usize) -> Result<Vec<Value>> {
        let mut c = Cursor::new(data);
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let run = read_varint(&mut c)? as usize;
            if run == 0 || out.len() + run > count {
                return Err(TsFileError::Encoding("rle run exceeds value count".into()));
            }
            let v = read_value(&mut c, dt)?;
            out.extend(std::iter::repeat(v).take(run));
        }
        Ok(out)
    }
}

// ── TS_2DIFF ──────────────────────────────────────────────────────────────────
//
// first (zigzag varint) | first delta | delta-of-delta ...
// 全部使用 wrapping 运算，整个 i64 取值域都可无损往返。
mod ts2diff {
    use super::*;

    pub fn encode(ints: &[i64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ints.len() * 2);
        let mut prev = 0i64;
        let mut prev_delta = 0i64;
        for (i, &x) in ints.iter().enumerate() {
            match i {
                0 => write_varint(&mut out, zigzag(x)),
                1 => {
                    prev_delta = x.wrapping_sub(prev);
                    write_varint(&mut out, zigzag(prev_delta));
                }
                _ => {
                    let delta = x.wrapping_sub(prev);
                    write_varint(&mut out, zigzag(delta.wrapping_sub(prev_delta)));
                    prev_delta = delta;
                }
            }
            prev = x;
        }
        out
    }

    pub fn decode(data: &[u8], count: usize) -> Result<Vec<i64>> {
        let mut c = Cursor::new(data);
        let mut out = Vec::with_capacity(count);
        let mut prev = 0i64;
        let mut delta = 0i64;
        for i in 0..count {
            let raw = unzigzag(read_varint(&mut c)?);
            let x = match i {
                0 => raw,
                1 => { delta = raw; prev.wrapping_add(delta) }
                _ => { delta = delta.wrapping_add(raw); prev.wrapping_add(delta) }
            };
            out.push(x);
            prev = x;
        }
        Ok(out)
    }
}

// ── Dictionary ────────────────────────────────────────────────────────────────
mod dict {
    use super::*;

    pub fn encode(values: &[Value]) -> Result<Vec<u8>> {
        let mut dict: Vec<&[u8]> = Vec::new();
        let mut lookup: HashMap<&[u8], u64> = HashMap::new();
        let mut codes: Vec<u64> = Vec::with_capacity(values.len());

        for v in values {
            let key: &[u8] = match v {
                Value::Binary(b) => b,
                other => return Err(TsFileError::Encoding(
                    format!("dictionary encoding of {}", other.kind_name()),
                )),
            };
            let code = *lookup.entry(key).or_insert_with(|| {
                dict.push(key);
                (dict.len() - 1) as u64
            });
            codes.push(code);
        }

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(dict.len() as u32)?;
        for entry in &dict {
            write_bytes(&mut out, entry)?;
        }
        for c in codes {
            write_varint(&mut out, c);
        }
        Ok(out)
    }

    pub fn decode(data: &[u8], count: usize) -> Result<Vec<Value>> {
        let mut c = Cursor::new(data);
        let dict_len = c.read_u32::<LittleEndian>().map_err(truncated)? as usize;
        let mut dict: Vec<Vec<u8>> = Vec::with_capacity(dict_len.min(count.max(1)));
        for _ in 0..dict_len {
            dict.push(read_bytes(&mut c).map_err(truncated)?);
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let code = read_varint(&mut c)? as usize;
            let entry = dict.get(code)
                .ok_or_else(|| TsFileError::Encoding(format!("dictionary code {code} out of range")))?;
            out.push(Value::Binary(entry.clone()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: Vec<Value>, dt: TsDataType, enc: EncodingType) {
        let bytes = encode(&values, dt, enc).unwrap();
        let back = decode(&bytes, dt, enc, values.len()).unwrap();
        assert_eq!(back.len(), values.len(), "{dt} / {enc:?}");
        for (b, v) in back.iter().zip(&values) {
            assert!(same_bits(b, v), "{dt} / {enc:?}: {b:?} != {v:?}");
        }
    }

    #[test]
    fn every_supported_pair_roundtrips() {
        let ints: Vec<Value> = [5i64, 7, 9, 9, 9, -3, i64::MAX, i64::MIN].into_iter().map(Value::Int64).collect();
        let dates: Vec<Value> = [20240101, 20240102, 20240102].into_iter().map(Value::Int32).collect();
        let floats: Vec<Value> = [1.5f32, 1.5, -0.25, 0.0, -0.0, f32::MAX].into_iter().map(Value::Float).collect();
        let doubles: Vec<Value> = [12.5f64, 12.75, 12.75, 0.0, -0.0, -0.0, -1e300].into_iter().map(Value::Double).collect();
        let texts: Vec<Value> = ["a", "bb", "a", "", "bb"].into_iter().map(Value::from).collect();
        let bools: Vec<Value> = [true, true, false, true].into_iter().map(Value::Boolean).collect();

        for enc in [EncodingType::Plain, EncodingType::Rle, EncodingType::Ts2Diff] {
            roundtrip(ints.clone(), TsDataType::Int64, enc);
            roundtrip(dates.clone(), TsDataType::Date, enc);
        }
        for enc in [EncodingType::Plain, EncodingType::Rle, EncodingType::Gorilla] {
            roundtrip(floats.clone(), TsDataType::Float, enc);
            roundtrip(doubles.clone(), TsDataType::Double, enc);
        }
        for enc in [EncodingType::Plain, EncodingType::Rle, EncodingType::Dictionary] {
            roundtrip(texts.clone(), TsDataType::Text, enc);
        }
        roundtrip(bools, TsDataType::Boolean, EncodingType::Rle);
    }

    #[test]
    fn rle_keeps_signed_zero_and_nan() {
        let values: Vec<Value> = [0.0f64, -0.0, -0.0, f64::NAN, f64::NAN, 0.0].into_iter().map(Value::Double).collect();
        let bytes = encode(&values, TsDataType::Double, EncodingType::Rle).unwrap();
        let back = decode(&bytes, TsDataType::Double, EncodingType::Rle, values.len()).unwrap();
        let signs: Vec<bool> = back.iter()
            .map(|v| matches!(v, Value::Double(x) if x.is_sign_negative()))
            .collect();
        assert_eq!(signs, vec![false, true, true, false, false, false]);
        assert!(matches!(back[3], Value::Double(x) if x.is_nan()));
        assert!(matches!(back[4], Value::Double(x) if x.is_nan()));
    }

    #[test]
    fn rle_collapses_runs() {
        let values = vec![Value::Int32(4); 1000];
        let bytes = encode(&values, TsDataType::Int32, EncodingType::Rle).unwrap();
        assert!(bytes.len() < 8);
    }

    #[test]
    fn ts2diff_is_compact_for_regular_times() {
        let ts: Vec<i64> = (0..1000).map(|i| 1_700_000_000_000 + i * 1000).collect();
        let bytes = encode_times(&ts, EncodingType::Ts2Diff).unwrap();
        assert!(bytes.len() < 1100);
        assert_eq!(decode_times(&bytes, EncodingType::Ts2Diff, ts.len()).unwrap(), ts);
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        let v = vec![Value::Int64(1)];
        assert!(matches!(
            encode(&v, TsDataType::Int64, EncodingType::Gorilla),
            Err(TsFileError::Unsupported(_))
        ));
        assert!(matches!(
            encode(&v, TsDataType::Int32, EncodingType::Plain),
            Err(TsFileError::Encoding(_))
        ));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let bytes = encode(&[Value::Int64(1), Value::Int64(2)], TsDataType::Int64, EncodingType::Plain).unwrap();
        assert!(decode(&bytes[..10], TsDataType::Int64, EncodingType::Plain, 2).is_err());
    }
}
