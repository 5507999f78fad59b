//! Gorilla XOR 浮点编码
//!
//! 首值按原始位宽写出；其后与前值 XOR：
//!   - `0`                          XOR 为 0
//!   - `10` + 有效位                 落在上一个 leading/trailing 窗口内
//!   - `11` + 6 位 leading + 6 位 (len-1) + 有效位

use bitvec::prelude::*;

use crate::common::{Result, TsFileError};
use crate::field_type::{TsDataType, Value};

pub fn encode(values: &[Value], dt: TsDataType) -> Vec<u8> {
    let width = width_of(dt);
    let bits = values.iter().map(|v| match v {
        Value::Float(x)  => x.to_bits() as u64,
        Value::Double(x) => x.to_bits(),
        _ => 0,
    });

    let mut out = BitVec::<u8, Msb0>::new();
    let mut prev: Option<u64> = None;
    let mut window: Option<(u32, u32)> = None;

    for v in bits {
        let Some(p) = prev else {
            push_bits(&mut out, v, width);
            prev = Some(v);
            continue;
        };
        let x = v ^ p;
        if x == 0 {
            out.push(false);
        } else {
            out.push(true);
            let lead = x.leading_zeros() - (64 - width);
            let trail = x.trailing_zeros();
            match window {
                Some((pl, pt)) if lead >= pl && trail >= pt => {
                    out.push(false);
                    push_bits(&mut out, x >> pt, width - pl - pt);
                }
                _ => {
                    out.push(true);
                    let len = width - lead - trail;
                    push_bits(&mut out, lead as u64, 6);
                    push_bits(&mut out, (len - 1) as u64, 6);
                    push_bits(&mut out, x >> trail, len);
                    window = Some((lead, trail));
                }
            }
        }
        prev = Some(v);
    }
    out.into_vec()
}

pub fn decode(data: &[u8], dt: TsDataType, count: usize) -> Result<Vec<Value>> {
    let width = width_of(dt);
    let bits = BitVec::<u8, Msb0>::from_vec(data.to_vec());
    let mut r = BitReader { bits: &bits, pos: 0 };

    let mut out = Vec::with_capacity(count);
    let mut prev = 0u64;
    let mut window = (0u32, 0u32);

    for i in 0..count {
        let v = if i == 0 {
            r.read(width)?
        } else if !r.bit()? {
            prev
        } else if !r.bit()? {
            let (pl, pt) = window;
            prev ^ (r.read(width - pl - pt)? << pt)
        } else {
            let lead = r.read(6)? as u32;
            let len = r.read(6)? as u32 + 1;
            if lead + len > width {
                return Err(TsFileError::Encoding("gorilla window out of range".into()));
            }
            let trail = width - lead - len;
            window = (lead, trail);
            prev ^ (r.read(len)? << trail)
        };
        out.push(match dt {
            TsDataType::Float => Value::Float(f32::from_bits(v as u32)),
            _                 => Value::Double(f64::from_bits(v)),
        });
        prev = v;
    }
    Ok(out)
}

fn width_of(dt: TsDataType) -> u32 {
    if dt == TsDataType::Float { 32 } else { 64 }
}

fn push_bits(out: &mut BitVec<u8, Msb0>, v: u64, n: u32) {
    for i in (0..n).rev() {
        out.push((v >> i) & 1 == 1);
    }
}

struct BitReader<'a> {
    bits: &'a BitVec<u8, Msb0>,
    pos:  usize,
}

impl BitReader<'_> {
    fn bit(&mut self) -> Result<bool> {
        if self.pos >= self.bits.len() {
            return Err(TsFileError::Encoding("gorilla stream truncated".into()));
        }
        let b = self.bits[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read(&mut self, n: u32) -> Result<u64> {
        let mut v = 0u64;
        for _ in 0..n {
            v = (v << 1) | self.bit()? as u64;
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_values_cost_one_bit() {
        let values = vec![Value::Double(3.25); 80];
        let bytes = encode(&values, TsDataType::Double);
        // 64 位首值 + 79 个 '0'
        assert_eq!(bytes.len(), (64 + 79usize).div_ceil(8));
        assert_eq!(decode(&bytes, TsDataType::Double, 80).unwrap(), values);
    }

    #[test]
    fn float_stream_with_sign_changes() {
        let values: Vec<Value> = (0..200)
            .map(|i| Value::Float(((i as f32) * 0.37).sin() * 100.0))
            .collect();
        let bytes = encode(&values, TsDataType::Float);
        assert_eq!(decode(&bytes, TsDataType::Float, values.len()).unwrap(), values);
    }

    #[test]
    fn truncated_stream_fails() {
        let values: Vec<Value> = [1.0, 2.0, 3.0].into_iter().map(Value::Double).collect();
        let bytes = encode(&values, TsDataType::Double);
        assert!(decode(&bytes[..4], TsDataType::Double, 3).is_err());
    }
}
