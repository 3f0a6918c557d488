//! Value encoder
//!
//! Mirrors [`crate::decoder::Decoder`]: alignment is relative to the start of
//! the buffer, which is the start of the message.

use crate::byte_order::ByteOrder;
use crate::decoder::{MAX_ARRAY_LEN, MAX_NESTING_DEPTH};
use crate::error::{ProtocolError, ProtocolResult};
use crate::signature;
use crate::value::Value;

/// Growable output buffer with a fixed byte order
pub struct Encoder {
    buf: Vec<u8>,
    order: ByteOrder,
    depth: usize,
}

impl Encoder {
    pub fn new(order: ByteOrder) -> Self {
        Self::with_capacity(order, 128)
    }

    pub fn with_capacity(order: ByteOrder, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            order,
            depth: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Pad with zero bytes to a multiple of `n`
    pub fn align(&mut self, n: usize) {
        let padded = self.buf.len().next_multiple_of(n);
        self.buf.resize(padded, 0);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        let mut raw = [0u8; 2];
        self.order.write_u16(&mut raw, value);
        self.buf.extend_from_slice(&raw);
    }

    pub fn put_u32(&mut self, value: u32) {
        let mut raw = [0u8; 4];
        self.order.write_u32(&mut raw, value);
        self.buf.extend_from_slice(&raw);
    }

    pub fn put_u64(&mut self, value: u64) {
        let mut raw = [0u8; 8];
        self.order.write_u64(&mut raw, value);
        self.buf.extend_from_slice(&raw);
    }

    /// Overwrite a previously written u32 at `offset`
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.order.write_u32(&mut self.buf[offset..offset + 4], value);
    }

    /// Append one value with its alignment
    pub fn encode(&mut self, value: &Value) -> ProtocolResult<()> {
        match value {
            Value::Byte(v) => self.put_u8(*v),
            Value::Boolean(v) => {
                self.align(4);
                self.put_u32(u32::from(*v));
            }
            Value::Int16(v) => {
                self.align(2);
                self.put_u16(*v as u16);
            }
            Value::Uint16(v) => {
                self.align(2);
                self.put_u16(*v);
            }
            Value::Int32(v) => {
                self.align(4);
                self.put_u32(*v as u32);
            }
            Value::Uint32(v) | Value::UnixFd(v) => {
                self.align(4);
                self.put_u32(*v);
            }
            Value::Int64(v) => {
                self.align(8);
                self.put_u64(*v as u64);
            }
            Value::Uint64(v) => {
                self.align(8);
                self.put_u64(*v);
            }
            Value::Double(v) => {
                self.align(8);
                self.put_u64(v.to_bits());
            }
            Value::String(s) => self.put_string(s)?,
            Value::ObjectPath(p) => self.put_string(p.as_str())?,
            Value::Signature(s) => self.put_signature(s.as_str()),
            Value::Variant(inner) => {
                let inner_sig = inner.signature();
                if inner_sig.len() > signature::MAX_SIGNATURE_LEN {
                    return Err(ProtocolError::invalid_signature(inner_sig, "variant signature too long"));
                }
                self.put_signature(&inner_sig);
                self.nested(|enc| enc.encode(inner))?;
            }
            Value::Array(array) => self.nested(|enc| {
                enc.align(4);
                let length_at = enc.len();
                enc.put_u32(0);
                let element = array.element_signature().as_str().as_bytes();
                enc.align(signature::alignment(element[0]));
                let start = enc.len();
                for item in array.items() {
                    enc.encode(item)?;
                }
                let length = enc.len() - start;
                if length > MAX_ARRAY_LEN {
                    return Err(ProtocolError::ArrayTooLong {
                        length,
                        limit: MAX_ARRAY_LEN,
                    });
                }
                enc.patch_u32(length_at, length as u32);
                Ok(())
            })?,
            Value::Struct(fields) => self.nested(|enc| {
                enc.align(8);
                fields.iter().try_for_each(|field| enc.encode(field))
            })?,
            Value::DictEntry(key, value) => self.nested(|enc| {
                enc.align(8);
                enc.encode(key)?;
                enc.encode(value)
            })?,
        }
        Ok(())
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> ProtocolResult<()>) -> ProtocolResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep {
                depth: self.depth + 1,
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn put_string(&mut self, s: &str) -> ProtocolResult<()> {
        if s.as_bytes().contains(&0) {
            return Err(ProtocolError::InvalidUtf8 { offset: self.len() });
        }
        self.align(4);
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn put_signature(&mut self, s: &str) {
        // Signatures are validated to at most 255 bytes before reaching here
        self.put_u8(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::signature::Signature;
    use crate::value::{Array, ObjectPath};

    #[test]
    fn test_encode_alignment_layout() {
        let mut enc = Encoder::new(ByteOrder::Little);
        enc.encode(&Value::Byte(1)).unwrap();
        enc.encode(&Value::Uint64(2)).unwrap();
        let bytes = enc.into_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &[1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(bytes[8], 2);
    }

    #[test]
    fn test_nested_values_decode_back() {
        let entry = Value::DictEntry(
            Box::new("answer".into()),
            Box::new(Value::Struct(vec![Value::Int16(-4), Value::Double(1.5)]).into_variant()),
        );
        let dict = Value::Array(Array::new(Signature::array_element("{sv}").unwrap(), vec![entry]).unwrap());
        let values = vec![
            Value::Boolean(true),
            dict,
            Value::ObjectPath(ObjectPath::new("/a/b").unwrap()),
            Value::Int64(-1),
        ];

        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut enc = Encoder::new(order);
            for v in &values {
                enc.encode(v).unwrap();
            }
            let bytes = enc.into_bytes();
            let decoded = Decoder::new(&bytes, order)
                .decode(&Signature::new("ba{sv}ox").unwrap())
                .unwrap();
            assert_eq!(decoded, values);
        }
    }

    #[test]
    fn test_string_with_interior_nul_rejected() {
        let mut enc = Encoder::new(ByteOrder::Little);
        assert!(enc.encode(&Value::String("a\0b".into())).is_err());
    }
}
