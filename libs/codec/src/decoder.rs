//! Signature-driven value decoder
//!
//! Decodes values from a byte buffer given a signature and byte order.
//! Alignment is computed from absolute offsets in the buffer, so a decoder that
//! starts in the middle of a message must be created with [`Decoder::at`] on
//! the whole message buffer rather than on a sub-slice.

use crate::byte_order::ByteOrder;
use crate::error::{ProtocolError, ProtocolResult};
use crate::signature::{self, Signature};
use crate::value::{Array, ObjectPath, Value};

/// Maximum array payload length in bytes (64 MiB)
pub const MAX_ARRAY_LEN: usize = 1 << 26;

/// Combined container nesting limit (arrays, structs and variants)
pub const MAX_NESTING_DEPTH: usize = 64;

/// Decoder over a borrowed buffer
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        Self::at(buf, order, 0)
    }

    /// Start decoding at absolute offset `pos` of `buf`
    pub fn at(buf: &'a [u8], order: ByteOrder, pos: usize) -> Self {
        Self {
            buf,
            pos,
            order,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Decode one value per single complete type of `signature`
    pub fn decode(&mut self, signature: &Signature) -> ProtocolResult<Vec<Value>> {
        signature
            .single_types()
            .map(|ty| self.decode_value(ty))
            .collect()
    }

    /// Decode one value of single complete type `ty`; `ty` must come from a
    /// validated signature
    pub(crate) fn decode_value(&mut self, ty: &[u8]) -> ProtocolResult<Value> {
        let Some(&code) = ty.first() else {
            return Err(ProtocolError::invalid_signature("", "empty type"));
        };

        match code {
            b'y' => Ok(Value::Byte(self.take(1, "byte")?[0])),
            b'b' => {
                self.align(4)?;
                let offset = self.pos;
                match self.read_u32("boolean")? {
                    0 => Ok(Value::Boolean(false)),
                    1 => Ok(Value::Boolean(true)),
                    value => Err(ProtocolError::InvalidBoolean { value, offset }),
                }
            }
            b'n' => {
                self.align(2)?;
                Ok(Value::Int16(self.read_u16("int16")? as i16))
            }
            b'q' => {
                self.align(2)?;
                Ok(Value::Uint16(self.read_u16("uint16")?))
            }
            b'i' => {
                self.align(4)?;
                Ok(Value::Int32(self.read_u32("int32")? as i32))
            }
            b'u' => {
                self.align(4)?;
                Ok(Value::Uint32(self.read_u32("uint32")?))
            }
            b'h' => {
                self.align(4)?;
                Ok(Value::UnixFd(self.read_u32("unix fd index")?))
            }
            b'x' => {
                self.align(8)?;
                Ok(Value::Int64(self.read_u64("int64")? as i64))
            }
            b't' => {
                self.align(8)?;
                Ok(Value::Uint64(self.read_u64("uint64")?))
            }
            b'd' => {
                self.align(8)?;
                Ok(Value::Double(f64::from_bits(self.read_u64("double")?)))
            }
            b's' => Ok(Value::String(self.read_string()?)),
            b'o' => {
                let path = self.read_string()?;
                Ok(Value::ObjectPath(ObjectPath::new(path)?))
            }
            b'g' => Ok(Value::Signature(self.read_signature()?)),
            b'v' => {
                let inner = self.read_signature()?;
                if !inner.is_single_type() {
                    return Err(ProtocolError::invalid_signature(
                        inner.as_str(),
                        "variant must hold a single complete type",
                    ));
                }
                self.nested(|dec| dec.decode_value(inner.as_str().as_bytes()))
                    .map(|v| Value::Variant(Box::new(v)))
            }
            b'a' => self.nested(|dec| dec.decode_array(&ty[1..])),
            b'(' => self.nested(|dec| {
                dec.align(8)?;
                let inner = &ty[1..ty.len() - 1];
                let mut fields = Vec::new();
                let mut pos = 0;
                while pos < inner.len() {
                    let len = element_len(&inner[pos..])?;
                    fields.push(dec.decode_value(&inner[pos..pos + len])?);
                    pos += len;
                }
                Ok(Value::Struct(fields))
            }),
            b'{' => self.nested(|dec| {
                dec.align(8)?;
                let key = dec.decode_value(&ty[1..2])?;
                let value = dec.decode_value(&ty[2..ty.len() - 1])?;
                Ok(Value::DictEntry(Box::new(key), Box::new(value)))
            }),
            other => Err(ProtocolError::invalid_signature(
                String::from_utf8_lossy(ty),
                format!("unknown type code {:?}", other as char),
            )),
        }
    }

    fn decode_array(&mut self, element: &[u8]) -> ProtocolResult<Value> {
        self.align(4)?;
        let offset = self.pos;
        let length = self.read_u32("array length")? as usize;
        if length > MAX_ARRAY_LEN {
            return Err(ProtocolError::ArrayTooLong {
                length,
                limit: MAX_ARRAY_LEN,
            });
        }

        // Padding to the element alignment is present even for empty arrays
        self.align(signature::alignment(element[0]))?;
        let end = self.pos + length;
        if end > self.buf.len() {
            return Err(ProtocolError::truncated(length, self.pos, self.buf.len(), "array contents"));
        }

        let mut items = Vec::new();
        while self.pos < end {
            items.push(self.decode_value(element)?);
        }
        if self.pos != end {
            return Err(ProtocolError::ArrayLengthMismatch {
                offset,
                declared: length,
                actual: self.pos - (end - length),
            });
        }

        let element = std::str::from_utf8(element)
            .map_err(|_| ProtocolError::invalid_signature("<non-utf8>", "invalid array element"))?;
        Ok(Value::Array(Array::from_parts_unchecked(
            Signature::array_element(element)?,
            items,
        )))
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ProtocolResult<T>) -> ProtocolResult<T> {
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

    /// Skip padding up to a multiple of `n`; padding bytes must be zero
    pub fn align(&mut self, n: usize) -> ProtocolResult<()> {
        let padded = self.pos.next_multiple_of(n);
        if padded > self.buf.len() {
            return Err(ProtocolError::truncated(padded - self.pos, self.pos, self.buf.len(), "alignment padding"));
        }
        if let Some(offset) = (self.pos..padded).find(|&i| self.buf[i] != 0) {
            return Err(ProtocolError::InvalidPadding { offset });
        }
        self.pos = padded;
        Ok(())
    }

    fn take(&mut self, n: usize, context: &str) -> ProtocolResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| ProtocolError::truncated(n, self.pos, self.buf.len(), context))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self, context: &str) -> ProtocolResult<u16> {
        let order = self.order;
        self.take(2, context).map(|b| order.read_u16(b))
    }

    fn read_u32(&mut self, context: &str) -> ProtocolResult<u32> {
        let order = self.order;
        self.take(4, context).map(|b| order.read_u32(b))
    }

    fn read_u64(&mut self, context: &str) -> ProtocolResult<u64> {
        let order = self.order;
        self.take(8, context).map(|b| order.read_u64(b))
    }

    fn read_string(&mut self) -> ProtocolResult<String> {
        self.align(4)?;
        let len = self.read_u32("string length")? as usize;
        let offset = self.pos;
        let bytes = self.take(len, "string contents")?;
        if self.take(1, "string terminator")?[0] != 0 {
            return Err(ProtocolError::MissingNulTerminator { offset });
        }
        if bytes.contains(&0) {
            return Err(ProtocolError::InvalidUtf8 { offset });
        }
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ProtocolError::InvalidUtf8 { offset })
    }

    fn read_signature(&mut self) -> ProtocolResult<Signature> {
        let len = self.take(1, "signature length")?[0] as usize;
        let offset = self.pos;
        let bytes = self.take(len, "signature contents")?;
        if self.take(1, "signature terminator")?[0] != 0 {
            return Err(ProtocolError::MissingNulTerminator { offset });
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8 { offset })?;
        Signature::new(text)
    }
}

fn element_len(sig: &[u8]) -> ProtocolResult<usize> {
    signature::complete_type_len(sig, 0, 0)
        .map_err(|reason| ProtocolError::invalid_signature(String::from_utf8_lossy(sig), reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic_little_endian() {
        // u32 7, then string "hi"
        let buf = [7, 0, 0, 0, 2, 0, 0, 0, b'h', b'i', 0];
        let mut dec = Decoder::new(&buf, ByteOrder::Little);
        let values = dec.decode(&Signature::new("us").unwrap()).unwrap();
        assert_eq!(values, vec![Value::Uint32(7), Value::String("hi".into())]);
        assert_eq!(dec.position(), buf.len());
    }

    #[test]
    fn test_decode_respects_absolute_alignment() {
        // byte at 0, padding 1..4, u32 at 4 (big endian)
        let buf = [9, 0, 0, 0, 0, 0, 1, 0];
        let mut dec = Decoder::new(&buf, ByteOrder::Big);
        let values = dec.decode(&Signature::new("yu").unwrap()).unwrap();
        assert_eq!(values, vec![Value::Byte(9), Value::Uint32(256)]);
    }

    #[test]
    fn test_nonzero_padding_rejected() {
        let buf = [9, 1, 0, 0, 0, 0, 0, 0];
        let mut dec = Decoder::new(&buf, ByteOrder::Little);
        let err = dec.decode(&Signature::new("yu").unwrap()).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidPadding { offset: 1 });
    }

    #[test]
    fn test_invalid_boolean() {
        let buf = [2, 0, 0, 0];
        let err = Decoder::new(&buf, ByteOrder::Little)
            .decode(&Signature::new("b").unwrap())
            .unwrap_err();
        assert_eq!(err, ProtocolError::InvalidBoolean { value: 2, offset: 0 });
    }

    #[test]
    fn test_truncated_string() {
        let buf = [10, 0, 0, 0, b'a'];
        let err = Decoder::new(&buf, ByteOrder::Little)
            .decode(&Signature::new("s").unwrap())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn test_empty_array_still_pads_to_element_alignment() {
        // length 0 at 0..4, padding 4..8 for the struct alignment
        let buf = [0, 0, 0, 0, 0, 0, 0, 0];
        let mut dec = Decoder::new(&buf, ByteOrder::Little);
        let value = dec.decode_value(b"a(yv)").unwrap();
        match value {
            Value::Array(array) => {
                assert!(array.items().is_empty());
                assert_eq!(array.element_signature().as_str(), "(yv)");
            }
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(dec.position(), 8);
    }

    #[test]
    fn test_array_length_limit() {
        let len = (MAX_ARRAY_LEN as u32 + 1).to_le_bytes();
        let err = Decoder::new(&len, ByteOrder::Little)
            .decode_value(b"ay")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ArrayTooLong { .. }));
    }
}
