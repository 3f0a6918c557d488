//! Marshallable values

use crate::error::{ProtocolError, ProtocolResult};
use crate::signature::Signature;
use std::fmt;

/// A validated object path such as `/org/freedesktop/DBus`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> ProtocolResult<Self> {
        let path = path.into();
        if is_valid_object_path(&path) {
            Ok(Self(path))
        } else {
            Err(ProtocolError::InvalidObjectPath { path })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty()
            && element
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

/// Homogeneous array with a declared element type
///
/// The element signature is kept so empty arrays still marshal with the right
/// type and alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element: Signature,
    items: Vec<Value>,
}

impl Array {
    /// Build an array, checking every item against `element`
    pub fn new(element: Signature, items: Vec<Value>) -> ProtocolResult<Self> {
        Signature::array_element(element.as_str())?;
        for item in &items {
            let actual = item.signature();
            if actual != element.as_str() {
                return Err(ProtocolError::ValueMismatch {
                    expected: element.to_string(),
                    actual,
                });
            }
        }
        Ok(Self { element, items })
    }

    pub(crate) fn from_parts_unchecked(element: Signature, items: Vec<Value>) -> Self {
        Self { element, items }
    }

    pub fn element_signature(&self) -> &Signature {
        &self.element
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }
}

/// A single marshallable value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    ObjectPath(ObjectPath),
    Signature(Signature),
    /// Index into the descriptors attached to the message
    UnixFd(u32),
    Array(Array),
    Struct(Vec<Value>),
    DictEntry(Box<Value>, Box<Value>),
    Variant(Box<Value>),
}

impl Value {
    /// Single complete type of this value
    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.write_signature(&mut out);
        out
    }

    fn write_signature(&self, out: &mut String) {
        match self {
            Value::Byte(_) => out.push('y'),
            Value::Boolean(_) => out.push('b'),
            Value::Int16(_) => out.push('n'),
            Value::Uint16(_) => out.push('q'),
            Value::Int32(_) => out.push('i'),
            Value::Uint32(_) => out.push('u'),
            Value::Int64(_) => out.push('x'),
            Value::Uint64(_) => out.push('t'),
            Value::Double(_) => out.push('d'),
            Value::String(_) => out.push('s'),
            Value::ObjectPath(_) => out.push('o'),
            Value::Signature(_) => out.push('g'),
            Value::UnixFd(_) => out.push('h'),
            Value::Array(array) => {
                out.push('a');
                out.push_str(array.element.as_str());
            }
            Value::Struct(fields) => {
                out.push('(');
                for field in fields {
                    field.write_signature(out);
                }
                out.push(')');
            }
            Value::DictEntry(key, value) => {
                out.push('{');
                key.write_signature(out);
                value.write_signature(out);
                out.push('}');
            }
            Value::Variant(_) => out.push('v'),
        }
    }

    /// Wrap in a variant
    pub fn into_variant(self) -> Value {
        Value::Variant(Box::new(self))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::ObjectPath(p) => Some(p.as_str()),
            Value::Signature(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    /// Visit every descriptor index reachable from this value
    pub(crate) fn for_each_fd(&self, f: &mut impl FnMut(u32) -> ProtocolResult<()>) -> ProtocolResult<()> {
        match self {
            Value::UnixFd(index) => f(*index),
            Value::Array(array) => array.items.iter().try_for_each(|item| item.for_each_fd(f)),
            Value::Struct(fields) => fields.iter().try_for_each(|field| field.for_each_fd(f)),
            Value::DictEntry(key, value) => {
                key.for_each_fd(f)?;
                value.for_each_fd(f)
            }
            Value::Variant(inner) => inner.for_each_fd(f),
            _ => Ok(()),
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_value!(
    u8 => Byte,
    bool => Boolean,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    f64 => Double,
    String => String,
    ObjectPath => ObjectPath,
    Signature => Signature,
    Array => Array,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
