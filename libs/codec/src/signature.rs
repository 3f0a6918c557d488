//! Type signatures
//!
//! A signature is a string of type codes. Basic codes are single characters,
//! containers are `a` (array), `(...)` (struct), `a{kv}` (dict entry) and `v`
//! (variant). A *single complete type* is one basic code or one full container.

use crate::error::{ProtocolError, ProtocolResult};
use std::fmt;

/// Maximum signature length in bytes
pub const MAX_SIGNATURE_LEN: usize = 255;
/// Maximum array nesting inside one signature
pub const MAX_ARRAY_DEPTH: usize = 32;
/// Maximum struct nesting inside one signature
pub const MAX_STRUCT_DEPTH: usize = 32;

/// Validated D-Bus signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature(String);

impl Signature {
    /// Validate and wrap a signature string
    pub fn new(signature: impl Into<String>) -> ProtocolResult<Self> {
        let signature = signature.into();
        validate(&signature)?;
        Ok(Self(signature))
    }

    /// Validate an array element type
    ///
    /// Dict entries (`{kv}`) are only valid as array elements, so they are
    /// accepted here but rejected by [`Signature::new`].
    pub fn array_element(element: impl Into<String>) -> ProtocolResult<Self> {
        let element = element.into();
        let array = format!("a{}", element);
        validate(&array)?;
        if complete_type_len(array.as_bytes(), 0, 0).ok() != Some(array.len()) {
            return Err(ProtocolError::invalid_signature(
                element,
                "array element must be a single complete type",
            ));
        }
        Ok(Self(element))
    }

    /// Wrap a signature that is valid by construction
    pub(crate) fn trusted(signature: &'static str) -> Self {
        Self(signature.to_string())
    }

    /// The empty signature (no values)
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the signature is exactly one complete type
    pub fn is_single_type(&self) -> bool {
        self.single_types().count() == 1
    }

    /// Iterate over the single complete types of this signature
    pub fn single_types(&self) -> SingleTypes<'_> {
        SingleTypes {
            rest: self.0.as_bytes(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Signature {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Self::new(s)
    }
}

/// Iterator over single complete types; only built from validated signatures
pub struct SingleTypes<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for SingleTypes<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let len = complete_type_len(self.rest, 0, 0).ok()?;
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Some(head)
    }
}

/// Check a whole signature string
pub(crate) fn validate(signature: &str) -> ProtocolResult<()> {
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(ProtocolError::invalid_signature(
            signature,
            format!("longer than {} bytes", MAX_SIGNATURE_LEN),
        ));
    }
    let bytes = signature.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        pos += complete_type_len(&bytes[pos..], 0, 0)
            .map_err(|reason| ProtocolError::invalid_signature(signature, reason))?;
    }
    Ok(())
}

pub(crate) fn is_basic(code: u8) -> bool {
    matches!(
        code,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g' | b'h'
    )
}

/// Alignment in bytes of values whose type starts with `code`
pub(crate) fn alignment(code: u8) -> usize {
    match code {
        b'n' | b'q' => 2,
        b'b' | b'i' | b'u' | b's' | b'o' | b'h' | b'a' => 4,
        b'x' | b't' | b'd' | b'(' | b'{' => 8,
        // y, g, v
        _ => 1,
    }
}

/// Length of the single complete type at the start of `sig`
pub(crate) fn complete_type_len(sig: &[u8], arrays: usize, structs: usize) -> Result<usize, String> {
    let Some(&first) = sig.first() else {
        return Err("unexpected end of signature".to_string());
    };

    match first {
        code if is_basic(code) || code == b'v' => Ok(1),
        b'a' => {
            if arrays >= MAX_ARRAY_DEPTH {
                return Err(format!("more than {} nested arrays", MAX_ARRAY_DEPTH));
            }
            if sig.get(1) == Some(&b'{') {
                if structs >= MAX_STRUCT_DEPTH {
                    return Err(format!("more than {} nested structs", MAX_STRUCT_DEPTH));
                }
                match sig.get(2) {
                    Some(&key) if is_basic(key) => {}
                    Some(_) => return Err("dict entry key must be a basic type".to_string()),
                    None => return Err("unterminated dict entry".to_string()),
                }
                let value_len = complete_type_len(&sig[3..], arrays + 1, structs + 1)?;
                if sig.get(3 + value_len) != Some(&b'}') {
                    return Err("dict entry must contain exactly two types".to_string());
                }
                Ok(4 + value_len)
            } else {
                Ok(1 + complete_type_len(&sig[1..], arrays + 1, structs)?)
            }
        }
        b'(' => {
            if structs >= MAX_STRUCT_DEPTH {
                return Err(format!("more than {} nested structs", MAX_STRUCT_DEPTH));
            }
            let mut pos = 1;
            loop {
                match sig.get(pos) {
                    None => return Err("unterminated struct".to_string()),
                    Some(b')') => break,
                    Some(_) => pos += complete_type_len(&sig[pos..], arrays, structs + 1)?,
                }
            }
            if pos == 1 {
                return Err("empty struct".to_string());
            }
            Ok(pos + 1)
        }
        b'{' => Err("dict entry outside of an array".to_string()),
        other => Err(format!("unknown type code {:?}", other as char)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_signatures() {
        for sig in ["", "s", "a(yv)", "a{sv}", "(ia{s(ii)})", "aai", "yyyyuua(yv)", "h"] {
            assert!(Signature::new(sig).is_ok(), "{} should be valid", sig);
        }
    }

    #[test]
    fn test_invalid_signatures() {
        for sig in ["a", "()", "(i", "{sv}", "a{vs}", "a{sii}", "z", "a{s}"] {
            assert!(Signature::new(sig).is_err(), "{} should be invalid", sig);
        }
    }

    #[test]
    fn test_array_elements() {
        assert_eq!(Signature::array_element("{sv}").unwrap().as_str(), "{sv}");
        assert!(Signature::array_element("(yv)").is_ok());
        assert!(Signature::array_element("").is_err());
        assert!(Signature::array_element("ii").is_err());
        assert!(Signature::array_element("{vs}").is_err());
    }

    #[test]
    fn test_length_limit() {
        let long = "i".repeat(MAX_SIGNATURE_LEN + 1);
        assert!(Signature::new(long).is_err());
        assert!(Signature::new("i".repeat(MAX_SIGNATURE_LEN)).is_ok());
    }

    #[test]
    fn test_nesting_limit() {
        let ok = format!("{}i", "a".repeat(MAX_ARRAY_DEPTH));
        let too_deep = format!("{}i", "a".repeat(MAX_ARRAY_DEPTH + 1));
        assert!(Signature::new(ok).is_ok());
        assert!(Signature::new(too_deep).is_err());
    }

    #[test]
    fn test_single_types() {
        let sig = Signature::new("sa{sv}(ii)v").unwrap();
        let parts: Vec<&[u8]> = sig.single_types().collect();
        assert_eq!(parts, vec![&b"s"[..], b"a{sv}", b"(ii)", b"v"]);
        assert!(!sig.is_single_type());
        assert!(Signature::new("a(yv)").unwrap().is_single_type());
    }
}
