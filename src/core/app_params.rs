//! # Application Parameters
//!
//! The payload of an Application-Parameters header is itself a flat sequence
//! of tag/length/value triplets with no padding:
//!
//! ```text
//! [Tag(1)] [Len(1)] [Value(Len)] [Tag(1)] [Len(1)] [Value(Len)] ...
//! ```
//!
//! Tags are profile defined (MAP, PBAP, ...). The engine only frames them;
//! interpreting a value is up to the caller that knows the tag vocabulary.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ObexError, Result};

/// Largest value a single triplet can carry.
pub const MAX_APP_PARAMETER_LEN: usize = u8::MAX as usize;

/// One tagged value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppParameter {
    tag: u8,
    value: Bytes,
}

impl AppParameter {
    pub fn new(tag: u8, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn from_u8(tag: u8, value: u8) -> Self {
        Self::new(tag, vec![value])
    }

    pub fn from_u16(tag: u8, value: u16) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }

    pub fn from_u32(tag: u8, value: u32) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn as_u8(&self) -> Result<u8> {
        let [v] = self.fixed::<1>()?;
        Ok(v)
    }

    pub fn as_u16(&self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.fixed::<2>()?))
    }

    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.fixed::<4>()?))
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        self.value[..].try_into().map_err(|_| {
            ObexError::InvalidHeaderValue(format!(
                "application parameter 0x{:02X} is {} bytes, expected {N}",
                self.tag,
                self.value.len()
            ))
        })
    }
}

/// Decoded application parameters, keyed by tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppParameterDictionary {
    params: HashMap<u8, AppParameter>,
}

impl AppParameterDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a triplet sequence. A later triplet with an already seen tag
    /// replaces the earlier one.
    ///
    /// # Errors
    /// Returns [`ObexError::TruncatedAppParameter`] when the trailing triplet
    /// is cut short.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let mut dict = Self::new();
        while !buf.is_empty() {
            let (tag, len) = match buf {
                [tag, len, ..] => (*tag, *len as usize),
                _ => return Err(ObexError::TruncatedAppParameter),
            };
            let value = buf
                .get(2..2 + len)
                .ok_or(ObexError::TruncatedAppParameter)?;
            dict.insert(AppParameter::new(tag, Bytes::copy_from_slice(value)));
            buf = &buf[2 + len..];
        }
        Ok(dict)
    }

    /// Encode `params` as triplets in the given order.
    pub fn encode<'a>(params: impl IntoIterator<Item = &'a AppParameter>) -> Result<Bytes> {
        let mut out = BytesMut::new();
        for param in params {
            if param.value.len() > MAX_APP_PARAMETER_LEN {
                return Err(ObexError::InvalidHeaderValue(format!(
                    "application parameter 0x{:02X} value is {} bytes (max {MAX_APP_PARAMETER_LEN})",
                    param.tag,
                    param.value.len()
                )));
            }
            out.put_u8(param.tag);
            out.put_u8(param.value.len() as u8);
            out.put_slice(&param.value);
        }
        Ok(out.freeze())
    }

    pub fn insert(&mut self, param: AppParameter) -> Option<AppParameter> {
        self.params.insert(param.tag, param)
    }

    /// # Errors
    /// Returns [`ObexError::AppParameterNotFound`] if `tag` is absent.
    pub fn get(&self, tag: u8) -> Result<&AppParameter> {
        self.params
            .get(&tag)
            .ok_or(ObexError::AppParameterNotFound(tag))
    }

    pub fn try_get(&self, tag: u8) -> Option<&AppParameter> {
        self.params.get(&tag)
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.params.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppParameter> {
        self.params.values()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_decode_reference_vector() {
        let dict = AppParameterDictionary::decode(&[0x01, 0x02, 0xAA, 0xBB, 0x05, 0x01, 0x01])
            .expect("valid triplets");
        assert_eq!(dict.len(), 2);
        assert_eq!(&dict.get(1).unwrap().value()[..], &[0xAA, 0xBB]);
        assert_eq!(&dict.get(5).unwrap().value()[..], &[0x01]);
    }

    #[test]
    fn test_decode_truncated_value() {
        let result = AppParameterDictionary::decode(&[0x01, 0x02, 0xAA]);
        assert!(matches!(result, Err(ObexError::TruncatedAppParameter)));
    }

    #[test]
    fn test_decode_missing_length_byte() {
        let result = AppParameterDictionary::decode(&[0x05, 0x01, 0x01, 0x07]);
        assert!(matches!(result, Err(ObexError::TruncatedAppParameter)));
    }

    #[test]
    fn test_decode_empty() {
        let dict = AppParameterDictionary::decode(&[]).unwrap();
        assert!(dict.is_empty());
    }

    #[test]
    fn test_duplicate_tag_keeps_last() {
        let dict = AppParameterDictionary::decode(&[0x04, 0x01, 0x01, 0x04, 0x01, 0x02]).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(4).unwrap().as_u8().unwrap(), 2);
    }

    #[test]
    fn test_missing_tag() {
        let dict = AppParameterDictionary::new();
        assert!(matches!(
            dict.get(0x11),
            Err(ObexError::AppParameterNotFound(0x11))
        ));
    }

    #[test]
    fn test_encode_preserves_order() {
        let params = [
            AppParameter::from_u16(0x01, 1024),
            AppParameter::from_u8(0x0B, 1),
        ];
        let bytes = AppParameterDictionary::encode(&params).unwrap();
        assert_eq!(&bytes[..], &[0x01, 0x02, 0x04, 0x00, 0x0B, 0x01, 0x01]);

        let dict = AppParameterDictionary::decode(&bytes).unwrap();
        assert_eq!(dict.get(0x01).unwrap().as_u16().unwrap(), 1024);
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        let params = [AppParameter::new(0x01, vec![0u8; 256])];
        assert!(matches!(
            AppParameterDictionary::encode(&params),
            Err(ObexError::InvalidHeaderValue(_))
        ));
    }

    #[test]
    fn test_typed_accessor_size_mismatch() {
        let param = AppParameter::from_u32(0x02, 7);
        assert_eq!(param.as_u32().unwrap(), 7);
        assert!(param.as_u16().is_err());
    }
}
