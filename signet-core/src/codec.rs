//! Structured document codecs for the native store's index files.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Error type for index encoding and decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode document: {message}")]
    Decode { message: String },

    #[error("failed to encode document: {message}")]
    Encode { message: String },
}

/// Reads and writes a serde-described document.
pub trait IndexCodec: Send + Sync + 'static {
    /// Parse a document.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Serialize a document.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
}

/// Property lists. XML is written; XML and binary are read.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlistCodec;

impl IndexCodec for PlistCodec {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        plist::from_bytes(bytes).map_err(|e| CodecError::Decode {
            message: e.to_string(),
        })
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, value).map_err(|e| CodecError::Encode {
            message: e.to_string(),
        })?;
        Ok(buf)
    }
}

/// JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl IndexCodec for JsonCodec {
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            message: e.to_string(),
        })
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec_pretty(value).map_err(|e| CodecError::Encode {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_plist_writes_xml() {
        let mut doc = BTreeMap::new();
        doc.insert("acc-1".to_string(), vec!["S1".to_string()]);

        let bytes = PlistCodec.encode(&doc).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("<key>acc-1</key>"));

        let back: BTreeMap<String, Vec<String>> = PlistCodec.decode(&bytes).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Vec<String>, _> = PlistCodec.decode(b"not a plist");
        assert!(matches!(result, Err(CodecError::Decode { .. })));

        let result: Result<Vec<String>, _> = JsonCodec.decode(b"{");
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }
}
