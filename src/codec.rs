// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Payload codecs.
//!
//! The ledger treats payloads as opaque bytes tagged with a `kind`. Applications
//! that want typed access register each kind against one of a closed set of
//! formats; there is no runtime type inspection.

use crate::error::CodecError;
use serde_json::Value;
use std::collections::BTreeMap;

pub trait Encode {
    fn encode(&self) -> Result<Vec<u8>, CodecError>;
}

pub trait Decode: Sized {
    fn decode(kind: &str, bytes: &[u8]) -> Result<Self, CodecError>;
}

/// Wire format of a payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Bytes,
    Utf8,
    Json,
}

impl PayloadFormat {
    fn name(&self) -> &'static str {
        match self {
            PayloadFormat::Bytes => "bytes",
            PayloadFormat::Utf8 => "utf8",
            PayloadFormat::Json => "json",
        }
    }
}

/// A decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

impl Payload {
    pub fn format(&self) -> PayloadFormat {
        match self {
            Payload::Bytes(_) => PayloadFormat::Bytes,
            Payload::Text(_) => PayloadFormat::Utf8,
            Payload::Json(_) => PayloadFormat::Json,
        }
    }
}

impl Encode for Payload {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Text(s) => s.encode(),
            Payload::Json(v) => v.encode(),
        }
    }
}

impl Encode for String {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.as_bytes().to_vec())
    }
}

impl Decode for String {
    fn decode(kind: &str, bytes: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { kind: kind.to_string() })
    }
}

impl Encode for Value {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Unencodable)
    }
}

impl Decode for Value {
    fn decode(kind: &str, bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|source| CodecError::InvalidJson { kind: kind.to_string(), source })
    }
}

/// Maps record kinds to formats. Unregistered kinds are raw bytes.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, PayloadFormat>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: impl Into<String>, format: PayloadFormat) -> Self {
        self.kinds.insert(kind.into(), format);
        self
    }

    pub fn format_of(&self, kind: &str) -> PayloadFormat {
        self.kinds.get(kind).copied().unwrap_or(PayloadFormat::Bytes)
    }

    /// Encodes `payload`, refusing a format that does not match the kind's registration.
    pub fn encode(&self, kind: &str, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        let expected = self.format_of(kind);
        if expected != payload.format() && expected != PayloadFormat::Bytes {
            return Err(CodecError::FormatMismatch { kind: kind.to_string(), expected: expected.name() });
        }
        payload.encode()
    }

    pub fn decode(&self, kind: &str, bytes: &[u8]) -> Result<Payload, CodecError> {
        match self.format_of(kind) {
            PayloadFormat::Bytes => Ok(Payload::Bytes(bytes.to_vec())),
            PayloadFormat::Utf8 => String::decode(kind, bytes).map(Payload::Text),
            PayloadFormat::Json => Value::decode(kind, bytes).map(Payload::Json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> KindRegistry {
        KindRegistry::new()
            .register("note", PayloadFormat::Utf8)
            .register("decision", PayloadFormat::Json)
    }

    #[test]
    fn test_decode_selected_by_kind() {
        let r = registry();
        assert_eq!(r.decode("note", b"hi").unwrap(), Payload::Text("hi".into()));
        assert_eq!(r.decode("decision", br#"{"ok":true}"#).unwrap(), Payload::Json(json!({"ok": true})));
        assert_eq!(r.decode("blob", &[0xff]).unwrap(), Payload::Bytes(vec![0xff]));
    }

    #[test]
    fn test_decode_rejects_wrong_content() {
        let r = registry();
        assert!(matches!(r.decode("note", &[0xff, 0xfe]), Err(CodecError::InvalidUtf8 { .. })));
        assert!(matches!(r.decode("decision", b"{"), Err(CodecError::InvalidJson { .. })));
    }

    #[test]
    fn test_encode_rejects_format_mismatch() {
        let r = registry();
        let err = r.encode("decision", &Payload::Text("x".into())).unwrap_err();
        assert!(matches!(err, CodecError::FormatMismatch { expected: "json", .. }));
        assert_eq!(r.encode("blob", &Payload::Text("x".into())).unwrap(), b"x".to_vec());
    }

    #[test]
    fn test_json_payload_encodes_and_decodes_by_kind() {
        let r = registry();
        let value = json!({"verdict": "accept", "votes": [3, 1]});
        let bytes = r.encode("decision", &Payload::Json(value.clone())).unwrap();
        assert_eq!(r.decode("decision", &bytes).unwrap(), Payload::Json(value));
    }
}
