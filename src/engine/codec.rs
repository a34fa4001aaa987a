use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::policy::{StorePolicy, ValueKind};
use crate::key::is_safe_str;
use crate::{Error, Result};

/// Turns values into file contents and back.
///
/// The codec's file type doubles as the file-name extension of every entry.
pub trait Codec: Send + Sync + fmt::Debug {
    fn file_type(&self) -> &str;
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// The single value kind this codec can represent, if it is restricted.
    fn required_kind(&self) -> Option<ValueKind> {
        None
    }
}

/// Human-readable pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn file_type(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary MessagePack.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn file_type(&self) -> &str {
        "mpk"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

/// Plain text: string values are stored verbatim as UTF-8.
#[derive(Debug, Clone)]
pub struct TextCodec {
    file_type: String,
}

impl TextCodec {
    pub fn new(file_type: impl Into<String>) -> Self {
        Self {
            file_type: file_type.into(),
        }
    }
}

impl Codec for TextCodec {
    fn file_type(&self) -> &str {
        &self.file_type
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(Error::Codec(format!(
                "a .{} file can only hold strings, got {}",
                self.file_type,
                ValueKind::of(other)
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| Error::Codec(e.to_string()))
    }

    fn required_kind(&self) -> Option<ValueKind> {
        Some(ValueKind::String)
    }
}

/// Selects the codec for a file type: `json`, `mpk`, or plain text for
/// anything else.
pub fn codec_for(file_type: &str) -> Result<Arc<dyn Codec>> {
    if !is_safe_str(file_type) {
        return Err(Error::Configuration(format!(
            "file_type must be a non-empty safe string, got {:?}",
            file_type
        )));
    }
    Ok(match file_type {
        "json" => Arc::new(JsonCodec),
        "mpk" => Arc::new(MsgPackCodec),
        other => Arc::new(TextCodec::new(other)),
    })
}

/// Fails if the policy's value constraint cannot be represented by `codec`.
pub fn check_compatible(codec: &dyn Codec, policy: &StorePolicy) -> Result<()> {
    match codec.required_kind() {
        Some(required) if policy.value_kind != Some(required) => {
            Err(Error::Configuration(format!(
                "file_type '{}' only stores {} values; set value_kind to {}",
                codec.file_type(),
                required,
                required
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codec_selection() {
        assert_eq!(codec_for("json").unwrap().file_type(), "json");
        assert_eq!(codec_for("mpk").unwrap().file_type(), "mpk");
        assert_eq!(codec_for("txt").unwrap().required_kind(), Some(ValueKind::String));
        assert!(matches!(codec_for(""), Err(Error::Configuration(_))));
        assert!(matches!(codec_for("a/b"), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_binary_and_json_preserve_structure() {
        let value = json!({"name": "Alice", "tags": ["a", "b"], "age": 30, "score": 1.5, "none": null});
        for codec in [codec_for("json").unwrap(), codec_for("mpk").unwrap()] {
            let bytes = codec.encode(&value).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_text_codec_is_verbatim() {
        let codec = TextCodec::new("txt");
        assert_eq!(codec.encode(&json!("hi\nthere")).unwrap(), b"hi\nthere");
        assert!(matches!(codec.encode(&json!(1)), Err(Error::Codec(_))));
    }

    #[test]
    fn test_text_codec_needs_string_constraint() {
        let codec = codec_for("txt").unwrap();
        let unconstrained = StorePolicy::new(false, 8, None).unwrap();
        assert!(matches!(
            check_compatible(codec.as_ref(), &unconstrained),
            Err(Error::Configuration(_))
        ));
        let strings = StorePolicy::new(false, 8, Some(ValueKind::String)).unwrap();
        assert!(check_compatible(codec.as_ref(), &strings).is_ok());
        assert!(check_compatible(&JsonCodec, &unconstrained).is_ok());
    }
}
