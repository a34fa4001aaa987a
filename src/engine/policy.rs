use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::{SafeStrTuple, MAX_DIGEST_LEN};
use crate::{Error, Result};

/// Runtime tag of a [`Value`], used as a store's optional value constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "null" => Ok(Self::Null),
            "bool" => Ok(Self::Bool),
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => Err(Error::Configuration(format!("unknown value kind '{}'", other))),
        }
    }
}

/// Metaparameters fixed when a store is constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePolicy {
    /// Append-only: items may be created but never changed or deleted.
    pub immutable_items: bool,
    /// Signature suffix length applied to every key segment.
    pub digest_len: usize,
    /// When set, every stored and retrieved value must be of this kind.
    pub value_kind: Option<ValueKind>,
}

impl StorePolicy {
    pub fn new(
        immutable_items: bool,
        digest_len: usize,
        value_kind: Option<ValueKind>,
    ) -> Result<Self> {
        if digest_len > MAX_DIGEST_LEN {
            return Err(Error::Configuration(format!(
                "digest_len must be at most {}, got {}",
                MAX_DIGEST_LEN, digest_len
            )));
        }
        Ok(Self {
            immutable_items,
            digest_len,
            value_kind,
        })
    }

    /// Rejects `value` if it does not match the configured kind.
    pub fn check_value(&self, key: &SafeStrTuple, value: &Value) -> Result<()> {
        match self.value_kind {
            Some(expected) if ValueKind::of(value) != expected => {
                Err(Error::TypeConstraintViolation {
                    key: key.clone(),
                    expected,
                    found: ValueKind::of(value),
                })
            }
            _ => Ok(()),
        }
    }
}
