//! Portable store parameters.
//!
//! Every store reports the full set of parameters it was built from, in
//! normalized form, through [`crate::TupleStore::params`]. Serializing a
//! [`StoreParams`] and handing it to [`crate::sdk::open`] rebuilds an
//! equivalent store, possibly in another process.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::ValueKind;
use crate::{Error, Result};

/// Default signature suffix length.
pub const DEFAULT_DIGEST_LEN: usize = 8;

/// Default file type (and codec) for stored values.
pub const DEFAULT_FILE_TYPE: &str = "json";

/// Constructor parameters for either backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreParams {
    FileDir(FileDirParams),
    Object(ObjectParams),
}

impl StoreParams {
    /// Parses parameters from JSON text.
    ///
    /// Well-formed JSON carrying values no store accepts, such as a negative
    /// `digest_len` or an unknown `backend`, is a [`Error::Configuration`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            if e.is_data() {
                Error::Configuration(format!("invalid store parameters: {}", e))
            } else {
                Error::Serialization(e)
            }
        })
    }

    /// Loads parameters from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn immutable_items(&self) -> bool {
        match self {
            Self::FileDir(p) => p.immutable_items,
            Self::Object(p) => p.immutable_items,
        }
    }
}

/// Parameters of a [`crate::LocalFileStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDirParams {
    pub base_dir: PathBuf,
    pub file_type: String,
    pub immutable_items: bool,
    pub digest_len: usize,
    pub value_kind: Option<ValueKind>,
}

impl Default for FileDirParams {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("tuple_store"),
            file_type: DEFAULT_FILE_TYPE.to_string(),
            immutable_items: false,
            digest_len: DEFAULT_DIGEST_LEN,
            value_kind: None,
        }
    }
}

impl FileDirParams {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    pub fn immutable_items(mut self, immutable_items: bool) -> Self {
        self.immutable_items = immutable_items;
        self
    }

    pub fn digest_len(mut self, digest_len: usize) -> Self {
        self.digest_len = digest_len;
        self
    }

    pub fn value_kind(mut self, value_kind: Option<ValueKind>) -> Self {
        self.value_kind = value_kind;
        self
    }
}

/// Parameters of a [`crate::RemoteObjectStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectParams {
    pub bucket_name: String,
    /// Address of the object server (`host:port`).
    pub endpoint: Option<String>,
    /// Common prefix of every object name; ends with `/` when non-empty.
    pub root_prefix: String,
    /// Local staging directory.
    pub base_dir: PathBuf,
    pub file_type: String,
    pub immutable_items: bool,
    /// Signature length for remote object names.
    pub digest_len: usize,
    /// Signature length for staged file paths.
    pub staging_digest_len: usize,
    pub value_kind: Option<ValueKind>,
}

impl Default for ObjectParams {
    fn default() -> Self {
        Self {
            bucket_name: "tuple-store".to_string(),
            endpoint: None,
            root_prefix: String::new(),
            base_dir: PathBuf::from("tuple_store_staging"),
            file_type: DEFAULT_FILE_TYPE.to_string(),
            immutable_items: false,
            digest_len: DEFAULT_DIGEST_LEN,
            staging_digest_len: DEFAULT_DIGEST_LEN,
            value_kind: None,
        }
    }
}

impl ObjectParams {
    pub fn new(bucket_name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn root_prefix(mut self, root_prefix: impl Into<String>) -> Self {
        self.root_prefix = root_prefix.into();
        self
    }

    pub fn file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    pub fn immutable_items(mut self, immutable_items: bool) -> Self {
        self.immutable_items = immutable_items;
        self
    }

    pub fn digest_len(mut self, digest_len: usize) -> Self {
        self.digest_len = digest_len;
        self
    }

    pub fn staging_digest_len(mut self, staging_digest_len: usize) -> Self {
        self.staging_digest_len = staging_digest_len;
        self
    }

    pub fn value_kind(mut self, value_kind: Option<ValueKind>) -> Self {
        self.value_kind = value_kind;
        self
    }
}

/// Appends a trailing `/` to a non-empty prefix that lacks one.
pub fn normalize_root_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}
