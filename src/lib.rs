//! Tuple Store is a durable key-value store whose keys are tuples of
//! URL/filename-safe strings.
//!
//! Two interchangeable backends implement one contract ([`TupleStore`]):
//! - [`LocalFileStore`]: each value is one file under a directory tree; a key
//!   `("a", "b", "c")` lives at `base_dir/a_<sig>/b_<sig>/c_<sig>.<file_type>`.
//! - [`RemoteObjectStore`]: each value is one object in a remote bucket; a local
//!   [`LocalFileStore`] directory stages bytes on the way in and out.
//!
//! Every key segment receives a short MD5/base32 signature suffix before it
//! touches storage, so keys that differ only in letter case never collide on
//! case-insensitive media.
//!
//! ## Core Components
//! - [`key`]: [`SafeStrTuple`] and the signing transform.
//! - [`engine`]: codecs, value policy, both backends and the object clients.
//! - [`config`]: portable constructor parameters ([`StoreParams`]).
//! - [`sdk`]: TCP object client and store discovery.
//! - [`server`]: TCP object server.

pub mod config;
pub mod engine;
pub mod key;
pub mod sdk;
pub mod server;

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use config::{FileDirParams, ObjectParams, StoreParams};
pub use engine::{
    codec_for, Codec, DirObjectClient, JsonCodec, LocalFileStore, MemoryObjectClient,
    MsgPackCodec, ObjectClient, RemoteObjectStore, StorePolicy, TextCodec, ValueKind,
};
pub use key::{KeyPart, SafeStrTuple};
pub use serde_json::Value;

/// Errors returned by Tuple Store.
#[derive(Error, Debug)]
pub enum Error {
    /// A key was empty or contained characters outside the safe set.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The key does not exist in the store.
    #[error("key not found: {key}")]
    KeyNotFound { key: SafeStrTuple },
    /// A write or delete was attempted against an append-only store.
    #[error("cannot {action} immutable item {target}")]
    ImmutableViolation { target: String, action: &'static str },
    /// A value did not satisfy the store's value-kind constraint.
    #[error("value for key {key} must be {expected}, got {found}")]
    TypeConstraintViolation {
        key: SafeStrTuple,
        expected: ValueKind,
        found: ValueKind,
    },
    /// Store parameters are invalid or contradict each other.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The remote object client has no object with this name.
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    /// The remote object client or server failed.
    #[error("remote error: {0}")]
    Remote(String),
    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred on the local filesystem or the network.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn key_not_found(key: &SafeStrTuple) -> Self {
        Error::KeyNotFound { key: key.clone() }
    }

    pub fn immutable_item(key: &SafeStrTuple, action: &'static str) -> Self {
        Error::ImmutableViolation {
            target: key.to_string(),
            action,
        }
    }

    pub fn immutable_store(action: &'static str) -> Self {
        Error::ImmutableViolation {
            target: "(all items)".to_string(),
            action,
        }
    }
}

/// A specialized Result type for Tuple Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Read operations every backend provides natively.
#[async_trait]
pub trait StoreReader: Send + Sync {
    /// Returns true if the store holds a value for `key`.
    async fn contains(&self, key: &SafeStrTuple) -> Result<bool>;
    /// Retrieves the value stored under `key`.
    async fn get(&self, key: &SafeStrTuple) -> Result<Value>;
    /// Counts the stored entries.
    async fn len(&self) -> Result<usize>;
    /// Streams every key once, in no particular order.
    ///
    /// Each call starts a fresh enumeration.
    fn keys(&self) -> BoxStream<'_, Result<SafeStrTuple>>;
    /// Last modification time of `key`, in seconds since the Unix epoch.
    async fn timestamp(&self, key: &SafeStrTuple) -> Result<f64>;
}

/// Write operations every backend provides natively.
#[async_trait]
pub trait StoreWriter: Send + Sync {
    /// Stores `value` under `key`.
    async fn set(&self, key: &SafeStrTuple, value: Value) -> Result<()>;
    /// Deletes `key`, failing with [`Error::KeyNotFound`] if it is absent.
    async fn delete(&self, key: &SafeStrTuple) -> Result<()>;
}

/// The contract shared by every backend.
///
/// Implementors supply the primitives from [`StoreReader`] and [`StoreWriter`]
/// plus sub-store construction; everything else is derived here.
#[async_trait]
pub trait TupleStore: StoreReader + StoreWriter {
    /// Policy fixed at construction time.
    fn policy(&self) -> &StorePolicy;

    /// The complete set of parameters needed to rebuild an equivalent store.
    fn params(&self) -> StoreParams;

    /// Returns a live view over all entries whose keys start with `prefix`.
    ///
    /// A prefix with no entries yields an empty view, not an error.
    async fn get_subdict(&self, prefix: &SafeStrTuple) -> Result<Box<dyn TupleStore>>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.keys().next().await.transpose()?.is_none())
    }

    /// Deletes `key` if present. Returns whether anything was deleted.
    async fn delete_if_exists(&self, key: &SafeStrTuple) -> Result<bool> {
        if self.policy().immutable_items {
            return Err(Error::immutable_item(key, "delete"));
        }
        match self.delete(key).await {
            Ok(()) => Ok(true),
            Err(Error::KeyNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes `key` and returns its value, or `default` when it is absent.
    async fn pop(&self, key: &SafeStrTuple, default: Option<Value>) -> Result<Value> {
        if self.policy().immutable_items {
            return Err(Error::immutable_item(key, "delete"));
        }
        match self.get(key).await {
            Ok(value) => {
                self.delete_if_exists(key).await?;
                Ok(value)
            }
            Err(Error::KeyNotFound { .. }) => default.ok_or_else(|| Error::key_not_found(key)),
            Err(e) => Err(e),
        }
    }

    /// Returns the value for `key`, inserting `default` first if it is absent.
    async fn setdefault(&self, key: &SafeStrTuple, default: Value) -> Result<Value> {
        if self.contains(key).await? {
            return self.get(key).await;
        }
        self.set(key, default.clone()).await?;
        Ok(default)
    }

    /// Removes every entry.
    async fn clear(&self) -> Result<()> {
        if self.policy().immutable_items {
            return Err(Error::immutable_store("clear"));
        }
        let keys: Vec<SafeStrTuple> = self.keys().try_collect().await?;
        for key in &keys {
            self.delete_if_exists(key).await?;
        }
        Ok(())
    }

    fn values(&self) -> BoxStream<'_, Result<Value>> {
        self.keys()
            .and_then(move |key| async move { self.get(&key).await })
            .boxed()
    }

    fn pairs(&self) -> BoxStream<'_, Result<(SafeStrTuple, Value)>> {
        self.keys()
            .and_then(move |key| async move {
                let value = self.get(&key).await?;
                Ok((key, value))
            })
            .boxed()
    }

    /// True when `other` holds exactly the same keys mapped to equal values.
    async fn same_items(&self, other: &dyn TupleStore) -> Result<bool> {
        if self.len().await? != other.len().await? {
            return Ok(false);
        }
        let mut pairs = self.pairs();
        while let Some((key, value)) = pairs.try_next().await? {
            match other.get(&key).await {
                Ok(theirs) if theirs == value => {}
                Ok(_) | Err(Error::KeyNotFound { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Like [`TupleStore::same_items`], against an in-memory map.
    async fn same_items_as_map(&self, other: &HashMap<SafeStrTuple, Value>) -> Result<bool> {
        if self.len().await? != other.len() {
            return Ok(false);
        }
        let mut pairs = self.pairs();
        while let Some((key, value)) = pairs.try_next().await? {
            if other.get(&key) != Some(&value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Partitions the store by first key segment.
    async fn subdicts(&self) -> Result<HashMap<String, Box<dyn TupleStore>>> {
        let mut firsts: Vec<String> = self
            .keys()
            .map_ok(|key| key.first().to_string())
            .try_collect()
            .await?;
        firsts.sort();
        firsts.dedup();

        let mut result = HashMap::with_capacity(firsts.len());
        for first in firsts {
            let prefix = SafeStrTuple::new(first.as_str())?;
            result.insert(first, self.get_subdict(&prefix).await?);
        }
        Ok(result)
    }

    /// Up to `max_n` distinct keys drawn uniformly at random.
    async fn random_sample(&self, max_n: usize) -> Result<Vec<SafeStrTuple>> {
        let keys: Vec<SafeStrTuple> = self.keys().try_collect().await?;
        let sample = keys
            .choose_multiple(&mut rand::thread_rng(), max_n)
            .cloned()
            .collect();
        Ok(sample)
    }

    /// Keys ordered by ascending timestamp, truncated to `max_n`.
    async fn oldest_keys(&self, max_n: Option<usize>) -> Result<Vec<SafeStrTuple>> {
        let mut keys = keys_by_age(self).await?;
        if let Some(n) = max_n {
            keys.truncate(n);
        }
        Ok(keys)
    }

    /// Keys ordered by descending timestamp, truncated to `max_n`.
    async fn newest_keys(&self, max_n: Option<usize>) -> Result<Vec<SafeStrTuple>> {
        let mut keys = keys_by_age(self).await?;
        keys.reverse();
        if let Some(n) = max_n {
            keys.truncate(n);
        }
        Ok(keys)
    }
}

/// All keys sorted by ascending timestamp; ties keep enumeration order.
async fn keys_by_age<S: TupleStore + ?Sized>(store: &S) -> Result<Vec<SafeStrTuple>> {
    let keys: Vec<SafeStrTuple> = store.keys().try_collect().await?;
    let mut stamped = Vec::with_capacity(keys.len());
    for key in keys {
        let ts = store.timestamp(&key).await?;
        stamped.push((ts, key));
    }
    stamped.sort_by(|a, b| a.0.total_cmp(&b.0));
    Ok(stamped.into_iter().map(|(_, key)| key).collect())
}

/// Typed access on top of any [`TupleStore`].
#[async_trait]
pub trait TypedStoreExt {
    /// Retrieves the value under `key` and deserializes it into `T`.
    async fn get_as<T: DeserializeOwned + Send>(&self, key: &SafeStrTuple) -> Result<T>;
    /// Serializes `value` and stores it under `key`.
    async fn set_as<T: Serialize + Sync>(&self, key: &SafeStrTuple, value: &T) -> Result<()>;
}

#[async_trait]
impl<S: TupleStore + ?Sized> TypedStoreExt for S {
    async fn get_as<T: DeserializeOwned + Send>(&self, key: &SafeStrTuple) -> Result<T> {
        let val = self.get(key).await?;
        Ok(serde_json::from_value(val)?)
    }

    async fn set_as<T: Serialize + Sync>(&self, key: &SafeStrTuple, value: &T) -> Result<()> {
        let val = serde_json::to_value(value)?;
        self.set(key, val).await
    }
}
