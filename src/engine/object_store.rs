use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use log::{debug, warn};
use serde_json::Value;

use super::file_dir::LocalFileStore;
use super::fsutil;
use super::objects::{list_all, validate_object_name, ObjectClient};
use super::policy::StorePolicy;
use crate::config::{normalize_root_prefix, FileDirParams, ObjectParams, StoreParams};
use crate::key::{is_safe_str, sign, unsign, SafeStrTuple};
use crate::{Error, Result, StoreReader, StoreWriter, TupleStore};

/// A store that keeps every value as one object in a remote bucket.
///
/// Object names follow `<root_prefix><s1>/.../<sn>.<file_type>` with signed
/// segments. Bytes travel through a private [`LocalFileStore`] staging
/// directory: mutable stores remove staged files after each transfer, while
/// immutable stores keep them as a permanent read cache.
#[derive(Clone)]
pub struct RemoteObjectStore {
    client: Arc<dyn ObjectClient>,
    bucket_name: String,
    endpoint: Option<String>,
    root_prefix: String,
    local_cache: LocalFileStore,
    policy: StorePolicy,
}

impl fmt::Debug for RemoteObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObjectStore")
            .field("bucket_name", &self.bucket_name)
            .field("endpoint", &self.endpoint)
            .field("root_prefix", &self.root_prefix)
            .field("staging_dir", &self.local_cache.base_dir())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RemoteObjectStore {
    /// Builds a store over `client`, which must already be scoped to
    /// `params.bucket_name`.
    pub fn open(params: ObjectParams, client: Arc<dyn ObjectClient>) -> Result<Self> {
        let policy = StorePolicy::new(params.immutable_items, params.digest_len, params.value_kind)?;

        let root_prefix = normalize_root_prefix(&params.root_prefix);
        if !root_prefix.is_empty() {
            validate_object_name(root_prefix.trim_end_matches('/')).map_err(|_| {
                Error::Configuration(format!("invalid root prefix {:?}", params.root_prefix))
            })?;
        }
        if !is_safe_str(&params.bucket_name) {
            return Err(Error::Configuration(format!(
                "invalid bucket name {:?}",
                params.bucket_name
            )));
        }

        let local_cache = LocalFileStore::open(FileDirParams {
            base_dir: params.base_dir,
            file_type: params.file_type,
            immutable_items: params.immutable_items,
            digest_len: params.staging_digest_len,
            value_kind: params.value_kind,
        })?;

        Ok(Self {
            client,
            bucket_name: params.bucket_name,
            endpoint: params.endpoint,
            root_prefix,
            local_cache,
            policy,
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn root_prefix(&self) -> &str {
        &self.root_prefix
    }

    /// The staging store; its files are transient unless items are immutable.
    pub fn local_cache(&self) -> &LocalFileStore {
        &self.local_cache
    }

    /// Remote object name for `key`.
    pub fn object_name(&self, key: &SafeStrTuple) -> String {
        let signed = sign(key, self.policy.digest_len);
        format!(
            "{}{}.{}",
            self.root_prefix,
            signed.as_slice().join("/"),
            self.local_cache.file_type()
        )
    }

    /// Inverse of [`Self::object_name`]; `None` for objects that are not entries.
    fn key_from_object_name(&self, name: &str) -> Option<SafeStrTuple> {
        let rel = name.strip_prefix(self.root_prefix.as_str())?;
        let stem = rel.strip_suffix(&format!(".{}", self.local_cache.file_type()))?;
        let segments: Vec<String> = stem.split('/').map(str::to_string).collect();
        if !segments.iter().all(|s| is_safe_str(s)) {
            return None;
        }
        Some(unsign(
            &SafeStrTuple::from_trusted(segments),
            self.policy.digest_len,
        ))
    }

    /// A view over all keys starting with `prefix`.
    pub fn subdict(&self, prefix: &SafeStrTuple) -> RemoteObjectStore {
        let signed = sign(prefix, self.policy.digest_len);
        Self {
            client: self.client.clone(),
            bucket_name: self.bucket_name.clone(),
            endpoint: self.endpoint.clone(),
            root_prefix: format!("{}{}/", self.root_prefix, signed.as_slice().join("/")),
            local_cache: self.local_cache.subdict(prefix),
            policy: self.policy.clone(),
        }
    }

    async fn fetch(&self, key: &SafeStrTuple, staged: &Path) -> Result<Value> {
        let name = self.object_name(key);
        match self.client.download_file(&name, staged).await {
            Ok(()) => debug!("fetched {}/{}", self.bucket_name, name),
            Err(Error::ObjectNotFound(_)) => return Err(Error::key_not_found(key)),
            Err(e) => return Err(e),
        }
        self.local_cache.read_value(key, staged).await
    }
}

#[async_trait]
impl StoreReader for RemoteObjectStore {
    async fn contains(&self, key: &SafeStrTuple) -> Result<bool> {
        if self.policy.immutable_items && fsutil::is_file(&self.local_cache.file_path(key)).await? {
            return Ok(true);
        }
        Ok(self.client.head(&self.object_name(key)).await?.is_some())
    }

    async fn get(&self, key: &SafeStrTuple) -> Result<Value> {
        if !self.policy.immutable_items {
            // Each transfer gets its own file so concurrent calls never share one.
            let staged = fsutil::staging_file(self.local_cache.root()).await?;
            return self.fetch(key, &staged).await;
        }

        let staged = self.local_cache.file_path(key);
        if fsutil::is_file(&staged).await? {
            match self.local_cache.read_value(key, &staged).await {
                Ok(value) => return Ok(value),
                Err(e @ (Error::Codec(_) | Error::Serialization(_))) => {
                    warn!("discarding unreadable cached copy of {}: {}", key, e);
                    self.local_cache.remove_path(&staged).await?;
                }
                Err(e) => return Err(e),
            }
        }
        self.fetch(key, &staged).await
    }

    async fn len(&self) -> Result<usize> {
        self.keys()
            .try_fold(0usize, |count, _| future::ready(Ok(count + 1)))
            .await
    }

    fn keys(&self) -> BoxStream<'_, Result<SafeStrTuple>> {
        list_all(self.client.as_ref(), &self.root_prefix)
            .try_filter_map(move |meta| future::ready(Ok(self.key_from_object_name(&meta.name))))
            .boxed()
    }

    async fn timestamp(&self, key: &SafeStrTuple) -> Result<f64> {
        match self.client.head(&self.object_name(key)).await? {
            Some(meta) => Ok(meta.last_modified),
            None => Err(Error::key_not_found(key)),
        }
    }
}

#[async_trait]
impl StoreWriter for RemoteObjectStore {
    async fn set(&self, key: &SafeStrTuple, value: Value) -> Result<()> {
        self.policy.check_value(key, &value)?;
        let name = self.object_name(key);

        if self.policy.immutable_items {
            let staged = self.local_cache.file_path(key);
            if fsutil::is_file(&staged).await? || self.client.head(&name).await?.is_some() {
                return Err(Error::immutable_item(key, "modify"));
            }
            self.local_cache.write_value(key, &staged, &value).await?;
            if let Err(e) = self.client.upload_file(&staged, &name).await {
                self.local_cache.remove_path(&staged).await?;
                return Err(e);
            }
        } else {
            let staged = fsutil::staging_file(self.local_cache.root()).await?;
            self.local_cache.write_value(key, &staged, &value).await?;
            self.client.upload_file(&staged, &name).await?;
        }
        debug!("uploaded {}/{}", self.bucket_name, name);
        Ok(())
    }

    async fn delete(&self, key: &SafeStrTuple) -> Result<()> {
        if self.policy.immutable_items {
            return Err(Error::immutable_item(key, "delete"));
        }
        let name = self.object_name(key);
        if self.client.head(&name).await?.is_none() {
            return Err(Error::key_not_found(key));
        }
        self.client.delete_object(&name).await?;
        self.local_cache
            .remove_path(&self.local_cache.file_path(key))
            .await?;
        debug!("deleted {}/{}", self.bucket_name, name);
        Ok(())
    }
}

#[async_trait]
impl TupleStore for RemoteObjectStore {
    fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    fn params(&self) -> StoreParams {
        StoreParams::Object(ObjectParams {
            bucket_name: self.bucket_name.clone(),
            endpoint: self.endpoint.clone(),
            root_prefix: self.root_prefix.clone(),
            base_dir: self.local_cache.base_dir().to_path_buf(),
            file_type: self.local_cache.file_type().to_string(),
            immutable_items: self.policy.immutable_items,
            digest_len: self.policy.digest_len,
            staging_digest_len: self.local_cache.policy().digest_len,
            value_kind: self.policy.value_kind,
        })
    }

    async fn get_subdict(&self, prefix: &SafeStrTuple) -> Result<Box<dyn TupleStore>> {
        Ok(Box::new(self.subdict(prefix)))
    }
}
