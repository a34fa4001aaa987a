use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use serde_json::Value;
use tokio::fs;
use walkdir::WalkDir;

use super::codec::{check_compatible, codec_for, Codec};
use super::fsutil::{self, unix_seconds};
use super::policy::StorePolicy;
use crate::config::{FileDirParams, StoreParams};
use crate::key::{is_safe_str, sign, unsign, SafeStrTuple};
use crate::{Error, Result, StoreReader, StoreWriter, TupleStore};

/// A store that keeps every value in its own file.
///
/// A key `(s1, ..., sn)` maps to `base_dir/s1/.../s{n-1}/sn.<file_type>` after
/// each segment is signed. Directories are created on write and pruned
/// once empty.
///
/// Directory listings performed by [`StoreReader::keys`] run on the task that
/// polls the stream.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    base_dir: PathBuf,
    /// Root of the outermost store; pruning never goes above it.
    root: PathBuf,
    codec: Arc<dyn Codec>,
    policy: StorePolicy,
}

impl LocalFileStore {
    /// Opens (creating if needed) a store rooted at `params.base_dir`.
    pub fn open(params: FileDirParams) -> Result<Self> {
        let policy = StorePolicy::new(params.immutable_items, params.digest_len, params.value_kind)?;
        let codec = codec_for(&params.file_type)?;
        check_compatible(codec.as_ref(), &policy)?;

        let dir = &params.base_dir;
        if dir.exists() && !dir.is_dir() {
            return Err(Error::Configuration(format!(
                "storage root {} exists and is not a directory",
                dir.display()
            )));
        }
        std::fs::create_dir_all(dir)?;
        let base_dir = std::fs::canonicalize(dir)?;

        Ok(Self {
            root: base_dir.clone(),
            base_dir,
            codec,
            policy,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_type(&self) -> &str {
        self.codec.file_type()
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Physical location of the value stored under `key`.
    pub fn file_path(&self, key: &SafeStrTuple) -> PathBuf {
        let signed = sign(key, self.policy.digest_len);
        let (dirs, name) = signed.split_last();
        let mut path = self.base_dir.clone();
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{}.{}", name, self.file_type()));
        path
    }

    /// Physical directory holding every key that starts with `prefix`.
    pub fn dir_path(&self, prefix: &SafeStrTuple) -> PathBuf {
        let signed = sign(prefix, self.policy.digest_len);
        let mut path = self.base_dir.clone();
        for dir in &signed {
            path.push(dir);
        }
        path
    }

    /// A view over all keys starting with `prefix`, sharing this store's files.
    ///
    /// Nothing is created on disk until the first write.
    pub fn subdict(&self, prefix: &SafeStrTuple) -> LocalFileStore {
        Self {
            base_dir: self.dir_path(prefix),
            root: self.root.clone(),
            codec: self.codec.clone(),
            policy: self.policy.clone(),
        }
    }

    pub(crate) async fn read_value(&self, key: &SafeStrTuple, path: &Path) -> Result<Value> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::key_not_found(key)),
            Err(e) => return Err(e.into()),
        };
        let value = self.codec.decode(&bytes)?;
        self.policy.check_value(key, &value)?;
        Ok(value)
    }

    pub(crate) async fn write_value(&self, key: &SafeStrTuple, path: &Path, value: &Value) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        match fsutil::write_atomic(path, bytes, !self.policy.immutable_items).await {
            Ok(()) => {
                debug!("stored {} at {}", key, path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::immutable_item(key, "modify"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a file and any directories left empty, up to the outermost
    /// store root. Returns false if absent.
    pub(crate) async fn remove_path(&self, path: &Path) -> Result<bool> {
        Ok(fsutil::remove_and_prune(path, &self.root).await?)
    }

    fn walk_keys(&self) -> impl Iterator<Item = Result<SafeStrTuple>> + Send + 'static {
        let base_dir = self.base_dir.clone();
        let suffix = format!(".{}", self.file_type());
        let digest_len = self.policy.digest_len;

        WalkDir::new(&self.base_dir)
            .min_depth(1)
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    // A missing root is an empty store; vanished subtrees were deleted concurrently.
                    Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                        return None
                    }
                    Err(e) => return Some(Err(Error::Io(e.into()))),
                };
                if !entry.file_type().is_file() {
                    return None;
                }
                let rel = entry.path().strip_prefix(&base_dir).ok()?;
                let key = key_from_relative_path(rel, &suffix)?;
                Some(Ok(unsign(&key, digest_len)))
            })
    }
}

/// Rebuilds a signed key from `dir/.../name<suffix>`; `None` for foreign files.
fn key_from_relative_path(rel: &Path, suffix: &str) -> Option<SafeStrTuple> {
    let mut segments: Vec<String> = Vec::new();
    for component in rel.iter() {
        segments.push(component.to_str()?.to_string());
    }
    let name = segments.pop()?;
    let stem = name.strip_suffix(suffix)?;
    segments.push(stem.to_string());

    if segments.iter().all(|s| is_safe_str(s)) {
        Some(SafeStrTuple::from_trusted(segments))
    } else {
        warn!("skipping foreign file {}", rel.display());
        None
    }
}

#[async_trait]
impl StoreReader for LocalFileStore {
    async fn contains(&self, key: &SafeStrTuple) -> Result<bool> {
        Ok(fsutil::is_file(&self.file_path(key)).await?)
    }

    async fn get(&self, key: &SafeStrTuple) -> Result<Value> {
        self.read_value(key, &self.file_path(key)).await
    }

    async fn len(&self) -> Result<usize> {
        let walk = self.walk_keys();
        tokio::task::spawn_blocking(move || {
            let mut count = 0;
            for key in walk {
                key?;
                count += 1;
            }
            Ok(count)
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
    }

    fn keys(&self) -> BoxStream<'_, Result<SafeStrTuple>> {
        stream::iter(self.walk_keys()).boxed()
    }

    async fn timestamp(&self, key: &SafeStrTuple) -> Result<f64> {
        match fs::metadata(self.file_path(key)).await {
            Ok(meta) if meta.is_file() => Ok(unix_seconds(meta.modified()?)),
            Ok(_) => Err(Error::key_not_found(key)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::key_not_found(key)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StoreWriter for LocalFileStore {
    async fn set(&self, key: &SafeStrTuple, value: Value) -> Result<()> {
        self.policy.check_value(key, &value)?;
        let path = self.file_path(key);
        if self.policy.immutable_items && fsutil::is_file(&path).await? {
            return Err(Error::immutable_item(key, "modify"));
        }
        self.write_value(key, &path, &value).await
    }

    async fn delete(&self, key: &SafeStrTuple) -> Result<()> {
        if self.policy.immutable_items {
            return Err(Error::immutable_item(key, "delete"));
        }
        if !self.remove_path(&self.file_path(key)).await? {
            return Err(Error::key_not_found(key));
        }
        debug!("deleted {} from {}", key, self.base_dir.display());
        Ok(())
    }
}

#[async_trait]
impl TupleStore for LocalFileStore {
    fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    fn params(&self) -> StoreParams {
        StoreParams::FileDir(FileDirParams {
            base_dir: self.base_dir.clone(),
            file_type: self.file_type().to_string(),
            immutable_items: self.policy.immutable_items,
            digest_len: self.policy.digest_len,
            value_kind: self.policy.value_kind,
        })
    }

    async fn get_subdict(&self, prefix: &SafeStrTuple) -> Result<Box<dyn TupleStore>> {
        Ok(Box::new(self.subdict(prefix)))
    }

    /// Removes every entry file in one bottom-up pass, pruning emptied directories.
    async fn clear(&self) -> Result<()> {
        if self.policy.immutable_items {
            return Err(Error::immutable_store("clear"));
        }
        let base_dir = self.base_dir.clone();
        let suffix = format!(".{}", self.file_type());
        tokio::task::spawn_blocking(move || -> Result<()> {
            for entry in WalkDir::new(&base_dir).min_depth(1).contents_first(true) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                        continue
                    }
                    Err(e) => return Err(Error::Io(e.into())),
                };
                if entry.file_type().is_dir() {
                    // Non-empty directories hold foreign files; leave them.
                    let _ = std::fs::remove_dir(entry.path());
                } else if entry.file_name().to_string_lossy().ends_with(&suffix) {
                    match std::fs::remove_file(entry.path()) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

        // A cleared sub-store leaves no empty directories behind in its parent.
        fsutil::prune_empty_dirs(Some(self.base_dir.clone()), &self.root).await;
        Ok(())
    }
}
