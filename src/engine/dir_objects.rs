use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use walkdir::WalkDir;

use super::fsutil::{self, unix_seconds, TEMP_PREFIX};
use super::objects::{validate_object_name, ObjectBuckets, ObjectClient, ObjectMeta, ObjectPage};
use crate::key::is_safe_str;
use crate::{Error, Result};

const PAGE_SIZE: usize = 1000;

/// A bucket kept as a directory tree: object `a/b.json` is the file
/// `root/a/b.json`.
#[derive(Debug, Clone)]
pub struct DirObjectClient {
    root: PathBuf,
    page_size: usize,
}

impl DirObjectClient {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        validate_object_name(name)?;
        Ok(name.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }

    fn scan_names(root: &Path) -> io::Result<Vec<(String, ObjectMeta)>> {
        let mut found = Vec::new();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(e.into()),
            };
            if !entry.file_type().is_file()
                || entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
            {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let segments: Option<Vec<&str>> = rel.iter().map(|c| c.to_str()).collect();
            let Some(segments) = segments else {
                continue;
            };
            let name = segments.join("/");
            let meta = entry.metadata().map_err(io::Error::from)?;
            let last_modified = meta.modified().map(unix_seconds).unwrap_or(0.0);
            found.push((
                name.clone(),
                ObjectMeta {
                    name,
                    size: meta.len(),
                    last_modified,
                },
            ));
        }
        Ok(found)
    }
}

#[async_trait]
impl ObjectClient for DirObjectClient {
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>> {
        let path = self.object_path(name)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta {
                name: name.to_string(),
                size: meta.len(),
                last_modified: meta.modified().map(unix_seconds).unwrap_or(0.0),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_object(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.object_path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::ObjectNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let path = self.object_path(name)?;
        fsutil::write_atomic(&path, data, true).await?;
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<()> {
        let path = self.object_path(name)?;
        fsutil::remove_and_prune(&path, &self.root).await?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        let root = self.root.clone();
        let mut names = tokio::task::spawn_blocking(move || Self::scan_names(&root))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        names.retain(|(name, _)| {
            name.starts_with(prefix) && continuation.map_or(true, |token| name.as_str() > token)
        });
        names.sort_by(|a, b| a.0.cmp(&b.0));

        let next_token = if names.len() > self.page_size {
            names.truncate(self.page_size);
            names.last().map(|(name, _)| name.clone())
        } else {
            None
        };
        Ok(ObjectPage {
            objects: names.into_iter().map(|(_, meta)| meta).collect(),
            next_token,
        })
    }
}

/// Buckets stored as subdirectories of one data directory.
#[derive(Debug, Clone)]
pub struct DirBuckets {
    root: PathBuf,
}

impl DirBuckets {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectBuckets for DirBuckets {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectClient>> {
        if !is_safe_str(name) || name == "." || name == ".." {
            return Err(Error::Remote(format!("invalid bucket name {:?}", name)));
        }
        Ok(Arc::new(DirObjectClient::new(self.root.join(name))))
    }
}
