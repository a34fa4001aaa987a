use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::fsutil;
use crate::key::is_safe_str;
use crate::{Error, Result};

/// Metadata of one remote object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: f64,
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPage {
    pub objects: Vec<ObjectMeta>,
    /// Pass back to `list_objects` to fetch the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// A client scoped to one bucket of a remote object store.
///
/// Transport concerns (connections, retries, authentication) belong to the
/// implementation; failures surface as [`Error::Remote`] or [`Error::Io`].
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Metadata for `name`, or `None` if no such object exists.
    async fn head(&self, name: &str) -> Result<Option<ObjectMeta>>;

    /// Object contents. Fails with [`Error::ObjectNotFound`] if absent.
    async fn get_object(&self, name: &str) -> Result<Vec<u8>>;

    /// Creates or replaces an object.
    async fn put_object(&self, name: &str, data: Vec<u8>) -> Result<()>;

    /// Removes an object. Removing an absent object is not an error.
    async fn delete_object(&self, name: &str) -> Result<()>;

    /// Objects whose names start with `prefix`, sorted by name, starting after
    /// `continuation`.
    async fn list_objects(&self, prefix: &str, continuation: Option<&str>) -> Result<ObjectPage>;

    /// Fetches `name` into the local file `dest`, creating parent directories.
    async fn download_file(&self, name: &str, dest: &Path) -> Result<()> {
        let data = self.get_object(name).await?;
        fsutil::write_atomic(dest, data, true).await?;
        Ok(())
    }

    /// Uploads the local file `src` as `name`.
    async fn upload_file(&self, src: &Path, name: &str) -> Result<()> {
        let data = tokio::fs::read(src).await?;
        self.put_object(name, data).await
    }
}

/// Resolves bucket names to clients; used by the object server.
pub trait ObjectBuckets: Send + Sync {
    fn bucket(&self, name: &str) -> Result<Arc<dyn ObjectClient>>;
}

/// Streams every object under `prefix`, following continuation tokens.
pub fn list_all<'a>(client: &'a dyn ObjectClient, prefix: &'a str) -> BoxStream<'a, Result<ObjectMeta>> {
    stream::try_unfold(Some(None::<String>), move |state| async move {
        let token = match state {
            Some(token) => token,
            None => return Ok::<_, Error>(None),
        };
        let page = client.list_objects(prefix, token.as_deref()).await?;
        let next = page.next_token.map(Some);
        let objects = stream::iter(page.objects.into_iter().map(Ok::<_, Error>));
        Ok(Some((objects, next)))
    })
    .try_flatten()
    .boxed()
}

/// Checks that `name` is a `/`-separated chain of safe, non-dot segments.
pub fn validate_object_name(name: &str) -> Result<()> {
    let valid = name
        .split('/')
        .all(|seg| is_safe_str(seg) && seg != "." && seg != "..");
    if valid {
        Ok(())
    } else {
        Err(Error::Remote(format!("invalid object name {:?}", name)))
    }
}
