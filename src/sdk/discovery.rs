use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::config::{FileDirParams, ObjectParams, StoreParams};
use crate::engine::{LocalFileStore, RemoteObjectStore};
use crate::sdk::TcpObjectClient;
use crate::{Error, Result, TupleStore};

/// Object server address; selects the remote backend.
pub const ADDR_ENV: &str = "TUPLE_STORE_ADDR";
/// Bucket used when the remote backend is selected from the environment.
pub const BUCKET_ENV: &str = "TUPLE_STORE_BUCKET";

/// Builds a store from its reported parameters.
///
/// Object parameters without an `endpoint` fall back to `TUPLE_STORE_ADDR`.
///
/// # Examples
///
/// ```no_run
/// use tuple_store::{sdk, FileDirParams, StoreParams};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = sdk::open(StoreParams::FileDir(FileDirParams::new("./data"))).await?;
///     let again = sdk::open(store.params()).await?;
///     Ok(())
/// }
/// ```
pub async fn open(params: StoreParams) -> Result<Arc<dyn TupleStore>> {
    match params {
        StoreParams::FileDir(params) => Ok(Arc::new(LocalFileStore::open(params)?)),
        StoreParams::Object(mut params) => {
            let endpoint = match params.endpoint.clone() {
                Some(endpoint) => endpoint,
                None => env::var(ADDR_ENV)
                    .ok()
                    .filter(|addr| !addr.is_empty())
                    .ok_or_else(|| {
                        Error::Configuration(format!(
                            "object store needs an endpoint or {}",
                            ADDR_ENV
                        ))
                    })?,
            };
            let client = TcpObjectClient::connect(&endpoint, &params.bucket_name).await?;
            params.endpoint = Some(endpoint);
            Ok(Arc::new(RemoteObjectStore::open(params, Arc::new(client))?))
        }
    }
}

/// Staging directory used by [`from_env`] in remote mode.
///
/// It sits next to `data_dir` rather than inside it, so staged files never
/// show up as entries of the local fallback store.
pub fn staging_dir_for(data_dir: &Path) -> PathBuf {
    match (data_dir.parent(), data_dir.file_name()) {
        (Some(parent), Some(name)) => {
            let mut name = name.to_os_string();
            name.push(".staging");
            parent.join(name)
        }
        _ => env::temp_dir().join("tuple-store-staging"),
    }
}

/// Initializes a store based on the environment.
///
/// 1. If `TUPLE_STORE_ADDR` is set, connects to that object server in
///    **Remote Mode**, staging under [`staging_dir_for`]`(data_dir)`.
/// 2. Otherwise, or if the server is unreachable, stores files directly under
///    `data_dir` in **Local Mode**.
pub async fn from_env<P: AsRef<Path>>(data_dir: P) -> Result<Arc<dyn TupleStore>> {
    let data_dir = data_dir.as_ref();
    if let Ok(addr) = env::var(ADDR_ENV) {
        if !addr.is_empty() {
            let bucket = env::var(BUCKET_ENV).unwrap_or_else(|_| ObjectParams::default().bucket_name);
            let params = ObjectParams::new(bucket, staging_dir_for(data_dir)).endpoint(addr.clone());
            match open(StoreParams::Object(params)).await {
                Ok(store) => return Ok(store),
                Err(e) => warn!("object server {} unavailable ({}); using local files", addr, e),
            }
        }
    }

    open(StoreParams::FileDir(FileDirParams::new(data_dir))).await
}
