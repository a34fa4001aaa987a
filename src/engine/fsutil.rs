use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempPath;
use tokio::fs;

/// Name prefix of in-flight temporary files; never a valid entry.
pub(crate) const TEMP_PREFIX: &str = ".~tmp";

/// Seconds since the Unix epoch.
pub(crate) fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Returns whether `path` is an existing regular file.
pub(crate) async fn is_file(path: &Path) -> io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Writes `bytes` to `path` through a temporary file in the same directory.
///
/// Missing parent directories are created. With `overwrite == false` the final
/// rename fails with `AlreadyExists` if `path` is already present.
pub(crate) async fn write_atomic(path: &Path, bytes: Vec<u8>, overwrite: bool) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes, overwrite))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8], overwrite: bool) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "target path has no parent directory")
    })?;

    // A concurrent delete may prune the directory between creating it and
    // creating the temp file inside it.
    let mut attempts = 0;
    let mut tmp = loop {
        std::fs::create_dir_all(dir)?;
        match tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir) {
            Ok(tmp) => break tmp,
            Err(e) if e.kind() == io::ErrorKind::NotFound && attempts < 3 => attempts += 1,
            Err(e) => return Err(e),
        }
    };

    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if overwrite {
        tmp.persist(path).map_err(|e| e.error)?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| e.error)?;
    }
    Ok(())
}

/// Reserves a uniquely named file in `dir` for one transfer.
///
/// The file is removed when the returned path is dropped.
pub(crate) async fn staging_file(dir: &Path) -> io::Result<TempPath> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        let tmp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(&dir)?;
        Ok(tmp.into_temp_path())
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

/// Removes the file at `path`, then every directory above it that became
/// empty, stopping at `stop_at`. Returns false if the file did not exist.
pub(crate) async fn remove_and_prune(path: &Path, stop_at: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }
    prune_empty_dirs(path.parent().map(Path::to_path_buf), stop_at).await;
    Ok(true)
}

pub(crate) async fn prune_empty_dirs(mut dir: Option<PathBuf>, stop_at: &Path) {
    while let Some(current) = dir {
        if current == stop_at || !current.starts_with(stop_at) {
            break;
        }
        // remove_dir refuses non-empty directories, which ends the walk.
        if fs::remove_dir(&current).await.is_err() {
            break;
        }
        dir = current.parent().map(Path::to_path_buf);
    }
}
