//! Output locations and atomic file replacement.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::RenderError;

pub const SVG_FILE: &str = "output.svg";
pub const PNG_FILE: &str = "output.png";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fixed artifact paths inside the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub svg: PathBuf,
    pub png: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            svg: dir.join(SVG_FILE),
            png: dir.join(PNG_FILE),
            dir,
        }
    }
}

/// Sibling path that is unique per process and call, so overlapping cycles
/// never share a temporary file.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

/// Move a finished temporary file over `path`. Readers see either the old
/// or the new file, never a partial one.
pub async fn replace(temp: &Path, path: &Path) -> Result<(), RenderError> {
    if let Err(e) = tokio::fs::rename(temp, path).await {
        let _ = tokio::fs::remove_file(temp).await;
        return Err(RenderError::write(path, e));
    }
    Ok(())
}

/// Write `contents` to a temporary sibling and rename it over `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), RenderError> {
    let temp = temp_sibling(path);
    if let Err(e) = tokio::fs::write(&temp, contents).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(RenderError::write(path, e));
    }
    replace(&temp, path).await?;
    debug!(path = %path.display(), bytes = contents.len(), "Wrote output");
    Ok(())
}

/// Delete temporary siblings left in `dir` by an interrupted run. A missing
/// directory has nothing to clean.
pub async fn remove_stale_temps(dir: &Path) -> Result<usize, RenderError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(RenderError::read(dir, e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RenderError::read(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with('.') && name.ends_with(".tmp")) {
            continue;
        }
        let path = entry.path();
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| RenderError::write(&path, e))?;
        debug!(path = %path.display(), "Removed stale temporary file");
        removed += 1;
    }
    Ok(removed)
}
