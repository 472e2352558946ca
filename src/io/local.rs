use std::collections::VecDeque;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use super::{OpenSource, SourceEntry, SourceProvider, SourceReader};

/// Entry content read from a local file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OpenSource for FileSource {
    async fn open(&self) -> Result<SourceReader> {
        let file = fs::File::open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        Ok(Box::new(file))
    }
}

/// Depth-first walk over the regular files below a directory.
///
/// Each directory listing is sorted by name, so walking an unchanged tree
/// twice yields the same entries in the same order. Symlinks and special
/// files are skipped.
#[derive(Debug)]
pub struct DirectoryProvider {
    root: PathBuf,
    /// Paths still to visit, front first. Directories are expanded in place.
    queue: VecDeque<PathBuf>,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let queue = VecDeque::from([root.clone()]);
        Self { root, queue }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive name of `path`: relative to the root, `/`-separated.
    ///
    /// A root that is itself a file is archived under its file name.
    fn archive_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() {
            return path.file_name()?.to_str().map(str::to_string);
        }
        let mut parts = Vec::new();
        for component in relative.components() {
            parts.push(component.as_os_str().to_str()?);
        }
        Some(parts.join("/"))
    }

    fn entry_for(&self, path: &Path, name: String, meta: &Metadata) -> Result<SourceEntry> {
        let modified: DateTime<Utc> = meta
            .modified()
            .with_context(|| format!("reading mtime of {}", path.display()))?
            .into();

        let mut entry = SourceEntry::new(name, meta.len(), modified, FileSource::new(path))
            .with_identity(path.to_string_lossy());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            entry = entry.with_mode(meta.permissions().mode());
        }

        Ok(entry)
    }
}

/// Sorted paths of the children of `dir`.
async fn read_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = fs::read_dir(dir)
        .await
        .with_context(|| format!("listing {}", dir.display()))?;

    let mut children = Vec::new();
    while let Some(child) = reader.next_entry().await? {
        children.push(child.path());
    }
    children.sort();
    Ok(children)
}

#[async_trait]
impl SourceProvider for DirectoryProvider {
    async fn next_source(&mut self) -> Result<Option<SourceEntry>> {
        // The queue is only touched after each await completes, so a dropped
        // future leaves the walk exactly where it was.
        while let Some(path) = self.queue.front().cloned() {
            let meta = fs::symlink_metadata(&path)
                .await
                .with_context(|| format!("reading metadata of {}", path.display()))?;

            if meta.is_dir() {
                let children = read_sorted(&path).await?;
                self.queue.pop_front();
                for child in children.into_iter().rev() {
                    self.queue.push_front(child);
                }
                continue;
            }

            if !meta.is_file() {
                self.queue.pop_front();
                debug!(path = %path.display(), "skipping non-regular file");
                continue;
            }

            let Some(name) = self.archive_name(&path) else {
                self.queue.pop_front();
                warn!(path = %path.display(), "skipping file with a non UTF-8 name");
                continue;
            };

            let entry = self.entry_for(&path, name, &meta)?;
            self.queue.pop_front();
            return Ok(Some(entry));
        }

        Ok(None)
    }
}
