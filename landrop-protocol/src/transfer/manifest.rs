//! Manifest Collection
//!
//! Turns locally picked paths into the ordered entry list a request
//! carries. Picked files become top-level entries with no relative
//! path. Picked directories are walked depth-first, each directory
//! entry preceding the files inside it, with relative paths anchored
//! at the picked directory's own name so the folder structure is
//! recreated on the other side.

use crate::transfer::wire::FileEntry;
use crate::{ProtocolError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Build the manifest for a set of picked paths
pub async fn collect_entries(paths: &[PathBuf]) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for path in paths {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            let name = entry_name(path)?;
            collect_directory(path, Path::new(&name), &mut entries).await?;
        } else {
            entries.push(FileEntry::file(
                entry_name(path)?,
                metadata.len(),
                Some(path.clone()),
            ));
        }
    }
    debug!(entries = entries.len(), "Collected transfer manifest");
    Ok(entries)
}

/// Walk one directory, pushing the directory entry before its contents
async fn collect_directory(
    dir: &Path,
    relative: &Path,
    entries: &mut Vec<FileEntry>,
) -> Result<()> {
    let name = entry_name(dir)?;
    entries.push(FileEntry::directory(name, relative.to_string_lossy()));

    // Sorted for a deterministic manifest order.
    let mut children = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(child) = read_dir.next_entry().await? {
        children.push(child.path());
    }
    children.sort();

    for child in children {
        let metadata = tokio::fs::metadata(&child).await?;
        let child_relative = relative.join(entry_name(&child)?);
        if metadata.is_dir() {
            Box::pin(collect_directory(&child, &child_relative, entries)).await?;
        } else {
            entries.push(
                FileEntry::file(entry_name(&child)?, metadata.len(), Some(child.clone()))
                    .with_relative_path(child_relative.to_string_lossy()),
            );
        }
    }
    Ok(())
}

fn entry_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            ProtocolError::InvalidMessage(format!("path has no file name: {}", path.display()))
        })
}
