//! Destination Filesystem Helpers
//!
//! Everything the receiving side needs to turn untrusted manifest
//! paths into safe locations under the download root: path
//! sanitization, parent-directory creation, and collision-free naming.

use crate::transfer::wire::FileEntry;
use crate::{ProtocolError, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Validate a wire-supplied relative path and normalize it
///
/// Rejects empty paths, absolute paths, and any `..` component, so a
/// hostile manifest cannot escape the destination root. Returns the
/// normalized relative path built from plain components only.
pub fn sanitize_relative_path(raw: &str) -> Result<PathBuf> {
    if raw.is_empty() {
        return Err(ProtocolError::PathTraversal("empty path".to_string()));
    }

    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(ProtocolError::PathTraversal(raw.to_string()));
    }

    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => sanitized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ProtocolError::PathTraversal(raw.to_string()));
            }
        }
    }

    if sanitized.as_os_str().is_empty() {
        return Err(ProtocolError::PathTraversal(raw.to_string()));
    }
    Ok(sanitized)
}

/// Resolve where a manifest entry lands under the destination root
///
/// Entries carrying a relative path keep their declared structure.
/// Top-level files fall back to the bare name and get a collision-free
/// variant so an existing download is never clobbered.
pub fn resolve_destination(root: &Path, entry: &FileEntry) -> Result<PathBuf> {
    match &entry.relative_path {
        Some(rel) => Ok(root.join(sanitize_relative_path(rel)?)),
        None => {
            let name = sanitize_relative_path(&entry.name)?;
            Ok(unique_download_path(&root.join(name)))
        }
    }
}

/// Remap the top-level components of a manifest's relative paths to
/// names that do not exist under `root` yet
///
/// Runs once per transfer, after path validation. Every entry sharing
/// a top-level component moves together, so a re-sent tree lands next
/// to the earlier download (`album`, `album (1)`, ...) with its
/// internal structure intact. Entries without a relative path keep
/// the per-file collision handling in [`resolve_destination`].
pub fn uniquify_top_level(root: &Path, files: &mut [FileEntry]) {
    let mut remapped: HashMap<String, String> = HashMap::new();
    for entry in files.iter_mut() {
        let Some(rel) = entry.relative_path.take() else {
            continue;
        };
        let (first, rest) = match rel.split_once('/') {
            Some((first, rest)) => (first.to_string(), Some(rest.to_string())),
            None => (rel, None),
        };
        let replacement = remapped.entry(first.clone()).or_insert_with(|| {
            unique_download_path(&root.join(&first))
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(first.clone())
        });
        entry.relative_path = Some(match rest {
            Some(rest) => format!("{replacement}/{rest}"),
            None => replacement.clone(),
        });
    }
}

/// First non-existing variant of `path`: `name.ext`, `name (1).ext`, ...
pub fn unique_download_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for n in 1u32.. {
        let candidate_name = match &extension {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            debug!(original = %path.display(), resolved = %candidate.display(), "Resolved name collision");
            return candidate;
        }
    }
    unreachable!()
}

/// Create the parent directory of `path` if it is missing
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_accepts_plain_paths() {
        assert_eq!(
            sanitize_relative_path("photos/2024/a.jpg").unwrap(),
            PathBuf::from("photos/2024/a.jpg")
        );
        assert_eq!(
            sanitize_relative_path("./notes.txt").unwrap(),
            PathBuf::from("notes.txt")
        );
    }

    #[test]
    fn test_sanitize_rejects_escape_attempts() {
        assert!(matches!(
            sanitize_relative_path("../secret"),
            Err(ProtocolError::PathTraversal(_))
        ));
        assert!(matches!(
            sanitize_relative_path("photos/../../etc/passwd"),
            Err(ProtocolError::PathTraversal(_))
        ));
        assert!(matches!(
            sanitize_relative_path("/etc/passwd"),
            Err(ProtocolError::PathTraversal(_))
        ));
        assert!(matches!(
            sanitize_relative_path(""),
            Err(ProtocolError::PathTraversal(_))
        ));
        assert!(matches!(
            sanitize_relative_path("."),
            Err(ProtocolError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_resolve_keeps_declared_structure() {
        let root = TempDir::new().unwrap();
        let entry =
            FileEntry::file("a.jpg", 10, None).with_relative_path("photos/a.jpg");
        let dest = resolve_destination(root.path(), &entry).unwrap();
        assert_eq!(dest, root.path().join("photos/a.jpg"));
    }

    #[test]
    fn test_resolve_top_level_collision() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("report.pdf"), b"existing").unwrap();

        let entry = FileEntry::file("report.pdf", 10, None);
        let dest = resolve_destination(root.path(), &entry).unwrap();
        assert_eq!(dest, root.path().join("report (1).pdf"));
    }

    #[test]
    fn test_uniquify_moves_whole_tree_together() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("album")).unwrap();

        let mut files = vec![
            FileEntry::directory("album", "album"),
            FileEntry::file("a.jpg", 10, None).with_relative_path("album/a.jpg"),
            FileEntry::file("b.jpg", 10, None).with_relative_path("album/raw/b.jpg"),
            FileEntry::file("solo.txt", 5, None),
        ];
        uniquify_top_level(root.path(), &mut files);

        assert_eq!(files[0].relative_path.as_deref(), Some("album (1)"));
        assert_eq!(files[1].relative_path.as_deref(), Some("album (1)/a.jpg"));
        assert_eq!(files[2].relative_path.as_deref(), Some("album (1)/raw/b.jpg"));
        assert!(files[3].relative_path.is_none());
    }

    #[test]
    fn test_uniquify_keeps_fresh_names() {
        let root = TempDir::new().unwrap();
        let mut files = vec![
            FileEntry::directory("new", "new"),
            FileEntry::file("a", 1, None).with_relative_path("new/a"),
        ];
        uniquify_top_level(root.path(), &mut files);
        assert_eq!(files[0].relative_path.as_deref(), Some("new"));
        assert_eq!(files[1].relative_path.as_deref(), Some("new/a"));
    }

    #[test]
    fn test_unique_path_counts_upward() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("data"), b"x").unwrap();
        std::fs::write(root.path().join("data (1)"), b"x").unwrap();

        let dest = unique_download_path(&root.path().join("data"));
        assert_eq!(dest, root.path().join("data (2)"));
    }

    #[tokio::test]
    async fn test_ensure_parent_dir() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("a/b/c.txt");
        ensure_parent_dir(&target).await.unwrap();
        assert!(root.path().join("a/b").is_dir());
    }
}
