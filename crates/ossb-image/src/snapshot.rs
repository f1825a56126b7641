//! Filesystem snapshotting and diffing for layer packaging (`spec.md`
//! §4.E): presence, mtime, size and content hash between the pre- and
//! post-state of a stage rootfs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink { target: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub kind: EntryKind,
    pub mtime: Option<SystemTime>,
    pub size: u64,
    /// Content hash of a regular file's bytes (hex sha256); `None` for
    /// directories and symlinks.
    pub content_hash: Option<String>,
}

/// Relative-path-keyed snapshot of a directory tree.
#[derive(Debug, Clone, Default)]
pub struct FileSnapshot {
    pub entries: BTreeMap<PathBuf, FileMeta>,
}

/// Walks `root` and records every entry's metadata, keyed by its path
/// relative to `root`. Device and FIFO entries are skipped, matching the
/// extractor's own handling (`spec.md` §4.D).
pub fn snapshot(root: &Path) -> io::Result<FileSnapshot> {
    let mut entries = BTreeMap::new();
    if root.exists() {
        walk(root, root, &mut entries)?;
    }
    Ok(FileSnapshot { entries })
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, FileMeta>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            out.insert(
                rel,
                FileMeta {
                    kind: EntryKind::Symlink { target },
                    mtime: None,
                    size: 0,
                    content_hash: None,
                },
            );
        } else if file_type.is_dir() {
            let meta = entry.metadata()?;
            out.insert(
                rel.clone(),
                FileMeta {
                    kind: EntryKind::Dir,
                    mtime: meta.modified().ok(),
                    size: 0,
                    content_hash: None,
                },
            );
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            let bytes = fs::read(&path)?;
            let meta = entry.metadata()?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            out.insert(
                rel,
                FileMeta {
                    kind: EntryKind::File,
                    mtime: meta.modified().ok(),
                    size: bytes.len() as u64,
                    content_hash: Some(hex::encode(hasher.finalize())),
                },
            );
        }
        // Device and FIFO entries are intentionally skipped.
    }
    Ok(())
}

/// The result of comparing two snapshots: added, modified and deleted
/// relative paths, each sorted for reproducibility.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Compares `pre` and `post` by presence, mtime, size and content hash.
pub fn diff(pre: &FileSnapshot, post: &FileSnapshot) -> Diff {
    let mut out = Diff::default();

    for (path, post_meta) in &post.entries {
        match pre.entries.get(path) {
            None => out.added.push(path.clone()),
            Some(pre_meta) if pre_meta != post_meta => out.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in pre.entries.keys() {
        if !post.entries.contains_key(path) {
            out.deleted.push(path.clone());
        }
    }

    out.added.sort();
    out.modified.sort();
    out.deleted.sort();
    out
}

/// The overlay whiteout name for a deleted file: `.wh.<basename>` in the
/// same directory. Full-directory opaque replacement uses
/// [`OPAQUE_WHITEOUT_NAME`] instead.
pub fn whiteout_name(basename: &std::ffi::OsStr) -> String {
    format!(".wh.{}", basename.to_string_lossy())
}

pub const OPAQUE_WHITEOUT_NAME: &str = ".wh..wh..opq";

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn snapshot_detects_added_modified_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("b.txt"), "bye").unwrap();
        let pre = snapshot(root).unwrap();

        fs::write(root.join("a.txt"), "hello world").unwrap();
        fs::remove_file(root.join("b.txt")).unwrap();
        fs::write(root.join("c.txt"), "new").unwrap();
        let post = snapshot(root).unwrap();

        let d = diff(&pre, &post);
        assert_eq!(d.added, vec![PathBuf::from("c.txt")]);
        assert_eq!(d.modified, vec![PathBuf::from("a.txt")]);
        assert_eq!(d.deleted, vec![PathBuf::from("b.txt")]);
    }

    #[test]
    fn unchanged_tree_yields_empty_diff() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        let pre = snapshot(dir.path()).unwrap();
        let post = snapshot(dir.path()).unwrap();
        assert!(diff(&pre, &post).is_empty());
    }

    #[test]
    fn whiteout_name_prefixes_basename() {
        assert_eq!(whiteout_name(std::ffi::OsStr::new("gone.txt")), ".wh.gone.txt");
    }
}
