//! The `Extract` operation (`spec.md` §4.D): decode a stage's cached
//! layer blobs bottom-up into its rootfs, honoring tar entry types.
//! Regular files, directories, symlinks and hardlinks are materialized;
//! device and FIFO entries are skipped; any entry path that would escape
//! the rootfs fails the whole operation as a filesystem-category error.
//! The direct inverse of `ossb_image::layer`'s packaging convention,
//! written here rather than in `ossb-image` (whose scope is
//! filesystem→layer, not the reverse) and stricter than
//! `ossb_registry::pull`'s own extractor (which never validates paths),
//! since this is a generic COPY-from-arbitrary-image path rather than a
//! same-process pull-then-unpack.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use ossb_error::{BuildError, ErrorCategory, Severity};
use sha2::{Digest, Sha256};
use tar::{Archive, EntryType};

/// Unpacks the gzip+tar bytes at each of `layer_blobs` (already in
/// bottom-up order) into `rootfs`. Returns each layer's diff id (digest of
/// its uncompressed tar stream) in the same order, for the image config's
/// `rootfs.diff_ids` — the base image's config isn't fetched by the `Pull`
/// operation, so this is the only place those digests are available.
pub fn extract_layers(rootfs: &Path, layer_blobs: &[PathBuf]) -> Result<Vec<String>, BuildError> {
    fs::create_dir_all(rootfs).map_err(|e| fs_error(format!("failed to create rootfs {}: {e}", rootfs.display())))?;
    let mut diff_ids = Vec::with_capacity(layer_blobs.len());
    for blob_path in layer_blobs {
        let bytes = fs::read(blob_path).map_err(|e| fs_error(format!("failed to read layer blob {}: {e}", blob_path.display())))?;
        diff_ids.push(extract_one(rootfs, &bytes)?);
    }
    Ok(diff_ids)
}

fn extract_one(rootfs: &Path, compressed: &[u8]) -> Result<String, BuildError> {
    let mut decompressed = Vec::new();
    GzDecoder::new(compressed)
        .read_to_end(&mut decompressed)
        .map_err(|e| fs_error(format!("failed to decompress layer: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(&decompressed);
    let diff_id = format!("sha256:{}", hex::encode(hasher.finalize()));

    let mut archive = Archive::new(&decompressed[..]);
    let entries = archive.entries().map_err(|e| fs_error(format!("failed to read layer tar: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| fs_error(format!("failed to read tar entry: {e}")))?;
        let raw_path = entry.path().map_err(|e| fs_error(format!("invalid tar entry path: {e}")))?.into_owned();
        let target = resolve_within_rootfs(rootfs, &raw_path)?;
        let file_name = raw_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        if file_name == ".wh..wh..opq" {
            continue;
        }
        if let Some(deleted_name) = file_name.strip_prefix(".wh.") {
            let victim = target.parent().unwrap_or(rootfs).join(deleted_name);
            let _ = fs::remove_file(&victim).or_else(|_| fs::remove_dir_all(&victim));
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| fs_error(format!("failed to create {}: {e}", parent.display())))?;
                }
                entry.unpack(&target).map_err(|e| fs_error(format!("failed to write {}: {e}", target.display())))?;
            }
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(|e| fs_error(format!("failed to create directory {}: {e}", target.display())))?;
            }
            EntryType::Symlink => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| fs_error(format!("failed to create {}: {e}", parent.display())))?;
                }
                let _ = fs::remove_file(&target);
                entry.unpack(&target).map_err(|e| fs_error(format!("failed to write symlink {}: {e}", target.display())))?;
            }
            EntryType::Link => {
                let link_name = entry
                    .link_name()
                    .map_err(|e| fs_error(format!("invalid hardlink target: {e}")))?
                    .ok_or_else(|| fs_error("hardlink entry missing a link name"))?;
                let link_target = resolve_within_rootfs(rootfs, &link_name)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| fs_error(format!("failed to create {}: {e}", parent.display())))?;
                }
                let _ = fs::remove_file(&target);
                fs::hard_link(&link_target, &target).map_err(|e| {
                    fs_error(format!("failed to hardlink {} -> {}: {e}", target.display(), link_target.display()))
                })?;
            }
            // Device nodes and FIFOs require privileges this builder
            // never holds; skipped rather than failed.
            EntryType::Char | EntryType::Block | EntryType::Fifo => {}
            other => {
                return Err(BuildError::builder(format!("unsupported tar entry type {other:?} at {}", raw_path.display()))
                    .category(ErrorCategory::Filesystem)
                    .severity(Severity::Medium)
                    .build());
            }
        }
    }
    Ok(diff_id)
}

/// Joins `entry_path` onto `rootfs` and rejects any result that would
/// escape it — `spec.md` §4.D: "path-traversal fails filesystem-category".
fn resolve_within_rootfs(rootfs: &Path, entry_path: &Path) -> Result<PathBuf, BuildError> {
    let mut resolved = rootfs.to_path_buf();
    for component in entry_path.components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(rootfs) {
                    return Err(BuildError::builder(format!("tar entry {} attempts to escape rootfs", entry_path.display()))
                        .category(ErrorCategory::Filesystem)
                        .severity(Severity::Critical)
                        .retryable(false)
                        .build());
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BuildError::builder(format!("tar entry {} has an absolute path", entry_path.display()))
                    .category(ErrorCategory::Filesystem)
                    .severity(Severity::Critical)
                    .retryable(false)
                    .build());
            }
        }
    }
    if !resolved.starts_with(rootfs) {
        return Err(BuildError::builder(format!("tar entry {} attempts to escape rootfs", entry_path.display()))
            .category(ErrorCategory::Filesystem)
            .severity(Severity::Critical)
            .retryable(false)
            .build());
    }
    Ok(resolved)
}

fn fs_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Filesystem).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_traversal() {
        let rootfs = Path::new("/workspace/rootfs");
        let err = resolve_within_rootfs(rootfs, Path::new("../../etc/passwd")).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Filesystem);
    }

    #[test]
    fn rejects_absolute_path_entry() {
        let rootfs = Path::new("/workspace/rootfs");
        let err = resolve_within_rootfs(rootfs, Path::new("/etc/passwd")).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Filesystem);
    }

    #[test]
    fn accepts_nested_relative_path() {
        let rootfs = Path::new("/workspace/rootfs");
        let resolved = resolve_within_rootfs(rootfs, Path::new("usr/local/bin/app")).unwrap();
        assert_eq!(resolved, Path::new("/workspace/rootfs/usr/local/bin/app"));
    }

    #[test]
    fn internal_parent_dir_that_stays_inside_rootfs_is_allowed() {
        let rootfs = Path::new("/workspace/rootfs");
        let resolved = resolve_within_rootfs(rootfs, Path::new("a/../b")).unwrap();
        assert_eq!(resolved, Path::new("/workspace/rootfs/b"));
    }
}
