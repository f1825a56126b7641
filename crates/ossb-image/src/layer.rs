//! Tar+gzip layer packaging (`spec.md` §4.E, Glossary: "Layer", "Diff
//! id", "Blob digest"). Builds a layer blob from a filesystem [`Diff`],
//! writing overlay whiteouts for deletions, and records both the
//! uncompressed digest (diff id) and the compressed digest (blob digest).

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};

use crate::snapshot::{whiteout_name, Diff, OPAQUE_WHITEOUT_NAME};

/// A packaged layer: the compressed (gzip) bytes to upload, plus the two
/// digests the descriptor needs.
pub struct PackagedLayer {
    pub compressed: Vec<u8>,
    /// Digest of the *uncompressed* tar stream.
    pub diff_id: String,
    /// Digest of the *compressed* (gzip) bytes, as uploaded.
    pub blob_digest: String,
}

/// Builds a layer from `root` (the stage rootfs) and `diff` (relative to
/// the parent layer). Deletions are recorded as overlay whiteouts rather
/// than omitted.
pub fn package_layer(root: &Path, diff: &Diff) -> io::Result<PackagedLayer> {
    let uncompressed = build_tar(root, diff)?;

    let mut diff_hasher = Sha256::new();
    diff_hasher.update(&uncompressed);
    let diff_id = format!("sha256:{}", hex::encode(diff_hasher.finalize()));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&uncompressed)?;
    let compressed = encoder.finish()?;

    let mut blob_hasher = Sha256::new();
    blob_hasher.update(&compressed);
    let blob_digest = format!("sha256:{}", hex::encode(blob_hasher.finalize()));

    Ok(PackagedLayer {
        compressed,
        diff_id,
        blob_digest,
    })
}

/// Empty-layer helper for the scratch-base case (`spec.md` scenario S1
/// needs no whiteouts, but a from-scratch first layer still has a
/// deterministic tar+gzip encoding of its added files).
fn build_tar(root: &Path, diff: &Diff) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    for rel in diff.added.iter().chain(diff.modified.iter()) {
        append_entry(&mut builder, root, rel)?;
    }
    for rel in &diff.deleted {
        append_whiteout(&mut builder, rel)?;
    }

    builder.into_inner()
}

fn append_entry(builder: &mut Builder<Vec<u8>>, root: &Path, rel: &Path) -> io::Result<()> {
    let full = root.join(rel);
    let metadata = fs::symlink_metadata(&full)?;

    let mut header = Header::new_gnu();
    header.set_mtime(mtime_secs(metadata.modified().ok()));

    if metadata.is_symlink() {
        let target = fs::read_link(&full)?;
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_link_name(&target)?;
        header.set_cksum();
        builder.append_data(&mut header, rel, io::empty())
    } else if metadata.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, rel, io::empty())
    } else {
        let bytes = fs::read(&full)?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, rel, &bytes[..])
    }
}

fn append_whiteout(builder: &mut Builder<Vec<u8>>, rel: &Path) -> io::Result<()> {
    let parent = rel.parent().unwrap_or_else(|| Path::new(""));
    let basename = rel.file_name().unwrap_or_default();
    let whiteout_path = parent.join(whiteout_name(basename));

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(0);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, whiteout_path, io::empty())
}

/// Marks `rel_dir` as fully replaced (all siblings opaque) by writing the
/// `.wh..wh..opq` marker, per `spec.md` §4.E. Not yet wired into
/// `package_layer`: directory-level opaque replacement requires the
/// execution core to record "this directory was fully replaced" as a
/// distinct diff fact, which `Diff` does not carry yet.
#[allow(dead_code)]
fn append_opaque_marker(builder: &mut Builder<Vec<u8>>, rel_dir: &Path) -> io::Result<()> {
    let marker_path = rel_dir.join(OPAQUE_WHITEOUT_NAME);
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(0);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, marker_path, io::empty())
}

fn mtime_secs(mtime: Option<SystemTime>) -> u64 {
    mtime
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{diff, snapshot};
    use std::fs;

    #[test]
    fn packages_single_added_file_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let pre = snapshot(root).unwrap();
        fs::write(root.join("hello.txt"), "hi").unwrap();
        let post = snapshot(root).unwrap();
        let d = diff(&pre, &post);

        let layer = package_layer(root, &d).unwrap();
        assert!(layer.diff_id.starts_with("sha256:"));
        assert!(layer.blob_digest.starts_with("sha256:"));
        assert_ne!(layer.diff_id, layer.blob_digest);
        assert!(!layer.compressed.is_empty());

        // Repacking the same diff is byte-identical (deterministic mtime
        // handling matters for reproducibility).
        let layer2 = package_layer(root, &d).unwrap();
        assert_eq!(layer.diff_id, layer2.diff_id);
    }

    #[test]
    fn deletion_produces_whiteout_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("gone.txt"), "x").unwrap();
        let pre = snapshot(root).unwrap();
        fs::remove_file(root.join("gone.txt")).unwrap();
        let post = snapshot(root).unwrap();
        let d = diff(&pre, &post);

        let layer = package_layer(root, &d).unwrap();
        let mut gz = flate2::read::GzDecoder::new(&layer.compressed[..]);
        let mut uncompressed = Vec::new();
        io::Read::read_to_end(&mut gz, &mut uncompressed).unwrap();
        let mut archive = tar::Archive::new(&uncompressed[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n == ".wh.gone.txt"));
    }
}
