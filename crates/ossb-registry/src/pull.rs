//! Pull (`spec.md` §4.F): fetch the top-level manifest, resolve a
//! manifest list to the caller's platform under the compatibility
//! relation, fetch the selected image manifest, and materialize each
//! layer to the workspace with progress reporting.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::GzDecoder;

use ossb_error::{BuildError, CancellationToken, ErrorCategory, Severity};
use ossb_types::{ImageManifest, ImageReference, Platform};

use crate::client::{ManifestFetch, RegistryClient};

/// One progress event per layer as it is fetched and extracted
/// (`spec.md` §4.F: "materialize each layer to the workspace with
/// progress reporting").
pub struct PullProgress {
    pub layer_index: usize,
    pub layer_count: usize,
    pub digest: String,
}

/// Resolves `reference` to a single-platform image manifest, selecting
/// the exact-match entry of a manifest list when present (falling back
/// to the first compatible entry) before following it by digest.
fn resolve_manifest(
    client: &RegistryClient,
    token: &CancellationToken,
    reference: &ImageReference,
    platform: &Platform,
) -> Result<ImageManifest, BuildError> {
    match client.get_manifest(token, reference)? {
        ManifestFetch::Image(m) => Ok(m),
        ManifestFetch::Index(index) => {
            let entry = select_platform_entry(&index.entries, platform).ok_or_else(|| {
                BuildError::builder(format!("no manifest in index matches platform {platform}"))
                    .category(ErrorCategory::Validation)
                    .severity(Severity::Critical)
                    .build()
            })?;
            let by_digest = ImageReference::try_new(
                reference.registry.clone(),
                reference.repository.clone(),
                None,
                Some(entry.digest.clone()),
            )
            .map_err(|e| {
                BuildError::builder(format!("invalid platform-manifest digest {}: {e}", entry.digest))
                    .category(ErrorCategory::Validation)
                    .build()
            })?;
            match client.get_manifest(token, &by_digest)? {
                ManifestFetch::Image(m) => Ok(m),
                ManifestFetch::Index(_) => Err(BuildError::builder("platform manifest resolved to another index")
                    .category(ErrorCategory::Manifest)
                    .severity(Severity::High)
                    .build()),
            }
        }
    }
}

/// Fetches `reference` for `platform` and extracts every layer into
/// `workspace` in bottom-up order. Returns the resolved image manifest.
/// Used when a single operation is responsible for both fetch and
/// extract (`spec.md` §4.D Pull, when no separate cache step precedes
/// it).
pub fn pull(
    client: &RegistryClient,
    token: &CancellationToken,
    reference: &ImageReference,
    platform: &Platform,
    workspace: &Path,
    mut on_progress: impl FnMut(PullProgress),
) -> Result<ImageManifest, BuildError> {
    let manifest = resolve_manifest(client, token, reference, platform)?;

    let layer_count = manifest.layers.len();
    for (layer_index, descriptor) in manifest.layers.iter().enumerate() {
        if token.is_cancelled() {
            return Err(BuildError::builder("pull cancelled")
                .category(ErrorCategory::Timeout)
                .retryable(false)
                .build());
        }
        let compressed = client.fetch_blob_bytes(token, reference, &descriptor.digest)?;
        extract_layer(workspace, &compressed)?;
        on_progress(PullProgress {
            layer_index,
            layer_count,
            digest: descriptor.digest.clone(),
        });
    }

    Ok(manifest)
}

/// Resolves `reference` for `platform` and downloads each layer's
/// compressed bytes into `blob_cache_dir` as `<digest-with-dashes>.tar.gz`,
/// without extracting. Lets a caller (`ossb-exec`'s `Pull` operation)
/// split network fetch from rootfs decode (its own `Extract` operation),
/// so a cached blob can be re-extracted without re-fetching it.
pub fn fetch_manifest_and_cache_blobs(
    client: &RegistryClient,
    token: &CancellationToken,
    reference: &ImageReference,
    platform: &Platform,
    blob_cache_dir: &Path,
    mut on_progress: impl FnMut(PullProgress, bool),
) -> Result<ImageManifest, BuildError> {
    let manifest = resolve_manifest(client, token, reference, platform)?;
    fs::create_dir_all(blob_cache_dir).map_err(|e| {
        BuildError::builder(format!("failed to create blob cache dir {}: {e}", blob_cache_dir.display()))
            .category(ErrorCategory::Filesystem)
            .build()
    })?;

    let layer_count = manifest.layers.len();
    for (layer_index, descriptor) in manifest.layers.iter().enumerate() {
        if token.is_cancelled() {
            return Err(BuildError::builder("pull cancelled")
                .category(ErrorCategory::Timeout)
                .retryable(false)
                .build());
        }
        let cache_path = blob_cache_dir.join(cache_file_name(&descriptor.digest));
        let cache_hit = cache_path.exists();
        if !cache_hit {
            let compressed = client.fetch_blob_bytes(token, reference, &descriptor.digest)?;
            fs::write(&cache_path, &compressed).map_err(|e| {
                BuildError::builder(format!("failed to write cached blob {}: {e}", cache_path.display()))
                    .category(ErrorCategory::Filesystem)
                    .build()
            })?;
        }
        on_progress(
            PullProgress {
                layer_index,
                layer_count,
                digest: descriptor.digest.clone(),
            },
            cache_hit,
        );
    }

    Ok(manifest)
}

/// Filesystem-safe name for a cached blob: `sha256:abcd` → `sha256-abcd.tar.gz`.
pub fn cache_file_name(digest: &str) -> String {
    format!("{}.tar.gz", digest.replace(':', "-"))
}

/// Exact match under [`Platform::matches`] preferred; otherwise the
/// first entry satisfying [`Platform::can_run`] (`spec.md` §3/§4.F).
fn select_platform_entry<'a>(entries: &'a [ossb_types::PlatformManifest], wanted: &Platform) -> Option<&'a ossb_types::PlatformManifest> {
    entries
        .iter()
        .find(|e| wanted.matches(&e.platform))
        .or_else(|| entries.iter().find(|e| wanted.can_run(&e.platform)))
}

/// Unpacks a gzip+tar layer into `root`, honoring overlay whiteout
/// entries (`.wh.<name>` deletes a sibling, `.wh..wh..opq` is accepted
/// but otherwise ignored — this builder never produces nested opaque
/// directories itself, see `ossb-image::layer`).
fn extract_layer(root: &Path, compressed: &[u8]) -> Result<(), BuildError> {
    let mut decompressed = Vec::new();
    GzDecoder::new(compressed)
        .read_to_end(&mut decompressed)
        .map_err(|e| layer_io_error(format!("failed to decompress layer: {e}")))?;

    let mut archive = tar::Archive::new(&decompressed[..]);
    let entries = archive.entries().map_err(|e| layer_io_error(format!("failed to read layer tar: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| layer_io_error(format!("failed to read tar entry: {e}")))?;
        let path = entry.path().map_err(|e| layer_io_error(format!("invalid tar entry path: {e}")))?.into_owned();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        if file_name == ".wh..wh..opq" {
            continue;
        }
        if let Some(target_name) = file_name.strip_prefix(".wh.") {
            let target = root.join(path.parent().unwrap_or_else(|| Path::new(""))).join(target_name);
            let _ = fs::remove_file(&target).or_else(|_| fs::remove_dir_all(&target));
            continue;
        }

        entry.unpack_in(root).map_err(|e| layer_io_error(format!("failed to unpack {}: {e}", path.display())))?;
    }
    Ok(())
}

fn layer_io_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message)
        .category(ErrorCategory::Layer)
        .severity(Severity::High)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossb_types::{MediaType, PlatformManifest};

    fn entry(arch: &str, digest: &str) -> PlatformManifest {
        PlatformManifest {
            media_type: MediaType::OCI_MANIFEST.to_string(),
            size: 10,
            digest: digest.to_string(),
            platform: Platform::new("linux", arch),
        }
    }

    #[test]
    fn select_platform_entry_prefers_exact_match() {
        let entries = vec![entry("amd64", "sha256:aa"), entry("arm64", "sha256:bb")];
        let selected = select_platform_entry(&entries, &Platform::linux_arm64()).unwrap();
        assert_eq!(selected.digest, "sha256:bb");
    }

    #[test]
    fn select_platform_entry_falls_back_to_compatible() {
        let entries = vec![entry("386", "sha256:aa")];
        let selected = select_platform_entry(&entries, &Platform::linux_amd64()).unwrap();
        assert_eq!(selected.digest, "sha256:aa");
    }

    #[test]
    fn select_platform_entry_none_when_incompatible() {
        let entries = vec![entry("arm64", "sha256:aa")];
        assert!(select_platform_entry(&entries, &Platform::linux_amd64()).is_none());
    }
}
