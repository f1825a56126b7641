//! Multi-platform manifest index assembly (`spec.md` §4.E). The
//! existence-verification precondition ("the index is only uploaded
//! after each referenced manifest is confirmed present on the registry")
//! is enforced by `ossb-registry`, which owns the registry round-trips;
//! this module only assembles the index document from already-confirmed
//! entries.

use ossb_types::{ManifestIndex, MediaType, PlatformManifest};

/// Assembles a manifest index from per-platform manifest descriptors.
/// Entries are kept in the order passed (`spec.md` §5: "upload-order
/// stable but the index itself carries no required order").
pub fn assemble_index(entries: Vec<PlatformManifest>, use_docker_media_type: bool) -> ManifestIndex {
    let media_type = if use_docker_media_type {
        MediaType::DOCKER_INDEX
    } else {
        MediaType::OCI_INDEX
    };
    ManifestIndex::new(media_type, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossb_types::Platform;

    #[test]
    fn assemble_index_preserves_entry_order() {
        let entries = vec![
            PlatformManifest {
                media_type: MediaType::OCI_MANIFEST.to_string(),
                size: 10,
                digest: "sha256:aa".to_string(),
                platform: Platform::linux_amd64(),
            },
            PlatformManifest {
                media_type: MediaType::OCI_MANIFEST.to_string(),
                size: 20,
                digest: "sha256:bb".to_string(),
                platform: Platform::linux_arm64(),
            },
        ];
        let index = assemble_index(entries, false);
        assert_eq!(index.media_type, MediaType::OCI_INDEX);
        assert_eq!(index.entries[0].digest, "sha256:aa");
        assert_eq!(index.entries[1].digest, "sha256:bb");
    }
}
