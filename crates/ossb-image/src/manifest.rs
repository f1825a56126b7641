//! Manifest assembly and pre-emission verification (`spec.md` §4.E).

use ossb_error::{BuildError, ErrorCategory, Severity};
use ossb_types::{Descriptor, ImageManifest, MediaType};
use sha2::{Digest, Sha256};

/// Assembles the image manifest: `schema_version=2`, the given media type
/// (OCI by default; Docker only when the caller explicitly selects it),
/// config descriptor, and layers bottom-up (base first).
pub fn assemble_manifest(config: Descriptor, layers_bottom_up: Vec<Descriptor>, use_docker_media_type: bool) -> ImageManifest {
    let media_type = if use_docker_media_type {
        MediaType::DOCKER_MANIFEST
    } else {
        MediaType::OCI_MANIFEST
    };
    ImageManifest::new(media_type, config, layers_bottom_up)
}

/// Verifies `bytes` exactly matches `descriptor`'s `size` and `digest`
/// before the manifest that references it is emitted (`spec.md` §4.E:
/// "verified before emission").
pub fn verify_descriptor_bytes(descriptor: &Descriptor, bytes: &[u8]) -> Result<(), BuildError> {
    if bytes.len() as u64 != descriptor.size {
        return Err(BuildError::builder(format!(
            "blob size mismatch for {}: expected {}, got {}",
            descriptor.digest,
            descriptor.size,
            bytes.len()
        ))
        .category(ErrorCategory::Manifest)
        .severity(Severity::High)
        .build());
    }

    let Some((algorithm, expected_hex)) = descriptor.digest.split_once(':') else {
        return Err(BuildError::builder(format!("malformed digest `{}`", descriptor.digest))
            .category(ErrorCategory::Manifest)
            .severity(Severity::High)
            .build());
    };
    if algorithm != "sha256" {
        return Err(BuildError::builder(format!("unsupported digest algorithm `{algorithm}`"))
            .category(ErrorCategory::Manifest)
            .severity(Severity::High)
            .build());
    }

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual_hex = hex::encode(hasher.finalize());
    if actual_hex != expected_hex {
        return Err(BuildError::builder(format!(
            "blob digest mismatch for {}: computed sha256:{actual_hex}",
            descriptor.digest
        ))
        .category(ErrorCategory::Manifest)
        .severity(Severity::High)
        .build());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_manifest_defaults_to_oci_media_type() {
        let config = Descriptor::new(MediaType::OCI_CONFIG, 2, "sha256:aa");
        let m = assemble_manifest(config, vec![], false);
        assert_eq!(m.media_type, MediaType::OCI_MANIFEST);
        assert_eq!(m.schema_version, 2);
    }

    #[test]
    fn assemble_manifest_uses_docker_media_type_when_requested() {
        let config = Descriptor::new(MediaType::OCI_CONFIG, 2, "sha256:aa");
        let m = assemble_manifest(config, vec![], true);
        assert_eq!(m.media_type, MediaType::DOCKER_MANIFEST);
    }

    #[test]
    fn verify_descriptor_bytes_accepts_matching_content() {
        let bytes = b"hello";
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = format!("sha256:{}", hex::encode(hasher.finalize()));
        let descriptor = Descriptor::new(MediaType::OCI_LAYER_GZIP, bytes.len() as u64, digest);
        assert!(verify_descriptor_bytes(&descriptor, bytes).is_ok());
    }

    #[test]
    fn verify_descriptor_bytes_rejects_size_mismatch() {
        let descriptor = Descriptor::new(MediaType::OCI_LAYER_GZIP, 100, "sha256:aa");
        let err = verify_descriptor_bytes(&descriptor, b"short").unwrap_err();
        assert_eq!(err.category, ErrorCategory::Manifest);
    }

    #[test]
    fn verify_descriptor_bytes_rejects_digest_mismatch() {
        let bytes = b"hello";
        let descriptor = Descriptor::new(MediaType::OCI_LAYER_GZIP, bytes.len() as u64, "sha256:".to_string() + &"0".repeat(64));
        assert!(verify_descriptor_bytes(&descriptor, bytes).is_err());
    }
}
