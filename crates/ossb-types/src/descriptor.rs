use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Platform;

/// Well-known OCI/Docker media types. The OCI variants are the default;
/// Docker variants are used only when a caller explicitly selects
/// Docker-compatible output (`spec.md` §4.E).
pub struct MediaType;

impl MediaType {
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";
    pub const OCI_CONFIG: &'static str = "application/vnd.oci.image.config.v1+json";
    pub const OCI_LAYER_GZIP: &'static str = "application/vnd.oci.image.layer.v1.tar+gzip";

    pub const DOCKER_MANIFEST: &'static str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_INDEX: &'static str = "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_CONFIG: &'static str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_GZIP: &'static str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
}

/// `(media_type, size, digest, urls[]?, annotations?)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, size: u64, digest: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            size,
            digest: digest.into(),
            urls: None,
            annotations: None,
        }
    }
}

/// `(schema_version=2, media_type, config, layers[], annotations?)`. Layer
/// descriptors are in bottom-up order (deepest layer first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ImageManifest {
    pub fn new(media_type: impl Into<String>, config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: media_type.into(),
            config,
            layers,
            annotations: None,
        }
    }

    /// Every descriptor this manifest references (config plus layers), in
    /// the order a caller should verify/upload them.
    pub fn referenced_descriptors(&self) -> Vec<&Descriptor> {
        let mut out = vec![&self.config];
        out.extend(self.layers.iter());
        out
    }
}

/// One entry of a [`ManifestIndex`]: a per-platform manifest descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformManifest {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    pub platform: Platform,
}

/// `(schema_version=2, media_type, entries[])`. Valid iff every referenced
/// per-platform manifest already exists in the target repository — that
/// precondition is enforced by `ossb-registry`, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub schema_version: u32,
    pub media_type: String,
    pub entries: Vec<PlatformManifest>,
}

impl ManifestIndex {
    pub fn new(media_type: impl Into<String>, entries: Vec<PlatformManifest>) -> Self {
        Self {
            schema_version: 2,
            media_type: media_type.into(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_references_config_then_layers_in_order() {
        let config = Descriptor::new(MediaType::OCI_CONFIG, 10, "sha256:aa");
        let l1 = Descriptor::new(MediaType::OCI_LAYER_GZIP, 20, "sha256:bb");
        let l2 = Descriptor::new(MediaType::OCI_LAYER_GZIP, 30, "sha256:cc");
        let m = ImageManifest::new(MediaType::OCI_MANIFEST, config.clone(), vec![l1.clone(), l2.clone()]);
        let refs = m.referenced_descriptors();
        assert_eq!(refs, vec![&config, &l1, &l2]);
    }

    #[test]
    fn manifest_json_round_trips() {
        let config = Descriptor::new(MediaType::OCI_CONFIG, 10, "sha256:aa");
        let m = ImageManifest::new(MediaType::OCI_MANIFEST, config, vec![]);
        let json = serde_json::to_string(&m).unwrap();
        let back: ImageManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.schema_version, 2);
        assert_eq!(back.media_type, MediaType::OCI_MANIFEST);
    }
}
