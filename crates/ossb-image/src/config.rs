//! Image config object assembly (`spec.md` §4.E): architecture, os,
//! history, rootfs diff-ids, and runtime config. The config blob's digest
//! is the image id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One `history` entry: one per non-meta operation (`spec.md` §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created_by: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

/// `HEALTHCHECK` as folded into the runtime config (`spec.md` §4.D Meta
/// dispatch). Fields mirror `ossb_types::operation::MetaInstruction::Healthcheck`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// The runtime config object assembled from `Meta` operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default)]
    pub exposed_ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Top-down order, i.e. base layer first (`spec.md` §4.E).
    pub diff_ids: Vec<String>,
}

/// The image config JSON document. Its digest (over the serialized
/// bytes) is the image id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os: String,
    pub history: Vec<HistoryEntry>,
    pub rootfs: RootFs,
    pub config: RuntimeConfig,
}

impl ImageConfig {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>, diff_ids_top_down: Vec<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            history: Vec::new(),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: diff_ids_top_down,
            },
            config: RuntimeConfig::default(),
        }
    }

    /// Canonical serialized bytes of this config. Used both as the blob
    /// body and as input to [`Self::image_id`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// `sha256(<config-json>)`, algorithm-prefixed, matching scenario S1's
    /// `config image id = sha256(<config-json>)`.
    pub fn image_id(&self) -> Result<String, serde_json::Error> {
        let bytes = self.to_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_is_digest_of_serialized_config() {
        let config = ImageConfig::new("amd64", "linux", vec!["sha256:aa".to_string()]);
        let bytes = config.to_bytes().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let expected = format!("sha256:{}", hex::encode(hasher.finalize()));
        assert_eq!(config.image_id().unwrap(), expected);
    }

    #[test]
    fn rootfs_preserves_diff_id_order() {
        let config = ImageConfig::new("amd64", "linux", vec!["sha256:base".into(), "sha256:top".into()]);
        assert_eq!(config.rootfs.diff_ids, vec!["sha256:base", "sha256:top"]);
    }
}
