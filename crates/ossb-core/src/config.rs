//! The build invocation's configuration record (`spec.md` §6): a closed
//! enumeration of recognized options, loadable from TOML via `serde`
//! following `shipper`'s `config.rs` nested-struct-with-serde-defaults
//! convention.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ossb_duration::Quantity;
use ossb_error::{BuildError, ErrorCategory, Severity};
use ossb_types::{ImageReference, Platform};
use serde::{Deserialize, Serialize};

fn config_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Configuration).severity(Severity::High).build()
}

/// Per-host registry authentication, insecure-registry opt-outs, and a
/// mirror map, handed straight to `ossb_registry::RegistryClient::new`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub default_registry: Option<String>,
    /// `host -> "user:password"` or `host -> "bearer:<token>"`, parsed into
    /// an `ossb_registry::AuthConfigMap` at invocation start.
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
    #[serde(default)]
    pub insecure_registries: Vec<String>,
    #[serde(default)]
    pub mirrors: BTreeMap<String, String>,
}

/// `spec.md` §6: "uid, gid, non-root flag, capability list". The
/// unprivileged execution model (`spec.md` §4.D) never honors a 0 uid
/// regardless of what this record says; `non_root` exists for callers
/// that want the rejection to happen at config-validation time rather
/// than mid-build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default = "default_uid")]
    pub uid: u32,
    #[serde(default = "default_uid")]
    pub gid: u32,
    #[serde(default = "default_true")]
    pub non_root: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            uid: default_uid(),
            gid: default_uid(),
            non_root: true,
            capabilities: Vec::new(),
        }
    }
}

fn default_uid() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

/// `spec.md` §6: memory/disk quantity strings (`Ki`/`Mi`/`Gi`/`Ti`
/// suffixes) and a CPU string (`m`-suffixed millicores or whole cores).
/// Parsed with `ossb_duration::Quantity` at invocation start rather than
/// kept as raw strings, so a malformed suffix fails fast as a categorized
/// configuration error instead of surfacing mid-build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_disk")]
    pub disk: String,
    /// Supplemented beyond the distilled spec (`SPEC_FULL.md` §C):
    /// `cache_enabled`'s neighboring flag for whether the workspace's
    /// `tmp/`/`layers/`/`manifests/` subtrees are reclaimed on completion
    /// or retained for postmortem inspection.
    #[serde(default)]
    pub keep_workspace: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_stages: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpu: default_cpu(),
            disk: default_disk(),
            keep_workspace: false,
            max_concurrent_stages: default_max_concurrent(),
        }
    }
}

fn default_memory() -> String {
    "2Gi".to_string()
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_disk() -> String {
    "10Gi".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> Result<u64, BuildError> {
        Quantity::parse_bytes(&self.memory).map(|q| q.bytes()).map_err(|e| config_error(format!("invalid resource_limits.memory {:?}: {e}", self.memory)))
    }

    pub fn cpu_millicores(&self) -> Result<u64, BuildError> {
        Quantity::parse_cpu(&self.cpu).map(|q| q.millicores()).map_err(|e| config_error(format!("invalid resource_limits.cpu {:?}: {e}", self.cpu)))
    }

    pub fn disk_bytes(&self) -> Result<u64, BuildError> {
        Quantity::parse_bytes(&self.disk).map(|q| q.bytes()).map_err(|e| config_error(format!("invalid resource_limits.disk {:?}: {e}", self.disk)))
    }
}

/// The closed configuration record a build invocation accepts
/// (`spec.md` §6). Every field here is recognized; there is no escape
/// hatch for arbitrary extra options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInvocationConfig {
    pub context: PathBuf,
    pub recipe_path: PathBuf,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default = "default_platforms")]
    pub target_platforms: Vec<Platform>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub registry_config: RegistryConfig,
    #[serde(default)]
    pub security_context: SecurityContext,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub strict_mode: bool,
    /// Supplemented (`SPEC_FULL.md` §C): runs recipe parsing and plan
    /// graph construction only, grounded on the teacher's `run_preflight`
    /// dry-run dispatch in `engine.rs`.
    #[serde(default)]
    pub dry_run: bool,
}

impl BuildInvocationConfig {
    pub fn from_toml(text: &str) -> Result<Self, BuildError> {
        toml::from_str(text).map_err(|e| config_error(format!("failed to parse build configuration: {e}")))
    }

    /// Parses `tags` into typed references, upfront, so a malformed tag
    /// surfaces as a configuration error before any work starts rather
    /// than mid-push.
    pub fn parsed_tags(&self) -> Result<Vec<ImageReference>, BuildError> {
        self.tags
            .iter()
            .map(|t| t.parse::<ImageReference>().map_err(|e| config_error(format!("invalid tag {t:?}: {e}"))))
            .collect()
    }
}

fn default_platforms() -> Vec<Platform> {
    vec![Platform::linux_amd64()]
}
