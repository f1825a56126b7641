use serde::{Deserialize, Serialize};

/// Closed category enum (`spec.md` §3). Order matters only for `Display`;
/// comparisons should match on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Build,
    Registry,
    Auth,
    Network,
    Filesystem,
    Cache,
    Validation,
    Resource,
    Timeout,
    Permission,
    Configuration,
    Manifest,
    Layer,
    Executor,
    Unknown,
}

impl ErrorCategory {
    /// Default retryability for the category, overridable per error
    /// (`spec.md` §3: "Retryability is an explicit boolean plus a category
    /// default").
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Registry
                | ErrorCategory::Resource
                | ErrorCategory::Cache
                | ErrorCategory::Timeout
        )
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCategory::Auth | ErrorCategory::Permission => Severity::High,
            ErrorCategory::Validation | ErrorCategory::Configuration => Severity::High,
            ErrorCategory::Manifest | ErrorCategory::Layer => Severity::Medium,
            ErrorCategory::Executor | ErrorCategory::Build => Severity::Medium,
            ErrorCategory::Filesystem | ErrorCategory::Resource => Severity::Medium,
            ErrorCategory::Network | ErrorCategory::Registry | ErrorCategory::Timeout => Severity::Medium,
            ErrorCategory::Cache => Severity::Low,
            ErrorCategory::Unknown => Severity::Medium,
        }
    }

    /// Infer a category from an operation-kind name when no explicit
    /// category was supplied (`spec.md` §7: "inferred by the operation
    /// context... when operation names match").
    pub fn from_operation_kind(kind: &str) -> Option<Self> {
        match kind {
            "pull" | "push" => Some(ErrorCategory::Registry),
            "manifest" => Some(ErrorCategory::Manifest),
            "layer" | "extract" => Some(ErrorCategory::Layer),
            "exec" => Some(ErrorCategory::Executor),
            _ => None,
        }
    }

    /// Infer a category from message keywords (`spec.md` §7), used when an
    /// underlying error carries no explicit category.
    pub fn from_message(message: &str) -> Self {
        let hay = message.to_lowercase();
        const NETWORK: &[&str] = &[
            "connection refused",
            "connection reset",
            "network unreachable",
            "no route to host",
            "dns",
            "tls",
        ];
        const CACHE: &[&str] = &["cache"];
        const RESOURCE: &[&str] = &["out of memory", "disk full", "no space", "resource exhausted"];
        const PERMISSION: &[&str] = &["permission denied", "not authorized", "forbidden", "unauthorized"];
        const CONFIGURATION: &[&str] = &["invalid configuration", "missing config", "bad config"];
        const FILESYSTEM: &[&str] = &["no such file", "i/o error", "path traversal"];
        const BUILD: &[&str] = &["build failed", "compilation failed"];

        if NETWORK.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Network
        } else if PERMISSION.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Permission
        } else if CONFIGURATION.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Configuration
        } else if RESOURCE.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Resource
        } else if CACHE.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Cache
        } else if FILESYSTEM.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Filesystem
        } else if BUILD.iter().any(|p| hay.contains(p)) {
            ErrorCategory::Build
        } else {
            ErrorCategory::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Message-keyword override (`spec.md` §7: "presence of `fatal`,
    /// `critical`, `panic`, or `abort` forces critical").
    pub fn apply_keyword_override(self, message: &str) -> Self {
        let hay = message.to_lowercase();
        const FORCE_CRITICAL: &[&str] = &["fatal", "critical", "panic", "abort"];
        if FORCE_CRITICAL.iter().any(|p| hay.contains(p)) {
            Severity::Critical
        } else {
            self
        }
    }
}
