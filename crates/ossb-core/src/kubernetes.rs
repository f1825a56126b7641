//! The Kubernetes collaborator file interface (`spec.md` §6): the core
//! never calls Kubernetes APIs directly. It consumes three mounted paths
//! and writes two well-known JSON files, and maps its outcome to one of
//! nine exit codes.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ossb_error::{BuildError, ErrorCategory};
use ossb_exec::{ProgressEvent, ProgressObserver};
use serde::{Deserialize, Serialize};

/// Standard mount point for the registry pull secret, tier 4 of
/// `ossb_registry::auth::discover`'s chain — named here only for the
/// doc-facing inventory of well-known paths; the auth discovery itself
/// already knows this path.
pub const DOCKERCONFIGJSON_PATH: &str = "/var/run/secrets/kubernetes.io/dockerconfigjson";
/// Standard mount point for individual registry secret files.
pub const SECRET_FILES_DIR: &str = "/var/run/secrets/ossb.io/registry";
/// Standard mount point for the build context, when running as a
/// Kubernetes workload rather than invoked with an explicit `context`
/// path.
pub const CONTEXT_MOUNT_PATH: &str = "/var/run/ossb/context";

pub const PROGRESS_SNAPSHOT_PATH: &str = "/var/run/ossb/progress.json";
pub const FINAL_STATUS_PATH: &str = "/var/run/ossb/status.json";

/// A point-in-time progress snapshot, written on every progress event so
/// a sidecar or liveness probe can read current state without a
/// streaming connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: String,
    pub progress: f64,
    pub message: String,
    pub operation: Option<String>,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

/// The final status file, written exactly once when the build invocation
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStatus {
    pub success: bool,
    pub operations_total: usize,
    pub cache_hits: usize,
    pub duration_ms: u64,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BuildError>,
}

/// `spec.md` §6: "0 success; 1 general; 2 build; 3 registry; 4 auth;
/// 5 config; 6 resource; 7 timeout; 8 cancelled."
pub fn exit_code_for(error: &BuildError) -> i32 {
    match error.category {
        ErrorCategory::Registry | ErrorCategory::Network | ErrorCategory::Manifest | ErrorCategory::Layer => 3,
        ErrorCategory::Auth | ErrorCategory::Permission => 4,
        ErrorCategory::Validation | ErrorCategory::Configuration => 5,
        ErrorCategory::Resource | ErrorCategory::Cache => 6,
        ErrorCategory::Timeout => 7,
        ErrorCategory::Build | ErrorCategory::Executor | ErrorCategory::Filesystem => 2,
        ErrorCategory::Unknown => 1,
    }
}

/// A cancelled build invocation always exits 8, regardless of the
/// category the cancellation error happened to carry (`run_build`'s
/// cancellation path raises a `Timeout`-category error internally, but
/// the Kubernetes interface distinguishes "ran out of time" from
/// "caller asked us to stop").
pub const EXIT_CANCELLED: i32 = 8;
pub const EXIT_SUCCESS: i32 = 0;

/// Writes `snapshot` to [`PROGRESS_SNAPSHOT_PATH`]. Best-effort: a write
/// failure here (read-only mount, missing parent directory outside a
/// Kubernetes workload) never fails the build it is reporting on.
pub fn write_progress_snapshot(path: &Path, snapshot: &ProgressSnapshot) {
    if let Ok(bytes) = serde_json::to_vec(snapshot) {
        let _ = std::fs::write(path, bytes);
    }
}

/// Writes `status` to [`FINAL_STATUS_PATH`]. Unlike the progress
/// snapshot this one write is load-bearing for callers that poll for
/// completion rather than watch progress, so its own I/O failure is
/// surfaced rather than swallowed.
pub fn write_final_status(path: &Path, status: &FinalStatus) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(status).map_err(std::io::Error::other)?;
    std::fs::write(path, bytes)
}

/// A [`ProgressObserver`] that writes each event to [`PROGRESS_SNAPSHOT_PATH`]
/// (or a caller-chosen path, for tests). Owned by `ossb-core` rather than
/// the CLI since writing the Kubernetes interface's progress file is part
/// of the core's own contract (`spec.md` §6), not a rendering choice.
pub struct KubernetesObserver {
    path: PathBuf,
}

impl KubernetesObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProgressObserver for KubernetesObserver {
    fn on_progress(&self, event: ProgressEvent) {
        let snapshot = ProgressSnapshot {
            stage: event.stage,
            progress: event.progress,
            message: event.message,
            operation: event.operation.map(str::to_string),
            cache_hit: event.cache_hit,
            timestamp: Utc::now(),
        };
        write_progress_snapshot(&self.path, &snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossb_error::{BuildError, Severity};

    #[test]
    fn registry_category_maps_to_exit_code_3() {
        let err = BuildError::builder("blob head failed").category(ErrorCategory::Registry).build();
        assert_eq!(exit_code_for(&err), 3);
    }

    #[test]
    fn auth_category_maps_to_exit_code_4() {
        let err = BuildError::builder("401").category(ErrorCategory::Auth).build();
        assert_eq!(exit_code_for(&err), 4);
    }

    #[test]
    fn configuration_category_maps_to_exit_code_5() {
        let err = BuildError::builder("bad memory quantity").category(ErrorCategory::Configuration).build();
        assert_eq!(exit_code_for(&err), 5);
    }

    #[test]
    fn timeout_category_maps_to_exit_code_7() {
        let err = BuildError::builder("deadline exceeded").category(ErrorCategory::Timeout).severity(Severity::High).build();
        assert_eq!(exit_code_for(&err), 7);
    }

    #[test]
    fn final_status_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let status = FinalStatus {
            success: true,
            operations_total: 4,
            cache_hits: 1,
            duration_ms: 1234,
            exit_code: 0,
            error: None,
        };
        write_final_status(&path, &status).unwrap();
        let read_back: FinalStatus = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(read_back.success);
        assert_eq!(read_back.operations_total, 4);
    }

    #[test]
    fn kubernetes_observer_writes_every_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let observer = KubernetesObserver::new(&path);
        observer.on_progress(ProgressEvent {
            stage: "base".to_string(),
            progress: 0.5,
            message: "exec in progress".to_string(),
            platform: None,
            operation: Some("exec"),
            cache_hit: false,
        });
        let snapshot: ProgressSnapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(snapshot.stage, "base");
        assert_eq!(snapshot.progress, 0.5);
    }
}
