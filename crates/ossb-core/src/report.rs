//! Completion and plan-only result records (`spec.md` §6 "Output" /
//! `SPEC_FULL.md` §C dry-run mode).

use std::collections::BTreeMap;
use std::time::Duration;

use ossb_error::BuildError;

/// `(success, operations_total, cache_hits, duration, error?)` —
/// `spec.md` §6's "Completion" result record.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub success: bool,
    pub operations_total: usize,
    pub cache_hits: usize,
    pub duration: Duration,
    pub error: Option<BuildError>,
    /// Final-stage manifest digest per platform actually built, keyed by
    /// `"<os>/<arch>"`, for a caller that wants to assemble its own index
    /// or verify what was pushed.
    pub manifest_digests: BTreeMap<String, String>,
}

/// The `--dry-run` result (`SPEC_FULL.md` §C): everything Component B and
/// C can determine without ever touching the execution core, image
/// producer, or registry client.
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub stage_order: Vec<String>,
    pub levels: Vec<Vec<String>>,
    pub unreachable_stages: Vec<String>,
    pub operations_total: usize,
    pub warnings: Vec<String>,
}
