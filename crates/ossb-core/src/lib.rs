//! Integrates the recipe parser, planner, scheduler/executor, image
//! producer, and registry client behind a single build-invocation entry
//! point (`spec.md` §4, `SPEC_FULL.md` §A Component `ossb-core`).

mod config;
mod kubernetes;
mod orchestrator;
mod plan;
mod report;

pub use config::{BuildInvocationConfig, RegistryConfig, ResourceLimits, SecurityContext};
pub use kubernetes::{
    exit_code_for, write_final_status, write_progress_snapshot, FinalStatus, KubernetesObserver, ProgressSnapshot, CONTEXT_MOUNT_PATH,
    DOCKERCONFIGJSON_PATH, EXIT_CANCELLED, EXIT_SUCCESS, FINAL_STATUS_PATH, PROGRESS_SNAPSHOT_PATH, SECRET_FILES_DIR,
};
pub use orchestrator::{plan_only, run};
pub use report::{BuildReport, PlanReport};
