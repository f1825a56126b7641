//! Operation scheduler and executor (`spec.md` §4.D — Component D):
//! workspace lifecycle, per-operation dispatch across the nine operation
//! kinds, progress reporting, a build-invocation state machine, and
//! level-based concurrency over the stage dependency graph produced by
//! `ossb-plan`.

mod extract;
mod file_ops;
mod invocation;
mod meta_ops;
mod process_exec;
mod progress;
mod scheduler;
mod stage_exec;
mod workspace;

pub use file_ops::ChownRange;
pub use invocation::{BuildInvocation, BuildState};
pub use process_exec::ExecOutcome;
pub use progress::{MonotonicObserver, NullObserver, ProgressEvent, ProgressObserver};
pub use scheduler::run_build;
pub use stage_exec::{StageExecutor, StageOutput};
pub use workspace::Workspace;

use ossb_error::{BuildError, CancellationToken};
use ossb_registry::RegistryClient;
use ossb_types::MultiStageContext;

/// Ties the invocation state machine to the scheduler: moves the
/// invocation to `Running`, runs every stage, and reports `Succeeded` or
/// `Failed` on the way out. A cancelled token (from [`BuildInvocation::cancel`]
/// called concurrently, e.g. by a Kubernetes collaborator reacting to a
/// terminated pod) surfaces as an `Err` without ever moving to `Succeeded`.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    invocation: &BuildInvocation,
    ctx: &MultiStageContext,
    workspace: &Workspace,
    registry: &RegistryClient,
    observer: &dyn ProgressObserver,
    chown_range: ChownRange,
    max_concurrent: usize,
) -> Result<std::collections::BTreeMap<String, StageOutput>, BuildError> {
    invocation.start();
    let token: &CancellationToken = invocation.token();
    match run_build(ctx, workspace, registry, token, observer, chown_range, max_concurrent) {
        Ok(outputs) => {
            invocation.finish_succeeded();
            Ok(outputs)
        }
        Err(error) => {
            invocation.finish_failed();
            Err(error)
        }
    }
}
