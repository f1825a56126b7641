//! Level-based concurrency (`spec.md` §4.D): stages at the same
//! dependency level (per [`ossb_plan::group_by_levels`]) run on a thread
//! pool, chunked by a configured max-concurrency; the next level only
//! starts once every stage in the current one has finished. Grounded on
//! the teacher's `engine_parallel.rs` `run_publish_level`
//! chunks-of-`max_concurrent` pattern, rewritten without its stray
//! one-shot `SeenRequests` type alias (unused here, and unrelated to
//! scheduling).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;

use ossb_error::{BuildError, CancellationToken};
use ossb_plan::group_by_levels;
use ossb_registry::RegistryClient;
use ossb_types::MultiStageContext;

use crate::file_ops::ChownRange;
use crate::progress::ProgressObserver;
use crate::stage_exec::{StageExecutor, StageOutput};
use crate::workspace::Workspace;

/// Runs every stage of `ctx`, level by level, stopping at the first
/// failure within a level (other stages already spawned in that level
/// are still allowed to finish — only the next level is not started).
pub fn run_build(
    ctx: &MultiStageContext,
    workspace: &Workspace,
    registry: &RegistryClient,
    token: &CancellationToken,
    observer: &dyn ProgressObserver,
    chown_range: ChownRange,
    max_concurrent: usize,
) -> Result<BTreeMap<String, StageOutput>, BuildError> {
    let levels = group_by_levels(ctx);
    let outputs: Arc<Mutex<BTreeMap<String, StageOutput>>> = Arc::new(Mutex::new(BTreeMap::new()));

    for level in levels {
        if token.is_cancelled() {
            return Err(BuildError::builder("build cancelled before level completed")
                .category(ossb_error::ErrorCategory::Timeout)
                .retryable(false)
                .build());
        }
        run_level(&level, ctx, workspace, registry, token, observer, chown_range, max_concurrent.max(1), &outputs)?;
    }

    Ok(Arc::try_unwrap(outputs).map(|m| m.into_inner().unwrap()).unwrap_or_else(|arc| arc.lock().unwrap().clone()))
}

#[allow(clippy::too_many_arguments)]
fn run_level(
    stage_names: &[String],
    ctx: &MultiStageContext,
    workspace: &Workspace,
    registry: &RegistryClient,
    token: &CancellationToken,
    observer: &dyn ProgressObserver,
    chown_range: ChownRange,
    max_concurrent: usize,
    outputs: &Arc<Mutex<BTreeMap<String, StageOutput>>>,
) -> Result<(), BuildError> {
    for chunk in stage_names.chunks(max_concurrent) {
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(chunk.len());
            for name in chunk {
                let stage = ctx.get(name).expect("plan guarantees every scheduled name resolves to a stage");
                let inputs_snapshot = outputs.lock().unwrap().clone();
                let executor = StageExecutor {
                    workspace,
                    registry,
                    token,
                    observer,
                    chown_range,
                };
                let outputs = Arc::clone(outputs);
                let stage_name = name.clone();
                handles.push(scope.spawn(move || {
                    let result = executor.run(stage, &inputs_snapshot);
                    if let Ok(output) = &result {
                        outputs.lock().unwrap().insert(stage_name, output.clone());
                    }
                    result
                }));
            }

            let mut first_error = None;
            for handle in handles {
                let result = handle.join().expect("stage thread panicked");
                if let Err(error) = result {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
            match first_error {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullObserver;
    use ossb_types::Stage;

    fn linear_context() -> MultiStageContext {
        let mut builder = Stage::new("builder");
        builder.is_scratch = true;
        let mut final_stage = Stage::new("final");
        final_stage.is_scratch = true;
        final_stage.add_dependency("builder");
        MultiStageContext::build(vec![builder, final_stage]).unwrap()
    }

    #[test]
    fn run_build_visits_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(dir.path().join("ws")).unwrap();
        let registry = RegistryClient::new(vec![], false, Default::default()).unwrap();
        let token = CancellationToken::new();
        let observer = NullObserver;
        let ctx = linear_context();

        let outputs = run_build(&ctx, &workspace, &registry, &token, &observer, ChownRange { min: 1000, max: 65535 }, 4).unwrap();
        assert!(outputs.contains_key("builder"));
        assert!(outputs.contains_key("final"));
    }
}
