//! Finalizes a parsed [`MultiStageContext`] into something `ossb-exec` can
//! run: stamps the target platform onto every operation (multi-platform
//! builds run the whole graph once per platform) and appends the
//! trailing `Layer`/`Manifest`/`Push` operations the recipe parser itself
//! never emits (`ossb-recipe` stops at `Pull`/`Extract`/`Exec`/`File`/`Meta`
//! — `spec.md` §4.C/§4.D draw the line between "what a stage's own
//! instructions produce" and "what finishes a build" at this module).

use ossb_types::{ImageReference, MultiStageContext, Operation, OperationCommon, Platform};

/// Stamps `platform` onto every operation of every stage, so downstream
/// dispatch (`ossb_exec`'s `Pull`, and the assembled `ImageConfig`) picks
/// the right architecture/os pair for this fan-out leg.
pub fn stamp_platform(ctx: &mut MultiStageContext, platform: &Platform) {
    for stage in &mut ctx.stages {
        for operation in &mut stage.operations {
            operation.common_mut().platform = Some(platform.clone());
        }
    }
}

/// Appends `Layer`, `Manifest`, and (if `tags` is non-empty) `Push` to
/// the final stage's own operation list, in that order, completing what
/// the parser left as a bare `Pull`/`Extract`/`Exec`/`File`/`Meta`
/// sequence. A no-op if the final stage already ends in a `Manifest`
/// operation (idempotent against being called twice on the same context,
/// e.g. across retries).
pub fn append_finalization(ctx: &mut MultiStageContext, tags: &[ImageReference]) {
    let final_name = ctx.final_stage.clone();
    let Some(&index) = ctx.stages_by_name.get(&final_name) else {
        return;
    };
    let stage = &mut ctx.stages[index];
    if matches!(stage.operations.last(), Some(Operation::Manifest { .. }) | Some(Operation::Push { .. })) {
        return;
    }

    let common = OperationCommon::new(final_name.clone());
    stage.operations.push(Operation::Layer { common: common.clone() });
    stage.operations.push(Operation::Manifest { common: common.clone() });
    if !tags.is_empty() {
        stage.operations.push(Operation::Push { common, tags: tags.to_vec() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossb_types::Stage;

    fn single_stage_ctx() -> MultiStageContext {
        let mut stage = Stage::new("final");
        stage.is_scratch = true;
        stage.operations.push(Operation::Extract { common: OperationCommon::new("final") });
        MultiStageContext::build(vec![stage]).unwrap()
    }

    #[test]
    fn append_finalization_adds_layer_then_manifest() {
        let mut ctx = single_stage_ctx();
        append_finalization(&mut ctx, &[]);
        let ops = &ctx.stages[0].operations;
        assert!(matches!(ops[ops.len() - 2], Operation::Layer { .. }));
        assert!(matches!(ops[ops.len() - 1], Operation::Manifest { .. }));
    }

    #[test]
    fn append_finalization_adds_push_only_when_tags_present() {
        let mut ctx = single_stage_ctx();
        let tag: ImageReference = "example.com/repo:latest".parse().unwrap();
        append_finalization(&mut ctx, &[tag]);
        assert!(matches!(ctx.stages[0].operations.last(), Some(Operation::Push { .. })));
    }

    #[test]
    fn append_finalization_is_idempotent() {
        let mut ctx = single_stage_ctx();
        append_finalization(&mut ctx, &[]);
        let before = ctx.stages[0].operations.len();
        append_finalization(&mut ctx, &[]);
        assert_eq!(ctx.stages[0].operations.len(), before);
    }

    #[test]
    fn stamp_platform_reaches_every_operation() {
        let mut ctx = single_stage_ctx();
        stamp_platform(&mut ctx, &Platform::linux_arm64());
        for op in &ctx.stages[0].operations {
            assert_eq!(op.platform(), Some(&Platform::linux_arm64()));
        }
    }
}
