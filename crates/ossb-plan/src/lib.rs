//! Dependency-graph validation, topological ordering and pruning
//! (`spec.md` §4.C — Component C). Builds on the stage/dependency data
//! that `ossb-types::MultiStageContext` already validates for uniqueness,
//! forward-reference and self-reference rejection; this crate adds the
//! scheduling-facing views: a declaration-order-stable topological sort,
//! concurrency levels, and unreachable-stage pruning.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use ossb_types::{MultiStageContext, StageGraphError};

/// A topological order over `ctx`'s stages, ties broken by declaration
/// order (`spec.md` §4.C: "a topological sort stable on declaration
/// order... so that builds are reproducible").
///
/// Construction of `ctx` already forbids forward references, which makes
/// every dependency edge point to a strictly earlier declaration index —
/// a cycle is therefore structurally impossible once `ctx` exists. This
/// still performs a real Kahn's-algorithm pass (rather than asserting
/// declaration order is already topological) so the `Cycle` error stays
/// meaningful if that invariant is ever relaxed upstream.
pub fn topo_sort(ctx: &MultiStageContext) -> Result<Vec<String>, StageGraphError> {
    let indegree = initial_indegree(ctx);
    let dependents = dependents_of(ctx);

    let mut indegree = indegree;
    let mut ready: BTreeSet<(usize, String)> = BTreeSet::new();
    for (name, &deg) in &indegree {
        if deg == 0 {
            ready.insert((declaration_index(ctx, name), name.clone()));
        }
    }

    let mut out = Vec::with_capacity(ctx.stages.len());
    while let Some((idx, name)) = ready.iter().next().cloned() {
        ready.remove(&(idx, name.clone()));
        out.push(name.clone());

        if let Some(deps) = dependents.get(&name) {
            for dependent in deps {
                let deg = indegree.get_mut(dependent).expect("dependent tracked in indegree");
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    ready.insert((declaration_index(ctx, dependent), dependent.clone()));
                }
            }
        }
    }

    if out.len() != ctx.stages.len() {
        let remaining: Vec<String> = ctx
            .stages
            .iter()
            .map(|s| s.name.clone())
            .filter(|name| !out.contains(name))
            .collect();
        return Err(StageGraphError::Cycle(remaining));
    }

    Ok(out)
}

/// Groups stages into concurrency levels: level 0 has no dependencies,
/// level N contains stages whose dependencies are all in levels < N.
/// Stages in the same level have disjoint dependency sets and may run
/// concurrently (`spec.md` §5).
pub fn group_by_levels(ctx: &MultiStageContext) -> Vec<Vec<String>> {
    let mut level_of: BTreeMap<String, usize> = BTreeMap::new();
    let mut levels: Vec<Vec<String>> = Vec::new();

    for stage in &ctx.stages {
        let max_dep_level = stage
            .dependencies
            .iter()
            .filter_map(|dep| level_of.get(dep).copied())
            .max();
        let level = max_dep_level.map(|l| l + 1).unwrap_or(0);
        level_of.insert(stage.name.clone(), level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        levels[level].push(stage.name.clone());
    }

    levels
}

/// The transitive closure of stages `FinalStage` depends on (including
/// `FinalStage` itself).
pub fn final_stage_closure(ctx: &MultiStageContext) -> BTreeSet<String> {
    dependency_closure(ctx, &ctx.final_stage)
}

/// The transitive closure of `stage_name`'s dependencies, including
/// `stage_name` itself. Empty if `stage_name` is unknown.
pub fn dependency_closure(ctx: &MultiStageContext, stage_name: &str) -> BTreeSet<String> {
    let mut closure = BTreeSet::new();
    let mut queue = VecDeque::new();
    if ctx.get(stage_name).is_none() {
        return closure;
    }
    queue.push_back(stage_name.to_string());
    closure.insert(stage_name.to_string());

    while let Some(name) = queue.pop_front() {
        let Some(stage) = ctx.get(&name) else { continue };
        for dep in &stage.dependencies {
            if closure.insert(dep.clone()) {
                queue.push_back(dep.clone());
            }
        }
    }

    closure
}

/// Stages with no descendant in `FinalStage`'s closure: built (to honor
/// declaration order and any side effects) but not retained afterward
/// (`spec.md` §4.C pruning rule). Returned in declaration order.
pub fn unreachable_stages(ctx: &MultiStageContext) -> Vec<String> {
    let closure = final_stage_closure(ctx);
    ctx.stages
        .iter()
        .map(|s| s.name.clone())
        .filter(|name| !closure.contains(name))
        .collect()
}

fn initial_indegree(ctx: &MultiStageContext) -> BTreeMap<String, usize> {
    ctx.stages
        .iter()
        .map(|s| (s.name.clone(), s.dependencies.len()))
        .collect()
}

fn dependents_of(ctx: &MultiStageContext) -> BTreeMap<String, Vec<String>> {
    let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for stage in &ctx.stages {
        for dep in &stage.dependencies {
            dependents.entry(dep.clone()).or_default().push(stage.name.clone());
        }
    }
    dependents
}

fn declaration_index(ctx: &MultiStageContext, name: &str) -> usize {
    *ctx.stages_by_name.get(name).expect("stage exists in context")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossb_types::Stage;

    fn stage(name: &str, deps: &[&str]) -> Stage {
        let mut s = Stage::new(name);
        for d in deps {
            s.add_dependency(*d);
        }
        s
    }

    fn s2_context() -> MultiStageContext {
        // base <- builder <- final, mirroring scenario S2.
        let base = stage("base", &[]);
        let builder = stage("builder", &["base"]);
        let finale = stage("stage-2", &["builder"]);
        MultiStageContext::build(vec![base, builder, finale]).unwrap()
    }

    #[test]
    fn topo_sort_respects_dependency_order() {
        let ctx = s2_context();
        let order = topo_sort(&ctx).unwrap();
        assert_eq!(order, vec!["base".to_string(), "builder".to_string(), "stage-2".to_string()]);
    }

    #[test]
    fn group_by_levels_separates_independent_stages() {
        let base = stage("base", &[]);
        let left = stage("left", &["base"]);
        let right = stage("right", &["base"]);
        let finale = stage("finale", &["left", "right"]);
        let ctx = MultiStageContext::build(vec![base, left, right, finale]).unwrap();

        let levels = group_by_levels(&ctx);
        assert_eq!(levels[0], vec!["base".to_string()]);
        let mut level1 = levels[1].clone();
        level1.sort();
        assert_eq!(level1, vec!["left".to_string(), "right".to_string()]);
        assert_eq!(levels[2], vec!["finale".to_string()]);
    }

    #[test]
    fn unreachable_stages_are_pruned_from_final_closure() {
        let base = stage("base", &[]);
        let unused = stage("unused", &[]);
        let finale = stage("finale", &["base"]);
        let ctx = MultiStageContext::build(vec![base, unused, finale]).unwrap();

        assert_eq!(unreachable_stages(&ctx), vec!["unused".to_string()]);
        assert_eq!(
            final_stage_closure(&ctx),
            BTreeSet::from(["base".to_string(), "finale".to_string()])
        );
    }

    #[test]
    fn dependency_closure_is_transitive() {
        let ctx = s2_context();
        assert_eq!(
            dependency_closure(&ctx, "stage-2"),
            BTreeSet::from(["base".to_string(), "builder".to_string(), "stage-2".to_string()])
        );
    }
}
