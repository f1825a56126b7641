use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ImageReference, Platform};

/// Fields common to every operation kind: the stage it belongs to, an
/// optional platform tag (set once multi-platform fan-out has begun), an
/// ordered environment binding, and a free-form metadata map used for
/// cross-component hints (`stage`, `from_stage`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationCommon {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl OperationCommon {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            platform: None,
            env: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    Copy,
    Add,
}

/// The `Meta` operation payload: ENV, LABEL, EXPOSE, USER, WORKDIR, CMD,
/// ENTRYPOINT, VOLUME, STOPSIGNAL, HEALTHCHECK, SHELL. Updates the stage's
/// in-memory config object; never touches the rootfs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetaInstruction {
    Env { key: String, value: String },
    Label { key: String, value: String },
    Expose { port: String },
    User { user: String },
    Workdir { path: String },
    Cmd { argv: Vec<String> },
    Entrypoint { argv: Vec<String> },
    Volume { path: String },
    StopSignal { signal: String },
    Healthcheck {
        cmd: Option<Vec<String>>,
        interval: Option<String>,
        timeout: Option<String>,
        retries: Option<u32>,
    },
    Shell { argv: Vec<String> },
}

/// A tagged variant, one case per operation kind (`spec.md` §3): `Source`,
/// `Exec`, `File`, `Meta`, `Pull`, `Extract`, `Layer`, `Manifest`, `Push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    /// No-op that records the context root and file fingerprints for cache
    /// keying.
    Source { common: OperationCommon },
    /// Fetches a stage's base image via the registry client.
    Pull { common: OperationCommon, image: ImageReference },
    /// Decodes pulled layers bottom-up into the stage rootfs.
    Extract { common: OperationCommon },
    /// Runs a command inside the stage rootfs.
    Exec {
        common: OperationCommon,
        command: String,
        argv: Vec<String>,
        cwd: Option<String>,
        user: Option<String>,
    },
    /// COPY/ADD: one or more sources into a destination path.
    File {
        common: OperationCommon,
        action: FileAction,
        srcs: Vec<String>,
        dst: String,
        from_stage: Option<String>,
        chown: Option<(u32, u32)>,
        chmod: Option<u32>,
    },
    Meta { common: OperationCommon, instruction: MetaInstruction },
    /// Materializes a layer blob from the stage's mutated filesystem slice.
    Layer { common: OperationCommon },
    /// Assembles the image manifest for the stage.
    Manifest { common: OperationCommon },
    /// Hands blobs and manifest(s) off to the registry client.
    Push { common: OperationCommon, tags: Vec<ImageReference> },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Source { .. } => "source",
            Operation::Pull { .. } => "pull",
            Operation::Extract { .. } => "extract",
            Operation::Exec { .. } => "exec",
            Operation::File { .. } => "file",
            Operation::Meta { .. } => "meta",
            Operation::Layer { .. } => "layer",
            Operation::Manifest { .. } => "manifest",
            Operation::Push { .. } => "push",
        }
    }

    pub fn common(&self) -> &OperationCommon {
        match self {
            Operation::Source { common }
            | Operation::Pull { common, .. }
            | Operation::Extract { common }
            | Operation::Exec { common, .. }
            | Operation::File { common, .. }
            | Operation::Meta { common, .. }
            | Operation::Layer { common }
            | Operation::Manifest { common }
            | Operation::Push { common, .. } => common,
        }
    }

    pub fn common_mut(&mut self) -> &mut OperationCommon {
        match self {
            Operation::Source { common }
            | Operation::Pull { common, .. }
            | Operation::Extract { common }
            | Operation::Exec { common, .. }
            | Operation::File { common, .. }
            | Operation::Meta { common, .. }
            | Operation::Layer { common }
            | Operation::Manifest { common }
            | Operation::Push { common, .. } => common,
        }
    }

    pub fn stage(&self) -> &str {
        &self.common().stage
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.common().platform.as_ref()
    }
}

/// `(name, base_image_ref, operations[], dependencies[])`. `FinalStage` is
/// the terminal stage; others are intermediates retained only while
/// dependents exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// `Some` when the stage's `FROM` names an external image; `None` when
    /// the base is `scratch` or another stage (see `base_stage`).
    pub base_image_ref: Option<ImageReference>,
    /// `Some` when the stage's `FROM` names a prior stage by name.
    pub base_stage: Option<String>,
    pub is_scratch: bool,
    pub operations: Vec<Operation>,
    /// Names of stages this stage copies from, plus the stage providing
    /// the base image when that base is itself a stage. Declaration-order
    /// deduplicated.
    pub dependencies: Vec<String>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_image_ref: None,
            base_stage: None,
            is_scratch: false,
            operations: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Appends `dep` to `dependencies` if not already present (dedup
    /// matters for scenario S2: duplicate `--from=` references collapse).
    pub fn add_dependency(&mut self, dep: impl Into<String>) {
        let dep = dep.into();
        if dep != self.name && !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StageGraphError {
    #[error("duplicate stage name {0:?}")]
    DuplicateName(String),
    #[error("stage {0:?} depends on unknown stage {1:?}")]
    UnknownDependency(String, String),
    #[error("stage {0:?} references itself")]
    SelfReference(String),
    #[error("stage {0:?} references later stage {1:?}")]
    ForwardReference(String, String),
    #[error("dependency cycle involving stages: {0:?}")]
    Cycle(Vec<String>),
    #[error("no stages declared")]
    Empty,
}

/// `(stages[] in declaration order, stages_by_name, final_stage)`.
/// Invariant: names unique; every dependency resolves within the set;
/// cycles rejected (enforced in [`MultiStageContext::build`]).
#[derive(Debug, Clone)]
pub struct MultiStageContext {
    pub stages: Vec<Stage>,
    pub stages_by_name: BTreeMap<String, usize>,
    pub final_stage: String,
}

impl MultiStageContext {
    pub fn build(stages: Vec<Stage>) -> Result<Self, StageGraphError> {
        if stages.is_empty() {
            return Err(StageGraphError::Empty);
        }
        let mut stages_by_name = BTreeMap::new();
        for (idx, stage) in stages.iter().enumerate() {
            if stages_by_name.insert(stage.name.clone(), idx).is_some() {
                return Err(StageGraphError::DuplicateName(stage.name.clone()));
            }
        }
        for (idx, stage) in stages.iter().enumerate() {
            for dep in &stage.dependencies {
                if dep == &stage.name {
                    return Err(StageGraphError::SelfReference(stage.name.clone()));
                }
                let Some(&dep_idx) = stages_by_name.get(dep) else {
                    return Err(StageGraphError::UnknownDependency(
                        stage.name.clone(),
                        dep.clone(),
                    ));
                };
                if dep_idx > idx {
                    return Err(StageGraphError::ForwardReference(stage.name.clone(), dep.clone()));
                }
            }
            if let Some(base) = &stage.base_stage {
                if !stages_by_name.contains_key(base) {
                    return Err(StageGraphError::UnknownDependency(stage.name.clone(), base.clone()));
                }
            }
        }
        let final_stage = stages.last().unwrap().name.clone();
        Ok(Self {
            stages,
            stages_by_name,
            final_stage,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages_by_name.get(name).map(|&idx| &self.stages[idx])
    }

    /// Resolve a `--from=` reference to a canonical stage name: a decimal
    /// index into the declaration-ordered stage list, or a stage name
    /// directly. Per `spec.md` §9 (open question), the numeric form is
    /// never preserved — only the resolved name is recorded.
    pub fn resolve_from_ref(&self, reference: &str) -> Option<String> {
        if let Ok(index) = reference.parse::<usize>() {
            return self.stages.get(index).map(|s| s.name.clone());
        }
        self.stages_by_name.contains_key(reference).then(|| reference.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, deps: &[&str]) -> Stage {
        let mut s = Stage::new(name);
        for d in deps {
            s.add_dependency(*d);
        }
        s
    }

    #[test]
    fn rejects_forward_reference() {
        let stages = vec![stage("a", &["b"]), stage("b", &[])];
        let err = MultiStageContext::build(stages).unwrap_err();
        assert_eq!(err, StageGraphError::ForwardReference("a".into(), "b".into()));
    }

    #[test]
    fn rejects_self_reference() {
        let stages = vec![stage("a", &["a"])];
        let err = MultiStageContext::build(stages).unwrap_err();
        assert_eq!(err, StageGraphError::SelfReference("a".into()));
    }

    #[test]
    fn numeric_and_named_from_refs_resolve_and_dedup() {
        // Mirrors scenario S2: base, builder, (final) with duplicate deps.
        let base = stage("base", &[]);
        let builder = stage("builder", &["base"]);
        let mut finale = Stage::new("stage-2");
        let ctx_stub = MultiStageContext::build(vec![base.clone(), builder.clone(), finale.clone()]).unwrap();
        let resolved_numeric = ctx_stub.resolve_from_ref("1").unwrap();
        assert_eq!(resolved_numeric, "builder");
        finale.add_dependency(resolved_numeric);
        finale.add_dependency(ctx_stub.resolve_from_ref("builder").unwrap());
        assert_eq!(finale.dependencies, vec!["builder".to_string()]);

        let ctx = MultiStageContext::build(vec![base, builder, finale]).unwrap();
        assert_eq!(ctx.get("stage-2").unwrap().dependencies, vec!["builder".to_string()]);
        assert_eq!(ctx.get("builder").unwrap().dependencies, vec!["base".to_string()]);
    }

    #[test]
    fn rejects_empty_stage_list() {
        assert_eq!(MultiStageContext::build(vec![]).unwrap_err(), StageGraphError::Empty);
    }
}
