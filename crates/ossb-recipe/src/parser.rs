//! Ties the lexer, instruction parsing, build-arg substitution and safety
//! validation together into `parse`: recipe text + context root + build
//! args → [`ossb_types::MultiStageContext`] or a validation-category
//! critical [`BuildError`] (`spec.md` §4.B).

use std::collections::BTreeMap;

use ossb_error::{BuildError, ErrorCategory, Severity};
use ossb_types::{FileAction, ImageReference, MetaInstruction, Operation, OperationCommon, Stage};

use crate::instruction::{self, InstructionKind};
use crate::lexer::{self, RawLine};
use crate::substitution;
use crate::validation;

/// Result of a successful parse: the resolved stage/dependency graph plus
/// any non-fatal warnings (undefined build-arg expansions).
pub struct ParseOutput {
    pub stages: Vec<Stage>,
    pub warnings: Vec<String>,
}

fn error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message)
        .category(ErrorCategory::Validation)
        .severity(Severity::Critical)
        .build()
}

/// Parses `text` against `build_args` (caller-supplied overrides for
/// recipe `ARG` defaults). Returns the ordered stage list (unvalidated as
/// a graph — call [`ossb_types::MultiStageContext::build`] on the result
/// to get the validated, queryable context) and accumulated warnings.
pub fn parse(text: &str, build_args: &BTreeMap<String, String>) -> Result<ParseOutput, BuildError> {
    if build_args.len() > validation::MAX_BUILD_ARGS {
        return Err(error(format!(
            "build-arg count exceeds the limit of {}",
            validation::MAX_BUILD_ARGS
        )));
    }
    for (key, value) in build_args {
        validation::validate_build_arg(key, value, build_args.len())?;
    }

    let lines = lexer::lex(text).map_err(|e| error(e.to_string()))?;

    let mut scope: BTreeMap<String, String> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut stages: Vec<Stage> = Vec::new();
    let mut names: BTreeMap<String, usize> = BTreeMap::new();

    for line in &lines {
        let kind = InstructionKind::parse(&line.instruction)
            .ok_or_else(|| error(format!("line {}: unrecognized instruction `{}`", line.line_no, line.instruction)))?;

        if kind == InstructionKind::Arg {
            let (name, default) = instruction::parse_arg_decl(&line.payload);
            validation::validate_env_or_arg_key("ARG", &name)?;
            if let Some(default) = default {
                let (expanded, w) = substitution::substitute(&default, &scope);
                warnings.extend(w);
                scope.entry(name.clone()).or_insert(expanded);
            }
            if let Some(override_value) = build_args.get(&name) {
                scope.insert(name, override_value.clone());
            }
            continue;
        }

        let (payload, line_warnings) = substitution::substitute(&line.payload, &scope);
        warnings.extend(line_warnings);

        if kind == InstructionKind::From {
            let clause = instruction::parse_from(&payload).map_err(|e| tag_line(e, line))?;
            let stage_name = clause.stage_name.unwrap_or_else(|| format!("stage-{}", stages.len()));
            if names.contains_key(&stage_name) {
                return Err(error(format!("line {}: duplicate stage name `{stage_name}`", line.line_no)));
            }

            let mut stage = Stage::new(stage_name.clone());
            let common = || OperationCommon::new(stage_name.clone());

            if clause.image == "scratch" {
                stage.is_scratch = true;
                stage.operations.push(Operation::Extract { common: common() });
            } else if let Some(&base_idx) = names.get(&clause.image) {
                let base_name = stages[base_idx].name.clone();
                stage.base_stage = Some(base_name.clone());
                stage.add_dependency(base_name);
                stage.operations.push(Operation::Extract { common: common() });
            } else {
                let image_ref = clause
                    .image
                    .parse::<ImageReference>()
                    .map_err(|e| error(format!("line {}: invalid FROM image: {e}", line.line_no)))?;
                stage.base_image_ref = Some(image_ref.clone());
                stage.operations.push(Operation::Pull { common: common(), image: image_ref });
                stage.operations.push(Operation::Extract { common: common() });
            }

            names.insert(stage_name, stages.len());
            stages.push(stage);
            continue;
        }

        let Some(stage) = stages.last_mut() else {
            return Err(error(format!(
                "line {}: `{}` before any FROM instruction",
                line.line_no, line.instruction
            )));
        };
        let stage_name = stage.name.clone();
        let common = || OperationCommon::new(stage_name.clone());

        match kind {
            InstructionKind::Run => {
                validation::validate_run_payload(&payload).map_err(|e| tag_line(e, line))?;
                let argv = instruction::parse_argv(&payload);
                stage.operations.push(Operation::Exec {
                    common: common(),
                    command: payload.clone(),
                    argv,
                    cwd: None,
                    user: None,
                });
            }
            InstructionKind::Copy | InstructionKind::Add => {
                let instr_name = if kind == InstructionKind::Copy { "COPY" } else { "ADD" };
                let clause = instruction::parse_file_clause(instr_name, &payload).map_err(|e| tag_line(e, line))?;
                validation::validate_no_path_traversal(instr_name, &clause.srcs)?;
                validation::validate_no_path_traversal(instr_name, &[clause.dst.clone()])?;

                let from_stage = match &clause.from_stage {
                    Some(reference) => {
                        let resolved = resolve_from_ref(reference, &stages, &names)
                            .ok_or_else(|| error(format!("line {}: unknown --from= reference `{reference}`", line.line_no)))?;
                        Some(resolved)
                    }
                    None => None,
                };
                if let Some(dep) = &from_stage {
                    stages.last_mut().unwrap().add_dependency(dep.clone());
                }

                stages.last_mut().unwrap().operations.push(Operation::File {
                    common: common(),
                    action: if kind == InstructionKind::Copy { FileAction::Copy } else { FileAction::Add },
                    srcs: clause.srcs,
                    dst: clause.dst,
                    from_stage,
                    chown: clause.chown,
                    chmod: clause.chmod,
                });
            }
            InstructionKind::User => {
                validation::validate_user(&payload).map_err(|e| tag_line(e, line))?;
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::User { user: payload.clone() },
                });
            }
            InstructionKind::Env => {
                let (key, value) = instruction::parse_key_value(&payload).map_err(|e| tag_line(e, line))?;
                validation::validate_env_or_arg_key("ENV", &key).map_err(|e| tag_line(e, line))?;
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Env { key, value },
                });
            }
            InstructionKind::Label => {
                let (key, value) = instruction::parse_key_value(&payload).map_err(|e| tag_line(e, line))?;
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Label { key, value },
                });
            }
            InstructionKind::Expose => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Expose { port: payload.trim().to_string() },
                });
            }
            InstructionKind::Workdir => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Workdir { path: payload.trim().to_string() },
                });
            }
            InstructionKind::Cmd => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Cmd { argv: instruction::parse_argv(&payload) },
                });
            }
            InstructionKind::Entrypoint => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Entrypoint { argv: instruction::parse_argv(&payload) },
                });
            }
            InstructionKind::Volume => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Volume { path: payload.trim().to_string() },
                });
            }
            InstructionKind::StopSignal => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::StopSignal { signal: payload.trim().to_string() },
                });
            }
            InstructionKind::Healthcheck => {
                let trimmed = payload.trim();
                let instruction = if trimmed.eq_ignore_ascii_case("NONE") {
                    MetaInstruction::Healthcheck { cmd: None, interval: None, timeout: None, retries: None }
                } else {
                    MetaInstruction::Healthcheck {
                        cmd: Some(instruction::parse_argv(trimmed)),
                        interval: None,
                        timeout: None,
                        retries: None,
                    }
                };
                stage.operations.push(Operation::Meta { common: common(), instruction });
            }
            InstructionKind::Shell => {
                stage.operations.push(Operation::Meta {
                    common: common(),
                    instruction: MetaInstruction::Shell { argv: instruction::parse_argv(&payload) },
                });
            }
            InstructionKind::OnBuild => {
                validation::validate_run_payload(&payload).map_err(|e| tag_line(e, line))?;
                stage
                    .metadata_insert(format!("onbuild:{}", line.line_no), payload.clone());
            }
            InstructionKind::From | InstructionKind::Arg => unreachable!("handled above"),
        }
    }

    if stages.is_empty() {
        return Err(error("recipe declares no FROM instruction"));
    }

    Ok(ParseOutput { stages, warnings })
}

fn tag_line(err: BuildError, line: &RawLine) -> BuildError {
    BuildError {
        message: format!("line {}: {}", line.line_no, err.message),
        ..err
    }
}

/// Resolves a `--from=` reference against the stages declared so far,
/// mirroring `MultiStageContext::resolve_from_ref` but usable mid-parse
/// before the full context exists.
fn resolve_from_ref(reference: &str, stages: &[Stage], names: &BTreeMap<String, usize>) -> Option<String> {
    if let Ok(index) = reference.parse::<usize>() {
        return stages.get(index).map(|s| s.name.clone());
    }
    names.contains_key(reference).then(|| reference.to_string())
}

trait StageMetadataExt {
    fn metadata_insert(&mut self, key: String, value: String);
}

impl StageMetadataExt for Stage {
    fn metadata_insert(&mut self, key: String, value: String) {
        if let Some(op) = self.operations.last_mut() {
            op.common_mut().metadata.insert(key, value);
        } else {
            // No operation yet to hang metadata off of; record via a
            // zero-effect Source marker isn't warranted here, so the
            // ONBUILD directive is simply dropped for an empty stage —
            // execution never reaches a stage with no operations anyway.
            let _ = (key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn s1_single_stage_scratch_image() {
        let recipe = "FROM scratch\nCOPY hello.txt /hello.txt\n";
        let out = parse(recipe, &BTreeMap::new()).unwrap();
        assert_eq!(out.stages.len(), 1);
        assert!(out.stages[0].is_scratch);
        let file_ops: Vec<_> = out.stages[0]
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::File { .. }))
            .collect();
        assert_eq!(file_ops.len(), 1);
    }

    #[test]
    fn s2_multi_stage_numeric_and_named_refs_dedup() {
        let recipe = "\
FROM alpine AS base
FROM alpine AS builder
RUN echo build
FROM alpine
COPY --from=1 /tmp/x /app/x
COPY --from=builder /etc/y /app/y
";
        let out = parse(recipe, &BTreeMap::new()).unwrap();
        let ctx = ossb_types::MultiStageContext::build(out.stages).unwrap();
        assert_eq!(ctx.get(&ctx.final_stage).unwrap().dependencies, vec!["builder".to_string()]);
    }

    #[test]
    fn s5_dangerous_recipes_rejected() {
        for recipe in [
            "FROM alpine\nRUN rm -rf /\n",
            "FROM alpine\nUSER root\n",
            "FROM alpine\nCOPY ../../../etc/passwd /p\n",
            "FROM alpine\nENV PASSWORD=abc\n",
        ] {
            let result = parse(recipe, &BTreeMap::new());
            assert!(result.is_err(), "expected rejection for: {recipe}");
            assert_eq!(result.unwrap_err().category, ErrorCategory::Validation);
        }
    }

    #[test]
    fn build_arg_substitution_with_warning_on_undefined() {
        let recipe = "FROM alpine\nARG VERSION=1.0\nRUN echo ${VERSION} ${MISSING}\n";
        let out = parse(recipe, &BTreeMap::new()).unwrap();
        assert!(!out.warnings.is_empty());
        let Operation::Exec { command, .. } = &out.stages[0].operations.last().unwrap() else {
            panic!("expected Exec operation");
        };
        assert!(command.contains("1.0"));
    }

    #[test]
    fn caller_build_args_override_recipe_defaults() {
        let recipe = "FROM alpine\nARG VERSION=1.0\nRUN echo ${VERSION}\n";
        let out = parse(recipe, &args(&[("VERSION", "2.0")])).unwrap();
        let Operation::Exec { command, .. } = &out.stages[0].operations.last().unwrap() else {
            panic!("expected Exec operation");
        };
        assert!(command.contains("2.0"));
    }
}
