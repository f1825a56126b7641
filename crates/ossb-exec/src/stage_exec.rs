//! Per-stage sequential operation dispatch (`spec.md` §4.D): runs one
//! stage's operations in declaration order against an accumulated
//! [`RuntimeConfig`], reporting progress and producing the stage's layer
//! descriptor, diff id and (on the final stage) manifest.

use std::collections::BTreeMap;
use std::fs;

use ossb_error::{BuildError, CancellationToken, ErrorCategory, Severity};
use ossb_image::{diff, package_layer, snapshot, ImageConfig};
use ossb_registry::{fetch_manifest_and_cache_blobs, RegistryClient};
use ossb_types::{Descriptor, FileAction, MediaType, MetaInstruction, Operation, Stage};

use crate::extract::extract_layers;
use crate::file_ops::{self, ChownRange};
use crate::meta_ops;
use crate::process_exec;
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::workspace::Workspace;

/// Everything one stage produces, for hand-off to a dependent stage
/// (`File ... --from=<stage>`) and to the final manifest assembly.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub runtime_config: ossb_image::RuntimeConfig,
    /// Bottom-up: base layer first.
    pub layers_bottom_up: Vec<Descriptor>,
    /// Top-down: base layer first — matches `rootfs.diff_ids` ordering.
    pub diff_ids_top_down: Vec<String>,
    pub history: Vec<ossb_image::HistoryEntry>,
    /// Rootfs state as of the last `Layer` operation (or the stage's
    /// starting point, if none has run yet) — the diff base for the next.
    layer_baseline: ossb_image::FileSnapshot,
}

pub struct StageExecutor<'a> {
    pub workspace: &'a Workspace,
    pub registry: &'a RegistryClient,
    pub token: &'a CancellationToken,
    pub observer: &'a dyn ProgressObserver,
    pub chown_range: ChownRange,
}

impl<'a> StageExecutor<'a> {
    /// Runs every operation of `stage` in order. `inputs` holds the
    /// already-completed output of every stage this one depends on
    /// (needed for `File ... --from=`).
    pub fn run(&self, stage: &Stage, inputs: &BTreeMap<String, StageOutput>) -> Result<StageOutput, BuildError> {
        self.workspace.ensure_stage_dirs(&stage.name)?;
        let rootfs = self.workspace.stage_rootfs(&stage.name);

        let mut output = match &stage.base_stage {
            Some(base) => inputs
                .get(base)
                .cloned()
                .ok_or_else(|| build_error(&stage.name, format!("base stage {base:?} has not been built yet")))?,
            None => StageOutput::default(),
        };

        let total = stage.operations.len().max(1) as f64;
        for (index, operation) in stage.operations.iter().enumerate() {
            if self.token.is_cancelled() {
                return Err(BuildError::builder("build cancelled")
                    .category(ErrorCategory::Timeout)
                    .stage(stage.name.clone())
                    .retryable(false)
                    .build());
            }
            self.report(&stage.name, index as f64 / total, operation.kind(), false);
            self.dispatch(stage, operation, &rootfs, inputs, &mut output)?;
        }
        self.report(&stage.name, 1.0, "complete", false);
        Ok(output)
    }

    fn dispatch(
        &self,
        stage: &Stage,
        operation: &Operation,
        rootfs: &std::path::Path,
        inputs: &BTreeMap<String, StageOutput>,
        output: &mut StageOutput,
    ) -> Result<(), BuildError> {
        match operation {
            Operation::Source { .. } => Ok(()),

            Operation::Pull { image, .. } => {
                let platform = operation.platform().cloned().unwrap_or_else(ossb_types::Platform::linux_amd64);
                let blob_cache = self.workspace.stage_blob_cache(&stage.name);
                let manifest = fetch_manifest_and_cache_blobs(self.registry, self.token, image, &platform, &blob_cache, |progress, cache_hit| {
                    self.report_cache(&stage.name, "pull", cache_hit, progress.layer_index, progress.layer_count);
                })?;
                // The base image's diff ids live in its own config blob,
                // which this pull does not fetch (registry blob fetch is
                // scoped to `ossb-registry` internals). `Extract` re-derives
                // them directly from what actually lands on disk instead.
                output.layers_bottom_up = manifest.layers.clone();
                Ok(())
            }

            Operation::Extract { .. } => {
                let blob_cache = self.workspace.stage_blob_cache(&stage.name);
                let blobs: Vec<_> = output
                    .layers_bottom_up
                    .iter()
                    .map(|d| blob_cache.join(ossb_registry::cache_file_name(&d.digest)))
                    .collect();
                let diff_ids = extract_layers(rootfs, &blobs)?;
                output.diff_ids_top_down = diff_ids;
                output.layer_baseline = snapshot(rootfs).map_err(|e| fs_error(&stage.name, format!("failed to snapshot rootfs after extract: {e}")))?;
                Ok(())
            }

            Operation::Exec { argv, cwd, user, .. } => {
                let env = &operation.common().env;
                let outcome = process_exec::run(rootfs, argv, cwd.as_deref(), user.as_deref(), env, self.token)?;
                if outcome.exit_code != 0 {
                    return Err(build_error(&stage.name, format!("command exited with status {}: {}", outcome.exit_code, outcome.stderr_summary)));
                }
                output.history.push(ossb_image::HistoryEntry {
                    created_by: argv.join(" "),
                    empty_layer: outcome.mutated_paths.is_empty(),
                });
                Ok(())
            }

            Operation::File { action, srcs, dst, from_stage, chown, chmod, .. } => {
                let base = match from_stage {
                    Some(from) => self.workspace.stage_rootfs(
                        inputs
                            .keys()
                            .find(|k| *k == from)
                            .ok_or_else(|| build_error(&stage.name, format!("--from stage {from:?} not found")))?,
                    ),
                    None => self.workspace.root.join("context"),
                };
                file_ops::apply(rootfs, &base, *action, srcs, dst, *chown, *chmod, self.chown_range)?;
                output.history.push(ossb_image::HistoryEntry {
                    created_by: format!("{} {} {}", action_verb(*action), srcs.join(" "), dst),
                    empty_layer: false,
                });
                Ok(())
            }

            Operation::Meta { instruction, .. } => {
                meta_ops::apply(&mut output.runtime_config, instruction);
                if !matches!(instruction, MetaInstruction::Shell { .. }) {
                    output.history.push(ossb_image::HistoryEntry {
                        created_by: format!("{instruction:?}"),
                        empty_layer: true,
                    });
                }
                Ok(())
            }

            Operation::Layer { .. } => {
                let post = snapshot(rootfs).map_err(|e| fs_error(&stage.name, format!("failed to snapshot rootfs for layer: {e}")))?;
                let changes = diff(&output.layer_baseline, &post);
                let packaged = package_layer(rootfs, &changes).map_err(|e| fs_error(&stage.name, format!("failed to package layer: {e}")))?;
                output.layer_baseline = post;

                let layer_path = self.workspace.stage_layer_blob(&stage.name, &packaged.blob_digest);
                fs::write(&layer_path, &packaged.compressed).map_err(|e| fs_error(&stage.name, format!("failed to write layer blob: {e}")))?;

                output.diff_ids_top_down.push(packaged.diff_id.clone());
                output.layers_bottom_up.push(Descriptor {
                    media_type: MediaType::OCI_LAYER_GZIP.to_string(),
                    size: packaged.compressed.len() as u64,
                    digest: packaged.blob_digest,
                    urls: None,
                    annotations: None,
                });
                Ok(())
            }

            Operation::Manifest { .. } => {
                let image_config = ImageConfig {
                    architecture: operation.platform().map(|p| p.arch.clone()).unwrap_or_else(|| "amd64".to_string()),
                    os: operation.platform().map(|p| p.os.clone()).unwrap_or_else(|| "linux".to_string()),
                    history: output.history.clone(),
                    rootfs: ossb_image::RootFs {
                        fs_type: "layers".to_string(),
                        diff_ids: output.diff_ids_top_down.clone(),
                    },
                    config: output.runtime_config.clone(),
                };
                let config_bytes = image_config.to_bytes().map_err(|e| build_error(&stage.name, format!("failed to serialize image config: {e}")))?;
                let config_digest = image_config.image_id().map_err(|e| build_error(&stage.name, format!("failed to compute image id: {e}")))?;

                let manifest_dir = self.workspace.stage_manifest_dir(&stage.name);
                fs::write(manifest_dir.join("config.json"), &config_bytes).map_err(|e| fs_error(&stage.name, format!("failed to write config.json: {e}")))?;

                let config_descriptor = Descriptor {
                    media_type: MediaType::OCI_CONFIG.to_string(),
                    size: config_bytes.len() as u64,
                    digest: config_digest,
                    urls: None,
                    annotations: None,
                };
                let manifest = ossb_image::assemble_manifest(config_descriptor, output.layers_bottom_up.clone(), false);
                let manifest_bytes = serde_json::to_vec(&manifest).map_err(|e| build_error(&stage.name, format!("failed to serialize manifest: {e}")))?;
                fs::write(manifest_dir.join("manifest.json"), &manifest_bytes).map_err(|e| fs_error(&stage.name, format!("failed to write manifest.json: {e}")))?;
                Ok(())
            }

            Operation::Push { tags, .. } => {
                let manifest_dir = self.workspace.stage_manifest_dir(&stage.name);
                let manifest_bytes = fs::read(manifest_dir.join("manifest.json")).map_err(|e| fs_error(&stage.name, format!("failed to read manifest.json: {e}")))?;
                let manifest: ossb_types::ImageManifest = serde_json::from_slice(&manifest_bytes).map_err(|e| build_error(&stage.name, format!("failed to parse manifest.json: {e}")))?;
                let config_bytes = fs::read(manifest_dir.join("config.json")).map_err(|e| fs_error(&stage.name, format!("failed to read config.json: {e}")))?;

                for tag in tags {
                    self.registry.upload_blob(self.token, tag, &manifest.config.digest, &config_bytes)?;
                    for layer in &manifest.layers {
                        let blob_path = self.workspace.stage_layer_blob(&stage.name, &layer.digest);
                        let bytes = fs::read(&blob_path).map_err(|e| fs_error(&stage.name, format!("failed to read layer blob {}: {e}", blob_path.display())))?;
                        self.registry.upload_blob(self.token, tag, &layer.digest, &bytes)?;
                    }
                    self.registry.put_manifest(self.token, tag, &manifest)?;
                }
                Ok(())
            }
        }
    }

    fn report(&self, stage: &str, progress: f64, operation: &'static str, cache_hit: bool) {
        self.observer.on_progress(ProgressEvent {
            stage: stage.to_string(),
            progress,
            message: format!("{operation} in progress"),
            platform: None,
            operation: Some(operation),
            cache_hit,
        });
    }

    fn report_cache(&self, stage: &str, operation: &'static str, cache_hit: bool, index: usize, count: usize) {
        let progress = if count == 0 { 1.0 } else { (index + 1) as f64 / count as f64 };
        self.observer.on_progress(ProgressEvent {
            stage: stage.to_string(),
            progress,
            message: format!("layer {}/{}", index + 1, count),
            platform: None,
            operation: Some(operation),
            cache_hit,
        });
    }
}

fn action_verb(action: FileAction) -> &'static str {
    match action {
        FileAction::Copy => "COPY",
        FileAction::Add => "ADD",
    }
}

fn build_error(stage: &str, message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Build).severity(Severity::High).stage(stage).build()
}

fn fs_error(stage: &str, message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Filesystem).stage(stage).build()
}
