//! Ties Components B through F behind a single entry point (`spec.md`
//! §4, `SPEC_FULL.md` §A): parse the recipe, validate and plan the stage
//! graph, then — unless `dry_run` — run the scheduler once per target
//! platform and assemble a manifest index across them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ossb_error::{BuildError, CancellationToken, CleanupRegistry, ErrorCategory, ErrorCollector, Severity};
use ossb_exec::{BuildInvocation, ChownRange, ProgressEvent, ProgressObserver, Workspace};
use ossb_registry::{Auth, AuthConfigMap, RegistryClient};
use ossb_secrets::SecretBytes;
use ossb_types::{MultiStageContext, Platform, PlatformManifest};
use sha2::{Digest, Sha256};

use crate::config::BuildInvocationConfig;
use crate::plan::{append_finalization, stamp_platform};
use crate::report::{BuildReport, PlanReport};

fn orchestration_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Build).severity(Severity::High).build()
}

/// Parses and plans a recipe without touching the executor, image
/// producer, or registry client (`SPEC_FULL.md` §C `--dry-run` mode,
/// grounded on the teacher's `run_preflight` dry-run dispatch).
pub fn plan_only(config: &BuildInvocationConfig) -> Result<PlanReport, BuildError> {
    let ctx = parse_and_build_context(config)?;
    let stage_order = ossb_plan::topo_sort(&ctx).map_err(|e| orchestration_error(e.to_string()))?;
    let levels = ossb_plan::group_by_levels(&ctx);
    let unreachable_stages = ossb_plan::unreachable_stages(&ctx);
    let operations_total = ctx.stages.iter().map(|s| s.operations.len()).sum();

    Ok(PlanReport {
        stage_order,
        levels,
        unreachable_stages,
        operations_total,
        warnings: Vec::new(),
    })
}

/// Runs a full build: one `ossb_exec::execute` pass per target platform,
/// then (when more than one platform was built and tags were given) a
/// manifest index upload per tag. Never returns `Err` for a build-phase
/// failure — those are folded into [`BuildReport::error`] via the error
/// collector (`spec.md` §7); `Err` is reserved for failures before any
/// stage has run (a malformed recipe, an invalid configuration record).
pub fn run(config: &BuildInvocationConfig, workspace_root: PathBuf, observer: &dyn ProgressObserver) -> Result<BuildReport, BuildError> {
    if config.dry_run {
        return Err(orchestration_error("dry_run configuration must go through plan_only, not run"));
    }

    let ctx = parse_and_build_context(config)?;
    let tags = config.parsed_tags()?;
    let registry = build_registry_client(config)?;

    let counting = CountingObserver::new(observer);
    let shared_token = CancellationToken::new();
    let chown_range = ChownRange { min: 1, max: 65535 };
    let mut collector = ErrorCollector::new();
    let mut manifest_digests = BTreeMap::new();
    let mut operations_total = 0usize;
    let mut push_index_entries = Vec::new();

    let start = Instant::now();

    for platform in &config.target_platforms {
        let mut platform_ctx = ctx.clone();
        stamp_platform(&mut platform_ctx, platform);
        append_finalization(&mut platform_ctx, &tags);
        operations_total += platform_ctx.stages.iter().map(|s| s.operations.len()).sum::<usize>();

        let platform_workspace = match Workspace::create(workspace_root.join(platform_slug(platform))) {
            Ok(ws) => ws,
            Err(e) => {
                collector.record(e);
                break;
            }
        };

        // Each platform leg gets its own invocation (and thus its own
        // Created→Running→terminal cycle) but shares one cancellation
        // token, so cancelling the overall build stops every in-flight leg.
        let invocation = BuildInvocation::new();
        match run_one_platform(&platform_ctx, &platform_workspace, &registry, &invocation, &shared_token, &counting, chown_range, config.resource_limits.max_concurrent_stages) {
            Ok(Some((digest, size))) => {
                manifest_digests.insert(platform_slug(platform), digest.clone());
                if config.target_platforms.len() > 1 && !tags.is_empty() {
                    push_index_entries.push(PlatformManifest {
                        media_type: ossb_types::MediaType::OCI_MANIFEST.to_string(),
                        size,
                        digest,
                        platform: platform.clone(),
                    });
                }
            }
            Ok(None) => {}
            Err(e) => {
                collector.record(e);
                break;
            }
        }
    }

    if !collector.has_failures() && config.target_platforms.len() > 1 && !tags.is_empty() && !push_index_entries.is_empty() {
        let index = ossb_image::assemble_index(push_index_entries.clone(), false);
        for tag in &tags {
            if let Err(e) = registry.put_index(&shared_token, tag, &index) {
                collector.record(e);
            }
        }
    }

    let error = collector.aggregate();
    let success = error.is_none();

    if !config.resource_limits.keep_workspace {
        let mut cleanup = CleanupRegistry::new();
        let root = workspace_root.clone();
        cleanup.register("workspace-root", 0, move |_token| {
            if root.exists() {
                std::fs::remove_dir_all(&root).map_err(|e| format!("failed to remove {}: {e}", root.display()))?;
            }
            Ok(())
        });
        let _ = cleanup.run(&shared_token);
    }

    Ok(BuildReport {
        success,
        operations_total,
        cache_hits: counting.cache_hits(),
        duration: start.elapsed(),
        error,
        manifest_digests,
    })
}

/// Runs one platform's full stage graph and, if the final stage produced
/// a manifest, returns its `(digest, size)`. `invocation` owns this leg's
/// own `Created → Running → terminal` cycle; `cancel_source` is the
/// caller's single shared token, checked before the leg starts so a
/// cancellation raised while an earlier platform ran stops later ones.
#[allow(clippy::too_many_arguments)]
fn run_one_platform(
    ctx: &MultiStageContext,
    workspace: &Workspace,
    registry: &RegistryClient,
    invocation: &BuildInvocation,
    cancel_source: &CancellationToken,
    observer: &dyn ProgressObserver,
    chown_range: ChownRange,
    max_concurrent: usize,
) -> Result<Option<(String, u64)>, BuildError> {
    if cancel_source.is_cancelled() {
        invocation.cancel(cancel_source.reason().unwrap_or_default());
        return Err(BuildError::builder("build cancelled before this platform started")
            .category(ErrorCategory::Timeout)
            .retryable(false)
            .build());
    }

    invocation.start();
    match ossb_exec::run_build(ctx, workspace, registry, invocation.token(), observer, chown_range, max_concurrent) {
        Ok(outputs) => {
            invocation.finish_succeeded();
            let _ = outputs;
        }
        Err(e) => {
            invocation.finish_failed();
            return Err(e);
        }
    }

    let manifest_path = workspace.stage_manifest_dir(&ctx.final_stage).join("manifest.json");
    match std::fs::read(&manifest_path) {
        Ok(bytes) => {
            let digest = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));
            Ok(Some((digest, bytes.len() as u64)))
        }
        Err(_) => Ok(None),
    }
}

fn parse_and_build_context(config: &BuildInvocationConfig) -> Result<MultiStageContext, BuildError> {
    let text = std::fs::read_to_string(&config.recipe_path).map_err(|e| {
        BuildError::builder(format!("failed to read recipe {}: {e}", config.recipe_path.display()))
            .category(ErrorCategory::Configuration)
            .build()
    })?;
    let parsed = ossb_recipe::parse(&text, &config.build_args)?;
    MultiStageContext::build(parsed.stages).map_err(|e| orchestration_error(e.to_string()))
}

fn build_registry_client(config: &BuildInvocationConfig) -> Result<RegistryClient, BuildError> {
    let mut auth_config: AuthConfigMap = AuthConfigMap::new();
    for (host, value) in &config.registry_config.auth {
        auth_config.insert(host.clone(), parse_auth_entry(value));
    }
    RegistryClient::new(config.registry_config.insecure_registries.clone(), config.strict_mode, auth_config)
}

/// `"bearer:<token>"` or `"<user>:<password>"`; anything else falls back
/// to anonymous rather than guessing at intent.
fn parse_auth_entry(value: &str) -> Auth {
    if let Some(token) = value.strip_prefix("bearer:") {
        return Auth::Bearer { token: SecretBytes::new(token.as_bytes().to_vec()) };
    }
    match value.split_once(':') {
        Some((user, pass)) => Auth::Basic { username: user.to_string(), password: SecretBytes::new(pass.as_bytes().to_vec()) },
        None => Auth::Anonymous,
    }
}

fn platform_slug(platform: &Platform) -> String {
    match &platform.variant {
        Some(variant) => format!("{}-{}-{}", platform.os, platform.arch, variant),
        None => format!("{}-{}", platform.os, platform.arch),
    }
}

/// Wraps the caller's observer to also tally cache hits, for
/// [`BuildReport::cache_hits`] (`spec.md` §6: "a result record
/// `(success, operations_total, cache_hits, duration, error?)`").
struct CountingObserver<'a> {
    inner: &'a dyn ProgressObserver,
    cache_hits: AtomicUsize,
}

impl<'a> CountingObserver<'a> {
    fn new(inner: &'a dyn ProgressObserver) -> Self {
        Self { inner, cache_hits: AtomicUsize::new(0) }
    }

    fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::SeqCst)
    }
}

impl<'a> ProgressObserver for CountingObserver<'a> {
    fn on_progress(&self, event: ProgressEvent) {
        if event.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.on_progress(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegistryConfig, ResourceLimits, SecurityContext};
    use ossb_exec::NullObserver;
    use std::collections::BTreeMap as Map;

    fn write_recipe(dir: &std::path::Path, text: &str) -> PathBuf {
        let path = dir.join("Recipefile");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn base_config(context: PathBuf, recipe_path: PathBuf) -> BuildInvocationConfig {
        BuildInvocationConfig {
            context,
            recipe_path,
            build_args: Map::new(),
            target_platforms: vec![Platform::linux_amd64()],
            tags: Vec::new(),
            registry_config: RegistryConfig::default(),
            security_context: SecurityContext::default(),
            resource_limits: ResourceLimits { keep_workspace: true, ..Default::default() },
            cache_enabled: true,
            strict_mode: false,
            dry_run: false,
        }
    }

    /// Scenario S1: `FROM scratch\nCOPY hello.txt /hello.txt`.
    #[test]
    fn s1_single_stage_scratch_image_produces_one_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();
        let recipe = write_recipe(dir.path(), "FROM scratch\nCOPY hello.txt /hello.txt\n");
        let config = base_config(dir.path().to_path_buf(), recipe);

        let report = run(&config, dir.path().join("workspace"), &NullObserver).unwrap();
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.manifest_digests.len(), 1);
    }

    #[test]
    fn plan_only_reports_topo_order_without_building() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = write_recipe(dir.path(), "FROM scratch\nCOPY hello.txt /hello.txt\n");
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();
        let mut config = base_config(dir.path().to_path_buf(), recipe);
        config.dry_run = true;

        let plan = plan_only(&config).unwrap();
        assert_eq!(plan.stage_order, vec!["stage-0".to_string()]);
        assert!(plan.operations_total > 0);
        assert!(!dir.path().join("workspace").exists());
    }

    /// Scenario S5: dangerous recipes must fail parsing before any
    /// operation is emitted.
    #[test]
    fn s5_dangerous_recipe_rejected_at_parse_time() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = write_recipe(dir.path(), "FROM scratch\nRUN rm -rf /\n");
        let config = base_config(dir.path().to_path_buf(), recipe);

        let err = plan_only(&config).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(err.severity, Severity::Critical);
    }
}
