use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ossb_core::{exit_code_for, write_final_status, BuildInvocationConfig, FinalStatus, EXIT_SUCCESS};
use ossb_exec::NullObserver;
use ossb_types::Platform;

mod progress;

use progress::CliProgress;

#[derive(Parser, Debug)]
#[command(name = "ossb", version)]
#[command(about = "Unprivileged container image builder")]
struct Cli {
    /// Path to a TOML build-invocation configuration file. Fields below
    /// override whatever it sets.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Build context directory.
    #[arg(long, default_value = ".")]
    context: PathBuf,

    /// Path to the recipe file, relative to `context` unless absolute.
    #[arg(long, default_value = "Recipefile")]
    recipe: PathBuf,

    /// `KEY=VALUE` build argument (repeatable).
    #[arg(long = "build-arg")]
    build_args: Vec<String>,

    /// `os/arch` target platform (repeatable). Defaults to `linux/amd64`.
    #[arg(long = "platform")]
    platforms: Vec<String>,

    /// Image reference to tag and push the result as (repeatable).
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Keep the workspace directory after the build concludes.
    #[arg(long)]
    keep_workspace: bool,

    /// Suppress progress bar rendering.
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and plan the recipe without building anything.
    Plan,
    /// Run the full build.
    Build,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.cmd {
        Commands::Plan => {
            config.dry_run = true;
            let report = ossb_core::plan_only(&config).context("planning failed")?;
            print_plan(&report);
            Ok(())
        }
        Commands::Build => {
            let workspace_root = std::env::temp_dir().join(format!("ossb-{}", std::process::id()));
            let observer: Box<dyn ossb_exec::ProgressObserver> =
                if cli.quiet { Box::new(NullObserver) } else { Box::new(CliProgress::new()) };

            let report = ossb_core::run(&config, workspace_root, observer.as_ref()).context("build failed")?;
            print_report(&report);

            let status = FinalStatus {
                success: report.success,
                operations_total: report.operations_total,
                cache_hits: report.cache_hits,
                duration_ms: report.duration.as_millis() as u64,
                exit_code: report.error.as_ref().map(exit_code_for).unwrap_or(EXIT_SUCCESS),
                error: report.error.clone(),
            };
            let _ = write_final_status(std::path::Path::new(ossb_core::FINAL_STATUS_PATH), &status);

            if !report.success {
                std::process::exit(status.exit_code);
            }
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<BuildInvocationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            BuildInvocationConfig::from_toml(&text).map_err(anyhow::Error::msg)?
        }
        None => BuildInvocationConfig {
            context: PathBuf::new(),
            recipe_path: PathBuf::new(),
            build_args: Default::default(),
            target_platforms: vec![Platform::linux_amd64()],
            tags: Vec::new(),
            registry_config: Default::default(),
            security_context: Default::default(),
            resource_limits: Default::default(),
            cache_enabled: true,
            strict_mode: false,
            dry_run: false,
        },
    };

    config.context = cli.context.clone();
    config.recipe_path = cli.recipe.clone();
    config.resource_limits.keep_workspace = cli.keep_workspace || config.resource_limits.keep_workspace;

    for arg in &cli.build_args {
        let (key, value) = arg.split_once('=').with_context(|| format!("--build-arg {arg:?} is not KEY=VALUE"))?;
        config.build_args.insert(key.to_string(), value.to_string());
    }

    if !cli.platforms.is_empty() {
        config.target_platforms = cli.platforms.iter().map(|p| parse_platform(p)).collect::<Result<Vec<_>>>()?;
    }

    if !cli.tags.is_empty() {
        config.tags = cli.tags.clone();
    }

    Ok(config)
}

fn parse_platform(s: &str) -> Result<Platform> {
    let (os, arch) = s.split_once('/').with_context(|| format!("--platform {s:?} is not os/arch"))?;
    Ok(Platform::new(os, arch))
}

fn print_plan(report: &ossb_core::PlanReport) {
    println!("stage order: {}", report.stage_order.join(" -> "));
    for (level_idx, level) in report.levels.iter().enumerate() {
        println!("level {level_idx}: {}", level.join(", "));
    }
    if !report.unreachable_stages.is_empty() {
        println!("unreachable (still built, not retained): {}", report.unreachable_stages.join(", "));
    }
    println!("operations_total: {}", report.operations_total);
    for warning in &report.warnings {
        eprintln!("[warn] {warning}");
    }
}

fn print_report(report: &ossb_core::BuildReport) {
    println!("success: {}", report.success);
    println!("operations_total: {}", report.operations_total);
    println!("cache_hits: {}", report.cache_hits);
    println!("duration: {:?}", report.duration);
    for (platform, digest) in &report.manifest_digests {
        println!("{platform}: {digest}");
    }
    if let Some(error) = &report.error {
        eprintln!("[error] {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_platform_accepts_os_slash_arch() {
        let platform = parse_platform("linux/arm64").unwrap();
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.arch, "arm64");
    }

    #[test]
    fn parse_platform_rejects_missing_slash() {
        assert!(parse_platform("linux-arm64").is_err());
    }
}
