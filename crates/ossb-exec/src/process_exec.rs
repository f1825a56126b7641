//! The `Exec` operation: run a command inside a stage rootfs (`spec.md`
//! §4.D). Grounded on `shipper-process`'s command-invocation shape (spawn,
//! poll `try_wait` on an interval, capture stdout/stderr, report exit
//! code and duration) generalized to run under a working directory
//! rooted at the stage's filesystem view rather than the host's, and to
//! refuse uid 0 outright rather than never considering it.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use ossb_error::{BuildError, CancellationToken, ErrorCategory, Severity};
use ossb_image::{diff, snapshot};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const OUTPUT_SUMMARY_LIMIT: usize = 4096;

/// Standard `PATH` directories searched inside the rootfs for a bare
/// command name. There is no chroot here — the child runs with the
/// host's own resolver — so a bare `argv[0]` would otherwise resolve
/// against the *host's* PATH rather than the image being built.
const ROOTFS_PATH_DIRS: &[&str] = &["usr/local/sbin", "usr/local/bin", "usr/sbin", "usr/bin", "sbin", "bin"];

/// Resolves `program` to an absolute path inside `rootfs`: used as-is if
/// already absolute/relative-with-separators, otherwise searched across
/// [`ROOTFS_PATH_DIRS`] via `which::which_in`, falling back to the bare
/// name (and letting `Command::spawn` report the not-found error) if no
/// match exists.
fn resolve_program(rootfs: &Path, program: &str) -> PathBuf {
    if program.contains('/') {
        return rootfs.join(program.trim_start_matches('/'));
    }
    let search_path = ROOTFS_PATH_DIRS.iter().map(|dir| rootfs.join(dir)).collect::<Vec<_>>();
    let joined = std::env::join_paths(&search_path).unwrap_or_default();
    which::which_in(program, Some(joined), rootfs).unwrap_or_else(|_| PathBuf::from(program))
}

/// The result of running one `Exec` operation.
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout_summary: String,
    pub stderr_summary: String,
    pub duration: Duration,
    /// Paths (relative to the rootfs) added, modified or deleted by the
    /// command, derived from a before/after filesystem snapshot.
    pub mutated_paths: BTreeSet<PathBuf>,
}

/// Resolves a `user` operand (numeric uid, or `"uid:gid"`) to a uid.
/// `spec.md` §4.D: "never runs as uid 0" — a request for uid 0, whether
/// explicit or the default when no user is given, is a permission-category
/// error raised before the command is ever spawned.
fn resolve_uid(user: Option<&str>) -> Result<u32, BuildError> {
    let spec = user.unwrap_or("0");
    let uid_part = spec.split(':').next().unwrap_or(spec);
    let uid: u32 = uid_part.parse().map_err(|_| {
        BuildError::builder(format!("unsupported non-numeric user {spec:?}: only numeric uid[:gid] is supported"))
            .category(ErrorCategory::Configuration)
            .severity(Severity::Critical)
            .build()
    })?;
    if uid == 0 {
        return Err(BuildError::builder("refusing to run exec operation as uid 0")
            .category(ErrorCategory::Permission)
            .severity(Severity::High)
            .retryable(false)
            .suggestion("set a non-root USER before RUN, or pass --chown/user explicitly")
            .build());
    }
    Ok(uid)
}

/// Runs `argv` inside `rootfs`, honoring `cwd` (relative to the rootfs),
/// `user` (numeric uid, never 0) and `env` bindings. Cancellation kills
/// the child and returns a timeout-category error.
pub fn run(
    rootfs: &Path,
    argv: &[String],
    cwd: Option<&str>,
    user: Option<&str>,
    env: &[(String, String)],
    token: &CancellationToken,
) -> Result<ExecOutcome, BuildError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(BuildError::builder("exec operation has an empty argv")
            .category(ErrorCategory::Configuration)
            .severity(Severity::Critical)
            .build());
    };
    let uid = resolve_uid(user)?;

    let working_dir = match cwd {
        Some(rel) => rootfs.join(rel.trim_start_matches('/')),
        None => rootfs.to_path_buf(),
    };
    std::fs::create_dir_all(&working_dir).map_err(|e| {
        BuildError::builder(format!("failed to prepare working directory {}: {e}", working_dir.display()))
            .category(ErrorCategory::Filesystem)
            .build()
    })?;

    let pre = snapshot(rootfs).map_err(|e| fs_error(format!("failed to snapshot rootfs before exec: {e}")))?;

    let resolved_program = resolve_program(rootfs, program);
    let mut command = Command::new(&resolved_program);
    command.args(args).current_dir(&working_dir).stdout(Stdio::piped()).stderr(Stdio::piped());
    for (key, value) in env {
        command.env(key, value);
    }
    set_uid(&mut command, uid);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| {
        BuildError::builder(format!("failed to spawn {program}: {e}"))
            .category(ErrorCategory::Executor)
            .build()
    })?;

    let exit_status = wait_with_cancellation(&mut child, token)?;
    let duration = start.elapsed();

    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    let post = snapshot(rootfs).map_err(|e| fs_error(format!("failed to snapshot rootfs after exec: {e}")))?;
    let changes = diff(&pre, &post);
    let mutated_paths: BTreeSet<PathBuf> = changes
        .added
        .into_iter()
        .chain(changes.modified)
        .chain(changes.deleted)
        .collect();

    Ok(ExecOutcome {
        exit_code: exit_status.code().unwrap_or(-1),
        stdout_summary: truncate(&stdout),
        stderr_summary: truncate(&stderr),
        duration,
        mutated_paths,
    })
}

/// Polls `try_wait` rather than blocking on `wait`, so a cancelled token
/// can kill the child instead of waiting out its natural lifetime.
fn wait_with_cancellation(child: &mut Child, token: &CancellationToken) -> Result<std::process::ExitStatus, BuildError> {
    loop {
        if let Some(status) = child.try_wait().map_err(|e| {
            BuildError::builder(format!("failed to poll child process: {e}"))
                .category(ErrorCategory::Executor)
                .build()
        })? {
            return Ok(status);
        }
        if token.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BuildError::builder("exec operation cancelled")
                .category(ErrorCategory::Timeout)
                .operation("exec")
                .cause(token.reason().unwrap_or_default())
                .retryable(false)
                .build());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_SUMMARY_LIMIT {
        s.to_string()
    } else {
        let mut cut = OUTPUT_SUMMARY_LIMIT;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... (truncated)", &s[..cut])
    }
}

fn fs_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Filesystem).build()
}

#[cfg(unix)]
fn set_uid(command: &mut Command, uid: u32) {
    use std::os::unix::process::CommandExt;
    command.uid(uid);
}

#[cfg(not(unix))]
fn set_uid(_command: &mut Command, _uid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uid_rejects_zero() {
        let err = resolve_uid(Some("0")).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Permission);
    }

    #[test]
    fn resolve_uid_rejects_absent_user_defaulting_to_root() {
        let err = resolve_uid(None).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Permission);
    }

    #[test]
    fn resolve_uid_accepts_numeric_non_root() {
        assert_eq!(resolve_uid(Some("1000")).unwrap(), 1000);
        assert_eq!(resolve_uid(Some("1000:1000")).unwrap(), 1000);
    }

    #[test]
    fn truncate_leaves_short_output_untouched() {
        assert_eq!(truncate("hello"), "hello");
    }

    #[test]
    fn truncate_caps_long_output() {
        let long = "a".repeat(OUTPUT_SUMMARY_LIMIT + 100);
        let out = truncate(&long);
        assert!(out.ends_with("... (truncated)"));
        assert!(out.len() < long.len());
    }

    #[test]
    fn resolve_program_finds_binary_under_rootfs_bin() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("usr/bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let binary = bin_dir.join("mytool");
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        assert_eq!(resolve_program(dir.path(), "mytool"), binary);
    }

    #[test]
    fn resolve_program_treats_path_with_separator_as_rootfs_relative() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_program(dir.path(), "/bin/sh"), dir.path().join("bin/sh"));
    }
}
