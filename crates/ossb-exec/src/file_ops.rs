//! The `File` operation (COPY/ADD, `spec.md` §4.D): glob-expand each
//! source against a base directory, copy into the destination with an
//! atomic temp-then-rename overwrite, and apply `--chown`/`--chmod`
//! subject to the unprivileged ownership model (numeric uid/gid only,
//! validated against a configured range; mode is a literal octal value).

use std::fs;
use std::path::{Path, PathBuf};

use ossb_error::{BuildError, ErrorCategory, Severity};
use ossb_types::FileAction;

/// Inclusive uid/gid range this builder is allowed to chown into, since
/// it never runs as root and cannot hand out ownership it does not hold
/// (`spec.md` §4.D: "within a validated range").
#[derive(Debug, Clone, Copy)]
pub struct ChownRange {
    pub min: u32,
    pub max: u32,
}

impl ChownRange {
    pub fn contains(&self, uid: u32, gid: u32) -> bool {
        (self.min..=self.max).contains(&uid) && (self.min..=self.max).contains(&gid)
    }
}

/// Copies every glob match of `srcs` (resolved against `base`) into `dst`
/// under `rootfs`, honoring `action`'s semantics and the given
/// ownership/mode overrides.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    rootfs: &Path,
    base: &Path,
    action: FileAction,
    srcs: &[String],
    dst: &str,
    chown: Option<(u32, u32)>,
    chmod: Option<u32>,
    chown_range: ChownRange,
) -> Result<Vec<PathBuf>, BuildError> {
    if let Some((uid, gid)) = chown {
        if !chown_range.contains(uid, gid) {
            return Err(BuildError::builder(format!(
                "--chown {uid}:{gid} is outside the permitted range {}-{}",
                chown_range.min, chown_range.max
            ))
            .category(ErrorCategory::Permission)
            .severity(Severity::High)
            .retryable(false)
            .build());
        }
    }

    let matches = expand_sources(base, srcs)?;
    if matches.is_empty() {
        return Err(BuildError::builder(format!("{action_name(action)}: no source matched {srcs:?}"))
            .category(ErrorCategory::Validation)
            .severity(Severity::Critical)
            .build());
    }

    let dst_path = rootfs.join(dst.trim_start_matches('/'));
    let dst_is_dir_hint = dst.ends_with('/') || matches.len() > 1;
    let mut written = Vec::new();

    for src in &matches {
        let target = if dst_is_dir_hint {
            fs::create_dir_all(&dst_path).map_err(|e| fs_error(format!("failed to create {}: {e}", dst_path.display())))?;
            dst_path.join(src.file_name().ok_or_else(|| {
                BuildError::builder(format!("source {} has no file name", src.display()))
                    .category(ErrorCategory::Validation)
                    .build()
            })?)
        } else {
            if let Some(parent) = dst_path.parent() {
                fs::create_dir_all(parent).map_err(|e| fs_error(format!("failed to create {}: {e}", parent.display())))?;
            }
            dst_path.clone()
        };

        copy_atomic(src, &target)?;
        if let Some(mode) = chmod {
            set_mode(&target, mode)?;
        }
        if let Some((uid, gid)) = chown {
            set_owner(&target, uid, gid)?;
        }
        written.push(target);
    }

    Ok(written)
}

fn action_name(action: FileAction) -> &'static str {
    match action {
        FileAction::Copy => "COPY",
        FileAction::Add => "ADD",
    }
}

fn expand_sources(base: &Path, srcs: &[String]) -> Result<Vec<PathBuf>, BuildError> {
    let mut matches = Vec::new();
    for pattern in srcs {
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy().to_string();
        if !has_glob_metachars(pattern) {
            if full_pattern.exists() {
                matches.push(full_pattern);
            }
            continue;
        }
        let paths = glob::glob(&pattern_str).map_err(|e| {
            BuildError::builder(format!("invalid glob pattern {pattern:?}: {e}"))
                .category(ErrorCategory::Validation)
                .build()
        })?;
        for entry in paths {
            let path = entry.map_err(|e| {
                BuildError::builder(format!("glob expansion failed for {pattern:?}: {e}"))
                    .category(ErrorCategory::Filesystem)
                    .build()
            })?;
            matches.push(path);
        }
    }
    Ok(matches)
}

fn has_glob_metachars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Copies into a sibling temp file and renames over the target, so a
/// concurrent reader never observes a partially-written destination.
fn copy_atomic(src: &Path, dst: &Path) -> Result<(), BuildError> {
    let parent = dst.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!(".{}.ossb-tmp", dst.file_name().and_then(|n| n.to_str()).unwrap_or("file")));
    fs::copy(src, &tmp).map_err(|e| fs_error(format!("failed to copy {} to {}: {e}", src.display(), tmp.display())))?;
    fs::rename(&tmp, dst).map_err(|e| fs_error(format!("failed to rename {} to {}: {e}", tmp.display(), dst.display())))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), BuildError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| fs_error(format!("failed to chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), BuildError> {
    Ok(())
}

#[cfg(unix)]
fn set_owner(path: &Path, uid: u32, gid: u32) -> Result<(), BuildError> {
    use std::os::unix::fs::chown;
    chown(path, Some(uid), Some(gid)).map_err(|e| {
        BuildError::builder(format!("failed to chown {} to {uid}:{gid}: {e}", path.display()))
            .category(ErrorCategory::Permission)
            .build()
    })
}

#[cfg(not(unix))]
fn set_owner(_path: &Path, _uid: u32, _gid: u32) -> Result<(), BuildError> {
    Ok(())
}

fn fs_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message).category(ErrorCategory::Filesystem).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> ChownRange {
        ChownRange { min: 1000, max: 65535 }
    }

    #[test]
    fn copies_single_file_to_explicit_destination() {
        let context = tempfile::tempdir().unwrap();
        let rootfs = tempfile::tempdir().unwrap();
        fs::write(context.path().join("a.txt"), b"hi").unwrap();

        let written = apply(
            rootfs.path(),
            context.path(),
            FileAction::Copy,
            &["a.txt".to_string()],
            "/dest.txt",
            None,
            None,
            range(),
        )
        .unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(fs::read(rootfs.path().join("dest.txt")).unwrap(), b"hi");
    }

    #[test]
    fn glob_expands_multiple_sources_into_directory() {
        let context = tempfile::tempdir().unwrap();
        let rootfs = tempfile::tempdir().unwrap();
        fs::write(context.path().join("a.txt"), b"a").unwrap();
        fs::write(context.path().join("b.txt"), b"b").unwrap();

        let written = apply(
            rootfs.path(),
            context.path(),
            FileAction::Copy,
            &["*.txt".to_string()],
            "/dest/",
            None,
            None,
            range(),
        )
        .unwrap();
        assert_eq!(written.len(), 2);
        assert!(rootfs.path().join("dest/a.txt").exists());
        assert!(rootfs.path().join("dest/b.txt").exists());
    }

    #[test]
    fn missing_source_is_a_validation_error() {
        let context = tempfile::tempdir().unwrap();
        let rootfs = tempfile::tempdir().unwrap();
        let err = apply(
            rootfs.path(),
            context.path(),
            FileAction::Copy,
            &["missing.txt".to_string()],
            "/dest.txt",
            None,
            None,
            range(),
        )
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
    }

    #[test]
    fn chown_outside_range_is_rejected() {
        let context = tempfile::tempdir().unwrap();
        let rootfs = tempfile::tempdir().unwrap();
        fs::write(context.path().join("a.txt"), b"hi").unwrap();
        let err = apply(
            rootfs.path(),
            context.path(),
            FileAction::Copy,
            &["a.txt".to_string()],
            "/dest.txt",
            Some((0, 0)),
            None,
            range(),
        )
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Permission);
    }
}
