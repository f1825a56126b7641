use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::build_error::BuildError;
use crate::category::ErrorCategory;

/// Reserved temp-file prefixes the resource recovery strategy is allowed
/// to clean up (`spec.md` §4.A).
pub const RESERVED_TEMP_PREFIXES: &[&str] = &["ossb-", "build-", "layer-", "manifest-"];
const AGED_CUTOFF: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// Recovery succeeded; the message describes what was done, and the
    /// originating error should be demoted to a warning in the collector.
    Recovered(String),
    /// No strategy is registered for this category; the caller should
    /// treat this as a recoverable failure (it carries its own
    /// categorized error rather than panicking).
    NotImplemented(BuildError),
}

/// `recovery.attempt(error)`: dispatches on category, first match handles.
pub fn attempt(error: &BuildError, tmp_dir: &Path) -> RecoveryOutcome {
    match error.category {
        ErrorCategory::Network => {
            std::thread::sleep(Duration::from_millis(500));
            RecoveryOutcome::Recovered("waited for network condition to clear".into())
        }
        ErrorCategory::Resource => match cleanup_aged_temp_files(tmp_dir) {
            Ok(removed) => RecoveryOutcome::Recovered(format!(
                "removed {removed} aged temporary file(s) matching reserved prefixes"
            )),
            Err(e) => RecoveryOutcome::NotImplemented(
                BuildError::builder(format!("resource recovery failed: {e}"))
                    .category(ErrorCategory::Resource)
                    .build(),
            ),
        },
        ErrorCategory::Cache => RecoveryOutcome::Recovered("continue without cache".into()),
        _ => RecoveryOutcome::NotImplemented(
            BuildError::builder(format!(
                "no recovery strategy implemented for category {:?}",
                error.category
            ))
            .category(error.category)
            .build(),
        ),
    }
}

fn cleanup_aged_temp_files(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !RESERVED_TEMP_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let metadata = entry.metadata()?;
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default()
            >= AGED_CUTOFF
        {
            if metadata.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
            removed += 1;
        }
    }
    Ok(removed)
}

/// Graceful-degradation action for a category (`spec.md` §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationAction {
    DisableCache,
    LocalOnlyMode,
    ReduceParallelism,
    None,
}

/// `degradation.attempt(error)`: maps category → action.
pub fn degrade(error: &BuildError) -> DegradationAction {
    match error.category {
        ErrorCategory::Cache => DegradationAction::DisableCache,
        ErrorCategory::Registry => DegradationAction::LocalOnlyMode,
        ErrorCategory::Resource => DegradationAction::ReduceParallelism,
        _ => DegradationAction::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration as StdDuration, SystemTime};

    #[test]
    fn cache_recovery_always_succeeds() {
        let err = BuildError::builder("cache miss").category(ErrorCategory::Cache).build();
        let outcome = attempt(&err, Path::new("/nonexistent"));
        assert!(matches!(outcome, RecoveryOutcome::Recovered(_)));
    }

    #[test]
    fn unknown_category_is_not_implemented() {
        let err = BuildError::builder("weird").category(ErrorCategory::Build).build();
        let outcome = attempt(&err, Path::new("/nonexistent"));
        assert!(matches!(outcome, RecoveryOutcome::NotImplemented(_)));
    }

    #[test]
    fn resource_recovery_removes_aged_reserved_prefix_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let aged = dir.path().join("ossb-stale.tmp");
        fs::write(&aged, b"x").unwrap();
        let old_time = SystemTime::now() - StdDuration::from_secs(25 * 3600);
        let file = fs::File::open(&aged).unwrap();
        file.set_modified(old_time).unwrap();

        let fresh = dir.path().join("ossb-fresh.tmp");
        fs::write(&fresh, b"x").unwrap();

        let unrelated = dir.path().join("not-reserved.tmp");
        fs::write(&unrelated, b"x").unwrap();
        let unrelated_file = fs::File::open(&unrelated).unwrap();
        unrelated_file.set_modified(old_time).unwrap();

        let err = BuildError::builder("disk pressure")
            .category(ErrorCategory::Resource)
            .build();
        let outcome = attempt(&err, dir.path());
        assert!(matches!(outcome, RecoveryOutcome::Recovered(_)));
        assert!(!aged.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn degradation_maps_categories_to_actions() {
        let cache_err = BuildError::builder("x").category(ErrorCategory::Cache).build();
        assert_eq!(degrade(&cache_err), DegradationAction::DisableCache);
        let registry_err = BuildError::builder("x").category(ErrorCategory::Registry).build();
        assert_eq!(degrade(&registry_err), DegradationAction::LocalOnlyMode);
        let resource_err = BuildError::builder("x").category(ErrorCategory::Resource).build();
        assert_eq!(degrade(&resource_err), DegradationAction::ReduceParallelism);
    }
}
