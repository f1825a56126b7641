use crate::build_error::BuildError;
use crate::category::Severity;

/// Aggregates all errors of a build (`spec.md` §7). A build is reported as
/// failed iff at least one collected error is non-recovered.
#[derive(Default)]
pub struct ErrorCollector {
    errors: Vec<BuildError>,
    warnings: Vec<BuildError>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `error` as a failure. Critical errors should be passed
    /// through [`Self::record_recovered`] instead if a recovery attempt
    /// already succeeded for them.
    pub fn record(&mut self, error: BuildError) {
        self.errors.push(error);
    }

    /// Demotes a critical error to a warning after a successful recovery
    /// attempt (`spec.md` §7: "if recovery succeeds, the error is demoted
    /// to a warning in the collector").
    pub fn record_recovered(&mut self, error: BuildError) {
        self.warnings.push(error);
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn warnings(&self) -> &[BuildError] {
        &self.warnings
    }

    /// On aggregation, a single collected error passes through unchanged;
    /// multiple become a build-category high-severity error whose message
    /// lists each constituent.
    pub fn aggregate(self) -> Option<BuildError> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.into_iter().next(),
            _ => {
                let messages: Vec<String> = self.errors.iter().map(|e| e.message.clone()).collect();
                Some(
                    BuildError::builder(format!(
                        "build failed with {} error(s): {}",
                        messages.len(),
                        messages.join("; ")
                    ))
                    .category(crate::category::ErrorCategory::Build)
                    .severity(Severity::High)
                    .build(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::ErrorCategory;

    #[test]
    fn empty_collector_reports_no_failure() {
        let collector = ErrorCollector::new();
        assert!(!collector.has_failures());
        assert!(collector.aggregate().is_none());
    }

    #[test]
    fn single_error_passes_through_unchanged() {
        let mut collector = ErrorCollector::new();
        let err = BuildError::builder("pull failed").category(ErrorCategory::Registry).build();
        collector.record(err.clone());
        let aggregated = collector.aggregate().unwrap();
        assert_eq!(aggregated.message, err.message);
    }

    #[test]
    fn multiple_errors_aggregate_into_build_category() {
        let mut collector = ErrorCollector::new();
        collector.record(BuildError::builder("first").category(ErrorCategory::Registry).build());
        collector.record(BuildError::builder("second").category(ErrorCategory::Auth).build());
        let aggregated = collector.aggregate().unwrap();
        assert_eq!(aggregated.category, ErrorCategory::Build);
        assert!(aggregated.message.contains("first"));
        assert!(aggregated.message.contains("second"));
    }

    #[test]
    fn recovered_errors_do_not_count_as_failures() {
        let mut collector = ErrorCollector::new();
        collector.record_recovered(BuildError::builder("cache miss").category(ErrorCategory::Cache).build());
        assert!(!collector.has_failures());
        assert_eq!(collector.warnings().len(), 1);
    }
}
