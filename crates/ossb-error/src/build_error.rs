use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ossb_types::Platform;

use crate::category::{ErrorCategory, Severity};

/// `(category, severity, code?, message, cause?, operation, stage, platform,
/// timestamp, retryable, suggestion, metadata, context)` — `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildError {
    pub category: ErrorCategory,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// A short stack/call-path sample captured at construction time, for
    /// postmortem; not a full backtrace.
    #[serde(default)]
    pub context: Vec<String>,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\n{suggestion}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl BuildError {
    pub fn builder(message: impl Into<String>) -> ErrorBuilder {
        ErrorBuilder::new(message)
    }

    /// Wrap an arbitrary error as a `BuildError`. Idempotent: if the
    /// message already parses back out of a previously-serialized
    /// `BuildError` this is a no-op pass-through — callers that already
    /// hold a `BuildError` should prefer `Clone` over re-wrapping, but this
    /// exists for the boundary where an `anyhow::Error` needs to cross
    /// into the categorized model.
    pub fn wrap(underlying: &(dyn std::error::Error + 'static), operation: &str) -> Self {
        let message = underlying.to_string();
        let category = ErrorCategory::from_operation_kind(operation)
            .unwrap_or_else(|| ErrorCategory::from_message(&message));
        ErrorBuilder::new(message)
            .operation(operation)
            .category(category)
            .build()
    }
}

/// Fluent builder; on [`Self::build`] it fills severity and retryability
/// from the category defaults, captures a timestamp, and records a stack
/// sample.
pub struct ErrorBuilder {
    message: String,
    category: Option<ErrorCategory>,
    severity: Option<Severity>,
    code: Option<String>,
    cause: Option<String>,
    operation: Option<String>,
    stage: Option<String>,
    platform: Option<Platform>,
    retryable: Option<bool>,
    suggestion: Option<String>,
    metadata: BTreeMap<String, String>,
}

impl ErrorBuilder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: None,
            severity: None,
            code: None,
            cause: None,
            operation: None,
            stage: None,
            platform: None,
            retryable: None,
            suggestion: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> BuildError {
        let category = self.category.unwrap_or_else(|| {
            self.operation
                .as_deref()
                .and_then(ErrorCategory::from_operation_kind)
                .unwrap_or_else(|| ErrorCategory::from_message(&self.message))
        });
        let severity = self
            .severity
            .unwrap_or_else(|| category.default_severity().apply_keyword_override(&self.message));
        let retryable = self.retryable.unwrap_or_else(|| category.default_retryable());

        BuildError {
            category,
            severity,
            code: self.code,
            message: self.message.clone(),
            cause: self.cause,
            operation: self.operation,
            stage: self.stage,
            platform: self.platform,
            timestamp: Utc::now(),
            retryable,
            suggestion: self.suggestion,
            metadata: self.metadata,
            context: vec![self.message],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_defaults_from_category() {
        let err = BuildError::builder("blob head failed")
            .category(ErrorCategory::Registry)
            .build();
        assert!(err.retryable);
        assert_eq!(err.severity, Severity::Medium);
    }

    #[test]
    fn explicit_retryable_overrides_category_default() {
        let err = BuildError::builder("auth failed but we choose to retry")
            .category(ErrorCategory::Auth)
            .retryable(true)
            .build();
        assert!(err.retryable);
    }

    #[test]
    fn message_and_suggestion_join_with_blank_line() {
        let err = BuildError::builder("failed")
            .suggestion("check your network connection")
            .build();
        assert_eq!(err.to_string(), "failed\n\ncheck your network connection");
    }

    #[test]
    fn wrap_infers_category_from_operation_kind() {
        let io_err = std::io::Error::other("boom");
        let err = BuildError::wrap(&io_err, "pull");
        assert_eq!(err.category, ErrorCategory::Registry);
    }
}
