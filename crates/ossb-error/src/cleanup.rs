use crate::build_error::BuildError;
use crate::cancellation::CancellationToken;
use crate::category::{ErrorCategory, Severity};

type Action = Box<dyn Fn(&CancellationToken) -> Result<(), String> + Send>;

struct Entry {
    priority: i32,
    name: String,
    action: Action,
}

/// Actions are ordered by integer priority (higher first). Each action
/// receives the cancellable context and is obliged to check cancellation
/// between unit actions (`spec.md` §4.A).
#[derive(Default)]
pub struct CleanupRegistry {
    entries: Vec<Entry>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        action: impl Fn(&CancellationToken) -> Result<(), String> + Send + 'static,
    ) {
        self.entries.push(Entry {
            priority,
            name: name.into(),
            action: Box::new(action),
        });
    }

    /// `cleanup.run(context)`: executes all registered actions in priority
    /// order (higher first). Action errors are collected; returns a single
    /// aggregated filesystem-category medium-severity error if any failed.
    pub fn run(&self, token: &CancellationToken) -> Result<(), BuildError> {
        let mut ordered: Vec<&Entry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut failures = Vec::new();
        for entry in ordered {
            if let Err(e) = (entry.action)(token) {
                failures.push(format!("{}: {e}", entry.name));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BuildError::builder(format!(
                "cleanup failed for {} action(s): {}",
                failures.len(),
                failures.join("; ")
            ))
            .category(ErrorCategory::Filesystem)
            .severity(Severity::Medium)
            .build())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_in_priority_order_highest_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut registry = CleanupRegistry::new();

        let order_a = order.clone();
        registry.register("low", 1, move |_| {
            order_a.lock().unwrap().push("low");
            Ok(())
        });
        let order_b = order.clone();
        registry.register("high", 10, move |_| {
            order_b.lock().unwrap().push("high");
            Ok(())
        });

        let token = CancellationToken::new();
        registry.run(&token).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[test]
    fn aggregates_failures_into_single_error() {
        let mut registry = CleanupRegistry::new();
        registry.register("a", 1, |_| Err("disk busy".to_string()));
        registry.register("b", 2, |_| Err("pid missing".to_string()));

        let token = CancellationToken::new();
        let err = registry.run(&token).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Filesystem);
        assert!(err.message.contains("disk busy"));
        assert!(err.message.contains("pid missing"));
    }

    #[test]
    fn count_mismatch_detects_partial_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = CleanupRegistry::new();
        let c = counter.clone();
        registry.register("ok", 1, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let token = CancellationToken::new();
        assert!(registry.run(&token).is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
