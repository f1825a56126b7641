//! Progress reporting (`spec.md` §4.D): one event per meaningful step,
//! fanned out to an observer port. The executor does not depend on the
//! observer's own success — a failing or panicking observer never aborts
//! the build it is watching.

use std::collections::HashMap;
use std::sync::Mutex;

use ossb_types::Platform;

/// `(stage, progress∈[0,1], message, platform, operation, cache_hit)`.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: String,
    pub progress: f64,
    pub message: String,
    pub platform: Option<Platform>,
    pub operation: Option<&'static str>,
    pub cache_hit: bool,
}

/// A pure sink: implementations should not be able to fail the build by
/// failing themselves. The trait therefore returns nothing.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Discards every event. Default observer when the caller has no UI.
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Wraps an observer and clamps `progress` to be monotonically
/// non-decreasing per stage (`spec.md` §5: "progress messages monotonic
/// non-decreasing"), so a caller that briefly regresses (e.g. two
/// concurrently-scheduled operations race to report) never surfaces a
/// step backwards to the observer.
pub struct MonotonicObserver<O: ProgressObserver> {
    inner: O,
    last: Mutex<HashMap<String, f64>>,
}

impl<O: ProgressObserver> MonotonicObserver<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            last: Mutex::new(HashMap::new()),
        }
    }
}

impl<O: ProgressObserver> ProgressObserver for MonotonicObserver<O> {
    fn on_progress(&self, mut event: ProgressEvent) {
        let mut last = self.last.lock().unwrap();
        let floor = last.get(&event.stage).copied().unwrap_or(0.0);
        if event.progress < floor {
            event.progress = floor;
        } else {
            last.insert(event.stage.clone(), event.progress);
        }
        drop(last);
        self.inner.on_progress(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recording(StdMutex<Vec<f64>>);

    impl ProgressObserver for Recording {
        fn on_progress(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event.progress);
        }
    }

    fn event(stage: &str, progress: f64) -> ProgressEvent {
        ProgressEvent {
            stage: stage.to_string(),
            progress,
            message: "x".to_string(),
            platform: None,
            operation: None,
            cache_hit: false,
        }
    }

    #[test]
    fn monotonic_observer_clamps_regressions_per_stage() {
        let observer = MonotonicObserver::new(Recording(StdMutex::new(Vec::new())));
        observer.on_progress(event("base", 0.5));
        observer.on_progress(event("base", 0.2));
        observer.on_progress(event("base", 0.8));
        let seen = observer.inner.0.lock().unwrap().clone();
        assert_eq!(seen, vec![0.5, 0.5, 0.8]);
    }

    #[test]
    fn monotonic_observer_tracks_stages_independently() {
        let observer = MonotonicObserver::new(Recording(StdMutex::new(Vec::new())));
        observer.on_progress(event("base", 0.9));
        observer.on_progress(event("builder", 0.1));
        let seen = observer.inner.0.lock().unwrap().clone();
        assert_eq!(seen, vec![0.9, 0.1]);
    }
}
