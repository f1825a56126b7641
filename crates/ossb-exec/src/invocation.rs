//! Build-invocation state machine (`spec.md` §4.D): `Created → Running →
//! {Succeeded, Failed, Cancelled}`. The three end states are terminal and
//! absorbing — once reached, further transition attempts are no-ops.

use std::sync::Mutex;

use ossb_error::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Created,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Succeeded | BuildState::Failed | BuildState::Cancelled)
    }
}

/// Owns the single per-build [`CancellationToken`] and the state machine
/// built around it. Cancellation always wins: calling [`Self::cancel`]
/// moves the state to `Cancelled` regardless of what it was, short of
/// already being terminal.
pub struct BuildInvocation {
    state: Mutex<BuildState>,
    token: CancellationToken,
}

impl Default for BuildInvocation {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildInvocation {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BuildState::Created),
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> BuildState {
        *self.state.lock().unwrap()
    }

    /// `Created → Running`. No-op if already running or terminal.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == BuildState::Created {
            *state = BuildState::Running;
        }
    }

    /// `Running → Succeeded`. No-op once terminal.
    pub fn finish_succeeded(&self) {
        self.transition_to(BuildState::Succeeded);
    }

    /// `Running → Failed`. No-op once terminal.
    pub fn finish_failed(&self) {
        self.transition_to(BuildState::Failed);
    }

    /// Cancels the shared token and moves to `Cancelled`, from any
    /// non-terminal state.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
        self.transition_to(BuildState::Cancelled);
    }

    fn transition_to(&self, next: BuildState) {
        let mut state = self.state.lock().unwrap();
        if !state.is_terminal() {
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let inv = BuildInvocation::new();
        assert_eq!(inv.state(), BuildState::Created);
        inv.start();
        assert_eq!(inv.state(), BuildState::Running);
        inv.finish_succeeded();
        assert_eq!(inv.state(), BuildState::Succeeded);
    }

    #[test]
    fn terminal_states_absorb_further_transitions() {
        let inv = BuildInvocation::new();
        inv.start();
        inv.finish_failed();
        assert_eq!(inv.state(), BuildState::Failed);
        inv.finish_succeeded();
        assert_eq!(inv.state(), BuildState::Failed);
        inv.cancel("too late");
        assert_eq!(inv.state(), BuildState::Failed);
    }

    #[test]
    fn cancel_wins_over_running_and_propagates_to_token() {
        let inv = BuildInvocation::new();
        inv.start();
        inv.cancel("operator requested shutdown");
        assert_eq!(inv.state(), BuildState::Cancelled);
        assert!(inv.token().is_cancelled());
    }
}
