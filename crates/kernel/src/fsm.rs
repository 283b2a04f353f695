//! The Scope lifecycle gate: a deterministic five-event, six-state machine.
//!
//! `Init -> Attached -> Running <-> Suspended -> Disposing -> Disposed`.
//! `Disposed` is absorbing; `Disposing` auto-advances to `Disposed` on the
//! next event or explicit tick. Every transition not named in the table is a
//! no-op that reports no state change.

use std::fmt;

/// The six lifecycle states a Scope's FSM can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// Freshly constructed, not yet mounted.
    Init,
    /// Mounted; ready to accept its first Task.
    Attached,
    /// At least one Task has started.
    Running,
    /// Execution paused; resumes back to `Running`.
    Suspended,
    /// Tearing down; auto-advances to `Disposed`.
    Disposing,
    /// Terminal. No outgoing transitions.
    Disposed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::Attached => "attached",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Disposing => "disposing",
            Self::Disposed => "disposed",
        };
        formatter.write_str(label)
    }
}

/// The five events that can drive the FSM forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEvent {
    /// The Scope has been mounted by its Authority.
    Mounted,
    /// A Task began executing for the first time.
    TaskStarted,
    /// Execution should pause.
    Suspend,
    /// Execution should resume.
    Resume,
    /// Teardown has been requested.
    Dispose,
}

/// Deterministic lifecycle gate for a single Scope.
///
/// `Fsm` has no shared-mutability concerns of its own: Scope wraps one
/// behind a mutex and serializes transitions through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fsm {
    state: ScopeState,
}

impl Fsm {
    /// Construct a new FSM in the `Init` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ScopeState::Init,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ScopeState {
        self.state
    }

    /// `true` while the Scope may execute Tasks (`Attached` or `Running`).
    #[must_use]
    pub const fn can_execute(&self) -> bool {
        matches!(self.state, ScopeState::Attached | ScopeState::Running)
    }

    /// `true` unless the Scope is tearing down or torn down.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        !matches!(self.state, ScopeState::Disposing | ScopeState::Disposed)
    }

    /// Apply `event`, returning `true` iff the state actually changed.
    ///
    /// `Disposing` is special: any further event (including a repeated
    /// `Dispose`) advances it straight to `Disposed`, matching the spec's
    /// "auto -> Disposed on any further event or tick" rule. `Disposed` is
    /// absorbing and never reports a change.
    pub fn transition(&mut self, event: ScopeEvent) -> bool {
        let next = match (self.state, event) {
            (ScopeState::Init, ScopeEvent::Mounted) => Some(ScopeState::Attached),
            (ScopeState::Attached, ScopeEvent::TaskStarted) => Some(ScopeState::Running),
            (ScopeState::Running, ScopeEvent::Suspend) => Some(ScopeState::Suspended),
            (ScopeState::Suspended, ScopeEvent::Resume) => Some(ScopeState::Running),
            (ScopeState::Attached | ScopeState::Running | ScopeState::Suspended, ScopeEvent::Dispose) => {
                Some(ScopeState::Disposing)
            },
            (ScopeState::Disposing, _) => Some(ScopeState::Disposed),
            _ => None,
        };

        match next {
            Some(state) if state != self.state => {
                self.state = state;
                true
            },
            _ => false,
        }
    }
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_mounts_to_attached() {
        let mut fsm = Fsm::new();
        assert!(fsm.transition(ScopeEvent::Mounted));
        assert_eq!(fsm.state(), ScopeState::Attached);
    }

    #[test]
    fn mount_is_a_noop_once_attached() {
        let mut fsm = Fsm::new();
        fsm.transition(ScopeEvent::Mounted);
        assert!(!fsm.transition(ScopeEvent::Mounted));
        assert_eq!(fsm.state(), ScopeState::Attached);
    }

    #[test]
    fn attached_to_running_on_task_started() {
        let mut fsm = Fsm::new();
        fsm.transition(ScopeEvent::Mounted);
        assert!(fsm.transition(ScopeEvent::TaskStarted));
        assert_eq!(fsm.state(), ScopeState::Running);
    }

    #[test]
    fn running_suspended_cycle() {
        let mut fsm = Fsm::new();
        fsm.transition(ScopeEvent::Mounted);
        fsm.transition(ScopeEvent::TaskStarted);

        assert!(fsm.transition(ScopeEvent::Suspend));
        assert_eq!(fsm.state(), ScopeState::Suspended);

        assert!(fsm.transition(ScopeEvent::Resume));
        assert_eq!(fsm.state(), ScopeState::Running);
    }

    #[test]
    fn dispose_from_any_live_state_then_auto_advances() {
        let mut fsm = Fsm::new();
        fsm.transition(ScopeEvent::Mounted);
        assert!(fsm.transition(ScopeEvent::Dispose));
        assert_eq!(fsm.state(), ScopeState::Disposing);

        // Any further event - even a repeated Dispose - advances to Disposed.
        assert!(fsm.transition(ScopeEvent::Dispose));
        assert_eq!(fsm.state(), ScopeState::Disposed);
    }

    #[test]
    fn disposed_is_absorbing() {
        let mut fsm = Fsm::new();
        fsm.transition(ScopeEvent::Mounted);
        fsm.transition(ScopeEvent::Dispose);
        fsm.transition(ScopeEvent::Dispose);
        assert_eq!(fsm.state(), ScopeState::Disposed);

        assert!(!fsm.transition(ScopeEvent::Mounted));
        assert!(!fsm.transition(ScopeEvent::Resume));
        assert_eq!(fsm.state(), ScopeState::Disposed);
    }

    #[test]
    fn unspecified_transitions_are_noops() {
        let mut fsm = Fsm::new();
        assert!(!fsm.transition(ScopeEvent::TaskStarted));
        assert!(!fsm.transition(ScopeEvent::Suspend));
        assert!(!fsm.transition(ScopeEvent::Resume));
        assert_eq!(fsm.state(), ScopeState::Init);
    }

    #[test]
    fn gating_predicates_track_state() {
        let mut fsm = Fsm::new();
        assert!(!fsm.can_execute());
        assert!(fsm.is_alive());

        fsm.transition(ScopeEvent::Mounted);
        assert!(fsm.can_execute());
        assert!(fsm.is_alive());

        fsm.transition(ScopeEvent::Dispose);
        assert!(!fsm.can_execute());
        assert!(!fsm.is_alive());
    }
}
