// Job lifecycle transitions as a statig state machine.
//
// Pure transition logic only. Side effects (markers, polling, notices) are
// driven by `JobStateMachine` after comparing the state before and after an
// event.

use serde::{Deserialize, Serialize};
use statig::prelude::*;

use super::types::{JobKind, LifecycleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Start accepted by the concurrency guard
    Start,
    /// Fresh marker found at mount time
    Resume,
    /// Non-terminal snapshot received
    Progress,
    Complete,
    Fail,
    /// Backend reported `not_found` or `idle`
    Lost,
    /// Start acknowledged as skipped / nothing to do
    Skip,
    /// Display hold expired, or cleanup on stop/unmount
    Reset,
}

#[derive(Debug, Default)]
pub struct Lifecycle;

#[state_machine(initial = "State::idle()")]
impl Lifecycle {
    #[state]
    fn idle(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Start => Transition(State::initializing()),
            LifecycleEvent::Resume => Transition(State::in_progress()),
            _ => Handled,
        }
    }

    #[state]
    fn initializing(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Progress => Transition(State::in_progress()),
            LifecycleEvent::Complete => Transition(State::completed()),
            LifecycleEvent::Fail => Transition(State::failed()),
            LifecycleEvent::Lost => Transition(State::not_found()),
            LifecycleEvent::Skip | LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }

    #[state]
    fn in_progress(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Complete => Transition(State::completed()),
            LifecycleEvent::Fail => Transition(State::failed()),
            LifecycleEvent::Lost => Transition(State::not_found()),
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }

    #[state]
    fn completed(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }

    #[state]
    fn failed(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }

    #[state]
    fn not_found(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }
}

/// Wrapper exposing the statig machine through `LifecycleState`
pub struct LifecycleMachine {
    kind: JobKind,
    machine: StateMachine<Lifecycle>,
}

impl LifecycleMachine {
    pub fn new(kind: JobKind) -> Self {
        let machine = Lifecycle.state_machine();
        Self { kind, machine }
    }

    pub fn current(&self) -> LifecycleState {
        match self.machine.state() {
            State::Idle { .. } => LifecycleState::Idle,
            State::Initializing { .. } => LifecycleState::Initializing,
            State::InProgress { .. } => LifecycleState::InProgress,
            State::Completed { .. } => LifecycleState::Completed,
            State::Failed { .. } => LifecycleState::Failed,
            State::NotFound { .. } => LifecycleState::NotFound,
        }
    }

    /// Feeds one event and returns the resulting state
    pub fn handle(&mut self, event: LifecycleEvent) -> LifecycleState {
        let before = self.current();
        self.machine.handle(&event);
        let after = self.current();
        if before != after {
            tracing::debug!(
                kind = %self.kind,
                from = %before,
                to = %after,
                event = ?event,
                "Lifecycle transition"
            );
        }
        after
    }
}

impl std::fmt::Debug for LifecycleMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleMachine")
            .field("kind", &self.kind)
            .field("state", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> LifecycleMachine {
        LifecycleMachine::new(JobKind::WorkOrderScrape)
    }

    #[test]
    fn test_happy_path() {
        let mut sm = machine();
        assert_eq!(sm.current(), LifecycleState::Idle);
        assert_eq!(sm.handle(LifecycleEvent::Start), LifecycleState::Initializing);
        assert_eq!(sm.handle(LifecycleEvent::Progress), LifecycleState::InProgress);
        assert_eq!(sm.handle(LifecycleEvent::Progress), LifecycleState::InProgress);
        assert_eq!(sm.handle(LifecycleEvent::Complete), LifecycleState::Completed);
        assert_eq!(sm.handle(LifecycleEvent::Reset), LifecycleState::Idle);
    }

    #[test]
    fn test_terminal_states_ignore_late_snapshots() {
        let mut sm = machine();
        sm.handle(LifecycleEvent::Resume);
        sm.handle(LifecycleEvent::Fail);
        assert_eq!(sm.handle(LifecycleEvent::Progress), LifecycleState::Failed);
        assert_eq!(sm.handle(LifecycleEvent::Complete), LifecycleState::Failed);
        assert_eq!(sm.handle(LifecycleEvent::Start), LifecycleState::Failed);
    }

    #[test]
    fn test_resume_skips_initializing() {
        let mut sm = machine();
        assert_eq!(sm.handle(LifecycleEvent::Resume), LifecycleState::InProgress);
    }

    #[test]
    fn test_session_loss_then_reset() {
        let mut sm = machine();
        sm.handle(LifecycleEvent::Resume);
        assert_eq!(sm.handle(LifecycleEvent::Lost), LifecycleState::NotFound);
        assert_eq!(sm.handle(LifecycleEvent::Reset), LifecycleState::Idle);
    }

    #[test]
    fn test_start_failure_never_reaches_in_progress() {
        let mut sm = machine();
        sm.handle(LifecycleEvent::Start);
        assert_eq!(sm.handle(LifecycleEvent::Fail), LifecycleState::Failed);
    }

    #[test]
    fn test_skipped_start_returns_to_idle() {
        let mut sm = machine();
        sm.handle(LifecycleEvent::Start);
        assert_eq!(sm.handle(LifecycleEvent::Skip), LifecycleState::Idle);
    }

    #[test]
    fn test_idle_ignores_terminal_events() {
        let mut sm = machine();
        for event in [LifecycleEvent::Progress, LifecycleEvent::Complete, LifecycleEvent::Fail, LifecycleEvent::Lost] {
            assert_eq!(sm.handle(event), LifecycleState::Idle);
        }
    }
}
