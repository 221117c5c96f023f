//! Load/insert/settle state gate

use log::{debug, warn};

use crate::error::ReaderError;

/// Current phase of the reader
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ReaderState {
    #[default]
    Idle,
    LoadingInitial,
    LoadingPrevious,
    LoadingNext,
    Inserting,
    Settling,
    Ready,
    Error(ReaderError),
}

impl ReaderState {
    pub fn name(&self) -> &'static str {
        match self {
            ReaderState::Idle => "idle",
            ReaderState::LoadingInitial => "loading_initial",
            ReaderState::LoadingPrevious => "loading_previous",
            ReaderState::LoadingNext => "loading_next",
            ReaderState::Inserting => "inserting",
            ReaderState::Settling => "settling",
            ReaderState::Ready => "ready",
            ReaderState::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ReaderError> {
        match self {
            ReaderState::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Whether `from -> to` is on the allow-list
#[must_use]
pub fn is_allowed(from: &ReaderState, to: &ReaderState) -> bool {
    use ReaderState::*;

    matches!(
        (from, to),
        (_, Error(_))
            | (Idle, LoadingInitial)
            | (LoadingInitial, Inserting)
            | (Ready, LoadingPrevious)
            | (Ready, LoadingNext)
            | (LoadingPrevious, Inserting)
            | (LoadingNext, Inserting)
            | (LoadingPrevious, Ready)
            | (LoadingNext, Ready)
            | (Inserting, Settling)
            | (Settling, Ready)
            | (Error(_), LoadingInitial)
            | (Error(_), Idle)
    )
}

type Observer = Box<dyn FnMut(&ReaderState, &ReaderState)>;

/// Finite-state gate over the load protocol.
///
/// Rejected transitions leave the state untouched and are only logged.
#[derive(Default)]
pub struct ReaderStateMachine {
    state: ReaderState,
    observers: Vec<Observer>,
}

impl ReaderStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    /// Register a callback run as `observer(old, new)` after each accepted transition
    pub fn observe(&mut self, observer: impl FnMut(&ReaderState, &ReaderState) + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn transition(&mut self, to: ReaderState) -> bool {
        if !is_allowed(&self.state, &to) {
            warn!(
                "Rejected state transition {} -> {}",
                self.state.name(),
                to.name()
            );
            return false;
        }

        debug!("State {} -> {}", self.state.name(), to.name());
        let old = std::mem::replace(&mut self.state, to);
        for observer in &mut self.observers {
            observer(&old, &self.state);
        }
        true
    }

    /// Like `transition`, but reports a rejection as a `ReaderError`
    pub fn try_transition(&mut self, to: ReaderState) -> Result<(), ReaderError> {
        let from = self.state.name();
        let to_name = to.name();
        if self.transition(to) {
            Ok(())
        } else {
            Err(ReaderError::Transition { from, to: to_name })
        }
    }

    /// Back to `Idle` without consulting the allow-list. Used at session start.
    pub fn reset(&mut self) {
        self.state = ReaderState::Idle;
    }

    /// Leave `Error` for `Ready` while content is still on screen.
    ///
    /// Only valid from `Error`; observers are notified like a transition.
    pub fn recover(&mut self) -> bool {
        if !matches!(self.state, ReaderState::Error(_)) {
            warn!("Cannot recover from {}", self.state.name());
            return false;
        }

        debug!("State error -> ready (recovered)");
        let old = std::mem::replace(&mut self.state, ReaderState::Ready);
        for observer in &mut self.observers {
            observer(&old, &self.state);
        }
        true
    }

    #[must_use]
    pub fn can_start_loading(&self) -> bool {
        matches!(self.state, ReaderState::Ready | ReaderState::Idle)
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(
            self.state,
            ReaderState::LoadingInitial
                | ReaderState::LoadingPrevious
                | ReaderState::LoadingNext
                | ReaderState::Inserting
                | ReaderState::Settling
        )
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ReaderState::Ready
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::types::ChapterId;

    fn all_states() -> Vec<ReaderState> {
        vec![
            ReaderState::Idle,
            ReaderState::LoadingInitial,
            ReaderState::LoadingPrevious,
            ReaderState::LoadingNext,
            ReaderState::Inserting,
            ReaderState::Settling,
            ReaderState::Ready,
            ReaderState::Error(ReaderError::Fetch {
                chapter: ChapterId::new("c1"),
                detail: "timeout".to_string(),
            }),
        ]
    }

    fn machine_in(state: ReaderState) -> ReaderStateMachine {
        ReaderStateMachine {
            state,
            observers: Vec::new(),
        }
    }

    #[test]
    fn initial_then_invalid_next_is_rejected() {
        let mut machine = ReaderStateMachine::new();
        assert_eq!(machine.state(), &ReaderState::Idle);
        assert!(machine.transition(ReaderState::LoadingInitial));
        assert!(!machine.transition(ReaderState::LoadingNext));
        assert_eq!(machine.state(), &ReaderState::LoadingInitial);
    }

    #[test]
    fn every_pair_respects_allow_list() {
        for from in all_states() {
            for to in all_states() {
                let mut machine = machine_in(from.clone());
                let calls = Rc::new(RefCell::new(0));
                let seen = calls.clone();
                machine.observe(move |_, _| *seen.borrow_mut() += 1);

                let accepted = machine.transition(to.clone());
                assert_eq!(accepted, is_allowed(&from, &to), "{from:?} -> {to:?}");
                if accepted {
                    assert_eq!(machine.state(), &to);
                    assert_eq!(*calls.borrow(), 1);
                } else {
                    assert_eq!(machine.state(), &from);
                    assert_eq!(*calls.borrow(), 0);
                }
            }
        }
    }

    #[test]
    fn full_load_cycle() {
        let mut machine = ReaderStateMachine::new();
        let history = Rc::new(RefCell::new(Vec::new()));
        let log = history.clone();
        machine.observe(move |old, new| log.borrow_mut().push((old.name(), new.name())));

        for state in [
            ReaderState::LoadingInitial,
            ReaderState::Inserting,
            ReaderState::Settling,
            ReaderState::Ready,
            ReaderState::LoadingNext,
            ReaderState::Ready,
        ] {
            assert!(machine.transition(state));
        }

        assert_eq!(
            history.borrow().as_slice(),
            [
                ("idle", "loading_initial"),
                ("loading_initial", "inserting"),
                ("inserting", "settling"),
                ("settling", "ready"),
                ("ready", "loading_next"),
                ("loading_next", "ready"),
            ]
        );
    }

    #[test]
    fn loading_flags() {
        let machine = machine_in(ReaderState::Settling);
        assert!(machine.is_loading());
        assert!(!machine.can_start_loading());

        let machine = machine_in(ReaderState::Ready);
        assert!(!machine.is_loading());
        assert!(machine.can_start_loading());

        let machine = machine_in(ReaderState::Idle);
        assert!(machine.can_start_loading());
    }

    #[test]
    fn try_transition_reports_names() {
        let mut machine = machine_in(ReaderState::Settling);
        let err = machine.try_transition(ReaderState::LoadingNext).unwrap_err();
        assert_eq!(
            err,
            ReaderError::Transition {
                from: "settling",
                to: "loading_next"
            }
        );
    }

    #[test]
    fn error_recovery_paths() {
        let mut machine = machine_in(all_states().pop().unwrap());
        assert!(machine.state().error().is_some());
        assert!(!machine.transition(ReaderState::Ready));
        assert!(machine.transition(ReaderState::Idle));
        assert!(!machine.recover());
    }

    #[test]
    fn recover_goes_to_ready() {
        let mut machine = machine_in(all_states().pop().unwrap());
        assert!(machine.recover());
        assert!(machine.is_ready());
    }
}
