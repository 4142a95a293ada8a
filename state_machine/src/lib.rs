// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! The legal states a Task may occupy, and the only transitions between them.
//!
//! This mirrors the shape of `graph::entry::EntryState` in spirit (a small, closed enum guarded
//! by explicit transition methods rather than free-form mutation) but the transition table here
//! is exactly the one in this runtime's lifecycle contract: `pending -> running ->
//! {completing|erroring|halting} -> {completed|errored|halted}`, with `halt` reachable from
//! `running`, `completing` and `erroring`, and `reject` additionally reachable from `completing`
//! (a `blockParent` child erroring out from under an already-resolved parent still has somewhere
//! to go).

use std::fmt;

/// One of the states a Task may be in. `Completing`, `Erroring` and `Halting` are "finishing"
/// substates: the task has stopped accepting new instructions and is draining its children.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskState {
    Pending,
    Running,
    Completing,
    Erroring,
    Halting,
    Completed,
    Errored,
    Halted,
}

impl TaskState {
    /// A finishing substate has stopped accepting new instructions and is draining children, but
    /// has not yet reached its terminal state.
    pub fn is_finishing(self) -> bool {
        matches!(
            self,
            TaskState::Completing | TaskState::Erroring | TaskState::Halting
        )
    }

    /// A terminal state will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Errored | TaskState::Halted
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completing => "completing",
            TaskState::Erroring => "erroring",
            TaskState::Halting => "halting",
            TaskState::Completed => "completed",
            TaskState::Errored => "errored",
            TaskState::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// The event that drives a transition. Named after the §4.2 table's "Trigger" column.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Trigger {
    Start,
    Resolve,
    Reject,
    Halt,
    ChildrenDone,
}

/// A transition attempted from a state that does not accept the given trigger. Surfaces to
/// callers as a `ProgrammerError` (§7): calling `halt` twice is fine (idempotent), but e.g.
/// resolving a `Pending` task is a bug in the caller, not in this crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IllegalTransition {
    pub from: TaskState,
    pub trigger: Trigger,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal transition: {:?} is not accepted from state {}",
            self.trigger, self.from
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks one Task's current state and enforces the transition table.
#[derive(Debug)]
pub struct StateMachine {
    state: TaskState,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Attempt `trigger` from the current state. On success, mutates the state and returns it;
    /// on failure, the state machine is left unchanged and the caller observes a programmer
    /// error. `halt` is special-cased to be idempotent: issuing it again once a task is already
    /// `halting` or has already reached a terminal state is a no-op that returns the current
    /// state rather than an error (§5, §8 property 4).
    pub fn transition(&mut self, trigger: Trigger) -> Result<TaskState, IllegalTransition> {
        use TaskState::*;
        use Trigger::*;

        if trigger == Halt && (self.state == Halting || self.state.is_terminal()) {
            log::trace!(
                "halt() on a task already in {} is a no-op",
                self.state
            );
            return Ok(self.state);
        }

        let next = match (self.state, trigger) {
            (Pending, Start) => Running,
            (Running, Resolve) => Completing,
            (Running, Reject) => Erroring,
            // A `blockParent` child can still error while its parent is merely waiting out that
            // same child in `Completing` (§4.3): the parent has nothing left to resolve with but
            // has not yet reached its terminal state, so the child's error still takes it to
            // `erroring` rather than being stranded with nowhere to go.
            (Completing, Reject) => Erroring,
            // A task may be halted before it ever starts: there is nothing running yet to
            // interrupt, but the halt cascade over any already-spawned children still applies.
            (Pending, Halt) => Halting,
            (Running, Halt) => Halting,
            (Completing, Halt) => Halting,
            (Erroring, Halt) => Halting,
            (Completing, ChildrenDone) => Completed,
            (Erroring, ChildrenDone) => Errored,
            (Halting, ChildrenDone) => Halted,
            (from, trigger) => return Err(IllegalTransition { from, trigger }),
        };

        log::trace!("task state {} -> {} ({:?})", self.state, next, trigger);
        self.state = next;
        Ok(next)
    }
}
