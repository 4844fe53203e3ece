//! Per-exception dispatch state.

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::{
    dispatch::{allocator::TrackerHandle, clause::MethodId, stack::{StackFrame, StackRange}},
    runtime::object::{ContextId, ObjectHandle, ObjectRef},
    thread::ThreadId,
    Error, Result,
};

/// Lifecycle of an [`ExceptionTracker`].
///
/// ```text
/// Created -> FirstPass -> HandlerChosen -> SecondPass -> Completed
///    \            \______________________/
///     \__________________/
/// any non-terminal state -> Merged
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum TrackerState {
    /// Allocated, no frame processed yet
    Created,
    /// Searching for a handler
    FirstPass,
    /// A handler was chosen; waiting for the unwind
    HandlerChosen,
    /// Unwinding towards the chosen handler
    SecondPass,
    /// Control resumed in the handler
    Completed,
    /// Collapsed into an enclosing tracker by a nested exception escape
    Merged,
}

impl TrackerState {
    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackerState::Completed | TrackerState::Merged)
    }

    /// Returns `true` if a tracker may move from `self` to `to`.
    ///
    /// Staying in the same non-terminal state is always allowed.
    #[must_use]
    pub fn can_transition_to(self, to: TrackerState) -> bool {
        use TrackerState::{Completed, Created, FirstPass, HandlerChosen, Merged, SecondPass};

        if self.is_terminal() {
            return false;
        }
        if self == to || to == Merged {
            return true;
        }

        matches!(
            (self, to),
            (Created, FirstPass)
                | (Created, SecondPass)
                | (FirstPass, HandlerChosen)
                | (FirstPass, SecondPass)
                | (HandlerChosen, SecondPass)
                | (SecondPass, Completed)
        )
    }
}

bitflags! {
    /// Boolean state of a tracker.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TrackerFlags: u32 {
        /// The first-chance notification was delivered
        const FIRST_CHANCE_NOTIFIED = 0x0001;
        /// The exception was raised by the runtime rather than by managed code
        const THROWN_BY_RUNTIME = 0x0002;
        /// Unwinding finished but control has not reached the handler yet
        const INCONSISTENT_STATE = 0x0004;
        /// A debugger chose the frame the exception is caught in
        const DEBUGGER_INTERCEPT = 0x0008;
        /// The second pass has started
        const UNWIND_HAS_STARTED = 0x0010;
        /// The exception is being rethrown from a catch handler
        const RETHROWN = 0x0020;
    }
}

/// Whether an exception may have left the process in a corrupted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum CorruptionSeverity {
    /// Not classified yet
    #[default]
    NotSet,
    /// An ordinary exception
    NotCorrupting,
    /// A fault that may have corrupted process state
    ProcessCorrupting,
}

impl CorruptionSeverity {
    /// Returns `true` for [`CorruptionSeverity::ProcessCorrupting`].
    #[must_use]
    pub fn is_corrupting(self) -> bool {
        self == CorruptionSeverity::ProcessCorrupting
    }
}

/// The handler the first pass chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChosenHandler {
    /// Index of the chosen clause; `None` when a debugger intercepts at a frame
    pub clause_index: Option<usize>,
    /// Method containing the handler
    pub method: MethodId,
    /// Frame of the method containing the handler
    pub establishing_frame: StackFrame,
    /// Frame of that method's caller
    pub caller_frame: StackFrame,
    /// Offset where execution resumes after the handler
    pub resume_offset: u32,
}

/// The throwable a tracker dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrackerThrowable {
    pub(crate) object: ObjectRef,
    pub(crate) handle: Option<ObjectHandle>,
    pub(crate) shared: bool,
}

/// Dispatch state of one exception on one thread.
///
/// Trackers live in the [`TrackerAllocator`](crate::dispatch::TrackerAllocator) and form a
/// chain per thread, newest first, linked through [`ExceptionTracker::prev`].
#[derive(Debug, Clone)]
pub struct ExceptionTracker {
    pub(crate) record_id: u64,
    pub(crate) code: u32,
    pub(crate) owner: ThreadId,
    pub(crate) context: ContextId,
    pub(crate) state: TrackerState,
    pub(crate) range: StackRange,
    pub(crate) first_pass_topmost: Option<StackFrame>,
    pub(crate) throwable: Option<TrackerThrowable>,
    pub(crate) chosen: Option<ChosenHandler>,
    pub(crate) resume_frame: Option<StackFrame>,
    pub(crate) catcher: Option<MethodId>,
    pub(crate) severity: CorruptionSeverity,
    pub(crate) prev: Option<TrackerHandle>,
    pub(crate) intercept_frame: Option<StackFrame>,
    pub(crate) flags: TrackerFlags,
    pub(crate) oom_tracker: bool,
}

impl ExceptionTracker {
    pub(crate) fn new(
        record_id: u64,
        code: u32,
        owner: ThreadId,
        context: ContextId,
        prev: Option<TrackerHandle>,
    ) -> Self {
        ExceptionTracker {
            record_id,
            code,
            owner,
            context,
            state: TrackerState::Created,
            range: StackRange::default(),
            first_pass_topmost: None,
            throwable: None,
            chosen: None,
            resume_frame: None,
            catcher: None,
            severity: CorruptionSeverity::NotSet,
            prev,
            intercept_frame: None,
            flags: TrackerFlags::empty(),
            oom_tracker: false,
        }
    }

    /// Moves the tracker to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the lifecycle does not allow the change.
    pub fn transition(&mut self, to: TrackerState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to,
            });
        }

        self.state = to;
        Ok(())
    }

    /// Identity of the exception record this tracker dispatches.
    #[must_use]
    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    /// Native exception code.
    #[must_use]
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Thread that owns the tracker.
    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Context the tracker's throwable lives in.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Frames scanned by the current pass.
    #[must_use]
    pub fn range(&self) -> StackRange {
        self.range
    }

    /// Outermost frame the first pass reached.
    #[must_use]
    pub fn first_pass_topmost(&self) -> Option<StackFrame> {
        self.first_pass_topmost
    }

    /// The throwable being dispatched.
    #[must_use]
    pub fn throwable(&self) -> Option<ObjectRef> {
        self.throwable.map(|throwable| throwable.object)
    }

    /// The handler chosen by the first pass.
    #[must_use]
    pub fn chosen(&self) -> Option<ChosenHandler> {
        self.chosen
    }

    /// Frame control resumes in after the second pass.
    #[must_use]
    pub fn resume_frame(&self) -> Option<StackFrame> {
        self.resume_frame
    }

    /// Method whose catch handler received the exception.
    #[must_use]
    pub fn catcher(&self) -> Option<MethodId> {
        self.catcher
    }

    /// Corruption severity.
    #[must_use]
    pub fn severity(&self) -> CorruptionSeverity {
        self.severity
    }

    /// The enclosing tracker.
    #[must_use]
    pub fn prev(&self) -> Option<TrackerHandle> {
        self.prev
    }

    /// Frame a debugger asked to intercept the exception at.
    #[must_use]
    pub fn intercept_frame(&self) -> Option<StackFrame> {
        self.intercept_frame
    }

    /// Flag set.
    #[must_use]
    pub fn flags(&self) -> TrackerFlags {
        self.flags
    }

    /// Returns `true` for the thread's reserved out-of-memory tracker.
    #[must_use]
    pub fn is_oom_tracker(&self) -> bool {
        self.oom_tracker
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn tracker() -> ExceptionTracker {
        ExceptionTracker::new(1, 0xE043_4352, ThreadId::new(1), ContextId::DEFAULT, None)
    }

    #[test]
    fn test_lifecycle() {
        let mut tracker = tracker();
        tracker.transition(TrackerState::FirstPass).unwrap();
        tracker.transition(TrackerState::HandlerChosen).unwrap();
        tracker.transition(TrackerState::SecondPass).unwrap();
        tracker.transition(TrackerState::Completed).unwrap();
        assert_eq!(tracker.state(), TrackerState::Completed);
    }

    #[test]
    fn test_invalid_transition() {
        let mut tracker = tracker();
        match tracker.transition(TrackerState::Completed) {
            Err(Error::InvalidTransition { from, to }) => {
                assert_eq!(from, TrackerState::Created);
                assert_eq!(to, TrackerState::Completed);
            }
            _ => panic!("Expected InvalidTransition"),
        }

        tracker.transition(TrackerState::SecondPass).unwrap();
        assert!(tracker.transition(TrackerState::FirstPass).is_err());
    }

    #[test]
    fn test_terminal_states() {
        for to in TrackerState::iter() {
            assert!(!TrackerState::Completed.can_transition_to(to));
            assert!(!TrackerState::Merged.can_transition_to(to));
        }
        for from in TrackerState::iter().filter(|state| !state.is_terminal()) {
            assert!(from.can_transition_to(TrackerState::Merged), "{from}");
        }
    }
}
