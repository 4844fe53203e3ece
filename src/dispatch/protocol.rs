//! Two-pass exception dispatch.
//!
//! # Overview
//!
//! The stack walker reports each frame of a faulting thread twice: once while searching for
//! a handler (first pass) and once while unwinding towards it (second pass). For every
//! report the [`ExceptionDispatcher`] finds or creates the [`ExceptionTracker`] of the
//! exception, keeps its scanned stack range current, merges enclosing trackers a nested
//! exception escaped past, and decides what the walker does next.
//!
//! Handlers are run through a [`FuncletInvoker`] supplied by the caller. No tracker or
//! thread lock is held while a funclet runs, so funclets may raise nested exceptions through
//! a dispatcher of their own.
//!
//! # Ordering
//!
//! Within a frame clauses are searched in declaration order, which lists inner regions first.
//! Across frames the search runs from callee to caller. The first accepting clause wins.
//!
//! # Example
//!
//! ```rust
//! use clrexc::prelude::*;
//!
//! struct CatchAll;
//!
//! impl FuncletInvoker for CatchAll {
//!     fn is_type_compatible(&mut self, _throwable: ObjectRef, _catch_type: TypeToken) -> bool {
//!         true
//!     }
//! }
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let thread = runtime.attach_thread(ContextId::DEFAULT)?;
//!
//! let frames = [
//!     FrameInfo::managed(MethodId(1), StackFrame(0x1000), StackFrame(0x1100), 0x10, vec![]),
//!     FrameInfo::managed(
//!         MethodId(2),
//!         StackFrame(0x1100),
//!         StackFrame(0x1200),
//!         0x20,
//!         vec![ExceptionClause::catch((0x10, 0x20), (0x30, 0x10), TypeToken(0x0200_0001))],
//!     ),
//! ];
//!
//! let dispatcher = ExceptionDispatcher::new(&thread);
//! let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation);
//! match dispatcher.throw(&exception, &frames, &mut CatchAll)? {
//!     DispatchOutcome::Caught { method, .. } => assert_eq!(method, MethodId(2)),
//!     other => panic!("unexpected outcome {other:?}"),
//! }
//! assert_eq!(thread.depth(), 0);
//! # Ok::<(), clrexc::Error>(())
//! ```

use tracing::instrument;

use crate::{
    dispatch::{
        clause::{ExceptionClause, MethodId, TypeToken},
        frame::{ExceptionRecord, ExplicitFrame, FrameFlags, FrameInfo, FrameKind},
        policy,
        stack::StackFrame,
        tracker::{ChosenHandler, ExceptionTracker, TrackerFlags, TrackerState},
        TrackerHandle,
    },
    exception::RuntimeException,
    hresult::seh,
    kinds::ExceptionKind,
    runtime::{ExceptionField, ExceptionRuntime, ObjectRef, StackOverflowAction},
    thread::{AbortKind, GcModeGuard, ManagedThread, PinnedThrowable},
    Error, Result,
};

/// Runs handler code on behalf of the dispatcher.
///
/// Every method has a default so invokers only implement what the frames they report use.
#[allow(unused_variables)]
pub trait FuncletInvoker {
    /// Returns `true` if `throwable` is an instance of the type a catch clause names.
    fn is_type_compatible(&mut self, throwable: ObjectRef, catch_type: TypeToken) -> bool {
        false
    }

    /// Runs a filter funclet.
    ///
    /// # Errors
    ///
    /// An error raised by the filter is swallowed and counts as a rejection.
    fn invoke_filter(
        &mut self,
        frame: &FrameInfo,
        clause: &ExceptionClause,
        throwable: ObjectRef,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Runs a finally or fault funclet.
    ///
    /// # Errors
    ///
    /// An error escaping the funclet aborts the second pass of the current exception.
    fn invoke_cleanup(&mut self, frame: &FrameInfo, clause: &ExceptionClause) -> Result<()> {
        Ok(())
    }

    /// Runs a catch funclet.
    ///
    /// # Errors
    ///
    /// An error escaping the funclet aborts the second pass of the current exception.
    fn invoke_catch(
        &mut self,
        frame: &FrameInfo,
        clause: &ExceptionClause,
        throwable: ObjectRef,
    ) -> Result<()> {
        Ok(())
    }
}

/// What the stack walker does after a frame was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// First pass: no handler in this frame, continue with the caller
    ContinueSearch,
    /// First pass: this frame handles the exception; start the second pass
    HandlerFound,
    /// Second pass: the frame was unwound, continue with the caller
    ContinueUnwind,
    /// Second pass: resume execution in this frame
    ResumeAt {
        /// Frame execution resumes in
        frame: StackFrame,
        /// Method owning the frame
        method: MethodId,
        /// Offset execution resumes at
        handler_offset: u32,
    },
    /// A nested exception escaped a handler of this frame and took over the dispatch
    Superseded,
    /// The thread overflowed its stack; no handler runs
    StackOverflow(StackOverflowAction),
}

/// Result of an exception reaching a native boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryOutcome {
    /// Native code may handle the exception
    Caught,
    /// The corrupted state policy requires the exception to be rethrown
    Rethrow,
    /// The thread overflowed its stack; no handler runs
    StackOverflow(StackOverflowAction),
}

/// Result of a full dispatch driven by [`ExceptionDispatcher::raise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler caught the exception and execution resumed after it
    Caught {
        /// Frame execution resumed in
        frame: StackFrame,
        /// Method owning the frame
        method: MethodId,
        /// Offset execution resumed at
        handler_offset: u32,
        /// An ordinary thread abort is still requested and must be raised again
        abort_pending: bool,
    },
    /// No frame accepted the exception
    Unhandled,
    /// A nested exception escaped a handler and replaced this one
    Superseded,
    /// The thread overflowed its stack
    StackOverflow(StackOverflowAction),
}

/// Drives exception dispatch for one thread.
///
/// Dispatchers hold no state of their own; every decision reads and writes the tracker
/// chain of the thread, so any number of dispatchers can be created for the same thread,
/// including nested ones inside funclets.
pub struct ExceptionDispatcher<'a> {
    thread: &'a ManagedThread,
}

impl<'a> ExceptionDispatcher<'a> {
    /// Creates a dispatcher for `thread`.
    #[must_use]
    pub fn new(thread: &'a ManagedThread) -> Self {
        ExceptionDispatcher { thread }
    }

    fn runtime(&self) -> &ExceptionRuntime {
        self.thread.runtime()
    }

    /// Processes one frame reported by the stack walker.
    ///
    /// # Arguments
    ///
    /// * `record` - The exception being dispatched
    /// * `frame` - The frame being walked
    /// * `first_pass` - `true` while searching, `false` while unwinding
    /// * `invoker` - Runs handler code
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker chain is inconsistent, a tracker cannot be allocated,
    /// or an error escapes a cleanup or catch funclet.
    #[instrument(skip_all, fields(thread = %self.thread.id(), record = record.id, sp = %frame.sp, first_pass = first_pass))]
    pub fn process_frame(
        &self,
        record: &ExceptionRecord,
        frame: &FrameInfo,
        first_pass: bool,
        invoker: &mut dyn FuncletInvoker,
    ) -> Result<FrameDisposition> {
        if record.is_stack_overflow() {
            let action = self.handle_stack_overflow(record, frame.sp);
            return Ok(FrameDisposition::StackOverflow(action));
        }

        match frame.kind {
            FrameKind::Managed => {
                self.process_managed_call_frame(record, frame, first_pass, invoker)
            }
            FrameKind::Explicit(kind) => self.process_explicit_frame(record, frame, kind, first_pass),
        }
    }

    /// Processes a managed method frame.
    ///
    /// The first pass searches the frame's clauses for a handler. The second pass runs the
    /// frame's cleanup clauses and, at the frame chosen by the first pass, the catch.
    ///
    /// # Errors
    ///
    /// See [`ExceptionDispatcher::process_frame`].
    pub fn process_managed_call_frame(
        &self,
        record: &ExceptionRecord,
        frame: &FrameInfo,
        first_pass: bool,
        invoker: &mut dyn FuncletInvoker,
    ) -> Result<FrameDisposition> {
        let handle = self.get_or_create_tracker(record, frame.sp, first_pass)?;
        let funclet_parent = self.handle_nested_exception_escape(handle, frame.sp, first_pass)?;

        // The parent of the funclet the exception escaped from is still live and is
        // searched and unwound like any other frame, at the funclet's offset.
        if !self.update_scanned_stack_range(handle, frame.sp)? && !funclet_parent {
            trace!(sp = %frame.sp, "frame already scanned");
            return Ok(if first_pass {
                FrameDisposition::ContinueSearch
            } else {
                FrameDisposition::ContinueUnwind
            });
        }

        let snapshot = self.runtime().trackers().with(handle, Clone::clone)?;
        if first_pass {
            self.search_frame(handle, &snapshot, frame, invoker)
        } else {
            self.unwind_frame(handle, &snapshot, frame, invoker)
        }
    }

    /// Processes a runtime-defined frame.
    ///
    /// Explicit frames carry no handlers. They still extend the scanned range, and a native
    /// boundary met during unwinding records the severity of the escaping exception.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker chain is inconsistent or a tracker cannot be
    /// allocated.
    pub fn process_explicit_frame(
        &self,
        record: &ExceptionRecord,
        frame: &FrameInfo,
        kind: ExplicitFrame,
        first_pass: bool,
    ) -> Result<FrameDisposition> {
        let handle = self.get_or_create_tracker(record, frame.sp, first_pass)?;
        self.handle_nested_exception_escape(handle, frame.sp, first_pass)?;
        self.update_scanned_stack_range(handle, frame.sp)?;

        if first_pass {
            trace!(?kind, sp = %frame.sp, "explicit frame, continue search");
            return Ok(FrameDisposition::ContinueSearch);
        }

        if kind == ExplicitFrame::NativeBoundary {
            let severity = self.runtime().trackers().with(handle, ExceptionTracker::severity)?;
            lock!(self.thread.state).last_active_severity = severity;
            trace!(%severity, sp = %frame.sp, "exception leaves managed code");
        }

        Ok(FrameDisposition::ContinueUnwind)
    }

    /// Returns the tracker for `record`, creating one when needed.
    ///
    /// The head of the chain is reused unless
    /// - there is none,
    /// - it is flagged as rethrown (the new tracker inherits its throwable and severity),
    /// - a different record arrives in the first pass,
    /// - the same record returns to a first pass at or above the head's scanned range
    ///   (the head is popped first),
    /// - or the frame lies below the head's scanned range, which is a nested exception.
    ///
    /// The first second-pass visit of a tracker remembers the outermost first-pass frame,
    /// resets the scanned range and completes the first pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalExecutionEngine`] if no tracker can be allocated and the
    /// thread's reserved tracker is already in use.
    pub fn get_or_create_tracker(
        &self,
        record: &ExceptionRecord,
        frame: StackFrame,
        first_pass: bool,
    ) -> Result<TrackerHandle> {
        let trackers = self.runtime().trackers();
        let head = self.thread.head_tracker();
        let head_info = match head {
            Some(handle) => Some((
                handle,
                trackers.with(handle, |tracker| {
                    (tracker.record_id, tracker.state, tracker.range, tracker.flags)
                })?,
            )),
            None => None,
        };

        let mut rethrow_of = None;
        let reuse = match head_info {
            None => None,
            Some((handle, (id, _, _, flags))) if flags.contains(TrackerFlags::RETHROWN) => {
                trace!(%handle, previous = id, "rethrow, new tracker");
                rethrow_of = Some(handle);
                None
            }
            Some((_, (id, _, _, _))) if first_pass && id != record.id => None,
            Some((handle, (id, state, range, flags)))
                if first_pass
                    && id == record.id
                    && (flags.contains(TrackerFlags::UNWIND_HAS_STARTED)
                        || state == TrackerState::Completed)
                    && (range.is_empty() || frame >= range.high) =>
            {
                debug!(%handle, "second pass ended, restarting first pass");
                self.pop_head(handle)?;
                None
            }
            Some((_, (_, _, range, _))) if range.is_below(frame) => None,
            Some((handle, _)) => Some(handle),
        };

        let handle = match reuse {
            Some(handle) => handle,
            None => self.create_tracker(record, rethrow_of)?,
        };

        if first_pass {
            trackers.with_mut(handle, |tracker| match tracker.state {
                TrackerState::Created => tracker.transition(TrackerState::FirstPass),
                _ => Ok(()),
            })??;
        } else {
            self.begin_second_pass(handle)?;
        }

        Ok(handle)
    }

    fn create_tracker(
        &self,
        record: &ExceptionRecord,
        rethrow_of: Option<TrackerHandle>,
    ) -> Result<TrackerHandle> {
        let _cooperative = GcModeGuard::cooperative(self.thread);
        let runtime = self.runtime();
        let trackers = runtime.trackers();
        let pool = runtime.pool();

        let (handle, oom_tracker) = match trackers.acquire(self.thread.id()) {
            Ok(handle) => (handle, false),
            Err(error) => {
                let mut state = lock!(self.thread.state);
                if state.oom_tracker_in_use {
                    error!(thread = %self.thread.id(), %error, "reserved tracker already in use");
                    return Err(Error::FatalExecutionEngine(
                        "no exception tracker available".to_string(),
                    ));
                }
                state.oom_tracker_in_use = true;
                warn!(thread = %self.thread.id(), %error, "using reserved out-of-memory tracker");
                (self.thread.oom_tracker(), true)
            }
        };

        let inherited = match rethrow_of {
            Some(previous) => Some(trackers.with(previous, |tracker| {
                (tracker.throwable(), tracker.severity)
            })?),
            None => None,
        };

        let throwable = match inherited {
            Some((Some(object), _)) => object,
            _ if record.is_stack_overflow() => pool.stack_overflow().object,
            _ if record.thrown_by_runtime => match self.thread.last_thrown_object() {
                Some(object) => object,
                None => {
                    self.discard_slot(handle, oom_tracker);
                    return Err(Error::InconsistentState(format!(
                        "record {} raised without a thrown object",
                        record.id
                    )));
                }
            },
            _ => {
                let config = runtime.config();
                let kind = seh::kind_for_fault(record.code, record.fault_address, config.null_page_limit);
                if kind == ExceptionKind::OutOfMemory {
                    pool.best_out_of_memory(self.thread.context())
                } else {
                    RuntimeException::kind_only(kind).get_throwable(self.thread)
                }
            }
        };

        if !pool.is_preallocated_object(throwable) {
            if let Err(error) = runtime
                .allocator()
                .set_field(throwable, ExceptionField::XCode(record.code))
            {
                debug!(%error, object = %throwable, "failed to record exception code");
            }
        }

        let severity = policy::initial_severity(
            record.code,
            inherited.map(|(_, severity)| severity),
            runtime.config(),
        );

        let prev = self.thread.head_tracker();
        let mut tracker = ExceptionTracker::new(
            record.id,
            record.code,
            self.thread.id(),
            self.thread.context(),
            prev,
        );
        tracker.severity = severity;
        tracker.oom_tracker = oom_tracker;
        if record.thrown_by_runtime {
            tracker.flags.insert(TrackerFlags::THROWN_BY_RUNTIME);
        }
        tracker.throwable = Some(
            PinnedThrowable::pin(throwable, runtime.allocator().as_ref(), pool).into(),
        );

        if let Err(error) = trackers.install(handle, tracker) {
            self.discard_slot(handle, oom_tracker);
            return Err(error);
        }

        {
            let mut state = lock!(self.thread.state);
            state.head = Some(handle);
            state.last_exception_code = Some(record.code);
        }
        self.thread.set_last_thrown_object(Some(throwable));

        debug!(
            thread = %self.thread.id(),
            tracker = %handle,
            record = record.id,
            code = format_args!("0x{:08X}", record.code),
            %severity,
            "created tracker"
        );
        Ok(handle)
    }

    fn discard_slot(&self, handle: TrackerHandle, oom_tracker: bool) {
        if oom_tracker {
            lock!(self.thread.state).oom_tracker_in_use = false;
        } else {
            let _ = self.runtime().trackers().release(handle);
        }
    }

    fn begin_second_pass(&self, handle: TrackerHandle) -> Result<()> {
        let started = self.runtime().trackers().with_mut(handle, |tracker| {
            if tracker.flags.contains(TrackerFlags::UNWIND_HAS_STARTED) {
                return Ok(false);
            }

            tracker.first_pass_topmost = (!tracker.range.is_empty()).then_some(tracker.range.high);
            tracker.range.reset();
            tracker.flags.insert(TrackerFlags::UNWIND_HAS_STARTED);
            tracker.transition(TrackerState::SecondPass)?;
            Ok::<_, Error>(true)
        })??;

        if started {
            self.first_pass_is_complete(handle)?;
            let throwable = self
                .runtime()
                .trackers()
                .with(handle, ExceptionTracker::throwable)?;
            self.runtime()
                .notifications()
                .unwind_begin(self.thread.id(), throwable);
            debug!(tracker = %handle, "second pass started");
        }

        Ok(())
    }

    fn search_frame(
        &self,
        handle: TrackerHandle,
        snapshot: &ExceptionTracker,
        frame: &FrameInfo,
        invoker: &mut dyn FuncletInvoker,
    ) -> Result<FrameDisposition> {
        if snapshot.intercept_frame == Some(frame.sp) {
            self.choose_handler(handle, frame, None, frame.offset)?;
            return Ok(FrameDisposition::HandlerFound);
        }

        if self.thread.is_rude_abort_initiated()
            && !frame.flags.contains(FrameFlags::IN_CONSTRAINED_REGION)
        {
            trace!(method = %frame.method, "rude abort, skipping frame");
            return Ok(FrameDisposition::ContinueSearch);
        }

        if !policy::can_method_handle(snapshot.severity, frame.flags, self.runtime().config()) {
            trace!(method = %frame.method, "method does not handle corrupted state");
            return Ok(FrameDisposition::ContinueSearch);
        }

        let throwable = self.throwable_of(snapshot)?;
        for (index, clause) in frame.clauses.iter().enumerate() {
            if !clause.covers(frame.offset) {
                continue;
            }

            let accepted = if clause.is_catch() {
                match clause.catch_type {
                    Some(catch_type) => invoker.is_type_compatible(throwable, catch_type),
                    None => true,
                }
            } else if clause.is_filter() {
                let verdict = invoker.invoke_filter(frame, clause, throwable);
                self.pop_nested_above(handle)?;
                match verdict {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        debug!(%error, method = %frame.method, "filter raised, treated as rejection");
                        false
                    }
                }
            } else {
                false
            };

            if accepted {
                self.choose_handler(handle, frame, Some(index), clause.handler_end())?;
                return Ok(FrameDisposition::HandlerFound);
            }
        }

        Ok(FrameDisposition::ContinueSearch)
    }

    fn choose_handler(
        &self,
        handle: TrackerHandle,
        frame: &FrameInfo,
        clause_index: Option<usize>,
        resume_offset: u32,
    ) -> Result<()> {
        let chosen = ChosenHandler {
            clause_index,
            method: frame.method,
            establishing_frame: frame.sp,
            caller_frame: frame.caller_sp,
            resume_offset,
        };

        self.runtime().trackers().with_mut(handle, |tracker| {
            tracker.chosen = Some(chosen);
            tracker.transition(TrackerState::HandlerChosen)
        })??;

        trace!(method = %frame.method, ?clause_index, sp = %frame.sp, "handler chosen");
        self.first_pass_is_complete(handle)
    }

    fn unwind_frame(
        &self,
        handle: TrackerHandle,
        snapshot: &ExceptionTracker,
        frame: &FrameInfo,
        invoker: &mut dyn FuncletInvoker,
    ) -> Result<FrameDisposition> {
        let intercept = snapshot.intercept_frame == Some(frame.sp);
        let target = snapshot
            .chosen
            .filter(|chosen| chosen.establishing_frame == frame.sp);

        if intercept {
            self.second_pass_is_complete(handle, frame.method, frame.sp)?;
            return Ok(FrameDisposition::ResumeAt {
                frame: frame.sp,
                method: frame.method,
                handler_offset: frame.offset,
            });
        }

        // At the target frame only the regions nested inside the chosen catch unwind.
        let cleanup_limit = match target.and_then(|chosen| chosen.clause_index) {
            Some(index) => index,
            None => frame.clauses.len(),
        };

        for clause in &frame.clauses[..cleanup_limit.min(frame.clauses.len())] {
            if !clause.is_cleanup() || !clause.covers(frame.offset) {
                continue;
            }

            trace!(method = %frame.method, handler = clause.handler_offset, "running cleanup");
            invoker.invoke_cleanup(frame, clause)?;
            if !self.runtime().trackers().is_live(handle) {
                debug!(tracker = %handle, "superseded by a nested exception");
                return Ok(FrameDisposition::Superseded);
            }
        }

        let Some(chosen) = target else {
            return Ok(FrameDisposition::ContinueUnwind);
        };

        let Some(clause) = chosen
            .clause_index
            .and_then(|index| frame.clauses.get(index))
        else {
            return Err(Error::InconsistentState(format!(
                "chosen clause missing from {}",
                frame.method
            )));
        };

        let throwable = self.throwable_of(snapshot)?;
        self.runtime()
            .notifications()
            .exception_caught(self.thread.id(), frame.method, Some(throwable));

        invoker.invoke_catch(frame, clause, throwable)?;
        if !self.runtime().trackers().is_live(handle) {
            debug!(tracker = %handle, "superseded by a nested exception");
            return Ok(FrameDisposition::Superseded);
        }

        self.second_pass_is_complete(handle, frame.method, frame.sp)?;
        Ok(FrameDisposition::ResumeAt {
            frame: frame.sp,
            method: frame.method,
            handler_offset: chosen.resume_offset,
        })
    }

    fn throwable_of(&self, snapshot: &ExceptionTracker) -> Result<ObjectRef> {
        snapshot
            .throwable()
            .or_else(|| self.thread.last_thrown_object())
            .ok_or_else(|| {
                Error::InconsistentState(format!("record {} has no throwable", snapshot.record_id))
            })
    }

    /// Completes the first pass of a tracker.
    ///
    /// The chosen handler is fixed from here on. The first-chance notification is delivered
    /// the first time this runs for a tracker and never again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle no longer resolves.
    pub fn first_pass_is_complete(&self, handle: TrackerHandle) -> Result<()> {
        let (notify, throwable) = self.runtime().trackers().with_mut(handle, |tracker| {
            let notify = !tracker.flags.contains(TrackerFlags::FIRST_CHANCE_NOTIFIED);
            tracker.flags.insert(TrackerFlags::FIRST_CHANCE_NOTIFIED);
            (notify, tracker.throwable())
        })?;

        if notify {
            self.runtime()
                .notifications()
                .first_chance(self.thread.id(), throwable);
        }
        Ok(())
    }

    /// Completes the second pass of a tracker.
    ///
    /// Records the catching method and the frame execution resumes in. Until
    /// [`ExceptionDispatcher::resume_after_catch`] runs the tracker is flagged inconsistent
    /// and funclet-skipping walks are refused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] or [`Error::InvalidTransition`] if the tracker is
    /// not unwinding.
    pub fn second_pass_is_complete(
        &self,
        handle: TrackerHandle,
        method: MethodId,
        resume_frame: StackFrame,
    ) -> Result<()> {
        self.runtime().trackers().with_mut(handle, |tracker| {
            tracker.transition(TrackerState::Completed)?;
            tracker.catcher = Some(method);
            tracker.resume_frame = Some(resume_frame);
            tracker.flags.insert(TrackerFlags::INCONSISTENT_STATE);
            Ok::<_, Error>(())
        })??;

        debug!(tracker = %handle, %method, frame = %resume_frame, "second pass complete");
        Ok(())
    }

    /// Refuses a funclet-skipping stack walk while a completed tracker has not resumed yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] inside that window.
    pub fn check_funclet_skipping_walk(&self) -> Result<()> {
        let Some(head) = self.thread.head_tracker() else {
            return Ok(());
        };

        let inconsistent = self.runtime().trackers().with(head, |tracker| {
            tracker.flags.contains(TrackerFlags::INCONSISTENT_STATE)
        })?;
        if inconsistent {
            return Err(Error::InconsistentState(
                "funclet-skipping walk between second pass completion and resume".to_string(),
            ));
        }

        Ok(())
    }

    /// Resumes execution after a catch handler returned.
    ///
    /// Clears the inconsistent state of the completed tracker and pops every tracker the
    /// resume frame unwound, the completed one included.
    ///
    /// # Returns
    ///
    /// `true` if an ordinary thread abort was delivered and not reset; the abort must be
    /// raised again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] if the head tracker has no resume frame.
    pub fn resume_after_catch(&self) -> Result<bool> {
        let head = self
            .thread
            .head_tracker()
            .ok_or_else(|| Error::InconsistentState("resume without a tracker".to_string()))?;

        let resume_frame = self.runtime().trackers().with_mut(head, |tracker| {
            tracker.flags.remove(TrackerFlags::INCONSISTENT_STATE);
            tracker.resume_frame
        })?;
        let Some(resume_frame) = resume_frame else {
            return Err(Error::InconsistentState(format!(
                "{head} completed without a resume frame"
            )));
        };

        self.pop_trackers(resume_frame, true)?;

        let state = lock!(self.thread.state);
        Ok(state.abort_requested == Some(AbortKind::Ordinary) && state.abort_delivered)
    }

    /// Pops every tracker whose scanned range lies below `frame`.
    ///
    /// With `pop_when_equal` a range ending exactly at `frame` is popped as well. A head
    /// that is still searching and has not scanned anything stops the walk. Popped trackers
    /// release their throwable handle unless it belongs to the preallocated pool.
    ///
    /// # Returns
    ///
    /// The number of trackers popped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the chain references a released tracker.
    pub fn pop_trackers(&self, frame: StackFrame, pop_when_equal: bool) -> Result<usize> {
        let trackers = self.runtime().trackers();
        let mut popped = 0;

        while let Some(head) = self.thread.head_tracker() {
            let (range, unwinding) = trackers.with(head, |tracker| {
                (
                    tracker.range,
                    tracker.flags.contains(TrackerFlags::UNWIND_HAS_STARTED),
                )
            })?;

            if range.is_empty() {
                if !unwinding {
                    break;
                }
            } else if range.high > frame || (range.high == frame && !pop_when_equal) {
                break;
            }

            self.pop_head(head)?;
            popped += 1;
        }

        Ok(popped)
    }

    /// Pops trackers below `frame` if the head tracker never found a place to resume.
    ///
    /// # Returns
    ///
    /// `true` if any tracker was popped.
    ///
    /// # Errors
    ///
    /// See [`ExceptionDispatcher::pop_trackers`].
    pub fn pop_tracker_if_escaping(&self, frame: StackFrame) -> Result<bool> {
        let Some(head) = self.thread.head_tracker() else {
            return Ok(false);
        };

        let escaping = self
            .runtime()
            .trackers()
            .with(head, |tracker| tracker.resume_frame.is_none())?;
        if !escaping {
            return Ok(false);
        }

        Ok(self.pop_trackers(frame, true)? > 0)
    }

    fn pop_head(&self, head: TrackerHandle) -> Result<()> {
        let prev = self.runtime().trackers().with(head, ExceptionTracker::prev)?;
        lock!(self.thread.state).head = prev;
        self.free_tracker(head)?;
        debug!(thread = %self.thread.id(), tracker = %head, "popped tracker");
        Ok(())
    }

    fn pop_nested_above(&self, handle: TrackerHandle) -> Result<()> {
        while let Some(head) = self.thread.head_tracker() {
            if head == handle {
                break;
            }
            self.pop_head(head)?;
        }
        Ok(())
    }

    fn free_tracker(&self, handle: TrackerHandle) -> Result<()> {
        let trackers = self.runtime().trackers();
        let tracker = if handle == self.thread.oom_tracker() {
            let tracker = trackers.clear(handle)?;
            lock!(self.thread.state).oom_tracker_in_use = false;
            tracker
        } else {
            trackers.release(handle)?
        };

        if let Some(throwable) = tracker.and_then(|tracker| tracker.throwable) {
            PinnedThrowable::from(throwable).release(self.runtime().allocator().as_ref());
        }
        Ok(())
    }

    /// Merges enclosing trackers whose scanned range `frame` has reached.
    ///
    /// A nested exception that escapes its handler walks over frames an enclosing exception
    /// already scanned. The enclosing tracker's range is folded into the current one; during
    /// the second pass the enclosing tracker is unlinked and freed. An enclosing tracker
    /// that is still searching stops the merge when `frame` lies inside its range but
    /// outside the current one.
    ///
    /// Only frames below an unwinding tracker's upper bound are fully unwound. The frame at
    /// the bound is the parent of the funclet that raised the nested exception; it is still
    /// live, so its clauses covering the funclet's offset remain candidates.
    ///
    /// # Returns
    ///
    /// `true` if `frame` is the parent frame of the funclet an enclosing tracker is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the chain references a released tracker.
    pub fn handle_nested_exception_escape(
        &self,
        handle: TrackerHandle,
        frame: StackFrame,
        first_pass: bool,
    ) -> Result<bool> {
        let trackers = self.runtime().trackers();
        let mut previous = trackers.with(handle, ExceptionTracker::prev)?;
        let mut funclet_parent = false;

        while let Some(enclosing) = previous {
            let (range, flags, next) = trackers.with(enclosing, |tracker| {
                (tracker.range, tracker.flags, tracker.prev)
            })?;

            if !range.is_superseded_by(frame) {
                break;
            }

            let current = trackers.with(handle, ExceptionTracker::range)?;
            if !flags.contains(TrackerFlags::UNWIND_HAS_STARTED)
                && !current.contains(frame)
                && frame <= range.high
            {
                break;
            }

            if flags.contains(TrackerFlags::UNWIND_HAS_STARTED) && range.high == frame {
                funclet_parent = true;
            }

            trackers.with_mut(handle, |tracker| tracker.range.combine_with(&range))?;

            if !first_pass {
                trackers.with_mut(handle, |tracker| tracker.prev = next)?;
                trackers.with_mut(enclosing, |tracker| tracker.transition(TrackerState::Merged))??;
                self.free_tracker(enclosing)?;
                debug!(tracker = %handle, merged = %enclosing, %range, "merged enclosing tracker");
            }

            previous = next;
        }

        Ok(funclet_parent)
    }

    /// Adds `frame` to the tracker's scanned range.
    ///
    /// # Returns
    ///
    /// `false` if the range already covered the frame, meaning the frame was processed
    /// before (possibly by a merged enclosing exception).
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle no longer resolves.
    pub fn update_scanned_stack_range(&self, handle: TrackerHandle, frame: StackFrame) -> Result<bool> {
        self.runtime().trackers().with_mut(handle, |tracker| {
            if tracker.range.contains(frame) {
                false
            } else {
                tracker.range.extend(frame);
                true
            }
        })
    }

    /// Asks for the current exception to be caught at `frame` regardless of handlers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] if there is no exception in flight or its
    /// second pass has already started.
    pub fn request_debugger_intercept(&self, frame: StackFrame) -> Result<()> {
        let head = self
            .thread
            .head_tracker()
            .ok_or_else(|| Error::InconsistentState("no exception to intercept".to_string()))?;

        self.runtime().trackers().with_mut(head, |tracker| {
            if tracker.flags.contains(TrackerFlags::UNWIND_HAS_STARTED) {
                return Err(Error::InconsistentState(
                    "intercept requested after unwinding started".to_string(),
                ));
            }

            tracker.intercept_frame = Some(frame);
            tracker.flags.insert(TrackerFlags::DEBUGGER_INTERCEPT);
            if tracker.chosen.is_some_and(|chosen| chosen.establishing_frame != frame) {
                tracker.chosen = None;
            }
            Ok(())
        })??;

        debug!(tracker = %head, %frame, "debugger intercept requested");
        Ok(())
    }

    /// Flags the exception in flight as being rethrown from its catch handler.
    ///
    /// The next dispatch on this thread starts a new tracker that inherits the throwable
    /// and corruption severity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] if there is no exception in flight.
    pub fn mark_rethrow(&self) -> Result<()> {
        let head = self
            .thread
            .head_tracker()
            .ok_or_else(|| Error::InconsistentState("rethrow outside a handler".to_string()))?;

        self.runtime()
            .trackers()
            .with_mut(head, |tracker| tracker.flags.insert(TrackerFlags::RETHROWN))
    }

    /// Applies the native boundary policy to an exception leaving managed code at `frame`.
    ///
    /// # Arguments
    ///
    /// * `record` - The exception reaching the boundary
    /// * `frame` - Frame of the boundary
    /// * `caught_foreign` - The preceding catch at this boundary was of a managed or foreign
    ///   exception type
    ///
    /// # Errors
    ///
    /// See [`ExceptionDispatcher::pop_trackers`].
    #[instrument(skip_all, fields(thread = %self.thread.id(), record = record.id, sp = %frame))]
    pub fn catch_at_boundary(
        &self,
        record: &ExceptionRecord,
        frame: StackFrame,
        caught_foreign: bool,
    ) -> Result<BoundaryOutcome> {
        if record.is_stack_overflow() {
            return Ok(BoundaryOutcome::StackOverflow(
                self.handle_stack_overflow(record, frame),
            ));
        }

        let runtime = self.runtime();
        let severity = match self.thread.current_tracker() {
            Some(tracker) if tracker.record_id == record.id => tracker.severity,
            _ => policy::initial_severity(record.code, None, runtime.config()),
        };

        let last_active = self.thread.last_active_severity();
        let rethrow =
            policy::should_rethrow_at_boundary(record.code, caught_foreign, last_active, runtime.config());
        lock!(self.thread.state).last_active_severity = severity;

        if rethrow {
            debug!(%severity, %last_active, "corrupted state exception rethrown at boundary");
            return Ok(BoundaryOutcome::Rethrow);
        }

        self.pop_tracker_if_escaping(frame)?;
        Ok(BoundaryOutcome::Caught)
    }

    /// Reports that the first pass walked every frame without finding a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the head tracker no longer resolves.
    pub fn search_exhausted(&self, record: &ExceptionRecord) -> Result<()> {
        let head = self.thread.head_tracker();
        let throwable = match head {
            Some(head)
                if self
                    .runtime()
                    .trackers()
                    .with(head, ExceptionTracker::record_id)?
                    == record.id =>
            {
                self.first_pass_is_complete(head)?;
                self.runtime().trackers().with(head, ExceptionTracker::throwable)?
            }
            _ => self.thread.last_thrown_object(),
        };

        warn!(thread = %self.thread.id(), record = record.id, "unhandled exception");
        self.runtime()
            .notifications()
            .unhandled(self.thread.id(), throwable);
        Ok(())
    }

    fn handle_stack_overflow(&self, record: &ExceptionRecord, frame: StackFrame) -> StackOverflowAction {
        self.thread.set_so_for_last_thrown_object();
        self.thread.set_last_exception_code(record.code);

        let action = self
            .runtime()
            .stack_overflow_policy()
            .handle_stack_overflow(self.thread.id(), frame);
        error!(thread = %self.thread.id(), %frame, ?action, "stack overflow");
        action
    }

    /// Dispatches `record` over `frames`, innermost first, running both passes.
    ///
    /// This stands in for the operating system's stack walk. The first pass runs until a
    /// frame accepts the exception; the second pass then unwinds up to and including that
    /// frame and resumes after its handler.
    ///
    /// # Errors
    ///
    /// Returns an error if processing a frame fails, see
    /// [`ExceptionDispatcher::process_frame`].
    #[instrument(skip_all, fields(thread = %self.thread.id(), record = record.id, frames = frames.len()))]
    pub fn raise(
        &self,
        record: &ExceptionRecord,
        frames: &[FrameInfo],
        invoker: &mut dyn FuncletInvoker,
    ) -> Result<DispatchOutcome> {
        let _cooperative = GcModeGuard::cooperative(self.thread);

        let mut target = None;
        for (index, frame) in frames.iter().enumerate() {
            match self.process_frame(record, frame, true, invoker)? {
                FrameDisposition::HandlerFound => {
                    target = Some(index);
                    break;
                }
                FrameDisposition::StackOverflow(action) => {
                    return Ok(DispatchOutcome::StackOverflow(action));
                }
                _ => {}
            }
        }

        let Some(target) = target else {
            self.search_exhausted(record)?;
            return Ok(DispatchOutcome::Unhandled);
        };

        for frame in &frames[..=target] {
            match self.process_frame(record, frame, false, invoker)? {
                FrameDisposition::ResumeAt {
                    frame,
                    method,
                    handler_offset,
                } => {
                    let abort_pending = self.resume_after_catch()?;
                    return Ok(DispatchOutcome::Caught {
                        frame,
                        method,
                        handler_offset,
                        abort_pending,
                    });
                }
                FrameDisposition::Superseded => return Ok(DispatchOutcome::Superseded),
                FrameDisposition::StackOverflow(action) => {
                    return Ok(DispatchOutcome::StackOverflow(action));
                }
                _ => {}
            }
        }

        Err(Error::InconsistentState(format!(
            "second pass of record {} never reached its handler",
            record.id
        )))
    }

    /// Throws `exception` from managed code and dispatches it over `frames`.
    ///
    /// The exception's throwable becomes the thread's last thrown object before dispatch.
    ///
    /// # Errors
    ///
    /// See [`ExceptionDispatcher::raise`].
    pub fn throw(
        &self,
        exception: &RuntimeException,
        frames: &[FrameInfo],
        invoker: &mut dyn FuncletInvoker,
    ) -> Result<DispatchOutcome> {
        let throwable = exception.get_throwable(self.thread);
        self.thread.set_last_thrown_object(Some(throwable));

        let record = ExceptionRecord::managed(self.runtime().next_record_id());
        self.raise(&record, frames, invoker)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::RuntimeConfig,
        dispatch::{stack::StackRange, tracker::CorruptionSeverity},
        runtime::{ContextId, RuntimeBuilder},
        test::{create_thread, managed_frame, CatchAll, RecordingNotifications},
    };

    const CATCH_TYPE: TypeToken = TypeToken(0x0200_0010);

    fn catch_frame(sp: u64) -> FrameInfo {
        managed_frame(
            1,
            sp,
            0x20,
            vec![ExceptionClause::catch((0x10, 0x20), (0x40, 0x10), CATCH_TYPE)],
        )
    }

    #[test]
    fn test_catch_in_caller() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let frames = [managed_frame(2, 0x1000, 0x08, vec![]), catch_frame(0x1100)];

        let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation);
        match dispatcher.throw(&exception, &frames, &mut CatchAll::default()).unwrap() {
            DispatchOutcome::Caught {
                frame,
                handler_offset,
                abort_pending,
                ..
            } => {
                assert_eq!(frame, StackFrame(0x1100));
                assert_eq!(handler_offset, 0x50);
                assert!(!abort_pending);
            }
            other => panic!("Expected Caught, got {other:?}"),
        }
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_innermost_clause_wins() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let frames = [managed_frame(
            3,
            0x2000,
            0x18,
            vec![
                ExceptionClause::catch((0x10, 0x10), (0x30, 0x08), CATCH_TYPE),
                ExceptionClause::catch((0x00, 0x80), (0x90, 0x08), CATCH_TYPE),
            ],
        )];

        let mut invoker = CatchAll::default();
        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        match dispatcher.throw(&exception, &frames, &mut invoker).unwrap() {
            DispatchOutcome::Caught { handler_offset, .. } => assert_eq!(handler_offset, 0x38),
            other => panic!("Expected Caught, got {other:?}"),
        }
        assert_eq!(invoker.catches, vec![0x30]);
    }

    #[test]
    fn test_cleanups_run_in_second_pass() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let frames = [
            managed_frame(
                4,
                0x1000,
                0x14,
                vec![ExceptionClause::finally((0x10, 0x10), (0x60, 0x04))],
            ),
            managed_frame(
                5,
                0x1100,
                0x24,
                vec![
                    ExceptionClause::fault((0x20, 0x08), (0x70, 0x04)),
                    ExceptionClause::catch((0x20, 0x10), (0x80, 0x04), CATCH_TYPE),
                    ExceptionClause::finally((0x00, 0x40), (0x90, 0x04)),
                ],
            ),
        ];

        let mut invoker = CatchAll::default();
        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        dispatcher.throw(&exception, &frames, &mut invoker).unwrap();

        // The outer finally of the catching frame is not part of the unwind.
        assert_eq!(invoker.cleanups, vec![0x60, 0x70]);
        assert_eq!(invoker.catches, vec![0x80]);
    }

    #[test]
    fn test_filter_decides() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let frames = [managed_frame(
            6,
            0x3000,
            0x10,
            vec![
                ExceptionClause::filter((0x00, 0x20), (0x40, 0x08), 0x30),
                ExceptionClause::filter((0x00, 0x20), (0x50, 0x08), 0x48),
            ],
        )];

        let mut invoker = CatchAll::default();
        invoker.filter_results = vec![Err(Error::Error("filter failed".into())), Ok(true)];
        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        match dispatcher.throw(&exception, &frames, &mut invoker).unwrap() {
            DispatchOutcome::Caught { handler_offset, .. } => assert_eq!(handler_offset, 0x58),
            other => panic!("Expected Caught, got {other:?}"),
        }
    }

    #[test]
    fn test_unhandled() {
        let notifications = Arc::new(RecordingNotifications::default());
        let runtime = RuntimeBuilder::new()
            .notifications(notifications.clone())
            .build()
            .unwrap();
        let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let frames = [managed_frame(7, 0x1000, 0x08, vec![])];

        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        let outcome = dispatcher
            .throw(&exception, &frames, &mut CatchAll::default())
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert_eq!(thread.depth(), 1);

        let tracker = thread.current_tracker().unwrap();
        assert!(tracker.flags().contains(TrackerFlags::FIRST_CHANCE_NOTIFIED));
        assert_eq!(tracker.state(), TrackerState::FirstPass);
        assert_eq!(notifications.events(), vec!["first_chance", "unhandled"]);
    }

    #[test]
    fn test_notifications_order() {
        let notifications = Arc::new(RecordingNotifications::default());
        let runtime = RuntimeBuilder::new()
            .notifications(notifications.clone())
            .build()
            .unwrap();
        let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        let dispatcher = ExceptionDispatcher::new(&thread);

        let frames = [managed_frame(2, 0x1000, 0x08, vec![]), catch_frame(0x1100)];
        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        dispatcher
            .throw(&exception, &frames, &mut CatchAll::default())
            .unwrap();

        assert_eq!(
            notifications.events(),
            vec!["first_chance", "unwind_begin", "exception_caught"]
        );
    }

    #[test]
    fn test_native_fault_classification() {
        let (runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let record = ExceptionRecord::native(11, seh::STATUS_ACCESS_VIOLATION, Some(0x10));

        let handle = dispatcher
            .get_or_create_tracker(&record, StackFrame(0x1000), true)
            .unwrap();
        let tracker = runtime.trackers().with(handle, Clone::clone).unwrap();
        let throwable = tracker.throwable().unwrap();

        assert_eq!(
            runtime.allocator().kind_of(throwable),
            Some(ExceptionKind::NullReference)
        );
        assert_eq!(runtime.allocator().xcode_of(throwable), Some(seh::STATUS_ACCESS_VIOLATION));
        assert_eq!(tracker.severity(), CorruptionSeverity::ProcessCorrupting);
        assert_eq!(thread.last_thrown_object(), Some(throwable));
        assert_eq!(thread.last_exception_code(), Some(seh::STATUS_ACCESS_VIOLATION));
        assert!(thread.validate_last_thrown_object().is_ok());
    }

    #[test]
    fn test_corrupted_state_skips_ordinary_methods() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let record = ExceptionRecord::native(12, seh::STATUS_ACCESS_VIOLATION, Some(0x10_0000));
        let frames = [
            catch_frame(0x1000),
            catch_frame(0x1100).with_flags(FrameFlags::HANDLES_CORRUPTED_STATE),
        ];

        match dispatcher
            .raise(&record, &frames, &mut CatchAll::default())
            .unwrap()
        {
            DispatchOutcome::Caught { frame, .. } => assert_eq!(frame, StackFrame(0x1100)),
            other => panic!("Expected Caught, got {other:?}"),
        }
    }

    #[test]
    fn test_legacy_policy_catches_corrupted_state() {
        let runtime = RuntimeBuilder::new()
            .config(RuntimeConfig::legacy())
            .build()
            .unwrap();
        let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let record = ExceptionRecord::native(13, seh::STATUS_ACCESS_VIOLATION, Some(0x10_0000));

        match dispatcher
            .raise(&record, &[catch_frame(0x1000)], &mut CatchAll::default())
            .unwrap()
        {
            DispatchOutcome::Caught { frame, .. } => assert_eq!(frame, StackFrame(0x1000)),
            other => panic!("Expected Caught, got {other:?}"),
        }
    }

    #[test]
    fn test_stack_overflow_skips_handlers() {
        let (runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let record = ExceptionRecord::native(14, seh::STATUS_STACK_OVERFLOW, None);

        let mut invoker = CatchAll::default();
        let outcome = dispatcher
            .raise(&record, &[catch_frame(0x1000)], &mut invoker)
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::StackOverflow(StackOverflowAction::Terminate)
        );
        assert!(invoker.catches.is_empty());
        assert_eq!(
            thread.last_thrown_object(),
            Some(runtime.pool().stack_overflow().object)
        );
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_nested_escape_merges() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();

        // The enclosing exception unwinds up to 0x9000 and runs a finally there.
        let outer = ExceptionRecord::native(1, seh::STATUS_INTEGER_DIVIDE_BY_ZERO, None);
        let outer_frames = [
            managed_frame(
                1,
                0x9000,
                0x10,
                vec![ExceptionClause::finally((0x00, 0x20), (0x40, 0x10))],
            ),
            catch_frame(0xA000),
        ];
        for frame in &outer_frames {
            dispatcher.process_frame(&outer, frame, true, &mut invoker).unwrap();
        }
        let disposition = dispatcher
            .process_frame(&outer, &outer_frames[0], false, &mut invoker)
            .unwrap();
        assert_eq!(disposition, FrameDisposition::ContinueUnwind);
        let enclosing = thread.head_tracker().unwrap();

        // A new exception raised inside that finally escapes it.
        let nested = ExceptionRecord::native(2, seh::STATUS_INTEGER_OVERFLOW, None);
        let nested_frames = [
            managed_frame(8, 0x8800, 0x04, vec![]),
            managed_frame(1, 0x9000, 0x44, vec![]),
            catch_frame(0xB000),
        ];
        for frame in &nested_frames {
            dispatcher.process_frame(&nested, frame, true, &mut invoker).unwrap();
        }
        assert_eq!(thread.depth(), 2);

        dispatcher
            .process_frame(&nested, &nested_frames[0], false, &mut invoker)
            .unwrap();
        dispatcher
            .process_frame(&nested, &nested_frames[1], false, &mut invoker)
            .unwrap();

        assert_eq!(thread.depth(), 1);
        let tracker = thread.current_tracker().unwrap();
        assert!(tracker.range().contains(StackFrame(0x8800)));
        assert!(tracker.range().contains(StackFrame(0x9000)));
        assert!(tracker.prev().is_none());
        assert!(!thread.runtime().trackers().is_live(enclosing));

        let disposition = dispatcher
            .process_frame(&nested, &nested_frames[2], false, &mut invoker)
            .unwrap();
        assert!(matches!(disposition, FrameDisposition::ResumeAt { .. }));
        dispatcher.resume_after_catch().unwrap();
        assert_eq!(thread.depth(), 0);
        assert_eq!(invoker.cleanups, vec![0x40]);
    }

    /// Raises a nested exception from the first finally it runs.
    struct RaisingFinally<'a> {
        thread: &'a ManagedThread,
        nested_frames: Vec<FrameInfo>,
        funclets: CatchAll,
        nested: Option<DispatchOutcome>,
        in_catch: Option<(usize, StackRange)>,
    }

    impl FuncletInvoker for RaisingFinally<'_> {
        fn is_type_compatible(&mut self, _throwable: ObjectRef, _catch_type: TypeToken) -> bool {
            true
        }

        fn invoke_cleanup(&mut self, frame: &FrameInfo, clause: &ExceptionClause) -> Result<()> {
            self.funclets.invoke_cleanup(frame, clause)?;
            if self.nested.is_some() {
                return Ok(());
            }

            let thread = self.thread;
            let frames = std::mem::take(&mut self.nested_frames);
            let exception = RuntimeException::kind_only(ExceptionKind::Overflow);
            let outcome = ExceptionDispatcher::new(thread).throw(&exception, &frames, self)?;
            self.nested = Some(outcome);
            Ok(())
        }

        fn invoke_catch(
            &mut self,
            frame: &FrameInfo,
            clause: &ExceptionClause,
            throwable: ObjectRef,
        ) -> Result<()> {
            let range = self.thread.current_tracker().map(|tracker| tracker.range());
            self.in_catch = range.map(|range| (self.thread.depth(), range));
            self.funclets.invoke_catch(frame, clause, throwable)
        }
    }

    #[test]
    fn test_nested_catch_in_parent_frame() {
        let (runtime, _heap, thread) = create_thread();
        let clauses = vec![
            ExceptionClause::finally((0x00, 0x20), (0x40, 0x10)),
            ExceptionClause::catch((0x00, 0x80), (0x90, 0x10), CATCH_TYPE),
        ];
        let live = runtime.trackers().live_count();

        let mut invoker = RaisingFinally {
            thread: &thread,
            nested_frames: vec![
                managed_frame(8, 0x8800, 0x04, vec![]),
                managed_frame(1, 0x9000, 0x44, clauses.clone()),
            ],
            funclets: CatchAll::default(),
            nested: None,
            in_catch: None,
        };

        let frames = [managed_frame(1, 0x9000, 0x10, clauses)];
        let exception = RuntimeException::kind_only(ExceptionKind::DivideByZero);
        let outcome = ExceptionDispatcher::new(&thread)
            .throw(&exception, &frames, &mut invoker)
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Superseded);

        // The nested exception is caught by the catch enclosing the finally, in the same frame.
        match invoker.nested {
            Some(DispatchOutcome::Caught {
                frame,
                handler_offset,
                ..
            }) => {
                assert_eq!(frame, StackFrame(0x9000));
                assert_eq!(handler_offset, 0xA0);
            }
            other => panic!("Expected Caught, got {other:?}"),
        }
        assert_eq!(invoker.funclets.cleanups, vec![0x40]);
        assert_eq!(invoker.funclets.catches, vec![0x90]);

        let (depth, range) = invoker.in_catch.unwrap();
        assert_eq!(depth, 1);
        assert!(range.contains(StackFrame(0x8800)));
        assert!(range.contains(StackFrame(0x9000)));

        assert_eq!(thread.depth(), 0);
        assert_eq!(runtime.trackers().live_count(), live);
    }

    #[test]
    fn test_first_pass_does_not_merge() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();

        let outer = ExceptionRecord::native(1, seh::STATUS_INTEGER_DIVIDE_BY_ZERO, None);
        dispatcher
            .process_frame(&outer, &managed_frame(1, 0x9000, 0x10, vec![]), true, &mut invoker)
            .unwrap();

        let nested = ExceptionRecord::native(2, seh::STATUS_INTEGER_OVERFLOW, None);
        dispatcher
            .process_frame(&nested, &managed_frame(2, 0x8000, 0x10, vec![]), true, &mut invoker)
            .unwrap();
        dispatcher
            .process_frame(&nested, &managed_frame(1, 0x9000, 0x10, vec![]), true, &mut invoker)
            .unwrap();

        assert_eq!(thread.depth(), 2);
    }

    #[test]
    fn test_pop_trackers() {
        let (_runtime, heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();
        let handles = heap.handle_count();

        let record = ExceptionRecord::native(3, seh::STATUS_INTEGER_OVERFLOW, None);
        dispatcher
            .process_frame(&record, &managed_frame(1, 0x4000, 0x10, vec![]), true, &mut invoker)
            .unwrap();
        assert!(heap.handle_count() > handles);

        assert_eq!(dispatcher.pop_trackers(StackFrame(0x4000), false).unwrap(), 0);
        assert_eq!(dispatcher.pop_trackers(StackFrame(0x4000), true).unwrap(), 1);
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_pop_skips_unscanned_head() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);

        let record = ExceptionRecord::native(4, seh::STATUS_INTEGER_OVERFLOW, None);
        dispatcher
            .get_or_create_tracker(&record, StackFrame(0x4000), true)
            .unwrap();
        assert_eq!(dispatcher.pop_trackers(StackFrame::MAX, true).unwrap(), 0);
        assert_eq!(thread.depth(), 1);
    }

    #[test]
    fn test_inconsistent_window() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();
        let record = ExceptionRecord::native(5, seh::STATUS_INTEGER_OVERFLOW, None);
        let frame = catch_frame(0x5000);

        dispatcher.process_frame(&record, &frame, true, &mut invoker).unwrap();
        assert!(dispatcher.check_funclet_skipping_walk().is_ok());
        dispatcher.process_frame(&record, &frame, false, &mut invoker).unwrap();

        match dispatcher.check_funclet_skipping_walk() {
            Err(Error::InconsistentState(_)) => {}
            _ => panic!("Expected InconsistentState"),
        }

        dispatcher.resume_after_catch().unwrap();
        assert!(dispatcher.check_funclet_skipping_walk().is_ok());
    }

    #[test]
    fn test_debugger_intercept() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();
        let record = ExceptionRecord::native(6, seh::STATUS_INTEGER_OVERFLOW, None);
        let frames = [
            managed_frame(1, 0x6000, 0x10, vec![]),
            managed_frame(2, 0x6100, 0x30, vec![]),
            catch_frame(0x6200),
        ];

        dispatcher.process_frame(&record, &frames[0], true, &mut invoker).unwrap();
        dispatcher.request_debugger_intercept(StackFrame(0x6100)).unwrap();

        assert_eq!(
            dispatcher.process_frame(&record, &frames[1], true, &mut invoker).unwrap(),
            FrameDisposition::HandlerFound
        );
        dispatcher.process_frame(&record, &frames[0], false, &mut invoker).unwrap();
        assert_eq!(
            dispatcher.process_frame(&record, &frames[1], false, &mut invoker).unwrap(),
            FrameDisposition::ResumeAt {
                frame: StackFrame(0x6100),
                method: MethodId(2),
                handler_offset: 0x30,
            }
        );
        assert!(invoker.catches.is_empty());

        assert!(dispatcher.request_debugger_intercept(StackFrame(0x6200)).is_err());
    }

    #[test]
    fn test_rethrow_inherits_throwable() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);

        let record = ExceptionRecord::native(7, seh::STATUS_ACCESS_VIOLATION, Some(0x10));
        let handle = dispatcher
            .get_or_create_tracker(&record, StackFrame(0x7000), true)
            .unwrap();
        let original = thread.current_tracker().unwrap();
        dispatcher.mark_rethrow().unwrap();

        let rethrow = ExceptionRecord::managed(8);
        let rethrown = dispatcher
            .get_or_create_tracker(&rethrow, StackFrame(0x6800), true)
            .unwrap();
        assert_ne!(handle, rethrown);

        let tracker = thread.current_tracker().unwrap();
        assert_eq!(tracker.throwable(), original.throwable());
        assert_eq!(tracker.severity(), CorruptionSeverity::ProcessCorrupting);
        assert_eq!(tracker.prev(), Some(handle));
    }

    #[test]
    fn test_boundary_policy() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();

        let fault = ExceptionRecord::native(9, seh::STATUS_ACCESS_VIOLATION, Some(0x10));
        dispatcher
            .raise(&fault, &[managed_frame(1, 0x1000, 0x08, vec![])], &mut invoker)
            .unwrap();
        assert_eq!(
            dispatcher
                .catch_at_boundary(&fault, StackFrame(0x2000), false)
                .unwrap(),
            BoundaryOutcome::Rethrow
        );
        assert_eq!(thread.last_active_severity(), CorruptionSeverity::ProcessCorrupting);

        // A managed exception caught after a corrupting one inherits the rethrow.
        let managed = ExceptionRecord::managed(10);
        assert_eq!(
            dispatcher
                .catch_at_boundary(&managed, StackFrame(0x2000), true)
                .unwrap(),
            BoundaryOutcome::Rethrow
        );
        assert_eq!(thread.last_active_severity(), CorruptionSeverity::NotCorrupting);
        assert_eq!(
            dispatcher
                .catch_at_boundary(&managed, StackFrame(0x2000), true)
                .unwrap(),
            BoundaryOutcome::Caught
        );
    }

    #[test]
    fn test_boundary_pops_escaping_trackers() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let record = ExceptionRecord::native(15, seh::STATUS_INTEGER_OVERFLOW, None);

        dispatcher
            .raise(&record, &[managed_frame(1, 0x1000, 0x08, vec![])], &mut CatchAll::default())
            .unwrap();
        assert_eq!(thread.depth(), 1);
        assert_eq!(
            dispatcher
                .catch_at_boundary(&record, StackFrame(0x2000), false)
                .unwrap(),
            BoundaryOutcome::Caught
        );
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_ordinary_abort_reraised() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);

        thread.request_abort(false);
        let abort = thread.take_pending_abort().unwrap();
        match dispatcher
            .throw(&abort, &[catch_frame(0x1000)], &mut CatchAll::default())
            .unwrap()
        {
            DispatchOutcome::Caught { abort_pending, .. } => assert!(abort_pending),
            other => panic!("Expected Caught, got {other:?}"),
        }

        thread.reset_abort();
        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        match dispatcher
            .throw(&exception, &[catch_frame(0x1000)], &mut CatchAll::default())
            .unwrap()
        {
            DispatchOutcome::Caught { abort_pending, .. } => assert!(!abort_pending),
            other => panic!("Expected Caught, got {other:?}"),
        }
    }

    #[test]
    fn test_rude_abort_skips_handlers() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);

        thread.request_abort(true);
        let abort = thread.take_pending_abort().unwrap();
        let frames = [
            catch_frame(0x1000),
            catch_frame(0x1100).with_flags(FrameFlags::IN_CONSTRAINED_REGION),
        ];
        match dispatcher
            .throw(&abort, &frames, &mut CatchAll::default())
            .unwrap()
        {
            DispatchOutcome::Caught { frame, .. } => assert_eq!(frame, StackFrame(0x1100)),
            other => panic!("Expected Caught, got {other:?}"),
        }
    }

    #[test]
    fn test_oom_tracker_fallback() {
        let runtime = RuntimeBuilder::new()
            .config(
                RuntimeConfig::default()
                    .with_tracker_slots_per_page(1)
                    .with_max_tracker_pages(1),
            )
            .build()
            .unwrap();
        let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        let dispatcher = ExceptionDispatcher::new(&thread);

        let first = ExceptionRecord::native(1, seh::STATUS_INTEGER_OVERFLOW, None);
        let handle = dispatcher
            .get_or_create_tracker(&first, StackFrame(0x1000), true)
            .unwrap();
        assert_eq!(handle, thread.oom_tracker());
        assert!(thread.current_tracker().unwrap().is_oom_tracker());

        let second = ExceptionRecord::native(2, seh::STATUS_INTEGER_OVERFLOW, None);
        match dispatcher.get_or_create_tracker(&second, StackFrame(0x0800), true) {
            Err(Error::FatalExecutionEngine(_)) => {}
            _ => panic!("Expected FatalExecutionEngine"),
        }

        dispatcher.update_scanned_stack_range(handle, StackFrame(0x1000)).unwrap();
        dispatcher.pop_trackers(StackFrame::MAX, true).unwrap();
        assert_eq!(thread.depth(), 0);
        assert!(dispatcher
            .get_or_create_tracker(&second, StackFrame(0x0800), true)
            .is_ok());
    }

    #[test]
    fn test_range_after_second_pass_start() {
        let (_runtime, _heap, thread) = create_thread();
        let dispatcher = ExceptionDispatcher::new(&thread);
        let mut invoker = CatchAll::default();
        let record = ExceptionRecord::native(16, seh::STATUS_INTEGER_OVERFLOW, None);
        let frames = [managed_frame(1, 0x1000, 0x08, vec![]), catch_frame(0x1100)];

        for frame in &frames {
            dispatcher.process_frame(&record, frame, true, &mut invoker).unwrap();
        }
        dispatcher.process_frame(&record, &frames[0], false, &mut invoker).unwrap();

        let tracker = thread.current_tracker().unwrap();
        assert_eq!(tracker.first_pass_topmost(), Some(StackFrame(0x1100)));
        assert_eq!(
            tracker.range(),
            StackRange::new(StackFrame(0x1000), StackFrame(0x1000))
        );
        assert!(tracker.flags().contains(TrackerFlags::UNWIND_HAS_STARTED));
    }
}
