//! Managed threads and their exception state.
//!
//! # Overview
//!
//! Every thread that runs managed code is attached to the [`ExceptionRuntime`] as a
//! [`ManagedThread`]. The thread owns its exception state: the chain of active trackers
//! (newest first), the last thrown object, the last native exception code it observed and
//! any pending thread abort.
//!
//! The state is only touched by the owning thread, except during context unload, which
//! takes the allocator's teardown lock and then the thread's state lock.
//!
//! # Last Thrown Object
//!
//! The last thrown object is kept alive through its own handle. Pool members reuse their
//! shared handle; when no handle can be created the last thrown object degrades to the
//! preallocated out-of-memory exception.

pub mod guards;

pub use guards::{CreatingThrowableScope, GcMode, GcModeGuard};

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    dispatch::{
        tracker::{CorruptionSeverity, ExceptionTracker, TrackerThrowable},
        TrackerHandle,
    },
    exception::{PreallocatedPool, RepresentationType, RuntimeException},
    hresult::seh,
    kinds::ExceptionKind,
    runtime::{ContextId, ExceptionRuntime, ObjectAllocator, ObjectHandle, ObjectRef},
    Error, Result,
};

/// Identifies a managed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Creates a thread id. Ids are never zero.
    #[must_use]
    pub fn new(id: u32) -> Self {
        ThreadId(id.max(1))
    }

    /// Returns the raw id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread#{}", self.0)
    }
}

/// Kind of a requested thread abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// Catchable, but re-raised after every catch until reset
    Ordinary,
    /// Never caught
    Rude,
}

/// A handle-pinned throwable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PinnedThrowable {
    pub(crate) object: ObjectRef,
    pub(crate) handle: Option<ObjectHandle>,
    pub(crate) shared: bool,
}

impl PinnedThrowable {
    /// Pins `object`, reusing the pool handle for pool members.
    ///
    /// Falls back to the preallocated out-of-memory exception when no handle can be made.
    pub(crate) fn pin(
        object: ObjectRef,
        allocator: &dyn ObjectAllocator,
        pool: &PreallocatedPool,
    ) -> Self {
        if let Some(handle) = pool.handle_for_object(object) {
            return PinnedThrowable {
                object,
                handle: Some(handle),
                shared: true,
            };
        }

        match allocator.create_handle(object) {
            Ok(handle) => PinnedThrowable {
                object,
                handle: Some(handle),
                shared: false,
            },
            Err(error) => {
                warn!(%error, %object, "no handle for throwable, using out-of-memory");
                let oom = pool.out_of_memory();
                PinnedThrowable {
                    object: oom.object,
                    handle: Some(oom.handle),
                    shared: true,
                }
            }
        }
    }

    /// Destroys the handle unless it belongs to the pool.
    pub(crate) fn release(self, allocator: &dyn ObjectAllocator) -> bool {
        match self.handle {
            Some(handle) if !self.shared => {
                allocator.destroy_handle(handle);
                true
            }
            _ => false,
        }
    }
}

impl From<PinnedThrowable> for TrackerThrowable {
    fn from(pinned: PinnedThrowable) -> Self {
        TrackerThrowable {
            object: pinned.object,
            handle: pinned.handle,
            shared: pinned.shared,
        }
    }
}

impl From<TrackerThrowable> for PinnedThrowable {
    fn from(throwable: TrackerThrowable) -> Self {
        PinnedThrowable {
            object: throwable.object,
            handle: throwable.handle,
            shared: throwable.shared,
        }
    }
}

/// Exception state of one thread.
#[derive(Debug, Default)]
pub struct ThreadExceptionState {
    pub(crate) head: Option<TrackerHandle>,
    pub(crate) last_thrown: Option<PinnedThrowable>,
    pub(crate) last_exception_code: Option<u32>,
    pub(crate) rude_abort_initiated: bool,
    pub(crate) abort_requested: Option<AbortKind>,
    pub(crate) abort_delivered: bool,
    pub(crate) last_active_severity: CorruptionSeverity,
    pub(crate) oom_tracker_in_use: bool,
}

/// A thread attached to the exception runtime.
pub struct ManagedThread {
    id: ThreadId,
    runtime: Arc<ExceptionRuntime>,
    context: ContextId,
    gc_mode: AtomicU8,
    pub(crate) creating: Mutex<Option<RepresentationType>>,
    pub(crate) state: Mutex<ThreadExceptionState>,
    oom_tracker: TrackerHandle,
}

impl ManagedThread {
    /// Creates the thread state and reserves its out-of-memory tracker.
    ///
    /// Use [`ExceptionRuntime::attach_thread`], which also registers the thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if no tracker slot can be reserved.
    pub(crate) fn new(id: ThreadId, runtime: Arc<ExceptionRuntime>, context: ContextId) -> Result<Self> {
        let oom_tracker = runtime.trackers().acquire(id)?;

        Ok(ManagedThread {
            id,
            runtime,
            context,
            gc_mode: AtomicU8::new(GcMode::Preemptive as u8),
            creating: Mutex::new(None),
            state: Mutex::new(ThreadExceptionState::default()),
            oom_tracker,
        })
    }

    /// The thread's id.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The runtime the thread is attached to.
    #[must_use]
    pub fn runtime(&self) -> &Arc<ExceptionRuntime> {
        &self.runtime
    }

    /// The context the thread executes in.
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The current GC mode.
    #[must_use]
    pub fn gc_mode(&self) -> GcMode {
        GcMode::from_u8(self.gc_mode.load(Ordering::Acquire))
    }

    pub(crate) fn swap_gc_mode(&self, mode: GcMode) -> GcMode {
        GcMode::from_u8(self.gc_mode.swap(mode as u8, Ordering::AcqRel))
    }

    /// The representation type a throwable is currently being created for.
    #[must_use]
    pub fn creating_throwable_for(&self) -> Option<RepresentationType> {
        *lock!(self.creating)
    }

    pub(crate) fn oom_tracker(&self) -> TrackerHandle {
        self.oom_tracker
    }

    /// The newest tracker of the chain.
    #[must_use]
    pub fn head_tracker(&self) -> Option<TrackerHandle> {
        lock!(self.state).head
    }

    /// A snapshot of the newest tracker.
    #[must_use]
    pub fn current_tracker(&self) -> Option<ExceptionTracker> {
        let head = self.head_tracker()?;
        self.runtime.trackers().with(head, Clone::clone).ok()
    }

    /// Number of trackers in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        let state = lock!(self.state);
        let trackers = self.runtime.trackers();

        let mut depth = 0;
        let mut cursor = state.head;
        while let Some(handle) = cursor {
            match trackers.with(handle, ExceptionTracker::prev) {
                Ok(prev) => {
                    depth += 1;
                    cursor = prev;
                }
                Err(_) => break,
            }
        }

        depth
    }

    /// Returns `true` once a rude abort has been delivered to the thread.
    #[must_use]
    pub fn is_rude_abort_initiated(&self) -> bool {
        lock!(self.state).rude_abort_initiated
    }

    /// Severity of the last exception that reached a native boundary.
    #[must_use]
    pub fn last_active_severity(&self) -> CorruptionSeverity {
        lock!(self.state).last_active_severity
    }

    /// The last object thrown on this thread.
    #[must_use]
    pub fn last_thrown_object(&self) -> Option<ObjectRef> {
        lock!(self.state).last_thrown.map(|pinned| pinned.object)
    }

    /// Replaces the last thrown object.
    ///
    /// The previous object's handle is released unless it belongs to the pool.
    pub fn set_last_thrown_object(&self, object: Option<ObjectRef>) {
        let allocator = self.runtime.allocator().as_ref();
        let pinned = object.map(|object| PinnedThrowable::pin(object, allocator, self.runtime.pool()));

        let previous = std::mem::replace(&mut lock!(self.state).last_thrown, pinned);
        if let Some(previous) = previous {
            previous.release(allocator);
        }
    }

    /// Forces the last thrown object to the preallocated stack overflow exception.
    pub fn set_so_for_last_thrown_object(&self) {
        self.set_last_thrown_object(Some(self.runtime.pool().stack_overflow().object));
    }

    /// Sets the throwable of the newest tracker and the last thrown object together.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the chain head no longer resolves.
    pub fn safe_set_throwables(&self, object: ObjectRef) -> Result<()> {
        let allocator = self.runtime.allocator().as_ref();
        let pool = self.runtime.pool();

        if let Some(head) = self.head_tracker() {
            let pinned = PinnedThrowable::pin(object, allocator, pool);
            let previous = self
                .runtime
                .trackers()
                .with_mut(head, |tracker| tracker.throwable.replace(pinned.into()));
            match previous {
                Ok(Some(previous)) => {
                    PinnedThrowable::from(previous).release(allocator);
                }
                Ok(None) => {}
                Err(error) => {
                    pinned.release(allocator);
                    return Err(error);
                }
            }
        }

        self.set_last_thrown_object(Some(object));
        Ok(())
    }

    /// The native code of the last exception the thread observed.
    #[must_use]
    pub fn last_exception_code(&self) -> Option<u32> {
        lock!(self.state).last_exception_code
    }

    /// Records the native code of an observed exception.
    pub fn set_last_exception_code(&self, code: u32) {
        lock!(self.state).last_exception_code = Some(code);
    }

    /// Checks the last thrown object against the thread's recorded state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentState`] if the object is missing, lives in another
    /// context, or was raised with a different native code than the one last observed.
    pub fn validate_last_thrown_object(&self) -> Result<()> {
        let (last_thrown, code) = {
            let state = lock!(self.state);
            (state.last_thrown, state.last_exception_code)
        };

        if code == Some(seh::BOOTUP_EXCEPTION_COMPLUS) {
            return Ok(());
        }

        let Some(last_thrown) = last_thrown else {
            return Err(Error::InconsistentState(
                "last thrown object is null".to_string(),
            ));
        };

        let allocator = self.runtime.allocator();
        let pool = self.runtime.pool();
        let object = last_thrown.object;

        if !pool.is_preallocated_object(object) {
            if let Some(context) = allocator.context_of(object) {
                if context != self.context {
                    return Err(Error::InconsistentState(format!(
                        "last thrown object {object} belongs to {context}, thread runs in {}",
                        self.context
                    )));
                }
            }
        }

        if let Some(code) = code {
            let exempt = matches!(
                code,
                seh::EXCEPTION_COMPLUS | seh::EXCEPTION_MSVC | seh::STATUS_UNWIND
            ) || pool
                .rude_thread_abort()
                .is_some_and(|rude| rude.object == object)
                || (object == pool.stack_overflow().object && seh::is_stack_overflow(code));

            if !exempt && allocator.xcode_of(object) != Some(code) {
                return Err(Error::InconsistentState(format!(
                    "last thrown object {object} was not raised with code 0x{code:08X}"
                )));
            }
        }

        Ok(())
    }

    /// Requests an abort of the thread.
    ///
    /// The abort is delivered at the thread's next safe point, see
    /// [`ManagedThread::take_pending_abort`]. A rude request overrides an ordinary one.
    pub fn request_abort(&self, rude: bool) {
        let mut state = lock!(self.state);
        let kind = if rude {
            AbortKind::Rude
        } else {
            AbortKind::Ordinary
        };

        if state.abort_requested != Some(AbortKind::Rude) {
            state.abort_requested = Some(kind);
            state.abort_delivered = false;
        }
        debug!(thread = %self.id, ?kind, "abort requested");
    }

    /// Cancels an ordinary abort.
    ///
    /// # Returns
    ///
    /// `true` if an ordinary abort was cancelled; rude aborts cannot be cancelled.
    pub fn reset_abort(&self) -> bool {
        with_lock!(self.state, |state: &mut ThreadExceptionState| {
            if state.abort_requested == Some(AbortKind::Ordinary) {
                state.abort_requested = None;
                state.abort_delivered = false;
                true
            } else {
                false
            }
        })
    }

    /// Returns the requested abort kind.
    #[must_use]
    pub fn abort_requested(&self) -> Option<AbortKind> {
        lock!(self.state).abort_requested
    }

    /// Delivers a requested abort that has not been delivered yet.
    ///
    /// A rude abort marks the thread as rudely aborting; from then on every throwable the
    /// thread materializes is the rude abort exception.
    pub fn take_pending_abort(&self) -> Option<RuntimeException> {
        let mut state = lock!(self.state);
        let kind = state.abort_requested?;
        if state.abort_delivered {
            return None;
        }

        state.abort_delivered = true;
        if kind == AbortKind::Rude {
            state.rude_abort_initiated = true;
        }

        Some(RuntimeException::kind_only(ExceptionKind::ThreadAbort))
    }

    /// Releases every non-shared throwable handle of this thread that refers into `context`.
    ///
    /// Callers touching another thread hold the allocator's teardown lock.
    ///
    /// # Returns
    ///
    /// The number of handles released.
    pub fn release_context_handles(&self, context: ContextId) -> usize {
        let allocator = self.runtime.allocator().as_ref();
        let trackers = self.runtime.trackers();
        let in_context = |object: ObjectRef| allocator.context_of(object) == Some(context);

        let mut state = lock!(self.state);
        let mut released = 0;

        let mut cursor = state.head;
        while let Some(handle) = cursor {
            let step = trackers.with_mut(handle, |tracker| {
                let throwable = tracker
                    .throwable
                    .filter(|throwable| !throwable.shared && in_context(throwable.object));
                if throwable.is_some() {
                    tracker.throwable = None;
                }
                (throwable, tracker.prev)
            });

            let Ok((throwable, prev)) = step else { break };
            if let Some(throwable) = throwable {
                if PinnedThrowable::from(throwable).release(allocator) {
                    released += 1;
                }
            }
            cursor = prev;
        }

        if let Some(last_thrown) = state.last_thrown {
            if !last_thrown.shared && in_context(last_thrown.object) {
                state.last_thrown = None;
                if last_thrown.release(allocator) {
                    released += 1;
                }
            }
        }

        released
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        let allocator = self.runtime.allocator().as_ref();
        let trackers = self.runtime.trackers();
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut cursor = state.head.take();
        while let Some(handle) = cursor {
            cursor = None;
            let released = if handle == self.oom_tracker {
                trackers.clear(handle)
            } else {
                trackers.release(handle)
            };
            if let Ok(Some(tracker)) = released {
                if let Some(throwable) = tracker.throwable {
                    PinnedThrowable::from(throwable).release(allocator);
                }
                cursor = tracker.prev;
            }
        }

        if let Some(last_thrown) = state.last_thrown.take() {
            last_thrown.release(allocator);
        }

        let _ = trackers.release(self.oom_tracker);
        self.runtime.detach_thread(self.id);
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("gc_mode", &self.gc_mode())
            .finish_non_exhaustive()
    }
}
