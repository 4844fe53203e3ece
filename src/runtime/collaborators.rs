//! Collaborator traits the engine calls out to, and their trivial implementations.
//!
//! - [`TypeResolver`] - turns an [`ExceptionKind`] into a [`RuntimeType`]
//! - [`DispatchNotifications`] - debugger / profiler notification sink
//! - [`StackOverflowPolicy`] - decides what happens after a stack overflow

use crate::{
    dispatch::{MethodId, StackFrame},
    kinds::ExceptionKind,
    runtime::object::{ObjectRef, RuntimeType},
    thread::ThreadId,
    Result,
};

/// Resolves exception kinds to runtime types.
///
/// Core kinds are looked up in the core library's type table; kinds hosted by framework
/// assemblies go through a loader that may fail when the assembly is unavailable.
pub trait TypeResolver: Send + Sync {
    /// Resolves a kind hosted by the core library.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeLoad`](crate::Error::TypeLoad) when the kind is not a core kind.
    fn core_type(&self, kind: ExceptionKind) -> Result<RuntimeType>;

    /// Resolves a kind hosted by a framework assembly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeLoad`](crate::Error::TypeLoad) when the hosting assembly cannot be
    /// loaded.
    fn framework_type(&self, kind: ExceptionKind) -> Result<RuntimeType>;

    /// Resolves any kind through the table appropriate for it.
    ///
    /// # Errors
    ///
    /// Propagates the error of the underlying lookup.
    fn resolve(&self, kind: ExceptionKind) -> Result<RuntimeType> {
        if kind.is_core() {
            self.core_type(kind)
        } else {
            self.framework_type(kind)
        }
    }
}

/// Notification sink for dispatch events.
///
/// Every method has an empty default so sinks only implement what they observe.
#[allow(unused_variables)]
pub trait DispatchNotifications: Send + Sync {
    /// The first pass located its target (or gave up); delivered once per exception.
    fn first_chance(&self, thread: ThreadId, throwable: Option<ObjectRef>) {}

    /// The second pass is about to start unwinding.
    fn unwind_begin(&self, thread: ThreadId, throwable: Option<ObjectRef>) {}

    /// A catch handler in `method` is about to receive the exception.
    fn exception_caught(&self, thread: ThreadId, method: MethodId, throwable: Option<ObjectRef>) {}

    /// No handler accepted the exception.
    fn unhandled(&self, thread: ThreadId, throwable: Option<ObjectRef>) {}
}

/// A [`DispatchNotifications`] that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifications;

impl DispatchNotifications for NullNotifications {}

/// Outcome of the stack overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOverflowAction {
    /// Terminate the process.
    Terminate,
    /// Unwind to the host without running any managed handler.
    UnwindToHost,
}

/// Process-level policy invoked instead of handler search on stack overflow.
pub trait StackOverflowPolicy: Send + Sync {
    /// Decides how to proceed after `thread` overflowed its stack at `frame`.
    fn handle_stack_overflow(&self, thread: ThreadId, frame: StackFrame) -> StackOverflowAction;
}

/// The default [`StackOverflowPolicy`]: the process terminates.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminateOnStackOverflow;

impl StackOverflowPolicy for TerminateOnStackOverflow {
    fn handle_stack_overflow(&self, thread: ThreadId, frame: StackFrame) -> StackOverflowAction {
        error!(%thread, %frame, "stack overflow, terminating process");
        StackOverflowAction::Terminate
    }
}
