//! # clrexc Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the clrexc library. Import this module to get quick access to everything needed to
//! start a runtime, describe exceptions and dispatch them.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrexc operations
pub use crate::Error;

/// The result type used throughout clrexc
pub use crate::Result;

/// Runtime configuration knobs
pub use crate::RuntimeConfig;

// ================================================================================================
// Status Codes and Classification
// ================================================================================================

/// HRESULT newtype and the well-known codes
pub use crate::hresult::{hr, seh, HResult};

/// Exception kinds and their classification
pub use crate::kinds::{hr_from_kind, kind_from_hr, ExceptionKind};

// ================================================================================================
// Runtime and Collaborators
// ================================================================================================

/// The process-wide engine and its builder
pub use crate::runtime::{ExceptionRuntime, RuntimeBuilder};

/// Object model shared with the garbage-collected heap
pub use crate::runtime::{
    ContextId, CtorArg, ExceptionField, ObjectAllocator, ObjectHandle, ObjectRef, RuntimeType,
};

/// Collaborator traits and their reference implementations
pub use crate::runtime::{
    CoreTypeTable, DispatchNotifications, ExceptionHeap, NullNotifications, ResourceId,
    ResourceLoader, StackOverflowAction, StackOverflowPolicy, StringTable,
    TerminateOnStackOverflow, TypeResolver,
};

// ================================================================================================
// Exception Representation
// ================================================================================================

/// The exception representation and its payloads
pub use crate::exception::{
    throwable_from_failure, ComErrorInfo, FileLoadInfo, MemberAccess, Preallocated,
    PreallocatedPool, Representation, RepresentationType, RestrictedErrorInfo,
    RuntimeException, TypeLoadInfo,
};

// ================================================================================================
// Threads
// ================================================================================================

/// Managed threads and scoped guards
pub use crate::thread::{
    AbortKind, CreatingThrowableScope, GcMode, GcModeGuard, ManagedThread, ThreadId,
};

// ================================================================================================
// Dispatch
// ================================================================================================

/// Frames, clauses and stack positions reported by the stack walker
pub use crate::dispatch::{
    ExceptionClause, ExceptionClauseFlags, ExceptionRecord, ExplicitFrame, FrameFlags,
    FrameInfo, FrameKind, MethodId, StackFrame, StackRange, TypeToken,
};

/// The two-pass protocol
pub use crate::dispatch::{
    BoundaryOutcome, DispatchOutcome, ExceptionDispatcher, FrameDisposition, FuncletInvoker,
};

/// Trackers and their storage
pub use crate::dispatch::{
    CorruptionSeverity, ExceptionTracker, TrackerAllocator, TrackerFlags, TrackerHandle,
    TrackerState,
};
