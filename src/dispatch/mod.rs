//! Two-pass exception dispatch and exception tracking.
//!
//! # Overview
//!
//! Dispatch follows the structured exception handling model of the platform: a first pass
//! walks the stack from the faulting frame towards the caller searching for a handler, a
//! second pass walks the same frames again unwinding them and running cleanup handlers,
//! until it reaches the handler the first pass chose.
//!
//! Each in-flight exception is described by an [`ExceptionTracker`]. Trackers are stored in
//! the process-wide [`TrackerAllocator`] and referenced through generation-checked
//! [`TrackerHandle`]s; the trackers of one thread form a chain, newest first.
//!
//! # Components
//!
//! - [`clause`] - exception clauses of a method body
//! - [`frame`] - exception records and the frames the stack walker reports
//! - [`stack`] - stack pointers and scanned stack ranges
//! - [`tracker`] - the tracker, its lifecycle and flags
//! - [`allocator`] - slab storage for trackers
//! - [`policy`] - corrupted state exception policy
//! - [`protocol`] - the [`ExceptionDispatcher`] driving both passes

pub mod allocator;
pub mod clause;
pub mod frame;
pub mod policy;
pub mod protocol;
pub mod stack;
pub mod tracker;

pub use allocator::{TrackerAllocator, TrackerHandle};
pub use clause::{ExceptionClause, ExceptionClauseFlags, MethodId, TypeToken};
pub use frame::{ExceptionRecord, ExplicitFrame, FrameFlags, FrameInfo, FrameKind};
pub use protocol::{
    BoundaryOutcome, DispatchOutcome, ExceptionDispatcher, FrameDisposition, FuncletInvoker,
};
pub use stack::{StackFrame, StackRange};
pub use tracker::{ChosenHandler, CorruptionSeverity, ExceptionTracker, TrackerFlags, TrackerState};
