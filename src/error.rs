use thiserror::Error;

use crate::{
    dispatch::TrackerState,
    exception::RuntimeException,
    hresult::{hr, HResult},
};

/// Wraps a [`RuntimeException`] into [`Error::Raised`].
///
/// ```rust, ignore
/// return Err(raised!(RuntimeException::kind_only(ExceptionKind::InvalidOperation)));
/// ```
macro_rules! raised {
    ($exception:expr) => {
        crate::Error::Raised(Box::new($exception))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Two different families of failures travel through this type. The first are *managed*
/// failures: conditions that a caller inside the runtime would observe as an exception
/// (out of memory, a thread abort, or an arbitrary [`RuntimeException`] raised by a
/// collaborator). These are converted back into throwables by
/// [`throwable_from_failure`](crate::exception::throwable_from_failure) and never escape
/// the public representation operations. The second family are contract violations of
/// the dispatch protocol (stale tracker handles, invalid state transitions), which are
/// returned to the native walker driving the dispatch.
///
/// # Error Categories
///
/// ## Managed Failures
/// - [`Error::OutOfMemory`] - An allocation could not be satisfied
/// - [`Error::StackOverflow`] - The thread ran out of stack
/// - [`Error::ThreadAbort`] - An ordinary thread abort was delivered
/// - [`Error::Raised`] - A collaborator raised a managed exception
/// - [`Error::Hr`] - A collaborator failed with a bare status code
///
/// ## Collaborator Errors
/// - [`Error::InvalidHandle`] - An object handle did not resolve
/// - [`Error::ResourceNotFound`] - A message resource does not exist
/// - [`Error::TypeLoad`] - An exception type could not be resolved
///
/// ## Dispatch Errors
/// - [`Error::StaleTracker`] - A tracker handle outlived its slot
/// - [`Error::InvalidTransition`] - A tracker was moved through an illegal state change
/// - [`Error::InconsistentState`] - The protocol was driven out of order
/// - [`Error::FatalExecutionEngine`] - No safe continuation exists
///
/// # Examples
///
/// ```rust
/// use clrexc::{Error, hresult::hr};
///
/// let err = Error::OutOfMemory;
/// assert_eq!(err.hresult(), hr::E_OUTOFMEMORY);
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Managed failures
    /// An allocation failed.
    ///
    /// Raised by [`ObjectAllocator`](crate::runtime::ObjectAllocator) implementations when the
    /// heap (or the tracker allocator) cannot satisfy a request.
    #[error("Insufficient memory to continue the execution of the program")]
    OutOfMemory,

    /// The thread ran out of stack while executing.
    #[error("Operation caused a stack overflow")]
    StackOverflow,

    /// An ordinary thread abort was delivered while the operation was running.
    #[error("Thread was being aborted")]
    ThreadAbort,

    /// A managed exception was raised while performing the operation.
    ///
    /// The boxed representation is materialized lazily, which allows collaborators to raise
    /// exceptions without touching the managed heap.
    #[error("Exception raised - {0}")]
    Raised(Box<RuntimeException>),

    /// A collaborator failed with a bare status code.
    #[error("Operation failed with HRESULT {0}")]
    Hr(HResult),

    // Collaborator errors
    /// An object handle did not resolve to a live object.
    #[error("Invalid object handle")]
    InvalidHandle,

    /// A message resource could not be found.
    #[error("Resource not found - {0}")]
    ResourceNotFound(String),

    /// An exception type could not be resolved to a runtime type.
    #[error("Failed to resolve type - {0}")]
    TypeLoad(String),

    /// A transient failure was offered as the inner exception of a load failure.
    ///
    /// Transient conditions (out of memory, thread aborts) must not be cached inside a
    /// load failure, since retrying the load could succeed.
    #[error("Transient failure {0} can not be used as an inner exception")]
    TransientInnerException(HResult),

    // Dispatch errors
    /// A tracker handle no longer refers to a live tracker.
    ///
    /// The slot it referred to has been released and possibly reused.
    #[error("Stale exception tracker handle")]
    StaleTracker,

    /// A tracker was asked to perform an illegal state transition.
    #[error("Invalid tracker transition from {from} to {to}")]
    InvalidTransition {
        /// The state the tracker was in
        from: TrackerState,
        /// The requested state
        to: TrackerState,
    },

    /// The runtime was used before its startup phase completed.
    #[error("The exception runtime has not been initialized")]
    NotInitialized,

    /// A condition from which no safe continuation exists.
    #[error("Fatal execution engine error - {0}")]
    FatalExecutionEngine(String),

    /// The dispatch protocol was driven out of order, or a stack walk was attempted while
    /// the thread's exception state is being updated.
    #[error("Inconsistent exception state - {0}")]
    InconsistentState(String),

    /// Failed to lock target
    #[error("Failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns the status code used to classify this failure.
    ///
    /// This is the code a caller would observe in the `HResult` field of the throwable
    /// produced for this failure.
    #[must_use]
    pub fn hresult(&self) -> HResult {
        match self {
            Error::OutOfMemory => hr::E_OUTOFMEMORY,
            Error::StackOverflow => hr::COR_E_STACKOVERFLOW,
            Error::ThreadAbort => hr::COR_E_THREADABORTED,
            Error::Raised(exception) => exception.known_hr().unwrap_or(hr::E_FAIL),
            Error::Hr(code) => *code,
            Error::InvalidHandle => hr::E_HANDLE,
            Error::ResourceNotFound(_) => hr::COR_E_MISSINGMANIFESTRESOURCE,
            Error::TypeLoad(_) => hr::COR_E_TYPELOAD,
            Error::TransientInnerException(_) => hr::E_INVALIDARG,
            Error::StaleTracker | Error::InvalidTransition { .. } => hr::COR_E_INVALIDOPERATION,
            Error::FatalExecutionEngine(_) => hr::COR_E_EXECUTIONENGINE,
            Error::NotInitialized | Error::InconsistentState(_) => hr::E_UNEXPECTED,
            Error::LockError | Error::Error(_) => hr::E_FAIL,
        }
    }
}
