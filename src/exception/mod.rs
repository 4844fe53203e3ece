//! Native exceptions and their managed throwables.
//!
//! # Overview
//!
//! Native code inside the runtime does not build managed exception objects directly. It
//! raises a [`RuntimeException`], a lightweight description of what went wrong, and the
//! managed object is produced only when something actually needs it (a catch clause, an
//! error report, an interop boundary). This keeps failure paths cheap and lets the engine
//! report failures even when the managed heap is exhausted.
//!
//! # Key Components
//!
//! - [`RuntimeException`] / [`Representation`] - the closed family of native exceptions
//! - [`PreallocatedPool`] - exceptions created at startup for catastrophic conditions
//! - [`throwable_from_failure`] - converts any [`Error`](crate::Error) into a throwable
//! - [`ComErrorInfo`] / [`FileLoadInfo`] - data of the COM and load failure variants
//!
//! # Example
//!
//! ```rust
//! use clrexc::prelude::*;
//!
//! let runtime = RuntimeBuilder::new().build().unwrap();
//! let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
//!
//! let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation);
//! let first = exception.get_throwable(&thread);
//! assert_eq!(first, exception.get_throwable(&thread));
//! ```

pub mod com;
pub mod fileload;
pub mod preallocated;
pub mod repr;
mod throwable;

pub use com::{ComErrorInfo, RestrictedErrorInfo};
pub use fileload::FileLoadInfo;
pub use preallocated::{Preallocated, PreallocatedPool};
pub use repr::{
    is_interesting_hr, MemberAccess, Representation, RepresentationType, RuntimeException,
    TypeLoadInfo,
};
pub use throwable::throwable_from_failure;
