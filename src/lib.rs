// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # clrexc
//!
//! The managed exception engine of a CLR-style runtime: how a failure is described before
//! it becomes a managed object, which objects exist ahead of time so that failures can be
//! reported when memory or stack are exhausted, and how an exception travels through the
//! stack in two passes.
//!
//! ## Features
//!
//! - **Closed exception representation** - [`RuntimeException`](exception::RuntimeException)
//!   covers every way the engine describes a failure, from a bare kind to COM error info
//! - **Lazy throwables** - managed exception objects are created on first use and cached
//! - **Preallocated pool** - out-of-memory, stack overflow and abort exceptions that never
//!   need an allocation
//! - **Two-pass dispatch** - handler search, unwinding, nested exception merging and the
//!   corrupted state policy
//! - **Status code tables** - bit-exact HRESULT and SEH code classification
//!
//! ## Quick Start
//!
//! ```rust
//! use clrexc::prelude::*;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let thread = runtime.attach_thread(ContextId::DEFAULT)?;
//!
//! let exception = RuntimeException::with_resource(
//!     ExceptionKind::Argument,
//!     ResourceId::INVALID_ARGUMENT_VALUE,
//!     &["count"],
//! );
//! assert_eq!(exception.get_hr(&thread), hr::COR_E_ARGUMENT);
//!
//! let throwable = exception.get_throwable(&thread);
//! assert_eq!(exception.get_throwable(&thread), throwable);
//! # Ok::<(), clrexc::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`hresult`] and [`kinds`] - status codes and their classification into exception kinds
//! - [`exception`] - the exception representation, throwable creation and the pool
//! - [`runtime`] - the collaborators the engine consumes and [`runtime::ExceptionRuntime`]
//! - [`thread`] - per-thread exception state and scoped GC mode guards
//! - [`dispatch`] - trackers, their allocator and the two-pass protocol
//! - [`config`] - runtime knobs
//!
//! ## Logging
//!
//! The crate logs through [`tracing`](https://docs.rs/tracing) and never installs a
//! subscriber. Tracker lifecycle events are logged at `debug`, per-frame decisions at
//! `trace`, degraded paths at `warn`.

#[macro_use]
extern crate tracing;

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

pub mod config;
pub mod dispatch;
pub mod exception;
pub mod hresult;
pub mod kinds;
pub mod runtime;
pub mod thread;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use clrexc::prelude::*;
///
/// let runtime = RuntimeBuilder::new().build()?;
/// assert!(runtime.pool().is_preallocated_object(runtime.pool().out_of_memory().object));
/// # Ok::<(), clrexc::Error>(())
/// ```
pub mod prelude;

/// `clrexc` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `clrexc` Error type
///
/// # Examples
///
/// ```rust
/// use clrexc::{hresult::hr, Error};
///
/// assert_eq!(Error::OutOfMemory.hresult(), hr::E_OUTOFMEMORY);
/// ```
pub use error::Error;

/// Runtime configuration, see [`config::RuntimeConfig`].
pub use config::RuntimeConfig;
