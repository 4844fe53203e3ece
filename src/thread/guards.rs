//! Scoped per-thread modes.

use std::fmt;

use crate::{exception::RepresentationType, thread::ManagedThread};

/// Garbage collector cooperation mode of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GcMode {
    /// The collector may run at any time; managed references must not be touched
    Preemptive = 0,
    /// The collector waits for the thread; managed references may be used
    Cooperative = 1,
}

impl GcMode {
    pub(crate) fn from_u8(value: u8) -> Self {
        if value == GcMode::Cooperative as u8 {
            GcMode::Cooperative
        } else {
            GcMode::Preemptive
        }
    }
}

impl fmt::Display for GcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcMode::Preemptive => write!(f, "preemptive"),
            GcMode::Cooperative => write!(f, "cooperative"),
        }
    }
}

/// Switches a thread's GC mode for the lifetime of the guard.
///
/// The previous mode is restored on drop, including during unwinding.
///
/// ```rust, ignore
/// let _cooperative = GcModeGuard::cooperative(thread);
/// let object = allocator.allocate(&ty, thread.context())?;
/// ```
#[must_use = "the mode is restored as soon as the guard is dropped"]
pub struct GcModeGuard<'a> {
    thread: &'a ManagedThread,
    previous: GcMode,
}

impl<'a> GcModeGuard<'a> {
    /// Enters cooperative mode.
    pub fn cooperative(thread: &'a ManagedThread) -> Self {
        Self::enter(thread, GcMode::Cooperative)
    }

    /// Enters preemptive mode.
    pub fn preemptive(thread: &'a ManagedThread) -> Self {
        Self::enter(thread, GcMode::Preemptive)
    }

    fn enter(thread: &'a ManagedThread, mode: GcMode) -> Self {
        let previous = thread.swap_gc_mode(mode);
        GcModeGuard { thread, previous }
    }
}

impl Drop for GcModeGuard<'_> {
    fn drop(&mut self) {
        self.thread.swap_gc_mode(self.previous);
    }
}

/// Marks the thread as creating a throwable for one kind of representation.
///
/// Nested scopes restore the marker of the enclosing scope on drop.
#[must_use = "the marker is cleared as soon as the scope is dropped"]
pub struct CreatingThrowableScope<'a> {
    thread: &'a ManagedThread,
    previous: Option<RepresentationType>,
}

impl<'a> CreatingThrowableScope<'a> {
    /// Sets the marker to `repr`.
    pub fn enter(thread: &'a ManagedThread, repr: RepresentationType) -> Self {
        let previous = lock!(thread.creating).replace(repr);
        CreatingThrowableScope { thread, previous }
    }
}

impl Drop for CreatingThrowableScope<'_> {
    fn drop(&mut self) {
        *lock_or_recover!(self.thread.creating) = self.previous;
    }
}
