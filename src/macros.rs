/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut state = lock!(thread.state);
///  state.last_exception_code = Some(code);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for running a closure against a locked item
///
/// ```rust, ignore
///  let head = with_lock!(thread.state, |state| state.head);
/// ```
macro_rules! with_lock {
    ($mutex:expr, $closure:expr) => {{
        let mut guard = $mutex.lock().expect("Failed to acquire lock");
        $closure(&mut *guard)
    }};
}

/// Locks an item on a teardown path, taking the data over from a poisoned lock
///
/// ```rust, ignore
///  *lock_or_recover!(self.thread.creating) = self.previous;
/// ```
macro_rules! lock_or_recover {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}
