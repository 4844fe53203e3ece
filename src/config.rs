//! Runtime configuration for exception dispatch.
//!
//! This module provides [`RuntimeConfig`], the knobs that change how the engine classifies
//! and propagates exceptions. The configuration is read once when the
//! [`ExceptionRuntime`](crate::runtime::ExceptionRuntime) is built and is immutable
//! afterwards.
//!
//! # Configuration Sources
//!
//! - [`RuntimeConfig::default()`] - Modern policy, no WinRT classification
//! - [`RuntimeConfig::legacy()`] - Pre-CSE behavior: corrupted-state exceptions are
//!   delivered to every handler and never auto-rethrown at boundaries
//! - [`RuntimeConfig::from_env()`] - Reads the `DOTNET_` / `COMPlus_` prefixed knobs the
//!   host environment sets
//!
//! # Example
//!
//! ```rust
//! use clrexc::RuntimeConfig;
//!
//! let config = RuntimeConfig::default()
//!     .with_winrt(true)
//!     .with_tracker_slots_per_page(8);
//! assert!(config.winrt);
//! ```

/// Configuration of the exception engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Deliver corrupted-state exceptions to every handler and never rethrow them at
    /// native boundaries.
    pub legacy_corrupted_state_policy: bool,

    /// Suppress the diagnostic emitted when the last-thrown-object validator finds an
    /// inconsistency.
    pub suppress_lost_exception_type_assert: bool,

    /// Classify status codes with the WinRT-only table first, and default unknown codes
    /// to `System.Exception` instead of `COMException`.
    pub winrt: bool,

    /// Create a dedicated RudeThreadAbort object at startup. Hosts that do not escalate
    /// aborts leave it out, and rude aborts then surface as the ordinary ThreadAbort.
    pub preallocate_rude_thread_abort: bool,

    /// Treat stack overflow as a process-corrupting condition.
    pub stack_overflow_is_corrupting: bool,

    /// Number of tracker slots in each allocator page.
    pub tracker_slots_per_page: usize,

    /// Maximum number of allocator pages; acquisition beyond this fails with
    /// out-of-memory and falls back to the thread's reserved tracker.
    pub max_tracker_pages: usize,

    /// Access violations below this address are reported as null dereferences.
    pub null_page_limit: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            legacy_corrupted_state_policy: false,
            suppress_lost_exception_type_assert: false,
            winrt: false,
            preallocate_rude_thread_abort: true,
            stack_overflow_is_corrupting: true,
            tracker_slots_per_page: 32,
            max_tracker_pages: 64,
            null_page_limit: 0x1_0000,
        }
    }
}

impl RuntimeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration matching the legacy corrupted-state policy.
    #[must_use]
    pub fn legacy() -> Self {
        Self::default().with_legacy_corrupted_state_policy(true)
    }

    /// Builds a configuration from environment knobs.
    ///
    /// Each knob is looked up with the `DOTNET_` prefix first and the `COMPlus_` prefix
    /// second. Values are parsed as hexadecimal, matching how the runtime reads DWORD
    /// configuration. Unset or unparsable knobs keep their default.
    ///
    /// | Knob | Field |
    /// |------|-------|
    /// | `legacyCorruptedStateExceptionsPolicy` | `legacy_corrupted_state_policy` |
    /// | `SuppressLostExceptionTypeAssert` | `suppress_lost_exception_type_assert` |
    /// | `EnableWinRT` | `winrt` |
    /// | `ExceptionTrackerPageSlots` | `tracker_slots_per_page` |
    /// | `ExceptionTrackerMaxPages` | `max_tracker_pages` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = knob("legacyCorruptedStateExceptionsPolicy") {
            config.legacy_corrupted_state_policy = value != 0;
        }
        if let Some(value) = knob("SuppressLostExceptionTypeAssert") {
            config.suppress_lost_exception_type_assert = value != 0;
        }
        if let Some(value) = knob("EnableWinRT") {
            config.winrt = value != 0;
        }
        if let Some(value) = knob("ExceptionTrackerPageSlots") {
            if value > 0 {
                config.tracker_slots_per_page = value as usize;
            }
        }
        if let Some(value) = knob("ExceptionTrackerMaxPages") {
            if value > 0 {
                config.max_tracker_pages = value as usize;
            }
        }

        config
    }

    /// Sets the legacy corrupted-state policy.
    #[must_use]
    pub fn with_legacy_corrupted_state_policy(mut self, enabled: bool) -> Self {
        self.legacy_corrupted_state_policy = enabled;
        self
    }

    /// Suppresses last-thrown-object diagnostics.
    #[must_use]
    pub fn with_suppress_lost_exception_type_assert(mut self, suppress: bool) -> Self {
        self.suppress_lost_exception_type_assert = suppress;
        self
    }

    /// Enables WinRT status-code classification.
    #[must_use]
    pub fn with_winrt(mut self, enabled: bool) -> Self {
        self.winrt = enabled;
        self
    }

    /// Controls whether a RudeThreadAbort object is preallocated.
    #[must_use]
    pub fn with_rude_thread_abort(mut self, preallocate: bool) -> Self {
        self.preallocate_rude_thread_abort = preallocate;
        self
    }

    /// Controls whether stack overflow counts as process corrupting.
    #[must_use]
    pub fn with_stack_overflow_corrupting(mut self, corrupting: bool) -> Self {
        self.stack_overflow_is_corrupting = corrupting;
        self
    }

    /// Sets the number of slots per tracker page. Values below one are clamped to one.
    #[must_use]
    pub fn with_tracker_slots_per_page(mut self, slots: usize) -> Self {
        self.tracker_slots_per_page = slots.max(1);
        self
    }

    /// Sets the maximum number of tracker pages.
    #[must_use]
    pub fn with_max_tracker_pages(mut self, pages: usize) -> Self {
        self.max_tracker_pages = pages;
        self
    }

    /// Sets the null page limit used for access violation classification.
    #[must_use]
    pub fn with_null_page_limit(mut self, limit: u64) -> Self {
        self.null_page_limit = limit;
        self
    }
}

fn knob(name: &str) -> Option<u32> {
    ["DOTNET_", "COMPlus_"].iter().find_map(|prefix| {
        let value = std::env::var(format!("{prefix}{name}")).ok()?;
        parse_dword(&value)
    })
}

fn parse_dword(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(!config.legacy_corrupted_state_policy);
        assert!(config.preallocate_rude_thread_abort);
        assert!(config.stack_overflow_is_corrupting);
        assert_eq!(config.null_page_limit, 0x1_0000);
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::legacy()
            .with_winrt(true)
            .with_tracker_slots_per_page(0)
            .with_max_tracker_pages(2);
        assert!(config.legacy_corrupted_state_policy);
        assert!(config.winrt);
        assert_eq!(config.tracker_slots_per_page, 1);
        assert_eq!(config.max_tracker_pages, 2);
    }

    #[test]
    fn test_parse_dword() {
        assert_eq!(parse_dword("1"), Some(1));
        assert_eq!(parse_dword("0x10"), Some(16));
        assert_eq!(parse_dword(" ff "), Some(255));
        assert_eq!(parse_dword("nope"), None);
    }
}
