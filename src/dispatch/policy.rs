//! Corrupted state exception policy.
//!
//! Faults such as access violations may leave the process in a state no ordinary handler
//! can reason about. Unless the legacy policy is configured, such exceptions are only
//! delivered to methods that opted into handling corrupted state, and are rethrown when
//! they reach a native boundary.

use crate::{
    config::RuntimeConfig,
    dispatch::{frame::FrameFlags, tracker::CorruptionSeverity},
    hresult::seh,
};

/// Classifies a new exception.
///
/// A rethrow inherits the severity of the exception it rethrows, as long as that one was
/// classified; everything else is classified from its native code.
///
/// # Arguments
///
/// * `code` - Native exception code
/// * `rethrow_of` - Severity of the rethrown exception, if this is a rethrow
/// * `config` - Supplies whether stack overflow counts as corrupting
#[must_use]
pub fn initial_severity(
    code: u32,
    rethrow_of: Option<CorruptionSeverity>,
    config: &RuntimeConfig,
) -> CorruptionSeverity {
    match rethrow_of {
        Some(severity) if severity != CorruptionSeverity::NotSet => severity,
        _ if seh::is_process_corrupting(code, config.stack_overflow_is_corrupting) => {
            CorruptionSeverity::ProcessCorrupting
        }
        _ => CorruptionSeverity::NotCorrupting,
    }
}

/// Returns `true` if a method with `flags` may see an exception of `severity`.
#[must_use]
pub fn can_method_handle(
    severity: CorruptionSeverity,
    flags: FrameFlags,
    config: &RuntimeConfig,
) -> bool {
    config.legacy_corrupted_state_policy
        || !severity.is_corrupting()
        || flags.contains(FrameFlags::HANDLES_CORRUPTED_STATE)
}

/// Decides whether an exception caught at a native boundary must be rethrown.
///
/// # Arguments
///
/// * `code` - Native code of the exception reaching the boundary
/// * `caught_foreign` - The preceding catch at this boundary caught a managed or foreign
///   exception type
/// * `last_active` - Severity of the thread's last active exception
/// * `config` - Supplies the legacy policy switch
#[must_use]
pub fn should_rethrow_at_boundary(
    code: u32,
    caught_foreign: bool,
    last_active: CorruptionSeverity,
    config: &RuntimeConfig,
) -> bool {
    if config.legacy_corrupted_state_policy {
        return false;
    }

    seh::is_process_corrupting(code, config.stack_overflow_is_corrupting)
        || (caught_foreign && last_active.is_corrupting())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_severity() {
        let config = RuntimeConfig::default();
        assert_eq!(
            initial_severity(seh::STATUS_ACCESS_VIOLATION, None, &config),
            CorruptionSeverity::ProcessCorrupting
        );
        assert_eq!(
            initial_severity(seh::EXCEPTION_COMPLUS, None, &config),
            CorruptionSeverity::NotCorrupting
        );
        assert_eq!(
            initial_severity(
                seh::EXCEPTION_COMPLUS,
                Some(CorruptionSeverity::ProcessCorrupting),
                &config
            ),
            CorruptionSeverity::ProcessCorrupting
        );
        assert_eq!(
            initial_severity(
                seh::STATUS_ACCESS_VIOLATION,
                Some(CorruptionSeverity::NotSet),
                &config
            ),
            CorruptionSeverity::ProcessCorrupting
        );
    }

    #[test]
    fn test_stack_overflow_severity() {
        let config = RuntimeConfig::default().with_stack_overflow_corrupting(false);
        assert_eq!(
            initial_severity(seh::STATUS_STACK_OVERFLOW, None, &config),
            CorruptionSeverity::NotCorrupting
        );
    }

    #[test]
    fn test_can_method_handle() {
        let config = RuntimeConfig::default();
        let corrupting = CorruptionSeverity::ProcessCorrupting;

        assert!(!can_method_handle(corrupting, FrameFlags::empty(), &config));
        assert!(can_method_handle(
            corrupting,
            FrameFlags::HANDLES_CORRUPTED_STATE,
            &config
        ));
        assert!(can_method_handle(
            CorruptionSeverity::NotCorrupting,
            FrameFlags::empty(),
            &config
        ));
        assert!(can_method_handle(
            corrupting,
            FrameFlags::empty(),
            &RuntimeConfig::legacy()
        ));
    }

    #[test]
    fn test_boundary_rethrow() {
        let config = RuntimeConfig::default();
        assert!(should_rethrow_at_boundary(
            seh::STATUS_ACCESS_VIOLATION,
            false,
            CorruptionSeverity::NotSet,
            &config
        ));
        assert!(should_rethrow_at_boundary(
            seh::EXCEPTION_COMPLUS,
            true,
            CorruptionSeverity::ProcessCorrupting,
            &config
        ));
        assert!(!should_rethrow_at_boundary(
            seh::EXCEPTION_COMPLUS,
            false,
            CorruptionSeverity::ProcessCorrupting,
            &config
        ));
        assert!(!should_rethrow_at_boundary(
            seh::STATUS_ACCESS_VIOLATION,
            true,
            CorruptionSeverity::ProcessCorrupting,
            &RuntimeConfig::legacy()
        ));
    }
}
