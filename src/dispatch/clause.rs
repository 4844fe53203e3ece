//! Protected regions of managed methods.
//!
//! Each managed frame reports the exception clauses of its method in declaration order,
//! innermost regions first. Dispatch searches them in that order during the first pass and
//! runs the cleanup clauses in the same order during the second pass.
//!
//! # Layout in IL
//!
//! ```text
//! try {
//!     // try_offset -> try_offset + try_length
//! }
//! catch (CatchType) {
//!     // handler_offset -> handler_offset + handler_length
//! }
//! ```

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Flags defining the type of an exception clause.
    ///
    /// The values match the `Flags` field of the method body's exception section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionClauseFlags: u16 {
        /// A typed catch clause; `catch_type` holds the caught type.
        const EXCEPTION = 0x0000;
        /// A filter clause; the filter decides whether the handler runs.
        const FILTER = 0x0001;
        /// A finally clause, run on every exit from the protected region.
        const FINALLY = 0x0002;
        /// A fault clause, run only when an exception leaves the protected region.
        const FAULT = 0x0004;
    }
}

/// Identifies a managed method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method(0x{:08X})", self.0)
    }
}

/// Metadata token of the type a catch clause accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeToken(pub u32);

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// One protected region with its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionClause {
    /// Type of the clause
    pub flags: ExceptionClauseFlags,
    /// Offset of the protected region from the start of the method body
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Offset of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Type accepted by a catch clause
    pub catch_type: Option<TypeToken>,
    /// Offset of the filter of a filter clause
    pub filter_offset: u32,
}

impl ExceptionClause {
    fn new(flags: ExceptionClauseFlags, try_range: (u32, u32), handler: (u32, u32)) -> Self {
        ExceptionClause {
            flags,
            try_offset: try_range.0,
            try_length: try_range.1,
            handler_offset: handler.0,
            handler_length: handler.1,
            catch_type: None,
            filter_offset: 0,
        }
    }

    /// A catch clause for `catch_type`.
    ///
    /// # Arguments
    ///
    /// * `try_range` - `(offset, length)` of the protected region
    /// * `handler` - `(offset, length)` of the handler
    /// * `catch_type` - The accepted type
    #[must_use]
    pub fn catch(try_range: (u32, u32), handler: (u32, u32), catch_type: TypeToken) -> Self {
        ExceptionClause {
            catch_type: Some(catch_type),
            ..Self::new(ExceptionClauseFlags::EXCEPTION, try_range, handler)
        }
    }

    /// A filter clause whose filter starts at `filter_offset`.
    #[must_use]
    pub fn filter(try_range: (u32, u32), handler: (u32, u32), filter_offset: u32) -> Self {
        ExceptionClause {
            filter_offset,
            ..Self::new(ExceptionClauseFlags::FILTER, try_range, handler)
        }
    }

    /// A finally clause.
    #[must_use]
    pub fn finally(try_range: (u32, u32), handler: (u32, u32)) -> Self {
        Self::new(ExceptionClauseFlags::FINALLY, try_range, handler)
    }

    /// A fault clause.
    #[must_use]
    pub fn fault(try_range: (u32, u32), handler: (u32, u32)) -> Self {
        Self::new(ExceptionClauseFlags::FAULT, try_range, handler)
    }

    /// Returns `true` if the protected region contains `offset`.
    #[must_use]
    pub fn covers(&self, offset: u32) -> bool {
        offset >= self.try_offset && offset - self.try_offset < self.try_length
    }

    /// Returns `true` if the handler contains `offset`.
    #[must_use]
    pub fn handler_covers(&self, offset: u32) -> bool {
        offset >= self.handler_offset && offset - self.handler_offset < self.handler_length
    }

    /// First offset after the handler, where execution resumes after a catch.
    #[must_use]
    pub fn handler_end(&self) -> u32 {
        self.handler_offset + self.handler_length
    }

    /// Returns `true` for typed catch clauses.
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionClauseFlags::EXCEPTION
    }

    /// Returns `true` for filter clauses.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionClauseFlags::FILTER)
    }

    /// Returns `true` for finally and fault clauses.
    #[must_use]
    pub fn is_cleanup(&self) -> bool {
        self.flags
            .intersects(ExceptionClauseFlags::FINALLY | ExceptionClauseFlags::FAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage() {
        let clause = ExceptionClause::catch((0x10, 0x20), (0x30, 0x08), TypeToken(0x0200_0001));
        assert!(clause.covers(0x10));
        assert!(clause.covers(0x2F));
        assert!(!clause.covers(0x30));
        assert!(!clause.covers(0x0F));
        assert!(clause.handler_covers(0x34));
        assert_eq!(clause.handler_end(), 0x38);
    }

    #[test]
    fn test_kinds() {
        let catch = ExceptionClause::catch((0, 1), (1, 1), TypeToken(1));
        assert!(catch.is_catch() && !catch.is_filter() && !catch.is_cleanup());

        let filter = ExceptionClause::filter((0, 1), (2, 1), 1);
        assert!(filter.is_filter() && !filter.is_catch());
        assert_eq!(filter.filter_offset, 1);

        assert!(ExceptionClause::finally((0, 1), (1, 1)).is_cleanup());
        assert!(ExceptionClause::fault((0, 1), (1, 1)).is_cleanup());
    }
}
