//! What the stack walker reports to dispatch.

use bitflags::bitflags;

use crate::{
    dispatch::{
        clause::{ExceptionClause, MethodId},
        stack::StackFrame,
    },
    hresult::seh,
};

/// A native exception record as raised by the OS or the runtime.
///
/// The `id` identifies one exception occurrence; every frame notification for the same
/// occurrence carries the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// Identity of the occurrence
    pub id: u64,
    /// Native exception code
    pub code: u32,
    /// Faulting data address for access violations
    pub fault_address: Option<u64>,
    /// Raised by the runtime on behalf of managed code
    pub thrown_by_runtime: bool,
}

impl ExceptionRecord {
    /// A managed exception raised by the runtime.
    #[must_use]
    pub fn managed(id: u64) -> Self {
        ExceptionRecord {
            id,
            code: seh::EXCEPTION_COMPLUS,
            fault_address: None,
            thrown_by_runtime: true,
        }
    }

    /// A native fault.
    #[must_use]
    pub fn native(id: u64, code: u32, fault_address: Option<u64>) -> Self {
        ExceptionRecord {
            id,
            code,
            fault_address,
            thrown_by_runtime: false,
        }
    }

    /// Returns `true` if the record reports a stack overflow.
    #[must_use]
    pub fn is_stack_overflow(&self) -> bool {
        seh::is_stack_overflow(self.code)
    }
}

/// Explicit (non-managed) frames dispatch can meet during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplicitFrame {
    /// A transition into native code; managed exceptions leave the managed stack here
    NativeBoundary,
    /// A runtime helper transition; carries no handlers
    Transition,
}

/// Kind of frame being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A managed method frame with exception clauses
    Managed,
    /// A runtime-defined frame
    Explicit(ExplicitFrame),
}

bitflags! {
    /// Properties of the method owning a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u32 {
        /// The faulting location lies in a constrained execution region
        const IN_CONSTRAINED_REGION = 0x0001;
        /// The method opted into handling corrupted state exceptions
        const HANDLES_CORRUPTED_STATE = 0x0002;
    }
}

/// One frame of a stack walk.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    /// Method owning the frame
    pub method: MethodId,
    /// Stack pointer of the frame
    pub sp: StackFrame,
    /// Stack pointer of the caller
    pub caller_sp: StackFrame,
    /// Offset of the faulting (or call) instruction in the method body
    pub offset: u32,
    /// Exception clauses of the method, innermost first
    pub clauses: Vec<ExceptionClause>,
    /// Kind of frame
    pub kind: FrameKind,
    /// Method properties
    pub flags: FrameFlags,
}

impl FrameInfo {
    /// A managed frame.
    #[must_use]
    pub fn managed(
        method: MethodId,
        sp: StackFrame,
        caller_sp: StackFrame,
        offset: u32,
        clauses: Vec<ExceptionClause>,
    ) -> Self {
        FrameInfo {
            method,
            sp,
            caller_sp,
            offset,
            clauses,
            kind: FrameKind::Managed,
            flags: FrameFlags::empty(),
        }
    }

    /// An explicit frame.
    #[must_use]
    pub fn explicit(kind: ExplicitFrame, sp: StackFrame) -> Self {
        FrameInfo {
            method: MethodId(0),
            sp,
            caller_sp: sp,
            offset: 0,
            clauses: Vec::new(),
            kind: FrameKind::Explicit(kind),
            flags: FrameFlags::empty(),
        }
    }

    /// Adds method properties.
    #[must_use]
    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags |= flags;
        self
    }
}
