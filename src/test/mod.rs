use std::sync::{Arc, Mutex};

use crate::{
    dispatch::{
        ExceptionClause, FrameInfo, FuncletInvoker, MethodId, StackFrame, TypeToken,
    },
    runtime::{DispatchNotifications, ContextId, ExceptionHeap, ExceptionRuntime, ObjectRef, RuntimeBuilder},
    thread::{ManagedThread, ThreadId},
    Result,
};

// Helper function to create a runtime backed by an inspectable heap
pub fn create_runtime() -> (Arc<ExceptionRuntime>, Arc<ExceptionHeap>) {
    let heap = Arc::new(ExceptionHeap::new());
    let runtime = RuntimeBuilder::new()
        .allocator(heap.clone())
        .build()
        .expect("runtime startup failed");
    (runtime, heap)
}

// Helper function to create a runtime with one thread attached to the default context
pub fn create_thread() -> (Arc<ExceptionRuntime>, Arc<ExceptionHeap>, Arc<ManagedThread>) {
    let (runtime, heap) = create_runtime();
    let thread = runtime
        .attach_thread(ContextId::DEFAULT)
        .expect("thread attach failed");
    (runtime, heap, thread)
}

// Helper function to create a managed frame; the caller sits 0x100 bytes above
pub fn managed_frame(method: u32, sp: u64, offset: u32, clauses: Vec<ExceptionClause>) -> FrameInfo {
    FrameInfo::managed(
        MethodId(method),
        StackFrame(sp),
        StackFrame(sp + 0x100),
        offset,
        clauses,
    )
}

/// Invoker whose catch clauses accept every exception. Records the handler offsets of the
/// funclets it ran.
#[derive(Default)]
pub struct CatchAll {
    pub cleanups: Vec<u32>,
    pub catches: Vec<u32>,
    /// Verdicts handed out to filters in order; filters accept once exhausted
    pub filter_results: Vec<Result<bool>>,
}

impl FuncletInvoker for CatchAll {
    fn is_type_compatible(&mut self, _throwable: ObjectRef, _catch_type: TypeToken) -> bool {
        true
    }

    fn invoke_filter(
        &mut self,
        _frame: &FrameInfo,
        _clause: &ExceptionClause,
        _throwable: ObjectRef,
    ) -> Result<bool> {
        if self.filter_results.is_empty() {
            Ok(true)
        } else {
            self.filter_results.remove(0)
        }
    }

    fn invoke_cleanup(&mut self, _frame: &FrameInfo, clause: &ExceptionClause) -> Result<()> {
        self.cleanups.push(clause.handler_offset);
        Ok(())
    }

    fn invoke_catch(
        &mut self,
        _frame: &FrameInfo,
        clause: &ExceptionClause,
        _throwable: ObjectRef,
    ) -> Result<()> {
        self.catches.push(clause.handler_offset);
        Ok(())
    }
}

/// Notification sink remembering the order of events.
#[derive(Default)]
pub struct RecordingNotifications {
    events: Mutex<Vec<&'static str>>,
}

impl RecordingNotifications {
    pub fn events(&self) -> Vec<&'static str> {
        lock!(self.events).clone()
    }

    fn record(&self, event: &'static str) {
        lock!(self.events).push(event);
    }
}

impl DispatchNotifications for RecordingNotifications {
    fn first_chance(&self, _thread: ThreadId, _throwable: Option<ObjectRef>) {
        self.record("first_chance");
    }

    fn unwind_begin(&self, _thread: ThreadId, _throwable: Option<ObjectRef>) {
        self.record("unwind_begin");
    }

    fn exception_caught(&self, _thread: ThreadId, _method: MethodId, _throwable: Option<ObjectRef>) {
        self.record("exception_caught");
    }

    fn unhandled(&self, _thread: ThreadId, _throwable: Option<ObjectRef>) {
        self.record("unhandled");
    }
}
