//! Exceptions allocated once at startup.
//!
//! Some failures must be reportable when nothing can be allocated anymore: running out of
//! memory, overflowing the stack, aborting a thread, or failing while reporting another
//! failure. [`PreallocatedPool`] creates one instance of each during startup, keeps it
//! alive through a handle that is never destroyed, and hands out the same object forever.
//!
//! Pool members are never mutated after startup; in particular no inner exception is
//! ever attached to them.

use std::sync::Arc;

use crate::{
    config::RuntimeConfig,
    hresult::HResult,
    kinds::{hr_from_kind, ExceptionKind},
    runtime::{
        collaborators::TypeResolver,
        object::{ContextId, ExceptionField, ObjectAllocator, ObjectHandle, ObjectRef, RuntimeType},
        resources::{ResourceId, ResourceLoader},
    },
    Result,
};

/// A pool member: the object and the handle keeping it alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preallocated {
    /// The preallocated object
    pub object: ObjectRef,
    /// The handle pinning it
    pub handle: ObjectHandle,
}

/// The fixed set of preallocated exceptions.
pub struct PreallocatedPool {
    base: Preallocated,
    out_of_memory: Preallocated,
    stack_overflow: Preallocated,
    execution_engine: Preallocated,
    thread_abort: Preallocated,
    rude_thread_abort: Option<Preallocated>,
    allocator: Arc<dyn ObjectAllocator>,
    oom_type: RuntimeType,
    oom_message: String,
}

impl PreallocatedPool {
    /// Allocates every pool member.
    ///
    /// # Arguments
    ///
    /// * `allocator` - Heap the members are allocated on
    /// * `types` - Resolver for the member types
    /// * `resources` - Source of the member messages
    /// * `config` - Decides whether a rude thread abort is preallocated
    ///
    /// # Errors
    ///
    /// Returns the first failure; a runtime without its pool cannot start.
    pub fn create(
        allocator: &Arc<dyn ObjectAllocator>,
        types: &dyn TypeResolver,
        resources: &dyn ResourceLoader,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        let base_name = ExceptionKind::Exception.full_name();
        let base_message = message(resources, ResourceId::EXCEPTION_GENERIC, &[&base_name]);
        let oom_message = message(resources, ResourceId::OUT_OF_MEMORY, &[]);
        let so_message = message(resources, ResourceId::STACK_OVERFLOW, &[]);
        let engine_message = message(resources, ResourceId::EXECUTION_ENGINE, &[]);
        let abort_message = message(resources, ResourceId::THREAD_ABORT, &[]);

        let oom_type = types.resolve(ExceptionKind::OutOfMemory)?;
        let abort_type = types.resolve(ExceptionKind::ThreadAbort)?;

        let base = preallocate(
            allocator,
            &types.resolve(ExceptionKind::Exception)?,
            &base_message,
        )?;
        let out_of_memory = preallocate(allocator, &oom_type, &oom_message)?;
        let stack_overflow = preallocate(
            allocator,
            &types.resolve(ExceptionKind::StackOverflow)?,
            &so_message,
        )?;
        let execution_engine = preallocate(
            allocator,
            &types.resolve(ExceptionKind::ExecutionEngine)?,
            &engine_message,
        )?;
        let thread_abort = preallocate(allocator, &abort_type, &abort_message)?;
        let rude_thread_abort = if config.preallocate_rude_thread_abort {
            Some(preallocate(allocator, &abort_type, &abort_message)?)
        } else {
            None
        };

        debug!(
            rude_thread_abort = rude_thread_abort.is_some(),
            "preallocated exception pool created"
        );

        Ok(PreallocatedPool {
            base,
            out_of_memory,
            stack_overflow,
            execution_engine,
            thread_abort,
            rude_thread_abort,
            allocator: Arc::clone(allocator),
            oom_type,
            oom_message,
        })
    }

    /// The `System.Exception` used when nothing more specific can be produced.
    #[must_use]
    pub fn base_exception(&self) -> Preallocated {
        self.base
    }

    /// The preallocated `OutOfMemoryException`.
    #[must_use]
    pub fn out_of_memory(&self) -> Preallocated {
        self.out_of_memory
    }

    /// The preallocated `StackOverflowException`.
    #[must_use]
    pub fn stack_overflow(&self) -> Preallocated {
        self.stack_overflow
    }

    /// The preallocated `ExecutionEngineException`.
    #[must_use]
    pub fn execution_engine(&self) -> Preallocated {
        self.execution_engine
    }

    /// The preallocated `ThreadAbortException`.
    #[must_use]
    pub fn thread_abort(&self) -> Preallocated {
        self.thread_abort
    }

    /// The `ThreadAbortException` reserved for rude aborts, if one was preallocated.
    #[must_use]
    pub fn rude_thread_abort(&self) -> Option<Preallocated> {
        self.rude_thread_abort
    }

    /// The rude abort member, or the ordinary thread abort when none was preallocated.
    #[must_use]
    pub fn rude_or_thread_abort(&self) -> Preallocated {
        self.rude_thread_abort.unwrap_or(self.thread_abort)
    }

    fn members(&self) -> impl Iterator<Item = Preallocated> + '_ {
        [
            self.base,
            self.out_of_memory,
            self.stack_overflow,
            self.execution_engine,
            self.thread_abort,
        ]
        .into_iter()
        .chain(self.rude_thread_abort)
    }

    /// Returns `true` if `object` is a pool member.
    #[must_use]
    pub fn is_preallocated_object(&self, object: ObjectRef) -> bool {
        self.members().any(|member| member.object == object)
    }

    /// Returns `true` if `handle` pins a pool member.
    #[must_use]
    pub fn is_preallocated_handle(&self, handle: ObjectHandle) -> bool {
        self.members().any(|member| member.handle == handle)
    }

    /// Returns the shared handle of a pool member.
    #[must_use]
    pub fn handle_for_object(&self, object: ObjectRef) -> Option<ObjectHandle> {
        self.members()
            .find(|member| member.object == object)
            .map(|member| member.handle)
    }

    /// Returns a fresh `OutOfMemoryException`, or the preallocated one if none can be made.
    ///
    /// Fresh instances give every occurrence its own identity and stack trace.
    #[must_use]
    pub fn best_out_of_memory(&self, context: ContextId) -> ObjectRef {
        match self.fresh_out_of_memory(context) {
            Ok(object) => object,
            Err(error) => {
                trace!(%error, "using the preallocated out-of-memory exception");
                self.out_of_memory.object
            }
        }
    }

    fn fresh_out_of_memory(&self, context: ContextId) -> Result<ObjectRef> {
        let object = self.allocator.allocate(&self.oom_type, context)?;
        self.allocator.construct(object, &[])?;
        self.allocator.set_field(
            object,
            ExceptionField::HResult(hr_from_kind(ExceptionKind::OutOfMemory)),
        )?;
        self.allocator
            .set_field(object, ExceptionField::Message(&self.oom_message))?;
        Ok(object)
    }
}

fn message(resources: &dyn ResourceLoader, id: ResourceId, args: &[&str]) -> String {
    resources.load(id, args).unwrap_or_default()
}

fn preallocate(
    allocator: &Arc<dyn ObjectAllocator>,
    ty: &RuntimeType,
    message: &str,
) -> Result<Preallocated> {
    let object = allocator.allocate(ty, ContextId::DEFAULT)?;
    allocator.construct(object, &[])?;

    let code: HResult = hr_from_kind(ty.kind);
    allocator.set_field(object, ExceptionField::HResult(code))?;
    if !message.is_empty() {
        allocator.set_field(object, ExceptionField::Message(message))?;
    }

    let handle = allocator.create_handle(object)?;
    Ok(Preallocated { object, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CoreTypeTable, ExceptionHeap, StringTable};
    use crate::Error;

    fn create_pool(heap: &Arc<ExceptionHeap>, config: &RuntimeConfig) -> Result<PreallocatedPool> {
        let allocator: Arc<dyn ObjectAllocator> = heap.clone();
        PreallocatedPool::create(
            &allocator,
            &CoreTypeTable::new(),
            &StringTable::new(),
            config,
        )
    }

    #[test]
    fn test_members_are_preallocated() {
        let heap = Arc::new(ExceptionHeap::new());
        let pool = create_pool(&heap, &RuntimeConfig::default()).unwrap();

        for member in [
            pool.base_exception(),
            pool.out_of_memory(),
            pool.stack_overflow(),
            pool.execution_engine(),
            pool.thread_abort(),
            pool.rude_thread_abort().unwrap(),
        ] {
            assert!(pool.is_preallocated_object(member.object));
            assert!(pool.is_preallocated_handle(member.handle));
            assert_eq!(pool.handle_for_object(member.object), Some(member.handle));
        }

        assert_ne!(pool.thread_abort().object, pool.rude_or_thread_abort().object);
        assert_eq!(heap.object_count(), 6);
    }

    #[test]
    fn test_member_contents() {
        let heap = Arc::new(ExceptionHeap::new());
        let pool = create_pool(&heap, &RuntimeConfig::default()).unwrap();

        let oom = heap.object(pool.out_of_memory().object).unwrap();
        assert_eq!(oom.ty.kind, ExceptionKind::OutOfMemory);
        assert_eq!(oom.hresult, Some(hr_from_kind(ExceptionKind::OutOfMemory)));
        assert_eq!(
            oom.message.as_deref(),
            Some("Insufficient memory to continue the execution of the program.")
        );

        let base = heap.object(pool.base_exception().object).unwrap();
        assert_eq!(
            base.message.as_deref(),
            Some("Exception of type 'System.Exception' was thrown.")
        );
    }

    #[test]
    fn test_without_rude_abort() {
        let heap = Arc::new(ExceptionHeap::new());
        let config = RuntimeConfig::default().with_rude_thread_abort(false);
        let pool = create_pool(&heap, &config).unwrap();

        assert!(pool.rude_thread_abort().is_none());
        assert_eq!(pool.rude_or_thread_abort(), pool.thread_abort());
    }

    #[test]
    fn test_best_out_of_memory() {
        let heap = Arc::new(ExceptionHeap::new());
        let pool = create_pool(&heap, &RuntimeConfig::default()).unwrap();

        let fresh = pool.best_out_of_memory(ContextId::DEFAULT);
        assert_ne!(fresh, pool.out_of_memory().object);
        assert!(!pool.is_preallocated_object(fresh));

        heap.fail_next_allocations(1);
        assert_eq!(
            pool.best_out_of_memory(ContextId::DEFAULT),
            pool.out_of_memory().object
        );
    }

    #[test]
    fn test_startup_failure() {
        let heap = Arc::new(ExceptionHeap::with_limit(3));
        match create_pool(&heap, &RuntimeConfig::default()) {
            Err(Error::OutOfMemory) => {}
            _ => panic!("Expected OutOfMemory"),
        }
    }
}
