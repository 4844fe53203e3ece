//! Process-wide exception runtime.
//!
//! [`ExceptionRuntime`] ties the engine together: it owns the collaborators, the
//! [`PreallocatedPool`] built during startup, the process-wide [`TrackerAllocator`] and the
//! registry of attached threads. It is created once through [`RuntimeBuilder`] and shared
//! as an `Arc` by every [`ManagedThread`].
//!
//! # Startup
//!
//! [`RuntimeBuilder::build`] is the explicit startup phase. It wires the collaborators,
//! allocates every member of the preallocated pool and fails if any of them cannot be
//! created. Afterwards the pool is immutable and read without synchronization.
//!
//! # Example
//!
//! ```rust
//! use clrexc::prelude::*;
//!
//! let runtime = RuntimeBuilder::new()
//!     .config(RuntimeConfig::default())
//!     .build()
//!     .unwrap();
//!
//! let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
//! assert_eq!(thread.depth(), 0);
//! ```

pub mod collaborators;
pub mod heap;
pub mod object;
pub mod resources;
pub mod types;

pub use collaborators::{
    DispatchNotifications, NullNotifications, StackOverflowAction, StackOverflowPolicy,
    TerminateOnStackOverflow, TypeResolver,
};
pub use heap::{ExceptionHeap, HeapException};
pub use object::{
    ContextId, CtorArg, ExceptionField, ObjectAllocator, ObjectHandle, ObjectRef, OwnedCtorArg,
    RuntimeType,
};
pub use resources::{ResourceId, ResourceLoader, StringTable};
pub use types::CoreTypeTable;

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Weak,
};

use dashmap::DashMap;

use crate::{
    config::RuntimeConfig,
    dispatch::TrackerAllocator,
    exception::PreallocatedPool,
    thread::{ManagedThread, ThreadId},
    Result,
};

/// The process-wide exception engine.
pub struct ExceptionRuntime {
    config: RuntimeConfig,
    allocator: Arc<dyn ObjectAllocator>,
    resources: Arc<dyn ResourceLoader>,
    types: Arc<dyn TypeResolver>,
    notifications: Arc<dyn DispatchNotifications>,
    stack_overflow: Arc<dyn StackOverflowPolicy>,
    pool: PreallocatedPool,
    trackers: TrackerAllocator,
    threads: DashMap<ThreadId, Weak<ManagedThread>>,
    next_thread: AtomicU32,
    next_record: AtomicU64,
}

impl ExceptionRuntime {
    /// Returns the configuration the runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the object allocator.
    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn ObjectAllocator> {
        &self.allocator
    }

    /// Returns the resource loader.
    #[must_use]
    pub fn resources(&self) -> &dyn ResourceLoader {
        self.resources.as_ref()
    }

    /// Returns the type resolver.
    #[must_use]
    pub fn types(&self) -> &dyn TypeResolver {
        self.types.as_ref()
    }

    /// Returns the notification sink.
    #[must_use]
    pub fn notifications(&self) -> &dyn DispatchNotifications {
        self.notifications.as_ref()
    }

    /// Returns the stack overflow policy.
    #[must_use]
    pub fn stack_overflow_policy(&self) -> &dyn StackOverflowPolicy {
        self.stack_overflow.as_ref()
    }

    /// Returns the preallocated exception pool.
    #[must_use]
    pub fn pool(&self) -> &PreallocatedPool {
        &self.pool
    }

    /// Returns the process-wide tracker allocator.
    #[must_use]
    pub fn trackers(&self) -> &TrackerAllocator {
        &self.trackers
    }

    /// Hands out a fresh identity for an exception record raised by the runtime.
    #[must_use]
    pub fn next_record_id(&self) -> u64 {
        self.next_record.fetch_add(1, Ordering::Relaxed)
    }

    /// Attaches a new managed thread executing in `context`.
    ///
    /// The thread reserves its out-of-memory tracker slot here, so dispatch on the thread
    /// always has one tracker available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`](crate::Error::OutOfMemory) if the reserved tracker
    /// cannot be allocated.
    pub fn attach_thread(self: &Arc<Self>, context: ContextId) -> Result<Arc<ManagedThread>> {
        let id = ThreadId::new(self.next_thread.fetch_add(1, Ordering::Relaxed));
        let thread = Arc::new(ManagedThread::new(id, Arc::clone(self), context)?);
        self.threads.insert(id, Arc::downgrade(&thread));

        debug!(thread = %id, %context, "attached thread");
        Ok(thread)
    }

    /// Removes a thread from the registry.
    pub fn detach_thread(&self, id: ThreadId) {
        self.threads.remove(&id);
    }

    /// Looks up an attached thread.
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<Arc<ManagedThread>> {
        self.threads.get(&id).and_then(|entry| entry.upgrade())
    }

    /// Number of threads currently registered.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.iter().filter(|entry| entry.strong_count() > 0).count()
    }

    /// Releases every throwable handle that refers into `context`.
    ///
    /// Walks the tracker chains and last thrown objects of all attached threads. Each
    /// thread is visited under the allocator's teardown lock and that thread's exception
    /// state lock, so handles owned by other threads are never destroyed concurrently with
    /// their owner's dispatch. Preallocated handles are never released.
    ///
    /// # Returns
    ///
    /// The number of handles released.
    pub fn unload_context(&self, context: ContextId) -> usize {
        let threads: Vec<Arc<ManagedThread>> = self
            .threads
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();

        let mut released = 0;
        for thread in threads {
            let _teardown = self.trackers.lock_for_teardown();
            released += thread.release_context_handles(context);
        }

        debug!(%context, released, "unloaded context");
        released
    }
}

/// Builder wiring the collaborators of an [`ExceptionRuntime`].
///
/// Collaborators that are not supplied default to the in-process implementations:
/// [`ExceptionHeap`], [`StringTable`], [`CoreTypeTable`], [`NullNotifications`] and
/// [`TerminateOnStackOverflow`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    allocator: Option<Arc<dyn ObjectAllocator>>,
    resources: Option<Arc<dyn ResourceLoader>>,
    types: Option<Arc<dyn TypeResolver>>,
    notifications: Option<Arc<dyn DispatchNotifications>>,
    stack_overflow: Option<Arc<dyn StackOverflowPolicy>>,
}

impl RuntimeBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the object allocator.
    #[must_use]
    pub fn allocator(mut self, allocator: Arc<dyn ObjectAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Sets the resource loader.
    #[must_use]
    pub fn resources(mut self, resources: Arc<dyn ResourceLoader>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Sets the type resolver.
    #[must_use]
    pub fn types(mut self, types: Arc<dyn TypeResolver>) -> Self {
        self.types = Some(types);
        self
    }

    /// Sets the notification sink.
    #[must_use]
    pub fn notifications(mut self, notifications: Arc<dyn DispatchNotifications>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Sets the stack overflow policy.
    #[must_use]
    pub fn stack_overflow_policy(mut self, policy: Arc<dyn StackOverflowPolicy>) -> Self {
        self.stack_overflow = Some(policy);
        self
    }

    /// Runs the startup phase and returns the shared runtime.
    ///
    /// # Errors
    ///
    /// Returns the allocation or type resolution error that prevented a member of the
    /// preallocated pool from being created.
    pub fn build(self) -> Result<Arc<ExceptionRuntime>> {
        let allocator = self
            .allocator
            .unwrap_or_else(|| Arc::new(ExceptionHeap::new()));
        let resources = self
            .resources
            .unwrap_or_else(|| Arc::new(StringTable::new()));
        let types = self.types.unwrap_or_else(|| Arc::new(CoreTypeTable::new()));
        let notifications = self
            .notifications
            .unwrap_or_else(|| Arc::new(NullNotifications));
        let stack_overflow = self
            .stack_overflow
            .unwrap_or_else(|| Arc::new(TerminateOnStackOverflow));

        let pool = PreallocatedPool::create(
            &allocator,
            types.as_ref(),
            resources.as_ref(),
            &self.config,
        )?;
        let trackers = TrackerAllocator::new(
            self.config.tracker_slots_per_page,
            self.config.max_tracker_pages,
        );

        debug!(
            winrt = self.config.winrt,
            legacy = self.config.legacy_corrupted_state_policy,
            "exception runtime started"
        );

        Ok(Arc::new(ExceptionRuntime {
            config: self.config,
            allocator,
            resources,
            types,
            notifications,
            stack_overflow,
            pool,
            trackers,
            threads: DashMap::new(),
            next_thread: AtomicU32::new(1),
            next_record: AtomicU64::new(1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::create_runtime;

    #[test]
    fn test_attach_and_lookup() {
        let (runtime, _heap) = create_runtime();
        let thread = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        let found = runtime.thread(thread.id()).unwrap();
        assert!(Arc::ptr_eq(&thread, &found));
        assert_eq!(runtime.thread_count(), 1);

        runtime.detach_thread(thread.id());
        assert!(runtime.thread(thread.id()).is_none());
    }

    #[test]
    fn test_thread_ids_are_distinct() {
        let (runtime, _heap) = create_runtime();
        let first = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        let second = runtime.attach_thread(ContextId::DEFAULT).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_build_fails_without_memory() {
        let heap = Arc::new(ExceptionHeap::with_limit(2));
        let result = RuntimeBuilder::new().allocator(heap).build();
        assert!(result.is_err());
    }
}
