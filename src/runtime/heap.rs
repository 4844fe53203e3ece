//! In-memory exception heap.
//!
//! This module provides [`ExceptionHeap`], the [`ObjectAllocator`] used when the host does
//! not plug the engine into a real garbage collector. It stores exception objects and
//! handles in concurrent maps and never collects; objects live until the heap is dropped.
//!
//! # Memory Limits
//!
//! The heap enforces an optional maximum object count. Allocations beyond it fail with
//! [`Error::OutOfMemory`], which is how out-of-memory paths of the engine are exercised.
//!
//! # Failure Injection
//!
//! Besides the limit, failures can be queued explicitly:
//!
//! - [`ExceptionHeap::fail_next_allocations`] - the next `n` allocations fail with
//!   out-of-memory
//! - [`ExceptionHeap::fail_next_handles`] - the next `n` handle creations fail
//! - [`ExceptionHeap::queue_constructor_failure`] - the next constructor call fails with the
//!   given error

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
};

use dashmap::DashMap;

use crate::{
    hresult::HResult,
    kinds::ExceptionKind,
    runtime::object::{
        ContextId, CtorArg, ExceptionField, ObjectAllocator, ObjectHandle, ObjectRef,
        OwnedCtorArg, RuntimeType,
    },
    Error, Result,
};

/// An exception object stored in the [`ExceptionHeap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapException {
    /// The type the object was allocated as
    pub ty: RuntimeType,
    /// The context the object was allocated in
    pub context: ContextId,
    /// Arguments of the constructor call, `None` until constructed
    pub ctor_args: Option<Vec<OwnedCtorArg>>,
    /// `HResult` field
    pub hresult: Option<HResult>,
    /// Message field
    pub message: Option<String>,
    /// Inner exception
    pub inner: Option<ObjectRef>,
    /// Help link
    pub help_link: Option<String>,
    /// Source
    pub source: Option<String>,
    /// Entries of the `Data` dictionary, in insertion order
    pub data: Vec<(String, String)>,
    /// Native exception code
    pub xcode: Option<u32>,
}

impl HeapException {
    fn new(ty: RuntimeType, context: ContextId) -> Self {
        HeapException {
            ty,
            context,
            ctor_args: None,
            hresult: None,
            message: None,
            inner: None,
            help_link: None,
            source: None,
            data: Vec::new(),
            xcode: None,
        }
    }

    /// Returns the string constructor argument at `index`, if any.
    #[must_use]
    pub fn ctor_str(&self, index: usize) -> Option<&str> {
        match self.ctor_args.as_ref()?.get(index)? {
            OwnedCtorArg::Str(value) => value.as_deref(),
            OwnedCtorArg::Int(_) => None,
        }
    }
}

/// Concurrent, non-collecting [`ObjectAllocator`].
pub struct ExceptionHeap {
    objects: DashMap<u64, HeapException>,
    handles: DashMap<u64, ObjectRef>,
    next_object: AtomicU64,
    next_handle: AtomicU64,
    max_objects: AtomicUsize,
    failing_allocations: AtomicUsize,
    failing_handles: AtomicUsize,
    constructor_failures: Mutex<VecDeque<Error>>,
}

impl ExceptionHeap {
    /// Creates an unlimited heap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Creates a heap holding at most `max_objects` objects.
    #[must_use]
    pub fn with_limit(max_objects: usize) -> Self {
        ExceptionHeap {
            objects: DashMap::new(),
            handles: DashMap::new(),
            next_object: AtomicU64::new(1),
            next_handle: AtomicU64::new(1),
            max_objects: AtomicUsize::new(max_objects),
            failing_allocations: AtomicUsize::new(0),
            failing_handles: AtomicUsize::new(0),
            constructor_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Changes the object limit. Existing objects are kept even if above the new limit.
    pub fn set_limit(&self, max_objects: usize) {
        self.max_objects.store(max_objects, Ordering::Release);
    }

    /// Makes the next `count` allocations fail with out-of-memory.
    pub fn fail_next_allocations(&self, count: usize) {
        self.failing_allocations.store(count, Ordering::Release);
    }

    /// Makes the next `count` handle creations fail with out-of-memory.
    pub fn fail_next_handles(&self, count: usize) {
        self.failing_handles.store(count, Ordering::Release);
    }

    /// Makes the next constructor call fail with `error`. Failures are consumed in order.
    pub fn queue_constructor_failure(&self, error: Error) {
        lock!(self.constructor_failures).push_back(error);
    }

    /// Returns a copy of the stored object.
    #[must_use]
    pub fn object(&self, object: ObjectRef) -> Option<HeapException> {
        self.objects.get(&object.id()).map(|entry| entry.clone())
    }

    /// Number of allocated objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of live handles.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if `handle` has not been destroyed.
    #[must_use]
    pub fn is_handle_live(&self, handle: ObjectHandle) -> bool {
        self.handles.contains_key(&handle.id())
    }

    fn consume(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    fn with_object<R>(&self, object: ObjectRef, f: impl FnOnce(&mut HeapException) -> R) -> Result<R> {
        match self.objects.get_mut(&object.id()) {
            Some(mut entry) => Ok(f(&mut entry)),
            None => Err(Error::InvalidHandle),
        }
    }
}

impl Default for ExceptionHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectAllocator for ExceptionHeap {
    fn allocate(&self, ty: &RuntimeType, context: ContextId) -> Result<ObjectRef> {
        if Self::consume(&self.failing_allocations) {
            return Err(Error::OutOfMemory);
        }
        if self.objects.len() >= self.max_objects.load(Ordering::Acquire) {
            return Err(Error::OutOfMemory);
        }

        let id = self.next_object.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(id, HeapException::new(ty.clone(), context));
        Ok(ObjectRef::new(id))
    }

    fn construct(&self, object: ObjectRef, args: &[CtorArg<'_>]) -> Result<()> {
        if let Some(error) = lock!(self.constructor_failures).pop_front() {
            return Err(error);
        }

        self.with_object(object, |exception| {
            exception.ctor_args = Some(args.iter().map(OwnedCtorArg::from).collect());
        })
    }

    fn set_field(&self, object: ObjectRef, field: ExceptionField<'_>) -> Result<()> {
        self.with_object(object, |exception| match field {
            ExceptionField::HResult(code) => exception.hresult = Some(code),
            ExceptionField::Message(text) => exception.message = Some(text.to_string()),
            ExceptionField::InnerException(inner) => exception.inner = inner,
            ExceptionField::HelpLink(link) => exception.help_link = Some(link.to_string()),
            ExceptionField::Source(source) => exception.source = Some(source.to_string()),
            ExceptionField::Data { key, value } => {
                exception.data.push((key.to_string(), value.to_string()));
            }
            ExceptionField::XCode(code) => exception.xcode = Some(code),
        })
    }

    fn create_handle(&self, object: ObjectRef) -> Result<ObjectHandle> {
        if Self::consume(&self.failing_handles) {
            return Err(Error::OutOfMemory);
        }
        if !self.objects.contains_key(&object.id()) {
            return Err(Error::InvalidHandle);
        }

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(id, object);
        Ok(ObjectHandle::new(id))
    }

    fn destroy_handle(&self, handle: ObjectHandle) {
        self.handles.remove(&handle.id());
    }

    fn dereference(&self, handle: ObjectHandle) -> Option<ObjectRef> {
        self.handles.get(&handle.id()).map(|entry| *entry)
    }

    fn hresult_of(&self, object: ObjectRef) -> Option<HResult> {
        self.objects.get(&object.id())?.hresult
    }

    fn message_of(&self, object: ObjectRef) -> Option<String> {
        self.objects.get(&object.id())?.message.clone()
    }

    fn xcode_of(&self, object: ObjectRef) -> Option<u32> {
        self.objects.get(&object.id())?.xcode
    }

    fn context_of(&self, object: ObjectRef) -> Option<ContextId> {
        self.objects.get(&object.id()).map(|entry| entry.context)
    }

    fn kind_of(&self, object: ObjectRef) -> Option<ExceptionKind> {
        self.objects.get(&object.id()).map(|entry| entry.ty.kind)
    }
}
