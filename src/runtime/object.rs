//! Managed object model seen by the exception engine.
//!
//! The engine never owns managed memory. Everything it knows about managed objects goes
//! through the [`ObjectAllocator`] trait: opaque [`ObjectRef`]s for objects that are
//! reachable right now, and [`ObjectHandle`]s for references that must survive a
//! collection (cached throwables, the last thrown object, the preallocated pool).

use std::fmt;

use crate::{hresult::HResult, kinds::ExceptionKind, Result};

/// Reference to a live managed object.
///
/// Identity matters: two references are the same object if and only if they compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(u64);

impl ObjectRef {
    /// Creates a reference with the given id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        ObjectRef(id)
    }

    /// Returns the internal id of this reference.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.0)
    }
}

/// Strong handle keeping a managed object alive across collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    /// Creates a handle with the given id.
    #[must_use]
    pub fn new(id: u64) -> Self {
        ObjectHandle(id)
    }

    /// Returns the internal id of this handle.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({})", self.0)
    }
}

/// Identifies an execution context (application domain) objects are allocated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    /// The default context every runtime starts with.
    pub const DEFAULT: ContextId = ContextId(1);

    /// Creates a context id.
    #[must_use]
    pub fn new(id: u32) -> Self {
        ContextId(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context#{}", self.0)
    }
}

/// A resolved managed type an exception object can be allocated as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeType {
    /// Fully qualified name, e.g. `System.IO.FileNotFoundException`
    pub full_name: String,
    /// Name of the assembly hosting the type
    pub assembly: String,
    /// The exception kind this type was resolved for
    pub kind: ExceptionKind,
}

/// An argument passed to an exception constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtorArg<'a> {
    /// A string argument; `None` passes a null reference
    Str(Option<&'a str>),
    /// A 32-bit integer argument
    Int(i32),
}

/// An owned copy of a [`CtorArg`], as recorded by allocators that keep them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedCtorArg {
    /// A string argument
    Str(Option<String>),
    /// A 32-bit integer argument
    Int(i32),
}

impl From<&CtorArg<'_>> for OwnedCtorArg {
    fn from(arg: &CtorArg<'_>) -> Self {
        match arg {
            CtorArg::Str(value) => OwnedCtorArg::Str(value.map(str::to_string)),
            CtorArg::Int(value) => OwnedCtorArg::Int(*value),
        }
    }
}

/// A field of `System.Exception` the engine writes after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionField<'a> {
    /// `HResult`
    HResult(HResult),
    /// `_message`
    Message(&'a str),
    /// `_innerException`
    InnerException(Option<ObjectRef>),
    /// `_helpURL`
    HelpLink(&'a str),
    /// `_source`
    Source(&'a str),
    /// One entry of the `Data` dictionary
    Data {
        /// Dictionary key
        key: &'a str,
        /// Dictionary value
        value: &'a str,
    },
    /// `_xcode`, the native exception code the object was raised with
    XCode(u32),
}

/// Object and handle services the engine consumes from the garbage-collected heap.
///
/// Implementations must be usable from every thread. Allocation and construction may fail
/// with any [`Error`](crate::Error); the engine converts such failures into throwables
/// itself. Field readers return `None` for objects that do not exist or do not carry the
/// field.
pub trait ObjectAllocator: Send + Sync {
    /// Allocates an uninitialized instance of `ty` in `context`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`](crate::Error::OutOfMemory) when the heap is exhausted.
    fn allocate(&self, ty: &RuntimeType, context: ContextId) -> Result<ObjectRef>;

    /// Runs the constructor of `object` matching `args`.
    ///
    /// # Errors
    ///
    /// Returns any failure raised by the constructor.
    fn construct(&self, object: ObjectRef, args: &[CtorArg<'_>]) -> Result<()>;

    /// Writes one exception field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`](crate::Error::InvalidHandle) for unknown objects.
    fn set_field(&self, object: ObjectRef, field: ExceptionField<'_>) -> Result<()>;

    /// Creates a strong handle for `object`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`](crate::Error::OutOfMemory) when no handle can be made.
    fn create_handle(&self, object: ObjectRef) -> Result<ObjectHandle>;

    /// Destroys a handle created by [`ObjectAllocator::create_handle`].
    fn destroy_handle(&self, handle: ObjectHandle);

    /// Resolves a handle to the object it keeps alive.
    fn dereference(&self, handle: ObjectHandle) -> Option<ObjectRef>;

    /// Reads the `HResult` field.
    fn hresult_of(&self, object: ObjectRef) -> Option<HResult>;

    /// Reads the message field.
    fn message_of(&self, object: ObjectRef) -> Option<String>;

    /// Reads the native exception code the object was raised with.
    fn xcode_of(&self, object: ObjectRef) -> Option<u32>;

    /// Returns the context the object was allocated in.
    fn context_of(&self, object: ObjectRef) -> Option<ContextId>;

    /// Returns the exception kind the object was allocated as.
    fn kind_of(&self, object: ObjectRef) -> Option<ExceptionKind>;
}
