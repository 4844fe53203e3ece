//! Materializing throwables.
//!
//! # Overview
//!
//! [`RuntimeException::get_throwable`] turns a native representation into the managed
//! object application code catches. It is called on failure paths, so it must never fail
//! itself: every secondary failure is converted into *some* throwable, degrading to the
//! preallocated pool when nothing better is possible.
//!
//! The resolution order is:
//!
//! 1. A rude abort in progress always produces the rude abort throwable.
//! 2. The thread's last thrown object is returned as-is when it is the preallocated stack
//!    overflow exception.
//! 3. A throwable cached on the representation is reused.
//! 4. If the thread is already creating a throwable for the same kind of representation,
//!    creation is not re-entered; the status code picks a preallocated fallback instead.
//! 5. Otherwise the representation's throwable is created. A failure during creation is
//!    converted with [`throwable_from_failure`].
//! 6. The result is cached, and the inner exception attached best-effort.

use std::sync::{Arc, OnceLock};

use crate::{
    exception::{com, fileload, repr::{access_message, type_load_message, Representation, RuntimeException}},
    hresult::{hr, is_out_of_memory, HResult},
    kinds::{hr_from_kind, ExceptionKind},
    runtime::object::{CtorArg, ExceptionField, ObjectAllocator, ObjectHandle, ObjectRef},
    thread::{CreatingThrowableScope, GcModeGuard, ManagedThread},
    Error, Result,
};

/// A throwable handle cached on a [`RuntimeException`].
pub(crate) struct CachedThrowable {
    handle: ObjectHandle,
    allocator: Arc<dyn ObjectAllocator>,
    shared: bool,
}

impl Drop for CachedThrowable {
    fn drop(&mut self) {
        // Pool handles outlive every representation.
        if !self.shared {
            self.allocator.destroy_handle(self.handle);
        }
    }
}

/// Write-once slot holding the cached throwable.
#[derive(Default)]
pub(crate) struct ThrowableCache(OnceLock<CachedThrowable>);

impl ThrowableCache {
    pub(crate) fn get(&self) -> Option<ObjectHandle> {
        self.0.get().map(|cached| cached.handle)
    }

    fn store(&self, handle: ObjectHandle, allocator: &Arc<dyn ObjectAllocator>, shared: bool) {
        // A concurrent store wins; ours is dropped, which releases its handle.
        let _ = self.0.set(CachedThrowable {
            handle,
            allocator: Arc::clone(allocator),
            shared,
        });
    }
}

impl RuntimeException {
    /// Returns the managed throwable for this exception, creating it on first use.
    ///
    /// Repeated calls return the same object. Only the fresh out-of-memory path may hand
    /// out a different object per call, because it never caches anything it could not
    /// keep a handle for.
    ///
    /// This never fails. When the throwable cannot be created, a plausible preallocated
    /// exception is returned instead.
    pub fn get_throwable(&self, thread: &ManagedThread) -> ObjectRef {
        let _cooperative = GcModeGuard::cooperative(thread);
        let runtime = thread.runtime();
        let pool = runtime.pool();

        if thread.is_rude_abort_initiated() {
            return pool.rude_or_thread_abort().object;
        }

        if let Representation::LastThrown = self.repr {
            if let Some(object) = thread.last_thrown_object() {
                if object == pool.stack_overflow().object {
                    return object;
                }
            }
        }

        if let Some(handle) = self.cache.get() {
            return match runtime.allocator().dereference(handle) {
                Some(object) => object,
                None => {
                    warn!(thread = %thread.id(), %handle, "cached throwable handle is dead");
                    pool.out_of_memory().object
                }
            };
        }

        let repr_type = self.repr_type();
        let object = if thread.creating_throwable_for() == Some(repr_type) {
            self.recursion_fallback(thread)
        } else {
            let _creating = CreatingThrowableScope::enter(thread, repr_type);
            match self.create_throwable(thread) {
                Ok(object) => object,
                Err(_) if self.get_hr(thread) == hr::COR_E_THREADABORTED => {
                    pool.thread_abort().object
                }
                Err(error) => {
                    trace!(thread = %thread.id(), %error, "throwable creation failed");
                    throwable_from_failure(thread, error)
                }
            }
        };

        self.cache_throwable(thread, object);
        object
    }

    fn recursion_fallback(&self, thread: &ManagedThread) -> ObjectRef {
        let pool = thread.runtime().pool();
        let code = self.get_hr(thread);

        if is_out_of_memory(code) {
            pool.best_out_of_memory(thread.context())
        } else if code == hr::COR_E_THREADABORTED {
            pool.thread_abort().object
        } else {
            warn!(
                thread = %thread.id(),
                exception = %self,
                "recursive failure while creating a throwable, using the base exception"
            );
            pool.base_exception().object
        }
    }

    fn cache_throwable(&self, thread: &ManagedThread, object: ObjectRef) {
        let runtime = thread.runtime();
        let allocator = runtime.allocator();
        let pool = runtime.pool();

        if let Some(handle) = pool.handle_for_object(object) {
            self.cache.store(handle, allocator, true);
            return;
        }

        match allocator.create_handle(object) {
            Ok(handle) => self.cache.store(handle, allocator, false),
            Err(error) => {
                debug!(thread = %thread.id(), %error, "throwable not cached");
            }
        }

        if let Some(inner) = &self.inner {
            let inner_object = inner.get_throwable(thread);
            if let Err(error) =
                allocator.set_field(object, ExceptionField::InnerException(Some(inner_object)))
            {
                debug!(thread = %thread.id(), %error, "failed to attach inner exception");
            }
        }
    }

    /// Creates a fresh throwable for this representation.
    ///
    /// # Errors
    ///
    /// Returns any failure of type resolution, allocation or construction.
    pub(crate) fn create_throwable(&self, thread: &ManagedThread) -> Result<ObjectRef> {
        let runtime = thread.runtime();
        let resources = runtime.resources();

        match &self.repr {
            Representation::LastThrown => {
                #[cfg(debug_assertions)]
                if let Err(error) = thread.validate_last_thrown_object() {
                    if !runtime.config().suppress_lost_exception_type_assert {
                        warn!(thread = %thread.id(), %error, "last thrown object failed validation");
                    }
                }

                thread.last_thrown_object().ok_or_else(|| {
                    Error::InconsistentState("thread has no last thrown object".to_string())
                })
            }
            Representation::KindOnly { kind } => {
                let code = hr_from_kind(*kind);
                let message = super::repr::is_interesting_hr(*kind, code)
                    .then(|| resources.hr_message(code));
                build(thread, *kind, &[], code, message.as_deref())
            }
            Representation::MessageWithArgs {
                kind,
                hr,
                resource,
                args,
            } => {
                let loaded = match resource {
                    Some(id) => {
                        let args: Vec<&str> = args.iter().map(String::as_str).collect();
                        match resources.load(*id, &args) {
                            Ok(text) => Some(text),
                            Err(error) => {
                                debug!(%id, %error, "message resource unavailable");
                                None
                            }
                        }
                    }
                    None => None,
                };
                let message = loaded.or_else(|| {
                    super::repr::is_interesting_hr(*kind, *hr).then(|| resources.hr_message(*hr))
                });
                build(thread, *kind, &[], *hr, message.as_deref())
            }
            Representation::ResourceBacked { kind, resource } => {
                let message = resources.load_named(resource).ok();
                build(thread, *kind, &[], hr_from_kind(*kind), message.as_deref())
            }
            Representation::ComDerived(info) => com::create(info, thread),
            Representation::FieldAccess(access) => {
                let message = access_message(access, resources);
                build_with_message(thread, ExceptionKind::FieldAccess, &message)
            }
            Representation::MethodAccess(access) => {
                let message = access_message(access, resources);
                build_with_message(thread, ExceptionKind::MethodAccess, &message)
            }
            Representation::TypeAccess(access) => {
                let message = access_message(access, resources);
                build_with_message(thread, ExceptionKind::TypeAccess, &message)
            }
            Representation::ArgumentInvalid {
                kind,
                arg_name,
                resource,
            } => {
                let message = resource
                    .as_deref()
                    .and_then(|name| resources.load_named(name).ok());
                let message_arg = CtorArg::Str(message.as_deref());
                let name_arg = CtorArg::Str(arg_name.as_deref());

                // ArgumentException takes (message, paramName); its subclasses take
                // (paramName, message).
                let ctor = if *kind == ExceptionKind::Argument {
                    [message_arg, name_arg]
                } else {
                    [name_arg, message_arg]
                };
                build(thread, *kind, &ctor, hr_from_kind(*kind), message.as_deref())
            }
            Representation::TypeLoadFailure(info) => {
                let class_name = info.full_name();
                let message = type_load_message(info, resources);
                build(
                    thread,
                    ExceptionKind::TypeLoad,
                    &[
                        CtorArg::Str(Some(&class_name)),
                        CtorArg::Str(Some(&info.assembly)),
                        CtorArg::Str(info.message_arg.as_deref()),
                        CtorArg::Int(info.why.value() as i32),
                    ],
                    hr::COR_E_TYPELOAD,
                    Some(&message),
                )
            }
            Representation::FileLoadFailure(info) => fileload::create(info, thread),
        }
    }
}

/// Resolves `kind` and allocates an unconstructed instance in the thread's context.
///
/// Type resolution may call into loaders and runs preemptive.
pub(crate) fn new_object(thread: &ManagedThread, kind: ExceptionKind) -> Result<ObjectRef> {
    let runtime = thread.runtime();
    let ty = {
        let _preemptive = GcModeGuard::preemptive(thread);
        runtime.types().resolve(kind)?
    };

    runtime.allocator().allocate(&ty, thread.context())
}

fn build(
    thread: &ManagedThread,
    kind: ExceptionKind,
    ctor: &[CtorArg<'_>],
    code: HResult,
    message: Option<&str>,
) -> Result<ObjectRef> {
    let allocator = thread.runtime().allocator();
    let object = new_object(thread, kind)?;

    allocator.construct(object, ctor)?;
    allocator.set_field(object, ExceptionField::HResult(code))?;
    if let Some(message) = message {
        allocator.set_field(object, ExceptionField::Message(message))?;
    }

    Ok(object)
}

fn build_with_message(
    thread: &ManagedThread,
    kind: ExceptionKind,
    message: &str,
) -> Result<ObjectRef> {
    build(
        thread,
        kind,
        &[CtorArg::Str(Some(message))],
        hr_from_kind(kind),
        Some(message),
    )
}

/// Converts a failure into a throwable.
///
/// Used whenever creating a throwable (or any other operation that must produce one)
/// failed. Raised representations produce their own throwable, catastrophic conditions
/// map to the preallocated pool and every other failure is classified by its status code.
///
/// # Arguments
///
/// * `thread` - The thread the failure happened on
/// * `error` - The failure to convert
pub fn throwable_from_failure(thread: &ManagedThread, error: Error) -> ObjectRef {
    let pool = thread.runtime().pool();

    match error {
        Error::Raised(exception) => {
            if let Representation::LastThrown = exception.repr {
                if let Some(object) = thread.last_thrown_object() {
                    return object;
                }
            }
            exception.get_throwable(thread)
        }
        Error::OutOfMemory => pool.best_out_of_memory(thread.context()),
        Error::StackOverflow => pool.stack_overflow().object,
        Error::ThreadAbort => pool.thread_abort().object,
        other => {
            let code = other.hresult();
            if is_out_of_memory(code) {
                pool.best_out_of_memory(thread.context())
            } else if code == hr::COR_E_STACKOVERFLOW {
                pool.stack_overflow().object
            } else if code == hr::COR_E_THREADABORTED {
                pool.thread_abort().object
            } else {
                RuntimeException::from_hr(code).get_throwable(thread)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exception::{ComErrorInfo, MemberAccess, RestrictedErrorInfo, TypeLoadInfo},
        runtime::ResourceId,
        test::create_thread,
    };

    #[test]
    fn test_throwable_is_cached() {
        let (_runtime, heap, thread) = create_thread();
        let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation);

        let first = exception.get_throwable(&thread);
        let second = exception.get_throwable(&thread);
        assert_eq!(first, second);
        assert!(exception.has_cached_throwable());

        let stored = heap.object(first).unwrap();
        assert_eq!(stored.ty.kind, ExceptionKind::InvalidOperation);
        assert_eq!(stored.hresult, Some(hr::COR_E_INVALIDOPERATION));
        assert_eq!(stored.message, None);
    }

    #[test]
    fn test_cache_released_on_drop() {
        let (_runtime, heap, thread) = create_thread();
        let handles = heap.handle_count();
        {
            let exception = RuntimeException::kind_only(ExceptionKind::Format);
            exception.get_throwable(&thread);
            assert_eq!(heap.handle_count(), handles + 1);
        }
        assert_eq!(heap.handle_count(), handles);
    }

    #[test]
    fn test_clone_does_not_share_cache() {
        let (_runtime, _heap, thread) = create_thread();
        let exception = RuntimeException::kind_only(ExceptionKind::Format);
        let first = exception.get_throwable(&thread);

        let copy = exception.clone();
        assert!(!copy.has_cached_throwable());
        assert_ne!(copy.get_throwable(&thread), first);
    }

    #[test]
    fn test_interesting_hr_sets_message() {
        let (_runtime, heap, thread) = create_thread();
        let exception = RuntimeException::from_hr(hr::CTL_E_OVERFLOW);
        let object = exception.get_throwable(&thread);

        let stored = heap.object(object).unwrap();
        assert_eq!(stored.ty.kind, ExceptionKind::Overflow);
        assert_eq!(stored.hresult, Some(hr::CTL_E_OVERFLOW));
        assert_eq!(
            stored.message.as_deref(),
            Some("Exception from HRESULT: 0x800A0006")
        );
    }

    #[test]
    fn test_argument_ctor_order() {
        let (_runtime, heap, thread) = create_thread();

        let argument = RuntimeException::argument(
            ExceptionKind::Argument,
            Some("value"),
            Some("Argument_InvalidValue"),
        );
        let stored = heap.object(argument.get_throwable(&thread)).unwrap();
        assert_eq!(
            stored.ctor_str(0),
            Some("Value does not fall within the expected range.")
        );
        assert_eq!(stored.ctor_str(1), Some("value"));

        let null = RuntimeException::argument(
            ExceptionKind::ArgumentNull,
            Some("value"),
            Some("ArgumentNull_Generic"),
        );
        let stored = heap.object(null.get_throwable(&thread)).unwrap();
        assert_eq!(stored.ctor_str(0), Some("value"));
        assert_eq!(stored.ctor_str(1), Some("Value cannot be null."));
    }

    #[test]
    fn test_type_load_ctor() {
        let (_runtime, heap, thread) = create_thread();
        let exception = RuntimeException::type_load(TypeLoadInfo {
            namespace: None,
            type_name: "Widget".to_string(),
            assembly: "Contoso".to_string(),
            message_arg: Some("Missing method.".to_string()),
            why: ResourceId::CLASSLOAD_GENERAL,
        });

        let stored = heap.object(exception.get_throwable(&thread)).unwrap();
        assert_eq!(stored.ty.kind, ExceptionKind::TypeLoad);
        assert_eq!(stored.ctor_str(0), Some("Widget"));
        assert_eq!(stored.ctor_str(1), Some("Contoso"));
        assert_eq!(stored.ctor_str(2), Some("Missing method."));
        assert_eq!(
            stored.message.as_deref(),
            Some("Could not load type 'Widget' from assembly 'Contoso'. Missing method.")
        );
    }

    #[test]
    fn test_com_fields() {
        let (_runtime, heap, thread) = create_thread();
        let info = ComErrorInfo::new(hr::E_ACCESSDENIED)
            .with_description("Denied.")
            .with_help("help.chm", 7)
            .with_restricted(RestrictedErrorInfo {
                description: Some("Denied.".to_string()),
                reference: Some("ref-1".to_string()),
                capability_sid: None,
            });
        let exception = RuntimeException::com(info);

        let stored = heap.object(exception.get_throwable(&thread)).unwrap();
        assert_eq!(stored.ty.kind, ExceptionKind::UnauthorizedAccess);
        assert_eq!(stored.message.as_deref(), Some("Denied."));
        assert_eq!(stored.help_link.as_deref(), Some("help.chm#7"));
        assert_eq!(stored.source.as_deref(), Some(""));
        assert!(stored
            .data
            .contains(&("RestrictedErrorReference".to_string(), "ref-1".to_string())));
    }

    #[test]
    fn test_access_throwable() {
        let (_runtime, heap, thread) = create_thread();
        let exception = RuntimeException::type_access(MemberAccess::named("Contoso.Hidden"));
        let stored = heap.object(exception.get_throwable(&thread)).unwrap();
        assert_eq!(stored.ty.kind, ExceptionKind::TypeAccess);
        assert_eq!(stored.message.as_deref(), Some("Contoso.Hidden"));
    }

    #[test]
    fn test_file_load_oom_uses_pool() {
        let (runtime, _heap, thread) = create_thread();
        let exception = RuntimeException::file_load("a.dll", hr::E_OUTOFMEMORY);
        let object = exception.get_throwable(&thread);
        assert_eq!(
            runtime.allocator().kind_of(object),
            Some(ExceptionKind::OutOfMemory)
        );
    }

    #[test]
    fn test_missing_type_converts_failure() {
        let (runtime, _heap, thread) = create_thread();
        let exception = RuntimeException::kind_only(ExceptionKind::LayoutCycle);

        // The XAML assembly is not registered, so resolution fails with a type load error.
        let object = exception.get_throwable(&thread);
        assert_eq!(
            runtime.allocator().kind_of(object),
            Some(ExceptionKind::TypeLoad)
        );
    }

    #[test]
    fn test_inner_exception_attached() {
        let (_runtime, heap, thread) = create_thread();
        let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation)
            .with_inner(RuntimeException::kind_only(ExceptionKind::Format))
            .unwrap();

        let object = exception.get_throwable(&thread);
        let inner = heap.object(object).unwrap().inner.unwrap();
        assert_eq!(heap.object(inner).unwrap().ty.kind, ExceptionKind::Format);
    }

    #[test]
    fn test_failure_conversion() {
        let (runtime, _heap, thread) = create_thread();
        let pool = runtime.pool();

        assert_eq!(
            throwable_from_failure(&thread, Error::StackOverflow),
            pool.stack_overflow().object
        );
        assert_eq!(
            throwable_from_failure(&thread, Error::ThreadAbort),
            pool.thread_abort().object
        );

        let object = throwable_from_failure(&thread, Error::Hr(hr::COR_E_IO));
        assert_eq!(runtime.allocator().kind_of(object), Some(ExceptionKind::Io));

        let object = throwable_from_failure(&thread, Error::Hr(hr::ERROR_NOT_ENOUGH_MEMORY));
        assert_eq!(
            runtime.allocator().kind_of(object),
            Some(ExceptionKind::OutOfMemory)
        );
    }

    #[test]
    fn test_failure_conversion_reuses_last_thrown() {
        let (_runtime, _heap, thread) = create_thread();
        let thrown = RuntimeException::kind_only(ExceptionKind::Format).get_throwable(&thread);
        thread.set_last_thrown_object(Some(thrown));

        let object = throwable_from_failure(&thread, raised!(RuntimeException::last_thrown()));
        assert_eq!(object, thrown);
    }
}
