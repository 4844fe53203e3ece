//! Integration tests for exception representations and their throwables.
//!
//! These tests go through the public API only: a runtime backed by an [`ExceptionHeap`],
//! a thread attached to the default context, and the objects the heap ends up holding.

use std::sync::Arc;

use clrexc::{kinds::KIND_TABLE, prelude::*, Result};
use strum::IntoEnumIterator;

fn runtime_with_heap() -> Result<(Arc<ExceptionRuntime>, Arc<ExceptionHeap>, Arc<ManagedThread>)> {
    let heap = Arc::new(ExceptionHeap::new());
    let runtime = RuntimeBuilder::new().allocator(heap.clone()).build()?;
    let thread = runtime.attach_thread(ContextId::DEFAULT)?;
    Ok((runtime, heap, thread))
}

/// Every kind whose canonical code belongs to no other kind classifies back to itself.
#[test]
fn test_kind_classification_roundtrip() -> Result<()> {
    let mut checked = 0;

    for kind in ExceptionKind::iter() {
        let Some(canonical) = kind.info().hrs.first().copied() else {
            continue;
        };
        let owner = KIND_TABLE
            .iter()
            .find(|info| info.hrs.contains(&canonical))
            .map(|info| info.kind);
        if owner != Some(kind) {
            continue;
        }

        assert_eq!(hr_from_kind(kind), canonical);
        assert_eq!(kind_from_hr(canonical, false), kind, "{kind} did not roundtrip");
        checked += 1;
    }

    assert!(checked > 30, "only {checked} kinds own their canonical code");
    Ok(())
}

#[test]
fn test_unknown_code_classification() -> Result<()> {
    let unknown = HResult::new(0x8BAD_F00D);
    assert_eq!(kind_from_hr(unknown, false), ExceptionKind::Com);
    assert_eq!(kind_from_hr(unknown, true), ExceptionKind::Exception);
    Ok(())
}

#[test]
fn test_throwable_identity() -> Result<()> {
    let (_runtime, heap, thread) = runtime_with_heap()?;

    let exception = RuntimeException::kind_only(ExceptionKind::InvalidCast);
    let first = exception.get_throwable(&thread);
    let second = exception.get_throwable(&thread);
    assert_eq!(first, second);

    let stored = heap.object(first).expect("throwable not on the heap");
    assert_eq!(stored.ty.kind, ExceptionKind::InvalidCast);
    assert_eq!(stored.hresult, Some(hr_from_kind(ExceptionKind::InvalidCast)));
    Ok(())
}

#[test]
fn test_pool_members_are_preallocated() -> Result<()> {
    let (runtime, heap, _thread) = runtime_with_heap()?;
    let pool = runtime.pool();

    let members = [
        pool.base_exception(),
        pool.out_of_memory(),
        pool.stack_overflow(),
        pool.execution_engine(),
        pool.thread_abort(),
    ];
    for member in members {
        assert!(pool.is_preallocated_object(member.object));
        assert!(pool.is_preallocated_handle(member.handle));
        assert!(heap.is_handle_live(member.handle));
        assert_eq!(pool.handle_for_object(member.object), Some(member.handle));
    }

    let stored = heap
        .object(pool.out_of_memory().object)
        .expect("pool object not on the heap");
    assert_eq!(stored.ty.kind, ExceptionKind::OutOfMemory);
    Ok(())
}

/// A constructor that keeps raising the exception being created must not recurse forever.
#[test]
fn test_recursive_creation_is_bounded() -> Result<()> {
    let (runtime, heap, thread) = runtime_with_heap()?;

    heap.queue_constructor_failure(Error::Raised(Box::new(RuntimeException::kind_only(
        ExceptionKind::Argument,
    ))));

    let exception = RuntimeException::kind_only(ExceptionKind::Argument);
    let throwable = exception.get_throwable(&thread);
    assert!(runtime.pool().is_preallocated_object(throwable));
    assert_eq!(throwable, runtime.pool().base_exception().object);
    assert_eq!(exception.get_throwable(&thread), throwable);
    Ok(())
}

#[test]
fn test_message_with_arguments() -> Result<()> {
    let (_runtime, heap, thread) = runtime_with_heap()?;

    let exception = RuntimeException::message(
        ExceptionKind::Argument,
        hr::COR_E_ARGUMENT,
        Some(ResourceId::INVALID_ARGUMENT_VALUE),
        &["x"],
    );
    assert_eq!(exception.get_hr(&thread), hr::COR_E_ARGUMENT);

    let message = exception.get_message(&thread);
    assert!(message.contains("'x'"), "unexpected message {message:?}");

    let throwable = exception.get_throwable(&thread);
    let stored = heap.object(throwable).expect("throwable not on the heap");
    assert_eq!(stored.ty.kind, ExceptionKind::Argument);
    assert_eq!(stored.hresult, Some(hr::COR_E_ARGUMENT));
    assert_eq!(stored.message.as_deref(), Some(message.as_str()));
    Ok(())
}

#[test]
fn test_file_load_out_of_memory() -> Result<()> {
    let (_runtime, _heap, thread) = runtime_with_heap()?;

    let exception = RuntimeException::file_load(r"C:\app\Plugin.dll", hr::E_OUTOFMEMORY);
    assert_eq!(exception.kind(&thread), Some(ExceptionKind::OutOfMemory));
    assert_eq!(exception.get_hr(&thread), hr::E_OUTOFMEMORY);
    Ok(())
}

#[test]
fn test_file_not_found() -> Result<()> {
    let (_runtime, _heap, thread) = runtime_with_heap()?;

    let exception = RuntimeException::file_load("Missing.dll", hr::COR_E_FILENOTFOUND);
    assert_eq!(exception.kind(&thread), Some(ExceptionKind::FileNotFound));
    assert!(exception.get_message(&thread).contains("Missing.dll"));
    Ok(())
}

#[test]
fn test_best_out_of_memory_falls_back_to_pool() -> Result<()> {
    let (runtime, heap, thread) = runtime_with_heap()?;
    let pool = runtime.pool();

    let fresh = pool.best_out_of_memory(thread.context());
    assert!(!pool.is_preallocated_object(fresh));

    heap.fail_next_allocations(1);
    let fallback = pool.best_out_of_memory(thread.context());
    assert_eq!(fallback, pool.out_of_memory().object);
    Ok(())
}

#[test]
fn test_allocation_failure_yields_out_of_memory() -> Result<()> {
    let (runtime, heap, thread) = runtime_with_heap()?;

    heap.fail_next_allocations(2);
    let exception = RuntimeException::kind_only(ExceptionKind::InvalidOperation);
    let throwable = exception.get_throwable(&thread);
    assert_eq!(throwable, runtime.pool().out_of_memory().object);
    Ok(())
}

#[test]
fn test_inner_exception_attached() -> Result<()> {
    let (_runtime, heap, thread) = runtime_with_heap()?;

    let exception = RuntimeException::kind_only(ExceptionKind::TypeInitialization)
        .with_inner(RuntimeException::kind_only(ExceptionKind::DivideByZero))?;
    let throwable = exception.get_throwable(&thread);

    let stored = heap.object(throwable).expect("throwable not on the heap");
    let inner = stored.inner.expect("inner exception missing");
    let inner = heap.object(inner).expect("inner not on the heap");
    assert_eq!(inner.ty.kind, ExceptionKind::DivideByZero);
    Ok(())
}

/// With nothing thrown yet, the last-thrown representation still yields a stable object.
#[test]
fn test_last_thrown_without_object() -> Result<()> {
    let (runtime, heap, thread) = runtime_with_heap()?;
    assert!(thread.last_thrown_object().is_none());

    let exception = RuntimeException::last_thrown();
    let throwable = exception.get_throwable(&thread);
    assert!(heap.object(throwable).is_some());
    assert!(!runtime.pool().is_preallocated_object(throwable));
    assert_eq!(exception.get_throwable(&thread), throwable);
    assert!(thread.last_thrown_object().is_none());
    Ok(())
}

/// Shared pool objects never pick up the inner exception of one representation.
#[test]
fn test_inner_exception_skipped_for_pool_object() -> Result<()> {
    let (runtime, heap, thread) = runtime_with_heap()?;
    let pool = runtime.pool();

    heap.fail_next_allocations(2);
    let exception = RuntimeException::kind_only(ExceptionKind::TypeInitialization)
        .with_inner(RuntimeException::kind_only(ExceptionKind::DivideByZero))?;
    let throwable = exception.get_throwable(&thread);
    assert_eq!(throwable, pool.out_of_memory().object);

    let stored = heap.object(throwable).expect("pool object not on the heap");
    assert!(stored.inner.is_none());
    assert_eq!(exception.get_throwable(&thread), throwable);
    Ok(())
}
