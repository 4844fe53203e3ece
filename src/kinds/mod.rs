//! Exception kinds and status-code classification.
//!
//! An [`ExceptionKind`] names one concrete managed exception type the engine knows how to
//! create. Kinds are the bridge between native status codes and managed types: every
//! kind carries one or more `HRESULT`s (the first one canonical), and every status code
//! classifies back to a kind.
//!
//! # Overview
//!
//! - [`ExceptionKind`] - closed enumeration of known exception types
//! - [`KindInfo`] - namespace, name, hosting assembly and status codes of a kind
//! - [`hr_from_kind`] / [`kind_from_hr`] - classification in both directions
//! - [`file_load_kind`] - classification used by assembly load failures
//!
//! # Core and Framework Kinds
//!
//! Kinds up to the XAML family are hosted by the core library and resolve through the core
//! type table. The remaining kinds live in framework assemblies and resolve through the
//! framework exception loader; see [`KindAssembly`].
//!
//! # Example
//!
//! ```rust
//! use clrexc::{kinds::{kind_from_hr, hr_from_kind, ExceptionKind}, hresult::{hr, HResult}};
//!
//! assert_eq!(hr_from_kind(ExceptionKind::Format), hr::COR_E_FORMAT);
//! assert_eq!(kind_from_hr(hr::COR_E_FORMAT, false), ExceptionKind::Format);
//!
//! // Unknown codes surface as COMException, or as Exception in WinRT mode
//! assert_eq!(kind_from_hr(HResult::new(0x8000_1234), false), ExceptionKind::Com);
//! assert_eq!(kind_from_hr(HResult::new(0x8000_1234), true), ExceptionKind::Exception);
//! ```

mod tables;

use std::fmt;

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::{
    hresult::{hr, HResult},
    runtime::resources::ResourceId,
};

pub use tables::{KIND_TABLE, XAML_ASSEMBLY};

/// Closed enumeration of the exception types the engine can materialize.
///
/// The discriminant indexes [`KIND_TABLE`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount, IntoStaticStr,
)]
#[allow(missing_docs)]
pub enum ExceptionKind {
    Exception,
    SystemException,
    Application,
    NullReference,
    AccessViolation,
    Argument,
    ArgumentNull,
    ArgumentOutOfRange,
    Arithmetic,
    ArrayTypeMismatch,
    BadImageFormat,
    AppDomainUnloaded,
    CannotUnloadAppDomain,
    ContextMarshal,
    DataMisaligned,
    DivideByZero,
    DllNotFound,
    DuplicateWaitObject,
    EntryPointNotFound,
    ExecutionEngine,
    FieldAccess,
    Format,
    IndexOutOfRange,
    InsufficientExecutionStack,
    InsufficientMemory,
    InvalidCast,
    InvalidOperation,
    InvalidProgram,
    MemberAccess,
    MethodAccess,
    MissingField,
    MissingMember,
    MissingMethod,
    MulticastNotSupported,
    NotFiniteNumber,
    NotImplemented,
    NotSupported,
    ObjectDisposed,
    OperationCanceled,
    OutOfMemory,
    Overflow,
    PlatformNotSupported,
    Rank,
    StackOverflow,
    Timeout,
    TypeAccess,
    TypeInitialization,
    TypeLoad,
    UnauthorizedAccess,
    KeyNotFound,
    Io,
    DirectoryNotFound,
    EndOfStream,
    FileLoad,
    FileNotFound,
    PathTooLong,
    Com,
    External,
    InvalidComObject,
    InvalidOleVariantType,
    MarshalDirective,
    SafeArrayRankMismatch,
    SafeArrayTypeMismatch,
    SehException,
    MissingManifestResource,
    MissingSatelliteAssembly,
    Security,
    Verification,
    HostProtection,
    Serialization,
    AbandonedMutex,
    SemaphoreFull,
    SynchronizationLock,
    ThreadAbort,
    ThreadInterrupted,
    ThreadStart,
    ThreadState,
    WaitHandleCannotBeOpened,
    XamlParse,
    LayoutCycle,
    ElementNotAvailable,
    ElementNotEnabled,
}

/// Where the managed type of a kind lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindAssembly {
    /// The core library; resolved through the core type table.
    Core,
    /// A framework assembly with the given name; resolved through the framework loader.
    Framework(&'static str),
}

/// Static classification data of one [`ExceptionKind`].
#[derive(Debug)]
pub struct KindInfo {
    /// The kind this entry describes
    pub kind: ExceptionKind,
    /// Namespace of the managed type
    pub namespace: &'static str,
    /// Simple name of the managed type
    pub name: &'static str,
    /// Hosting assembly
    pub assembly: KindAssembly,
    /// Whether messages of this kind always show the status code
    pub display_hr: bool,
    /// Status codes classified to this kind, canonical code first
    pub hrs: &'static [HResult],
}

impl ExceptionKind {
    /// Returns the classification data of this kind.
    #[must_use]
    pub fn info(self) -> &'static KindInfo {
        &KIND_TABLE[self as usize]
    }

    /// Returns the fully qualified managed type name, e.g. `System.ArgumentException`.
    #[must_use]
    pub fn full_name(self) -> String {
        let info = self.info();
        format!("{}.{}", info.namespace, info.name)
    }

    /// Returns `true` when the kind resolves through the core type table.
    #[must_use]
    pub fn is_core(self) -> bool {
        matches!(self.info().assembly, KindAssembly::Core)
    }

    /// Returns `true` for the `ArgumentException` family.
    #[must_use]
    pub fn is_argument_kind(self) -> bool {
        matches!(
            self,
            ExceptionKind::Argument | ExceptionKind::ArgumentNull | ExceptionKind::ArgumentOutOfRange
        )
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info();
        write!(f, "{}.{}", info.namespace, info.name)
    }
}

/// Returns the canonical status code of `kind`.
#[must_use]
pub fn hr_from_kind(kind: ExceptionKind) -> HResult {
    kind.info().hrs.first().copied().unwrap_or(hr::E_FAIL)
}

/// Classifies a status code into an exception kind.
///
/// In WinRT mode the WinRT-only table is consulted first. Codes no table knows classify as
/// [`ExceptionKind::Com`], or as [`ExceptionKind::Exception`] in WinRT mode.
///
/// # Arguments
///
/// * `code` - The status code to classify
/// * `winrt` - Whether WinRT classification is active
#[must_use]
pub fn kind_from_hr(code: HResult, winrt: bool) -> ExceptionKind {
    if winrt {
        if let Some((_, kind)) = tables::WINRT_TABLE.iter().find(|(hr, _)| *hr == code) {
            return *kind;
        }
    }

    KIND_TABLE
        .iter()
        .find(|info| info.hrs.contains(&code))
        .map_or(
            if winrt {
                ExceptionKind::Exception
            } else {
                ExceptionKind::Com
            },
            |info| info.kind,
        )
}

/// Returns `true` if the status code is one of the load failures that mean "not found".
#[must_use]
pub fn is_file_not_found(code: HResult) -> bool {
    tables::FILE_NOT_FOUND_HRS.contains(&code)
}

/// Classifies an assembly or file load failure.
///
/// Out-of-memory codes short-circuit every other classification. Not-found codes produce
/// [`ExceptionKind::FileNotFound`], image format codes [`ExceptionKind::BadImageFormat`] and
/// everything else [`ExceptionKind::FileLoad`].
#[must_use]
pub fn file_load_kind(code: HResult) -> ExceptionKind {
    if tables::FILE_LOAD_OOM_HRS.contains(&code) {
        ExceptionKind::OutOfMemory
    } else if is_file_not_found(code) {
        ExceptionKind::FileNotFound
    } else if ExceptionKind::BadImageFormat.info().hrs.contains(&code) {
        ExceptionKind::BadImageFormat
    } else {
        ExceptionKind::FileLoad
    }
}

/// Returns the message resource used for a load failure of the given kind.
#[must_use]
pub fn file_load_resource(kind: ExceptionKind) -> ResourceId {
    match kind {
        ExceptionKind::FileNotFound => ResourceId::FILE_NOT_FOUND,
        ExceptionKind::BadImageFormat => ResourceId::BAD_IMAGE_FORMAT,
        _ => ResourceId::FILE_LOAD_GENERIC,
    }
}
