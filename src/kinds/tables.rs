//! Static classification data for exception kinds.
//!
//! [`KIND_TABLE`] is indexed by the kind discriminant. Every entry lists its status codes
//! with the canonical code first; a code may appear under several kinds, in which case the
//! first entry in table order wins when classifying.

use crate::{
    hresult::{hr, HResult},
    kinds::{ExceptionKind, KindAssembly, KindInfo},
};

const SYSTEM: &str = "System";
const COLLECTIONS: &str = "System.Collections.Generic";
const IO: &str = "System.IO";
const INTEROP: &str = "System.Runtime.InteropServices";
const RESOURCES: &str = "System.Resources";
const SECURITY: &str = "System.Security";
const SERIALIZATION: &str = "System.Runtime.Serialization";
const THREADING: &str = "System.Threading";
const XAML: &str = "Windows.UI.Xaml";
const XAML_MARKUP: &str = "Windows.UI.Xaml.Markup";
const XAML_AUTOMATION: &str = "Windows.UI.Xaml.Automation";

/// Assembly that hosts the XAML exception types.
pub const XAML_ASSEMBLY: &str = "System.Runtime.WindowsRuntime.UI.Xaml";

macro_rules! core {
    ($kind:ident, $ns:expr, $name:literal, $display:literal, [$($hr:expr),+ $(,)?]) => {
        KindInfo {
            kind: ExceptionKind::$kind,
            namespace: $ns,
            name: $name,
            assembly: KindAssembly::Core,
            display_hr: $display,
            hrs: &[$($hr),+],
        }
    };
}

macro_rules! framework {
    ($kind:ident, $ns:expr, $name:literal, $assembly:expr, [$($hr:expr),+ $(,)?]) => {
        KindInfo {
            kind: ExceptionKind::$kind,
            namespace: $ns,
            name: $name,
            assembly: KindAssembly::Framework($assembly),
            display_hr: false,
            hrs: &[$($hr),+],
        }
    };
}

/// Classification data for every [`ExceptionKind`], in discriminant order.
pub static KIND_TABLE: &[KindInfo] = &[
    core!(Exception, SYSTEM, "Exception", false, [hr::COR_E_EXCEPTION]),
    core!(SystemException, SYSTEM, "SystemException", false, [hr::COR_E_SYSTEM]),
    core!(Application, SYSTEM, "ApplicationException", false, [hr::COR_E_APPLICATION]),
    core!(NullReference, SYSTEM, "NullReferenceException", false, [hr::COR_E_NULLREFERENCE]),
    core!(AccessViolation, SYSTEM, "AccessViolationException", false, [hr::COR_E_ACCESSVIOLATION]),
    core!(Argument, SYSTEM, "ArgumentException", false, [hr::COR_E_ARGUMENT]),
    core!(ArgumentNull, SYSTEM, "ArgumentNullException", false, [hr::COR_E_ARGUMENTNULL]),
    core!(
        ArgumentOutOfRange,
        SYSTEM,
        "ArgumentOutOfRangeException",
        false,
        [hr::COR_E_ARGUMENTOUTOFRANGE, hr::DISP_E_BADINDEX]
    ),
    core!(Arithmetic, SYSTEM, "ArithmeticException", false, [hr::COR_E_ARITHMETIC]),
    core!(
        ArrayTypeMismatch,
        SYSTEM,
        "ArrayTypeMismatchException",
        false,
        [hr::COR_E_ARRAYTYPEMISMATCH]
    ),
    core!(
        BadImageFormat,
        SYSTEM,
        "BadImageFormatException",
        true,
        [
            hr::COR_E_BADIMAGEFORMAT,
            hr::CLDB_E_FILE_OLDVER,
            hr::CLDB_E_INDEX_NOTFOUND,
            hr::CLDB_E_FILE_CORRUPT,
            hr::COR_E_NEWER_RUNTIME,
            hr::COR_E_ASSEMBLYEXPECTED,
            hr::ERROR_BAD_EXE_FORMAT,
            hr::ERROR_EXE_MARKED_INVALID,
            hr::CORSEC_E_INVALID_IMAGE_FORMAT,
            hr::ERROR_NOACCESS,
            hr::ERROR_INVALID_ORDINAL,
            hr::ERROR_INVALID_DLL,
            hr::ERROR_FILE_CORRUPT,
            hr::META_E_BAD_SIGNATURE,
            hr::COR_E_LOADING_REFERENCE_ASSEMBLY,
        ]
    ),
    core!(
        AppDomainUnloaded,
        SYSTEM,
        "AppDomainUnloadedException",
        false,
        [hr::COR_E_APPDOMAINUNLOADED]
    ),
    core!(
        CannotUnloadAppDomain,
        SYSTEM,
        "CannotUnloadAppDomainException",
        false,
        [hr::COR_E_CANNOTUNLOADAPPDOMAIN]
    ),
    core!(ContextMarshal, SYSTEM, "ContextMarshalException", false, [hr::COR_E_CONTEXTMARSHAL]),
    core!(DataMisaligned, SYSTEM, "DataMisalignedException", false, [hr::COR_E_DATAMISALIGNED]),
    core!(
        DivideByZero,
        SYSTEM,
        "DivideByZeroException",
        false,
        [hr::COR_E_DIVIDEBYZERO, hr::CTL_E_DIVISIONBYZERO]
    ),
    core!(DllNotFound, SYSTEM, "DllNotFoundException", false, [hr::COR_E_DLLNOTFOUND]),
    core!(
        DuplicateWaitObject,
        SYSTEM,
        "DuplicateWaitObjectException",
        false,
        [hr::COR_E_DUPLICATEWAITOBJECT]
    ),
    core!(
        EntryPointNotFound,
        SYSTEM,
        "EntryPointNotFoundException",
        false,
        [hr::COR_E_ENTRYPOINTNOTFOUND]
    ),
    core!(
        ExecutionEngine,
        SYSTEM,
        "ExecutionEngineException",
        false,
        [hr::COR_E_EXECUTIONENGINE]
    ),
    core!(FieldAccess, SYSTEM, "FieldAccessException", false, [hr::COR_E_FIELDACCESS]),
    core!(Format, SYSTEM, "FormatException", false, [hr::COR_E_FORMAT]),
    core!(
        IndexOutOfRange,
        SYSTEM,
        "IndexOutOfRangeException",
        false,
        [hr::COR_E_INDEXOUTOFRANGE, hr::CTL_E_SUBSCRIPTOUTOFRANGE]
    ),
    core!(
        InsufficientExecutionStack,
        SYSTEM,
        "InsufficientExecutionStackException",
        false,
        [hr::COR_E_INSUFFICIENTEXECUTIONSTACK]
    ),
    core!(
        InsufficientMemory,
        SYSTEM,
        "InsufficientMemoryException",
        false,
        [hr::COR_E_INSUFFICIENTMEMORY]
    ),
    core!(InvalidCast, SYSTEM, "InvalidCastException", false, [hr::COR_E_INVALIDCAST]),
    core!(
        InvalidOperation,
        SYSTEM,
        "InvalidOperationException",
        false,
        [hr::COR_E_INVALIDOPERATION]
    ),
    core!(InvalidProgram, SYSTEM, "InvalidProgramException", false, [hr::COR_E_INVALIDPROGRAM]),
    core!(MemberAccess, SYSTEM, "MemberAccessException", false, [hr::COR_E_MEMBERACCESS]),
    core!(MethodAccess, SYSTEM, "MethodAccessException", false, [hr::COR_E_METHODACCESS]),
    core!(MissingField, SYSTEM, "MissingFieldException", false, [hr::COR_E_MISSINGFIELD]),
    core!(MissingMember, SYSTEM, "MissingMemberException", false, [hr::COR_E_MISSINGMEMBER]),
    core!(MissingMethod, SYSTEM, "MissingMethodException", false, [hr::COR_E_MISSINGMETHOD]),
    core!(
        MulticastNotSupported,
        SYSTEM,
        "MulticastNotSupportedException",
        false,
        [hr::COR_E_MULTICASTNOTSUPPORTED]
    ),
    core!(NotFiniteNumber, SYSTEM, "NotFiniteNumberException", false, [hr::COR_E_NOTFINITENUMBER]),
    core!(NotImplemented, SYSTEM, "NotImplementedException", false, [hr::COR_E_NOTIMPLEMENTED]),
    core!(NotSupported, SYSTEM, "NotSupportedException", false, [hr::COR_E_NOTSUPPORTED]),
    core!(ObjectDisposed, SYSTEM, "ObjectDisposedException", false, [hr::COR_E_OBJECTDISPOSED]),
    core!(
        OperationCanceled,
        SYSTEM,
        "OperationCanceledException",
        false,
        [hr::COR_E_OPERATIONCANCELED]
    ),
    core!(
        OutOfMemory,
        SYSTEM,
        "OutOfMemoryException",
        false,
        [
            hr::COR_E_OUTOFMEMORY,
            hr::CTL_E_OUTOFMEMORY,
            hr::ERROR_NOT_ENOUGH_MEMORY,
            hr::STATUS_NO_MEMORY,
        ]
    ),
    core!(
        Overflow,
        SYSTEM,
        "OverflowException",
        false,
        [hr::COR_E_OVERFLOW, hr::CTL_E_OVERFLOW, hr::DISP_E_OVERFLOW]
    ),
    core!(
        PlatformNotSupported,
        SYSTEM,
        "PlatformNotSupportedException",
        false,
        [hr::COR_E_PLATFORMNOTSUPPORTED]
    ),
    core!(Rank, SYSTEM, "RankException", false, [hr::COR_E_RANK]),
    core!(
        StackOverflow,
        SYSTEM,
        "StackOverflowException",
        false,
        [hr::COR_E_STACKOVERFLOW, hr::CTL_E_OUTOFSTACKSPACE]
    ),
    core!(Timeout, SYSTEM, "TimeoutException", false, [hr::COR_E_TIMEOUT]),
    core!(TypeAccess, SYSTEM, "TypeAccessException", false, [hr::COR_E_TYPEACCESS]),
    core!(
        TypeInitialization,
        SYSTEM,
        "TypeInitializationException",
        false,
        [hr::COR_E_TYPEINITIALIZATION]
    ),
    core!(TypeLoad, SYSTEM, "TypeLoadException", false, [hr::COR_E_TYPELOAD]),
    core!(
        UnauthorizedAccess,
        SYSTEM,
        "UnauthorizedAccessException",
        false,
        [hr::COR_E_UNAUTHORIZEDACCESS, hr::CTL_E_PERMISSIONDENIED]
    ),
    core!(KeyNotFound, COLLECTIONS, "KeyNotFoundException", false, [hr::COR_E_KEYNOTFOUND]),
    core!(Io, IO, "IOException", false, [hr::COR_E_IO, hr::CTL_E_DEVICEIOERROR]),
    core!(
        DirectoryNotFound,
        IO,
        "DirectoryNotFoundException",
        false,
        [hr::COR_E_DIRECTORYNOTFOUND, hr::CTL_E_PATHNOTFOUND]
    ),
    core!(
        EndOfStream,
        IO,
        "EndOfStreamException",
        false,
        [hr::COR_E_ENDOFSTREAM, hr::CTL_E_ENDOFFILE]
    ),
    core!(
        FileLoad,
        IO,
        "FileLoadException",
        true,
        [
            hr::COR_E_FILELOAD,
            hr::FUSION_E_REF_DEF_MISMATCH,
            hr::FUSION_E_INVALID_NAME,
        ]
    ),
    core!(
        FileNotFound,
        IO,
        "FileNotFoundException",
        true,
        [hr::COR_E_FILENOTFOUND, hr::CTL_E_FILENOTFOUND]
    ),
    core!(PathTooLong, IO, "PathTooLongException", false, [hr::COR_E_PATHTOOLONG]),
    core!(Com, INTEROP, "COMException", true, [hr::E_FAIL]),
    core!(External, INTEROP, "ExternalException", true, [hr::E_FAIL]),
    core!(
        InvalidComObject,
        INTEROP,
        "InvalidComObjectException",
        false,
        [hr::COR_E_INVALIDCOMOBJECT]
    ),
    core!(
        InvalidOleVariantType,
        INTEROP,
        "InvalidOleVariantTypeException",
        false,
        [hr::COR_E_INVALIDOLEVARIANTTYPE]
    ),
    core!(
        MarshalDirective,
        INTEROP,
        "MarshalDirectiveException",
        false,
        [hr::COR_E_MARSHALDIRECTIVE]
    ),
    core!(
        SafeArrayRankMismatch,
        INTEROP,
        "SafeArrayRankMismatchException",
        false,
        [hr::COR_E_SAFEARRAYRANKMISMATCH]
    ),
    core!(
        SafeArrayTypeMismatch,
        INTEROP,
        "SafeArrayTypeMismatchException",
        false,
        [hr::COR_E_SAFEARRAYTYPEMISMATCH]
    ),
    core!(SehException, INTEROP, "SEHException", true, [hr::E_FAIL]),
    core!(
        MissingManifestResource,
        RESOURCES,
        "MissingManifestResourceException",
        false,
        [hr::COR_E_MISSINGMANIFESTRESOURCE]
    ),
    core!(
        MissingSatelliteAssembly,
        RESOURCES,
        "MissingSatelliteAssemblyException",
        false,
        [hr::COR_E_MISSINGSATELLITEASSEMBLY]
    ),
    core!(Security, SECURITY, "SecurityException", false, [hr::COR_E_SECURITY]),
    core!(Verification, SECURITY, "VerificationException", false, [hr::COR_E_VERIFICATION]),
    core!(
        HostProtection,
        SECURITY,
        "HostProtectionException",
        false,
        [hr::COR_E_HOSTPROTECTION]
    ),
    core!(
        Serialization,
        SERIALIZATION,
        "SerializationException",
        false,
        [hr::COR_E_SERIALIZATION]
    ),
    core!(AbandonedMutex, THREADING, "AbandonedMutexException", false, [hr::COR_E_ABANDONEDMUTEX]),
    core!(SemaphoreFull, THREADING, "SemaphoreFullException", false, [hr::COR_E_SEMAPHOREFULL]),
    core!(
        SynchronizationLock,
        THREADING,
        "SynchronizationLockException",
        false,
        [hr::COR_E_SYNCHRONIZATIONLOCK]
    ),
    core!(ThreadAbort, THREADING, "ThreadAbortException", false, [hr::COR_E_THREADABORTED]),
    core!(
        ThreadInterrupted,
        THREADING,
        "ThreadInterruptedException",
        false,
        [hr::COR_E_THREADINTERRUPTED]
    ),
    core!(ThreadStart, THREADING, "ThreadStartException", false, [hr::COR_E_THREADSTART]),
    core!(ThreadState, THREADING, "ThreadStateException", false, [hr::COR_E_THREADSTATE]),
    core!(
        WaitHandleCannotBeOpened,
        THREADING,
        "WaitHandleCannotBeOpenedException",
        false,
        [hr::COR_E_WAITHANDLECANNOTBEOPENED]
    ),
    framework!(
        XamlParse,
        XAML_MARKUP,
        "XamlParseException",
        XAML_ASSEMBLY,
        [hr::E_XAMLPARSEFAILED]
    ),
    framework!(LayoutCycle, XAML, "LayoutCycleException", XAML_ASSEMBLY, [hr::E_LAYOUTCYCLE]),
    framework!(
        ElementNotAvailable,
        XAML_AUTOMATION,
        "ElementNotAvailableException",
        XAML_ASSEMBLY,
        [hr::E_ELEMENTNOTAVAILABLE]
    ),
    framework!(
        ElementNotEnabled,
        XAML_AUTOMATION,
        "ElementNotEnabledException",
        XAML_ASSEMBLY,
        [hr::E_ELEMENTNOTENABLED]
    ),
];

/// Status codes that only classify in WinRT mode, consulted before [`KIND_TABLE`].
pub static WINRT_TABLE: &[(HResult, ExceptionKind)] = &[
    (hr::E_CHANGED_STATE, ExceptionKind::InvalidOperation),
    (hr::E_ILLEGAL_STATE_CHANGE, ExceptionKind::InvalidOperation),
    (hr::E_ILLEGAL_METHOD_CALL, ExceptionKind::InvalidOperation),
    (hr::E_ILLEGAL_DELEGATE_ASSIGNMENT, ExceptionKind::InvalidOperation),
    (hr::APPMODEL_ERROR_NO_PACKAGE, ExceptionKind::InvalidOperation),
    (hr::RO_E_CLOSED, ExceptionKind::ObjectDisposed),
    (hr::E_BOUNDS, ExceptionKind::ArgumentOutOfRange),
    (hr::E_XAMLPARSEFAILED, ExceptionKind::XamlParse),
    (hr::E_LAYOUTCYCLE, ExceptionKind::LayoutCycle),
    (hr::E_ELEMENTNOTAVAILABLE, ExceptionKind::ElementNotAvailable),
    (hr::E_ELEMENTNOTENABLED, ExceptionKind::ElementNotEnabled),
];

/// Load failures reported as `FileNotFoundException`.
pub static FILE_NOT_FOUND_HRS: &[HResult] = &[
    hr::ERROR_FILE_NOT_FOUND,
    hr::ERROR_MOD_NOT_FOUND,
    hr::ERROR_INVALID_NAME,
    hr::CTL_E_FILENOTFOUND,
    hr::ERROR_PATH_NOT_FOUND,
    hr::ERROR_BAD_NET_NAME,
    hr::ERROR_BAD_NETPATH,
    hr::ERROR_NOT_READY,
    hr::ERROR_WRONG_TARGET_NAME,
    hr::ERROR_DLL_NOT_FOUND,
    hr::INET_E_UNKNOWN_PROTOCOL,
    hr::INET_E_CONNECTION_TIMEOUT,
    hr::INET_E_CANNOT_CONNECT,
    hr::INET_E_RESOURCE_NOT_FOUND,
    hr::INET_E_OBJECT_NOT_FOUND,
    hr::INET_E_DOWNLOAD_FAILURE,
    hr::INET_E_DATA_NOT_AVAILABLE,
];

/// Load failures reported as `OutOfMemoryException`.
pub static FILE_LOAD_OOM_HRS: &[HResult] = &[hr::E_OUTOFMEMORY, hr::NTE_NO_MEMORY];
