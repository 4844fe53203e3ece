//! HRESULT status codes and native (SEH) exception codes.
//!
//! Status codes are the one place where bit-exact compatibility with the outside world
//! matters: they are produced by native and interop code, stored in the `HResult` field of
//! managed exception objects and used as the classification key that maps a failure onto
//! an [`ExceptionKind`](crate::kinds::ExceptionKind).
//!
//! # Overview
//!
//! - [`HResult`] - 32-bit status code newtype with the usual bit-field accessors
//! - [`hr`] - named HRESULT constants used by the classification tables
//! - [`seh`] - native exception codes delivered by the OS unwinder, plus the
//!   process-corruption predicate and the native fault translation table
//! - [`is_transient`] - codes that describe a condition of the moment (OOM, aborts) rather
//!   than a property of the operation that failed

use std::fmt;

/// A 32-bit `HRESULT` status code.
///
/// Bit 31 is the severity bit (set for failures), bits 16..=26 carry the facility and the
/// low 16 bits the code. Values are compared bit-exactly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct HResult(u32);

impl HResult {
    /// Creates a status code from its raw bit pattern.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        HResult(value)
    }

    /// Returns the raw bit pattern.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the value reinterpreted as the signed integer stored in managed objects.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }

    /// Returns `true` when the severity bit is set.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the facility field.
    #[must_use]
    pub const fn facility(self) -> u16 {
        ((self.0 >> 16) & 0x1FFF) as u16
    }

    /// Returns the code field.
    #[must_use]
    pub const fn code(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Converts a Win32 error code into an `HRESULT` (`HRESULT_FROM_WIN32`).
    #[must_use]
    pub const fn from_win32(error: u32) -> Self {
        if error as i32 <= 0 {
            HResult(error)
        } else {
            HResult((error & 0x0000_FFFF) | (FACILITY_WIN32 << 16) | 0x8000_0000)
        }
    }
}

const FACILITY_WIN32: u32 = 7;

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult(0x{:08X})", self.0)
    }
}

impl From<u32> for HResult {
    fn from(value: u32) -> Self {
        HResult(value)
    }
}

/// Named `HRESULT` values.
///
/// Only the codes that appear in the classification tables or that the engine reacts to
/// are listed here.
#[allow(missing_docs)]
pub mod hr {
    use super::HResult;

    pub const S_OK: HResult = HResult::new(0x0000_0000);
    pub const E_FAIL: HResult = HResult::new(0x8000_4005);
    pub const E_POINTER: HResult = HResult::new(0x8000_4003);
    pub const E_NOINTERFACE: HResult = HResult::new(0x8000_4002);
    pub const E_NOTIMPL: HResult = HResult::new(0x8000_4001);
    pub const E_ABORT: HResult = HResult::new(0x8000_4004);
    pub const E_UNEXPECTED: HResult = HResult::new(0x8000_FFFF);
    pub const E_INVALIDARG: HResult = HResult::new(0x8007_0057);
    pub const E_OUTOFMEMORY: HResult = HResult::new(0x8007_000E);
    pub const E_ACCESSDENIED: HResult = HResult::new(0x8007_0005);
    pub const E_HANDLE: HResult = HResult::new(0x8007_0006);

    pub const ERROR_FILE_NOT_FOUND: HResult = HResult::from_win32(2);
    pub const ERROR_PATH_NOT_FOUND: HResult = HResult::from_win32(3);
    pub const ERROR_TOO_MANY_OPEN_FILES: HResult = HResult::from_win32(4);
    pub const ERROR_NOT_ENOUGH_MEMORY: HResult = HResult::from_win32(8);
    pub const ERROR_BAD_FORMAT: HResult = HResult::from_win32(11);
    pub const ERROR_NOT_READY: HResult = HResult::from_win32(21);
    pub const ERROR_SHARING_VIOLATION: HResult = HResult::from_win32(32);
    pub const ERROR_LOCK_VIOLATION: HResult = HResult::from_win32(33);
    pub const ERROR_BAD_NETPATH: HResult = HResult::from_win32(53);
    pub const ERROR_BAD_NET_NAME: HResult = HResult::from_win32(67);
    pub const ERROR_FILENAME_EXCED_RANGE: HResult = HResult::from_win32(206);
    pub const ERROR_INVALID_NAME: HResult = HResult::from_win32(123);
    pub const ERROR_MOD_NOT_FOUND: HResult = HResult::from_win32(126);
    pub const ERROR_INVALID_ORDINAL: HResult = HResult::from_win32(182);
    pub const ERROR_EXE_MARKED_INVALID: HResult = HResult::from_win32(192);
    pub const ERROR_BAD_EXE_FORMAT: HResult = HResult::from_win32(193);
    pub const ERROR_ARITHMETIC_OVERFLOW: HResult = HResult::from_win32(534);
    pub const ERROR_NOACCESS: HResult = HResult::from_win32(998);
    pub const ERROR_STACK_OVERFLOW: HResult = HResult::from_win32(1001);
    pub const ERROR_INVALID_DLL: HResult = HResult::from_win32(1154);
    pub const ERROR_DLL_NOT_FOUND: HResult = HResult::from_win32(1157);
    pub const ERROR_COMMITMENT_LIMIT: HResult = HResult::from_win32(1455);
    pub const ERROR_FILE_CORRUPT: HResult = HResult::from_win32(1392);
    pub const ERROR_WRONG_TARGET_NAME: HResult = HResult::from_win32(1396);
    pub const ERROR_TIMEOUT: HResult = HResult::from_win32(1460);

    pub const DISP_E_OVERFLOW: HResult = HResult::new(0x8002_000A);
    pub const DISP_E_DIVBYZERO: HResult = HResult::new(0x8002_0012);
    pub const DISP_E_TYPEMISMATCH: HResult = HResult::new(0x8002_0005);
    pub const DISP_E_PARAMNOTFOUND: HResult = HResult::new(0x8002_0004);
    pub const DISP_E_BADVARTYPE: HResult = HResult::new(0x8002_0008);
    pub const DISP_E_BADINDEX: HResult = HResult::new(0x8002_000B);

    pub const CTL_E_OUTOFMEMORY: HResult = HResult::new(0x800A_0007);
    pub const CTL_E_FILENOTFOUND: HResult = HResult::new(0x800A_0035);
    pub const CTL_E_PATHNOTFOUND: HResult = HResult::new(0x800A_004C);
    pub const CTL_E_ILLEGALFUNCTIONCALL: HResult = HResult::new(0x800A_0005);
    pub const CTL_E_OVERFLOW: HResult = HResult::new(0x800A_0006);
    pub const CTL_E_DIVISIONBYZERO: HResult = HResult::new(0x800A_000B);
    pub const CTL_E_OUTOFSTACKSPACE: HResult = HResult::new(0x800A_001C);
    pub const CTL_E_TYPEMISMATCH: HResult = HResult::new(0x800A_000D);
    pub const CTL_E_BADFILENAMEORNUMBER: HResult = HResult::new(0x800A_0034);
    pub const CTL_E_BADFILENAME: HResult = HResult::new(0x800A_0040);
    pub const CTL_E_ENDOFFILE: HResult = HResult::new(0x800A_003E);
    pub const CTL_E_DEVICEIOERROR: HResult = HResult::new(0x800A_0039);
    pub const CTL_E_PERMISSIONDENIED: HResult = HResult::new(0x800A_0046);
    pub const CTL_E_SUBSCRIPTOUTOFRANGE: HResult = HResult::new(0x800A_0009);

    pub const INET_E_CANNOT_CONNECT: HResult = HResult::new(0x800C_0004);
    pub const INET_E_RESOURCE_NOT_FOUND: HResult = HResult::new(0x800C_0005);
    pub const INET_E_OBJECT_NOT_FOUND: HResult = HResult::new(0x800C_0006);
    pub const INET_E_DATA_NOT_AVAILABLE: HResult = HResult::new(0x800C_0007);
    pub const INET_E_DOWNLOAD_FAILURE: HResult = HResult::new(0x800C_0008);
    pub const INET_E_CONNECTION_TIMEOUT: HResult = HResult::new(0x800C_000B);
    pub const INET_E_UNKNOWN_PROTOCOL: HResult = HResult::new(0x800C_000D);

    pub const NTE_NO_MEMORY: HResult = HResult::new(0x8009_000E);
    pub const NTE_FAIL: HResult = HResult::new(0x8009_0020);

    pub const COR_E_EXCEPTION: HResult = HResult::new(0x8013_1500);
    pub const COR_E_SYSTEM: HResult = HResult::new(0x8013_1501);
    pub const COR_E_ARGUMENTOUTOFRANGE: HResult = HResult::new(0x8013_1502);
    pub const COR_E_ARRAYTYPEMISMATCH: HResult = HResult::new(0x8013_1503);
    pub const COR_E_CONTEXTMARSHAL: HResult = HResult::new(0x8013_1504);
    pub const COR_E_TIMEOUT: HResult = HResult::new(0x8013_1505);
    pub const COR_E_EXECUTIONENGINE: HResult = HResult::new(0x8013_1506);
    pub const COR_E_FIELDACCESS: HResult = HResult::new(0x8013_1507);
    pub const COR_E_INDEXOUTOFRANGE: HResult = HResult::new(0x8013_1508);
    pub const COR_E_INVALIDOPERATION: HResult = HResult::new(0x8013_1509);
    pub const COR_E_SECURITY: HResult = HResult::new(0x8013_150A);
    pub const COR_E_SERIALIZATION: HResult = HResult::new(0x8013_150C);
    pub const COR_E_VERIFICATION: HResult = HResult::new(0x8013_150D);
    pub const COR_E_METHODACCESS: HResult = HResult::new(0x8013_1510);
    pub const COR_E_MISSINGFIELD: HResult = HResult::new(0x8013_1511);
    pub const COR_E_MISSINGMEMBER: HResult = HResult::new(0x8013_1512);
    pub const COR_E_MISSINGMETHOD: HResult = HResult::new(0x8013_1513);
    pub const COR_E_MULTICASTNOTSUPPORTED: HResult = HResult::new(0x8013_1514);
    pub const COR_E_NOTSUPPORTED: HResult = HResult::new(0x8013_1515);
    pub const COR_E_OVERFLOW: HResult = HResult::new(0x8013_1516);
    pub const COR_E_RANK: HResult = HResult::new(0x8013_1517);
    pub const COR_E_SYNCHRONIZATIONLOCK: HResult = HResult::new(0x8013_1518);
    pub const COR_E_THREADINTERRUPTED: HResult = HResult::new(0x8013_1519);
    pub const COR_E_MEMBERACCESS: HResult = HResult::new(0x8013_151A);
    pub const COR_E_THREADSTATE: HResult = HResult::new(0x8013_1520);
    pub const COR_E_THREADSTOP: HResult = HResult::new(0x8013_1521);
    pub const COR_E_TYPELOAD: HResult = HResult::new(0x8013_1522);
    pub const COR_E_ENTRYPOINTNOTFOUND: HResult = HResult::new(0x8013_1523);
    pub const COR_E_DLLNOTFOUND: HResult = HResult::new(0x8013_1524);
    pub const COR_E_THREADSTART: HResult = HResult::new(0x8013_1525);
    pub const COR_E_INVALIDCOMOBJECT: HResult = HResult::new(0x8013_1527);
    pub const COR_E_NOTFINITENUMBER: HResult = HResult::new(0x8013_1528);
    pub const COR_E_DUPLICATEWAITOBJECT: HResult = HResult::new(0x8013_1529);
    pub const COR_E_SEMAPHOREFULL: HResult = HResult::new(0x8013_152B);
    pub const COR_E_WAITHANDLECANNOTBEOPENED: HResult = HResult::new(0x8013_152C);
    pub const COR_E_ABANDONEDMUTEX: HResult = HResult::new(0x8013_152D);
    pub const COR_E_THREADABORTED: HResult = HResult::new(0x8013_1530);
    pub const COR_E_INVALIDOLEVARIANTTYPE: HResult = HResult::new(0x8013_1531);
    pub const COR_E_MISSINGMANIFESTRESOURCE: HResult = HResult::new(0x8013_1532);
    pub const COR_E_SAFEARRAYTYPEMISMATCH: HResult = HResult::new(0x8013_1533);
    pub const COR_E_TYPEINITIALIZATION: HResult = HResult::new(0x8013_1534);
    pub const COR_E_MARSHALDIRECTIVE: HResult = HResult::new(0x8013_1535);
    pub const COR_E_MISSINGSATELLITEASSEMBLY: HResult = HResult::new(0x8013_1536);
    pub const COR_E_FORMAT: HResult = HResult::new(0x8013_1537);
    pub const COR_E_SAFEARRAYRANKMISMATCH: HResult = HResult::new(0x8013_1538);
    pub const COR_E_PLATFORMNOTSUPPORTED: HResult = HResult::new(0x8013_1539);
    pub const COR_E_INVALIDPROGRAM: HResult = HResult::new(0x8013_153A);
    pub const COR_E_OPERATIONCANCELED: HResult = HResult::new(0x8013_153B);
    pub const COR_E_INSUFFICIENTMEMORY: HResult = HResult::new(0x8013_153D);
    pub const COR_E_RUNTIMEWRAPPED: HResult = HResult::new(0x8013_153E);
    pub const COR_E_DATAMISALIGNED: HResult = HResult::new(0x8013_1541);
    pub const COR_E_CODECONTRACTFAILED: HResult = HResult::new(0x8013_1542);
    pub const COR_E_TYPEACCESS: HResult = HResult::new(0x8013_1543);
    pub const COR_E_APPLICATION: HResult = HResult::new(0x8013_1600);
    pub const COR_E_KEYNOTFOUND: HResult = HResult::new(0x8013_1577);
    pub const COR_E_INSUFFICIENTEXECUTIONSTACK: HResult = HResult::new(0x8013_1578);
    pub const COR_E_IO: HResult = HResult::new(0x8013_1620);
    pub const COR_E_FILELOAD: HResult = HResult::new(0x8013_1621);
    pub const COR_E_OBJECTDISPOSED: HResult = HResult::new(0x8013_1622);
    pub const COR_E_FAILFAST: HResult = HResult::new(0x8013_1623);
    pub const COR_E_HOSTPROTECTION: HResult = HResult::new(0x8013_1640);
    pub const COR_E_ILLEGAL_REENTRANCY: HResult = HResult::new(0x8013_1641);
    pub const COR_E_APPDOMAINUNLOADED: HResult = HResult::new(0x8013_1014);
    pub const COR_E_CANNOTUNLOADAPPDOMAIN: HResult = HResult::new(0x8013_1015);
    pub const COR_E_ASSEMBLYEXPECTED: HResult = HResult::new(0x8013_1018);
    pub const COR_E_NEWER_RUNTIME: HResult = HResult::new(0x8013_101B);
    pub const COR_E_LOADING_REFERENCE_ASSEMBLY: HResult = HResult::new(0x8013_1058);
    pub const COR_E_BADIMAGEFORMAT: HResult = ERROR_BAD_FORMAT;
    pub const COR_E_FILENOTFOUND: HResult = ERROR_FILE_NOT_FOUND;
    pub const COR_E_DIRECTORYNOTFOUND: HResult = ERROR_PATH_NOT_FOUND;
    pub const COR_E_PATHTOOLONG: HResult = ERROR_FILENAME_EXCED_RANGE;
    pub const COR_E_ENDOFSTREAM: HResult = HResult::from_win32(38);
    pub const COR_E_STACKOVERFLOW: HResult = ERROR_STACK_OVERFLOW;
    pub const COR_E_ARITHMETIC: HResult = ERROR_ARITHMETIC_OVERFLOW;
    pub const COR_E_DIVIDEBYZERO: HResult = DISP_E_DIVBYZERO;
    pub const COR_E_ARGUMENT: HResult = E_INVALIDARG;
    pub const COR_E_INVALIDCAST: HResult = E_NOINTERFACE;
    pub const COR_E_NULLREFERENCE: HResult = E_POINTER;
    pub const COR_E_OUTOFMEMORY: HResult = E_OUTOFMEMORY;
    pub const COR_E_UNAUTHORIZEDACCESS: HResult = E_ACCESSDENIED;
    pub const COR_E_NOTIMPLEMENTED: HResult = E_NOTIMPL;
    pub const COR_E_ARGUMENTNULL: HResult = E_POINTER;
    pub const COR_E_ACCESSVIOLATION: HResult = E_POINTER;

    pub const CLDB_E_FILE_OLDVER: HResult = HResult::new(0x8013_1107);
    pub const CLDB_E_FILE_CORRUPT: HResult = HResult::new(0x8013_110E);
    pub const CLDB_E_INDEX_NOTFOUND: HResult = HResult::new(0x8013_1124);
    pub const META_E_BAD_SIGNATURE: HResult = HResult::new(0x8013_1192);
    pub const CORSEC_E_INVALID_IMAGE_FORMAT: HResult = HResult::new(0x8013_141D);
    pub const CORSEC_E_MIN_GRANT_FAIL: HResult = HResult::new(0x8013_1417);
    pub const FUSION_E_REF_DEF_MISMATCH: HResult = HResult::new(0x8013_1040);
    pub const FUSION_E_INVALID_NAME: HResult = HResult::new(0x8013_1047);

    pub const E_CHANGED_STATE: HResult = HResult::new(0x8000_000C);
    pub const E_ILLEGAL_STATE_CHANGE: HResult = HResult::new(0x8000_000D);
    pub const E_ILLEGAL_METHOD_CALL: HResult = HResult::new(0x8000_000E);
    pub const E_BOUNDS: HResult = HResult::new(0x8000_000B);
    pub const RO_E_CLOSED: HResult = HResult::new(0x8000_0013);
    pub const E_ILLEGAL_DELEGATE_ASSIGNMENT: HResult = HResult::new(0x8000_0018);
    pub const APPMODEL_ERROR_NO_PACKAGE: HResult = HResult::new(0x8007_3D54);
    pub const E_XAMLPARSEFAILED: HResult = HResult::new(0x802B_000A);
    pub const E_LAYOUTCYCLE: HResult = HResult::new(0x802B_0014);
    pub const E_ELEMENTNOTENABLED: HResult = HResult::new(0x802B_001E);
    pub const E_ELEMENTNOTAVAILABLE: HResult = HResult::new(0x802B_001F);

    pub const STATUS_NO_MEMORY: HResult = HResult::new(0xC000_0017);
}

/// Native exception codes delivered with an exception record.
#[allow(missing_docs)]
pub mod seh {
    use crate::kinds::ExceptionKind;

    /// Code used for exceptions raised by managed `throw`.
    pub const EXCEPTION_COMPLUS: u32 = 0xE043_4352;
    /// Code used for native C++ `throw`.
    pub const EXCEPTION_MSVC: u32 = 0xE06D_7363;
    /// Raised when a thread fails its runtime setup before any last-thrown object exists.
    pub const BOOTUP_EXCEPTION_COMPLUS: u32 = 0xC002_0001;

    pub const STATUS_DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
    pub const STATUS_BREAKPOINT: u32 = 0x8000_0003;
    pub const STATUS_UNWIND_CONSOLIDATE: u32 = 0x8000_0029;
    pub const STATUS_ACCESS_VIOLATION: u32 = 0xC000_0005;
    pub const STATUS_IN_PAGE_ERROR: u32 = 0xC000_0006;
    pub const STATUS_NO_MEMORY: u32 = 0xC000_0017;
    pub const STATUS_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
    pub const STATUS_NONCONTINUABLE_EXCEPTION: u32 = 0xC000_0025;
    pub const STATUS_INVALID_DISPOSITION: u32 = 0xC000_0026;
    pub const STATUS_UNWIND: u32 = 0xC000_0027;
    pub const STATUS_ARRAY_BOUNDS_EXCEEDED: u32 = 0xC000_008C;
    pub const STATUS_FLOAT_DENORMAL_OPERAND: u32 = 0xC000_008D;
    pub const STATUS_FLOAT_DIVIDE_BY_ZERO: u32 = 0xC000_008E;
    pub const STATUS_FLOAT_INEXACT_RESULT: u32 = 0xC000_008F;
    pub const STATUS_FLOAT_INVALID_OPERATION: u32 = 0xC000_0090;
    pub const STATUS_FLOAT_OVERFLOW: u32 = 0xC000_0091;
    pub const STATUS_FLOAT_STACK_CHECK: u32 = 0xC000_0092;
    pub const STATUS_FLOAT_UNDERFLOW: u32 = 0xC000_0093;
    pub const STATUS_INTEGER_DIVIDE_BY_ZERO: u32 = 0xC000_0094;
    pub const STATUS_INTEGER_OVERFLOW: u32 = 0xC000_0095;
    pub const STATUS_PRIVILEGED_INSTRUCTION: u32 = 0xC000_0096;
    pub const STATUS_STACK_OVERFLOW: u32 = 0xC000_00FD;
    pub const STATUS_LONGJUMP: u32 = 0x8000_0026;

    /// Returns `true` for native codes that indicate process-level memory corruption.
    ///
    /// Stack overflow is part of the set unless `include_stack_overflow` is `false`.
    #[must_use]
    pub fn is_process_corrupting(code: u32, include_stack_overflow: bool) -> bool {
        match code {
            STATUS_STACK_OVERFLOW => include_stack_overflow,
            STATUS_ACCESS_VIOLATION
            | STATUS_ILLEGAL_INSTRUCTION
            | STATUS_IN_PAGE_ERROR
            | STATUS_INVALID_DISPOSITION
            | STATUS_NONCONTINUABLE_EXCEPTION
            | STATUS_PRIVILEGED_INSTRUCTION
            | STATUS_UNWIND_CONSOLIDATE => true,
            _ => false,
        }
    }

    /// Returns `true` for the stack-overflow code.
    #[must_use]
    pub fn is_stack_overflow(code: u32) -> bool {
        code == STATUS_STACK_OVERFLOW
    }

    /// Maps a native fault to the exception kind a managed frame observes.
    ///
    /// `fault_address` is the faulting data address for access violations; accesses below
    /// `null_page_limit` are reported as null dereferences.
    #[must_use]
    pub fn kind_for_fault(code: u32, fault_address: Option<u64>, null_page_limit: u64) -> ExceptionKind {
        match code {
            STATUS_FLOAT_INEXACT_RESULT
            | STATUS_FLOAT_INVALID_OPERATION
            | STATUS_FLOAT_STACK_CHECK
            | STATUS_FLOAT_UNDERFLOW
            | STATUS_FLOAT_DENORMAL_OPERAND => ExceptionKind::Arithmetic,
            STATUS_FLOAT_OVERFLOW | STATUS_INTEGER_OVERFLOW => ExceptionKind::Overflow,
            STATUS_FLOAT_DIVIDE_BY_ZERO | STATUS_INTEGER_DIVIDE_BY_ZERO => {
                ExceptionKind::DivideByZero
            }
            STATUS_ACCESS_VIOLATION => match fault_address {
                Some(address) if address >= null_page_limit => ExceptionKind::AccessViolation,
                _ => ExceptionKind::NullReference,
            },
            STATUS_ARRAY_BOUNDS_EXCEEDED => ExceptionKind::IndexOutOfRange,
            STATUS_DATATYPE_MISALIGNMENT => ExceptionKind::DataMisaligned,
            STATUS_NO_MEMORY => ExceptionKind::OutOfMemory,
            STATUS_STACK_OVERFLOW => ExceptionKind::StackOverflow,
            _ => ExceptionKind::SehException,
        }
    }
}

/// Returns `true` for status codes that describe a transient condition of the thread or
/// process rather than a property of the failed operation.
///
/// Such failures must never be captured as the inner exception of a load failure, since
/// a later retry could succeed.
#[must_use]
pub fn is_transient(code: HResult) -> bool {
    matches!(
        code,
        hr::COR_E_THREADABORTED
            | hr::COR_E_THREADINTERRUPTED
            | hr::COR_E_THREADSTOP
            | hr::COR_E_APPDOMAINUNLOADED
            | hr::E_OUTOFMEMORY
            | hr::ERROR_COMMITMENT_LIMIT
            | hr::ERROR_NOT_ENOUGH_MEMORY
            | hr::STATUS_NO_MEMORY
            | hr::COR_E_STACKOVERFLOW
            | hr::ERROR_TOO_MANY_OPEN_FILES
            | hr::ERROR_SHARING_VIOLATION
            | hr::ERROR_LOCK_VIOLATION
            | hr::ERROR_NOT_READY
            | hr::ERROR_TIMEOUT
            | hr::INET_E_CONNECTION_TIMEOUT
            | hr::INET_E_CANNOT_CONNECT
            | hr::INET_E_DATA_NOT_AVAILABLE
            | hr::INET_E_DOWNLOAD_FAILURE
            | hr::NTE_NO_MEMORY
    )
}

/// Returns `true` for status codes that describe an out-of-memory condition.
#[must_use]
pub fn is_out_of_memory(code: HResult) -> bool {
    matches!(
        code,
        hr::E_OUTOFMEMORY | hr::ERROR_NOT_ENOUGH_MEMORY | hr::CTL_E_OUTOFMEMORY | hr::STATUS_NO_MEMORY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_win32() {
        assert_eq!(HResult::from_win32(2), HResult::new(0x8007_0002));
        assert_eq!(HResult::from_win32(1001), hr::COR_E_STACKOVERFLOW);
        assert_eq!(HResult::from_win32(0), hr::S_OK);
    }

    #[test]
    fn test_bit_fields() {
        let code = hr::COR_E_THREADABORTED;
        assert!(code.is_failure());
        assert_eq!(code.facility(), 0x13);
        assert_eq!(code.code(), 0x1530);
        assert!(!hr::S_OK.is_failure());
        assert_eq!(hr::E_FAIL.as_i32(), -2147467259);
    }

    #[test]
    fn test_display() {
        assert_eq!(hr::E_FAIL.to_string(), "0x80004005");
        assert_eq!(format!("{:?}", hr::S_OK), "HResult(0x00000000)");
    }

    #[test]
    fn test_process_corrupting() {
        assert!(seh::is_process_corrupting(seh::STATUS_ACCESS_VIOLATION, true));
        assert!(seh::is_process_corrupting(seh::STATUS_STACK_OVERFLOW, true));
        assert!(!seh::is_process_corrupting(seh::STATUS_STACK_OVERFLOW, false));
        assert!(!seh::is_process_corrupting(seh::EXCEPTION_COMPLUS, true));
        assert!(!seh::is_process_corrupting(seh::STATUS_INTEGER_DIVIDE_BY_ZERO, true));
    }

    #[test]
    fn test_kind_for_fault() {
        use crate::kinds::ExceptionKind;

        assert_eq!(
            seh::kind_for_fault(seh::STATUS_ACCESS_VIOLATION, Some(0x10), 0x1_0000),
            ExceptionKind::NullReference
        );
        assert_eq!(
            seh::kind_for_fault(seh::STATUS_ACCESS_VIOLATION, Some(0x7FFF_0000), 0x1_0000),
            ExceptionKind::AccessViolation
        );
        assert_eq!(
            seh::kind_for_fault(seh::STATUS_INTEGER_DIVIDE_BY_ZERO, None, 0x1_0000),
            ExceptionKind::DivideByZero
        );
        assert_eq!(seh::kind_for_fault(0xE000_0001, None, 0), ExceptionKind::SehException);
    }

    #[test]
    fn test_transient() {
        assert!(is_transient(hr::COR_E_THREADABORTED));
        assert!(is_transient(hr::E_OUTOFMEMORY));
        assert!(!is_transient(hr::COR_E_BADIMAGEFORMAT));
        assert!(is_out_of_memory(hr::ERROR_NOT_ENOUGH_MEMORY));
    }
}
