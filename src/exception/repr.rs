//! Native-side exception representations.
//!
//! A [`RuntimeException`] is what native code raises when it needs to surface a managed
//! exception: a small, allocation-free description ([`Representation`]) from which the
//! managed throwable is produced lazily, plus an optional inner exception and the cached
//! throwable once it exists.
//!
//! # Variants
//!
//! | Variant | Managed type | Message source |
//! |---------|--------------|----------------|
//! | [`Representation::LastThrown`] | whatever the thread last threw | the object itself |
//! | [`Representation::KindOnly`] | the kind's type | kind name / status code |
//! | [`Representation::MessageWithArgs`] | the kind's type | resource template with up to six arguments |
//! | [`Representation::ResourceBacked`] | the kind's type | named managed resource |
//! | [`Representation::ComDerived`] | classified from the status code | COM error info |
//! | [`Representation::FieldAccess`] and friends | the access exception type | member name / access template |
//! | [`Representation::ArgumentInvalid`] | an argument exception type | named managed resource |
//! | [`Representation::TypeLoadFailure`] | `TypeLoadException` | class load template |
//! | [`Representation::FileLoadFailure`] | classified from the status code | file load template |

use std::fmt;

use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    exception::{com::ComErrorInfo, fileload::FileLoadInfo, throwable::ThrowableCache},
    hresult::{hr, is_transient, HResult},
    kinds::{hr_from_kind, kind_from_hr, ExceptionKind},
    runtime::resources::{ResourceId, MAX_MESSAGE_ARGS},
    thread::ManagedThread,
    Error, Result,
};

/// A member (field, method or type) whose access failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAccess {
    /// Fully qualified name of the member that was accessed
    pub member: String,
    /// The method attempting the access
    pub caller: Option<String>,
    /// Template for the access-denied message; `None` renders the bare member name
    pub message_id: Option<ResourceId>,
    /// Extra text appended to the access-denied message
    pub additional_context: Option<String>,
}

impl MemberAccess {
    /// An access failure described only by the member name.
    #[must_use]
    pub fn named(member: impl Into<String>) -> Self {
        MemberAccess {
            member: member.into(),
            caller: None,
            message_id: None,
            additional_context: None,
        }
    }

    /// An access failure of `caller` on `member`, rendered through `message_id`.
    #[must_use]
    pub fn denied(
        caller: impl Into<String>,
        member: impl Into<String>,
        message_id: ResourceId,
    ) -> Self {
        MemberAccess {
            member: member.into(),
            caller: Some(caller.into()),
            message_id: Some(message_id),
            additional_context: None,
        }
    }

    /// Appends context to the access-denied message.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.additional_context = Some(context.into());
        self
    }
}

/// A type that failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeLoadInfo {
    /// Namespace of the type, if any
    pub namespace: Option<String>,
    /// Simple name of the type
    pub type_name: String,
    /// Display name of the assembly the type was loaded from
    pub assembly: String,
    /// Extra text appended to the message
    pub message_arg: Option<String>,
    /// Resource describing why the load failed
    pub why: ResourceId,
}

impl TypeLoadInfo {
    /// Returns `namespace.type_name`, or the bare type name without a namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.namespace {
            Some(namespace) if !namespace.is_empty() => {
                format!("{}.{}", namespace, self.type_name)
            }
            _ => self.type_name.clone(),
        }
    }
}

/// The closed family of native exception representations.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(RepresentationType), derive(Hash, IntoStaticStr))]
pub enum Representation {
    /// The thread's last thrown object.
    LastThrown,

    /// An exception kind with its canonical status code.
    KindOnly {
        /// The kind to create
        kind: ExceptionKind,
    },

    /// A kind with an explicit status code and a formatted message.
    MessageWithArgs {
        /// The kind to create
        kind: ExceptionKind,
        /// Status code stored on the throwable
        hr: HResult,
        /// Message template; `None` renders the status code
        resource: Option<ResourceId>,
        /// Template arguments, at most six
        args: Vec<String>,
    },

    /// A kind whose message is a named managed resource.
    ResourceBacked {
        /// The kind to create
        kind: ExceptionKind,
        /// Name of the managed resource string
        resource: String,
    },

    /// A failure reported by a COM or WinRT component.
    ComDerived(ComErrorInfo),

    /// Access to a field was denied.
    FieldAccess(MemberAccess),

    /// Access to a method was denied.
    MethodAccess(MemberAccess),

    /// Access to a type was denied.
    TypeAccess(MemberAccess),

    /// An argument failed validation.
    ArgumentInvalid {
        /// One of the argument exception kinds
        kind: ExceptionKind,
        /// Name of the offending parameter
        arg_name: Option<String>,
        /// Name of the managed resource holding the message
        resource: Option<String>,
    },

    /// A type could not be loaded.
    TypeLoadFailure(TypeLoadInfo),

    /// A file or assembly could not be loaded.
    FileLoadFailure(FileLoadInfo),
}

/// A native exception with a lazily created managed representation.
///
/// Cloning copies the description and inner exception but never the cached throwable;
/// the clone creates its own on first use.
pub struct RuntimeException {
    pub(crate) repr: Representation,
    pub(crate) inner: Option<Box<RuntimeException>>,
    pub(crate) cache: ThrowableCache,
}

impl RuntimeException {
    fn from_repr(repr: Representation) -> Self {
        RuntimeException {
            repr,
            inner: None,
            cache: ThrowableCache::default(),
        }
    }

    /// Refers to the thread's last thrown object.
    #[must_use]
    pub fn last_thrown() -> Self {
        Self::from_repr(Representation::LastThrown)
    }

    /// An exception of `kind` with its canonical status code.
    #[must_use]
    pub fn kind_only(kind: ExceptionKind) -> Self {
        Self::from_repr(Representation::KindOnly { kind })
    }

    /// An exception of `kind` carrying `hr` and a message rendered from `resource`.
    ///
    /// Only the first six arguments are kept.
    #[must_use]
    pub fn message(
        kind: ExceptionKind,
        hr: HResult,
        resource: Option<ResourceId>,
        args: &[&str],
    ) -> Self {
        debug_assert!(args.len() <= MAX_MESSAGE_ARGS, "too many message arguments");
        Self::from_repr(Representation::MessageWithArgs {
            kind,
            hr,
            resource,
            args: args
                .iter()
                .take(MAX_MESSAGE_ARGS)
                .map(|arg| (*arg).to_string())
                .collect(),
        })
    }

    /// An exception of `kind` with its canonical status code and a templated message.
    #[must_use]
    pub fn with_resource(kind: ExceptionKind, resource: ResourceId, args: &[&str]) -> Self {
        Self::message(kind, hr_from_kind(kind), Some(resource), args)
    }

    /// An exception for a bare status code, classified through the kind tables.
    #[must_use]
    pub fn from_hr(code: HResult) -> Self {
        Self::message(kind_from_hr(code, false), code, None, &[])
    }

    /// An exception whose message is the named managed resource `resource`.
    #[must_use]
    pub fn resource_backed(kind: ExceptionKind, resource: impl Into<String>) -> Self {
        Self::from_repr(Representation::ResourceBacked {
            kind,
            resource: resource.into(),
        })
    }

    /// A failure reported through COM error info.
    #[must_use]
    pub fn com(info: ComErrorInfo) -> Self {
        Self::from_repr(Representation::ComDerived(info))
    }

    /// A denied field access.
    #[must_use]
    pub fn field_access(access: MemberAccess) -> Self {
        Self::from_repr(Representation::FieldAccess(access))
    }

    /// A denied method access.
    #[must_use]
    pub fn method_access(access: MemberAccess) -> Self {
        Self::from_repr(Representation::MethodAccess(access))
    }

    /// A denied type access.
    #[must_use]
    pub fn type_access(access: MemberAccess) -> Self {
        Self::from_repr(Representation::TypeAccess(access))
    }

    /// An invalid argument.
    ///
    /// `kind` should be one of the argument exception kinds; the constructor argument
    /// order differs between `ArgumentException` and its subclasses.
    #[must_use]
    pub fn argument(kind: ExceptionKind, arg_name: Option<&str>, resource: Option<&str>) -> Self {
        debug_assert!(kind.is_argument_kind(), "{kind} is not an argument exception");
        Self::from_repr(Representation::ArgumentInvalid {
            kind,
            arg_name: arg_name.map(str::to_string),
            resource: resource.map(str::to_string),
        })
    }

    /// A type load failure.
    #[must_use]
    pub fn type_load(info: TypeLoadInfo) -> Self {
        Self::from_repr(Representation::TypeLoadFailure(info))
    }

    /// A file or assembly load failure of `file_name` with `hr`.
    ///
    /// Use [`RuntimeException::throw_file_load`] when the status code may be a thread abort
    /// or out-of-memory.
    #[must_use]
    pub fn file_load(file_name: &str, hr: HResult) -> Self {
        Self::from_repr(Representation::FileLoadFailure(FileLoadInfo::new(
            file_name, hr,
        )))
    }

    /// Attaches an inner exception.
    ///
    /// # Errors
    ///
    /// Load failures may not wrap transient conditions; offering one returns
    /// [`Error::TransientInnerException`].
    pub fn with_inner(mut self, inner: RuntimeException) -> Result<Self> {
        if let Representation::FileLoadFailure(_) = self.repr {
            if let Some(code) = inner.known_hr().filter(|code| is_transient(*code)) {
                return Err(Error::TransientInnerException(code));
            }
        }

        self.inner = Some(Box::new(inner));
        Ok(self)
    }

    /// Returns the description.
    #[must_use]
    pub fn representation(&self) -> &Representation {
        &self.repr
    }

    /// Returns the variant discriminant.
    #[must_use]
    pub fn repr_type(&self) -> RepresentationType {
        RepresentationType::from(&self.repr)
    }

    /// Returns the inner exception.
    #[must_use]
    pub fn inner(&self) -> Option<&RuntimeException> {
        self.inner.as_deref()
    }

    /// Returns `true` if a throwable has been created and cached.
    #[must_use]
    pub fn has_cached_throwable(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Returns the status code if it can be determined without the managed heap.
    ///
    /// Only [`Representation::LastThrown`] needs the heap and returns `None`.
    #[must_use]
    pub fn known_hr(&self) -> Option<HResult> {
        match &self.repr {
            Representation::LastThrown => None,
            Representation::KindOnly { kind }
            | Representation::ResourceBacked { kind, .. }
            | Representation::ArgumentInvalid { kind, .. } => Some(hr_from_kind(*kind)),
            Representation::MessageWithArgs { hr, .. } => Some(*hr),
            Representation::ComDerived(info) => Some(info.hr),
            Representation::FieldAccess(_) => Some(hr::COR_E_FIELDACCESS),
            Representation::MethodAccess(_) => Some(hr::COR_E_METHODACCESS),
            Representation::TypeAccess(_) => Some(hr::COR_E_TYPEACCESS),
            Representation::TypeLoadFailure(_) => Some(hr::COR_E_TYPELOAD),
            Representation::FileLoadFailure(info) => Some(info.hr),
        }
    }

    /// Returns the exception kind this representation produces.
    ///
    /// COM failures classify in the thread runtime's WinRT mode; the last thrown object
    /// reports the kind it was allocated as.
    #[must_use]
    pub fn kind(&self, thread: &ManagedThread) -> Option<ExceptionKind> {
        match &self.repr {
            Representation::LastThrown => {
                let object = thread.last_thrown_object()?;
                thread.runtime().allocator().kind_of(object)
            }
            Representation::KindOnly { kind }
            | Representation::MessageWithArgs { kind, .. }
            | Representation::ResourceBacked { kind, .. }
            | Representation::ArgumentInvalid { kind, .. } => Some(*kind),
            Representation::ComDerived(info) => {
                Some(info.kind(thread.runtime().config().winrt))
            }
            Representation::FieldAccess(_) => Some(ExceptionKind::FieldAccess),
            Representation::MethodAccess(_) => Some(ExceptionKind::MethodAccess),
            Representation::TypeAccess(_) => Some(ExceptionKind::TypeAccess),
            Representation::TypeLoadFailure(_) => Some(ExceptionKind::TypeLoad),
            Representation::FileLoadFailure(info) => Some(info.kind),
        }
    }

    /// Returns the status code callers observe for this exception.
    ///
    /// The last thrown object reports its `HResult` field, or `E_FAIL` if there is none.
    #[must_use]
    pub fn get_hr(&self, thread: &ManagedThread) -> HResult {
        if let Some(code) = self.known_hr() {
            return code;
        }

        thread
            .last_thrown_object()
            .and_then(|object| thread.runtime().allocator().hresult_of(object))
            .unwrap_or(hr::E_FAIL)
    }

    /// Renders the message callers observe for this exception.
    ///
    /// Never fails: when a resource cannot be loaded the message degrades to the status
    /// code text or the kind name.
    #[must_use]
    pub fn get_message(&self, thread: &ManagedThread) -> String {
        let runtime = thread.runtime();
        let resources = runtime.resources();

        match &self.repr {
            Representation::LastThrown => {
                let allocator = runtime.allocator();
                thread
                    .last_thrown_object()
                    .and_then(|object| {
                        allocator.message_of(object).or_else(|| {
                            allocator.kind_of(object).map(|kind| kind.full_name())
                        })
                    })
                    .unwrap_or_default()
            }
            Representation::KindOnly { kind } => {
                let code = hr_from_kind(*kind);
                if is_interesting_hr(*kind, code) {
                    resources.hr_message(code)
                } else {
                    kind.full_name()
                }
            }
            Representation::MessageWithArgs {
                kind,
                hr,
                resource,
                args,
            } => {
                let loaded = resource.and_then(|id| {
                    let args: Vec<&str> = args.iter().map(String::as_str).collect();
                    resources.load(id, &args).ok()
                });
                match loaded {
                    Some(text) => text,
                    None if is_interesting_hr(*kind, *hr) => resources.hr_message(*hr),
                    None => kind.full_name(),
                }
            }
            Representation::ResourceBacked { kind, resource } => {
                format!("{kind} (message resource {resource})")
            }
            Representation::ComDerived(info) => info.message(resources),
            Representation::FieldAccess(access)
            | Representation::MethodAccess(access)
            | Representation::TypeAccess(access) => access_message(access, resources),
            Representation::ArgumentInvalid { kind, resource, .. } => match resource {
                Some(name) => resources
                    .load_named(name)
                    .unwrap_or_else(|_| format!("{kind} (message resource {name})")),
                None => kind.full_name(),
            },
            Representation::TypeLoadFailure(info) => type_load_message(info, resources),
            Representation::FileLoadFailure(info) => info.message(resources),
        }
    }
}

/// Returns `true` if `code` says more than the canonical code of `kind`.
///
/// Such codes are worth rendering into the message of a freshly created throwable.
#[must_use]
pub fn is_interesting_hr(kind: ExceptionKind, code: HResult) -> bool {
    if code == hr::S_OK || code == hr::E_FAIL {
        return false;
    }

    let info = kind.info();
    info.display_hr || info.hrs.first().map_or(true, |canonical| *canonical != code)
}

pub(crate) fn access_message(
    access: &MemberAccess,
    resources: &dyn crate::runtime::ResourceLoader,
) -> String {
    let Some(id) = access.message_id else {
        return access.member.clone();
    };

    let context = access
        .additional_context
        .as_deref()
        .map(|context| format!(" {context}"))
        .unwrap_or_default();
    let caller = access.caller.as_deref().unwrap_or("");

    resources
        .load(id, &[caller, &access.member, &context])
        .unwrap_or_else(|_| access.member.clone())
}

pub(crate) fn type_load_message(
    info: &TypeLoadInfo,
    resources: &dyn crate::runtime::ResourceLoader,
) -> String {
    let full_name = info.full_name();
    let message_arg = info
        .message_arg
        .as_deref()
        .map(|arg| format!(" {arg}"))
        .unwrap_or_default();

    resources
        .load(
            ResourceId::CLASSLOAD_GENERAL,
            &[&full_name, &info.assembly, &message_arg],
        )
        .unwrap_or_else(|_| {
            format!(
                "Could not load type '{}' from assembly '{}'.{}",
                full_name, info.assembly, message_arg
            )
        })
}

impl Clone for RuntimeException {
    fn clone(&self) -> Self {
        RuntimeException {
            repr: self.repr.clone(),
            inner: self.inner.clone(),
            cache: ThrowableCache::default(),
        }
    }
}

impl fmt::Debug for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeException")
            .field("repr", &self.repr)
            .field("inner", &self.inner)
            .field("cached", &self.has_cached_throwable())
            .finish()
    }
}

impl fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &'static str = self.repr_type().into();
        match self.known_hr() {
            Some(code) => write!(f, "{name} ({code})"),
            None => write!(f, "{name}"),
        }
    }
}

impl std::error::Error for RuntimeException {}
