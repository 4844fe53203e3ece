//! COM and WinRT error information.
//!
//! [`ComErrorInfo`] is the data a COM component reports through its error info object:
//! the failing status code, a description, the source and help file, and for WinRT
//! components the restricted error information. Strings arriving from COM are UTF-16
//! and can be supplied as raw buffers.

use uguid::Guid;
use widestring::U16CStr;

use crate::{
    hresult::{hr, HResult},
    kinds::{kind_from_hr, ExceptionKind},
    runtime::{
        object::{CtorArg, ExceptionField, ObjectRef},
        resources::{ResourceId, ResourceLoader},
    },
    thread::ManagedThread,
    Error, Result,
};

/// Data key under which the restricted error description is stored.
pub const RESTRICTED_DESCRIPTION_KEY: &str = "RestrictedDescription";
/// Data key under which the restricted error reference is stored.
pub const RESTRICTED_REFERENCE_KEY: &str = "RestrictedErrorReference";
/// Data key under which the restricted capability SID is stored.
pub const RESTRICTED_CAPABILITY_KEY: &str = "RestrictedCapabilitySid";

/// Restricted error details reported by WinRT components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestrictedErrorInfo {
    /// Description meant for developers
    pub description: Option<String>,
    /// Reference text identifying the failure
    pub reference: Option<String>,
    /// Capability SID that was missing, if the failure was an access check
    pub capability_sid: Option<String>,
}

/// Error information captured from a COM component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComErrorInfo {
    /// The failing status code
    pub hr: HResult,
    /// Description of the failure
    pub description: Option<String>,
    /// Component that raised the failure
    pub source: Option<String>,
    /// Path of the help file
    pub help_file: Option<String>,
    /// Help context id inside the help file, 0 if none
    pub help_context: u32,
    /// Interface that defined the error
    pub guid: Guid,
    /// WinRT restricted error details
    pub restricted: Option<RestrictedErrorInfo>,
}

impl ComErrorInfo {
    /// Creates error info carrying only a status code.
    #[must_use]
    pub fn new(hr: HResult) -> Self {
        ComErrorInfo {
            hr,
            description: None,
            source: None,
            help_file: None,
            help_context: 0,
            guid: Guid::ZERO,
            restricted: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the description from a nul-terminated UTF-16 buffer, as returned by COM.
    ///
    /// Everything after the first nul is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Error`] if the buffer contains no nul terminator.
    pub fn with_wide_description(mut self, buffer: &[u16]) -> Result<Self> {
        let text = U16CStr::from_slice_truncate(buffer)
            .map_err(|_| Error::Error("description is not nul-terminated".to_string()))?;
        self.description = Some(text.to_string_lossy());
        Ok(self)
    }

    /// Sets the source component.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the help file and the context inside it.
    #[must_use]
    pub fn with_help(mut self, file: impl Into<String>, context: u32) -> Self {
        self.help_file = Some(file.into());
        self.help_context = context;
        self
    }

    /// Sets the interface id from its 16-byte wire form.
    #[must_use]
    pub fn with_guid(mut self, bytes: [u8; 16]) -> Self {
        self.guid = Guid::from_bytes(bytes);
        self
    }

    /// Attaches WinRT restricted error details.
    #[must_use]
    pub fn with_restricted(mut self, restricted: RestrictedErrorInfo) -> Self {
        self.restricted = Some(restricted);
        self
    }

    /// Classifies the status code.
    ///
    /// # Arguments
    ///
    /// * `winrt` - Whether WinRT classification is active
    #[must_use]
    pub fn kind(&self, winrt: bool) -> ExceptionKind {
        kind_from_hr(self.hr, winrt)
    }

    /// Returns the help link: `file#context` when a context is set, `file` alone otherwise.
    #[must_use]
    pub fn help_link(&self) -> Option<String> {
        let file = self.help_file.as_deref()?;
        if self.help_context != 0 {
            Some(format!("{}#{}", file, self.help_context))
        } else {
            Some(file.to_string())
        }
    }

    /// Renders the message of the failure.
    ///
    /// The description wins, followed on a new line by the restricted description when both
    /// are present. Without a description the status code is rendered.
    #[must_use]
    pub fn message(&self, resources: &dyn ResourceLoader) -> String {
        let restricted = self
            .restricted
            .as_ref()
            .and_then(|restricted| restricted.description.as_deref())
            .filter(|text| !text.is_empty());

        match (self.description.as_deref().filter(|text| !text.is_empty()), restricted) {
            (Some(description), Some(restricted)) if description != restricted => {
                format!("{description}\r\n{restricted}")
            }
            (Some(description), _) => description.to_string(),
            (None, Some(restricted)) => restricted.to_string(),
            (None, None) if self.hr == hr::E_FAIL => resources
                .load(ResourceId::COM_ERROR, &[&self.hr.to_string()])
                .unwrap_or_else(|_| resources.hr_message(self.hr)),
            (None, None) => resources.hr_message(self.hr),
        }
    }
}

/// Creates the throwable for a COM failure.
pub(crate) fn create(info: &ComErrorInfo, thread: &ManagedThread) -> Result<ObjectRef> {
    let runtime = thread.runtime();
    let kind = info.kind(runtime.config().winrt);
    let object = super::throwable::new_object(thread, kind)?;
    let allocator = runtime.allocator();

    let message = info.message(runtime.resources());
    if matches!(kind, ExceptionKind::Com | ExceptionKind::External) {
        allocator.construct(
            object,
            &[CtorArg::Str(Some(&message)), CtorArg::Int(info.hr.as_i32())],
        )?;
    } else {
        allocator.construct(object, &[CtorArg::Str(Some(&message))])?;
    }

    allocator.set_field(object, ExceptionField::HResult(info.hr))?;
    allocator.set_field(object, ExceptionField::Message(&message))?;
    allocator.set_field(
        object,
        ExceptionField::Source(info.source.as_deref().unwrap_or("")),
    )?;
    if let Some(link) = info.help_link() {
        allocator.set_field(object, ExceptionField::HelpLink(&link))?;
    }

    if let Some(restricted) = &info.restricted {
        let entries = [
            (RESTRICTED_DESCRIPTION_KEY, restricted.description.as_deref()),
            (RESTRICTED_REFERENCE_KEY, restricted.reference.as_deref()),
            (RESTRICTED_CAPABILITY_KEY, restricted.capability_sid.as_deref()),
        ];
        for (key, value) in entries {
            let Some(value) = value else { continue };
            if let Err(error) = allocator.set_field(object, ExceptionField::Data { key, value }) {
                debug!(%error, key, "failed to attach restricted error info");
            }
        }
    }

    Ok(object)
}
