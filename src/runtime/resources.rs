//! Message resources.
//!
//! Exception messages are never hard-coded in the representation variants. They name a
//! [`ResourceId`] (or a named managed resource) plus up to six arguments, and the
//! [`ResourceLoader`] collaborator turns that into text. [`StringTable`] is the in-process
//! loader the runtime uses unless the host installs its own, pre-populated with the
//! messages the engine itself needs.
//!
//! # Argument Substitution
//!
//! Templates use `%1` through `%6` as placeholders; `%%` renders a literal percent sign.
//! Placeholders without a matching argument render as empty text.

use std::{fmt, sync::Arc};

use dashmap::DashMap;

use crate::{hresult::HResult, Error, Result};

/// Maximum number of arguments a message template may reference.
pub const MAX_MESSAGE_ARGS: usize = 6;

/// Identifies a message template of the runtime's string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

#[allow(missing_docs)]
impl ResourceId {
    pub const EXCEPTION_GENERIC: ResourceId = ResourceId(0x1000);
    pub const OUT_OF_MEMORY: ResourceId = ResourceId(0x1001);
    pub const STACK_OVERFLOW: ResourceId = ResourceId(0x1002);
    pub const EXECUTION_ENGINE: ResourceId = ResourceId(0x1003);
    pub const THREAD_ABORT: ResourceId = ResourceId(0x1004);
    pub const CLASSLOAD_GENERAL: ResourceId = ResourceId(0x1010);
    pub const FIELD_ACCESS: ResourceId = ResourceId(0x1020);
    pub const METHOD_ACCESS: ResourceId = ResourceId(0x1021);
    pub const TYPE_ACCESS: ResourceId = ResourceId(0x1022);
    pub const FILE_LOAD_GENERIC: ResourceId = ResourceId(0x1030);
    pub const FILE_NOT_FOUND: ResourceId = ResourceId(0x1031);
    pub const BAD_IMAGE_FORMAT: ResourceId = ResourceId(0x1032);
    pub const INVALID_ARGUMENT_VALUE: ResourceId = ResourceId(0x1040);
    pub const NULL_ARGUMENT: ResourceId = ResourceId(0x1041);
    pub const COM_ERROR: ResourceId = ResourceId(0x1050);

    /// Creates an id for a host-defined resource.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        ResourceId(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IDS_{:04X}", self.0)
    }
}

/// Loads localized message text.
pub trait ResourceLoader: Send + Sync {
    /// Loads the template `id` and substitutes `args` into it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceNotFound`] when the template does not exist.
    fn load(&self, id: ResourceId, args: &[&str]) -> Result<String>;

    /// Loads a named managed resource string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceNotFound`] when the resource does not exist.
    fn load_named(&self, name: &str) -> Result<String>;

    /// Renders a status code as text.
    fn hr_message(&self, code: HResult) -> String {
        format!("Exception from HRESULT: {code}")
    }
}

/// Substitutes `%1`..`%6` in `template`.
///
/// # Arguments
///
/// * `template` - The message template
/// * `args` - Positional arguments; `%1` is `args[0]`
#[must_use]
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                result.push('%');
            }
            Some(digit @ '1'..='6') => {
                chars.next();
                let index = digit as usize - '1' as usize;
                if let Some(arg) = args.get(index) {
                    result.push_str(arg);
                }
            }
            _ => result.push('%'),
        }
    }

    result
}

/// In-process [`ResourceLoader`] backed by two concurrent maps.
///
/// [`StringTable::new`] registers the runtime's built-in messages; hosts may register
/// additional templates and named resources at any time.
pub struct StringTable {
    templates: DashMap<ResourceId, Arc<str>>,
    named: DashMap<String, Arc<str>>,
}

impl StringTable {
    /// Creates a table containing the built-in messages.
    #[must_use]
    pub fn new() -> Self {
        let table = StringTable::empty();

        for (id, text) in BUILTIN_TEMPLATES {
            table.register(*id, text);
        }
        for (name, text) in BUILTIN_NAMED {
            table.register_named(name, text);
        }

        table
    }

    /// Creates a table without any messages.
    #[must_use]
    pub fn empty() -> Self {
        StringTable {
            templates: DashMap::new(),
            named: DashMap::new(),
        }
    }

    /// Registers (or replaces) a message template.
    pub fn register(&self, id: ResourceId, text: &str) {
        self.templates.insert(id, Arc::from(text));
    }

    /// Registers (or replaces) a named resource string.
    pub fn register_named(&self, name: &str, text: &str) {
        self.named.insert(name.to_string(), Arc::from(text));
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLoader for StringTable {
    fn load(&self, id: ResourceId, args: &[&str]) -> Result<String> {
        match self.templates.get(&id) {
            Some(template) => Ok(format_message(&template, args)),
            None => Err(Error::ResourceNotFound(id.to_string())),
        }
    }

    fn load_named(&self, name: &str) -> Result<String> {
        match self.named.get(name) {
            Some(text) => Ok(text.to_string()),
            None => Err(Error::ResourceNotFound(name.to_string())),
        }
    }
}

static BUILTIN_TEMPLATES: &[(ResourceId, &str)] = &[
    (ResourceId::EXCEPTION_GENERIC, "Exception of type '%1' was thrown."),
    (
        ResourceId::OUT_OF_MEMORY,
        "Insufficient memory to continue the execution of the program.",
    ),
    (ResourceId::STACK_OVERFLOW, "Operation caused a stack overflow."),
    (
        ResourceId::EXECUTION_ENGINE,
        "Internal error in the .NET Runtime.",
    ),
    (ResourceId::THREAD_ABORT, "Thread was being aborted."),
    (
        ResourceId::CLASSLOAD_GENERAL,
        "Could not load type '%1' from assembly '%2'.%3",
    ),
    (
        ResourceId::FIELD_ACCESS,
        "Attempt by method '%1' to access field '%2' failed.%3",
    ),
    (
        ResourceId::METHOD_ACCESS,
        "Attempt by method '%1' to access method '%2' failed.%3",
    ),
    (
        ResourceId::TYPE_ACCESS,
        "Attempt by method '%1' to access type '%2' failed.%3",
    ),
    (
        ResourceId::FILE_LOAD_GENERIC,
        "Could not load file or assembly '%1'. %2",
    ),
    (
        ResourceId::FILE_NOT_FOUND,
        "Could not load file or assembly '%1' or one of its dependencies. %2",
    ),
    (
        ResourceId::BAD_IMAGE_FORMAT,
        "Could not load file or assembly '%1'. An attempt was made to load a program with an incorrect format. %2",
    ),
    (
        ResourceId::INVALID_ARGUMENT_VALUE,
        "Value '%1' does not fall within the expected range.",
    ),
    (ResourceId::NULL_ARGUMENT, "Value cannot be null. (Parameter '%1')"),
    (
        ResourceId::COM_ERROR,
        "Error HRESULT %1 has been returned from a call to a COM component.",
    ),
];

static BUILTIN_NAMED: &[(&str, &str)] = &[
    ("Arg_NullReferenceException", "Object reference not set to an instance of an object."),
    ("Arg_InvalidHandle", "Invalid handle."),
    ("Argument_InvalidValue", "Value does not fall within the expected range."),
    ("ArgumentNull_Generic", "Value cannot be null."),
    (
        "ArgumentOutOfRange_Index",
        "Index was out of range. Must be non-negative and less than the size of the collection.",
    ),
    ("InvalidOperation_EnumFailedVersion", "Collection was modified; enumeration operation may not execute."),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message() {
        assert_eq!(format_message("a %1 b %2", &["x", "y"]), "a x b y");
        assert_eq!(format_message("%2%1", &["x", "y"]), "yx");
        assert_eq!(format_message("100%% %3", &["x"]), "100% ");
        assert_eq!(format_message("%7 %", &[]), "%7 %");
    }

    #[test]
    fn test_builtin_lookup() {
        let table = StringTable::new();
        let text = table
            .load(ResourceId::INVALID_ARGUMENT_VALUE, &["x"])
            .unwrap();
        assert_eq!(text, "Value 'x' does not fall within the expected range.");
        assert!(table.load_named("ArgumentNull_Generic").is_ok());
    }

    #[test]
    fn test_missing_resources() {
        let table = StringTable::empty();
        match table.load(ResourceId::THREAD_ABORT, &[]) {
            Err(Error::ResourceNotFound(name)) => assert_eq!(name, "IDS_1004"),
            _ => panic!("Expected ResourceNotFound"),
        }
        assert!(table.load_named("nope").is_err());
    }

    #[test]
    fn test_hr_message_default() {
        let table = StringTable::new();
        assert_eq!(
            table.hr_message(HResult::new(0x8013_1509)),
            "Exception from HRESULT: 0x80131509"
        );
    }
}
