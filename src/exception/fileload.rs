//! File and assembly load failures.

use crate::{
    hresult::{hr, is_out_of_memory, HResult},
    kinds::{file_load_kind, file_load_resource, ExceptionKind},
    runtime::{
        object::{CtorArg, ExceptionField, ObjectRef},
        resources::ResourceLoader,
    },
    thread::ManagedThread,
    Error, Result,
};

use super::repr::{Representation, RuntimeException};

/// Name rendered for a load failure without a file name.
pub const UNKNOWN_FILE_NAME: &str = "unknown";

/// A file or assembly that failed to load.
///
/// The kind is classified once, when the failure is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLoadInfo {
    /// Name of the file or display name of the assembly
    pub file_name: String,
    /// The load failure status code
    pub hr: HResult,
    /// Kind classified from `hr`
    pub kind: ExceptionKind,
}

impl FileLoadInfo {
    /// Records a load failure of `file_name` with `hr`.
    #[must_use]
    pub fn new(file_name: &str, hr: HResult) -> Self {
        FileLoadInfo {
            file_name: file_name.to_string(),
            hr,
            kind: file_load_kind(hr),
        }
    }

    /// Replaces the file name, optionally stripping the directory part.
    pub fn set_file_name(&mut self, file_name: &str, remove_path: bool) {
        let name = if remove_path {
            file_name
                .rsplit(|c: char| c == '/' || c == '\\')
                .next()
                .unwrap_or(file_name)
        } else {
            file_name
        };
        self.file_name = name.to_string();
    }

    /// Returns the name used in messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.file_name.is_empty() {
            UNKNOWN_FILE_NAME
        } else {
            &self.file_name
        }
    }

    /// Renders the message through the resource matching the kind.
    #[must_use]
    pub fn message(&self, resources: &dyn ResourceLoader) -> String {
        let reason = resources.hr_message(self.hr);
        let name = self.display_name();

        resources
            .load(file_load_resource(self.kind), &[name, &reason])
            .unwrap_or_else(|_| format!("Could not load file or assembly '{name}'. {reason}"))
    }
}

impl RuntimeException {
    /// Builds the error to raise for a load failure of `file_name`.
    ///
    /// Thread aborts and out-of-memory conditions are raised as themselves and never
    /// become load failures.
    #[must_use]
    pub fn throw_file_load(file_name: &str, code: HResult) -> Error {
        if code == hr::COR_E_THREADABORTED {
            return Error::ThreadAbort;
        }
        if is_out_of_memory(code) || file_load_kind(code) == ExceptionKind::OutOfMemory {
            return Error::OutOfMemory;
        }

        raised!(RuntimeException::file_load(file_name, code))
    }

    /// Replaces the file name of a load failure; other representations are left unchanged.
    pub fn set_file_name(&mut self, file_name: &str, remove_path: bool) {
        if let Representation::FileLoadFailure(info) = &mut self.repr {
            info.set_file_name(file_name, remove_path);
        }
    }
}

/// Creates the throwable for a load failure.
pub(crate) fn create(info: &FileLoadInfo, thread: &ManagedThread) -> Result<ObjectRef> {
    if info.kind == ExceptionKind::OutOfMemory {
        return Err(Error::OutOfMemory);
    }

    let runtime = thread.runtime();
    let allocator = runtime.allocator();
    let object = super::throwable::new_object(thread, info.kind)?;

    allocator.construct(
        object,
        &[
            CtorArg::Str(Some(info.display_name())),
            CtorArg::Int(info.hr.as_i32()),
        ],
    )?;

    let message = info.message(runtime.resources());
    allocator.set_field(object, ExceptionField::HResult(info.hr))?;
    allocator.set_field(object, ExceptionField::Message(&message))?;

    Ok(object)
}
