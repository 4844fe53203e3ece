//! The default [`TypeResolver`], backed by the static kind table.

use dashmap::DashSet;

use crate::{
    kinds::{ExceptionKind, KindAssembly},
    runtime::{collaborators::TypeResolver, object::RuntimeType},
    Error, Result,
};

/// Name of the core library assembly.
pub const CORE_LIBRARY: &str = "System.Private.CoreLib";

/// Resolves kinds from [`KIND_TABLE`](crate::kinds::KIND_TABLE).
///
/// Core kinds always resolve. Framework kinds resolve only after their hosting assembly
/// was registered with [`CoreTypeTable::register_assembly`], mirroring a framework loader
/// that can only find types in assemblies it has loaded.
#[derive(Debug, Default)]
pub struct CoreTypeTable {
    assemblies: DashSet<String>,
}

impl CoreTypeTable {
    /// Creates a table with no framework assemblies loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a framework assembly as loadable.
    pub fn register_assembly(&self, name: &str) {
        self.assemblies.insert(name.to_string());
    }

    fn runtime_type(kind: ExceptionKind, assembly: &str) -> RuntimeType {
        RuntimeType {
            full_name: kind.full_name(),
            assembly: assembly.to_string(),
            kind,
        }
    }
}

impl TypeResolver for CoreTypeTable {
    fn core_type(&self, kind: ExceptionKind) -> Result<RuntimeType> {
        match kind.info().assembly {
            KindAssembly::Core => Ok(Self::runtime_type(kind, CORE_LIBRARY)),
            KindAssembly::Framework(_) => Err(Error::TypeLoad(format!(
                "{kind} is not hosted by {CORE_LIBRARY}"
            ))),
        }
    }

    fn framework_type(&self, kind: ExceptionKind) -> Result<RuntimeType> {
        match kind.info().assembly {
            KindAssembly::Framework(assembly) if self.assemblies.contains(assembly) => {
                Ok(Self::runtime_type(kind, assembly))
            }
            KindAssembly::Framework(assembly) => Err(Error::TypeLoad(format!(
                "{kind} from assembly '{assembly}'"
            ))),
            KindAssembly::Core => Err(Error::TypeLoad(format!(
                "{kind} is not hosted by a framework assembly"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::XAML_ASSEMBLY;

    #[test]
    fn test_core_resolution() {
        let table = CoreTypeTable::new();
        let ty = table.resolve(ExceptionKind::FileNotFound).unwrap();
        assert_eq!(ty.full_name, "System.IO.FileNotFoundException");
        assert_eq!(ty.assembly, CORE_LIBRARY);
        assert!(table.core_type(ExceptionKind::XamlParse).is_err());
    }

    #[test]
    fn test_framework_resolution() {
        let table = CoreTypeTable::new();
        match table.resolve(ExceptionKind::LayoutCycle) {
            Err(Error::TypeLoad(_)) => {}
            _ => panic!("Expected TypeLoad before the assembly is registered"),
        }

        table.register_assembly(XAML_ASSEMBLY);
        let ty = table.resolve(ExceptionKind::LayoutCycle).unwrap();
        assert_eq!(ty.full_name, "Windows.UI.Xaml.LayoutCycleException");
        assert_eq!(ty.assembly, XAML_ASSEMBLY);
    }
}
