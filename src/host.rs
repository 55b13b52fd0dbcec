//! Interfaces of the collaborators the profiler drives.
//!
//! The rewriting engine never talks to a runtime directly. Everything it needs from the outside
//! world comes through these traits: the host that owns method bodies, the source of
//! instrumentation points, the metadata layer that can define tokens, and the assembly
//! registry. Every collaborator failure is reported as [`crate::Error::HostApi`].

use crate::{
    coverage::InstrumentationPoints,
    il::OffsetMapping,
    injection::{Injection, Registration},
    probe::{CorrelationContext, CuckooTokens, ProbeArity},
    registry::{AssemblyVersion, ModuleAssemblies},
    token::Token,
    Result,
};

/// Host identifier of a loaded module
pub type ModuleId = u64;

/// Host identifier of a function instance being compiled
pub type FunctionId = u64;

/// A method definition within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Owning module
    pub module: ModuleId,
    /// `MethodDef` token
    pub token: Token,
}

impl MethodKey {
    /// Create a key
    #[must_use]
    pub fn new(module: ModuleId, token: Token) -> Self {
        MethodKey { module, token }
    }
}

/// The runtime that owns method bodies.
pub trait Host: Send + Sync {
    /// Current body of a method
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the body is not available.
    fn method_body(&self, key: MethodKey) -> Result<Vec<u8>>;

    /// Allocate a zeroed buffer for a new body of `size` bytes from the module's body allocator
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the allocator refuses.
    fn allocate_method_body(&self, module: ModuleId, size: usize) -> Result<Vec<u8>>;

    /// Install a new body
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the host rejects the body.
    fn set_method_body(&self, key: MethodKey, body: Vec<u8>) -> Result<()>;

    /// Report how original offsets moved
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the host rejects the map.
    fn set_instrumented_offset_map(&self, function: FunctionId, map: &[OffsetMapping])
        -> Result<()>;

    /// Simple name of the assembly a module belongs to
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the module is unknown.
    fn module_assembly_name(&self, module: ModuleId) -> Result<String>;

    /// Identity of a module's assembly and of every assembly it references
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the assembly metadata cannot be read.
    fn module_assemblies(&self, module: ModuleId) -> Result<ModuleAssemblies>;
}

/// Supplies the points to instrument for a method.
pub trait PointSource: Send + Sync {
    /// Points for a method; an empty set means "do not instrument"
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the channel to the point supplier fails.
    fn points(&self, key: MethodKey) -> Result<InstrumentationPoints>;
}

/// The narrow slice of the type injection layer that coverage needs.
pub trait TypeInjector: Send + Sync {
    /// Define injected types in a freshly loaded module
    fn register_type_in_module(&self, module: ModuleId) -> Registration;

    /// Emit the bodies of injected types in a module
    fn inject_type_implementation_in_module(&self, module: ModuleId) -> Injection;

    /// Member reference from `module` to the safe cuckoo helper
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the reference cannot be defined.
    fn safe_probe_token(&self, module: ModuleId) -> Result<Token>;

    /// Correlation id accessors, if context propagation is enabled for the module
    fn correlation_context(&self, module: ModuleId) -> Option<CorrelationContext>;
}

/// Metadata definitions needed by the probe dispatch.
pub trait CuckooMetadata: Send + Sync {
    /// Define the nest type and the two helper methods in the system module
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the type or an attribute cannot be resolved.
    fn define_cuckoos(&self, module: ModuleId) -> Result<CuckooTokens>;

    /// Stand-alone `calli` signature for a probe of the given arity in `module`
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] if the signature cannot be defined.
    fn probe_signature(&self, module: ModuleId, arity: ProbeArity) -> Result<Token>;
}

/// Resolves the newest known version of an assembly.
pub trait AssemblyVersions: Send + Sync {
    /// Highest version registered under `name`
    fn find_max_version(&self, name: &str) -> Option<AssemblyVersion>;
}
