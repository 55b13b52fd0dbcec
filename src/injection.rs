//! Outcomes reported by the type injection layer.
//!
//! An injected type is defined in two steps. When a module finishes loading its metadata is
//! extended ([`crate::host::TypeInjector::register_type_in_module`]); then the bodies of the new
//! methods are emitted ([`crate::host::TypeInjector::inject_type_implementation_in_module`]).
//! The profiler only asks for the second step after the first reported
//! [`Registration::Registered`].

/// Outcome of registering an injected type in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Registration {
    /// The type does not apply to this module
    NotApplicable,
    /// The type was defined
    Registered,
    /// Defining the type failed; injection must not follow
    Failed,
}

/// Outcome of emitting an injected type's method bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Injection {
    /// Bodies were emitted
    Injected,
    /// The module never registered the type
    Illegal,
    /// Emitting failed
    Failed,
}
