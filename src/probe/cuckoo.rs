//! The cuckoo helper pair planted in the system library.
//!
//! Code running under security transparency may not issue `calli` into native code. To reach the
//! recorder anyway, two helpers are defined once in the most trusted module of the process, the
//! system library, on the type `System.CannotUnloadAppDomainException`:
//!
//! ```text
//! VisitedCritical(u32 id, u64 high, u64 low)   [SecurityCritical]
//!     ldarg.0; ldarg.1; ldarg.2; ldc.i8 recorder; calli (u32, u64, u64); ret
//!
//! SafeVisited(u32 id)                          [SecuritySafeCritical]
//!     ldarg.0; ldc.i4.0; conv.u8; ldc.i4.0; conv.u8; call VisitedCritical; ret
//! ```
//!
//! Instrumented methods call `SafeVisited` with an ordinary `call`. When correlation context
//! propagation is enabled, `SafeVisited` first loads the two halves of the current correlation id
//! instead of passing zeros.

use std::sync::OnceLock;

use crate::{
    host::{CuckooMetadata, MethodKey, ModuleId},
    il::{opcodes, Instruction, Method},
    probe::dispatch::{load_pointer, PointerWidth, ProbeArity},
    token::Token,
    Error, Result,
};

/// Type that hosts the helpers
pub const CUCKOO_NEST_TYPE: &str = "System.CannotUnloadAppDomainException";
/// Name of the helper instrumented code calls
pub const CUCKOO_SAFE_METHOD: &str = "SafeVisited";
/// Name of the helper that calls the recorder
pub const CUCKOO_CRITICAL_METHOD: &str = "VisitedCritical";
/// Assemblies trusted enough to host the helpers
pub const SYSTEM_ASSEMBLIES: [&str; 2] = ["mscorlib", "System.Private.CoreLib"];

/// Method definitions of the two helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuckooTokens {
    /// `VisitedCritical`
    pub critical: Token,
    /// `SafeVisited`
    pub safe: Token,
}

/// Accessors for the ambient correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationContext {
    /// Static method returning the current context object
    pub current: Token,
    /// Field holding the high 64 bits of the id
    pub high_field: Token,
    /// Field holding the low 64 bits of the id
    pub low_field: Token,
    /// Locals signature with a single local of the context type
    pub locals_signature: Token,
}

/// Which helper a method is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuckooHelper {
    /// `VisitedCritical`
    Critical,
    /// `SafeVisited`
    Safe,
}

#[derive(Debug)]
struct Nest {
    module: ModuleId,
    tokens: CuckooTokens,
    critical_signature: Token,
}

/// Process-wide record of the helper pair.
#[derive(Debug)]
pub struct CuckooNest {
    recorder: u64,
    pointer_width: PointerWidth,
    nest: OnceLock<Nest>,
}

impl CuckooNest {
    /// A nest whose critical helper calls the context-aware recorder at `recorder`
    #[must_use]
    pub fn new(recorder: u64, pointer_width: PointerWidth) -> Self {
        CuckooNest {
            recorder,
            pointer_width,
            nest: OnceLock::new(),
        }
    }

    /// True if `assembly` may host the helpers
    #[must_use]
    pub fn is_system_assembly(assembly: &str) -> bool {
        SYSTEM_ASSEMBLIES.contains(&assembly)
    }

    /// Define the helpers in `module`.
    ///
    /// Returns `false` if they were already defined, in this module or another.
    ///
    /// # Errors
    /// Returns [`crate::Error::Trampoline`] if the metadata layer cannot define the helpers or
    /// their signature.
    pub fn define(&self, module: ModuleId, metadata: &dyn CuckooMetadata) -> Result<bool> {
        if self.nest.get().is_some() {
            return Ok(false);
        }

        let tokens = metadata
            .define_cuckoos(module)
            .map_err(|error| Error::Trampoline(format!("defining {CUCKOO_NEST_TYPE} helpers: {error}")))?;
        let critical_signature = metadata
            .probe_signature(module, ProbeArity::IdWithContext)
            .map_err(|error| Error::Trampoline(format!("defining {CUCKOO_CRITICAL_METHOD} signature: {error}")))?;

        let defined = self
            .nest
            .set(Nest {
                module,
                tokens,
                critical_signature,
            })
            .is_ok();
        if defined {
            log::info!(
                "Cuckoo helpers defined in module {module:#x}: {CUCKOO_SAFE_METHOD} {}, {CUCKOO_CRITICAL_METHOD} {}",
                tokens.safe,
                tokens.critical
            );
        }
        Ok(defined)
    }

    /// Module that hosts the helpers, once defined
    #[must_use]
    pub fn module(&self) -> Option<ModuleId> {
        self.nest.get().map(|nest| nest.module)
    }

    /// Helper tokens, once defined
    #[must_use]
    pub fn tokens(&self) -> Option<CuckooTokens> {
        self.nest.get().map(|nest| nest.tokens)
    }

    /// Identify a helper method
    #[must_use]
    pub fn helper(&self, key: MethodKey) -> Option<CuckooHelper> {
        let nest = self.nest.get()?;
        if key.module != nest.module {
            return None;
        }
        if key.token == nest.tokens.critical {
            Some(CuckooHelper::Critical)
        } else if key.token == nest.tokens.safe {
            Some(CuckooHelper::Safe)
        } else {
            None
        }
    }

    fn nest(&self) -> Result<&Nest> {
        self.nest
            .get()
            .ok_or_else(|| Error::Trampoline("cuckoo helpers are not defined".to_string()))
    }

    /// Body of `VisitedCritical`
    ///
    /// # Errors
    /// Returns [`crate::Error::Trampoline`] if the helpers are not defined yet.
    pub fn critical_method(&self) -> Result<Method> {
        let nest = self.nest()?;
        Ok(Method::with_instructions(
            vec![
                Instruction::simple(opcodes::LDARG_0),
                Instruction::simple(opcodes::LDARG_1),
                Instruction::simple(opcodes::LDARG_2),
                load_pointer(self.recorder, self.pointer_width),
                Instruction::with_token(opcodes::CALLI, nest.critical_signature),
                Instruction::simple(opcodes::RET),
            ],
            None,
            0,
        ))
    }

    /// Body of `SafeVisited`, optionally loading the correlation id from `context`
    ///
    /// # Errors
    /// Returns [`crate::Error::Trampoline`] if the helpers are not defined yet.
    pub fn safe_method(&self, context: Option<&CorrelationContext>) -> Result<Method> {
        let critical = self.nest()?.tokens.critical;

        let Some(context) = context else {
            return Ok(Method::with_instructions(
                vec![
                    Instruction::simple(opcodes::LDARG_0),
                    Instruction::simple(opcodes::LDC_I4_0),
                    Instruction::simple(opcodes::CONV_U8),
                    Instruction::simple(opcodes::LDC_I4_0),
                    Instruction::simple(opcodes::CONV_U8),
                    Instruction::with_token(opcodes::CALL, critical),
                    Instruction::simple(opcodes::RET),
                ],
                None,
                0,
            ));
        };

        Ok(Method::with_instructions(
            vec![
                Instruction::with_token(opcodes::CALL, context.current),
                Instruction::simple(opcodes::STLOC_0),
                Instruction::simple(opcodes::LDARG_0),
                Instruction::simple(opcodes::LDLOC_0),
                Instruction::with_token(opcodes::LDFLD, context.high_field),
                Instruction::simple(opcodes::LDLOC_0),
                Instruction::with_token(opcodes::LDFLD, context.low_field),
                Instruction::with_token(opcodes::CALL, critical),
                Instruction::simple(opcodes::RET),
            ],
            Some(context.locals_signature),
            0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::il::MethodEncoder;

    struct Metadata {
        defined: AtomicUsize,
        fail: bool,
    }

    impl Metadata {
        fn new(fail: bool) -> Self {
            Metadata {
                defined: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl CuckooMetadata for Metadata {
        fn define_cuckoos(&self, _module: ModuleId) -> Result<CuckooTokens> {
            if self.fail {
                return Err(Error::HostApi("type not found".to_string()));
            }
            self.defined.fetch_add(1, Ordering::SeqCst);
            Ok(CuckooTokens {
                critical: Token(0x0600_0101),
                safe: Token(0x0600_0102),
            })
        }

        fn probe_signature(&self, _module: ModuleId, arity: ProbeArity) -> Result<Token> {
            assert_eq!(arity, ProbeArity::IdWithContext);
            Ok(Token(0x1100_0007))
        }
    }

    #[test]
    fn define_once() {
        let nest = CuckooNest::new(0x1000, PointerWidth::Bits64);
        let metadata = Metadata::new(false);

        assert!(nest.define(1, &metadata).unwrap());
        assert!(!nest.define(2, &metadata).unwrap());
        assert_eq!(metadata.defined.load(Ordering::SeqCst), 1);
        assert_eq!(nest.module(), Some(1));

        assert_eq!(
            nest.helper(MethodKey::new(1, Token(0x0600_0101))),
            Some(CuckooHelper::Critical)
        );
        assert_eq!(
            nest.helper(MethodKey::new(1, Token(0x0600_0102))),
            Some(CuckooHelper::Safe)
        );
        assert_eq!(nest.helper(MethodKey::new(2, Token(0x0600_0102))), None);
    }

    #[test]
    fn define_failure_is_trampoline_error() {
        let nest = CuckooNest::new(0x1000, PointerWidth::Bits64);
        assert!(matches!(
            nest.define(1, &Metadata::new(true)),
            Err(Error::Trampoline(_))
        ));
        assert!(nest.tokens().is_none());
        assert!(matches!(nest.critical_method(), Err(Error::Trampoline(_))));
    }

    #[test]
    fn critical_body_bytes() {
        let nest = CuckooNest::new(0x0102_0304_0506_0708, PointerWidth::Bits64);
        nest.define(1, &Metadata::new(false)).unwrap();

        let mut method = nest.critical_method().unwrap();
        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        assert_eq!(
            bytes,
            vec![
                (18 << 2) | 0x02,
                opcodes::LDARG_0,
                opcodes::LDARG_1,
                opcodes::LDARG_2,
                opcodes::LDC_I8,
                0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01,
                opcodes::CALLI,
                0x07, 0x00, 0x00, 0x11,
                opcodes::RET,
            ]
        );
    }

    #[test]
    fn safe_body_without_context() {
        let nest = CuckooNest::new(0x1000, PointerWidth::Bits64);
        nest.define(1, &Metadata::new(false)).unwrap();

        let mut method = nest.safe_method(None).unwrap();
        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        assert_eq!(
            bytes,
            vec![
                (11 << 2) | 0x02,
                opcodes::LDARG_0,
                opcodes::LDC_I4_0,
                opcodes::CONV_U8,
                opcodes::LDC_I4_0,
                opcodes::CONV_U8,
                opcodes::CALL,
                0x01, 0x01, 0x00, 0x06,
                opcodes::RET,
            ]
        );
    }

    #[test]
    fn safe_body_with_context() {
        let nest = CuckooNest::new(0x1000, PointerWidth::Bits64);
        nest.define(1, &Metadata::new(false)).unwrap();
        let context = CorrelationContext {
            current: Token(0x0A00_0001),
            high_field: Token(0x0400_0001),
            low_field: Token(0x0400_0002),
            locals_signature: Token(0x1100_0009),
        };

        let mut method = nest.safe_method(Some(&context)).unwrap();
        assert!(method.init_locals);
        let bytes = MethodEncoder::new().encode(&mut method).unwrap();

        // fat header with init-locals and the locals signature
        assert_eq!(&bytes[..4], &[0x13, 0x30, 0x08, 0x00]);
        assert_eq!(&bytes[8..12], &[0x09, 0x00, 0x00, 0x11]);
        assert_eq!(bytes.len(), 12 + 25);
        assert_eq!(bytes[12], opcodes::CALL);
        assert_eq!(*bytes.last().unwrap(), opcodes::RET);
    }
}
