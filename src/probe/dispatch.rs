use std::sync::Arc;

use dashmap::DashMap;
use strum::{Display, EnumString};

use crate::{
    host::{CuckooMetadata, ModuleId, TypeInjector},
    il::{opcodes, Instruction},
    token::Token,
    Result,
};

/// Width of a native function pointer in the instrumented process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PointerWidth {
    /// 32-bit process, pointers are loaded with `ldc.i4`
    Bits32,
    /// 64-bit process, pointers are loaded with `ldc.i8`
    Bits64,
}

impl PointerWidth {
    /// Width of the current process
    #[must_use]
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        }
    }
}

impl Default for PointerWidth {
    fn default() -> Self {
        PointerWidth::native()
    }
}

/// Arguments a probe takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ProbeArity {
    /// `(id)`
    Id,
    /// `(id, correlation high, correlation low)`
    IdWithContext,
}

/// Session-wide probe mode, chosen once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString)]
pub enum ProbeMode {
    /// `calli` straight into the native recorder
    #[strum(serialize = "direct", serialize = "oldSchool")]
    Direct,
    /// Call the safe helper injected into the system module
    #[default]
    #[strum(serialize = "cuckoo")]
    Cuckoo,
}

/// How a probe reaches the visit recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDispatch {
    /// `ldc.i4 id; ldc.i8 fn_ptr; calli signature`
    Direct {
        /// Address of the native recorder
        fn_ptr: u64,
        /// Stand-alone signature of the recorder in the instrumented module
        signature: Token,
        /// Pointer size of the process
        pointer_width: PointerWidth,
    },
    /// `ldc.i4 id; call safe_token`
    Trampoline {
        /// Member reference to the safe helper in the instrumented module
        safe_token: Token,
    },
}

impl ProbeDispatch {
    /// The probe sequence for a coverage id.
    ///
    /// The sequence pushes the id (and the function pointer for direct calls) and the call
    /// consumes all of it, so the stack is unchanged across the probe.
    #[must_use]
    pub fn probe_instructions(&self, id: u32) -> Vec<Instruction> {
        // Ids are opaque 32-bit keys; the recorder reads them back as unsigned
        #[allow(clippy::cast_possible_wrap)]
        let load_id = Instruction::ldc_i4(id as i32);

        match *self {
            ProbeDispatch::Direct {
                fn_ptr,
                signature,
                pointer_width,
            } => vec![
                load_id,
                load_pointer(fn_ptr, pointer_width),
                Instruction::with_token(opcodes::CALLI, signature),
            ],
            ProbeDispatch::Trampoline { safe_token } => vec![
                load_id,
                Instruction::with_token(opcodes::CALL, safe_token),
            ],
        }
    }

    /// Extra evaluation stack the probe needs
    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        match self {
            ProbeDispatch::Direct { .. } => 2,
            ProbeDispatch::Trampoline { .. } => 1,
        }
    }
}

/// Load a native pointer constant
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub(crate) fn load_pointer(fn_ptr: u64, pointer_width: PointerWidth) -> Instruction {
    match pointer_width {
        PointerWidth::Bits64 => Instruction::ldc_i8(fn_ptr as i64),
        PointerWidth::Bits32 => Instruction::ldc_i4(fn_ptr as u32 as i32),
    }
}

/// Resolves the probe dispatch for the module a method lives in.
pub trait ProbeTargetProvider: Send + Sync {
    /// Dispatch to use for methods of `module`
    ///
    /// # Errors
    /// [`crate::Error::HostApi`] or [`crate::Error::Trampoline`] if the target cannot be
    /// resolved in that module.
    fn dispatch_for(&self, module: ModuleId) -> Result<ProbeDispatch>;
}

/// Direct `calli` dispatch; the signature token is defined once per module.
pub struct DirectProbes {
    fn_ptr: u64,
    pointer_width: PointerWidth,
    metadata: Arc<dyn CuckooMetadata>,
    signatures: DashMap<ModuleId, Token>,
}

impl DirectProbes {
    /// Dispatch to the native recorder at `fn_ptr`
    pub fn new(fn_ptr: u64, pointer_width: PointerWidth, metadata: Arc<dyn CuckooMetadata>) -> Self {
        DirectProbes {
            fn_ptr,
            pointer_width,
            metadata,
            signatures: DashMap::new(),
        }
    }
}

impl ProbeTargetProvider for DirectProbes {
    fn dispatch_for(&self, module: ModuleId) -> Result<ProbeDispatch> {
        let cached = self.signatures.get(&module).map(|entry| *entry);
        let signature = match cached {
            Some(signature) => signature,
            None => {
                let signature = self.metadata.probe_signature(module, ProbeArity::Id)?;
                *self.signatures.entry(module).or_insert(signature)
            }
        };

        Ok(ProbeDispatch::Direct {
            fn_ptr: self.fn_ptr,
            signature,
            pointer_width: self.pointer_width,
        })
    }
}

/// Trampoline dispatch; the member reference to the safe helper is resolved once per module.
pub struct TrampolineProbes {
    injector: Arc<dyn TypeInjector>,
    tokens: DashMap<ModuleId, Token>,
}

impl TrampolineProbes {
    /// Dispatch through the safe helper, resolved by `injector`
    pub fn new(injector: Arc<dyn TypeInjector>) -> Self {
        TrampolineProbes {
            injector,
            tokens: DashMap::new(),
        }
    }

    /// Number of modules with a cached reference
    #[must_use]
    pub fn cached_modules(&self) -> usize {
        self.tokens.len()
    }
}

impl ProbeTargetProvider for TrampolineProbes {
    fn dispatch_for(&self, module: ModuleId) -> Result<ProbeDispatch> {
        let cached = self.tokens.get(&module).map(|entry| *entry);
        let safe_token = match cached {
            Some(token) => token,
            None => {
                let token = self.injector.safe_probe_token(module)?;
                *self.tokens.entry(module).or_insert(token)
            }
        };

        Ok(ProbeDispatch::Trampoline { safe_token })
    }
}
