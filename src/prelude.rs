//! # cilcover Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilcover library. Import this module to get quick access to the essential
//! types for rewriting method bodies and driving a coverage session.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilcover operations
pub use crate::Error;

/// The result type used throughout cilcover
pub use crate::Result;

/// Metadata token type for operands and signatures
pub use crate::Token;

// ================================================================================================
// Method Bodies
// ================================================================================================

/// Method model and codec
pub use crate::il::{
    ExceptionHandler, ExceptionHandlerFlags, InstrId, Instruction, Method, MethodDecoder,
    MethodEncoder, OffsetMapping, OpCode, Operand, Placement,
};

// ================================================================================================
// Instrumentation
// ================================================================================================

/// Coverage points and passes
pub use crate::coverage::{
    instrument, BranchPoint, InstrumentationPoints, Instrumented, SequencePoint,
};

/// Probe dispatch
pub use crate::probe::{PointerWidth, ProbeDispatch, ProbeMode};

// ================================================================================================
// Session
// ================================================================================================

/// Configuration and the profiler entry points
pub use crate::{
    config::ProfilerConfig,
    host::{FunctionId, MethodKey, ModuleId},
    profiler::{Collaborators, CoverageProfiler, JitOutcome, RecorderAddresses},
    threshold::{VisitRecorder, VisitSink, VisitThreshold},
};
