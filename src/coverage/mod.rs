//! Sequence and branch coverage instrumentation.
//!
//! Both passes operate on a decoded [`crate::il::Method`] and place probes exclusively through
//! [`crate::il::Method::insert`], so they can run one after the other over the same method
//! without desynchronizing branch targets or exception regions.
//!
//! - Sequence coverage puts a probe in front of each point's instruction. Every branch and
//!   exception boundary that led to that instruction now leads to the probe.
//! - Branch coverage adds one probe per covered outgoing edge of a conditional branch or
//!   `switch`, right after the branch, and redirects the branch operand through the edge blocks.
//!
//! # Example
//! ```rust
//! use cilcover::{
//!     coverage::{instrument, Instrumented, InstrumentationPoints, SequencePoint},
//!     il::MethodDecoder,
//!     probe::ProbeDispatch,
//!     Token,
//! };
//!
//! let mut method = MethodDecoder::decode(&[0x06, 0x2A])?; // ret
//! let points = InstrumentationPoints::new(vec![SequencePoint { offset: 0, id: 1 }], Vec::new());
//! let dispatch = ProbeDispatch::Trampoline { safe_token: Token::new(0x0A00_0001) };
//!
//! let outcome = instrument(&mut method, &points, &dispatch)?;
//! assert!(matches!(outcome, Instrumented::Applied { sequence_probes: 1, .. }));
//! assert_eq!(method.len(), 3);
//! # Ok::<(), cilcover::Error>(())
//! ```

mod instrument;
mod points;

pub use instrument::{
    add_branch_coverage, add_sequence_coverage, instrument, is_instrumented, Instrumented,
};
pub use points::{BranchPoint, InstrumentationPoints, SequencePoint};
