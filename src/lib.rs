// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # cilcover
//!
//! Code coverage instrumentation of CIL method bodies at JIT time.
//!
//! A .NET profiler gets a chance to rewrite every method right before the runtime compiles it.
//! `cilcover` is the rewriting engine behind such a profiler: it decodes the method body,
//! inserts a small probe in front of every sequence point and on every edge of every
//! conditional branch, keeps branch targets and exception regions pointing at the right
//! instructions, and encodes a body the runtime accepts. The probes report coverage ids to a
//! visit recorder, either through a direct `calli` or through a helper planted in the system
//! library (the "cuckoo").
//!
//! ## Features
//!
//! - **Byte-exact codec** - tiny and fat headers, every ECMA-335 opcode, small and fat
//!   exception clauses, with branch widening computed to a fixpoint
//! - **Reference-based instruction model** - branch targets and handler boundaries point at
//!   instructions, not offsets, so insertions never need manual patching
//! - **Idempotent instrumentation** - a body that already carries its probes is left alone
//! - **Fail-open profiler** - any failure leaves the original body in place and is logged
//! - **Lock-free visit thresholds** - per-id atomic counters that grow without blocking readers
//!
//! ## Quick Start
//!
//! ```rust
//! use cilcover::prelude::*;
//!
//! // ldarg.0; brfalse.s +1; nop; ret
//! let mut method = MethodDecoder::decode(&[0x16, 0x02, 0x2C, 0x01, 0x00, 0x2A])?;
//!
//! let points = InstrumentationPoints::new(
//!     vec![SequencePoint { offset: 0, id: 1 }, SequencePoint { offset: 4, id: 2 }],
//!     vec![
//!         BranchPoint { offset: 1, path: 0, id: 3 },
//!         BranchPoint { offset: 1, path: 1, id: 4 },
//!     ],
//! );
//! let dispatch = ProbeDispatch::Trampoline { safe_token: Token::new(0x0A00_0001) };
//!
//! instrument(&mut method, &points, &dispatch)?;
//! let body = MethodEncoder::new().encode(&mut method)?;
//!
//! // The rewritten body decodes again and carries the probes
//! assert_eq!(MethodDecoder::decode(&body)?.len(), method.len());
//! # Ok::<(), cilcover::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`il`] - the method model: decoder, encoder, exception table codec, insertion primitive
//! - [`coverage`] - sequence and branch probe placement and the idempotency guard
//! - [`probe`] - how a probe reaches the recorder: direct `calli` or cuckoo trampoline
//! - [`threshold`] - per-id visit caps applied by the runtime side of the probes
//! - [`profiler`] - [`profiler::CoverageProfiler`], wiring everything to the runtime callbacks
//! - [`host`] - the traits the profiler uses to talk to the runtime and the coverage host
//! - [`config`] - session settings read from the environment
//! - [`injection`] - outcomes reported by the type injection layer
//! - [`registry`] - assembly versions seen in loaded modules
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Errors carry enough context to
//! tell a corrupt input body from an internal inconsistency:
//!
//! ```rust
//! use cilcover::{il::MethodDecoder, Error};
//!
//! match MethodDecoder::decode(&[0x4B, 0x00]) {
//!     Ok(_) => println!("decoded"),
//!     Err(Error::Decode { message, .. }) => println!("corrupt body: {}", message),
//!     Err(e) => println!("other error: {}", e),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ### Fuzzing
//!
//! ```bash
//! cargo install cargo-fuzz
//! cargo +nightly fuzz run method_body --release
//! ```
//!
//! ### Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod parser;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilcover::prelude::*;
///
/// let method = MethodDecoder::decode(&[0x0A, 0x00, 0x2A])?; // nop; ret
/// assert_eq!(method.len(), 2);
/// # Ok::<(), cilcover::Error>(())
/// ```
pub mod prelude;

/// Method bodies: instruction model, decoder, encoder and exception tables
///
/// # Key Types
///
/// - [`il::Method`] - an ordered instruction sequence with stable instruction ids
/// - [`il::Instruction`] - a single instruction; branch operands refer to [`il::InstrId`]s
/// - [`il::MethodDecoder`] / [`il::MethodEncoder`] - body bytes to [`il::Method`] and back
/// - [`il::ExceptionHandler`] - a protected region whose boundaries are instruction ids
///
/// # Examples
///
/// ```rust
/// use cilcover::il::{MethodDecoder, MethodEncoder};
///
/// let body = [0x0A, 0x00, 0x2A]; // nop; ret
/// let mut method = MethodDecoder::decode(&body)?;
/// assert_eq!(MethodEncoder::new().encode(&mut method)?, body);
/// # Ok::<(), cilcover::Error>(())
/// ```
pub mod il;

/// Sequence and branch coverage passes
pub mod coverage;

/// Probe dispatch: direct `calli` or the cuckoo trampoline
pub mod probe;

/// Per-id visit thresholds and the runtime recorder
pub mod threshold;

/// Collaborator interfaces
pub mod host;

/// Session configuration
pub mod config;

/// Injected type registration state
pub mod injection;

/// Assembly versions and public key tokens
pub mod registry;

/// The JIT-time entry points
pub mod profiler;

/// Little-endian primitives
pub mod io;

/// Metadata tokens
pub mod token;

/// `cilcover` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilcover` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use cilcover::{il::MethodDecoder, Error};
///
/// let error = MethodDecoder::decode(&[]).unwrap_err();
/// assert!(matches!(error, Error::OutOfBounds | Error::Decode { .. }));
/// ```
pub use error::Error;

/// Forward-only cursor used by the decoder
pub use parser::Parser;

/// Metadata token as found in operands and locals signatures
pub use token::Token;
