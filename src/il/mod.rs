//! CIL method body model, decoder and encoder.
//!
//! This module is the rewriting core of the crate. A body handed over by the host is decoded
//! into a [`Method`], probes are spliced in with [`Method::insert`], and the result is encoded
//! back by [`MethodEncoder`], which recomputes every offset, branch form and exception clause.
//!
//! # Key Types
//! - [`Method`] - Instruction arena plus execution order, locals and exception handlers
//! - [`Instruction`] - One opcode and its [`Operand`]; branch targets are [`InstrId`]s
//! - [`ExceptionHandler`] - A try/handler region held by instruction reference
//! - [`MethodHeader`] - Tiny or fat header codec
//!
//! # Main Entry Points
//! - [`MethodDecoder::decode`] - Parse a complete body
//! - [`MethodEncoder::encode`] / [`MethodEncoder::encode_into`] - Serialize a body
//! - [`MethodEncoder::method_size`] - Size of the serialized body, for host-side allocation
//!
//! # Example
//! ```rust
//! use cilcover::il::{opcodes, Instruction, MethodDecoder, MethodEncoder, Placement};
//!
//! // tiny header, code size 1: ret
//! let mut method = MethodDecoder::decode(&[0x06, 0x2A])?;
//! let ret = method.id_at(0).unwrap();
//! method.insert(ret, vec![Instruction::simple(opcodes::NOP)], Placement::Before)?;
//!
//! let bytes = MethodEncoder::new().encode(&mut method)?;
//! assert_eq!(bytes, vec![0x0A, 0x00, 0x2A]);
//! # Ok::<(), cilcover::Error>(())
//! ```

mod decoder;
mod encoder;
mod exceptions;
mod header;
mod instruction;
mod method;
pub mod opcodes;

pub use decoder::MethodDecoder;
pub use encoder::{Layout, MethodEncoder};
pub use exceptions::{
    decode_sections, encode_section, ClauseFormat, ExceptionHandler,
    ExceptionHandlerFlags, RawClause, SectionFlags,
};
pub use header::{
    MethodBodyFlags, MethodHeader, FAT_HEADER_SIZE, TINY_MAX_CODE_SIZE, TINY_MAX_STACK,
};
pub use instruction::{FlowType, InstrId, Instruction, OpCode, Operand, OperandType};
pub use method::{Method, OffsetMapping, Placement};
pub use opcodes::OpCodeInfo;
