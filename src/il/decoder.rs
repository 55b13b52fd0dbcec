//! Method body decoding.
//!
//! [`MethodDecoder::decode`] turns the raw bytes the host hands over (header, code and optional
//! exception-handling sections) into a [`Method`]. Branch displacements and exception clause
//! offsets are resolved to [`InstrId`]s, so the body can be rewritten without tracking offsets.
//!
//! # Example
//!
//! ```rust
//! use cilcover::il::MethodDecoder;
//!
//! // tiny header, code size 2: nop; ret
//! let method = MethodDecoder::decode(&[0x0A, 0x00, 0x2A])?;
//! assert_eq!(method.len(), 2);
//! assert_eq!(method.max_stack, 8);
//! # Ok::<(), cilcover::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    il::{
        exceptions::{decode_sections, ExceptionHandler, ExceptionHandlerFlags, RawClause},
        header::{MethodBodyFlags, MethodHeader},
        instruction::{InstrId, Instruction, OpCode, Operand, OperandType},
        method::Method,
        opcodes::FE_PREFIX,
    },
    parser::Parser,
    token::Token,
    Result,
};

/// Decodes method bodies into the rewritable [`Method`] model.
pub struct MethodDecoder;

/// Branch displacements waiting for every instruction offset to be known
struct PendingTargets {
    id: InstrId,
    at: u32,
    offsets: Vec<i64>,
}

impl MethodDecoder {
    /// Decode a complete method body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Decode`] if the header is malformed, the declared code runs past
    /// `data`, an opcode is unassigned, an operand is truncated, a branch does not land on an
    /// instruction boundary, or an exception clause is malformed.
    pub fn decode(data: &[u8]) -> Result<Method> {
        let header = MethodHeader::read(data)?;

        let code_start = header.header_size;
        let code_end = code_start
            .checked_add(header.code_size as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                decode_error!(
                    "Declared code size {} exceeds the {} bytes of the body",
                    header.code_size,
                    data.len().saturating_sub(code_start)
                )
            })?;

        let mut method = Method::new();
        method.max_stack = header.max_stack;
        method.local_var_sig = header.local_var_sig.non_null();
        method.init_locals = header.flags.contains(MethodBodyFlags::INIT_LOCALS);

        let mut by_offset: HashMap<u32, InstrId> = HashMap::new();
        let mut pending: Vec<PendingTargets> = Vec::new();

        let mut parser = Parser::new(&data[code_start..code_end]);
        while parser.has_more_data() {
            // Bounded by the u32 code size
            #[allow(clippy::cast_possible_truncation)]
            let offset = parser.pos() as u32;
            let (instruction, displacements) = decode_instruction(&mut parser)?;
            #[allow(clippy::cast_possible_truncation)]
            let next = parser.pos() as u32;

            let id = method.push(Instruction {
                original_offset: Some(offset),
                offset,
                ..instruction
            });
            by_offset.insert(offset, id);

            if let Some(displacements) = displacements {
                pending.push(PendingTargets {
                    id,
                    at: offset,
                    offsets: displacements
                        .into_iter()
                        .map(|displacement| i64::from(next) + i64::from(displacement))
                        .collect(),
                });
            }
        }

        let resolve = |target: i64, at: u32| -> Result<InstrId> {
            u32::try_from(target)
                .ok()
                .and_then(|target| by_offset.get(&target).copied())
                .ok_or_else(|| {
                    decode_error!(
                        "Branch at IL_{:04x} targets {}, which is not an instruction boundary",
                        at,
                        target
                    )
                })
        };

        for branch in pending {
            let targets = branch
                .offsets
                .iter()
                .map(|target| resolve(*target, branch.at))
                .collect::<Result<Vec<InstrId>>>()?;

            if let Some(instruction) = method.instruction_mut(branch.id) {
                instruction.operand = match instruction.operand {
                    Operand::Switch(_) => Operand::Switch(targets),
                    _ => match targets.first() {
                        Some(target) => Operand::Target(*target),
                        None => return Err(decode_error!("Branch without target")),
                    },
                };
            }
        }

        if header.flags.contains(MethodBodyFlags::MORE_SECTS) {
            let mut parser = Parser::new(data);
            parser.seek(code_end)?;
            for clause in decode_sections(&mut parser)? {
                let handler = resolve_clause(&clause, header.code_size, &by_offset)?;
                method.handlers.push(handler);
            }
        }

        Ok(method)
    }
}

/// Decode one instruction; branch operands are returned as raw displacements
fn decode_instruction(parser: &mut Parser) -> Result<(Instruction, Option<Vec<i32>>)> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let opcode = if first_byte == FE_PREFIX {
        let second_byte = parser
            .read_le::<u8>()
            .map_err(|_| decode_error!("Truncated two-byte opcode at IL_{:04x}", offset))?;
        OpCode::extended(second_byte)
    } else {
        OpCode::new(first_byte)
    };

    let Some(info) = opcode.info() else {
        return Err(decode_error!(
            "Invalid opcode {:?} at IL_{:04x}",
            opcode,
            offset
        ));
    };

    let read = |parser: &mut Parser| -> Result<(Operand, Option<Vec<i32>>)> {
        Ok(match info.operand {
            OperandType::None => (Operand::None, None),
            OperandType::Int8 => (Operand::Int8(parser.read_le::<i8>()?), None),
            OperandType::UInt8 => (Operand::UInt8(parser.read_le::<u8>()?), None),
            OperandType::UInt16 => (Operand::UInt16(parser.read_le::<u16>()?), None),
            OperandType::Int32 => (Operand::Int32(parser.read_le::<i32>()?), None),
            OperandType::Int64 => (Operand::Int64(parser.read_le::<i64>()?), None),
            OperandType::Float32 => (Operand::Float32(parser.read_le::<f32>()?), None),
            OperandType::Float64 => (Operand::Float64(parser.read_le::<f64>()?), None),
            OperandType::Token => (Operand::Token(parser.read_token()?), None),
            OperandType::ShortBranch => (
                Operand::Target(InstrId(0)),
                Some(vec![i32::from(parser.read_le::<i8>()?)]),
            ),
            OperandType::Branch => (
                Operand::Target(InstrId(0)),
                Some(vec![parser.read_le::<i32>()?]),
            ),
            OperandType::Switch => {
                let count = parser.read_le::<u32>()? as usize;
                if count.saturating_mul(4) > parser.remaining() {
                    return Err(crate::Error::OutOfBounds);
                }
                let mut displacements = Vec::with_capacity(count);
                for _ in 0..count {
                    displacements.push(parser.read_le::<i32>()?);
                }
                (Operand::Switch(Vec::new()), Some(displacements))
            }
        })
    };

    let (operand, displacements) = read(parser).map_err(|_| {
        decode_error!(
            "Operand of {} at IL_{:04x} runs past the end of the code",
            info.mnemonic,
            offset
        )
    })?;

    Ok((Instruction::new(opcode, operand), displacements))
}

fn resolve_clause(
    clause: &RawClause,
    code_size: u32,
    by_offset: &HashMap<u32, InstrId>,
) -> Result<ExceptionHandler> {
    let start = |offset: u32| -> Result<InstrId> {
        by_offset.get(&offset).copied().ok_or_else(|| {
            decode_error!(
                "Exception clause boundary {} is not an instruction boundary",
                offset
            )
        })
    };
    let end = |offset: u32, length: u32| -> Result<Option<InstrId>> {
        let Some(end) = offset.checked_add(length) else {
            return Err(decode_error!(
                "Exception clause region {}+{} overflows",
                offset,
                length
            ));
        };
        if end == code_size {
            Ok(None)
        } else {
            start(end).map(Some)
        }
    };

    let is_filter = clause.flags.contains(ExceptionHandlerFlags::FILTER);
    Ok(ExceptionHandler {
        flags: clause.flags,
        try_start: start(clause.try_offset)?,
        try_end: end(clause.try_offset, clause.try_length)?,
        handler_start: start(clause.handler_offset)?,
        handler_end: end(clause.handler_offset, clause.handler_length)?,
        filter_start: if is_filter {
            Some(start(clause.class_token_or_filter)?)
        } else {
            None
        },
        class_token: if is_filter {
            Token::NULL
        } else {
            Token(clause.class_token_or_filter)
        },
    })
}
