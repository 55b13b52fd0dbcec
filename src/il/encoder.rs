//! Method body encoding.
//!
//! [`MethodEncoder`] serializes a [`Method`] back into the binary body format: header, code,
//! padding and a single exception-handling section. Branches are laid out with the smallest
//! displacement form that reaches their target. Because widening one branch moves everything
//! after it, layout runs to a fixpoint: every branch starts short, any branch whose
//! displacement does not fit a signed byte is widened, and offsets are recomputed until nothing
//! changes. Branches only ever grow, so the loop terminates.
//!
//! # Example
//!
//! ```rust
//! use cilcover::il::{opcodes, Instruction, Method, MethodEncoder};
//!
//! let mut method = Method::new();
//! method.push(Instruction::simple(opcodes::NOP));
//! method.push(Instruction::simple(opcodes::RET));
//!
//! let bytes = MethodEncoder::new().encode(&mut method)?;
//! assert_eq!(bytes, vec![0x0A, 0x00, 0x2A]);
//! # Ok::<(), cilcover::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    il::{
        exceptions::{encode_section, ClauseFormat, RawClause},
        header::MethodHeader,
        instruction::{InstrId, Instruction, OpCode, Operand},
        method::Method,
    },
    io::write_le_at,
    Error, Result,
};

const EH_SECTION_ALIGNMENT: usize = 4;

/// Final placement of every instruction of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    opcodes: Vec<OpCode>,
    offsets: Vec<u32>,
    positions: HashMap<InstrId, usize>,
    code_size: u32,
}

impl Layout {
    /// Size of the code in bytes
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.code_size
    }

    /// Offset assigned to an instruction
    #[must_use]
    pub fn offset_of(&self, id: InstrId) -> Option<u32> {
        self.positions.get(&id).map(|position| self.offsets[*position])
    }

    fn end_offset(&self, id: Option<InstrId>) -> Option<u32> {
        match id {
            Some(id) => self.offset_of(id),
            None => Some(self.code_size),
        }
    }
}

/// Serializes methods into binary bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodEncoder {
    compact_clauses: bool,
}

impl MethodEncoder {
    /// Encoder that writes fat exception clauses
    #[must_use]
    pub fn new() -> Self {
        MethodEncoder::default()
    }

    /// Allow the 12-byte clause format when every clause fits it
    #[must_use]
    pub fn compact_clauses(mut self, compact: bool) -> Self {
        self.compact_clauses = compact;
        self
    }

    /// Compute offsets and branch forms without touching the method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Relocation`] if a reference is dangling, or
    /// [`crate::Error::Encode`] if the code exceeds the 32-bit signed displacement range.
    pub fn layout(&self, method: &Method) -> Result<Layout> {
        method.validate()?;

        let ids = method.ids();
        let positions: HashMap<InstrId, usize> = ids
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect();

        let instructions: Vec<&Instruction> = method.iter().map(|(_, i)| i).collect();
        let mut opcodes: Vec<OpCode> = instructions
            .iter()
            .map(|instruction| match instruction.operand {
                Operand::Target(_) => instruction.opcode.short_form(),
                _ => instruction.opcode,
            })
            .collect();

        loop {
            let mut offsets = Vec::with_capacity(instructions.len());
            let mut offset: u64 = 0;
            for (instruction, opcode) in instructions.iter().zip(&opcodes) {
                offsets.push(offset);
                offset += encoded_size(instruction, *opcode) as u64;
            }
            if offset > i32::MAX as u64 {
                return Err(Error::Encode(format!(
                    "Code size {offset} exceeds the branch displacement range"
                )));
            }

            let mut widened = false;
            for (position, instruction) in instructions.iter().enumerate() {
                let Operand::Target(target) = instruction.operand else {
                    continue;
                };
                if !opcodes[position].is_short_branch() {
                    continue;
                }
                let next = offsets[position] + encoded_size(instruction, opcodes[position]) as u64;
                let target = offsets[positions[&target]];
                #[allow(clippy::cast_possible_wrap)]
                let displacement = target as i64 - next as i64;
                if i8::try_from(displacement).is_err() {
                    opcodes[position] = opcodes[position].long_form();
                    widened = true;
                }
            }

            if !widened {
                // Checked against i32::MAX above
                #[allow(clippy::cast_possible_truncation)]
                let offsets = offsets.into_iter().map(|offset| offset as u32).collect();
                #[allow(clippy::cast_possible_truncation)]
                let code_size = offset as u32;
                return Ok(Layout {
                    opcodes,
                    offsets,
                    positions,
                    code_size,
                });
            }
        }
    }

    /// Number of bytes [`MethodEncoder::encode`] would produce
    ///
    /// # Errors
    /// Same as [`MethodEncoder::layout`].
    pub fn method_size(&self, method: &Method) -> Result<usize> {
        let layout = self.layout(method)?;
        let clauses = raw_clauses(method, &layout)?;
        Ok(self.body_size(method, &layout, &clauses))
    }

    /// Encode into a new buffer; see [`MethodEncoder::encode_into`]
    ///
    /// # Errors
    /// Same as [`MethodEncoder::encode_into`].
    pub fn encode(&self, method: &mut Method) -> Result<Vec<u8>> {
        let size = self.method_size(method)?;
        let mut data = vec![0u8; size];
        let written = self.encode_into(method, &mut data)?;
        data.truncate(written);
        Ok(data)
    }

    /// Encode the method into `data` and return the number of bytes written.
    ///
    /// The final branch forms and offsets are written back into the method, so
    /// [`Method::offset_map`] reflects the emitted body afterwards. Padding before the
    /// exception section is zeroed.
    ///
    /// # Errors
    /// Returns [`crate::Error::Relocation`] for dangling references, or
    /// [`crate::Error::Encode`] if the body does not fit `data` or the binary format.
    pub fn encode_into(&self, method: &mut Method, data: &mut [u8]) -> Result<usize> {
        let layout = self.layout(method)?;
        let clauses = raw_clauses(method, &layout)?;
        let size = self.body_size(method, &layout, &clauses);
        if data.len() < size {
            return Err(Error::Encode(format!(
                "Body of {} bytes does not fit the {} byte buffer",
                size,
                data.len()
            )));
        }

        let header = MethodHeader::for_body(
            method.max_stack,
            layout.code_size,
            method.local_var_sig,
            method.init_locals,
            !clauses.is_empty(),
        );

        let mut offset = 0;
        header.write(data, &mut offset)?;
        let code_start = offset;

        for (position, id) in method.ids().iter().enumerate() {
            let Some(instruction) = method.instruction(*id) else {
                return Err(relocation_error!("Instruction {} vanished during encoding", id));
            };
            let opcode = layout.opcodes[position];
            let next = layout.offsets[position] + encoded_size(instruction, opcode) as u32;
            write_instruction(instruction, opcode, next, &layout, data, &mut offset)?;
        }
        debug_assert_eq!(offset - code_start, layout.code_size as usize);

        if !clauses.is_empty() {
            while offset % EH_SECTION_ALIGNMENT != 0 {
                write_le_at(data, &mut offset, 0u8)?;
            }
            let format = ClauseFormat::select(&clauses, self.compact_clauses);
            encode_section(&clauses, format, data, &mut offset)?;
        }

        let ids = method.ids().to_vec();
        for (position, id) in ids.iter().enumerate() {
            if let Some(instruction) = method.instruction_mut(*id) {
                instruction.opcode = layout.opcodes[position];
                instruction.offset = layout.offsets[position];
            }
        }

        Ok(offset)
    }

    fn body_size(&self, method: &Method, layout: &Layout, clauses: &[RawClause]) -> usize {
        let header = MethodHeader::for_body(
            method.max_stack,
            layout.code_size,
            method.local_var_sig,
            method.init_locals,
            !clauses.is_empty(),
        );
        let code_end = header.header_size + layout.code_size as usize;
        if clauses.is_empty() {
            return code_end;
        }

        let format = ClauseFormat::select(clauses, self.compact_clauses);
        code_end.next_multiple_of(EH_SECTION_ALIGNMENT) + format.data_size(clauses.len())
    }
}

fn encoded_size(instruction: &Instruction, opcode: OpCode) -> usize {
    match instruction.operand {
        Operand::Target(_) if opcode.is_short_branch() => opcode.encoded_len() + 1,
        Operand::Target(_) => opcode.encoded_len() + 4,
        _ => instruction.size(),
    }
}

fn write_instruction(
    instruction: &Instruction,
    opcode: OpCode,
    next: u32,
    layout: &Layout,
    data: &mut [u8],
    offset: &mut usize,
) -> Result<()> {
    if opcode.prefix() != 0 {
        write_le_at(data, offset, opcode.prefix())?;
    }
    write_le_at(data, offset, opcode.code())?;

    let displacement = |target: InstrId| -> Result<i64> {
        layout
            .offset_of(target)
            .map(|target| i64::from(target) - i64::from(next))
            .ok_or_else(|| relocation_error!("Branch target {} is not laid out", target))
    };

    match &instruction.operand {
        Operand::None => Ok(()),
        Operand::Int8(value) => write_le_at(data, offset, *value),
        Operand::UInt8(value) => write_le_at(data, offset, *value),
        Operand::UInt16(value) => write_le_at(data, offset, *value),
        Operand::Int32(value) => write_le_at(data, offset, *value),
        Operand::Int64(value) => write_le_at(data, offset, *value),
        Operand::Float32(value) => write_le_at(data, offset, *value),
        Operand::Float64(value) => write_le_at(data, offset, *value),
        Operand::Token(token) => write_le_at(data, offset, token.value()),
        Operand::Target(target) => {
            let displacement = displacement(*target)?;
            if opcode.is_short_branch() {
                let value = i8::try_from(displacement)
                    .map_err(|_| Error::Encode(format!("Short branch displacement {displacement}")))?;
                write_le_at(data, offset, value)
            } else {
                let value = i32::try_from(displacement)
                    .map_err(|_| Error::Encode(format!("Branch displacement {displacement}")))?;
                write_le_at(data, offset, value)
            }
        }
        Operand::Switch(targets) => {
            let count = u32::try_from(targets.len())
                .map_err(|_| Error::Encode("Too many switch targets".to_string()))?;
            write_le_at(data, offset, count)?;
            for target in targets {
                let displacement = displacement(*target)?;
                let value = i32::try_from(displacement)
                    .map_err(|_| Error::Encode(format!("Switch displacement {displacement}")))?;
                write_le_at(data, offset, value)?;
            }
            Ok(())
        }
    }
}

fn raw_clauses(method: &Method, layout: &Layout) -> Result<Vec<RawClause>> {
    method
        .handlers
        .iter()
        .map(|handler| {
            let region = |start: InstrId, end: Option<InstrId>| -> Result<(u32, u32)> {
                match (layout.offset_of(start), layout.end_offset(end)) {
                    (Some(start), Some(end)) if end > start => Ok((start, end - start)),
                    _ => Err(relocation_error!(
                        "Exception region starting at {} has no valid extent",
                        start
                    )),
                }
            };

            let (try_offset, try_length) = region(handler.try_start, handler.try_end)?;
            let (handler_offset, handler_length) =
                region(handler.handler_start, handler.handler_end)?;
            let class_token_or_filter = match handler.filter_start {
                Some(filter) if handler.is_filter() => layout
                    .offset_of(filter)
                    .ok_or_else(|| relocation_error!("Filter block {} is not laid out", filter))?,
                _ => handler.class_token.value(),
            };

            Ok(RawClause {
                flags: handler.flags,
                try_offset,
                try_length,
                handler_offset,
                handler_length,
                class_token_or_filter,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::{
            decoder::MethodDecoder,
            exceptions::{ExceptionHandler, ExceptionHandlerFlags},
            method::Placement,
            opcodes::*,
        },
        token::Token,
    };

    #[test]
    fn fat_body_with_clause_bytes() {
        let mut method = Method::with_instructions(
            vec![
                Instruction::simple(NOP),
                Instruction::simple(NOP),
                Instruction::simple(NOP),
                Instruction::simple(NOP),
                Instruction::simple(RET),
            ],
            Some(Token(0x0102_0304)),
            0x20,
        );
        method.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: method.id_at(0).unwrap(),
            try_end: method.id_at(1),
            handler_start: method.id_at(1).unwrap(),
            handler_end: method.id_at(2),
            filter_start: None,
            class_token: Token(0x0100_001E),
        });

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x1B, 0x30, 0x20, 0x00, 0x05, 0x00, 0x00, 0x00, 0x04, 0x03, 0x02, 0x01, // header
                0x00, 0x00, 0x00, 0x00, 0x2A, // code
                0x00, 0x00, 0x00, // padding
                0x41, 0x1C, 0x00, 0x00, // fat EH section
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00,
                0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x1E, 0x00, 0x00, 0x01,
            ]
        );
        assert_eq!(MethodEncoder::new().method_size(&method).unwrap(), bytes.len());
    }

    #[test]
    fn compact_clauses() {
        let mut method = Method::new();
        let a = method.push(Instruction::simple(NOP));
        let b = method.push(Instruction::simple(ENDFINALLY));
        method.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: a,
            try_end: Some(b),
            handler_start: b,
            handler_end: None,
            filter_start: None,
            class_token: Token::NULL,
        });

        let bytes = MethodEncoder::new().compact_clauses(true).encode(&mut method).unwrap();
        // fat header (sections force it), 2 bytes code, 2 padding, small section
        assert_eq!(bytes.len(), 12 + 2 + 2 + 16);
        assert_eq!(bytes[16], 0x01);
        assert_eq!(bytes[17], 0x10);
    }

    #[test]
    fn short_branch_stays_short() {
        // brtrue.s over 127 bytes of nops
        let mut method = Method::new();
        let branch = method.push(Instruction::simple(NOP));
        for _ in 0..127 {
            method.push(Instruction::simple(NOP));
        }
        let ret = method.push(Instruction::simple(RET));
        method.instruction_mut(branch).unwrap().opcode = OpCode::new(BR);
        method.instruction_mut(branch).unwrap().operand = Operand::Target(ret);

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        assert_eq!(method.instruction(branch).unwrap().opcode, OpCode::new(BR_S));
        assert_eq!(&bytes[12..14], &[BR_S, 127]);
        assert_eq!(method.instruction(ret).unwrap().offset, 129);
    }

    #[test]
    fn far_branch_is_widened() {
        let mut method = Method::new();
        let branch = method.push(Instruction::simple(NOP));
        for _ in 0..128 {
            method.push(Instruction::simple(NOP));
        }
        let ret = method.push(Instruction::simple(RET));
        method.instruction_mut(branch).unwrap().opcode = OpCode::new(BRFALSE_S);
        method.instruction_mut(branch).unwrap().operand = Operand::Target(ret);

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        assert_eq!(method.instruction(branch).unwrap().opcode, OpCode::new(BRFALSE));
        // fat header: code size 5 + 128 + 1 exceeds tiny
        assert_eq!(&bytes[12..17], &[BRFALSE, 128, 0, 0, 0]);
    }

    #[test]
    fn backward_branch_widening_cascades() {
        // A forward branch at the start and a backward branch at the end both straddle the
        // middle; widening one pushes the other out of range.
        let mut method = Method::new();
        let head = method.push(Instruction::simple(NOP));
        let forward = method.push(Instruction::simple(NOP));
        for _ in 0..125 {
            method.push(Instruction::simple(NOP));
        }
        let backward = method.push(Instruction::simple(NOP));
        let tail = method.push(Instruction::simple(RET));
        method.instruction_mut(forward).unwrap().opcode = OpCode::new(BR_S);
        method.instruction_mut(forward).unwrap().operand = Operand::Target(tail);
        method.instruction_mut(backward).unwrap().opcode = OpCode::new(BR_S);
        method.instruction_mut(backward).unwrap().operand = Operand::Target(head);

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        let decoded = MethodDecoder::decode(&bytes).unwrap();
        assert_eq!(decoded.len(), method.len());

        let forward = method.instruction(forward).unwrap();
        let backward = method.instruction(backward).unwrap();
        assert!(!forward.opcode.is_short_branch());
        assert!(!backward.opcode.is_short_branch());

        // Re-encoding the decoded body is stable
        let mut decoded = decoded;
        let again = MethodEncoder::new().encode(&mut decoded).unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn switch_displacements_from_instruction_end() {
        let mut method = Method::new();
        let switch = method.push(Instruction::simple(NOP));
        let nop = method.push(Instruction::simple(NOP));
        let ret = method.push(Instruction::simple(RET));
        method.instruction_mut(switch).unwrap().opcode = OpCode::new(SWITCH);
        method.instruction_mut(switch).unwrap().operand = Operand::Switch(vec![ret, nop]);

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        assert_eq!(
            &bytes[1..14],
            &[SWITCH, 2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn insertion_shifts_clause() {
        let data = [
            0x1B, 0x30, 0x08, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // header
            NOP, NOP, ENDFINALLY, 0x00, // code
            0x01, 0x10, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x02, 0x00, 0x00,
            0x00, 0x00,
        ];
        let mut method = MethodDecoder::decode(&data).unwrap();
        let handler_start = method.handlers[0].handler_start;
        method
            .insert(
                handler_start,
                vec![Instruction::ldc_i4(3), Instruction::simple(POP)],
                Placement::Before,
            )
            .unwrap();

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        let again = MethodDecoder::decode(&bytes).unwrap();
        let handler = &again.handlers[0];
        let first = again.instruction(handler.handler_start).unwrap();
        assert_eq!(first.opcode, OpCode::new(LDC_I4));
        assert_eq!(first.offset, 1);
        assert_eq!(handler.handler_end, None);
        assert_eq!(again.instruction(handler.try_end.unwrap()).unwrap().offset, 1);
    }

    #[test]
    fn filter_offset_is_emitted() {
        let mut method = Method::new();
        let try_block = method.push(Instruction::simple(NOP));
        let filter = method.push(Instruction::simple(POP));
        method.push(Instruction::new(OpCode::extended(FE_ENDFILTER), Operand::None));
        let handler = method.push(Instruction::simple(POP));
        let ret = method.push(Instruction::simple(RET));
        method.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_start: try_block,
            try_end: Some(filter),
            handler_start: handler,
            handler_end: Some(ret),
            filter_start: Some(filter),
            class_token: Token::NULL,
        });

        let bytes = MethodEncoder::new().encode(&mut method).unwrap();
        let decoded = MethodDecoder::decode(&bytes).unwrap();
        let clause = &decoded.handlers[0];
        assert!(clause.is_filter());
        assert_eq!(decoded.instruction(clause.filter_start.unwrap()).unwrap().offset, 1);
        assert!(clause.class_token.is_null());
    }

    #[test]
    fn dangling_reference_fails() {
        let mut method = Method::new();
        method.push(Instruction::branch(BR, InstrId(99)));
        assert!(matches!(
            MethodEncoder::new().encode(&mut method),
            Err(Error::Relocation { .. })
        ));
    }

    #[test]
    fn buffer_too_small() {
        let mut method = Method::new();
        method.push(Instruction::simple(RET));
        let mut data = [0u8; 1];
        assert!(matches!(
            MethodEncoder::new().encode_into(&mut method, &mut data),
            Err(Error::Encode(_))
        ));
    }
}
