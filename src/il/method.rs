//! The mutable method model shared by the decoder, the coverage passes and the encoder.
//!
//! A [`Method`] is an arena of [`Instruction`]s plus the order in which they execute. Other
//! structures (branch operands, exception handlers, the coverage passes) hold [`InstrId`]s into
//! the arena, never positions or byte offsets, so splicing new instructions into the order keeps
//! every reference valid. [`Method::insert`] is the only way instructions enter the order after
//! construction, and it implements the retargeting rule that keeps probes on every path into
//! the instruction they precede.

use std::{collections::HashSet, fmt};

use crate::{
    il::{
        exceptions::ExceptionHandler,
        header::TINY_MAX_STACK,
        instruction::{InstrId, Instruction, Operand},
    },
    token::Token,
    Result,
};

/// Where [`Method::insert`] places new instructions relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Immediately before the anchor. Every branch and exception boundary that referenced the
    /// anchor now references the first inserted instruction.
    Before,
    /// Immediately after the anchor. No reference changes.
    After,
}

/// Pair of original and rewritten IL offsets of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OffsetMapping {
    /// Offset in the body handed over by the host
    pub original: u32,
    /// Offset in the rewritten body
    pub rewritten: u32,
}

/// A method body under rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    arena: Vec<Instruction>,
    order: Vec<InstrId>,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Locals signature, `None` for methods without locals
    pub local_var_sig: Option<Token>,
    /// Zero-initialize the locals on entry
    pub init_locals: bool,
    /// Exception-handling clauses, innermost first
    pub handlers: Vec<ExceptionHandler>,
}

impl Default for Method {
    fn default() -> Self {
        Method::new()
    }
}

impl Method {
    /// An empty method with the tiny-header stack depth
    #[must_use]
    pub fn new() -> Self {
        Method {
            arena: Vec::new(),
            order: Vec::new(),
            max_stack: TINY_MAX_STACK,
            local_var_sig: None,
            init_locals: false,
            handlers: Vec::new(),
        }
    }

    /// Build a replacement body from a hand-written instruction list.
    ///
    /// The stack depth is at least `min_stack`, and init-locals is set whenever a locals
    /// signature is given. Handlers can be added afterwards with ids from [`Method::id_at`].
    #[must_use]
    pub fn with_instructions(
        instructions: Vec<Instruction>,
        local_var_sig: Option<Token>,
        min_stack: u16,
    ) -> Self {
        let mut method = Method::new();
        for instruction in instructions {
            method.push(instruction);
        }
        method.max_stack = min_stack.max(TINY_MAX_STACK);
        method.local_var_sig = local_var_sig.and_then(Token::non_null);
        method.init_locals = method.local_var_sig.is_some();
        method
    }

    fn alloc(&mut self, instruction: Instruction) -> InstrId {
        // Bounded by the 32-bit code size of a method body
        #[allow(clippy::cast_possible_truncation)]
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instruction);
        id
    }

    /// Append an instruction at the end of the sequence
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.alloc(instruction);
        self.order.push(id);
        id
    }

    /// Number of instructions in the sequence
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the sequence is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Instruction ids in execution order
    #[must_use]
    pub fn ids(&self) -> &[InstrId] {
        &self.order
    }

    /// Iterate the sequence in order
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> {
        self.order.iter().map(|id| (*id, &self.arena[id.index()]))
    }

    /// Look up an instruction
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.arena.get(id.index())
    }

    /// Look up an instruction for modification
    pub fn instruction_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.arena.get_mut(id.index())
    }

    /// Position of an instruction in the sequence
    #[must_use]
    pub fn position(&self, id: InstrId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// First instruction of the sequence
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.order.first().copied()
    }

    /// Id of the instruction at a position
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<InstrId> {
        self.order.get(position).copied()
    }

    /// The instruction following `id` in the sequence
    #[must_use]
    pub fn next_of(&self, id: InstrId) -> Option<InstrId> {
        self.position(id).and_then(|position| self.id_at(position + 1))
    }

    /// First instruction of the sequence that was decoded at `offset`.
    ///
    /// Inserted instructions have no original offset, so this always finds the original
    /// instruction even after probes were placed in front of it.
    #[must_use]
    pub fn find_by_original_offset(&self, offset: u32) -> Option<InstrId> {
        self.iter()
            .find(|(_, instruction)| instruction.original_offset == Some(offset))
            .map(|(id, _)| id)
    }

    /// The instructions of the sequence starting at `id`
    pub fn sequence_from(&self, id: InstrId) -> impl Iterator<Item = &Instruction> {
        let start = self.position(id).unwrap_or(self.order.len());
        self.order[start..]
            .iter()
            .map(|id| &self.arena[id.index()])
    }

    /// Raise the declared stack depth, saturating at `u16::MAX`
    pub fn increase_max_stack(&mut self, depth: u16) {
        self.max_stack = self.max_stack.saturating_add(depth);
    }

    /// Splice `instructions` into the sequence next to `anchor`.
    ///
    /// With [`Placement::Before`], every branch operand and every exception-handler boundary
    /// that referenced `anchor` is moved to the first inserted instruction, so all paths that
    /// reached `anchor` now run the inserted code first. The inserted instructions themselves
    /// are never retargeted. Returns the ids of the inserted instructions in order.
    ///
    /// # Errors
    /// Returns [`crate::Error::Relocation`] if `anchor` is not part of the sequence.
    pub fn insert(
        &mut self,
        anchor: InstrId,
        instructions: Vec<Instruction>,
        placement: Placement,
    ) -> Result<Vec<InstrId>> {
        let Some(position) = self.position(anchor) else {
            return Err(relocation_error!(
                "Insertion anchor {} is not part of the method",
                anchor
            ));
        };

        let inserted: Vec<InstrId> = instructions
            .into_iter()
            .map(|instruction| self.alloc(instruction))
            .collect();
        let Some(&first) = inserted.first() else {
            return Ok(inserted);
        };

        let at = match placement {
            Placement::Before => position,
            Placement::After => position + 1,
        };
        self.order.splice(at..at, inserted.iter().copied());

        if placement == Placement::Before {
            for id in &self.order {
                // Freshly allocated ids are the highest in the arena
                if *id >= first {
                    continue;
                }
                for target in self.arena[id.index()].targets_mut() {
                    if *target == anchor {
                        *target = first;
                    }
                }
            }
            for handler in &mut self.handlers {
                handler.retarget(anchor, first);
            }
        }

        Ok(inserted)
    }

    /// Check that every branch target and exception boundary is part of the sequence and
    /// that every exception region is non-empty.
    ///
    /// # Errors
    /// Returns [`crate::Error::Relocation`] describing the first dangling reference found.
    pub fn validate(&self) -> Result<()> {
        let present: HashSet<InstrId> = self.order.iter().copied().collect();

        for (id, instruction) in self.iter() {
            for target in instruction.targets() {
                if !present.contains(target) {
                    return Err(relocation_error!(
                        "{} at {} targets {}, which is not part of the method",
                        instruction.mnemonic(),
                        id,
                        target
                    ));
                }
            }
        }

        let end = self.order.len();
        let position_of = |id: Option<InstrId>| -> Option<usize> {
            match id {
                Some(id) => self.position(id),
                None => Some(end),
            }
        };

        for (index, handler) in self.handlers.iter().enumerate() {
            for boundary in handler.boundaries() {
                if !present.contains(&boundary) {
                    return Err(relocation_error!(
                        "Exception clause {} references {}, which is not part of the method",
                        index,
                        boundary
                    ));
                }
            }

            let regions = [
                (Some(handler.try_start), handler.try_end),
                (Some(handler.handler_start), handler.handler_end),
            ];
            for (start, stop) in regions {
                match (position_of(start), position_of(stop)) {
                    (Some(start), Some(stop)) if start < stop => {}
                    _ => {
                        return Err(relocation_error!(
                            "Exception clause {} has an empty or inverted region",
                            index
                        ))
                    }
                }
            }

            if handler.is_filter() && handler.filter_start.is_none() {
                return Err(relocation_error!(
                    "Filter clause {} has no filter block",
                    index
                ));
            }
        }

        Ok(())
    }

    /// Original and rewritten offsets of every instruction that came from the decoded body.
    ///
    /// Only meaningful after [`crate::il::MethodEncoder::encode`] assigned the final offsets.
    #[must_use]
    pub fn offset_map(&self) -> Vec<OffsetMapping> {
        self.iter()
            .filter_map(|(_, instruction)| {
                instruction.original_offset.map(|original| OffsetMapping {
                    original,
                    rewritten: instruction.offset,
                })
            })
            .collect()
    }

    fn offset_of(&self, id: InstrId) -> u32 {
        self.arena.get(id.index()).map_or(0, |instruction| instruction.offset)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            ".maxstack {}{}",
            self.max_stack,
            match self.local_var_sig {
                Some(token) => format!(" .locals {token}{}", if self.init_locals { " init" } else { "" }),
                None => String::new(),
            }
        )?;

        for (_, instruction) in self.iter() {
            write!(f, "IL_{:04x}: {}", instruction.offset, instruction.mnemonic())?;
            match &instruction.operand {
                Operand::None => {}
                Operand::Int8(value) => write!(f, " {value}")?,
                Operand::UInt8(value) => write!(f, " {value}")?,
                Operand::UInt16(value) => write!(f, " {value}")?,
                Operand::Int32(value) => write!(f, " 0x{value:X}")?,
                Operand::Int64(value) => write!(f, " 0x{value:X}")?,
                Operand::Float32(value) => write!(f, " {value}")?,
                Operand::Float64(value) => write!(f, " {value}")?,
                Operand::Token(token) => write!(f, " {token}")?,
                Operand::Target(target) => write!(f, " IL_{:04x}", self.offset_of(*target))?,
                Operand::Switch(targets) => {
                    write!(f, " (")?;
                    for (index, target) in targets.iter().enumerate() {
                        if index > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "IL_{:04x}", self.offset_of(*target))?;
                    }
                    write!(f, ")")?;
                }
            }
            writeln!(f)?;
        }

        for handler in &self.handlers {
            writeln!(
                f,
                ".try IL_{:04x} to {} handler IL_{:04x} ({:?})",
                self.offset_of(handler.try_start),
                handler
                    .try_end
                    .map_or_else(|| "end".to_string(), |id| format!("IL_{:04x}", self.offset_of(id))),
                self.offset_of(handler.handler_start),
                handler.flags
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::{exceptions::ExceptionHandlerFlags, opcodes::*},
        Error,
    };

    fn original(opcode: u8, operand: Operand, offset: u32) -> Instruction {
        let mut instruction = Instruction::new(opcode, operand);
        instruction.original_offset = Some(offset);
        instruction.offset = offset;
        instruction
    }

    /// `brtrue.s L1; nop; L1: ret`
    fn branchy() -> (Method, InstrId, InstrId, InstrId) {
        let mut method = Method::new();
        let branch = method.push(original(BRTRUE_S, Operand::None, 0));
        let nop = method.push(original(NOP, Operand::None, 2));
        let ret = method.push(original(RET, Operand::None, 3));
        method.instruction_mut(branch).unwrap().operand = Operand::Target(ret);
        (method, branch, nop, ret)
    }

    #[test]
    fn insert_before_retargets_branches() {
        let (mut method, branch, _, ret) = branchy();
        let inserted = method
            .insert(ret, vec![Instruction::ldc_i4(1), Instruction::simple(POP)], Placement::Before)
            .unwrap();

        assert_eq!(method.len(), 5);
        assert_eq!(method.instruction(branch).unwrap().targets(), &[inserted[0]]);
        assert_eq!(method.position(inserted[0]), Some(2));
        assert_eq!(method.next_of(inserted[1]), Some(ret));
    }

    #[test]
    fn insert_twice_before_same_anchor_keeps_first_probe() {
        let (mut method, branch, _, ret) = branchy();
        let first = method
            .insert(ret, vec![Instruction::ldc_i4(1), Instruction::simple(POP)], Placement::Before)
            .unwrap();
        let second = method
            .insert(ret, vec![Instruction::ldc_i4(2), Instruction::simple(POP)], Placement::Before)
            .unwrap();

        assert_eq!(method.instruction(branch).unwrap().targets(), &[first[0]]);
        assert_eq!(method.next_of(first[1]), Some(second[0]));
        assert_eq!(method.next_of(second[1]), Some(ret));
    }

    #[test]
    fn insert_after_leaves_references() {
        let (mut method, branch, nop, ret) = branchy();
        let inserted = method
            .insert(branch, vec![Instruction::simple(NOP)], Placement::After)
            .unwrap();

        assert_eq!(method.position(inserted[0]), Some(1));
        assert_eq!(method.next_of(inserted[0]), Some(nop));
        assert_eq!(method.instruction(branch).unwrap().targets(), &[ret]);
    }

    #[test]
    fn insert_before_retargets_handlers() {
        let mut method = Method::new();
        let body = method.push(original(NOP, Operand::None, 0));
        let leave = method.push(original(LEAVE_S, Operand::None, 1));
        let handler = method.push(original(POP, Operand::None, 3));
        let handler_leave = method.push(original(LEAVE_S, Operand::None, 4));
        let ret = method.push(original(RET, Operand::None, 6));
        method.instruction_mut(leave).unwrap().operand = Operand::Target(ret);
        method.instruction_mut(handler_leave).unwrap().operand = Operand::Target(ret);
        method.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: body,
            try_end: Some(handler),
            handler_start: handler,
            handler_end: Some(ret),
            filter_start: None,
            class_token: Token(0x0100_0001),
        });

        let probe = method
            .insert(handler, vec![Instruction::ldc_i4(9), Instruction::simple(POP)], Placement::Before)
            .unwrap();

        let clause = &method.handlers[0];
        assert_eq!(clause.try_end, Some(probe[0]));
        assert_eq!(clause.handler_start, probe[0]);
        assert_eq!(clause.handler_end, Some(ret));
        method.validate().unwrap();
    }

    #[test]
    fn insert_unknown_anchor() {
        let (mut method, ..) = branchy();
        let result = method.insert(InstrId(42), vec![Instruction::simple(NOP)], Placement::Before);
        assert!(matches!(result, Err(Error::Relocation { .. })));
    }

    #[test]
    fn insert_nothing() {
        let (mut method, _, nop, _) = branchy();
        assert!(method.insert(nop, Vec::new(), Placement::Before).unwrap().is_empty());
        assert_eq!(method.len(), 3);
    }

    #[test]
    fn validate_dangling_target() {
        let mut method = Method::new();
        let branch = method.push(Instruction::branch(BR, InstrId(7)));
        method.push(Instruction::simple(RET));
        let error = method.validate().unwrap_err();
        assert!(matches!(error, Error::Relocation { .. }));
        assert!(method.instruction(branch).is_some());
    }

    #[test]
    fn validate_empty_region() {
        let mut method = Method::new();
        let a = method.push(Instruction::simple(NOP));
        let b = method.push(Instruction::simple(RET));
        method.handlers.push(ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: b,
            try_end: Some(a),
            handler_start: b,
            handler_end: None,
            filter_start: None,
            class_token: Token::NULL,
        });
        assert!(method.validate().is_err());
    }

    #[test]
    fn with_instructions_sets_init_locals() {
        let method = Method::with_instructions(
            vec![Instruction::simple(RET)],
            Some(Token(0x1100_0001)),
            2,
        );
        assert!(method.init_locals);
        assert_eq!(method.max_stack, 8);

        let method = Method::with_instructions(vec![Instruction::simple(RET)], Some(Token::NULL), 0x20);
        assert!(!method.init_locals);
        assert_eq!(method.local_var_sig, None);
        assert_eq!(method.max_stack, 0x20);
    }

    #[test]
    fn find_by_original_offset_skips_inserted() {
        let (mut method, _, nop, _) = branchy();
        method
            .insert(nop, vec![Instruction::ldc_i4(1), Instruction::simple(POP)], Placement::Before)
            .unwrap();
        assert_eq!(method.find_by_original_offset(2), Some(nop));
        assert_eq!(method.find_by_original_offset(1), None);
    }

    #[test]
    fn offset_map_only_covers_original_instructions() {
        let (mut method, _, nop, _) = branchy();
        method.insert(nop, vec![Instruction::simple(NOP)], Placement::Before).unwrap();
        let map = method.offset_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map[1].original, 2);
    }

    #[test]
    fn listing() {
        let (method, ..) = branchy();
        let listing = method.to_string();
        assert!(listing.contains("IL_0000: brtrue.s IL_0003"));
        assert!(listing.contains("IL_0003: ret"));
    }
}
