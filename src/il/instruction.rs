//! CIL instruction representation for in-place rewriting.
//!
//! Unlike a disassembler, which describes instructions by their address, the rewriting engine
//! has to keep branch targets valid while instructions are inserted in front of them. Branch
//! operands therefore hold an [`InstrId`], a stable handle into the owning
//! [`crate::il::Method`]'s instruction arena, and byte offsets are only assigned by the encoder.
//!
//! # Key Components
//!
//! - [`Instruction`] - One opcode plus operand, with its original and encoded offsets
//! - [`OpCode`] - Single or `0xFE`-prefixed opcode value
//! - [`Operand`] - Typed operand, including by-reference branch targets
//! - [`OperandType`] - Operand encoding as described by the opcode table
//! - [`FlowType`] - Control-flow classification used by the coverage passes
//!
//! # Examples
//!
//! ```rust
//! use cilcover::il::{opcodes, Instruction, Operand, FlowType};
//!
//! let load = Instruction::ldc_i4(42);
//! assert_eq!(load.mnemonic(), "ldc.i4");
//! assert_eq!(load.size(), 5);
//!
//! let ret = Instruction::simple(opcodes::RET);
//! assert_eq!(ret.flow(), FlowType::Return);
//! assert!(matches!(ret.operand, Operand::None));
//! ```

use std::fmt;

use crate::{
    il::opcodes::{self, OpCodeInfo, FE_PREFIX},
    token::Token,
};

/// Stable handle of an instruction inside a [`crate::il::Method`].
///
/// Ids are never reused while the method is alive, so a branch that holds an id keeps pointing
/// at the same instruction no matter how many instructions are inserted around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub(crate) u32);

impl InstrId {
    /// Index of the instruction inside the method arena
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Types of operands for CIL instructions.
///
/// Each variant corresponds to a specific encoding used in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// 8-bit signed integer (`ldc.i4.s`)
    Int8,
    /// 8-bit unsigned integer (short argument/local index, `unaligned.`, `no.`)
    UInt8,
    /// 16-bit unsigned integer (long argument/local index)
    UInt16,
    /// 32-bit signed integer (`ldc.i4`)
    Int32,
    /// 64-bit signed integer (`ldc.i8`)
    Int64,
    /// 32-bit float (`ldc.r4`)
    Float32,
    /// 64-bit float (`ldc.r8`)
    Float64,
    /// 32-bit metadata token
    Token,
    /// 8-bit signed branch displacement
    ShortBranch,
    /// 32-bit signed branch displacement
    Branch,
    /// Count followed by that many 32-bit displacements
    Switch,
}

/// Control flow behavior of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Either jumps to its target or falls through
    ConditionalBranch,
    /// Always jumps to its target
    UnconditionalBranch,
    /// Calls a method and continues with the next instruction
    Call,
    /// Leaves the method (`ret`, `jmp`)
    Return,
    /// Jumps to one of several targets or falls through
    Switch,
    /// Raises an exception (`throw`, `rethrow`)
    Throw,
    /// Ends a finally or fault handler
    EndFinally,
    /// Ends a filter block
    EndFilter,
    /// Leaves a protected region to its target
    Leave,
    /// Prefix that modifies the following instruction
    Meta,
}

impl FlowType {
    /// True if control never falls through to the next instruction
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::EndFilter
                | FlowType::Leave
        )
    }
}

/// An opcode, either single-byte or `0xFE`-prefixed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode {
    prefix: u8,
    code: u8,
}

const SHORT_TO_LONG: u8 = opcodes::BR - opcodes::BR_S;

impl OpCode {
    /// A single-byte opcode
    #[must_use]
    pub const fn new(code: u8) -> Self {
        OpCode { prefix: 0, code }
    }

    /// A two-byte opcode (`0xFE` followed by `code`)
    #[must_use]
    pub const fn extended(code: u8) -> Self {
        OpCode {
            prefix: FE_PREFIX,
            code,
        }
    }

    /// The prefix byte, `0` for single-byte opcodes
    #[must_use]
    pub fn prefix(self) -> u8 {
        self.prefix
    }

    /// The opcode byte (second byte for two-byte opcodes)
    #[must_use]
    pub fn code(self) -> u8 {
        self.code
    }

    /// The static descriptor, if the opcode is assigned
    #[must_use]
    pub fn info(self) -> Option<&'static OpCodeInfo> {
        opcodes::lookup(self.prefix, self.code)
    }

    /// Number of bytes the opcode itself occupies
    #[must_use]
    pub fn encoded_len(self) -> usize {
        if self.prefix == 0 {
            1
        } else {
            2
        }
    }

    /// True if this is one of the 8-bit displacement branches
    #[must_use]
    pub fn is_short_branch(self) -> bool {
        self.prefix == 0
            && (matches!(self.code, opcodes::BR_S..=opcodes::BLT_UN_S)
                || self.code == opcodes::LEAVE_S)
    }

    /// True if this is one of the 32-bit displacement branches (`switch` excluded)
    #[must_use]
    pub fn is_long_branch(self) -> bool {
        self.prefix == 0
            && (matches!(self.code, opcodes::BR..=opcodes::BLT_UN) || self.code == opcodes::LEAVE)
    }

    /// The 8-bit displacement form of a branch; other opcodes are returned unchanged
    #[must_use]
    pub fn short_form(self) -> Self {
        if !self.is_long_branch() {
            return self;
        }
        if self.code == opcodes::LEAVE {
            OpCode::new(opcodes::LEAVE_S)
        } else {
            OpCode::new(self.code - SHORT_TO_LONG)
        }
    }

    /// The 32-bit displacement form of a branch; other opcodes are returned unchanged
    #[must_use]
    pub fn long_form(self) -> Self {
        if !self.is_short_branch() {
            return self;
        }
        if self.code == opcodes::LEAVE_S {
            OpCode::new(opcodes::LEAVE)
        } else {
            OpCode::new(self.code + SHORT_TO_LONG)
        }
    }
}

impl From<u8> for OpCode {
    fn from(code: u8) -> Self {
        OpCode::new(code)
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix != 0 {
            write!(f, "{:02X}:", self.prefix)?;
        }
        write!(f, "{:02X}", self.code)
    }
}

/// Operand of an instruction.
///
/// Branch operands reference instructions, never byte offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 8-bit signed immediate
    Int8(i8),
    /// 8-bit unsigned immediate or index
    UInt8(u8),
    /// 16-bit unsigned index
    UInt16(u16),
    /// 32-bit signed immediate
    Int32(i32),
    /// 64-bit signed immediate
    Int64(i64),
    /// 32-bit float immediate
    Float32(f32),
    /// 64-bit float immediate
    Float64(f64),
    /// Metadata token
    Token(Token),
    /// Single branch target
    Target(InstrId),
    /// Jump table of a `switch`
    Switch(Vec<InstrId>),
}

/// A single CIL instruction owned by a [`crate::il::Method`].
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode; for branches the encoder picks the final short or long form
    pub opcode: OpCode,
    /// The operand
    pub operand: Operand,
    /// Offset in the body this instruction was decoded from, `None` for inserted instructions
    pub original_offset: Option<u32>,
    /// Offset assigned by the last encode
    pub offset: u32,
}

impl Instruction {
    /// Create an instruction that was not part of the original body
    pub fn new(opcode: impl Into<OpCode>, operand: Operand) -> Self {
        Instruction {
            opcode: opcode.into(),
            operand,
            original_offset: None,
            offset: 0,
        }
    }

    /// An instruction without operand
    pub fn simple(opcode: impl Into<OpCode>) -> Self {
        Instruction::new(opcode, Operand::None)
    }

    /// A single-target branch; the encoder chooses the displacement width
    pub fn branch(opcode: impl Into<OpCode>, target: InstrId) -> Self {
        Instruction::new(opcode, Operand::Target(target))
    }

    /// An instruction carrying a metadata token
    pub fn with_token(opcode: impl Into<OpCode>, token: Token) -> Self {
        Instruction::new(opcode, Operand::Token(token))
    }

    /// `ldc.i4 value`, always in the 5-byte form
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Instruction::new(opcodes::LDC_I4, Operand::Int32(value))
    }

    /// `ldc.i8 value`
    #[must_use]
    pub fn ldc_i8(value: i64) -> Self {
        Instruction::new(opcodes::LDC_I8, Operand::Int64(value))
    }

    /// The lower-case mnemonic, `"???"` for an unassigned opcode
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.info().map_or("???", |info| info.mnemonic)
    }

    /// Control flow of the instruction
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.opcode.info().map_or(FlowType::Sequential, |info| info.flow)
    }

    /// True if the operand references other instructions
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self.operand, Operand::Target(_) | Operand::Switch(_))
    }

    /// All instructions this one may jump to, in operand order
    #[must_use]
    pub fn targets(&self) -> &[InstrId] {
        match &self.operand {
            Operand::Target(target) => std::slice::from_ref(target),
            Operand::Switch(targets) => targets,
            _ => &[],
        }
    }

    /// Mutable view of the branch targets, in operand order
    pub fn targets_mut(&mut self) -> &mut [InstrId] {
        match &mut self.operand {
            Operand::Target(target) => std::slice::from_mut(target),
            Operand::Switch(targets) => targets,
            _ => &mut [],
        }
    }

    /// Encoded size of the instruction with its current opcode
    #[must_use]
    pub fn size(&self) -> usize {
        let operand = match &self.operand {
            Operand::None => 0,
            Operand::Int8(_) | Operand::UInt8(_) => 1,
            Operand::UInt16(_) => 2,
            Operand::Int32(_) | Operand::Float32(_) | Operand::Token(_) => 4,
            Operand::Int64(_) | Operand::Float64(_) => 8,
            Operand::Target(_) => {
                if self.opcode.is_short_branch() {
                    1
                } else {
                    4
                }
            }
            Operand::Switch(targets) => 4 + 4 * targets.len(),
        };
        self.opcode.encoded_len() + operand
    }

    /// True if opcode and operand match, ignoring offsets
    #[must_use]
    pub fn same_as(&self, other: &Instruction) -> bool {
        self.opcode == other.opcode && self.operand == other.operand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::opcodes::*;

    #[test]
    fn branch_forms() {
        let short = OpCode::new(BRTRUE_S);
        assert!(short.is_short_branch());
        assert_eq!(short.long_form(), OpCode::new(BRTRUE));
        assert_eq!(OpCode::new(BRTRUE).short_form(), short);

        assert_eq!(OpCode::new(LEAVE_S).long_form(), OpCode::new(LEAVE));
        assert_eq!(OpCode::new(LEAVE).short_form(), OpCode::new(LEAVE_S));

        assert_eq!(OpCode::new(SWITCH).short_form(), OpCode::new(SWITCH));
        assert_eq!(OpCode::new(NOP).long_form(), OpCode::new(NOP));
        assert!(!OpCode::extended(FE_CEQ).is_long_branch());
    }

    #[test]
    fn sizes() {
        assert_eq!(Instruction::simple(RET).size(), 1);
        assert_eq!(Instruction::ldc_i4(1).size(), 5);
        assert_eq!(Instruction::ldc_i8(1).size(), 9);
        assert_eq!(Instruction::with_token(CALL, Token(0x0A00_0001)).size(), 5);
        assert_eq!(Instruction::branch(BR_S, InstrId(0)).size(), 2);
        assert_eq!(Instruction::branch(BR, InstrId(0)).size(), 5);
        assert_eq!(
            Instruction::new(FE_LDLOC_OPCODE, Operand::UInt16(3)).size(),
            4
        );
        assert_eq!(
            Instruction::new(SWITCH, Operand::Switch(vec![InstrId(0), InstrId(1)])).size(),
            13
        );
    }

    const FE_LDLOC_OPCODE: OpCode = OpCode::extended(FE_LDLOC);

    #[test]
    fn targets() {
        let mut br = Instruction::branch(BRFALSE_S, InstrId(4));
        assert!(br.is_branch());
        assert_eq!(br.targets(), &[InstrId(4)]);
        br.targets_mut()[0] = InstrId(7);
        assert_eq!(br.targets(), &[InstrId(7)]);

        let nop = Instruction::simple(NOP);
        assert!(!nop.is_branch());
        assert!(nop.targets().is_empty());
    }

    #[test]
    fn flow() {
        assert_eq!(Instruction::branch(BEQ, InstrId(0)).flow(), FlowType::ConditionalBranch);
        assert!(Instruction::simple(THROW).flow().is_terminal());
        assert!(!Instruction::with_token(CALL, Token(1)).flow().is_terminal());
        assert_eq!(Instruction::simple(0x24).mnemonic(), "???");
    }

    #[test]
    fn same_as_ignores_offsets() {
        let mut a = Instruction::ldc_i4(3);
        a.original_offset = Some(10);
        a.offset = 20;
        assert!(a.same_as(&Instruction::ldc_i4(3)));
        assert!(!a.same_as(&Instruction::ldc_i4(4)));
    }
}
