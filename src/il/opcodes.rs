//! CIL opcode byte constants (ECMA-335) and their static descriptors.
//!
//! Single-byte opcodes are named after their mnemonic (e.g. [`CALL`] = `0x28`). Two-byte
//! opcodes that use the `0xFE` prefix have their second byte stored with an `FE_` prefix
//! (e.g. [`FE_CEQ`] = `0x01` for the `ceq` instruction `0xFE 0x01`).
//!
//! [`lookup`] maps an opcode to its [`OpCodeInfo`]: mnemonic, operand encoding and control
//! flow. The decoder uses it to size operands, the encoder to size instructions and the
//! instrumentation passes to find conditional branches.
#![allow(missing_docs)]

use crate::il::instruction::{FlowType, OperandType};

/// First byte of every two-byte opcode
pub const FE_PREFIX: u8 = 0xFE;

// ── Single-byte opcodes (0x00 – 0xE0) ──────────────────────────────────────

// Misc
pub const NOP: u8 = 0x00;
pub const BREAK: u8 = 0x01;

// Load/store argument shorthand
pub const LDARG_0: u8 = 0x02;
pub const LDARG_1: u8 = 0x03;
pub const LDARG_2: u8 = 0x04;
pub const LDARG_3: u8 = 0x05;

// Load/store local shorthand
pub const LDLOC_0: u8 = 0x06;
pub const LDLOC_1: u8 = 0x07;
pub const LDLOC_2: u8 = 0x08;
pub const LDLOC_3: u8 = 0x09;
pub const STLOC_0: u8 = 0x0A;
pub const STLOC_1: u8 = 0x0B;
pub const STLOC_2: u8 = 0x0C;
pub const STLOC_3: u8 = 0x0D;

// Load/store argument/local (short form)
pub const LDARG_S: u8 = 0x0E;
pub const LDARGA_S: u8 = 0x0F;
pub const STARG_S: u8 = 0x10;
pub const LDLOC_S: u8 = 0x11;
pub const LDLOCA_S: u8 = 0x12;
pub const STLOC_S: u8 = 0x13;

// Null / constant loaders
pub const LDNULL: u8 = 0x14;
pub const LDC_I4_M1: u8 = 0x15;
pub const LDC_I4_0: u8 = 0x16;
pub const LDC_I4_1: u8 = 0x17;
pub const LDC_I4_2: u8 = 0x18;
pub const LDC_I4_3: u8 = 0x19;
pub const LDC_I4_4: u8 = 0x1A;
pub const LDC_I4_5: u8 = 0x1B;
pub const LDC_I4_6: u8 = 0x1C;
pub const LDC_I4_7: u8 = 0x1D;
pub const LDC_I4_8: u8 = 0x1E;
pub const LDC_I4_S: u8 = 0x1F;
pub const LDC_I4: u8 = 0x20;
pub const LDC_I8: u8 = 0x21;
pub const LDC_R4: u8 = 0x22;
pub const LDC_R8: u8 = 0x23;

// Stack manipulation
pub const DUP: u8 = 0x25;
pub const POP: u8 = 0x26;

// Calls and returns
pub const JMP: u8 = 0x27;
pub const CALL: u8 = 0x28;
pub const CALLI: u8 = 0x29;
pub const RET: u8 = 0x2A;

// Short branches
pub const BR_S: u8 = 0x2B;
pub const BRFALSE_S: u8 = 0x2C;
pub const BRTRUE_S: u8 = 0x2D;
pub const BEQ_S: u8 = 0x2E;
pub const BGE_S: u8 = 0x2F;
pub const BGT_S: u8 = 0x30;
pub const BLE_S: u8 = 0x31;
pub const BLT_S: u8 = 0x32;
pub const BNE_UN_S: u8 = 0x33;
pub const BGE_UN_S: u8 = 0x34;
pub const BGT_UN_S: u8 = 0x35;
pub const BLE_UN_S: u8 = 0x36;
pub const BLT_UN_S: u8 = 0x37;

// Long branches
pub const BR: u8 = 0x38;
pub const BRFALSE: u8 = 0x39;
pub const BRTRUE: u8 = 0x3A;
pub const BEQ: u8 = 0x3B;
pub const BGE: u8 = 0x3C;
pub const BGT: u8 = 0x3D;
pub const BLE: u8 = 0x3E;
pub const BLT: u8 = 0x3F;
pub const BNE_UN: u8 = 0x40;
pub const BGE_UN: u8 = 0x41;
pub const BGT_UN: u8 = 0x42;
pub const BLE_UN: u8 = 0x43;
pub const BLT_UN: u8 = 0x44;
pub const SWITCH: u8 = 0x45;

// Indirect loads
pub const LDIND_I1: u8 = 0x46;
pub const LDIND_U1: u8 = 0x47;
pub const LDIND_I2: u8 = 0x48;
pub const LDIND_U2: u8 = 0x49;
pub const LDIND_I4: u8 = 0x4A;
pub const LDIND_U4: u8 = 0x4B;
pub const LDIND_I8: u8 = 0x4C;
pub const LDIND_I: u8 = 0x4D;
pub const LDIND_R4: u8 = 0x4E;
pub const LDIND_R8: u8 = 0x4F;
pub const LDIND_REF: u8 = 0x50;

// Indirect stores
pub const STIND_REF: u8 = 0x51;
pub const STIND_I1: u8 = 0x52;
pub const STIND_I2: u8 = 0x53;
pub const STIND_I4: u8 = 0x54;
pub const STIND_I8: u8 = 0x55;
pub const STIND_R4: u8 = 0x56;
pub const STIND_R8: u8 = 0x57;

// Arithmetic and bitwise
pub const ADD: u8 = 0x58;
pub const SUB: u8 = 0x59;
pub const MUL: u8 = 0x5A;
pub const DIV: u8 = 0x5B;
pub const DIV_UN: u8 = 0x5C;
pub const REM: u8 = 0x5D;
pub const REM_UN: u8 = 0x5E;
pub const AND: u8 = 0x5F;
pub const OR: u8 = 0x60;
pub const XOR: u8 = 0x61;
pub const SHL: u8 = 0x62;
pub const SHR: u8 = 0x63;
pub const SHR_UN: u8 = 0x64;
pub const NEG: u8 = 0x65;
pub const NOT: u8 = 0x66;

// Conversions
pub const CONV_I1: u8 = 0x67;
pub const CONV_I2: u8 = 0x68;
pub const CONV_I4: u8 = 0x69;
pub const CONV_I8: u8 = 0x6A;
pub const CONV_R4: u8 = 0x6B;
pub const CONV_R8: u8 = 0x6C;
pub const CONV_U4: u8 = 0x6D;
pub const CONV_U8: u8 = 0x6E;

// Object model
pub const CALLVIRT: u8 = 0x6F;
pub const CPOBJ: u8 = 0x70;
pub const LDOBJ: u8 = 0x71;
pub const LDSTR: u8 = 0x72;
pub const NEWOBJ: u8 = 0x73;
pub const CASTCLASS: u8 = 0x74;
pub const ISINST: u8 = 0x75;
pub const CONV_R_UN: u8 = 0x76;
pub const UNBOX: u8 = 0x79;
pub const THROW: u8 = 0x7A;
pub const LDFLD: u8 = 0x7B;
pub const LDFLDA: u8 = 0x7C;
pub const STFLD: u8 = 0x7D;
pub const LDSFLD: u8 = 0x7E;
pub const LDSFLDA: u8 = 0x7F;
pub const STSFLD: u8 = 0x80;
pub const STOBJ: u8 = 0x81;

// Overflow-checked unsigned conversions
pub const CONV_OVF_I1_UN: u8 = 0x82;
pub const CONV_OVF_I2_UN: u8 = 0x83;
pub const CONV_OVF_I4_UN: u8 = 0x84;
pub const CONV_OVF_I8_UN: u8 = 0x85;
pub const CONV_OVF_U1_UN: u8 = 0x86;
pub const CONV_OVF_U2_UN: u8 = 0x87;
pub const CONV_OVF_U4_UN: u8 = 0x88;
pub const CONV_OVF_U8_UN: u8 = 0x89;
pub const CONV_OVF_I_UN: u8 = 0x8A;
pub const CONV_OVF_U_UN: u8 = 0x8B;

// Arrays
pub const BOX: u8 = 0x8C;
pub const NEWARR: u8 = 0x8D;
pub const LDLEN: u8 = 0x8E;
pub const LDELEMA: u8 = 0x8F;
pub const LDELEM_I1: u8 = 0x90;
pub const LDELEM_U1: u8 = 0x91;
pub const LDELEM_I2: u8 = 0x92;
pub const LDELEM_U2: u8 = 0x93;
pub const LDELEM_I4: u8 = 0x94;
pub const LDELEM_U4: u8 = 0x95;
pub const LDELEM_I8: u8 = 0x96;
pub const LDELEM_I: u8 = 0x97;
pub const LDELEM_R4: u8 = 0x98;
pub const LDELEM_R8: u8 = 0x99;
pub const LDELEM_REF: u8 = 0x9A;
pub const STELEM_I: u8 = 0x9B;
pub const STELEM_I1: u8 = 0x9C;
pub const STELEM_I2: u8 = 0x9D;
pub const STELEM_I4: u8 = 0x9E;
pub const STELEM_I8: u8 = 0x9F;
pub const STELEM_R4: u8 = 0xA0;
pub const STELEM_R8: u8 = 0xA1;
pub const STELEM_REF: u8 = 0xA2;
pub const LDELEM: u8 = 0xA3;
pub const STELEM: u8 = 0xA4;
pub const UNBOX_ANY: u8 = 0xA5;

// Overflow-checked conversions
pub const CONV_OVF_I1: u8 = 0xB3;
pub const CONV_OVF_U1: u8 = 0xB4;
pub const CONV_OVF_I2: u8 = 0xB5;
pub const CONV_OVF_U2: u8 = 0xB6;
pub const CONV_OVF_I4: u8 = 0xB7;
pub const CONV_OVF_U4: u8 = 0xB8;
pub const CONV_OVF_I8: u8 = 0xB9;
pub const CONV_OVF_U8: u8 = 0xBA;

// Typed references
pub const REFANYVAL: u8 = 0xC2;
pub const CKFINITE: u8 = 0xC3;
pub const MKREFANY: u8 = 0xC6;
pub const LDTOKEN: u8 = 0xD0;

pub const CONV_U2: u8 = 0xD1;
pub const CONV_U1: u8 = 0xD2;
pub const CONV_I: u8 = 0xD3;
pub const CONV_OVF_I: u8 = 0xD4;
pub const CONV_OVF_U: u8 = 0xD5;
pub const ADD_OVF: u8 = 0xD6;
pub const ADD_OVF_UN: u8 = 0xD7;
pub const MUL_OVF: u8 = 0xD8;
pub const MUL_OVF_UN: u8 = 0xD9;
pub const SUB_OVF: u8 = 0xDA;
pub const SUB_OVF_UN: u8 = 0xDB;

// Exception handling
pub const ENDFINALLY: u8 = 0xDC;
pub const LEAVE: u8 = 0xDD;
pub const LEAVE_S: u8 = 0xDE;
pub const STIND_I: u8 = 0xDF;
pub const CONV_U: u8 = 0xE0;

// ── Two-byte opcodes (0xFE xx) ─────────────────────────────────────────────

pub const FE_ARGLIST: u8 = 0x00;
pub const FE_CEQ: u8 = 0x01;
pub const FE_CGT: u8 = 0x02;
pub const FE_CGT_UN: u8 = 0x03;
pub const FE_CLT: u8 = 0x04;
pub const FE_CLT_UN: u8 = 0x05;
pub const FE_LDFTN: u8 = 0x06;
pub const FE_LDVIRTFTN: u8 = 0x07;
pub const FE_LDARG: u8 = 0x09;
pub const FE_LDARGA: u8 = 0x0A;
pub const FE_STARG: u8 = 0x0B;
pub const FE_LDLOC: u8 = 0x0C;
pub const FE_LDLOCA: u8 = 0x0D;
pub const FE_STLOC: u8 = 0x0E;
pub const FE_LOCALLOC: u8 = 0x0F;
pub const FE_ENDFILTER: u8 = 0x11;
pub const FE_UNALIGNED: u8 = 0x12;
pub const FE_VOLATILE: u8 = 0x13;
pub const FE_TAIL: u8 = 0x14;
pub const FE_INITOBJ: u8 = 0x15;
pub const FE_CONSTRAINED: u8 = 0x16;
pub const FE_CPBLK: u8 = 0x17;
pub const FE_INITBLK: u8 = 0x18;
pub const FE_NO: u8 = 0x19;
pub const FE_RETHROW: u8 = 0x1A;
pub const FE_SIZEOF: u8 = 0x1C;
pub const FE_REFANYTYPE: u8 = 0x1D;
pub const FE_READONLY: u8 = 0x1E;

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCodeInfo {
    /// Lower-case ECMA-335 mnemonic
    pub mnemonic: &'static str,
    /// How the operand following the opcode is encoded
    pub operand: OperandType,
    /// How the instruction affects control flow
    pub flow: FlowType,
}

macro_rules! op {
    ($mnemonic:literal, $operand:ident, $flow:ident) => {
        &OpCodeInfo {
            mnemonic: $mnemonic,
            operand: OperandType::$operand,
            flow: FlowType::$flow,
        }
    };
}

/// Look up the descriptor of an opcode.
///
/// `prefix` is `0` for single-byte opcodes and [`FE_PREFIX`] for two-byte opcodes. Returns
/// `None` for byte values that ECMA-335 leaves unassigned.
#[must_use]
pub fn lookup(prefix: u8, code: u8) -> Option<&'static OpCodeInfo> {
    match prefix {
        0 => single(code),
        FE_PREFIX => extended(code),
        _ => None,
    }
}

#[allow(clippy::too_many_lines)]
fn single(code: u8) -> Option<&'static OpCodeInfo> {
    let info = match code {
        NOP => op!("nop", None, Sequential),
        BREAK => op!("break", None, Sequential),
        LDARG_0 => op!("ldarg.0", None, Sequential),
        LDARG_1 => op!("ldarg.1", None, Sequential),
        LDARG_2 => op!("ldarg.2", None, Sequential),
        LDARG_3 => op!("ldarg.3", None, Sequential),
        LDLOC_0 => op!("ldloc.0", None, Sequential),
        LDLOC_1 => op!("ldloc.1", None, Sequential),
        LDLOC_2 => op!("ldloc.2", None, Sequential),
        LDLOC_3 => op!("ldloc.3", None, Sequential),
        STLOC_0 => op!("stloc.0", None, Sequential),
        STLOC_1 => op!("stloc.1", None, Sequential),
        STLOC_2 => op!("stloc.2", None, Sequential),
        STLOC_3 => op!("stloc.3", None, Sequential),
        LDARG_S => op!("ldarg.s", UInt8, Sequential),
        LDARGA_S => op!("ldarga.s", UInt8, Sequential),
        STARG_S => op!("starg.s", UInt8, Sequential),
        LDLOC_S => op!("ldloc.s", UInt8, Sequential),
        LDLOCA_S => op!("ldloca.s", UInt8, Sequential),
        STLOC_S => op!("stloc.s", UInt8, Sequential),
        LDNULL => op!("ldnull", None, Sequential),
        LDC_I4_M1 => op!("ldc.i4.m1", None, Sequential),
        LDC_I4_0 => op!("ldc.i4.0", None, Sequential),
        LDC_I4_1 => op!("ldc.i4.1", None, Sequential),
        LDC_I4_2 => op!("ldc.i4.2", None, Sequential),
        LDC_I4_3 => op!("ldc.i4.3", None, Sequential),
        LDC_I4_4 => op!("ldc.i4.4", None, Sequential),
        LDC_I4_5 => op!("ldc.i4.5", None, Sequential),
        LDC_I4_6 => op!("ldc.i4.6", None, Sequential),
        LDC_I4_7 => op!("ldc.i4.7", None, Sequential),
        LDC_I4_8 => op!("ldc.i4.8", None, Sequential),
        LDC_I4_S => op!("ldc.i4.s", Int8, Sequential),
        LDC_I4 => op!("ldc.i4", Int32, Sequential),
        LDC_I8 => op!("ldc.i8", Int64, Sequential),
        LDC_R4 => op!("ldc.r4", Float32, Sequential),
        LDC_R8 => op!("ldc.r8", Float64, Sequential),
        DUP => op!("dup", None, Sequential),
        POP => op!("pop", None, Sequential),
        JMP => op!("jmp", Token, Return),
        CALL => op!("call", Token, Call),
        CALLI => op!("calli", Token, Call),
        RET => op!("ret", None, Return),
        BR_S => op!("br.s", ShortBranch, UnconditionalBranch),
        BRFALSE_S => op!("brfalse.s", ShortBranch, ConditionalBranch),
        BRTRUE_S => op!("brtrue.s", ShortBranch, ConditionalBranch),
        BEQ_S => op!("beq.s", ShortBranch, ConditionalBranch),
        BGE_S => op!("bge.s", ShortBranch, ConditionalBranch),
        BGT_S => op!("bgt.s", ShortBranch, ConditionalBranch),
        BLE_S => op!("ble.s", ShortBranch, ConditionalBranch),
        BLT_S => op!("blt.s", ShortBranch, ConditionalBranch),
        BNE_UN_S => op!("bne.un.s", ShortBranch, ConditionalBranch),
        BGE_UN_S => op!("bge.un.s", ShortBranch, ConditionalBranch),
        BGT_UN_S => op!("bgt.un.s", ShortBranch, ConditionalBranch),
        BLE_UN_S => op!("ble.un.s", ShortBranch, ConditionalBranch),
        BLT_UN_S => op!("blt.un.s", ShortBranch, ConditionalBranch),
        BR => op!("br", Branch, UnconditionalBranch),
        BRFALSE => op!("brfalse", Branch, ConditionalBranch),
        BRTRUE => op!("brtrue", Branch, ConditionalBranch),
        BEQ => op!("beq", Branch, ConditionalBranch),
        BGE => op!("bge", Branch, ConditionalBranch),
        BGT => op!("bgt", Branch, ConditionalBranch),
        BLE => op!("ble", Branch, ConditionalBranch),
        BLT => op!("blt", Branch, ConditionalBranch),
        BNE_UN => op!("bne.un", Branch, ConditionalBranch),
        BGE_UN => op!("bge.un", Branch, ConditionalBranch),
        BGT_UN => op!("bgt.un", Branch, ConditionalBranch),
        BLE_UN => op!("ble.un", Branch, ConditionalBranch),
        BLT_UN => op!("blt.un", Branch, ConditionalBranch),
        SWITCH => op!("switch", Switch, Switch),
        LDIND_I1 => op!("ldind.i1", None, Sequential),
        LDIND_U1 => op!("ldind.u1", None, Sequential),
        LDIND_I2 => op!("ldind.i2", None, Sequential),
        LDIND_U2 => op!("ldind.u2", None, Sequential),
        LDIND_I4 => op!("ldind.i4", None, Sequential),
        LDIND_U4 => op!("ldind.u4", None, Sequential),
        LDIND_I8 => op!("ldind.i8", None, Sequential),
        LDIND_I => op!("ldind.i", None, Sequential),
        LDIND_R4 => op!("ldind.r4", None, Sequential),
        LDIND_R8 => op!("ldind.r8", None, Sequential),
        LDIND_REF => op!("ldind.ref", None, Sequential),
        STIND_REF => op!("stind.ref", None, Sequential),
        STIND_I1 => op!("stind.i1", None, Sequential),
        STIND_I2 => op!("stind.i2", None, Sequential),
        STIND_I4 => op!("stind.i4", None, Sequential),
        STIND_I8 => op!("stind.i8", None, Sequential),
        STIND_R4 => op!("stind.r4", None, Sequential),
        STIND_R8 => op!("stind.r8", None, Sequential),
        ADD => op!("add", None, Sequential),
        SUB => op!("sub", None, Sequential),
        MUL => op!("mul", None, Sequential),
        DIV => op!("div", None, Sequential),
        DIV_UN => op!("div.un", None, Sequential),
        REM => op!("rem", None, Sequential),
        REM_UN => op!("rem.un", None, Sequential),
        AND => op!("and", None, Sequential),
        OR => op!("or", None, Sequential),
        XOR => op!("xor", None, Sequential),
        SHL => op!("shl", None, Sequential),
        SHR => op!("shr", None, Sequential),
        SHR_UN => op!("shr.un", None, Sequential),
        NEG => op!("neg", None, Sequential),
        NOT => op!("not", None, Sequential),
        CONV_I1 => op!("conv.i1", None, Sequential),
        CONV_I2 => op!("conv.i2", None, Sequential),
        CONV_I4 => op!("conv.i4", None, Sequential),
        CONV_I8 => op!("conv.i8", None, Sequential),
        CONV_R4 => op!("conv.r4", None, Sequential),
        CONV_R8 => op!("conv.r8", None, Sequential),
        CONV_U4 => op!("conv.u4", None, Sequential),
        CONV_U8 => op!("conv.u8", None, Sequential),
        CALLVIRT => op!("callvirt", Token, Call),
        CPOBJ => op!("cpobj", Token, Sequential),
        LDOBJ => op!("ldobj", Token, Sequential),
        LDSTR => op!("ldstr", Token, Sequential),
        NEWOBJ => op!("newobj", Token, Call),
        CASTCLASS => op!("castclass", Token, Sequential),
        ISINST => op!("isinst", Token, Sequential),
        CONV_R_UN => op!("conv.r.un", None, Sequential),
        UNBOX => op!("unbox", Token, Sequential),
        THROW => op!("throw", None, Throw),
        LDFLD => op!("ldfld", Token, Sequential),
        LDFLDA => op!("ldflda", Token, Sequential),
        STFLD => op!("stfld", Token, Sequential),
        LDSFLD => op!("ldsfld", Token, Sequential),
        LDSFLDA => op!("ldsflda", Token, Sequential),
        STSFLD => op!("stsfld", Token, Sequential),
        STOBJ => op!("stobj", Token, Sequential),
        CONV_OVF_I1_UN => op!("conv.ovf.i1.un", None, Sequential),
        CONV_OVF_I2_UN => op!("conv.ovf.i2.un", None, Sequential),
        CONV_OVF_I4_UN => op!("conv.ovf.i4.un", None, Sequential),
        CONV_OVF_I8_UN => op!("conv.ovf.i8.un", None, Sequential),
        CONV_OVF_U1_UN => op!("conv.ovf.u1.un", None, Sequential),
        CONV_OVF_U2_UN => op!("conv.ovf.u2.un", None, Sequential),
        CONV_OVF_U4_UN => op!("conv.ovf.u4.un", None, Sequential),
        CONV_OVF_U8_UN => op!("conv.ovf.u8.un", None, Sequential),
        CONV_OVF_I_UN => op!("conv.ovf.i.un", None, Sequential),
        CONV_OVF_U_UN => op!("conv.ovf.u.un", None, Sequential),
        BOX => op!("box", Token, Sequential),
        NEWARR => op!("newarr", Token, Sequential),
        LDLEN => op!("ldlen", None, Sequential),
        LDELEMA => op!("ldelema", Token, Sequential),
        LDELEM_I1 => op!("ldelem.i1", None, Sequential),
        LDELEM_U1 => op!("ldelem.u1", None, Sequential),
        LDELEM_I2 => op!("ldelem.i2", None, Sequential),
        LDELEM_U2 => op!("ldelem.u2", None, Sequential),
        LDELEM_I4 => op!("ldelem.i4", None, Sequential),
        LDELEM_U4 => op!("ldelem.u4", None, Sequential),
        LDELEM_I8 => op!("ldelem.i8", None, Sequential),
        LDELEM_I => op!("ldelem.i", None, Sequential),
        LDELEM_R4 => op!("ldelem.r4", None, Sequential),
        LDELEM_R8 => op!("ldelem.r8", None, Sequential),
        LDELEM_REF => op!("ldelem.ref", None, Sequential),
        STELEM_I => op!("stelem.i", None, Sequential),
        STELEM_I1 => op!("stelem.i1", None, Sequential),
        STELEM_I2 => op!("stelem.i2", None, Sequential),
        STELEM_I4 => op!("stelem.i4", None, Sequential),
        STELEM_I8 => op!("stelem.i8", None, Sequential),
        STELEM_R4 => op!("stelem.r4", None, Sequential),
        STELEM_R8 => op!("stelem.r8", None, Sequential),
        STELEM_REF => op!("stelem.ref", None, Sequential),
        LDELEM => op!("ldelem", Token, Sequential),
        STELEM => op!("stelem", Token, Sequential),
        UNBOX_ANY => op!("unbox.any", Token, Sequential),
        CONV_OVF_I1 => op!("conv.ovf.i1", None, Sequential),
        CONV_OVF_U1 => op!("conv.ovf.u1", None, Sequential),
        CONV_OVF_I2 => op!("conv.ovf.i2", None, Sequential),
        CONV_OVF_U2 => op!("conv.ovf.u2", None, Sequential),
        CONV_OVF_I4 => op!("conv.ovf.i4", None, Sequential),
        CONV_OVF_U4 => op!("conv.ovf.u4", None, Sequential),
        CONV_OVF_I8 => op!("conv.ovf.i8", None, Sequential),
        CONV_OVF_U8 => op!("conv.ovf.u8", None, Sequential),
        REFANYVAL => op!("refanyval", Token, Sequential),
        CKFINITE => op!("ckfinite", None, Sequential),
        MKREFANY => op!("mkrefany", Token, Sequential),
        LDTOKEN => op!("ldtoken", Token, Sequential),
        CONV_U2 => op!("conv.u2", None, Sequential),
        CONV_U1 => op!("conv.u1", None, Sequential),
        CONV_I => op!("conv.i", None, Sequential),
        CONV_OVF_I => op!("conv.ovf.i", None, Sequential),
        CONV_OVF_U => op!("conv.ovf.u", None, Sequential),
        ADD_OVF => op!("add.ovf", None, Sequential),
        ADD_OVF_UN => op!("add.ovf.un", None, Sequential),
        MUL_OVF => op!("mul.ovf", None, Sequential),
        MUL_OVF_UN => op!("mul.ovf.un", None, Sequential),
        SUB_OVF => op!("sub.ovf", None, Sequential),
        SUB_OVF_UN => op!("sub.ovf.un", None, Sequential),
        ENDFINALLY => op!("endfinally", None, EndFinally),
        LEAVE => op!("leave", Branch, Leave),
        LEAVE_S => op!("leave.s", ShortBranch, Leave),
        STIND_I => op!("stind.i", None, Sequential),
        CONV_U => op!("conv.u", None, Sequential),
        _ => return None,
    };
    Some(info)
}

fn extended(code: u8) -> Option<&'static OpCodeInfo> {
    let info = match code {
        FE_ARGLIST => op!("arglist", None, Sequential),
        FE_CEQ => op!("ceq", None, Sequential),
        FE_CGT => op!("cgt", None, Sequential),
        FE_CGT_UN => op!("cgt.un", None, Sequential),
        FE_CLT => op!("clt", None, Sequential),
        FE_CLT_UN => op!("clt.un", None, Sequential),
        FE_LDFTN => op!("ldftn", Token, Sequential),
        FE_LDVIRTFTN => op!("ldvirtftn", Token, Sequential),
        FE_LDARG => op!("ldarg", UInt16, Sequential),
        FE_LDARGA => op!("ldarga", UInt16, Sequential),
        FE_STARG => op!("starg", UInt16, Sequential),
        FE_LDLOC => op!("ldloc", UInt16, Sequential),
        FE_LDLOCA => op!("ldloca", UInt16, Sequential),
        FE_STLOC => op!("stloc", UInt16, Sequential),
        FE_LOCALLOC => op!("localloc", None, Sequential),
        FE_ENDFILTER => op!("endfilter", None, EndFilter),
        FE_UNALIGNED => op!("unaligned.", UInt8, Meta),
        FE_VOLATILE => op!("volatile.", None, Meta),
        FE_TAIL => op!("tail.", None, Meta),
        FE_INITOBJ => op!("initobj", Token, Sequential),
        FE_CONSTRAINED => op!("constrained.", Token, Meta),
        FE_CPBLK => op!("cpblk", None, Sequential),
        FE_INITBLK => op!("initblk", None, Sequential),
        FE_NO => op!("no.", UInt8, Meta),
        FE_RETHROW => op!("rethrow", None, Throw),
        FE_SIZEOF => op!("sizeof", Token, Sequential),
        FE_REFANYTYPE => op!("refanytype", None, Sequential),
        FE_READONLY => op!("readonly.", None, Meta),
        _ => return None,
    };
    Some(info)
}
