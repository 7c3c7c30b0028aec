//! The closed opcode set understood by the rewriter.
//!
//! Short and macro forms (`ldc.i4.s`, `ldloc.0`, `br.s`, ...) are an encoding
//! detail of the container writer and are folded into their canonical long
//! form here. Every classification below is an exhaustive `match`, so adding
//! an opcode forces every predicate to take a position on it.

use strum::{Display, EnumIter, IntoStaticStr};

use crate::assembly::FlowType;

/// A CIL opcode in canonical long form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[allow(missing_docs)]
pub enum Opcode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "break")]
    Break,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "ldarga")]
    Ldarga,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca")]
    Ldloca,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "ldtoken")]
    Ldtoken,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "jmp")]
    Jmp,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "calli")]
    Calli,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "bgt")]
    Bgt,
    #[strum(serialize = "ble")]
    Ble,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "bge.un")]
    BgeUn,
    #[strum(serialize = "bgt.un")]
    BgtUn,
    #[strum(serialize = "ble.un")]
    BleUn,
    #[strum(serialize = "blt.un")]
    BltUn,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "leave")]
    Leave,
    #[strum(serialize = "endfinally")]
    Endfinally,
    #[strum(serialize = "endfilter")]
    Endfilter,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "rethrow")]
    Rethrow,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "div.un")]
    DivUn,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "rem.un")]
    RemUn,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "shr")]
    Shr,
    #[strum(serialize = "shr.un")]
    ShrUn,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "cgt.un")]
    CgtUn,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "clt.un")]
    CltUn,
    #[strum(serialize = "conv.i1")]
    ConvI1,
    #[strum(serialize = "conv.i2")]
    ConvI2,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "conv.i8")]
    ConvI8,
    #[strum(serialize = "conv.u1")]
    ConvU1,
    #[strum(serialize = "conv.u2")]
    ConvU2,
    #[strum(serialize = "conv.u4")]
    ConvU4,
    #[strum(serialize = "conv.u8")]
    ConvU8,
    #[strum(serialize = "conv.r4")]
    ConvR4,
    #[strum(serialize = "conv.r8")]
    ConvR8,
    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "ldflda")]
    Ldflda,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "castclass")]
    Castclass,
    #[strum(serialize = "isinst")]
    Isinst,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,
    #[strum(serialize = "ldelem")]
    Ldelem,
    #[strum(serialize = "stelem")]
    Stelem,
    #[strum(serialize = "ldftn")]
    Ldftn,
    #[strum(serialize = "initobj")]
    Initobj,
    #[strum(serialize = "sizeof")]
    Sizeof,
}

impl Opcode {
    /// ECMA-335 encoding; two-byte opcodes are returned as `0xFExx`.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Nop => 0x00,
            Self::Break => 0x01,
            Self::Ldarg => 0xFE09,
            Self::Ldarga => 0xFE0A,
            Self::Starg => 0xFE0B,
            Self::Ldloc => 0xFE0C,
            Self::Ldloca => 0xFE0D,
            Self::Stloc => 0xFE0E,
            Self::Ldnull => 0x14,
            Self::LdcI4 => 0x20,
            Self::LdcI8 => 0x21,
            Self::LdcR4 => 0x22,
            Self::LdcR8 => 0x23,
            Self::Dup => 0x25,
            Self::Pop => 0x26,
            Self::Jmp => 0x27,
            Self::Call => 0x28,
            Self::Calli => 0x29,
            Self::Ret => 0x2A,
            Self::Br => 0x38,
            Self::Brfalse => 0x39,
            Self::Brtrue => 0x3A,
            Self::Beq => 0x3B,
            Self::Bge => 0x3C,
            Self::Bgt => 0x3D,
            Self::Ble => 0x3E,
            Self::Blt => 0x3F,
            Self::BneUn => 0x40,
            Self::BgeUn => 0x41,
            Self::BgtUn => 0x42,
            Self::BleUn => 0x43,
            Self::BltUn => 0x44,
            Self::Switch => 0x45,
            Self::Add => 0x58,
            Self::Sub => 0x59,
            Self::Mul => 0x5A,
            Self::Div => 0x5B,
            Self::DivUn => 0x5C,
            Self::Rem => 0x5D,
            Self::RemUn => 0x5E,
            Self::And => 0x5F,
            Self::Or => 0x60,
            Self::Xor => 0x61,
            Self::Shl => 0x62,
            Self::Shr => 0x63,
            Self::ShrUn => 0x64,
            Self::Neg => 0x65,
            Self::Not => 0x66,
            Self::ConvI1 => 0x67,
            Self::ConvI2 => 0x68,
            Self::ConvI4 => 0x69,
            Self::ConvI8 => 0x6A,
            Self::ConvR4 => 0x6B,
            Self::ConvR8 => 0x6C,
            Self::ConvU4 => 0x6D,
            Self::ConvU8 => 0x6E,
            Self::Callvirt => 0x6F,
            Self::Ldstr => 0x72,
            Self::Newobj => 0x73,
            Self::Castclass => 0x74,
            Self::Isinst => 0x75,
            Self::Throw => 0x7A,
            Self::Ldfld => 0x7B,
            Self::Ldflda => 0x7C,
            Self::Stfld => 0x7D,
            Self::Ldsfld => 0x7E,
            Self::Ldsflda => 0x7F,
            Self::Stsfld => 0x80,
            Self::Box => 0x8C,
            Self::Newarr => 0x8D,
            Self::Ldlen => 0x8E,
            Self::Ldelem => 0xA3,
            Self::Stelem => 0xA4,
            Self::UnboxAny => 0xA5,
            Self::Ldtoken => 0xD0,
            Self::ConvU2 => 0xD1,
            Self::ConvU1 => 0xD2,
            Self::Endfinally => 0xDC,
            Self::Leave => 0xDD,
            Self::Ceq => 0xFE01,
            Self::Cgt => 0xFE02,
            Self::CgtUn => 0xFE03,
            Self::Clt => 0xFE04,
            Self::CltUn => 0xFE05,
            Self::Ldftn => 0xFE06,
            Self::Endfilter => 0xFE11,
            Self::Initobj => 0xFE15,
            Self::Rethrow => 0xFE1A,
            Self::Sizeof => 0xFE1C,
        }
    }

    /// Control-flow classification.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            Self::Br => FlowType::UnconditionalBranch,
            Self::Brfalse
            | Self::Brtrue
            | Self::Beq
            | Self::Bge
            | Self::Bgt
            | Self::Ble
            | Self::Blt
            | Self::BneUn
            | Self::BgeUn
            | Self::BgtUn
            | Self::BleUn
            | Self::BltUn => FlowType::ConditionalBranch,
            Self::Switch => FlowType::Switch,
            Self::Leave => FlowType::Leave,
            Self::Call | Self::Callvirt | Self::Calli | Self::Newobj | Self::Jmp => FlowType::Call,
            Self::Ret | Self::Endfilter => FlowType::Return,
            Self::Throw | Self::Rethrow => FlowType::Throw,
            Self::Endfinally => FlowType::EndFinally,
            Self::Nop
            | Self::Break
            | Self::Ldarg
            | Self::Ldarga
            | Self::Starg
            | Self::Ldloc
            | Self::Ldloca
            | Self::Stloc
            | Self::Ldnull
            | Self::LdcI4
            | Self::LdcI8
            | Self::LdcR4
            | Self::LdcR8
            | Self::Ldstr
            | Self::Ldtoken
            | Self::Dup
            | Self::Pop
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::DivUn
            | Self::Rem
            | Self::RemUn
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Shl
            | Self::Shr
            | Self::ShrUn
            | Self::Neg
            | Self::Not
            | Self::Ceq
            | Self::Cgt
            | Self::CgtUn
            | Self::Clt
            | Self::CltUn
            | Self::ConvI1
            | Self::ConvI2
            | Self::ConvI4
            | Self::ConvI8
            | Self::ConvU1
            | Self::ConvU2
            | Self::ConvU4
            | Self::ConvU8
            | Self::ConvR4
            | Self::ConvR8
            | Self::Ldfld
            | Self::Ldflda
            | Self::Stfld
            | Self::Ldsfld
            | Self::Ldsflda
            | Self::Stsfld
            | Self::Castclass
            | Self::Isinst
            | Self::Box
            | Self::UnboxAny
            | Self::Newarr
            | Self::Ldlen
            | Self::Ldelem
            | Self::Stelem
            | Self::Ldftn
            | Self::Initobj
            | Self::Sizeof => FlowType::Sequential,
        }
    }

    /// The opcode with the opposite branch sense, if it has one.
    ///
    /// `beq` and `bne.un` have no counterpart: `bne.un` is unordered on floats,
    /// so it is not the negation of `beq` for every operand type.
    #[must_use]
    pub fn flipped(self) -> Option<Opcode> {
        match self {
            Self::Bge => Some(Self::Blt),
            Self::Blt => Some(Self::Bge),
            Self::BgeUn => Some(Self::BltUn),
            Self::BltUn => Some(Self::BgeUn),
            Self::Bgt => Some(Self::Ble),
            Self::Ble => Some(Self::Bgt),
            Self::BgtUn => Some(Self::BleUn),
            Self::BleUn => Some(Self::BgtUn),
            Self::Brfalse => Some(Self::Brtrue),
            Self::Brtrue => Some(Self::Brfalse),
            _ => None,
        }
    }

    /// Returns `true` for opcodes that end a method-level control path
    /// without naming a successor.
    #[must_use]
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Endfilter | Self::Endfinally | Self::Jmp | Self::Ret | Self::Rethrow | Self::Throw
        )
    }

    /// Returns `true` when execution may continue with the next instruction.
    #[must_use]
    pub fn is_fallthrough(self) -> bool {
        match self.flow_type() {
            FlowType::Call => self != Self::Jmp,
            FlowType::ConditionalBranch | FlowType::Switch | FlowType::Sequential => true,
            FlowType::UnconditionalBranch
            | FlowType::Return
            | FlowType::Throw
            | FlowType::EndFinally
            | FlowType::Leave => false,
        }
    }

    /// Loads that read an argument, a local or a constant without side effects.
    #[must_use]
    pub fn is_simple_load(self) -> bool {
        matches!(
            self,
            Self::Ldarg
                | Self::Ldloc
                | Self::LdcI4
                | Self::LdcI8
                | Self::LdcR4
                | Self::LdcR8
                | Self::Ldnull
                | Self::Ldstr
                | Self::Ldtoken
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_flip_is_involution() {
        for opcode in Opcode::iter() {
            if let Some(flipped) = opcode.flipped() {
                assert_ne!(flipped, opcode);
                assert_eq!(flipped.flipped(), Some(opcode), "{opcode}");
                assert_eq!(flipped.flow_type(), FlowType::ConditionalBranch);
            }
        }
    }

    #[test]
    fn test_equality_branches_do_not_flip() {
        assert_eq!(Opcode::Beq.flipped(), None);
        assert_eq!(Opcode::BneUn.flipped(), None);
        assert_eq!(Opcode::Br.flipped(), None);
    }

    #[test]
    fn test_terminators_do_not_fall_through() {
        for opcode in Opcode::iter().filter(|op| op.is_terminator()) {
            assert!(!opcode.is_fallthrough(), "{opcode} must not fall through");
        }
    }

    #[test]
    fn test_fallthrough_classes() {
        assert!(Opcode::Call.is_fallthrough());
        assert!(Opcode::Newobj.is_fallthrough());
        assert!(!Opcode::Jmp.is_fallthrough());
        assert!(Opcode::Brtrue.is_fallthrough());
        assert!(Opcode::Switch.is_fallthrough());
        assert!(!Opcode::Br.is_fallthrough());
        assert!(!Opcode::Leave.is_fallthrough());
    }

    #[test]
    fn test_codes_are_unique() {
        let mut codes: Vec<u16> = Opcode::iter().map(Opcode::code).collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Opcode::LdcI4.to_string(), "ldc.i4");
        assert_eq!(Opcode::BneUn.to_string(), "bne.un");
        let name: &'static str = Opcode::UnboxAny.into();
        assert_eq!(name, "unbox.any");
    }
}
