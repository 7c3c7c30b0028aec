//! CIL instruction representation, operand types, and derived predicates.
//!
//! # Key Components
//!
//! - [`Instruction`] - An opcode plus its operand
//! - [`Operand`] - Type-safe operand representation
//! - [`FlowType`] - Control flow behavior classification
//! - [`StackBehavior`] - Stack effect of a single instruction
//!
//! # Branch operands
//!
//! In the flat form a branch names its destination by instruction index
//! ([`Operand::Target`], [`Operand::Switch`]). Once the instruction sits in a
//! [`crate::analysis::MethodCfg`], the destination moves onto the block edges
//! and the operand becomes [`Operand::Linked`].

use std::{fmt, sync::Arc};

use crate::{
    analysis::Literal,
    assembly::Opcode,
    metadata::{MemberRef, MemberRefRc},
};

/// The operand carried by an [`Instruction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// 32-bit integer immediate (`ldc.i4`)
    Int32(i32),
    /// 64-bit integer immediate (`ldc.i8`)
    Int64(i64),
    /// 32-bit float immediate (`ldc.r4`)
    Float32(f32),
    /// 64-bit float immediate (`ldc.r8`)
    Float64(f64),
    /// User string (`ldstr`)
    String(Arc<str>),
    /// Local variable index
    Local(u16),
    /// Argument index
    Argument(u16),
    /// Method, field or type reference
    Member(MemberRefRc),
    /// Flat-form branch destination (instruction index)
    Target(usize),
    /// Flat-form switch destinations (instruction indices), in case order
    Switch(Vec<usize>),
    /// Graph-linked branch; destinations are the containing block's edges
    Linked,
}

/// How an instruction affects control flow.
///
/// # Examples
///
/// ```rust
/// use cflowkit::assembly::{FlowType, Opcode};
///
/// assert_eq!(Opcode::Brtrue.flow_type(), FlowType::ConditionalBranch);
/// assert_eq!(Opcode::Call.flow_type(), FlowType::Call);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method or filter
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

/// Stack effect of an instruction.
///
/// Describes how many values an instruction takes off the evaluation stack
/// and how many it leaves there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: usize,
    /// Number of items pushed to stack
    pub pushes: usize,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: isize,
}

impl StackBehavior {
    fn new(pops: usize, pushes: usize) -> Self {
        Self {
            pops,
            pushes,
            // Stack effects are tiny; the cast cannot wrap.
            net_effect: pushes as isize - pops as isize,
        }
    }
}

/// A single instruction.
///
/// Immutable apart from operand replacement, which graph-level code performs
/// through [`crate::analysis::MethodCfg::set_operand`].
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: Opcode,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    /// Creates an instruction without operand.
    #[must_use]
    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// `nop`
    #[must_use]
    pub fn nop() -> Self {
        Self::simple(Opcode::Nop)
    }

    /// `ldc.i4 value`
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        Self::new(Opcode::LdcI4, Operand::Int32(value))
    }

    /// `ldc.i8 value`
    #[must_use]
    pub fn ldc_i8(value: i64) -> Self {
        Self::new(Opcode::LdcI8, Operand::Int64(value))
    }

    /// `ldstr value`
    #[must_use]
    pub fn ldstr(value: &str) -> Self {
        Self::new(Opcode::Ldstr, Operand::String(Arc::from(value)))
    }

    /// `ldloc index`
    #[must_use]
    pub fn ldloc(index: u16) -> Self {
        Self::new(Opcode::Ldloc, Operand::Local(index))
    }

    /// `stloc index`
    #[must_use]
    pub fn stloc(index: u16) -> Self {
        Self::new(Opcode::Stloc, Operand::Local(index))
    }

    /// `ldarg index`
    #[must_use]
    pub fn ldarg(index: u16) -> Self {
        Self::new(Opcode::Ldarg, Operand::Argument(index))
    }

    /// `call method`
    #[must_use]
    pub fn call(method: MemberRefRc) -> Self {
        Self::new(Opcode::Call, Operand::Member(method))
    }

    /// A flat-form branch to instruction `target`.
    #[must_use]
    pub fn branch(opcode: Opcode, target: usize) -> Self {
        Self::new(opcode, Operand::Target(target))
    }

    /// Canonical push of a literal, or `None` when the literal has no push form.
    ///
    /// Integers up to 32 bits (bool and char included) use `ldc.i4`, 64-bit
    /// integers use `ldc.i8`. Member values cannot be pushed as constants.
    #[must_use]
    pub fn literal(value: &Literal) -> Option<Self> {
        let instr = match value {
            Literal::Null => Self::simple(Opcode::Ldnull),
            Literal::Bool(b) => Self::ldc_i4(i32::from(*b)),
            Literal::Char(c) => Self::ldc_i4(i32::from(*c)),
            Literal::I1(v) => Self::ldc_i4(i32::from(*v)),
            Literal::U1(v) => Self::ldc_i4(i32::from(*v)),
            Literal::I2(v) => Self::ldc_i4(i32::from(*v)),
            Literal::U2(v) => Self::ldc_i4(i32::from(*v)),
            Literal::I4(v) => Self::ldc_i4(*v),
            Literal::U4(v) => Self::ldc_i4(i32::from_ne_bytes(v.to_ne_bytes())),
            Literal::I8(v) => Self::ldc_i8(*v),
            Literal::U8(v) => Self::ldc_i8(i64::from_ne_bytes(v.to_ne_bytes())),
            Literal::R4(v) => Self::new(Opcode::LdcR4, Operand::Float32(*v)),
            Literal::R8(v) => Self::new(Opcode::LdcR8, Operand::Float64(*v)),
            Literal::String(s) => Self::new(Opcode::Ldstr, Operand::String(s.clone())),
            Literal::Member(_) => return None,
        };
        Some(instr)
    }

    /// The literal pushed by this instruction, if it is a constant push.
    ///
    /// Integer pushes yield their generic encoding (`I4`/`I8`); narrowing to a
    /// declared parameter type is [`Literal::coerce_to`]'s job.
    #[must_use]
    pub fn literal_value(&self) -> Option<Literal> {
        match (self.opcode, &self.operand) {
            (Opcode::LdcI4, Operand::Int32(v)) => Some(Literal::I4(*v)),
            (Opcode::LdcI8, Operand::Int64(v)) => Some(Literal::I8(*v)),
            (Opcode::LdcR4, Operand::Float32(v)) => Some(Literal::R4(*v)),
            (Opcode::LdcR8, Operand::Float64(v)) => Some(Literal::R8(*v)),
            (Opcode::Ldstr, Operand::String(s)) => Some(Literal::String(s.clone())),
            (Opcode::Ldnull, _) => Some(Literal::Null),
            _ => None,
        }
    }

    /// Control-flow classification of the opcode.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Returns `true` for instructions that name explicit successors
    /// (`br`, conditional branches, `switch`, `leave`).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Returns `true` for two-way conditional branches.
    #[must_use]
    pub fn is_conditional_branch(&self) -> bool {
        self.flow_type() == FlowType::ConditionalBranch
    }

    /// Returns `true` for `br`.
    #[must_use]
    pub fn is_br(&self) -> bool {
        self.opcode == Opcode::Br
    }

    /// Returns `true` for `switch`.
    #[must_use]
    pub fn is_switch(&self) -> bool {
        self.opcode == Opcode::Switch
    }

    /// Returns `true` for `leave`.
    #[must_use]
    pub fn is_leave(&self) -> bool {
        self.opcode == Opcode::Leave
    }

    /// Returns `true` for `nop`.
    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }

    /// See [`Opcode::is_terminator`].
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    /// See [`Opcode::is_fallthrough`].
    #[must_use]
    pub fn is_fallthrough(&self) -> bool {
        self.opcode.is_fallthrough()
    }

    /// See [`Opcode::is_simple_load`].
    #[must_use]
    pub fn is_simple_load(&self) -> bool {
        self.opcode.is_simple_load()
    }

    /// Returns `true` for `call` and `callvirt`.
    #[must_use]
    pub fn is_call(&self) -> bool {
        matches!(self.opcode, Opcode::Call | Opcode::Callvirt)
    }

    /// The member operand, if any.
    #[must_use]
    pub fn member(&self) -> Option<&MemberRef> {
        match &self.operand {
            Operand::Member(member) => Some(member),
            _ => None,
        }
    }

    /// Local index of `ldloc`/`stloc`/`ldloca`.
    #[must_use]
    pub fn local(&self) -> Option<u16> {
        match (&self.operand, self.opcode) {
            (Operand::Local(index), Opcode::Ldloc | Opcode::Stloc | Opcode::Ldloca) => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Flat-form branch destinations named by the operand.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Stack effect, or `None` when it depends on a signature that is not available.
    ///
    /// `ret` is reported as popping nothing and `leave` as a plain jump; both
    /// always end their block, so no producer search ever crosses them.
    #[must_use]
    pub fn stack_behavior(&self) -> Option<StackBehavior> {
        let (pops, pushes) = match self.opcode {
            Opcode::Nop
            | Opcode::Break
            | Opcode::Jmp
            | Opcode::Ret
            | Opcode::Br
            | Opcode::Leave
            | Opcode::Endfinally
            | Opcode::Rethrow => (0, 0),
            Opcode::Ldarg
            | Opcode::Ldarga
            | Opcode::Ldloc
            | Opcode::Ldloca
            | Opcode::Ldnull
            | Opcode::LdcI4
            | Opcode::LdcI8
            | Opcode::LdcR4
            | Opcode::LdcR8
            | Opcode::Ldstr
            | Opcode::Ldtoken
            | Opcode::Ldsfld
            | Opcode::Ldsflda
            | Opcode::Ldftn
            | Opcode::Sizeof => (0, 1),
            Opcode::Starg
            | Opcode::Stloc
            | Opcode::Stsfld
            | Opcode::Pop
            | Opcode::Brfalse
            | Opcode::Brtrue
            | Opcode::Switch
            | Opcode::Throw
            | Opcode::Endfilter
            | Opcode::Initobj => (1, 0),
            Opcode::Beq
            | Opcode::Bge
            | Opcode::Bgt
            | Opcode::Ble
            | Opcode::Blt
            | Opcode::BneUn
            | Opcode::BgeUn
            | Opcode::BgtUn
            | Opcode::BleUn
            | Opcode::BltUn
            | Opcode::Stfld => (2, 0),
            Opcode::Stelem => (3, 0),
            Opcode::Dup => (1, 2),
            Opcode::Neg
            | Opcode::Not
            | Opcode::ConvI1
            | Opcode::ConvI2
            | Opcode::ConvI4
            | Opcode::ConvI8
            | Opcode::ConvU1
            | Opcode::ConvU2
            | Opcode::ConvU4
            | Opcode::ConvU8
            | Opcode::ConvR4
            | Opcode::ConvR8
            | Opcode::Ldfld
            | Opcode::Ldflda
            | Opcode::Castclass
            | Opcode::Isinst
            | Opcode::Box
            | Opcode::UnboxAny
            | Opcode::Newarr
            | Opcode::Ldlen => (1, 1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::DivUn
            | Opcode::Rem
            | Opcode::RemUn
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::ShrUn
            | Opcode::Ceq
            | Opcode::Cgt
            | Opcode::CgtUn
            | Opcode::Clt
            | Opcode::CltUn
            | Opcode::Ldelem => (2, 1),
            Opcode::Call | Opcode::Callvirt => {
                let sig = self.member()?.sig.as_ref()?;
                (sig.arg_count(), usize::from(sig.returns_value()))
            }
            Opcode::Newobj => (self.member()?.sig.as_ref()?.params.len(), 1),
            Opcode::Calli => return None,
        };
        Some(StackBehavior::new(pops, pushes))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None | Operand::Linked => Ok(()),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Float32(v) => write!(f, " {v}"),
            Operand::Float64(v) => write!(f, " {v}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Local(l) => write!(f, " V_{l}"),
            Operand::Argument(a) => write!(f, " A_{a}"),
            Operand::Member(m) => write!(f, " {}", m.full_name()),
            Operand::Target(t) => write!(f, " IL_{t:04}"),
            Operand::Switch(targets) => write!(f, " ({} targets)", targets.len()),
        }
    }
}
