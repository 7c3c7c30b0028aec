//! Backward stack-effect walker.
//!
//! Given an instruction that consumes `n` stack values, the walker finds the
//! contiguous run of earlier instructions in the same block that produced
//! them. Each value is produced by a *unit*: a single instruction that pushes
//! exactly one value, together with the units producing that instruction's
//! own operands. A `dup` is a unit on its own; the value it copies stays on
//! the stack underneath. `nop`s between units are stepped over and end up
//! inside the recovered range.
//!
//! The walker only reads the slice it is given.
//!
//! # Failures
//!
//! - [`WalkError::RanOffBlock`]: a producer would lie before the block start
//! - [`WalkError::MultiValueProducer`]: an instruction pushes more than one value
//! - [`WalkError::UnknownProducer`]: an instruction pushes nothing or has an
//!   unknown stack effect (for example `calli` or a call without signature)

use thiserror::Error;

use crate::{
    analysis::{LocalValues, Literal, Value},
    assembly::{Instruction, Opcode},
    metadata::MethodSig,
};

/// Why the producers of a stack value could not be located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WalkError {
    /// The value was pushed before the first instruction of the block.
    #[error("producer of the value consumed at {index} lies outside the block")]
    RanOffBlock {
        /// The consuming instruction
        index: usize,
    },
    /// The instruction pushes more than one value.
    #[error("instruction {index} pushes more than one value")]
    MultiValueProducer {
        /// The offending producer
        index: usize,
    },
    /// The instruction is not a recognized single-value producer.
    #[error("instruction {index} is not a recognized value producer")]
    UnknownProducer {
        /// The offending producer
        index: usize,
    },
}

/// One recovered call argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentSlot {
    /// The argument value, coerced to its declared type when known
    pub value: Value,
    /// First instruction of the unit producing this argument
    pub start: usize,
    /// The instruction that pushed the value
    pub producer: usize,
}

/// All arguments of a call, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredArguments {
    /// One slot per argument, `this` first for instance methods
    pub slots: Vec<ArgumentSlot>,
    /// First instruction of the whole argument range; the call index for a
    /// call without arguments
    pub start: usize,
}

impl RecoveredArguments {
    /// Returns `true` when every argument is known.
    #[must_use]
    pub fn all_known(&self) -> bool {
        self.slots.iter().all(|s| s.value.is_known())
    }

    /// The first unknown argument, if any.
    #[must_use]
    pub fn first_unknown(&self) -> Option<(usize, &ArgumentSlot)> {
        self.slots.iter().enumerate().find(|(_, s)| !s.value.is_known())
    }

    /// The argument values.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.slots.iter().map(|s| s.value.clone()).collect()
    }
}

/// The value a single producing instruction stands for.
fn producer_value(instr: &Instruction, locals: &LocalValues) -> Value {
    if let Some(literal) = instr.literal_value() {
        return Value::Known(literal);
    }
    match instr.opcode {
        Opcode::Ldloc => instr
            .local()
            .and_then(|l| locals.get(l))
            .cloned()
            .map_or(Value::Unknown, Value::Known),
        Opcode::Ldsfld | Opcode::Ldtoken => match &instr.operand {
            crate::assembly::Operand::Member(m) => Value::Known(Literal::Member(m.clone())),
            _ => Value::Unknown,
        },
        _ => Value::Unknown,
    }
}

/// The closest instruction before `cursor` that is not a `nop`.
fn previous(instrs: &[Instruction], cursor: usize, index: usize) -> Result<usize, WalkError> {
    instrs[..cursor]
        .iter()
        .rposition(|i| !i.is_nop())
        .ok_or(WalkError::RanOffBlock { index })
}

/// Locates the unit whose last instruction is `end`; returns its start and value.
fn unit(instrs: &[Instruction], end: usize, locals: &LocalValues) -> Result<(usize, Value), WalkError> {
    let instr = &instrs[end];
    if instr.opcode == Opcode::Dup {
        return Ok((end, Value::Unknown));
    }
    let behavior = instr
        .stack_behavior()
        .ok_or(WalkError::UnknownProducer { index: end })?;
    match behavior.pushes {
        0 => return Err(WalkError::UnknownProducer { index: end }),
        1 => {}
        _ => return Err(WalkError::MultiValueProducer { index: end }),
    }
    if behavior.pops == 0 {
        return Ok((end, producer_value(instr, locals)));
    }
    let mut cursor = end;
    for _ in 0..behavior.pops {
        let producer = previous(instrs, cursor, end)?;
        cursor = unit(instrs, producer, locals)?.0;
    }
    Ok((cursor, Value::Unknown))
}

/// Walks back from `index` over `count` values; returns `(start, producer, value)`
/// per value, topmost first.
fn walk(
    instrs: &[Instruction],
    index: usize,
    count: usize,
    locals: &LocalValues,
) -> Result<Vec<(usize, usize, Value)>, WalkError> {
    let mut found = Vec::with_capacity(count);
    let mut cursor = index;
    for _ in 0..count {
        let producer = previous(instrs, cursor, index)?;
        let (start, value) = unit(instrs, producer, locals)?;
        found.push((start, producer, value));
        cursor = start;
    }
    Ok(found)
}

/// Start indices of the units producing every value consumed at `index`,
/// bottom of the stack first.
///
/// # Errors
///
/// Returns a [`WalkError`] when a producer cannot be located, including when
/// the instruction at `index` has no known stack effect.
pub fn producers(instrs: &[Instruction], index: usize) -> Result<Vec<usize>, WalkError> {
    let behavior = instrs
        .get(index)
        .and_then(Instruction::stack_behavior)
        .ok_or(WalkError::UnknownProducer { index })?;
    let mut starts: Vec<usize> = walk(instrs, index, behavior.pops, &LocalValues::new())?
        .into_iter()
        .map(|(start, _, _)| start)
        .collect();
    starts.reverse();
    Ok(starts)
}

/// Recovers the arguments of the call at `call_index`.
///
/// Arguments are resolved right to left. Known integer arguments are narrowed
/// to their declared parameter type.
///
/// # Errors
///
/// Returns a [`WalkError`] when the producer of an argument cannot be located.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use cflowkit::{
///     analysis::{recover_arguments, Literal, LocalValues, Value},
///     assembly::Instruction,
///     metadata::{ElementType, MemberRef, MethodSig, Token},
/// };
///
/// let sig = MethodSig::new(vec![ElementType::I4, ElementType::Boolean], ElementType::String);
/// let target = Arc::new(MemberRef::method(Token::new(0x0600_0002), "A", "B", sig.clone()));
/// let instrs = [
///     Instruction::ldc_i4(7),
///     Instruction::ldc_i4(1),
///     Instruction::call(target),
/// ];
/// let args = recover_arguments(&instrs, 2, &sig, &LocalValues::new())?;
/// assert_eq!(args.start, 0);
/// assert_eq!(args.slots[1].value, Value::Known(Literal::Bool(true)));
/// # Ok::<(), cflowkit::analysis::WalkError>(())
/// ```
pub fn recover_arguments(
    instrs: &[Instruction],
    call_index: usize,
    sig: &MethodSig,
    locals: &LocalValues,
) -> Result<RecoveredArguments, WalkError> {
    let count = sig.arg_count();
    let found = walk(instrs, call_index, count, locals)?;
    let start = found.last().map_or(call_index, |(start, _, _)| *start);

    let slots = found
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, (start, producer, value))| {
            let value = match (value, sig.arg_type(i)) {
                (Value::Known(literal), Some(ty)) => Value::Known(literal.coerce_to(ty)),
                (value, _) => value,
            };
            ArgumentSlot {
                value,
                start,
                producer,
            }
        })
        .collect();
    Ok(RecoveredArguments { slots, start })
}
