//! Instructions and the opcode set.
//!
//! Decoding from and encoding to bytes is done by the container layer; this
//! module only models what the rewriter reasons about: control flow, stack
//! effects and constant pushes.

mod instruction;
mod opcodes;

pub use instruction::{FlowType, Instruction, Operand, StackBehavior};
pub use opcodes::Opcode;
