//! The flat method body exchanged with the surrounding container layer.

use crate::{
    assembly::{Instruction, Operand},
    metadata::{method::ExceptionRegion, token::Token},
};

/// A method body in flat form.
///
/// This is both the input of [`crate::analysis::CfgBuilder::build`] and the
/// output of [`crate::compiler::CfgCodeGenerator::generate`]. Branch operands
/// are instruction indices ([`Operand::Target`], [`Operand::Switch`]).
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Token of the method this body belongs to
    pub token: Token,
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Exception regions, nested regions first
    pub exception_regions: Vec<ExceptionRegion>,
}

impl MethodBody {
    /// Creates a body without exception regions.
    #[must_use]
    pub fn new(token: Token, instructions: Vec<Instruction>) -> Self {
        Self {
            token,
            instructions,
            exception_regions: Vec::new(),
        }
    }

    /// Adds exception regions to the body.
    #[must_use]
    pub fn with_regions(mut self, regions: Vec<ExceptionRegion>) -> Self {
        self.exception_regions = regions;
        self
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` when the body has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Iterates over every branch target index named by an instruction operand.
    pub fn branch_targets(&self) -> impl Iterator<Item = usize> + '_ {
        self.instructions
            .iter()
            .flat_map(|instr| match &instr.operand {
                Operand::Target(target) => vec![*target],
                Operand::Switch(targets) => targets.clone(),
                _ => Vec::new(),
            })
    }
}
