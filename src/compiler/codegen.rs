//! Graph to flat body code generation.
//!
//! Reverses [`CfgBuilder`](crate::analysis::CfgBuilder): live blocks are
//! emitted in layout order, edges become branch operands again and exception
//! regions are recomputed from the blocks of their scopes.
//!
//! # Control transfer
//!
//! | Block ends in | Emitted |
//! |---------------|---------|
//! | conditional, fallthrough is next | `bcc taken` |
//! | conditional, taken is next, flippable | `!bcc fallthrough` |
//! | conditional, otherwise | `bcc taken; br fallthrough` |
//! | `switch` | `switch targets`, plus `br fallthrough` unless it is next |
//! | `br` / `leave` | unchanged |
//! | anything else | `br fallthrough` unless the fallthrough is next |
//!
//! An empty block is emitted as a single `nop` so that region boundaries
//! pointing at it stay addressable.

use std::collections::HashMap;

use crate::{
    analysis::{Block, BlockId, MethodCfg, ScopeId},
    assembly::{Instruction, Opcode, Operand},
    metadata::{ExceptionRegion, MethodBody},
    structural_error, Result,
};

/// Flattens a [`MethodCfg`] into a [`MethodBody`].
pub struct CfgCodeGenerator<'a> {
    cfg: &'a MethodCfg,
    instructions: Vec<Instruction>,
    /// Emitted branch index and the blocks it must point at.
    fixups: Vec<(usize, Vec<BlockId>)>,
    starts: HashMap<BlockId, usize>,
    ends: HashMap<BlockId, usize>,
}

impl<'a> CfgCodeGenerator<'a> {
    /// Flattens `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structural`] if an edge points at a removed
    /// block or a conditional has no fallthrough.
    pub fn generate(cfg: &'a MethodCfg) -> Result<MethodBody> {
        let mut generator = Self {
            cfg,
            instructions: Vec::with_capacity(cfg.instruction_count() + cfg.block_count()),
            fixups: Vec::new(),
            starts: HashMap::new(),
            ends: HashMap::new(),
        };

        let order: Vec<(BlockId, &Block)> = cfg.blocks().collect();
        for (pos, (id, block)) in order.iter().enumerate() {
            let next = order.get(pos + 1).map(|(next, _)| *next);
            generator.starts.insert(*id, generator.instructions.len());
            generator.emit_block(*id, block, next)?;
            generator.ends.insert(*id, generator.instructions.len());
        }

        generator.patch()?;
        let regions = generator.regions();
        Ok(MethodBody::new(cfg.token(), generator.instructions).with_regions(regions))
    }

    fn emit_branch(&mut self, opcode: Opcode, targets: Vec<BlockId>) {
        self.fixups.push((self.instructions.len(), targets));
        self.instructions.push(Instruction::new(opcode, Operand::Linked));
    }

    fn emit_block(&mut self, id: BlockId, block: &Block, next: Option<BlockId>) -> Result<()> {
        let instrs = block.instructions();
        let Some(last) = block.last() else {
            self.instructions.push(Instruction::nop());
            if let Some(ft) = block.fallthrough().filter(|ft| Some(*ft) != next) {
                self.emit_branch(Opcode::Br, vec![ft]);
            }
            return Ok(());
        };
        let body = &instrs[..instrs.len() - 1];

        if last.is_conditional_branch() {
            let (Some(ft), Some(&taken)) = (block.fallthrough(), block.targets().first()) else {
                return Err(structural_error!("conditional at the end of {id} lacks an edge"));
            };
            self.instructions.extend_from_slice(body);
            if Some(ft) == next {
                self.emit_branch(last.opcode, vec![taken]);
            } else if let Some(flipped) = last.opcode.flipped().filter(|_| Some(taken) == next) {
                self.emit_branch(flipped, vec![ft]);
            } else {
                self.emit_branch(last.opcode, vec![taken]);
                self.emit_branch(Opcode::Br, vec![ft]);
            }
        } else if last.is_switch() {
            self.instructions.extend_from_slice(body);
            self.emit_branch(last.opcode, block.targets().to_vec());
            if let Some(ft) = block.fallthrough().filter(|ft| Some(*ft) != next) {
                self.emit_branch(Opcode::Br, vec![ft]);
            }
        } else if last.is_branch() {
            self.instructions.extend_from_slice(body);
            self.emit_branch(last.opcode, block.targets().to_vec());
        } else {
            self.instructions.extend_from_slice(instrs);
            if let Some(ft) = block.fallthrough().filter(|ft| Some(*ft) != next) {
                self.emit_branch(Opcode::Br, vec![ft]);
            }
        }
        Ok(())
    }

    /// Resolves every recorded branch to the start index of its target block.
    fn patch(&mut self) -> Result<()> {
        for (index, targets) in std::mem::take(&mut self.fixups) {
            let mut resolved = Vec::with_capacity(targets.len());
            for target in targets {
                match self.starts.get(&target) {
                    Some(start) => resolved.push(*start),
                    None => return Err(structural_error!("branch to removed block {target}")),
                }
            }
            let instr = &mut self.instructions[index];
            instr.operand = if instr.is_switch() {
                Operand::Switch(resolved)
            } else {
                match resolved.as_slice() {
                    [target] => Operand::Target(*target),
                    _ => {
                        return Err(structural_error!(
                            "`{}` needs exactly one target, found {}",
                            instr.opcode,
                            resolved.len()
                        ))
                    }
                }
            };
        }
        Ok(())
    }

    /// Instruction range covered by the live blocks of `scope` and its children.
    fn scope_range(&self, scope: ScopeId) -> Option<(usize, usize)> {
        let scopes = self.cfg.scopes();
        self.cfg
            .blocks()
            .filter(|(_, block)| scopes.contains(scope, block.scope()))
            .filter_map(|(id, _)| Some((*self.starts.get(&id)?, *self.ends.get(&id)?)))
            .reduce(|(start, end), (s, e)| (start.min(s), end.max(e)))
    }

    fn regions(&self) -> Vec<ExceptionRegion> {
        self.cfg
            .regions()
            .iter()
            .filter_map(|region| {
                let (try_start, try_end) = self.scope_range(region.try_scope)?;
                let (handler_start, handler_end) = self.scope_range(region.handler_scope)?;
                let filter_start = match region.filter_scope {
                    Some(filter) => Some(self.scope_range(filter)?.0),
                    None => None,
                };
                Some(ExceptionRegion {
                    flags: region.flags,
                    try_start,
                    try_end,
                    filter_start,
                    handler_start,
                    handler_end,
                    catch_type: region.catch_type,
                })
            })
            .collect()
    }
}
