//! Conditional branch cleanup.
//!
//! Two rewrites on blocks ending in a two-way conditional:
//!
//! - **Fold**: both edges lead to the same block. The conditional is
//!   replaced by `pop`s for the values it consumed and a plain fallthrough.
//! - **Flip**: the taken target is the next block in layout but the
//!   fallthrough is not. The condition is inverted so that the flattened
//!   code falls through instead of jumping over an extra `br`.

use crate::{
    analysis::{BlockId, MethodCfg},
    assembly::{Instruction, Opcode},
    compiler::{pass::CfgPass, EventKind, PassContext},
    Result,
};

/// Folds degenerate conditionals and orients the rest towards layout order.
pub struct BranchLayoutPass;

impl Default for BranchLayoutPass {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchLayoutPass {
    /// Creates a new branch layout pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Replaces a conditional whose edges agree with `pop`s plus fallthrough.
    fn fold(cfg: &mut MethodCfg, block: BlockId, target: BlockId) -> Result<()> {
        let pops = cfg
            .block(block)
            .and_then(|b| b.last())
            .and_then(Instruction::stack_behavior)
            .map_or(0, |s| s.pops);
        cfg.replace_last_instrs_with_branch(block, 1, target)?;
        for _ in 0..pops {
            let end = cfg.block(block).map_or(0, |b| b.len());
            cfg.insert(block, end, Instruction::simple(Opcode::Pop))?;
        }
        Ok(())
    }
}

impl CfgPass for BranchLayoutPass {
    fn name(&self) -> &'static str {
        "branch-layout"
    }

    fn description(&self) -> &'static str {
        "Folds conditionals with equal edges and flips conditionals to fall through"
    }

    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool> {
        let method = cfg.token();
        let mut changed = false;
        let layout: Vec<BlockId> = cfg.layout().to_vec();

        for block in layout {
            let Some(blk) = cfg.block(block) else {
                continue;
            };
            if !blk.is_two_way_conditional() {
                continue;
            }
            let (Some(fallthrough), Some(&taken)) = (blk.fallthrough(), blk.targets().first())
            else {
                continue;
            };

            if taken == fallthrough {
                Self::fold(cfg, block, fallthrough)?;
                ctx.events
                    .record(EventKind::BranchSimplified)
                    .at(method, block.index())
                    .pass(self.name())
                    .message(format!("both edges of {block} lead to {taken}"));
                changed = true;
            } else if cfg.next_in_layout(block) == Some(taken)
                && cfg.can_flip_conditional_branch(block)
            {
                cfg.flip_conditional_branch(block)?;
                ctx.events
                    .record(EventKind::BranchFlipped)
                    .at(method, block.index())
                    .pass(self.name())
                    .message(format!("{block} now falls through to {taken}"));
                changed = true;
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ScopeId,
        assembly::Operand,
        test::TEST_METHOD,
    };

    fn conditional(opcode: Opcode) -> MethodCfg {
        MethodCfg::new(
            TEST_METHOD,
            vec![
                Instruction::new(Opcode::Ldarg, Operand::Argument(0)),
                Instruction::new(Opcode::Ldarg, Operand::Argument(1)),
                Instruction::new(opcode, Operand::Linked),
            ],
        )
    }

    #[test]
    fn test_flip_towards_next_block() {
        let mut cfg = conditional(Opcode::Blt);
        let b0 = cfg.entry();
        let next = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        let far = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_targets(b0, Some(vec![next])).unwrap();
        cfg.set_new_fallthrough(b0, Some(far)).unwrap();

        let ctx = PassContext::new();
        let pass = BranchLayoutPass::new();
        assert!(pass.run_on_method(&mut cfg, &ctx).unwrap());
        let blk = cfg.block(b0).unwrap();
        assert_eq!(blk.last().unwrap().opcode, Opcode::Bge);
        assert_eq!(blk.fallthrough(), Some(next));
        assert_eq!(blk.targets(), &[far]);

        assert!(!pass.run_on_method(&mut cfg, &ctx).unwrap());
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_equal_edges_fold_into_pops() {
        let mut cfg = conditional(Opcode::Beq);
        let b0 = cfg.entry();
        let join = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_targets(b0, Some(vec![join])).unwrap();
        cfg.set_new_fallthrough(b0, Some(join)).unwrap();

        let ctx = PassContext::new();
        assert!(BranchLayoutPass::new().run_on_method(&mut cfg, &ctx).unwrap());
        let blk = cfg.block(b0).unwrap();
        let ops: Vec<Opcode> = blk.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![Opcode::Ldarg, Opcode::Ldarg, Opcode::Pop, Opcode::Pop]);
        assert_eq!(blk.fallthrough(), Some(join));
        assert!(!blk.has_targets());
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_beq_is_not_flipped() {
        let mut cfg = conditional(Opcode::Beq);
        let b0 = cfg.entry();
        let next = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        let far = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_targets(b0, Some(vec![next])).unwrap();
        cfg.set_new_fallthrough(b0, Some(far)).unwrap();

        let ctx = PassContext::new();
        assert!(!BranchLayoutPass::new().run_on_method(&mut cfg, &ctx).unwrap());
    }
}
