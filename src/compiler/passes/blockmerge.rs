//! Block merging pass for straight-line chains.
//!
//! Two blocks are merged when the first one's only successor is the second
//! and the second one's only predecessor is the first (see
//! [`MethodCfg::can_merge`]). Chains are absorbed into their head block one
//! link at a time.
//!
//! # Example
//!
//! Before:
//! ```text
//! B0: ldc 1 -> B1
//! B1: nop; ldc 2 -> B2
//! B2: add; ret
//! ```
//!
//! After:
//! ```text
//! B0: ldc 1; ldc 2; add; ret
//! ```

use crate::{
    analysis::{BlockId, MethodCfg},
    compiler::{pass::CfgPass, EventKind, PassContext},
    Result,
};

/// Merges blocks linked by a single unconditional edge.
pub struct BlockMergePass;

impl Default for BlockMergePass {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockMergePass {
    /// Creates a new block merging pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CfgPass for BlockMergePass {
    fn name(&self) -> &'static str {
        "block-merging"
    }

    fn description(&self) -> &'static str {
        "Merges blocks whose only edge connects them to each other"
    }

    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool> {
        let method = cfg.token();
        let mut merged = 0;
        let layout: Vec<BlockId> = cfg.layout().to_vec();

        for block in layout {
            if !cfg.contains(block) {
                continue;
            }
            while let Some(next) = cfg.block(block).and_then(|b| b.only_target()) {
                if !cfg.can_merge(block, next) {
                    break;
                }
                cfg.merge(block, next)?;
                ctx.events
                    .record(EventKind::BlockMerged)
                    .at(method, block.index())
                    .pass(self.name())
                    .message(format!("merged {next} into {block}"));
                merged += 1;
            }
        }

        Ok(merged > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ScopeId,
        assembly::{Instruction, Opcode, Operand},
        test::TEST_METHOD,
    };

    #[test]
    fn test_chain_merges_into_head() {
        let mut cfg = MethodCfg::new(TEST_METHOD, vec![Instruction::ldc_i4(1)]);
        let b0 = cfg.entry();
        let b1 = cfg.add_block(ScopeId::ROOT, vec![Instruction::nop(), Instruction::ldc_i4(2)]);
        let b2 = cfg.add_block(
            ScopeId::ROOT,
            vec![Instruction::simple(Opcode::Add), Instruction::simple(Opcode::Ret)],
        );
        cfg.set_new_fallthrough(b0, Some(b1)).unwrap();
        cfg.set_new_fallthrough(b1, Some(b2)).unwrap();

        let ctx = PassContext::new();
        assert!(BlockMergePass::new().run_on_method(&mut cfg, &ctx).unwrap());
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.block(b0).unwrap().len(), 4);
        assert_eq!(ctx.events.count_kind(EventKind::BlockMerged), 2);
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_join_point_is_not_merged() {
        // B0: brtrue B2 | ft B1; B1 -> B2; B2: ret
        let mut cfg = MethodCfg::new(
            TEST_METHOD,
            vec![
                Instruction::new(Opcode::Ldarg, Operand::Argument(0)),
                Instruction::new(Opcode::Brtrue, Operand::Linked),
            ],
        );
        let b0 = cfg.entry();
        let b1 = cfg.add_block(ScopeId::ROOT, vec![Instruction::ldc_i4(1)]);
        let b2 = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_targets(b0, Some(vec![b2])).unwrap();
        cfg.set_new_fallthrough(b0, Some(b1)).unwrap();
        cfg.set_new_fallthrough(b1, Some(b2)).unwrap();

        let ctx = PassContext::new();
        assert!(!BlockMergePass::new().run_on_method(&mut cfg, &ctx).unwrap());
        assert_eq!(cfg.block_count(), 3);
    }
}
