//! Unreachable block elimination.
//!
//! # Algorithm
//!
//! 1. Mark the entry block as root
//! 2. Walk successors; a handler or filter entry becomes a root once any
//!    block of the try scope it protects is reached
//! 3. Detach every block that was not reached
//!
//! Unreachable blocks may still have each other as predecessors (a dead
//! loop), so they are removed with
//! [`MethodCfg::remove_guaranteed_dead_block`].

use crate::{
    analysis::{BlockId, MethodCfg},
    compiler::{pass::CfgPass, EventKind, PassContext},
    Result,
};

/// Removes blocks that cannot be reached from the method entry.
pub struct DeadBlockPass;

impl Default for DeadBlockPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadBlockPass {
    /// Creates a new dead block pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CfgPass for DeadBlockPass {
    fn name(&self) -> &'static str {
        "dead-blocks"
    }

    fn description(&self) -> &'static str {
        "Removes blocks unreachable from the entry and from live handlers"
    }

    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool> {
        let reachable = cfg.reachable();
        let dead: Vec<BlockId> = cfg
            .layout()
            .iter()
            .copied()
            .filter(|id| !reachable.contains(id))
            .collect();

        for &block in &dead {
            let len = cfg.block(block).map_or(0, |b| b.len());
            cfg.remove_guaranteed_dead_block(block)?;
            ctx.events
                .record(EventKind::BlockRemoved)
                .at(cfg.token(), block.index())
                .pass(self.name())
                .message(format!("removed unreachable {block} ({len} instructions)"));
        }

        Ok(!dead.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::CfgBuilder,
        assembly::{Instruction, Opcode},
        metadata::{ExceptionRegion, Token},
        test::{create_body, create_cfg},
    };

    #[test]
    fn test_code_after_ret_is_removed() {
        // 0: ldc 1; 1: ret; 2: ldc 2; 3: ret
        let mut cfg = create_cfg(vec![
            Instruction::ldc_i4(1),
            Instruction::simple(Opcode::Ret),
            Instruction::ldc_i4(2),
            Instruction::simple(Opcode::Ret),
        ]);
        assert_eq!(cfg.block_count(), 2);

        let ctx = PassContext::new();
        assert!(DeadBlockPass::new().run_on_method(&mut cfg, &ctx).unwrap());
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(ctx.events.count_kind(EventKind::BlockRemoved), 1);
        cfg.check_invariants().unwrap();

        assert!(!DeadBlockPass::new().run_on_method(&mut cfg, &ctx).unwrap());
    }

    #[test]
    fn test_dead_loop_is_removed() {
        // 0: br 3 | 1: nop | 2: br 1 | 3: ret
        let mut cfg = create_cfg(vec![
            Instruction::branch(Opcode::Br, 3),
            Instruction::nop(),
            Instruction::branch(Opcode::Br, 1),
            Instruction::simple(Opcode::Ret),
        ]);
        let ctx = PassContext::new();
        assert!(DeadBlockPass::new().run_on_method(&mut cfg, &ctx).unwrap());
        assert_eq!(cfg.block_count(), 2);
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_handler_of_live_try_is_kept() {
        // try { 0: nop; 1: leave 4 } catch { 2: pop; 3: leave 4 } 4: ret
        let body = create_body(vec![
            Instruction::nop(),
            Instruction::branch(Opcode::Leave, 4),
            Instruction::simple(Opcode::Pop),
            Instruction::branch(Opcode::Leave, 4),
            Instruction::simple(Opcode::Ret),
        ])
        .with_regions(vec![ExceptionRegion::catch(
            (0, 2),
            (2, 4),
            Token::from_parts(Token::TYPE_REF, 1),
        )]);
        let mut cfg = CfgBuilder::build(&body).unwrap();
        let before = cfg.block_count();

        let ctx = PassContext::new();
        assert!(!DeadBlockPass::new().run_on_method(&mut cfg, &ctx).unwrap());
        assert_eq!(cfg.block_count(), before);
    }
}
