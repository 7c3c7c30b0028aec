//! Nop block bypass for eliminating trampoline blocks.
//!
//! A nop block is a block that holds nothing but `nop`s and falls through
//! to a single successor. Folding calls and removing branches leaves many of
//! them behind. Every predecessor edge into such a block is redirected to
//! the block's successor; the block then has no predecessors and is
//! detached.
//!
//! # Example
//!
//! Before:
//! ```text
//! B0: ldarg.0; brtrue B1 | ft B2
//! B1: nop -> B3
//! B2: ...
//! ```
//!
//! After:
//! ```text
//! B0: ldarg.0; brtrue B3 | ft B2
//! B2: ...
//! ```
//!
//! A nop block is never bypassed when it is the entry, the head of a scope,
//! its own successor, or when the predecessor lies in a different scope.

use crate::{
    analysis::{BlockId, MethodCfg},
    compiler::{pass::CfgPass, EventKind, PassContext},
    metadata::Token,
    Result,
};

/// Maximum sweeps to prevent endless redirection between nop cycles.
const MAX_ITERATIONS: usize = 10;

/// Redirects edges around blocks that contain only `nop`s.
pub struct NopBlockPass;

impl Default for NopBlockPass {
    fn default() -> Self {
        Self::new()
    }
}

impl NopBlockPass {
    /// Creates a new nop block pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The successor a nop block can be bypassed to.
    fn bypass_target(cfg: &MethodCfg, block: BlockId) -> Option<BlockId> {
        let blk = cfg.block(block)?;
        if !blk.is_nop_block() || block == cfg.entry() || cfg.is_scope_head(block) {
            return None;
        }
        blk.fallthrough().filter(|&succ| succ != block)
    }

    /// Moves every edge `pred -> block` to `pred -> target`.
    ///
    /// Returns the number of edges moved.
    fn redirect(cfg: &mut MethodCfg, block: BlockId, target: BlockId) -> Result<usize> {
        let Some(scope) = cfg.block(block).map(|b| b.scope()) else {
            return Ok(0);
        };
        let preds: Vec<BlockId> = cfg
            .block(block)
            .map(|b| b.sources().to_vec())
            .unwrap_or_default();

        let mut moved = 0;
        for pred in preds {
            let Some(p) = cfg.block(pred) else {
                continue;
            };
            if pred == block || p.scope() != scope {
                continue;
            }
            let falls = p.fallthrough() == Some(block);
            let slots: Vec<usize> = p
                .targets()
                .iter()
                .enumerate()
                .filter(|(_, t)| **t == block)
                .map(|(i, _)| i)
                .collect();

            if falls {
                cfg.set_new_fallthrough(pred, Some(target))?;
                moved += 1;
            }
            for slot in slots {
                cfg.set_new_target(pred, slot, target)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Runs a single sweep over all blocks.
    ///
    /// Returns the number of changes made (redirected edges + removed blocks).
    fn run_iteration(&self, cfg: &mut MethodCfg, method: Token, ctx: &PassContext) -> Result<usize> {
        let mut changes = 0;
        let layout = cfg.layout().to_vec();

        for block in layout {
            let Some(target) = Self::bypass_target(cfg, block) else {
                continue;
            };
            let moved = Self::redirect(cfg, block, target)?;
            if moved > 0 {
                ctx.events
                    .record(EventKind::NopBlockBypassed)
                    .at(method, block.index())
                    .pass(self.name())
                    .message(format!("{moved} edge(s) redirected from {block} to {target}"));
                changes += moved;
            }
            if cfg.block(block).is_some_and(|b| b.sources().is_empty()) {
                cfg.remove_dead_block(block)?;
                ctx.events
                    .record(EventKind::BlockRemoved)
                    .at(method, block.index())
                    .pass(self.name())
                    .message(format!("removed bypassed nop block {block}"));
                changes += 1;
            }
        }
        Ok(changes)
    }
}

impl CfgPass for NopBlockPass {
    fn name(&self) -> &'static str {
        "nop-blocks"
    }

    fn description(&self) -> &'static str {
        "Redirects edges past blocks that contain only nops"
    }

    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool> {
        let method = cfg.token();
        let mut changed = false;

        for _ in 0..MAX_ITERATIONS {
            if self.run_iteration(cfg, method, ctx)? == 0 {
                break;
            }
            changed = true;
        }

        Ok(changed)
    }
}
