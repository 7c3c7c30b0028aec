//! The method graph and every operation that changes it.
//!
//! [`MethodCfg`] owns its blocks in an arena indexed by [`BlockId`]. All edge
//! changes go through the methods below, each of which updates the successor
//! side (`fallthrough`/`targets`) and the predecessor side (`sources`) in the
//! same call. After any successful mutation [`MethodCfg::check_invariants`]
//! holds; a mutation that finds the graph in an unexpected state returns
//! [`crate::Error::Structural`] instead.
//!
//! # Edge model
//!
//! - `fallthrough` is the not-taken path, `targets` are explicit destinations
//!   in case order
//! - Two-way conditionals and switches carry both; `br`/`leave` only targets;
//!   everything else at most a fallthrough
//! - `sources` holds each distinct predecessor once, however many parallel
//!   edges it has
//!
//! # Layout
//!
//! Besides edges the graph keeps a layout order, initially the order of the
//! original body. Flattening emits blocks in this order; removing a block
//! drops it from the layout, splitting inserts the new half right after the
//! original.

use std::collections::{HashSet, VecDeque};

use crate::{
    analysis::cfg::{Block, BlockId, RegionScopes, ScopeId, ScopeTree},
    assembly::{Instruction, Operand},
    metadata::Token,
    structural_error, Error, Result,
};

/// Control-flow graph of one method body.
#[derive(Debug, Clone)]
pub struct MethodCfg {
    token: Token,
    blocks: Vec<Option<Block>>,
    layout: Vec<BlockId>,
    entry: BlockId,
    scopes: ScopeTree,
    regions: Vec<RegionScopes>,
}

impl MethodCfg {
    /// Creates a graph with a single entry block holding `entry`.
    #[must_use]
    pub fn new(token: Token, entry: Vec<Instruction>) -> Self {
        let id = BlockId(0);
        Self {
            token,
            blocks: vec![Some(Block::new(entry, ScopeId::ROOT, Some(0)))],
            layout: vec![id],
            entry: id,
            scopes: ScopeTree::new(),
            regions: Vec::new(),
        }
    }

    /// Assembles a graph from unconnected blocks; the first block is the entry.
    pub(crate) fn from_parts(
        token: Token,
        blocks: Vec<Block>,
        scopes: ScopeTree,
        regions: Vec<RegionScopes>,
    ) -> Result<Self> {
        if blocks.is_empty() {
            return Err(Error::Empty);
        }
        Ok(Self {
            token,
            layout: (0..blocks.len()).map(BlockId).collect(),
            blocks: blocks.into_iter().map(Some).collect(),
            entry: BlockId(0),
            scopes,
            regions,
        })
    }

    /// Installs the scope tree and region table.
    pub fn set_scopes(&mut self, scopes: ScopeTree, regions: Vec<RegionScopes>) {
        self.scopes = scopes;
        self.regions = regions;
    }

    pub(crate) fn add_block_with_origin(
        &mut self,
        scope: ScopeId,
        instructions: Vec<Instruction>,
        origin: Option<usize>,
    ) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Some(Block::new(instructions, scope, origin)));
        self.layout.push(id);
        id
    }

    /// Appends an unconnected block to the end of the layout.
    pub fn add_block(&mut self, scope: ScopeId, instructions: Vec<Instruction>) -> BlockId {
        self.add_block_with_origin(scope, instructions, None)
    }

    /// Token of the method this graph was built from.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Looks up a live block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0).and_then(Option::as_ref)
    }

    /// Returns `true` if `id` names a live block.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.block(id).is_some()
    }

    /// Live blocks in layout order.
    #[must_use]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Iterates over live blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.layout
            .iter()
            .filter_map(move |&id| self.block(id).map(|b| (id, b)))
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Total number of instructions over all live blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks().map(|(_, b)| b.len()).sum()
    }

    /// Position of a block in the layout.
    #[must_use]
    pub fn position(&self, id: BlockId) -> Option<usize> {
        self.layout.iter().position(|&b| b == id)
    }

    /// The block laid out immediately after `id`.
    #[must_use]
    pub fn next_in_layout(&self, id: BlockId) -> Option<BlockId> {
        self.position(id)
            .and_then(|pos| self.layout.get(pos + 1))
            .copied()
    }

    /// The scope tree.
    #[must_use]
    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    /// Exception regions in handler-table order.
    #[must_use]
    pub fn regions(&self) -> &[RegionScopes] {
        &self.regions
    }

    fn get(&self, id: BlockId) -> Result<&Block> {
        self.block(id).ok_or(Error::InvalidBlock(id))
    }

    fn get_mut(&mut self, id: BlockId) -> Result<&mut Block> {
        self.blocks
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidBlock(id))
    }

    fn distinct_successors(block: &Block) -> Vec<BlockId> {
        let mut seen = Vec::with_capacity(block.successor_count());
        for succ in block.successors() {
            if !seen.contains(&succ) {
                seen.push(succ);
            }
        }
        seen
    }

    /// Registers `from` in `to.sources` if it is not there yet.
    fn link(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let target = self.get_mut(to)?;
        if !target.sources.contains(&from) {
            target.sources.push(from);
        }
        Ok(())
    }

    fn ensure_source(&self, from: BlockId, to: BlockId) -> Result<()> {
        if self.get(to)?.sources.contains(&from) {
            Ok(())
        } else {
            Err(structural_error!(
                "{from} has an edge to {to} but is missing from its sources"
            ))
        }
    }

    /// Drops `from` from `to.sources` once no edge between them is left.
    fn unlink(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        if self.get(from)?.has_successor(to) {
            return Ok(());
        }
        let target = self.get_mut(to)?;
        match target.sources.iter().position(|&s| s == from) {
            Some(pos) => {
                target.sources.swap_remove(pos);
                Ok(())
            }
            None => Err(structural_error!("{from} is not a source of {to}")),
        }
    }

    /// Removes every outgoing edge of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if a successor does not list `block` as
    /// a source; the graph is left unchanged in that case.
    pub fn disconnect_from_fallthrough_and_targets(&mut self, block: BlockId) -> Result<()> {
        let succs = Self::distinct_successors(self.get(block)?);
        for &succ in &succs {
            self.ensure_source(block, succ)?;
        }
        let blk = self.get_mut(block)?;
        blk.fallthrough = None;
        blk.targets = None;
        for succ in succs {
            self.unlink(block, succ)?;
        }
        Ok(())
    }

    /// Replaces the fallthrough edge of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the old fallthrough successor does not
    /// list `block` as a source, and [`Error::InvalidBlock`] for a dead target.
    pub fn set_new_fallthrough(&mut self, block: BlockId, target: Option<BlockId>) -> Result<()> {
        let old = self.get(block)?.fallthrough;
        if let Some(old) = old {
            self.ensure_source(block, old)?;
        }
        if let Some(target) = target {
            self.get(target)?;
        }
        self.get_mut(block)?.fallthrough = target;
        if let Some(old) = old {
            self.unlink(block, old)?;
        }
        if let Some(target) = target {
            self.link(block, target)?;
        }
        Ok(())
    }

    /// Replaces explicit target `index` of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if there is no such target or the old
    /// target does not list `block` as a source.
    pub fn set_new_target(&mut self, block: BlockId, index: usize, target: BlockId) -> Result<()> {
        let old = match self.get(block)?.targets().get(index) {
            Some(old) => *old,
            None => return Err(structural_error!("{block} has no target {index}")),
        };
        self.ensure_source(block, old)?;
        self.get(target)?;
        if let Some(targets) = self.get_mut(block)?.targets.as_mut() {
            targets[index] = target;
        }
        self.unlink(block, old)?;
        self.link(block, target)
    }

    /// Replaces the whole explicit target list of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if an old target does not list `block`
    /// as a source, and [`Error::InvalidBlock`] for a dead new target.
    pub fn set_new_targets(&mut self, block: BlockId, targets: Option<Vec<BlockId>>) -> Result<()> {
        let mut old: Vec<BlockId> = self.get(block)?.targets().to_vec();
        old.dedup();
        for &o in &old {
            self.ensure_source(block, o)?;
        }
        for &t in targets.iter().flatten() {
            self.get(t)?;
        }
        let new: Vec<BlockId> = targets.iter().flatten().copied().collect();
        self.get_mut(block)?.targets = targets;
        for o in old {
            if self.get(o)?.sources.contains(&block) {
                self.unlink(block, o)?;
            }
        }
        for t in new {
            self.link(block, t)?;
        }
        Ok(())
    }

    /// Deletes `count` instructions starting at `index`.
    ///
    /// When the removed range includes a trailing branch, the edges that
    /// branch decided between are disconnected as well; the caller must
    /// install new edges or leave the block a dead end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstructionRange`] if `index + count` exceeds the block.
    pub fn remove(&mut self, block: BlockId, index: usize, count: usize) -> Result<()> {
        let blk = self.get(block)?;
        let len = blk.len();
        if index.checked_add(count).is_none_or(|end| end > len) {
            return Err(Error::InstructionRange { index, count, len });
        }
        if count == 0 {
            return Ok(());
        }
        if index + count == len && blk.last().is_some_and(Instruction::is_branch) {
            self.disconnect_from_fallthrough_and_targets(block)?;
        }
        self.get_mut(block)?.instructions.drain(index..index + count);
        Ok(())
    }

    /// Replaces `count` instructions starting at `index` with `instr`.
    ///
    /// Branches cannot be spliced in this way; use
    /// [`MethodCfg::replace_last_instrs_with_branch`]. A terminator may only
    /// replace the tail of the block and drops all outgoing edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstructionRange`] for an out-of-bounds range and
    /// [`Error::Structural`] for a branch, or a terminator that would not end
    /// the block.
    pub fn replace(
        &mut self,
        block: BlockId,
        index: usize,
        count: usize,
        instr: Instruction,
    ) -> Result<()> {
        if instr.is_branch() {
            return Err(structural_error!(
                "cannot splice branch `{instr}` into {block}"
            ));
        }
        let len = self.get(block)?.len();
        if index.checked_add(count).is_none_or(|end| end > len) {
            return Err(Error::InstructionRange { index, count, len });
        }
        let terminates = instr.is_terminator();
        if terminates && index + count != len {
            return Err(structural_error!(
                "terminator `{instr}` must end {block}"
            ));
        }
        self.remove(block, index, count)?;
        if terminates {
            self.disconnect_from_fallthrough_and_targets(block)?;
        }
        self.get_mut(block)?.instructions.insert(index, instr);
        Ok(())
    }

    /// Inserts a non-branch instruction at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstructionRange`] past the end, or
    /// [`Error::Structural`] for a branch, a terminator that would not end the
    /// block, or an insertion after the block's trailing branch.
    pub fn insert(&mut self, block: BlockId, index: usize, instr: Instruction) -> Result<()> {
        let blk = self.get(block)?;
        let len = blk.len();
        if index > len {
            return Err(Error::InstructionRange {
                index,
                count: 0,
                len,
            });
        }
        if instr.is_branch() {
            return Err(structural_error!(
                "cannot insert branch `{instr}` into {block}"
            ));
        }
        if index == len && blk.last().is_some_and(|l| l.is_branch() || l.is_terminator()) {
            return Err(structural_error!("cannot append after the end of {block}"));
        }
        if instr.is_terminator() {
            if index != len {
                return Err(structural_error!(
                    "terminator `{instr}` must end {block}"
                ));
            }
            self.disconnect_from_fallthrough_and_targets(block)?;
        }
        self.get_mut(block)?.instructions.insert(index, instr);
        Ok(())
    }

    /// Replaces the operand of a non-branch instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] for branches and flat-form branch operands.
    pub fn set_operand(&mut self, block: BlockId, index: usize, operand: Operand) -> Result<()> {
        if matches!(
            operand,
            Operand::Target(_) | Operand::Switch(_) | Operand::Linked
        ) {
            return Err(structural_error!(
                "branch operands are owned by the edges of {block}"
            ));
        }
        let blk = self.get_mut(block)?;
        let len = blk.instructions.len();
        let instr = blk
            .instructions
            .get_mut(index)
            .ok_or(Error::InstructionRange {
                index,
                count: 1,
                len,
            })?;
        if instr.is_branch() {
            return Err(structural_error!(
                "operand of `{instr}` in {block} is owned by its edges"
            ));
        }
        instr.operand = operand;
        Ok(())
    }

    /// Commits a branch decision: drops all edges, deletes the last `count`
    /// instructions and installs a single fallthrough edge to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstructionRange`] if the block is shorter than
    /// `count`, and [`Error::Structural`] if the instruction left at the end
    /// would still be a branch or terminator.
    pub fn replace_last_instrs_with_branch(
        &mut self,
        block: BlockId,
        count: usize,
        target: BlockId,
    ) -> Result<()> {
        let blk = self.get(block)?;
        let len = blk.len();
        if count > len {
            return Err(Error::InstructionRange {
                index: 0,
                count,
                len,
            });
        }
        if len > count {
            let remaining = &blk.instructions[len - count - 1];
            if remaining.is_branch() || remaining.is_terminator() {
                return Err(structural_error!(
                    "`{remaining}` would be left at the end of {block}"
                ));
            }
        }
        self.get(target)?;
        self.disconnect_from_fallthrough_and_targets(block)?;
        let blk = self.get_mut(block)?;
        blk.instructions.truncate(len - count);
        blk.fallthrough = Some(target);
        self.link(block, target)
    }

    /// Replaces a trailing two-way conditional with a jump to the taken or
    /// not-taken successor.
    ///
    /// The values popped by the conditional are left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the block does not end in a two-way conditional.
    pub fn replace_bcc_with_branch(&mut self, block: BlockId, taken: bool) -> Result<()> {
        let blk = self.get(block)?;
        if !blk.is_two_way_conditional() {
            return Err(structural_error!("{block} does not end in a conditional branch"));
        }
        let target = if taken {
            blk.targets()[0]
        } else {
            match blk.fallthrough {
                Some(ft) => ft,
                None => return Err(structural_error!("{block} has no fallthrough")),
            }
        };
        self.replace_last_instrs_with_branch(block, 1, target)
    }

    /// Replaces a trailing `switch` with a jump to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the block does not end in a `switch`.
    pub fn replace_switch_with_branch(&mut self, block: BlockId, target: BlockId) -> Result<()> {
        if !self.get(block)?.last().is_some_and(Instruction::is_switch) {
            return Err(structural_error!("{block} does not end in a switch"));
        }
        self.replace_last_instrs_with_branch(block, 1, target)
    }

    /// Turns a trailing `br` into a fallthrough edge to the same block.
    ///
    /// Returns `true` if a `br` was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if a trailing `br` does not have exactly
    /// one target and no fallthrough.
    pub fn remove_last_br(&mut self, block: BlockId) -> Result<bool> {
        let blk = self.get_mut(block)?;
        if !blk.last().is_some_and(Instruction::is_br) {
            return Ok(false);
        }
        let target = match (blk.fallthrough, blk.targets.as_deref()) {
            (None, Some([target])) => *target,
            _ => return Err(structural_error!("{block} ends in br with unexpected edges")),
        };
        blk.targets = None;
        blk.fallthrough = Some(target);
        blk.instructions.pop();
        Ok(true)
    }

    /// Materializes and returns the first instruction; an empty block gets a `nop`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] for a dead block.
    pub fn first_instr(&mut self, block: BlockId) -> Result<&Instruction> {
        let blk = self.get_mut(block)?;
        if blk.instructions.is_empty() {
            blk.instructions.push(Instruction::nop());
        }
        blk.instructions
            .first()
            .ok_or(Error::InvalidBlock(block))
    }

    /// Materializes and returns the last instruction; an empty block gets a `nop`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] for a dead block.
    pub fn last_instr(&mut self, block: BlockId) -> Result<&Instruction> {
        let blk = self.get_mut(block)?;
        if blk.instructions.is_empty() {
            blk.instructions.push(Instruction::nop());
        }
        blk.instructions.last().ok_or(Error::InvalidBlock(block))
    }

    /// The first block in layout order that belongs to `scope` or a scope nested in it.
    #[must_use]
    pub fn scope_head(&self, scope: ScopeId) -> Option<BlockId> {
        self.blocks()
            .find(|(_, b)| self.scopes.contains(scope, b.scope))
            .map(|(id, _)| id)
    }

    /// Returns `true` if `block` is where some scope containing it begins.
    ///
    /// The method entry counts as the head of the method scope.
    #[must_use]
    pub fn is_scope_head(&self, block: BlockId) -> bool {
        let Some(blk) = self.block(block) else {
            return false;
        };
        self.scopes
            .ancestors(blk.scope)
            .any(|scope| self.scope_head(scope) == Some(block))
    }

    /// Returns `true` when `other` is `block`'s only successor and `block`
    /// ends in something that simply continues (a `br` or a fallthrough
    /// instruction, never `leave`).
    #[must_use]
    pub fn can_append(&self, block: BlockId, other: BlockId) -> bool {
        if block == other {
            return false;
        }
        let Some(blk) = self.block(block) else {
            return false;
        };
        if blk.only_target() != Some(other) {
            return false;
        }
        match blk.last() {
            None => true,
            Some(last) => last.is_br() || last.is_fallthrough(),
        }
    }

    /// Returns `true` when `other` can be merged into `block`.
    ///
    /// Besides [`MethodCfg::can_append`], `block` must be `other`'s only
    /// predecessor, both must sit in the same scope, and `other` must not be
    /// the head of any scope.
    #[must_use]
    pub fn can_merge(&self, block: BlockId, other: BlockId) -> bool {
        if !self.can_append(block, other) || other == self.entry {
            return false;
        }
        let (Some(a), Some(b)) = (self.block(block), self.block(other)) else {
            return false;
        };
        b.is_only_source(block) && a.scope == b.scope && !self.is_scope_head(other)
    }

    /// Merges `other` into `block`.
    ///
    /// A trailing `br` of `block` is dropped, `other`'s non-`nop`
    /// instructions are appended, `block` takes over `other`'s outgoing edges
    /// and `other` is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if [`MethodCfg::can_merge`] does not hold.
    pub fn merge(&mut self, block: BlockId, other: BlockId) -> Result<()> {
        if !self.can_merge(block, other) {
            return Err(structural_error!("{block} cannot absorb {other}"));
        }
        let absorbed = self.detach_slot(other)?;

        let blk = self.get_mut(block)?;
        if blk.last().is_some_and(Instruction::is_br) {
            blk.instructions.pop();
        }
        blk.instructions
            .extend(absorbed.instructions.iter().filter(|i| !i.is_nop()).cloned());
        blk.fallthrough = absorbed.fallthrough;
        blk.targets = absorbed.targets.clone();

        for succ in Self::distinct_successors(&absorbed) {
            let target = self.get_mut(succ)?;
            target.sources.retain(|&s| s != other);
            if !target.sources.contains(&block) {
                target.sources.push(block);
            }
        }
        Ok(())
    }

    /// Returns `true` if `block` ends in a two-way conditional with an inverse opcode.
    #[must_use]
    pub fn can_flip_conditional_branch(&self, block: BlockId) -> bool {
        self.block(block).is_some_and(|b| {
            b.is_two_way_conditional() && b.last().is_some_and(|l| l.opcode.flipped().is_some())
        })
    }

    /// Inverts the sense of a trailing two-way conditional and swaps its two edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the block does not end in a flippable
    /// two-way conditional.
    pub fn flip_conditional_branch(&mut self, block: BlockId) -> Result<()> {
        let blk = self.get_mut(block)?;
        if !blk.is_two_way_conditional() {
            return Err(structural_error!("{block} does not end in a two-way conditional"));
        }
        let (Some(last), Some(fallthrough), Some(targets)) = (
            blk.instructions.last_mut(),
            blk.fallthrough.as_mut(),
            blk.targets.as_mut(),
        ) else {
            return Err(structural_error!("{block} does not end in a two-way conditional"));
        };
        let Some(flipped) = last.opcode.flipped() else {
            return Err(structural_error!("`{}` has no inverse", last.opcode));
        };
        last.opcode = flipped;
        std::mem::swap(fallthrough, &mut targets[0]);
        Ok(())
    }

    fn detach_slot(&mut self, block: BlockId) -> Result<Block> {
        let blk = self
            .blocks
            .get_mut(block.0)
            .and_then(Option::take)
            .ok_or(Error::InvalidBlock(block))?;
        self.layout.retain(|&b| b != block);
        Ok(blk)
    }

    /// Removes a block that has no predecessors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if the block still has sources or is the entry.
    pub fn remove_dead_block(&mut self, block: BlockId) -> Result<()> {
        if !self.get(block)?.sources.is_empty() {
            return Err(structural_error!("{block} still has predecessors"));
        }
        self.remove_guaranteed_dead_block(block)
    }

    /// Removes a block known to be unreachable, without checking its sources.
    ///
    /// Edges from remaining predecessors into the block are dropped as well,
    /// so those predecessors must be unreachable too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] for the entry block.
    pub fn remove_guaranteed_dead_block(&mut self, block: BlockId) -> Result<()> {
        if block == self.entry {
            return Err(structural_error!("the entry block {block} cannot be removed"));
        }
        let blk = self.detach_slot(block)?;
        for succ in Self::distinct_successors(&blk) {
            if let Some(target) = self.blocks.get_mut(succ.0).and_then(Option::as_mut) {
                target.sources.retain(|&s| s != block);
            }
        }
        for pred in blk.sources {
            if let Some(source) = self.blocks.get_mut(pred.0).and_then(Option::as_mut) {
                if source.fallthrough == Some(block) {
                    source.fallthrough = None;
                }
                if let Some(targets) = source.targets.as_mut() {
                    targets.retain(|&t| t != block);
                    if targets.is_empty() {
                        source.targets = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Splits `block` before instruction `index`.
    ///
    /// The new block receives the instructions from `index` on and all
    /// outgoing edges; `block` falls through to it. The new block is laid out
    /// directly after `block` and shares its scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstructionRange`] unless `0 < index < len`.
    pub fn split(&mut self, block: BlockId, index: usize) -> Result<BlockId> {
        let new_id = BlockId(self.blocks.len());
        let blk = self.get_mut(block)?;
        let len = blk.instructions.len();
        if index == 0 || index >= len {
            return Err(Error::InstructionRange {
                index,
                count: 0,
                len,
            });
        }
        let mut tail = Block::new(
            blk.instructions.split_off(index),
            blk.scope,
            blk.origin.map(|o| o + index),
        );
        tail.fallthrough = blk.fallthrough.take();
        tail.targets = blk.targets.take();
        blk.fallthrough = Some(new_id);
        let succs = Self::distinct_successors(&tail);
        tail.sources.push(block);

        self.blocks.push(Some(tail));
        let pos = self.position(block).map_or(self.layout.len(), |p| p + 1);
        self.layout.insert(pos, new_id);

        for succ in succs {
            let target = self.get_mut(succ)?;
            for source in &mut target.sources {
                if *source == block {
                    *source = new_id;
                }
            }
        }
        Ok(new_id)
    }

    /// Blocks reachable from the entry.
    ///
    /// Handler and filter entries become roots as soon as any block of the
    /// try scope they protect is reachable.
    #[must_use]
    pub fn reachable(&self) -> HashSet<BlockId> {
        let mut seen: HashSet<BlockId> = HashSet::new();
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        queue.push_back(self.entry);

        loop {
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(blk) = self.block(id) {
                    queue.extend(blk.successors().filter(|s| !seen.contains(s)));
                }
            }

            for region in &self.regions {
                let try_live = seen.iter().any(|&id| {
                    self.block(id)
                        .is_some_and(|b| self.scopes.contains(region.try_scope, b.scope))
                });
                if !try_live {
                    continue;
                }
                let heads = [Some(region.handler_scope), region.filter_scope];
                for scope in heads.into_iter().flatten() {
                    if let Some(head) = self.scope_head(scope) {
                        if !seen.contains(&head) {
                            queue.push_back(head);
                        }
                    }
                }
            }

            if queue.is_empty() {
                return seen;
            }
        }
    }

    /// Verifies every edge, layout and instruction-placement invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] describing the first violation found.
    pub fn check_invariants(&self) -> Result<()> {
        if self.layout.first() != Some(&self.entry) || !self.contains(self.entry) {
            return Err(structural_error!("entry {} is not the first live block", self.entry));
        }
        let live = self.blocks.iter().filter(|b| b.is_some()).count();
        if live != self.layout.len() {
            return Err(structural_error!(
                "{} live blocks but {} in layout",
                live,
                self.layout.len()
            ));
        }

        for (id, blk) in self.blocks() {
            for succ in blk.successors() {
                let target = self.get(succ).map_err(|_| {
                    structural_error!("{id} has an edge to removed block {succ}")
                })?;
                let count = target.sources.iter().filter(|&&s| s == id).count();
                if count != 1 {
                    return Err(structural_error!(
                        "{id} appears {count} times in the sources of {succ}"
                    ));
                }
            }
            for &pred in &blk.sources {
                let source = self.get(pred).map_err(|_| {
                    structural_error!("{id} lists removed block {pred} as a source")
                })?;
                if !source.has_successor(id) {
                    return Err(structural_error!("{pred} is a source of {id} without an edge"));
                }
            }

            if let Some((_, body)) = blk.instructions.split_last() {
                if let Some(bad) = body.iter().find(|i| i.is_branch() || i.is_terminator()) {
                    return Err(structural_error!("`{bad}` in the middle of {id}"));
                }
            }

            let last = blk.last();
            let ends_in_branch = last.is_some_and(Instruction::is_branch);
            match (blk.fallthrough.is_some(), blk.targets.as_deref()) {
                (true, Some(targets)) => {
                    let two_way = last.is_some_and(Instruction::is_conditional_branch)
                        && targets.len() == 1;
                    let switch = last.is_some_and(Instruction::is_switch);
                    if !two_way && !switch {
                        return Err(structural_error!(
                            "{id} has both edge kinds without ending in a conditional"
                        ));
                    }
                }
                (false, Some(targets)) => {
                    if !ends_in_branch || targets.is_empty() {
                        return Err(structural_error!("{id} has targets without a branch"));
                    }
                }
                (_, None) => {
                    if ends_in_branch {
                        return Err(structural_error!("{id} ends in a branch without targets"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::Opcode;

    fn linked(opcode: Opcode) -> Instruction {
        Instruction::new(opcode, Operand::Linked)
    }

    /// B0: ldarg; brtrue -> B2 | ft B1
    /// B1: ldc 1; ft B3
    /// B2: ldc 2; ft B3
    /// B3: ret
    fn diamond() -> (MethodCfg, [BlockId; 4]) {
        let mut cfg = MethodCfg::new(
            Token::new(0x0600_0001),
            vec![Instruction::ldarg(0), linked(Opcode::Brtrue)],
        );
        let b0 = cfg.entry();
        let b1 = cfg.add_block(ScopeId::ROOT, vec![Instruction::ldc_i4(1)]);
        let b2 = cfg.add_block(ScopeId::ROOT, vec![Instruction::ldc_i4(2)]);
        let b3 = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_fallthrough(b0, Some(b1)).unwrap();
        cfg.set_new_targets(b0, Some(vec![b2])).unwrap();
        cfg.set_new_fallthrough(b1, Some(b3)).unwrap();
        cfg.set_new_fallthrough(b2, Some(b3)).unwrap();
        cfg.check_invariants().unwrap();
        (cfg, [b0, b1, b2, b3])
    }

    #[test]
    fn test_sources_track_edges() {
        let (cfg, [b0, b1, b2, b3]) = diamond();
        assert_eq!(cfg.block(b1).unwrap().sources(), &[b0]);
        assert_eq!(cfg.block(b2).unwrap().sources(), &[b0]);
        let mut joins = cfg.block(b3).unwrap().sources().to_vec();
        joins.sort();
        assert_eq!(joins, vec![b1, b2]);
    }

    #[test]
    fn test_set_new_fallthrough_moves_source() {
        let (mut cfg, [_, b1, b2, b3]) = diamond();
        cfg.set_new_fallthrough(b1, Some(b2)).unwrap();
        assert_eq!(cfg.block(b3).unwrap().sources(), &[b2]);
        assert!(cfg.block(b2).unwrap().sources().contains(&b1));
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_missing_source_is_structural() {
        let (mut cfg, [_, b1, _, b3]) = diamond();
        cfg.get_mut(b3).unwrap().sources.retain(|&s| s != b1);
        let err = cfg.set_new_fallthrough(b1, None).unwrap_err();
        assert!(matches!(err, Error::Structural { .. }));
        // Nothing was changed by the failed call.
        assert_eq!(cfg.block(b1).unwrap().fallthrough(), Some(b3));
    }

    #[test]
    fn test_set_new_target() {
        let (mut cfg, [b0, b1, b2, b3]) = diamond();
        cfg.set_new_target(b0, 0, b3).unwrap();
        assert_eq!(cfg.block(b0).unwrap().targets(), &[b3]);
        assert!(cfg.block(b2).unwrap().sources().is_empty());
        assert!(cfg.block(b3).unwrap().sources().contains(&b0));
        assert!(cfg.set_new_target(b1, 0, b3).is_err());
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_parallel_edges_keep_one_source() {
        let (mut cfg, [b0, b1, b2, _]) = diamond();
        cfg.set_new_target(b0, 0, b1).unwrap();
        assert_eq!(cfg.block(b1).unwrap().sources(), &[b0]);
        cfg.check_invariants().unwrap();

        // Dropping one of the two parallel edges keeps the source entry.
        cfg.set_new_target(b0, 0, b2).unwrap();
        assert_eq!(cfg.block(b1).unwrap().sources(), &[b0]);
        assert_eq!(cfg.block(b2).unwrap().sources(), &[b0]);
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_trailing_conditional_disconnects() {
        let (mut cfg, [b0, b1, b2, _]) = diamond();
        cfg.remove(b0, 1, 1).unwrap();
        let blk = cfg.block(b0).unwrap();
        assert_eq!(blk.fallthrough(), None);
        assert!(!blk.has_targets());
        assert!(cfg.block(b1).unwrap().sources().is_empty());
        assert!(cfg.block(b2).unwrap().sources().is_empty());
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_out_of_bounds() {
        let (mut cfg, [b0, ..]) = diamond();
        let err = cfg.remove(b0, 1, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::InstructionRange {
                index: 1,
                count: 2,
                len: 2
            }
        ));
        assert!(cfg.remove(b0, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_replace_rejects_branch_and_misplaced_terminator() {
        let (mut cfg, [b0, b1, ..]) = diamond();
        assert!(cfg.replace(b1, 0, 1, linked(Opcode::Br)).is_err());
        assert!(cfg.replace(b0, 0, 1, Instruction::simple(Opcode::Ret)).is_err());

        cfg.replace(b1, 0, 1, Instruction::ldc_i4(9)).unwrap();
        assert_eq!(cfg.block(b1).unwrap().instructions(), &[Instruction::ldc_i4(9)]);
    }

    #[test]
    fn test_replace_tail_with_terminator_drops_edges() {
        let (mut cfg, [_, b1, _, b3]) = diamond();
        cfg.insert(b1, 1, Instruction::simple(Opcode::Throw)).unwrap();
        assert_eq!(cfg.block(b1).unwrap().fallthrough(), None);
        assert!(!cfg.block(b3).unwrap().sources().contains(&b1));
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_replace_last_instrs_with_branch() {
        let (mut cfg, [b0, b1, b2, b3]) = diamond();
        cfg.replace_last_instrs_with_branch(b0, 2, b3).unwrap();
        let blk = cfg.block(b0).unwrap();
        assert!(blk.is_empty());
        assert_eq!(blk.fallthrough(), Some(b3));
        assert!(!blk.has_targets());
        assert!(cfg.block(b1).unwrap().sources().is_empty());
        assert!(cfg.block(b2).unwrap().sources().is_empty());
        assert!(cfg.block(b3).unwrap().sources().contains(&b0));
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_replace_bcc_with_branch() {
        let (mut cfg, [b0, b1, b2, _]) = diamond();
        cfg.replace_bcc_with_branch(b0, true).unwrap();
        let blk = cfg.block(b0).unwrap();
        assert_eq!(blk.fallthrough(), Some(b2));
        assert_eq!(blk.instructions(), &[Instruction::ldarg(0)]);
        assert!(cfg.block(b1).unwrap().sources().is_empty());
        assert!(cfg.replace_bcc_with_branch(b0, false).is_err());
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_replace_switch_with_branch() {
        let mut cfg = MethodCfg::new(
            Token::new(0x0600_0002),
            vec![Instruction::ldarg(0), linked(Opcode::Switch)],
        );
        let entry = cfg.entry();
        let a = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        let b = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_fallthrough(entry, Some(a)).unwrap();
        cfg.set_new_targets(entry, Some(vec![b, b, a])).unwrap();
        cfg.check_invariants().unwrap();

        cfg.replace_switch_with_branch(entry, b).unwrap();
        assert_eq!(cfg.block(entry).unwrap().only_target(), Some(b));
        assert!(cfg.block(a).unwrap().sources().is_empty());
        assert_eq!(cfg.block(b).unwrap().sources(), &[entry]);
        cfg.check_invariants().unwrap();
        assert!(cfg.replace_switch_with_branch(entry, a).is_err());
    }

    #[test]
    fn test_remove_last_br() {
        let mut cfg = MethodCfg::new(Token::new(1), vec![Instruction::nop(), linked(Opcode::Br)]);
        let entry = cfg.entry();
        let next = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_targets(entry, Some(vec![next])).unwrap();
        assert!(cfg.remove_last_br(entry).unwrap());
        let blk = cfg.block(entry).unwrap();
        assert_eq!(blk.fallthrough(), Some(next));
        assert!(!blk.has_targets());
        assert_eq!(blk.len(), 1);
        assert!(!cfg.remove_last_br(entry).unwrap());
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_flip_is_involution() {
        let (mut cfg, [b0, ..]) = diamond();
        let before = cfg.block(b0).unwrap().clone();
        cfg.flip_conditional_branch(b0).unwrap();
        let flipped = cfg.block(b0).unwrap();
        assert_eq!(flipped.last().unwrap().opcode, Opcode::Brfalse);
        assert_eq!(flipped.fallthrough(), before.targets().first().copied());
        assert_eq!(flipped.targets(), &[before.fallthrough().unwrap()]);
        cfg.check_invariants().unwrap();

        cfg.flip_conditional_branch(b0).unwrap();
        assert_eq!(cfg.block(b0).unwrap(), &before);
    }

    #[test]
    fn test_flip_rejects_equality_branch() {
        let (mut cfg, [b0, ..]) = diamond();
        cfg.get_mut(b0).unwrap().instructions[1].opcode = Opcode::Beq;
        assert!(!cfg.can_flip_conditional_branch(b0));
        assert!(cfg.flip_conditional_branch(b0).is_err());
    }

    #[test]
    fn test_merge_adopts_edges() {
        let (mut cfg, [_, b1, _, b3]) = diamond();
        let tail = cfg.add_block(ScopeId::ROOT, vec![Instruction::nop(), Instruction::simple(Opcode::Pop)]);
        cfg.set_new_fallthrough(b3, None).unwrap();
        cfg.replace(b3, 0, 1, Instruction::ldc_i4(5)).unwrap();
        cfg.set_new_fallthrough(b3, Some(tail)).unwrap();
        let exit = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_fallthrough(tail, Some(exit)).unwrap();
        cfg.check_invariants().unwrap();

        assert!(!cfg.can_merge(b1, b3), "b3 has two predecessors");
        assert!(cfg.can_merge(b3, tail));
        cfg.merge(b3, tail).unwrap();

        let blk = cfg.block(b3).unwrap();
        assert_eq!(
            blk.instructions(),
            &[Instruction::ldc_i4(5), Instruction::simple(Opcode::Pop)]
        );
        assert_eq!(blk.fallthrough(), Some(exit));
        assert_eq!(cfg.block(exit).unwrap().sources(), &[b3]);
        assert!(!cfg.contains(tail));
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_merge_never_crosses_leave() {
        let mut cfg = MethodCfg::new(Token::new(1), vec![linked(Opcode::Leave)]);
        let entry = cfg.entry();
        let next = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
        cfg.set_new_targets(entry, Some(vec![next])).unwrap();
        assert!(!cfg.can_append(entry, next));
        assert!(cfg.merge(entry, next).is_err());
    }

    #[test]
    fn test_dead_block_removal_safety() {
        let (mut cfg, [b0, b1, _, b3]) = diamond();
        assert!(matches!(
            cfg.remove_dead_block(b1),
            Err(Error::Structural { .. })
        ));
        assert!(cfg.remove_dead_block(b0).is_err(), "entry is never dead");
        assert!(cfg.contains(b1));

        cfg.replace_bcc_with_branch(b0, true).unwrap();
        cfg.remove_dead_block(b1).unwrap();
        assert!(!cfg.contains(b1));
        assert!(!cfg.block(b3).unwrap().sources().contains(&b1));
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_guaranteed_dead_cycle() {
        let (mut cfg, [b0, ..]) = diamond();
        let x = cfg.add_block(ScopeId::ROOT, vec![Instruction::nop()]);
        let y = cfg.add_block(ScopeId::ROOT, vec![Instruction::nop()]);
        cfg.set_new_fallthrough(x, Some(y)).unwrap();
        cfg.set_new_fallthrough(y, Some(x)).unwrap();

        let live = cfg.reachable();
        assert!(live.contains(&b0));
        assert!(!live.contains(&x) && !live.contains(&y));

        cfg.remove_guaranteed_dead_block(x).unwrap();
        cfg.remove_guaranteed_dead_block(y).unwrap();
        cfg.check_invariants().unwrap();
        assert_eq!(cfg.block_count(), 4);
    }

    #[test]
    fn test_split_moves_edges() {
        let (mut cfg, [b0, b1, b2, _]) = diamond();
        let tail = cfg.split(b0, 1).unwrap();
        assert_eq!(cfg.layout()[1], tail);
        assert_eq!(cfg.block(b0).unwrap().instructions(), &[Instruction::ldarg(0)]);
        assert_eq!(cfg.block(b0).unwrap().only_target(), Some(tail));
        assert_eq!(cfg.block(tail).unwrap().fallthrough(), Some(b1));
        assert_eq!(cfg.block(b1).unwrap().sources(), &[tail]);
        assert_eq!(cfg.block(b2).unwrap().sources(), &[tail]);
        cfg.check_invariants().unwrap();

        assert!(cfg.split(b0, 0).is_err());
        assert!(cfg.split(b0, 1).is_err());
    }

    #[test]
    fn test_split_self_loop() {
        let mut cfg = MethodCfg::new(Token::new(1), vec![Instruction::nop(), Instruction::nop()]);
        let entry = cfg.entry();
        let body = cfg.add_block(
            ScopeId::ROOT,
            vec![Instruction::ldc_i4(1), Instruction::simple(Opcode::Pop)],
        );
        cfg.set_new_fallthrough(entry, Some(body)).unwrap();
        cfg.set_new_fallthrough(body, Some(body)).unwrap();
        cfg.check_invariants().unwrap();

        let tail = cfg.split(body, 1).unwrap();
        assert_eq!(cfg.block(tail).unwrap().fallthrough(), Some(body));
        let mut preds = cfg.block(body).unwrap().sources().to_vec();
        preds.sort();
        assert_eq!(preds, vec![entry, tail]);
        cfg.check_invariants().unwrap();
    }

    #[test]
    fn test_first_instr_materializes_nop() {
        let (mut cfg, [b0, _, _, b3]) = diamond();
        cfg.replace_last_instrs_with_branch(b0, 2, b3).unwrap();
        assert!(cfg.block(b0).unwrap().is_empty());
        assert!(cfg.first_instr(b0).unwrap().is_nop());
        assert_eq!(cfg.block(b0).unwrap().len(), 1);
        assert!(cfg.last_instr(b0).unwrap().is_nop());
        assert_eq!(cfg.block(b0).unwrap().len(), 1);
    }

    #[test]
    fn test_set_operand() {
        let (mut cfg, [b0, b1, ..]) = diamond();
        cfg.set_operand(b1, 0, Operand::Int32(42)).unwrap();
        assert_eq!(cfg.block(b1).unwrap().instructions()[0], Instruction::ldc_i4(42));
        assert!(cfg.set_operand(b0, 1, Operand::Int32(0)).is_err());
        assert!(cfg.set_operand(b1, 0, Operand::Target(3)).is_err());
        assert!(cfg.set_operand(b1, 4, Operand::Int32(0)).is_err());
    }

    #[test]
    fn test_invariant_check_catches_dangling_source() {
        let (mut cfg, [_, b1, _, b3]) = diamond();
        cfg.get_mut(b1).unwrap().fallthrough = None;
        let err = cfg.check_invariants().unwrap_err();
        assert!(err.to_string().contains(&format!("source of {b3}")));
    }
}
