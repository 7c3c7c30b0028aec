//! Basic blocks and their handles.
//!
//! A [`Block`] can be inspected freely, but it cannot be mutated on its own:
//! its edges and instructions change only through [`super::MethodCfg`], which
//! keeps both ends of every edge in sync.

use std::fmt;

use crate::{analysis::cfg::ScopeId, assembly::Instruction};

/// A strongly-typed handle to a block of a [`super::MethodCfg`].
///
/// Handles are assigned sequentially when blocks are created and are never
/// reused, so a handle to a removed block stays invalid for the lifetime of
/// the graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a handle from a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        BlockId(index)
    }

    /// Returns the raw index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A basic block: a straight-line instruction run plus its edges.
///
/// A block either falls through, branches to explicit targets, both (two-way
/// conditionals and switches, where the fallthrough is the not-taken path),
/// or neither (returns, throws).
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) fallthrough: Option<BlockId>,
    pub(crate) targets: Option<Vec<BlockId>>,
    pub(crate) sources: Vec<BlockId>,
    pub(crate) scope: ScopeId,
    pub(crate) origin: Option<usize>,
}

impl Block {
    pub(crate) fn new(instructions: Vec<Instruction>, scope: ScopeId, origin: Option<usize>) -> Self {
        Self {
            instructions,
            fallthrough: None,
            targets: None,
            sources: Vec::new(),
            scope,
            origin,
        }
    }

    /// The instructions of this block.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if the block has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// First instruction, if any. See [`super::MethodCfg::first_instr`] for the
    /// variant that materializes a `nop`.
    #[must_use]
    pub fn first(&self) -> Option<&Instruction> {
        self.instructions.first()
    }

    /// Last instruction, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// The fallthrough successor.
    #[must_use]
    pub fn fallthrough(&self) -> Option<BlockId> {
        self.fallthrough
    }

    /// The explicit branch targets, in case order; empty when there are none.
    #[must_use]
    pub fn targets(&self) -> &[BlockId] {
        self.targets.as_deref().unwrap_or(&[])
    }

    /// Returns `true` when the block has an explicit target list.
    #[must_use]
    pub fn has_targets(&self) -> bool {
        self.targets.is_some()
    }

    /// Distinct predecessors, in no particular order.
    #[must_use]
    pub fn sources(&self) -> &[BlockId] {
        &self.sources
    }

    /// The innermost protected scope this block belongs to.
    #[must_use]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Index of the first instruction of this block in the body it was built from.
    #[must_use]
    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// All successor edges: fallthrough first, then targets in order.
    ///
    /// Parallel edges (a switch with two cases to the same block) are reported
    /// once per edge.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.fallthrough.into_iter().chain(self.targets().iter().copied())
    }

    /// Number of successor edges.
    #[must_use]
    pub fn successor_count(&self) -> usize {
        usize::from(self.fallthrough.is_some()) + self.targets().len()
    }

    /// Returns `true` if any edge leads to `block`.
    #[must_use]
    pub fn has_successor(&self, block: BlockId) -> bool {
        self.successors().any(|s| s == block)
    }

    /// The single successor, when the block has exactly one edge.
    #[must_use]
    pub fn only_target(&self) -> Option<BlockId> {
        match (self.fallthrough, self.targets()) {
            (Some(ft), []) => Some(ft),
            (None, [target]) => Some(*target),
            _ => None,
        }
    }

    /// Returns `true` when `block` is the one and only predecessor.
    #[must_use]
    pub fn is_only_source(&self, block: BlockId) -> bool {
        self.sources.len() == 1 && self.sources[0] == block
    }

    /// Returns `true` when the block only falls through (no explicit targets).
    #[must_use]
    pub fn is_fallthrough_only(&self) -> bool {
        self.fallthrough.is_some() && self.targets.is_none()
    }

    /// Returns `true` when the block purely falls through and holds nothing but `nop`s.
    #[must_use]
    pub fn is_nop_block(&self) -> bool {
        self.is_fallthrough_only() && self.instructions.iter().all(Instruction::is_nop)
    }

    /// Returns `true` when the block ends in a two-way conditional branch.
    #[must_use]
    pub fn is_two_way_conditional(&self) -> bool {
        self.fallthrough.is_some()
            && self.targets().len() == 1
            && self.last().is_some_and(Instruction::is_conditional_branch)
    }

    /// Number of instructions that are not `nop`.
    #[must_use]
    pub fn count_non_nops(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_nop()).count()
    }
}
