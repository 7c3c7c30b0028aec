//! Partitioning of a flat method body into a [`MethodCfg`].
//!
//! Construction runs in three steps:
//!
//! 1. **Validation and leaders** - every branch target, every instruction
//!    after a branch or terminator, and every exception-region boundary
//!    starts a new block
//! 2. **Scopes** - region intervals are nested into a [`ScopeTree`] and each
//!    block is assigned the innermost scope it starts in
//! 3. **Edges** - the last instruction of each block decides its fallthrough
//!    and targets; a trailing `br` is then folded into a plain fallthrough edge
//!
//! Malformed input is rejected before any block is created.

use std::collections::{BTreeSet, HashMap};

use crate::{
    analysis::cfg::{Block, BlockId, MethodCfg, RegionScopes, ScopeId, ScopeKind, ScopeTree},
    assembly::{FlowType, Instruction, Operand},
    malformed_error,
    metadata::MethodBody,
    Error, Result,
};

/// A half-open instruction interval that becomes a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Interval {
    start: usize,
    end: usize,
    kind: ScopeKind,
}

impl Interval {
    /// Handlers and filters enclose a try with identical bounds.
    fn rank(self) -> u8 {
        match self.kind {
            ScopeKind::Method => 0,
            ScopeKind::Filter | ScopeKind::Handler => 1,
            ScopeKind::Try => 2,
        }
    }

    fn contains(self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Builds [`MethodCfg`]s from flat method bodies.
pub struct CfgBuilder<'a> {
    body: &'a MethodBody,
    leaders: BTreeSet<usize>,
}

impl<'a> CfgBuilder<'a> {
    /// Partitions `body` into basic blocks and links them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] for a body without instructions and
    /// [`Error::Malformed`] for a branch target outside the method, an
    /// exception region with reversed or out-of-range bounds, regions that
    /// partially overlap, or a conditional branch or switch at the very end of
    /// the method.
    pub fn build(body: &'a MethodBody) -> Result<MethodCfg> {
        if body.is_empty() {
            return Err(Error::Empty);
        }
        let mut builder = CfgBuilder {
            body,
            leaders: BTreeSet::new(),
        };
        builder.collect_leaders()?;
        let (scopes, intervals, scope_of) = builder.build_scopes()?;
        let regions = builder.region_scopes(&scope_of)?;
        let (mut cfg, block_of) = builder.partition(scopes, &intervals, regions)?;
        builder.wire_edges(&mut cfg, &block_of)?;
        Ok(cfg)
    }

    fn collect_leaders(&mut self) -> Result<()> {
        let len = self.body.len();
        self.leaders.insert(0);

        for (index, instr) in self.body.instructions.iter().enumerate() {
            for target in instr.branch_targets() {
                if target >= len {
                    return Err(malformed_error!(
                        "IL_{index:04}: branch target {target} outside method of {len} instructions"
                    ));
                }
                self.leaders.insert(target);
            }
            if instr.is_branch() && instr.branch_targets().is_empty() {
                return Err(malformed_error!(
                    "IL_{index:04}: `{instr}` carries no branch target"
                ));
            }
            if (instr.is_branch() || instr.is_terminator()) && index + 1 < len {
                self.leaders.insert(index + 1);
            }
        }

        for (i, region) in self.body.exception_regions.iter().enumerate() {
            let filter_ok = region
                .filter_start
                .is_none_or(|f| f < region.handler_start);
            if region.try_start >= region.try_end
                || region.handler_start >= region.handler_end
                || region.try_end > len
                || region.handler_end > len
                || !filter_ok
            {
                return Err(malformed_error!(
                    "exception region {i} has invalid bounds (try {}..{}, handler {}..{})",
                    region.try_start,
                    region.try_end,
                    region.handler_start,
                    region.handler_end
                ));
            }
            self.leaders
                .extend(region.boundaries().filter(|&b| b < len));
        }
        Ok(())
    }

    fn intervals(&self) -> Vec<Interval> {
        let mut intervals = Vec::new();
        for region in &self.body.exception_regions {
            intervals.push(Interval {
                start: region.try_start,
                end: region.try_end,
                kind: ScopeKind::Try,
            });
            if let Some(filter_start) = region.filter_start {
                intervals.push(Interval {
                    start: filter_start,
                    end: region.handler_start,
                    kind: ScopeKind::Filter,
                });
            }
            intervals.push(Interval {
                start: region.handler_start,
                end: region.handler_end,
                kind: ScopeKind::Handler,
            });
        }
        intervals.sort_by_key(|iv| (iv.start, std::cmp::Reverse(iv.end), iv.rank()));
        // Regions sharing one protected block share its try scope.
        intervals.dedup();
        intervals
    }

    #[allow(clippy::type_complexity)]
    fn build_scopes(&self) -> Result<(ScopeTree, Vec<(Interval, ScopeId)>, HashMap<Interval, ScopeId>)> {
        let mut tree = ScopeTree::new();
        let mut stack: Vec<(Interval, ScopeId)> = Vec::new();
        let mut ordered = Vec::new();
        let mut scope_of = HashMap::new();

        for interval in self.intervals() {
            while stack
                .last()
                .is_some_and(|(outer, _)| outer.end <= interval.start)
            {
                stack.pop();
            }
            let parent = match stack.last() {
                Some((outer, _)) if interval.end > outer.end => {
                    return Err(malformed_error!(
                        "exception intervals {}..{} and {}..{} partially overlap",
                        outer.start,
                        outer.end,
                        interval.start,
                        interval.end
                    ));
                }
                Some((_, id)) => *id,
                None => ScopeId::ROOT,
            };
            let id = tree.add(interval.kind, parent);
            stack.push((interval, id));
            ordered.push((interval, id));
            scope_of.insert(interval, id);
        }
        Ok((tree, ordered, scope_of))
    }

    fn region_scopes(&self, scope_of: &HashMap<Interval, ScopeId>) -> Result<Vec<RegionScopes>> {
        let lookup = |start, end, kind| {
            scope_of
                .get(&Interval { start, end, kind })
                .copied()
                .ok_or_else(|| malformed_error!("no scope for interval {start}..{end}"))
        };
        self.body
            .exception_regions
            .iter()
            .map(|region| {
                Ok(RegionScopes {
                    flags: region.flags,
                    try_scope: lookup(region.try_start, region.try_end, ScopeKind::Try)?,
                    filter_scope: region
                        .filter_start
                        .map(|f| lookup(f, region.handler_start, ScopeKind::Filter))
                        .transpose()?,
                    handler_scope: lookup(
                        region.handler_start,
                        region.handler_end,
                        ScopeKind::Handler,
                    )?,
                    catch_type: region.catch_type,
                })
            })
            .collect()
    }

    fn partition(
        &self,
        scopes: ScopeTree,
        intervals: &[(Interval, ScopeId)],
        regions: Vec<RegionScopes>,
    ) -> Result<(MethodCfg, HashMap<usize, BlockId>)> {
        let len = self.body.len();
        let starts: Vec<usize> = self.leaders.iter().copied().collect();
        let mut blocks = Vec::with_capacity(starts.len());
        let mut block_of = HashMap::with_capacity(starts.len());

        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(len);
            let instructions = self.body.instructions[start..end]
                .iter()
                .map(|instr| {
                    if instr.is_branch() {
                        Instruction::new(instr.opcode, Operand::Linked)
                    } else {
                        instr.clone()
                    }
                })
                .collect();
            // Intervals are in preorder, so the last match is the innermost.
            let scope = intervals
                .iter()
                .rev()
                .find(|(iv, _)| iv.contains(start))
                .map_or(ScopeId::ROOT, |(_, id)| *id);
            block_of.insert(start, BlockId::new(i));
            blocks.push(Block::new(instructions, scope, Some(start)));
        }

        let cfg = MethodCfg::from_parts(self.body.token, blocks, scopes, regions)?;
        Ok((cfg, block_of))
    }

    fn wire_edges(&self, cfg: &mut MethodCfg, block_of: &HashMap<usize, BlockId>) -> Result<()> {
        let layout = cfg.layout().to_vec();
        for (pos, &id) in layout.iter().enumerate() {
            let next = layout.get(pos + 1).copied();
            let Some(origin) = cfg.block(id).and_then(|b| b.origin()) else {
                continue;
            };
            let end = next
                .and_then(|n| cfg.block(n))
                .and_then(|b| b.origin())
                .unwrap_or(self.body.len());
            let last = &self.body.instructions[end - 1];
            let resolve = |target: usize| {
                block_of
                    .get(&target)
                    .copied()
                    .ok_or_else(|| malformed_error!("no block starts at IL_{target:04}"))
            };
            let targets = last
                .branch_targets()
                .into_iter()
                .map(resolve)
                .collect::<Result<Vec<_>>>()?;

            match last.flow_type() {
                FlowType::ConditionalBranch | FlowType::Switch => {
                    let Some(next) = next else {
                        return Err(malformed_error!(
                            "IL_{origin:04}: `{last}` falls off the end of the method"
                        ));
                    };
                    cfg.set_new_fallthrough(id, Some(next))?;
                    cfg.set_new_targets(id, Some(targets))?;
                }
                FlowType::UnconditionalBranch | FlowType::Leave => {
                    cfg.set_new_targets(id, Some(targets))?;
                }
                _ => {
                    if last.is_fallthrough() {
                        if let Some(next) = next {
                            cfg.set_new_fallthrough(id, Some(next))?;
                        }
                    }
                }
            }
        }

        for id in layout {
            cfg.remove_last_br(id)?;
        }
        Ok(())
    }
}
