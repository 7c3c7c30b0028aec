//! Constant branch folding.
//!
//! Inlining an integer oracle leaves `ldc; ldc; bcc` and `ldc; switch`
//! sequences behind whose outcome is fixed. When every value a trailing
//! conditional or switch consumes is a literal pushed in the same block, the
//! branch is evaluated, the pushes are dropped, and the block falls through to
//! the successor that would have been taken.
//!
//! # Example
//!
//! Before:
//! ```text
//! B0: ldc.i4 3; ldc.i4 4; blt B2 | ft B1
//! ```
//!
//! After:
//! ```text
//! B0: -> B2
//! ```
//!
//! Comparisons follow the CIL rules: `i4` with `i4`, `i8` with `i8`, and
//! floats with floats, where the `.un` forms are unsigned for integers and
//! unordered for NaN. `brtrue`/`brfalse` accept integers, `null` and string
//! references. Anything else is left alone.

use crate::{
    analysis::{producers, BlockId, Literal, MethodCfg},
    assembly::Opcode,
    compiler::{pass::CfgPass, EventKind, PassContext},
    Result,
};

/// Successor chosen by a foldable branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Conditional: taken or not taken.
    Conditional(bool),
    /// Switch: the block to continue at.
    Switch(BlockId),
}

/// Evaluates conditionals and switches whose operands are literals.
pub struct ConstantBranchPass;

impl Default for ConstantBranchPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantBranchPass {
    /// Creates a new constant branch pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Literal operands of the trailing branch and the index of the first push.
    ///
    /// Only a run of plain literal pushes (with interleaved `nop`s) directly
    /// before the branch qualifies.
    fn literal_operands(cfg: &MethodCfg, block: BlockId) -> Option<(Vec<Literal>, usize)> {
        let instrs = cfg.block(block)?.instructions();
        let branch = instrs.len().checked_sub(1)?;
        let starts = producers(instrs, branch).ok()?;
        let first = *starts.first()?;

        let pushes: Vec<_> = instrs[first..branch].iter().filter(|i| !i.is_nop()).collect();
        if pushes.len() != starts.len() {
            return None;
        }
        let literals = pushes
            .into_iter()
            .map(|i| i.literal_value())
            .collect::<Option<Vec<_>>>()?;
        Some((literals, first))
    }

    fn decide(cfg: &MethodCfg, block: BlockId, operands: &[Literal]) -> Option<Decision> {
        let blk = cfg.block(block)?;
        let opcode = blk.last()?.opcode;

        if opcode == Opcode::Switch {
            let [Literal::I4(index)] = operands else {
                return None;
            };
            // The index is unsigned; out-of-range values fall through.
            let case = usize::try_from(*index as u32).ok();
            let target = case
                .and_then(|c| blk.targets().get(c).copied())
                .or(blk.fallthrough())?;
            return Some(Decision::Switch(target));
        }

        if !blk.is_two_way_conditional() {
            return None;
        }
        let taken = match (opcode, operands) {
            (Opcode::Brtrue, [value]) => truthy(value)?,
            (Opcode::Brfalse, [value]) => !truthy(value)?,
            (_, [a, b]) => compare(opcode, a, b)?,
            _ => return None,
        };
        Some(Decision::Conditional(taken))
    }
}

/// Truth value of a single `brtrue`/`brfalse` operand.
fn truthy(value: &Literal) -> Option<bool> {
    match value {
        Literal::I4(v) => Some(*v != 0),
        Literal::I8(v) => Some(*v != 0),
        Literal::Null => Some(false),
        Literal::String(_) => Some(true),
        _ => None,
    }
}

fn compare(opcode: Opcode, a: &Literal, b: &Literal) -> Option<bool> {
    match (a, b) {
        (Literal::I4(x), Literal::I4(y)) => {
            let (ux, uy) = (u64::from(*x as u32), u64::from(*y as u32));
            compare_int(opcode, i64::from(*x), i64::from(*y), ux, uy)
        }
        (Literal::I8(x), Literal::I8(y)) => compare_int(opcode, *x, *y, *x as u64, *y as u64),
        (Literal::R4(_) | Literal::R8(_), Literal::R4(_) | Literal::R8(_)) => {
            compare_float(opcode, as_f64(a)?, as_f64(b)?)
        }
        _ => None,
    }
}

fn compare_int(opcode: Opcode, x: i64, y: i64, ux: u64, uy: u64) -> Option<bool> {
    Some(match opcode {
        Opcode::Beq => x == y,
        Opcode::BneUn => x != y,
        Opcode::Bge => x >= y,
        Opcode::Bgt => x > y,
        Opcode::Ble => x <= y,
        Opcode::Blt => x < y,
        Opcode::BgeUn => ux >= uy,
        Opcode::BgtUn => ux > uy,
        Opcode::BleUn => ux <= uy,
        Opcode::BltUn => ux < uy,
        _ => return None,
    })
}

fn compare_float(opcode: Opcode, x: f64, y: f64) -> Option<bool> {
    Some(match opcode {
        Opcode::Beq => x == y,
        Opcode::BneUn => x != y,
        Opcode::Bge => x >= y,
        Opcode::Bgt => x > y,
        Opcode::Ble => x <= y,
        Opcode::Blt => x < y,
        Opcode::BgeUn => !(x < y),
        Opcode::BgtUn => !(x <= y),
        Opcode::BleUn => !(x > y),
        Opcode::BltUn => !(x >= y),
        _ => return None,
    })
}

fn as_f64(value: &Literal) -> Option<f64> {
    match value {
        Literal::R4(v) => Some(f64::from(*v)),
        Literal::R8(v) => Some(*v),
        _ => None,
    }
}

impl CfgPass for ConstantBranchPass {
    fn name(&self) -> &'static str {
        "constant-branches"
    }

    fn description(&self) -> &'static str {
        "Evaluates conditionals and switches whose operands are literals"
    }

    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool> {
        let method = cfg.token();
        let mut changed = false;
        let layout: Vec<BlockId> = cfg.layout().to_vec();

        for block in layout {
            let Some((operands, first)) = Self::literal_operands(cfg, block) else {
                continue;
            };
            let Some(decision) = Self::decide(cfg, block, &operands) else {
                continue;
            };
            let branch = cfg.block(block).map_or(0, |b| b.len() - 1);

            let target = match decision {
                Decision::Conditional(taken) => {
                    cfg.replace_bcc_with_branch(block, taken)?;
                    cfg.block(block).and_then(|b| b.fallthrough())
                }
                Decision::Switch(target) => {
                    cfg.replace_switch_with_branch(block, target)?;
                    Some(target)
                }
            };
            cfg.remove(block, first, branch - first)?;

            let target = target.map_or_else(|| "its fallthrough".to_string(), |t| t.to_string());
            let outcome = match decision {
                Decision::Conditional(true) => format!("{block} always takes its branch to {target}"),
                Decision::Conditional(false) => format!("{block} never branches, falls to {target}"),
                Decision::Switch(_) => format!("switch of {block} always goes to {target}"),
            };
            ctx.events
                .record(EventKind::BranchSimplified)
                .at(method, block.index())
                .pass(self.name())
                .message(outcome);
            changed = true;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ScopeId,
        assembly::{Instruction, Operand},
        test::TEST_METHOD,
    };

    /// B0: `operands`; `opcode` -> B2 | ft B1
    /// B1: ldc 1; ret
    /// B2: ldc 2; ret
    fn conditional(operands: Vec<Instruction>, opcode: Opcode) -> (MethodCfg, [BlockId; 3]) {
        let mut instrs = operands;
        instrs.push(Instruction::new(opcode, Operand::Linked));
        let mut cfg = MethodCfg::new(TEST_METHOD, instrs);
        let b0 = cfg.entry();
        let b1 = cfg.add_block(
            ScopeId::ROOT,
            vec![Instruction::ldc_i4(1), Instruction::simple(Opcode::Ret)],
        );
        let b2 = cfg.add_block(
            ScopeId::ROOT,
            vec![Instruction::ldc_i4(2), Instruction::simple(Opcode::Ret)],
        );
        cfg.set_new_targets(b0, Some(vec![b2])).unwrap();
        cfg.set_new_fallthrough(b0, Some(b1)).unwrap();
        (cfg, [b0, b1, b2])
    }

    fn run(cfg: &mut MethodCfg) -> (bool, PassContext) {
        let ctx = PassContext::new();
        let changed = ConstantBranchPass::new().run_on_method(cfg, &ctx).unwrap();
        cfg.check_invariants().unwrap();
        (changed, ctx)
    }

    #[test]
    fn test_taken_comparison_jumps_to_target() {
        let (mut cfg, [b0, b1, b2]) = conditional(
            vec![Instruction::ldc_i4(3), Instruction::nop(), Instruction::ldc_i4(4)],
            Opcode::Blt,
        );
        let (changed, ctx) = run(&mut cfg);

        assert!(changed);
        let blk = cfg.block(b0).unwrap();
        assert!(blk.instructions().is_empty());
        assert_eq!(blk.fallthrough(), Some(b2));
        assert!(!blk.has_targets());
        assert!(cfg.block(b1).unwrap().sources().is_empty());
        assert_eq!(ctx.events.count_kind(EventKind::BranchSimplified), 1);
    }

    #[test]
    fn test_untaken_brtrue_falls_through() {
        let (mut cfg, [b0, b1, b2]) = conditional(
            vec![Instruction::ldarg(0), Instruction::simple(Opcode::Pop), Instruction::ldc_i4(0)],
            Opcode::Brtrue,
        );
        run(&mut cfg);

        let blk = cfg.block(b0).unwrap();
        assert_eq!(
            blk.instructions(),
            &[Instruction::ldarg(0), Instruction::simple(Opcode::Pop)]
        );
        assert_eq!(blk.fallthrough(), Some(b1));
        assert!(cfg.block(b2).unwrap().sources().is_empty());
    }

    #[test]
    fn test_unsigned_and_mixed_comparisons() {
        // -1 is u32::MAX in an unsigned comparison.
        let (mut cfg, [b0, _, b2]) = conditional(
            vec![Instruction::ldc_i4(-1), Instruction::ldc_i4(1)],
            Opcode::BgtUn,
        );
        run(&mut cfg);
        assert_eq!(cfg.block(b0).unwrap().fallthrough(), Some(b2));

        // i4 against i8 is not a valid comparison and stays.
        let (mut cfg, [b0, ..]) = conditional(
            vec![Instruction::ldc_i4(1), Instruction::ldc_i8(1)],
            Opcode::Beq,
        );
        let (changed, _) = run(&mut cfg);
        assert!(!changed);
        assert_eq!(cfg.block(b0).unwrap().len(), 3);
    }

    #[test]
    fn test_computed_operand_is_left_alone() {
        let (mut cfg, [b0, ..]) = conditional(
            vec![
                Instruction::ldc_i4(1),
                Instruction::ldc_i4(2),
                Instruction::simple(Opcode::Add),
                Instruction::ldc_i4(3),
            ],
            Opcode::Beq,
        );
        let (changed, _) = run(&mut cfg);
        assert!(!changed);
        assert_eq!(cfg.block(b0).unwrap().len(), 5);
    }

    #[test]
    fn test_switch_selects_case_or_default() {
        let build = |index: i32| {
            let mut cfg = MethodCfg::new(
                TEST_METHOD,
                vec![
                    Instruction::ldc_i4(index),
                    Instruction::new(Opcode::Switch, Operand::Linked),
                ],
            );
            let b0 = cfg.entry();
            let default = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
            let case0 = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
            let case1 = cfg.add_block(ScopeId::ROOT, vec![Instruction::simple(Opcode::Ret)]);
            cfg.set_new_targets(b0, Some(vec![case0, case1])).unwrap();
            cfg.set_new_fallthrough(b0, Some(default)).unwrap();
            (cfg, b0, default, case1)
        };

        let (mut cfg, b0, _, case1) = build(1);
        run(&mut cfg);
        assert_eq!(cfg.block(b0).unwrap().fallthrough(), Some(case1));
        assert!(cfg.block(b0).unwrap().instructions().is_empty());

        let (mut cfg, b0, default, _) = build(7);
        run(&mut cfg);
        assert_eq!(cfg.block(b0).unwrap().fallthrough(), Some(default));
        assert!(!cfg.block(b0).unwrap().has_targets());
    }
}
