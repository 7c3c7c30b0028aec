//! Call-result inlining.
//!
//! Replaces calls to oracle methods (string decrypters, constant providers)
//! with the literal they return. Inlining a method runs in two phases:
//!
//! 1. **Discovery** walks every block, recovers the arguments of each oracle
//!    call with [`recover_arguments`] and records a [`CallResult`] covering
//!    the argument producers and the call.
//! 2. **Evaluation and splice** hands every discovered call to the
//!    [`Evaluator`], batched per target, then replaces each covered range with
//!    one literal push. Edits within a block are applied from the highest
//!    index down so earlier ranges keep their positions.
//!
//! A literal string result also makes a directly following
//! `castclass System.String` or `String.Intern` call redundant; those are
//! removed along with the call.
//!
//! Nested oracle calls (`Decrypt(Decrypt(5))`) are handled across pipeline
//! iterations: the inner call is inlined first and the outer one becomes
//! resolvable on the next sweep.

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    analysis::{recover_arguments, BlockId, Literal, LocalValues, MethodCfg, Value},
    assembly::{Instruction, Opcode, Operand},
    compiler::{EventKind, EventLog},
    deobfuscation::{
        config::{ArgumentMode, EngineConfig},
        evaluator::{EvalResult, Evaluator},
        registry::OracleRegistry,
    },
    metadata::{MemberRefRc, Token},
    structural_error, Result,
};

/// One oracle call site found by discovery.
#[derive(Debug, Clone)]
pub struct CallResult {
    /// The block containing the call
    pub block: BlockId,
    /// Index of the call instruction
    pub call_index: usize,
    /// Index of the first argument-producing instruction
    pub arg_start: usize,
    /// Recovered arguments, `Unknown` only in permissive mode
    pub args: Vec<Value>,
    /// The called oracle
    pub target: MemberRefRc,
    /// Normalize helpers directly following the call
    pub helpers: usize,
    /// The evaluated result, once known
    pub value: Option<Literal>,
}

impl CallResult {
    /// Last instruction index that the splice replaces.
    #[must_use]
    pub fn end(&self) -> usize {
        match &self.value {
            Some(Literal::String(_)) => self.call_index + self.helpers,
            _ => self.call_index,
        }
    }
}

/// The two-phase call-result inliner.
pub struct CallResultInliner {
    evaluator: Arc<dyn Evaluator>,
    registry: Arc<OracleRegistry>,
    mode: ArgumentMode,
    batch: bool,
    normalize_helpers: Vec<String>,
}

impl CallResultInliner {
    /// Creates an inliner for the targets in `registry`.
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        registry: Arc<OracleRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            evaluator,
            registry,
            mode: config.argument_mode,
            batch: config.batch_evaluation,
            normalize_helpers: config.normalize_helpers.clone(),
        }
    }

    /// The registry deciding which calls are oracle calls.
    #[must_use]
    pub fn registry(&self) -> &OracleRegistry {
        &self.registry
    }

    /// Whether calls with unknown arguments are kept.
    ///
    /// Permissive mode only takes effect when the evaluator accepts unknown inputs.
    #[must_use]
    pub fn is_permissive(&self) -> bool {
        self.mode == ArgumentMode::Permissive && self.evaluator.tolerates_unknown()
    }

    /// Runs discovery, evaluation and splicing on one method.
    ///
    /// Returns the number of inlined calls.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structural`] if two discovered calls overlap or
    /// a graph edit fails. The graph is unchanged when overlap is detected.
    pub fn run(&self, cfg: &mut MethodCfg, events: &EventLog) -> Result<usize> {
        let mut calls = self.discover(cfg, events);
        if calls.is_empty() {
            return Ok(0);
        }
        self.evaluate(cfg.token(), &mut calls, events);
        self.apply(cfg, calls, events)
    }

    /// Phase A: finds oracle calls and recovers their arguments.
    pub fn discover(&self, cfg: &MethodCfg, events: &EventLog) -> Vec<CallResult> {
        let method = cfg.token();
        let locals = LocalValues::from_cfg(cfg);
        let permissive = self.is_permissive();
        let mut found = Vec::new();

        for (block, blk) in cfg.blocks() {
            let instrs = blk.instructions();
            let block_start = found.len();

            for (index, instr) in instrs.iter().enumerate() {
                let Some(target) = self.oracle_target(instr) else {
                    continue;
                };
                let Some(sig) = target.sig.as_ref().filter(|s| s.returns_value()) else {
                    continue;
                };
                self.registry.record_discovered(target.token);

                let args = match recover_arguments(instrs, index, sig, &locals) {
                    Ok(args) => args,
                    Err(err) => {
                        self.registry.record_unresolved(target.token);
                        events
                            .record(EventKind::Warning)
                            .at(method, block.index())
                            .message(format!(
                                "arguments of {} at {block}:{index} unresolved: {err}",
                                target.full_name()
                            ));
                        continue;
                    }
                };

                if let Some((position, slot)) = args.first_unknown() {
                    let nested = found[block_start..].iter().any(|c: &CallResult| {
                        c.call_index >= args.start && c.call_index < index
                    });
                    if nested {
                        // Becomes resolvable once the inner oracle call is inlined.
                        continue;
                    }
                    if !permissive {
                        self.registry.record_unresolved(target.token);
                        events
                            .record(EventKind::Warning)
                            .at(method, block.index())
                            .message(format!(
                                "argument {position} of {} at {block}:{index} unknown, produced at {}",
                                target.full_name(),
                                slot.producer
                            ));
                        continue;
                    }
                }

                found.push(CallResult {
                    block,
                    call_index: index,
                    arg_start: args.start,
                    args: args.values(),
                    helpers: self.count_helpers(&instrs[index + 1..]),
                    target,
                    value: None,
                });
            }
        }
        found
    }

    /// Phase B, first half: fills in `value` for every call the evaluator answers.
    pub fn evaluate(&self, method: Token, calls: &mut [CallResult], events: &EventLog) {
        let mut groups: BTreeMap<Token, Vec<usize>> = BTreeMap::new();
        for (i, call) in calls.iter().enumerate() {
            groups.entry(call.target.token).or_default().push(i);
        }

        for (token, members) in groups {
            let mut pending = Vec::with_capacity(members.len());
            for i in members {
                match self.registry.cached(token, &calls[i].args) {
                    Some(value) => calls[i].value = Some(value),
                    None => pending.push(i),
                }
            }
            let Some(&first) = pending.first() else {
                continue;
            };
            let target = Arc::clone(&calls[first].target);

            let results = if self.batch {
                let batch: Vec<Vec<Value>> = pending.iter().map(|&i| calls[i].args.clone()).collect();
                let results = self.evaluator.resolve_batch(&target, &batch);
                if results.len() == pending.len() {
                    results
                } else {
                    let message = format!(
                        "{} returned {} results for {} calls",
                        self.evaluator.name(),
                        results.len(),
                        pending.len()
                    );
                    vec![EvalResult::Error(message); pending.len()]
                }
            } else {
                pending
                    .iter()
                    .map(|&i| self.evaluator.resolve(&target, &calls[i].args))
                    .collect()
            };

            let ret = target.sig.as_ref().map(|s| s.ret);
            for (i, result) in pending.into_iter().zip(results) {
                let call = &mut calls[i];
                match result {
                    EvalResult::Ok(literal) => {
                        let literal = match ret {
                            Some(ty) => literal.coerce_to(ty),
                            None => literal,
                        };
                        self.registry.cache(token, &call.args, literal.clone());
                        call.value = Some(literal);
                    }
                    EvalResult::Unresolved => {
                        self.registry.record_failed(token);
                        events
                            .record(EventKind::Warning)
                            .at(method, call.block.index())
                            .message(format!(
                                "{} has no value for {} at {}:{}",
                                self.evaluator.name(),
                                target.full_name(),
                                call.block,
                                call.call_index
                            ));
                    }
                    EvalResult::Error(message) => {
                        self.registry.record_failed(token);
                        events
                            .record(EventKind::Warning)
                            .at(method, call.block.index())
                            .message(format!(
                                "evaluating {} at {}:{} failed: {message}",
                                target.full_name(),
                                call.block,
                                call.call_index
                            ));
                    }
                }
            }
        }
    }

    /// Phase B, second half: splices every evaluated call into its block.
    ///
    /// Returns the number of inlined calls.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Structural`] before editing anything if two
    /// ranges in one block overlap, and propagates graph edit failures.
    pub fn apply(
        &self,
        cfg: &mut MethodCfg,
        calls: Vec<CallResult>,
        events: &EventLog,
    ) -> Result<usize> {
        let method = cfg.token();
        let mut ready: Vec<(CallResult, Instruction)> = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(value) = &call.value else {
                continue;
            };
            match Instruction::literal(value) {
                Some(push) => ready.push((call, push)),
                None => {
                    events
                        .record(EventKind::Warning)
                        .at(method, call.block.index())
                        .message(format!(
                            "result {value} of {} has no constant form",
                            call.target.full_name()
                        ));
                }
            }
        }
        ready.sort_by_key(|(c, _)| (c.block, c.arg_start));

        for pair in ready.windows(2) {
            let (prev, next) = (&pair[0].0, &pair[1].0);
            if prev.block == next.block && next.arg_start <= prev.end() {
                return Err(structural_error!(
                    "oracle calls at {}:{} and {}:{} overlap",
                    prev.block,
                    prev.call_index,
                    next.block,
                    next.call_index
                ));
            }
        }

        let mut inlined = 0;
        for (call, push) in ready.into_iter().rev() {
            let end = call.end();
            let removed_helpers = end - call.call_index;
            cfg.replace(call.block, call.arg_start, end - call.arg_start + 1, push)?;

            let kind = if matches!(call.value, Some(Literal::String(_))) {
                EventKind::StringDecrypted
            } else {
                EventKind::ConstantDecrypted
            };
            if let Some(value) = &call.value {
                events
                    .record(kind)
                    .at(method, call.block.index())
                    .message(format!("{} -> {value}", call.target.full_name()));
            }
            if removed_helpers > 0 {
                events
                    .record(EventKind::HelperRemoved)
                    .at(method, call.block.index())
                    .message(format!(
                        "{removed_helpers} normalize helper(s) after {}",
                        call.target.full_name()
                    ));
            }
            self.registry.record_inlined(call.target.token);
            inlined += 1;
        }
        Ok(inlined)
    }

    /// The oracle called by `instr`, if it is a call to a registered target.
    fn oracle_target(&self, instr: &Instruction) -> Option<MemberRefRc> {
        if !instr.is_call() {
            return None;
        }
        match &instr.operand {
            Operand::Member(member) if self.registry.is_oracle(member.token) => {
                Some(Arc::clone(member))
            }
            _ => None,
        }
    }

    /// Number of leading instructions in `rest` that are normalize helpers,
    /// each helper name counted at most once.
    fn count_helpers(&self, rest: &[Instruction]) -> usize {
        let mut used: Vec<String> = Vec::new();
        for instr in rest {
            let shaped = instr.opcode == Opcode::Castclass
                || (instr.is_call()
                    && instr
                        .member()
                        .and_then(|m| m.sig.as_ref())
                        .is_some_and(|s| s.arg_count() == 1 && s.returns_value()));
            let Some(name) = instr.member().filter(|_| shaped).map(|m| m.full_name()) else {
                break;
            };
            if !self.normalize_helpers.contains(&name) || used.contains(&name) {
                break;
            }
            used.push(name);
        }
        used.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ScopeId,
        deobfuscation::StaticEvaluator,
        test::{
            create_castclass_string, create_cfg, create_int_oracle, create_intern,
            create_string_decrypter, TEST_METHOD,
        },
        Error,
    };

    fn add_evaluator() -> Arc<dyn Evaluator> {
        let evaluator = StaticEvaluator::new();
        evaluator.register_handler(create_int_oracle().token, |args| match args {
            [Value::Known(Literal::I4(a)), Value::Known(Literal::I4(b))] => {
                EvalResult::Ok(Literal::I4(a + b))
            }
            _ => EvalResult::Unresolved,
        });
        Arc::new(evaluator)
    }

    fn decrypt_evaluator(result: &str) -> Arc<dyn Evaluator> {
        let evaluator = StaticEvaluator::new();
        evaluator.register_constant(create_string_decrypter().token, Literal::from(result));
        Arc::new(evaluator)
    }

    fn inliner(evaluator: Arc<dyn Evaluator>, config: &EngineConfig) -> CallResultInliner {
        let registry = OracleRegistry::with_targets([
            create_int_oracle().token,
            create_string_decrypter().token,
        ]);
        CallResultInliner::new(evaluator, Arc::new(registry), config)
    }

    fn opcodes(cfg: &MethodCfg) -> Vec<Opcode> {
        cfg.block(cfg.entry())
            .unwrap()
            .instructions()
            .iter()
            .map(|i| i.opcode)
            .collect()
    }

    #[test]
    fn test_constant_call_replaced_by_result() {
        let mut cfg = create_cfg(vec![
            Instruction::ldc_i4(3),
            Instruction::ldc_i4(4),
            Instruction::call(create_int_oracle()),
            Instruction::simple(Opcode::Ret),
        ]);
        let events = EventLog::new();
        let inliner = inliner(add_evaluator(), &EngineConfig::default());

        assert_eq!(inliner.run(&mut cfg, &events).unwrap(), 1);
        let blk = cfg.block(cfg.entry()).unwrap();
        assert_eq!(blk.len(), 2);
        assert_eq!(blk.instructions()[0].literal_value(), Some(Literal::I4(7)));
        assert_eq!(events.count_kind(EventKind::ConstantDecrypted), 1);
        assert_eq!(inliner.registry().stats(create_int_oracle().token).inlined, 1);
    }

    #[test]
    fn test_intern_and_cast_removed_after_string() {
        let mut cfg = create_cfg(vec![
            Instruction::ldstr("a"),
            Instruction::call(create_string_decrypter()),
            create_castclass_string(),
            Instruction::call(create_intern()),
            Instruction::simple(Opcode::Ret),
        ]);
        let events = EventLog::new();
        let inliner = inliner(decrypt_evaluator("x"), &EngineConfig::default());

        assert_eq!(inliner.run(&mut cfg, &events).unwrap(), 1);
        assert_eq!(opcodes(&cfg), vec![Opcode::Ldstr, Opcode::Ret]);
        let blk = cfg.block(cfg.entry()).unwrap();
        assert_eq!(blk.instructions()[0].literal_value(), Some(Literal::from("x")));
        assert!(events.has(EventKind::HelperRemoved));
    }

    #[test]
    fn test_repeated_helper_is_kept() {
        let mut cfg = create_cfg(vec![
            Instruction::ldstr("a"),
            Instruction::call(create_string_decrypter()),
            Instruction::call(create_intern()),
            Instruction::call(create_intern()),
            Instruction::simple(Opcode::Ret),
        ]);
        let inliner = inliner(decrypt_evaluator("x"), &EngineConfig::default());
        inliner.run(&mut cfg, &EventLog::new()).unwrap();
        assert_eq!(opcodes(&cfg), vec![Opcode::Ldstr, Opcode::Call, Opcode::Ret]);
    }

    #[test]
    fn test_strict_mode_leaves_dup_argument_untouched() {
        let instrs = vec![
            Instruction::ldarg(0),
            Instruction::simple(Opcode::Dup),
            Instruction::call(create_string_decrypter()),
            Instruction::simple(Opcode::Pop),
            Instruction::simple(Opcode::Ret),
        ];
        let mut cfg = create_cfg(instrs.clone());
        let events = EventLog::new();
        let inliner = inliner(decrypt_evaluator("x"), &EngineConfig::strict());

        assert_eq!(inliner.run(&mut cfg, &events).unwrap(), 0);
        assert_eq!(cfg.block(cfg.entry()).unwrap().instructions(), instrs.as_slice());
        assert_eq!(events.warnings().count(), 1);
        assert_eq!(inliner.registry().stats(create_string_decrypter().token).unresolved, 1);
    }

    #[test]
    fn test_permissive_mode_needs_tolerant_evaluator() {
        let instrs = vec![
            Instruction::ldarg(0),
            Instruction::simple(Opcode::Dup),
            Instruction::call(create_string_decrypter()),
            Instruction::simple(Opcode::Pop),
            Instruction::simple(Opcode::Ret),
        ];
        let config = EngineConfig::permissive();

        let mut cfg = create_cfg(instrs.clone());
        let strict_only = inliner(decrypt_evaluator("x"), &config);
        assert!(!strict_only.is_permissive());
        assert_eq!(strict_only.run(&mut cfg, &EventLog::new()).unwrap(), 0);

        let tolerant = StaticEvaluator::new().with_unknown_inputs(true);
        tolerant.register_constant(create_string_decrypter().token, Literal::from("x"));
        let mut cfg = create_cfg(instrs);
        let permissive = inliner(Arc::new(tolerant), &config);
        assert!(permissive.is_permissive());
        assert_eq!(permissive.run(&mut cfg, &EventLog::new()).unwrap(), 1);
        assert_eq!(
            opcodes(&cfg),
            vec![Opcode::Ldarg, Opcode::Ldstr, Opcode::Pop, Opcode::Ret]
        );
    }

    #[test]
    fn test_nested_oracle_resolves_inner_first() {
        let sum = create_int_oracle();
        let mut cfg = create_cfg(vec![
            Instruction::ldc_i4(1),
            Instruction::ldc_i4(2),
            Instruction::call(sum.clone()),
            Instruction::ldc_i4(3),
            Instruction::call(sum),
            Instruction::simple(Opcode::Ret),
        ]);
        let events = EventLog::new();
        let inliner = inliner(add_evaluator(), &EngineConfig::default());

        assert_eq!(inliner.run(&mut cfg, &events).unwrap(), 1);
        assert!(events.warnings().next().is_none());
        assert_eq!(inliner.run(&mut cfg, &events).unwrap(), 1);
        let blk = cfg.block(cfg.entry()).unwrap();
        assert_eq!(blk.len(), 2);
        assert_eq!(blk.instructions()[0].literal_value(), Some(Literal::I4(6)));
    }

    #[test]
    fn test_results_cached_across_methods() {
        let body = || {
            create_cfg(vec![
                Instruction::ldc_i4(3),
                Instruction::ldc_i4(4),
                Instruction::call(create_int_oracle()),
                Instruction::simple(Opcode::Ret),
            ])
        };
        let inliner = inliner(add_evaluator(), &EngineConfig::default());
        let events = EventLog::new();
        inliner.run(&mut body(), &events).unwrap();

        let mut calls = inliner.discover(&body(), &events);
        assert_eq!(inliner.registry().cached_count(), 1);
        inliner.evaluate(TEST_METHOD, &mut calls, &events);
        assert_eq!(calls[0].value, Some(Literal::I4(7)));
    }

    #[test]
    fn test_overlapping_ranges_are_structural() {
        let mut cfg = create_cfg(vec![
            Instruction::ldc_i4(3),
            Instruction::ldc_i4(4),
            Instruction::call(create_int_oracle()),
            Instruction::simple(Opcode::Ret),
        ]);
        let before = cfg.block(cfg.entry()).unwrap().instructions().to_vec();
        let inliner = inliner(add_evaluator(), &EngineConfig::default());
        let events = EventLog::new();

        let mut calls = inliner.discover(&cfg, &events);
        inliner.evaluate(cfg.token(), &mut calls, &events);
        let mut shadow = calls[0].clone();
        shadow.arg_start = 1;
        calls.push(shadow);

        let err = inliner.apply(&mut cfg, calls, &events).unwrap_err();
        assert!(matches!(err, Error::Structural { .. }));
        assert_eq!(cfg.block(cfg.entry()).unwrap().instructions(), before.as_slice());
    }

    #[test]
    fn test_calls_in_separate_blocks() {
        let mut cfg = MethodCfg::new(
            TEST_METHOD,
            vec![
                Instruction::ldc_i4(3),
                Instruction::ldc_i4(4),
                Instruction::call(create_int_oracle()),
                Instruction::simple(Opcode::Pop),
            ],
        );
        let second = cfg.add_block(
            ScopeId::ROOT,
            vec![
                Instruction::ldc_i4(5),
                Instruction::ldc_i4(6),
                Instruction::call(create_int_oracle()),
                Instruction::simple(Opcode::Ret),
            ],
        );
        cfg.set_new_fallthrough(cfg.entry(), Some(second)).unwrap();

        let inliner = inliner(add_evaluator(), &EngineConfig::default());
        assert_eq!(inliner.run(&mut cfg, &EventLog::new()).unwrap(), 2);
        let blk = cfg.block(second).unwrap();
        assert_eq!(blk.instructions()[0].literal_value(), Some(Literal::I4(11)));
        cfg.check_invariants().unwrap();
    }
}
