//! Deobfuscation engine orchestrating the rewrite pipeline.

use std::{collections::HashSet, sync::Arc, time::Instant};

use rayon::prelude::*;

use crate::{
    analysis::CfgBuilder,
    compiler::{
        BlockMergePass, BranchLayoutPass, CallInliningPass, CfgCodeGenerator, ConstantBranchPass,
        DeadBlockPass, EventKind, NopBlockPass, PassContext, PassScheduler,
    },
    deobfuscation::{
        config::EngineConfig,
        evaluator::{Evaluator, IsolatedEvaluator, OracleTransport},
        inliner::CallResultInliner,
        registry::OracleRegistry,
        result::DeobfuscationResult,
    },
    metadata::{MethodBody, Token},
    Error, Result,
};

/// Main deobfuscation engine.
///
/// The engine orchestrates the complete pipeline for a set of method bodies:
///
/// 1. **Construction**: build a [`MethodCfg`](crate::analysis::MethodCfg) per body
/// 2. **Pass Execution**: run normalize and value passes until fixpoint
/// 3. **Code Generation**: flatten every changed graph back into a body
///
/// Methods are independent; a failure in one of them (malformed input, a
/// structural violation during rewriting) keeps that method's original body
/// and is recorded in the result, while the others continue.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use cflowkit::{
///     analysis::Literal,
///     assembly::{Instruction, Opcode},
///     deobfuscation::{DeobfuscationEngine, EngineConfig, StaticEvaluator},
///     metadata::{ElementType, MemberRef, MethodBody, MethodSig, Token},
/// };
///
/// let decrypt = Arc::new(MemberRef::method(
///     Token::new(0x0A00_0001),
///     "Obfuscated.Strings",
///     "Get",
///     MethodSig::new(vec![ElementType::I4], ElementType::String),
/// ));
/// let evaluator = StaticEvaluator::new();
/// evaluator.register_handler(decrypt.token, |_args| {
///     cflowkit::deobfuscation::EvalResult::Ok(Literal::from("hello"))
/// });
///
/// let engine = DeobfuscationEngine::new(EngineConfig::default(), Arc::new(evaluator));
/// engine.register_oracle(decrypt.token);
///
/// let body = MethodBody::new(
///     Token::new(0x0600_0001),
///     vec![
///         Instruction::ldc_i4(17),
///         Instruction::call(decrypt),
///         Instruction::simple(Opcode::Ret),
///     ],
/// );
/// let result = engine.process(vec![body])?;
/// assert_eq!(result.bodies[0].instructions[0], Instruction::ldstr("hello"));
/// # Ok::<(), cflowkit::Error>(())
/// ```
pub struct DeobfuscationEngine {
    config: EngineConfig,
    evaluator: Arc<dyn Evaluator>,
    registry: Arc<OracleRegistry>,
}

impl DeobfuscationEngine {
    /// Creates an engine with an empty oracle registry.
    #[must_use]
    pub fn new(config: EngineConfig, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            config,
            evaluator,
            registry: Arc::new(OracleRegistry::new()),
        }
    }

    /// Creates an engine backed by a process-isolated oracle, using the
    /// configured evaluator timeout.
    #[must_use]
    pub fn isolated<T: OracleTransport>(config: EngineConfig, transport: T) -> Self {
        let evaluator = IsolatedEvaluator::new(transport, config.evaluator_timeout);
        Self::new(config, Arc::new(evaluator))
    }

    /// Replaces the oracle registry, for sharing one registry across engines.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<OracleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Marks calls to `target` for inlining.
    pub fn register_oracle(&self, target: Token) {
        self.registry.register(target);
    }

    /// The oracle registry with its per-target statistics.
    #[must_use]
    pub fn registry(&self) -> &Arc<OracleRegistry> {
        &self.registry
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn scheduler(&self) -> PassScheduler {
        let mut scheduler = PassScheduler::new(
            self.config.max_iterations,
            self.config.stable_iterations,
            self.config.max_phase_iterations,
        );
        if self.config.enable_simplification {
            scheduler.normalize.push(Box::new(ConstantBranchPass::new()));
            scheduler.normalize.push(Box::new(DeadBlockPass::new()));
            scheduler.normalize.push(Box::new(NopBlockPass::new()));
            scheduler.normalize.push(Box::new(BlockMergePass::new()));
            scheduler.normalize.push(Box::new(BranchLayoutPass::new()));
        }
        if self.config.enable_inlining {
            let inliner = CallResultInliner::new(
                Arc::clone(&self.evaluator),
                Arc::clone(&self.registry),
                &self.config,
            );
            scheduler.value.push(Box::new(CallInliningPass::new(inliner)));
        }
        scheduler
    }

    /// Rewrites a set of method bodies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an invalid configuration or when
    /// two bodies share a token. Per-method failures are not errors; they are
    /// reported in [`DeobfuscationResult::failed`].
    pub fn process(&self, bodies: Vec<MethodBody>) -> Result<DeobfuscationResult> {
        self.config.validate()?;
        let start = Instant::now();

        let mut seen = HashSet::with_capacity(bodies.len());
        if let Some(dup) = bodies.iter().find(|b| !seen.insert(b.token)) {
            return Err(Error::Configuration(format!(
                "method {} appears more than once",
                dup.token
            )));
        }

        let mut ctx = PassContext::new();
        ctx.parallel = self.config.parallel;

        let build = |body: &MethodBody| (body.token, CfgBuilder::build(body));
        let built: Vec<_> = if ctx.parallel {
            bodies.par_iter().map(build).collect()
        } else {
            bodies.iter().map(build).collect()
        };
        for (token, cfg) in built {
            match cfg {
                Ok(cfg) => {
                    ctx.events
                        .record(EventKind::MethodProcessingStarted)
                        .method(token)
                        .message(format!("{} blocks", cfg.block_count()));
                    ctx.insert(cfg);
                }
                Err(err) => ctx.fail(token, &err),
            }
        }

        let iterations = self.scheduler().run_pipeline(&ctx)?;

        let flatten = |body: MethodBody| -> MethodBody {
            let token = body.token;
            if ctx.is_failed(token) || !ctx.is_processed(token) {
                return body;
            }
            let Some(cfg) = ctx.take(token) else {
                return body;
            };
            match CfgCodeGenerator::generate(&cfg) {
                Ok(generated) => {
                    ctx.events
                        .record(EventKind::CodeRegenerated)
                        .method(token)
                        .message(format!(
                            "{} -> {} instructions",
                            body.len(),
                            generated.len()
                        ));
                    ctx.events
                        .record(EventKind::MethodProcessingCompleted)
                        .method(token);
                    generated
                }
                Err(err) => {
                    ctx.fail(token, &err);
                    body
                }
            }
        };
        let bodies: Vec<MethodBody> = if ctx.parallel {
            bodies.into_par_iter().map(flatten).collect()
        } else {
            bodies.into_iter().map(flatten).collect()
        };

        let mut failed: Vec<(Token, String)> = ctx
            .failed_methods
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        failed.sort_unstable();

        let events = std::mem::take(&mut ctx.events);
        let mut result = DeobfuscationResult::new(bodies, events)
            .with_timing(start.elapsed(), iterations);
        result.failed = failed;
        log::info!(target: "cflowkit", "deobfuscation complete: {}", result.summary());
        Ok(result)
    }

    /// Rewrites a single method body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an invalid configuration.
    pub fn process_method(&self, body: MethodBody) -> Result<DeobfuscationResult> {
        self.process(vec![body])
    }
}
