//! Call-result inlining pass.
//!
//! Runs [`CallResultInliner`] as part of the value phase. Each run inlines
//! every oracle call whose arguments are known at that point; calls nested
//! inside other oracle calls are picked up by later iterations of the
//! scheduler.

use crate::{
    analysis::MethodCfg,
    compiler::{pass::CfgPass, PassContext},
    deobfuscation::CallResultInliner,
    metadata::Token,
    Result,
};

/// Replaces oracle calls with the literals they return.
pub struct CallInliningPass {
    inliner: CallResultInliner,
}

impl CallInliningPass {
    /// Creates the pass around a configured inliner.
    #[must_use]
    pub fn new(inliner: CallResultInliner) -> Self {
        Self { inliner }
    }

    /// The wrapped inliner.
    #[must_use]
    pub fn inliner(&self) -> &CallResultInliner {
        &self.inliner
    }
}

impl CfgPass for CallInliningPass {
    fn name(&self) -> &'static str {
        "call-inlining"
    }

    fn description(&self) -> &'static str {
        "Replaces oracle calls with their evaluated results"
    }

    fn should_run(&self, _method: Token, _ctx: &PassContext) -> bool {
        !self.inliner.registry().is_empty()
    }

    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool> {
        let inlined = self.inliner.run(cfg, &ctx.events)?;
        if inlined > 0 {
            log::debug!(target: "cflowkit", "{}: inlined {inlined} call(s)", cfg.token());
        }
        Ok(inlined > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analysis::Literal,
        assembly::{Instruction, Opcode},
        compiler::EventKind,
        deobfuscation::{EngineConfig, OracleRegistry, StaticEvaluator},
        test::{create_cfg, create_string_decrypter},
    };

    #[test]
    fn test_pass_reports_change_once() {
        let decrypt = create_string_decrypter();
        let evaluator = StaticEvaluator::new();
        evaluator.register_constant(decrypt.token, Literal::from("hello"));
        let registry = Arc::new(OracleRegistry::with_targets([decrypt.token]));
        let pass = CallInliningPass::new(CallResultInliner::new(
            Arc::new(evaluator),
            registry,
            &EngineConfig::default(),
        ));

        let mut cfg = create_cfg(vec![
            Instruction::ldstr("cipher"),
            Instruction::call(decrypt),
            Instruction::simple(Opcode::Ret),
        ]);
        let ctx = PassContext::new();
        assert!(pass.should_run(cfg.token(), &ctx));
        assert!(pass.run_on_method(&mut cfg, &ctx).unwrap());
        assert!(!pass.run_on_method(&mut cfg, &ctx).unwrap());
        assert_eq!(ctx.events.count_kind(EventKind::StringDecrypted), 1);
    }

    #[test]
    fn test_empty_registry_skips() {
        let pass = CallInliningPass::new(CallResultInliner::new(
            Arc::new(StaticEvaluator::new()),
            Arc::new(OracleRegistry::new()),
            &EngineConfig::default(),
        ));
        assert!(!pass.should_run(Token::new(0x0600_0001), &PassContext::new()));
    }
}
