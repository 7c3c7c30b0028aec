//! In-process evaluator.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    analysis::{Literal, Value},
    deobfuscation::evaluator::{EvalResult, Evaluator},
    metadata::{MemberRef, Token},
};

/// A pure function computing a target's result from its arguments.
pub type Handler = dyn Fn(&[Value]) -> EvalResult + Send + Sync;

/// Evaluates oracle calls with registered pure functions.
///
/// Two kinds of targets are supported: trivial proxies that always return
/// the same constant, and targets with a [`Handler`] that re-implements the
/// target's computation (a decrypt routine ported to Rust, a constant
/// folder for an arithmetic helper). Targets with neither are
/// [`EvalResult::Unresolved`].
pub struct StaticEvaluator {
    constants: DashMap<Token, Literal>,
    handlers: DashMap<Token, Arc<Handler>>,
    tolerates_unknown: bool,
}

impl Default for StaticEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticEvaluator {
    /// Creates an evaluator without registrations that rejects unknown inputs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            constants: DashMap::new(),
            handlers: DashMap::new(),
            tolerates_unknown: false,
        }
    }

    /// Lets `Unknown` arguments reach the handlers.
    #[must_use]
    pub fn with_unknown_inputs(mut self, tolerate: bool) -> Self {
        self.tolerates_unknown = tolerate;
        self
    }

    /// Registers a proxy that always returns `value`.
    pub fn register_constant(&self, target: Token, value: Literal) {
        self.constants.insert(target, value);
    }

    /// Registers a handler for `target`.
    pub fn register_handler<F>(&self, target: Token, handler: F)
    where
        F: Fn(&[Value]) -> EvalResult + Send + Sync + 'static,
    {
        self.handlers.insert(target, Arc::new(handler));
    }

    /// Returns `true` if anything is registered for `target`.
    #[must_use]
    pub fn knows(&self, target: Token) -> bool {
        self.constants.contains_key(&target) || self.handlers.contains_key(&target)
    }
}

impl Evaluator for StaticEvaluator {
    fn name(&self) -> &'static str {
        "static"
    }

    fn resolve(&self, target: &MemberRef, args: &[Value]) -> EvalResult {
        if let Some(value) = self.constants.get(&target.token) {
            return EvalResult::Ok(value.clone());
        }
        if !self.tolerates_unknown && args.iter().any(|a| !a.is_known()) {
            return EvalResult::Unresolved;
        }
        // Clone the handler out so the shard lock is not held while it runs.
        let handler = self.handlers.get(&target.token).map(|h| Arc::clone(h.value()));
        match handler {
            Some(handler) => handler(args),
            None => EvalResult::Unresolved,
        }
    }

    fn tolerates_unknown(&self) -> bool {
        self.tolerates_unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ElementType, MethodSig};

    fn target(row: u32) -> MemberRef {
        MemberRef::method(
            Token::from_parts(Token::MEMBER_REF, row),
            "Helpers",
            "Add",
            MethodSig::new(vec![ElementType::I4, ElementType::I4], ElementType::I4),
        )
    }

    fn add(args: &[Value]) -> EvalResult {
        match args {
            [Value::Known(Literal::I4(a)), Value::Known(Literal::I4(b))] => {
                EvalResult::Ok(Literal::I4(a.wrapping_add(*b)))
            }
            _ => EvalResult::Error("unexpected arguments".to_string()),
        }
    }

    #[test]
    fn test_handler_folds_arguments() {
        let add_ref = target(1);
        let evaluator = StaticEvaluator::new();
        evaluator.register_handler(add_ref.token, add);

        let args = [Value::Known(Literal::I4(3)), Value::Known(Literal::I4(4))];
        assert_eq!(evaluator.resolve(&add_ref, &args), EvalResult::Ok(Literal::I4(7)));
        assert!(evaluator.knows(add_ref.token));
        assert!(!evaluator.knows(target(2).token));
    }

    #[test]
    fn test_unknown_arguments_need_opt_in() {
        let add_ref = target(1);
        let args = [Value::Unknown, Value::Known(Literal::I4(4))];

        let strict = StaticEvaluator::new();
        strict.register_handler(add_ref.token, |_| EvalResult::Ok(Literal::I4(0)));
        assert_eq!(strict.resolve(&add_ref, &args), EvalResult::Unresolved);

        let tolerant = StaticEvaluator::new().with_unknown_inputs(true);
        tolerant.register_handler(add_ref.token, |_| EvalResult::Ok(Literal::I4(0)));
        assert!(tolerant.tolerates_unknown());
        assert_eq!(tolerant.resolve(&add_ref, &args), EvalResult::Ok(Literal::I4(0)));
    }

    #[test]
    fn test_unregistered_target_is_unresolved() {
        let evaluator = StaticEvaluator::new();
        assert_eq!(evaluator.resolve(&target(9), &[]), EvalResult::Unresolved);
    }
}
