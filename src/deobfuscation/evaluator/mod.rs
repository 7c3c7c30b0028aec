//! Pluggable computation of oracle call results.
//!
//! The inliner never executes anything itself. Once it has recovered the
//! arguments of an oracle call, it asks an [`Evaluator`] for the value the
//! call would return:
//!
//! - [`StaticEvaluator`] - in-process handlers and constant-returning proxies
//! - [`IsolatedEvaluator`] - a client for an out-of-process oracle that runs
//!   untrusted decrypt routines, with a timeout on every batch
//!
//! # Examples
//!
//! ```rust
//! use cflowkit::{
//!     analysis::{Literal, Value},
//!     deobfuscation::{EvalResult, Evaluator, StaticEvaluator},
//!     metadata::{ElementType, MemberRef, MethodSig, Token},
//! };
//!
//! let target = MemberRef::method(
//!     Token::new(0x0A00_0001),
//!     "Helpers",
//!     "Key",
//!     MethodSig::new(vec![], ElementType::I4),
//! );
//! let evaluator = StaticEvaluator::new();
//! evaluator.register_constant(target.token, Literal::I4(42));
//!
//! assert_eq!(evaluator.resolve(&target, &[]), EvalResult::Ok(Literal::I4(42)));
//! assert_eq!(
//!     evaluator.resolve_batch(&target, &[vec![], vec![Value::Unknown]]).len(),
//!     2
//! );
//! ```

mod isolated;
mod static_eval;

use std::fmt;

use thiserror::Error;

use crate::{
    analysis::{Literal, Value},
    metadata::MemberRef,
};

pub use isolated::{CancelToken, IsolatedEvaluator, OracleId, OracleTransport};
pub use static_eval::{Handler, StaticEvaluator};

/// Why an evaluator could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The oracle did not answer within the configured time.
    #[error("oracle timed out after {0} ms")]
    Timeout(u128),

    /// The oracle process or worker died.
    #[error("oracle crashed: {0}")]
    Crashed(String),

    /// The oracle answered with something that does not fit the request.
    #[error("oracle protocol violation: {0}")]
    Protocol(String),

    /// The oracle refused to evaluate the target.
    #[error("oracle rejected the call: {0}")]
    Rejected(String),
}

/// Outcome of evaluating one call.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    /// The value the call returns
    Ok(Literal),
    /// The evaluator has no answer for this call
    Unresolved,
    /// Evaluation failed
    Error(String),
}

impl EvalResult {
    /// The literal, if evaluation succeeded.
    #[must_use]
    pub fn literal(&self) -> Option<&Literal> {
        match self {
            EvalResult::Ok(literal) => Some(literal),
            EvalResult::Unresolved | EvalResult::Error(_) => None,
        }
    }

    /// Consumes the result, returning the literal if evaluation succeeded.
    #[must_use]
    pub fn into_literal(self) -> Option<Literal> {
        match self {
            EvalResult::Ok(literal) => Some(literal),
            EvalResult::Unresolved | EvalResult::Error(_) => None,
        }
    }
}

impl From<EvalError> for EvalResult {
    fn from(err: EvalError) -> Self {
        EvalResult::Error(err.to_string())
    }
}

impl fmt::Display for EvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalResult::Ok(literal) => write!(f, "{literal}"),
            EvalResult::Unresolved => f.write_str("unresolved"),
            EvalResult::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Computes the result of an oracle call from its arguments.
///
/// Implementations are shared across worker threads and must be internally
/// synchronized.
pub trait Evaluator: Send + Sync {
    /// Name used in events and logs.
    fn name(&self) -> &'static str;

    /// Evaluates a single call.
    fn resolve(&self, target: &MemberRef, args: &[Value]) -> EvalResult;

    /// Evaluates several calls to the same target.
    ///
    /// Must return exactly one result per entry of `calls`, in order. The
    /// default evaluates each call on its own.
    fn resolve_batch(&self, target: &MemberRef, calls: &[Vec<Value>]) -> Vec<EvalResult> {
        calls.iter().map(|args| self.resolve(target, args)).collect()
    }

    /// Returns `true` if the evaluator accepts `Unknown` arguments.
    fn tolerates_unknown(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_error_into_result() {
        let result = EvalResult::from(EvalError::Timeout(250));
        assert_eq!(result, EvalResult::Error("oracle timed out after 250 ms".to_string()));
        assert!(result.literal().is_none());
        assert_eq!(EvalResult::Unresolved.to_string(), "unresolved");
    }
}
