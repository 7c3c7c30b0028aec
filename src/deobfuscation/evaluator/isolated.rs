//! Client for a process-isolated oracle.
//!
//! The oracle itself (a sandbox host that loads the protected module and
//! executes its decrypt routines) lives outside this crate and is reached
//! through an [`OracleTransport`]. This client adds what the rewriter needs
//! around it:
//!
//! - every target is defined once per evaluator, then addressed by its [`OracleId`]
//! - every batch runs on a worker thread and is abandoned after the timeout
//! - the worker receives a [`CancelToken`] that is set when the batch is abandoned
//! - timeouts, crashes and malformed replies become [`EvalResult::Error`]
//!   for every call of the batch

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam::channel::{self, RecvTimeoutError};
use dashmap::DashMap;

use crate::{
    analysis::{Literal, Value},
    deobfuscation::evaluator::{EvalError, EvalResult, Evaluator},
    metadata::{MemberRef, Token},
};

/// Handle of a target defined in the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OracleId(pub u32);

/// Cooperative cancellation flag handed to a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Connection to an out-of-process oracle.
pub trait OracleTransport: Send + Sync + 'static {
    /// Makes `target` callable in the oracle.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalError`] if the oracle cannot load the target.
    fn define(&self, target: &MemberRef) -> Result<OracleId, EvalError>;

    /// Runs the target once per entry of `calls`.
    ///
    /// The reply holds one entry per call; `None` marks a call the oracle
    /// could not evaluate. Implementations should poll `cancel` and give up
    /// once it is set.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalError`] if the whole batch failed.
    fn invoke(
        &self,
        oracle: OracleId,
        calls: &[Vec<Literal>],
        cancel: &CancelToken,
    ) -> Result<Vec<Option<Literal>>, EvalError>;
}

/// Evaluator backed by a process-isolated oracle.
pub struct IsolatedEvaluator<T: OracleTransport> {
    transport: Arc<T>,
    defined: DashMap<Token, OracleId>,
    timeout: Duration,
}

impl<T: OracleTransport> IsolatedEvaluator<T> {
    /// Creates a client with the given per-batch timeout.
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport: Arc::new(transport),
            defined: DashMap::new(),
            timeout,
        }
    }

    /// Number of targets defined in the oracle so far.
    #[must_use]
    pub fn defined_count(&self) -> usize {
        self.defined.len()
    }

    /// The oracle handle of `target`, defining it on first use.
    fn oracle_id(&self, target: &MemberRef) -> Result<OracleId, EvalError> {
        // The shard stays locked while defining, so concurrent batches for the
        // same target wait for the first definition instead of repeating it.
        self.defined
            .entry(target.token)
            .or_try_insert_with(|| self.transport.define(target))
            .map(|id| *id)
    }

    /// Runs one batch on a worker thread and waits at most `self.timeout`.
    fn invoke_with_timeout(
        &self,
        oracle: OracleId,
        calls: Vec<Vec<Literal>>,
    ) -> Result<Vec<Option<Literal>>, EvalError> {
        let (tx, rx) = channel::bounded(1);
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let transport = Arc::clone(&self.transport);

        thread::Builder::new()
            .name("cflowkit-oracle".to_string())
            .spawn(move || {
                let reply = transport.invoke(oracle, &calls, &worker_cancel);
                // The receiver is gone when the batch timed out.
                tx.send(reply).ok();
            })
            .map_err(|e| EvalError::Crashed(format!("cannot start oracle worker: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                Err(EvalError::Timeout(self.timeout.as_millis()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EvalError::Crashed(
                "oracle worker exited without a reply".to_string(),
            )),
        }
    }
}

impl<T: OracleTransport> Evaluator for IsolatedEvaluator<T> {
    fn name(&self) -> &'static str {
        "isolated"
    }

    fn resolve(&self, target: &MemberRef, args: &[Value]) -> EvalResult {
        self.resolve_batch(target, &[args.to_vec()])
            .pop()
            .unwrap_or(EvalResult::Unresolved)
    }

    fn resolve_batch(&self, target: &MemberRef, calls: &[Vec<Value>]) -> Vec<EvalResult> {
        let mut results = vec![EvalResult::Unresolved; calls.len()];

        // Only fully known calls can be shipped to the oracle.
        let (slots, payload): (Vec<usize>, Vec<Vec<Literal>>) = calls
            .iter()
            .enumerate()
            .filter_map(|(i, args)| {
                args.iter()
                    .map(|a| a.as_literal().cloned())
                    .collect::<Option<Vec<Literal>>>()
                    .map(|literals| (i, literals))
            })
            .unzip();
        if slots.is_empty() {
            return results;
        }

        let reply = self
            .oracle_id(target)
            .and_then(|id| self.invoke_with_timeout(id, payload))
            .and_then(|values| {
                if values.len() == slots.len() {
                    Ok(values)
                } else {
                    Err(EvalError::Protocol(format!(
                        "{} results for {} calls",
                        values.len(),
                        slots.len()
                    )))
                }
            });

        match reply {
            Ok(values) => {
                for (slot, value) in slots.into_iter().zip(values) {
                    results[slot] = value.map_or(EvalResult::Unresolved, EvalResult::Ok);
                }
            }
            Err(err) => {
                log::warn!(target: "cflowkit", "oracle batch for {target} failed: {err}");
                for slot in slots {
                    results[slot] = EvalResult::from(err.clone());
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicUsize, Barrier};

    use super::*;
    use crate::metadata::{ElementType, MethodSig};

    fn target() -> MemberRef {
        MemberRef::method(
            Token::from_parts(Token::MEMBER_REF, 7),
            "Helpers",
            "Decrypt",
            MethodSig::new(vec![ElementType::I4], ElementType::String),
        )
    }

    /// Answers `"s<arg>"`, or sleeps past any sane timeout for argument 0.
    #[derive(Default)]
    struct EchoTransport {
        defines: AtomicUsize,
        short_reply: bool,
        define_delay: Option<Duration>,
    }

    impl OracleTransport for EchoTransport {
        fn define(&self, _target: &MemberRef) -> Result<OracleId, EvalError> {
            if let Some(delay) = self.define_delay {
                thread::sleep(delay);
            }
            let n = self.defines.fetch_add(1, Ordering::Relaxed);
            Ok(OracleId(u32::try_from(n).unwrap_or(u32::MAX)))
        }

        fn invoke(
            &self,
            _oracle: OracleId,
            calls: &[Vec<Literal>],
            cancel: &CancelToken,
        ) -> Result<Vec<Option<Literal>>, EvalError> {
            if calls.iter().any(|c| c == &[Literal::I4(0)]) {
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                return Err(EvalError::Rejected("cancelled".to_string()));
            }
            let mut out: Vec<Option<Literal>> = calls
                .iter()
                .map(|c| match c.as_slice() {
                    [Literal::I4(v)] => Some(Literal::from(format!("s{v}").as_str())),
                    _ => None,
                })
                .collect();
            if self.short_reply {
                out.pop();
            }
            Ok(out)
        }
    }

    fn known(v: i32) -> Vec<Value> {
        vec![Value::Known(Literal::I4(v))]
    }

    #[test]
    fn test_batch_defines_target_once() {
        let evaluator = IsolatedEvaluator::new(EchoTransport::default(), Duration::from_secs(5));
        let results = evaluator.resolve_batch(&target(), &[known(1), vec![Value::Unknown], known(2)]);
        assert_eq!(
            results,
            vec![
                EvalResult::Ok(Literal::from("s1")),
                EvalResult::Unresolved,
                EvalResult::Ok(Literal::from("s2")),
            ]
        );
        evaluator.resolve(&target(), &known(3));
        assert_eq!(evaluator.defined_count(), 1);
        assert_eq!(evaluator.transport.defines.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_timeout_fails_the_whole_batch() {
        let evaluator =
            IsolatedEvaluator::new(EchoTransport::default(), Duration::from_millis(50));
        let results = evaluator.resolve_batch(&target(), &[known(1), known(0)]);
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result, EvalResult::from(EvalError::Timeout(50)));
        }
    }

    #[test]
    fn test_short_reply_is_a_protocol_error() {
        let transport = EchoTransport {
            short_reply: true,
            ..EchoTransport::default()
        };
        let evaluator = IsolatedEvaluator::new(transport, Duration::from_secs(5));
        let results = evaluator.resolve_batch(&target(), &[known(1), known(2)]);
        assert!(results
            .iter()
            .all(|r| matches!(r, EvalResult::Error(m) if m.contains("protocol"))));
    }

    #[test]
    fn test_concurrent_batches_define_target_once() {
        let transport = EchoTransport {
            define_delay: Some(Duration::from_millis(100)),
            ..EchoTransport::default()
        };
        let evaluator = IsolatedEvaluator::new(transport, Duration::from_secs(5));
        let barrier = Barrier::new(4);

        thread::scope(|s| {
            for i in 1..=4 {
                let evaluator = &evaluator;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let result = evaluator.resolve(&target(), &known(i));
                    assert_eq!(result, EvalResult::Ok(Literal::from(format!("s{i}").as_str())));
                });
            }
        });

        assert_eq!(evaluator.defined_count(), 1);
        assert_eq!(evaluator.transport.defines.load(Ordering::Relaxed), 1);
    }
}
