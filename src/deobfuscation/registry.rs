//! Shared registry of oracle targets.
//!
//! The registry answers "is this call an oracle call?" for the inliner and
//! collects per-target statistics across every method processed. It also
//! caches evaluated results: obfuscators tend to call one decrypter with the
//! same arguments from many methods, and an isolated oracle round trip is
//! expensive.
//!
//! All state is held in `dashmap` collections so methods can be processed
//! concurrently against one registry.

use dashmap::{DashMap, DashSet};

use crate::{
    analysis::{Literal, Value},
    metadata::Token,
};

/// Per-target counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OracleStats {
    /// Call sites found by discovery
    pub discovered: usize,
    /// Call sites replaced by a literal
    pub inlined: usize,
    /// Call sites left alone because an argument was unknown
    pub unresolved: usize,
    /// Call sites the evaluator had no value for
    pub failed: usize,
}

/// Thread-safe set of oracle targets with statistics and a result cache.
#[derive(Debug, Default)]
pub struct OracleRegistry {
    targets: DashSet<Token>,
    stats: DashMap<Token, OracleStats>,
    cache: DashMap<(Token, String), Literal>,
}

impl OracleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry containing `targets`.
    pub fn with_targets(targets: impl IntoIterator<Item = Token>) -> Self {
        let registry = Self::new();
        for target in targets {
            registry.register(target);
        }
        registry
    }

    /// Marks `target` as an oracle. Returns `false` if it already was one.
    pub fn register(&self, target: Token) -> bool {
        self.targets.insert(target)
    }

    /// Returns `true` if calls to `target` should be inlined.
    #[must_use]
    pub fn is_oracle(&self, target: Token) -> bool {
        self.targets.contains(&target)
    }

    /// Number of registered targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if no target is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// All registered targets, sorted.
    #[must_use]
    pub fn targets(&self) -> Vec<Token> {
        let mut targets: Vec<Token> = self.targets.iter().map(|t| *t).collect();
        targets.sort_unstable();
        targets
    }

    /// Counters for `target`.
    #[must_use]
    pub fn stats(&self, target: Token) -> OracleStats {
        self.stats.get(&target).map(|s| *s).unwrap_or_default()
    }

    /// Counters summed over every target.
    #[must_use]
    pub fn total_stats(&self) -> OracleStats {
        self.stats.iter().fold(OracleStats::default(), |mut acc, s| {
            acc.discovered += s.discovered;
            acc.inlined += s.inlined;
            acc.unresolved += s.unresolved;
            acc.failed += s.failed;
            acc
        })
    }

    pub(crate) fn record_discovered(&self, target: Token) {
        self.stats.entry(target).or_default().discovered += 1;
    }

    pub(crate) fn record_inlined(&self, target: Token) {
        self.stats.entry(target).or_default().inlined += 1;
    }

    pub(crate) fn record_unresolved(&self, target: Token) {
        self.stats.entry(target).or_default().unresolved += 1;
    }

    pub(crate) fn record_failed(&self, target: Token) {
        self.stats.entry(target).or_default().failed += 1;
    }

    /// Cache key for a call; `None` unless every argument is known.
    fn cache_key(target: Token, args: &[Value]) -> Option<(Token, String)> {
        let mut key = String::new();
        for (i, arg) in args.iter().enumerate() {
            let literal = arg.as_literal()?;
            if i > 0 {
                key.push('\u{1f}');
            }
            // Display alone would conflate `"1"` and `1`.
            key.push_str(&format!("{literal:?}"));
        }
        Some((target, key))
    }

    /// A previously evaluated result for this call.
    #[must_use]
    pub fn cached(&self, target: Token, args: &[Value]) -> Option<Literal> {
        let key = Self::cache_key(target, args)?;
        self.cache.get(&key).map(|v| v.clone())
    }

    /// Remembers the result of a call with fully known arguments.
    pub fn cache(&self, target: Token, args: &[Value], value: Literal) {
        if let Some(key) = Self::cache_key(target, args) {
            self.cache.insert(key, value);
        }
    }

    /// Number of cached results.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_stats() {
        let target = Token::from_parts(Token::MEMBER_REF, 1);
        let registry = OracleRegistry::with_targets([target]);
        assert!(registry.is_oracle(target));
        assert!(!registry.register(target));
        assert!(!registry.is_oracle(Token::from_parts(Token::MEMBER_REF, 2)));

        registry.record_discovered(target);
        registry.record_discovered(target);
        registry.record_inlined(target);
        let stats = registry.stats(target);
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.inlined, 1);
        assert_eq!(registry.total_stats().discovered, 2);
    }

    #[test]
    fn test_cache_requires_known_arguments() {
        let target = Token::from_parts(Token::MEMBER_REF, 1);
        let registry = OracleRegistry::new();
        let known = [Value::Known(Literal::I4(1))];
        registry.cache(target, &known, Literal::from("one"));
        registry.cache(target, &[Value::Unknown], Literal::from("never"));

        assert_eq!(registry.cached(target, &known), Some(Literal::from("one")));
        assert_eq!(registry.cached(target, &[Value::Known(Literal::from("1"))]), None);
        assert_eq!(registry.cached(target, &[Value::Unknown]), None);
        assert_eq!(registry.cached_count(), 1);
    }
}
