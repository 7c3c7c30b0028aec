//! Protected scopes of a method graph.
//!
//! Exception regions are kept as a tree of scopes instead of instruction
//! positions. Every block records the innermost scope it starts in; region
//! boundaries are recomputed from scope membership when the graph is
//! flattened, so no mutation ever has to patch a region by hand.

use std::fmt;

use crate::metadata::{ExceptionHandlerFlags, Token};

/// Handle to a scope in a [`super::MethodCfg`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub(crate) usize);

impl ScopeId {
    /// The method body itself.
    pub const ROOT: ScopeId = ScopeId(0);

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// What a scope protects or handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// The whole method
    Method,
    /// A protected `try` body
    Try,
    /// A filter expression
    Filter,
    /// A catch, finally or fault handler
    Handler,
}

/// A node of the scope tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// What this scope is
    pub kind: ScopeKind,
    /// Enclosing scope; `None` only for [`ScopeId::ROOT`]
    pub parent: Option<ScopeId>,
}

/// An exception region expressed through scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionScopes {
    /// Handler kind
    pub flags: ExceptionHandlerFlags,
    /// The protected body
    pub try_scope: ScopeId,
    /// The filter expression, for filter clauses
    pub filter_scope: Option<ScopeId>,
    /// The handler body
    pub handler_scope: ScopeId,
    /// Caught exception type
    pub catch_type: Option<Token>,
}

/// The scope tree of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    /// Creates a tree holding only the method scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Method,
                parent: None,
            }],
        }
    }

    /// Adds a child scope.
    pub fn add(&mut self, kind: ScopeKind, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            kind,
            parent: Some(parent),
        });
        id
    }

    /// Looks up a scope.
    #[must_use]
    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    /// Number of scopes, the method scope included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always `false`; the method scope is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// `scope` followed by each enclosing scope up to the root.
    pub fn ancestors(&self, scope: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(Some(scope), move |s| self.get(*s).and_then(|sc| sc.parent))
    }

    /// Returns `true` when `inner` is `outer` or nested inside it.
    #[must_use]
    pub fn contains(&self, outer: ScopeId, inner: ScopeId) -> bool {
        self.ancestors(inner).any(|s| s == outer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nesting() {
        let mut tree = ScopeTree::new();
        let outer_try = tree.add(ScopeKind::Try, ScopeId::ROOT);
        let inner_try = tree.add(ScopeKind::Try, outer_try);
        let handler = tree.add(ScopeKind::Handler, ScopeId::ROOT);

        assert!(tree.contains(ScopeId::ROOT, inner_try));
        assert!(tree.contains(outer_try, inner_try));
        assert!(tree.contains(inner_try, inner_try));
        assert!(!tree.contains(inner_try, outer_try));
        assert!(!tree.contains(outer_try, handler));

        let chain: Vec<_> = tree.ancestors(inner_try).collect();
        assert_eq!(chain, vec![inner_try, outer_try, ScopeId::ROOT]);
        assert_eq!(tree.len(), 4);
    }
}
