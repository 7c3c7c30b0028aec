//! Graph representation and read-only analyses over method bodies.
//!
//! # Architecture
//!
//! - [`cfg`] - The basic-block graph, its builder and mutation primitives
//! - [`stack`] - Backward stack-effect walker used for argument recovery
//! - [`locals`] - Single-assignment local constants
//! - [`value`] - [`Literal`] and [`Value`], shared with evaluators
//!
//! The walker and local recovery never mutate a graph; all rewriting is done
//! by the passes in [`crate::compiler`].

pub mod cfg;
pub mod locals;
pub mod stack;
pub mod value;

pub use cfg::{
    Block, BlockId, CfgBuilder, MethodCfg, RegionScopes, Scope, ScopeId, ScopeKind, ScopeTree,
};
pub use locals::LocalValues;
pub use stack::{producers, recover_arguments, ArgumentSlot, RecoveredArguments, WalkError};
pub use value::{Literal, Value};
