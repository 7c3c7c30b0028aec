//! Basic-block control flow graph used while rewriting a method body.
//!
//! # Architecture
//!
//! The graph is an arena of [`Block`]s addressed by [`BlockId`]. Blocks are
//! read through shared references; every change to instructions that affect
//! control flow, and every change to an edge, goes through a [`MethodCfg`]
//! method that updates both sides of the edge at once.
//!
//! # Key Components
//!
//! - [`CfgBuilder`] - Partitions a flat [`crate::metadata::MethodBody`] into blocks
//! - [`MethodCfg`] - The graph and its mutation primitives
//! - [`Block`] - Instructions plus fallthrough, targets and sources
//! - [`ScopeTree`] - Nesting of try, filter and handler scopes
//!
//! # Examples
//!
//! ```rust
//! use cflowkit::{
//!     analysis::CfgBuilder,
//!     assembly::{Instruction, Opcode},
//!     metadata::{MethodBody, Token},
//! };
//!
//! let body = MethodBody::new(
//!     Token::new(0x0600_0001),
//!     vec![
//!         Instruction::ldarg(0),
//!         Instruction::branch(Opcode::Brtrue, 3),
//!         Instruction::nop(),
//!         Instruction::simple(Opcode::Ret),
//!     ],
//! );
//! let cfg = CfgBuilder::build(&body)?;
//! assert_eq!(cfg.block_count(), 3);
//! cfg.check_invariants()?;
//! # Ok::<(), cflowkit::Error>(())
//! ```

mod block;
mod builder;
mod graph;
mod scope;

pub use block::{Block, BlockId};
pub use builder::CfgBuilder;
pub use graph::MethodCfg;
pub use scope::{RegionScopes, Scope, ScopeId, ScopeKind, ScopeTree};
