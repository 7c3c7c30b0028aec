//! Call-result inlining framework.
//!
//! Obfuscators hide string and constant literals behind calls to decrypt
//! routines. This module determines the value such a call returns and puts
//! the literal back in place of the call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Inlining Pipeline                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Input: Vec<MethodBody>                                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Build Graphs (parallel)                       │   │
//! │  │  Leaders → Blocks → Edges → Exception scopes                     │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Pass Scheduler (Fixpoint)                     │   │
//! │  │  Normalize: dead blocks, nop blocks, merging, branch layout      │   │
//! │  │  Value:     call-result inlining                                 │   │
//! │  │     Discovery → OracleRegistry → Evaluator → Splice              │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Code Generation                               │   │
//! │  │  Graph → flat body, exception regions remapped                   │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  Output: DeobfuscationResult (bodies, events, failed methods)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`DeobfuscationEngine`] - Orchestrates build, passes and code generation
//! - [`CallResultInliner`] - Two-phase discovery and splice of oracle calls
//! - [`OracleRegistry`] - Which targets are oracles, statistics, result cache
//! - [`Evaluator`] - Computes call results; [`StaticEvaluator`] in process,
//!   [`IsolatedEvaluator`] through an out-of-process oracle
//! - [`EngineConfig`] - Iteration limits, argument mode, evaluator timeout

mod config;
mod engine;
mod evaluator;
mod inliner;
mod registry;
mod result;

pub use config::{ArgumentMode, EngineConfig};
pub use engine::DeobfuscationEngine;
pub use evaluator::{
    CancelToken, EvalError, EvalResult, Evaluator, Handler, IsolatedEvaluator, OracleId,
    OracleTransport, StaticEvaluator,
};
pub use inliner::{CallResult, CallResultInliner};
pub use registry::{OracleRegistry, OracleStats};
pub use result::DeobfuscationResult;
