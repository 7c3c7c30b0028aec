//! # cflowkit Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cflowkit library. Import this module to get quick access to the essential
//! types for building graphs and inlining call results.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cflowkit operations
pub use crate::Error;

/// The result type used throughout cflowkit
pub use crate::Result;

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata token type, the identity of methods and oracle targets
pub use crate::metadata::Token;

/// Signatures and member references
pub use crate::metadata::{ElementType, MemberKind, MemberRef, MemberRefRc, MethodSig};

/// Flat method bodies and their exception regions
pub use crate::metadata::{ExceptionHandlerFlags, ExceptionRegion, MethodBody};

// ================================================================================================
// Instructions
// ================================================================================================

/// Instructions with their opcode and operand
pub use crate::assembly::{FlowType, Instruction, Opcode, Operand, StackBehavior};

// ================================================================================================
// Analysis
// ================================================================================================

/// The control-flow graph and its builder
pub use crate::analysis::{Block, BlockId, CfgBuilder, MethodCfg, ScopeId, ScopeKind};

/// Stack values and argument recovery
pub use crate::analysis::{recover_arguments, Literal, LocalValues, RecoveredArguments, Value};

// ================================================================================================
// Passes and Code Generation
// ================================================================================================

/// Pass infrastructure
pub use crate::compiler::{CfgPass, PassContext, PassScheduler};

/// Built-in passes
pub use crate::compiler::{
    BlockMergePass, BranchLayoutPass, CallInliningPass, ConstantBranchPass, DeadBlockPass,
    NopBlockPass,
};

/// Flattening a graph back into a body
pub use crate::compiler::CfgCodeGenerator;

/// Events and statistics
pub use crate::compiler::{DerivedStats, EventKind, EventLog};

// ================================================================================================
// Deobfuscation
// ================================================================================================

/// Engine, configuration and results
pub use crate::deobfuscation::{ArgumentMode, DeobfuscationEngine, DeobfuscationResult, EngineConfig};

/// Evaluators
pub use crate::deobfuscation::{
    EvalError, EvalResult, Evaluator, IsolatedEvaluator, OracleTransport, StaticEvaluator,
};

/// Inlining
pub use crate::deobfuscation::{CallResult, CallResultInliner, OracleRegistry};
