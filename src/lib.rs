// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # cflowkit
//!
//! A basic-block control-flow IR for stack-based bytecode and a call-result
//! inlining engine built on top of it. Given a method body whose literals
//! are hidden behind calls to decrypt routines, `cflowkit` recovers each
//! call's arguments from the evaluation stack, asks a pluggable evaluator
//! for the result and splices the literal back into the graph.
//!
//! # Features
//!
//! - **Arena control-flow graph** - blocks addressed by [`analysis::BlockId`];
//!   every edge change goes through one mutation API that keeps successor and
//!   predecessor lists consistent
//! - **Exception scopes** - try, filter and handler regions survive merges,
//!   dead block removal and code generation
//! - **Stack-effect walker** - backward recovery of call arguments, nested
//!   calls treated as single value-producing units
//! - **Pluggable evaluation** - in-process handlers or a process-isolated
//!   oracle with a timeout per batch
//! - **Fixpoint pipeline** - normalize and value passes scheduled until
//!   stable, methods processed in parallel with `rayon`
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use cflowkit::prelude::*;
//!
//! let add = Arc::new(MemberRef::method(
//!     Token::new(0x0A00_0002),
//!     "Obfuscated.Constants",
//!     "Add",
//!     MethodSig::new(vec![ElementType::I4, ElementType::I4], ElementType::I4),
//! ));
//! let evaluator = StaticEvaluator::new();
//! evaluator.register_handler(add.token, |args| match args {
//!     [Value::Known(Literal::I4(a)), Value::Known(Literal::I4(b))] => {
//!         EvalResult::Ok(Literal::I4(a.wrapping_add(*b)))
//!     }
//!     _ => EvalResult::Unresolved,
//! });
//!
//! let engine = DeobfuscationEngine::new(EngineConfig::default(), Arc::new(evaluator));
//! engine.register_oracle(add.token);
//!
//! let body = MethodBody::new(
//!     Token::new(0x0600_0001),
//!     vec![
//!         Instruction::ldc_i4(3),
//!         Instruction::ldc_i4(4),
//!         Instruction::call(add),
//!         Instruction::simple(Opcode::Ret),
//!     ],
//! );
//! let result = engine.process(vec![body])?;
//! assert_eq!(result.bodies[0].instructions[0], Instruction::ldc_i4(7));
//! # Ok::<(), cflowkit::Error>(())
//! ```
//!
//! # Architecture
//!
//! `cflowkit` is organized into several key modules:
//!
//! - [`metadata`] - Tokens, signatures, member references and flat method bodies
//! - [`assembly`] - Opcodes, instructions and their stack and flow behavior
//! - [`analysis`] - The graph, its builder, the stack walker and local constants
//! - [`compiler`] - Passes, the fixpoint scheduler, code generation and events
//! - [`deobfuscation`] - Evaluators, the oracle registry, the inliner and the engine
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T>`] with [`Error`]. Inside the
//! engine, errors are confined to the method they occur in: the method keeps
//! its original body and the error is reported in
//! [`deobfuscation::DeobfuscationResult::failed`].
//!
//! # Logging
//!
//! Every transformation and diagnostic is recorded in a
//! [`compiler::EventLog`] and mirrored to the [`log`] facade under the
//! `cflowkit` target. The library never installs a logger.

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

pub mod analysis;
pub mod assembly;
pub mod compiler;
pub mod deobfuscation;
pub mod metadata;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use cflowkit::prelude::*;
///
/// let token = Token::new(0x0600_0001);
/// assert_eq!(token.table(), 0x06);
/// ```
pub mod prelude;

/// `cflowkit` Result type.
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cflowkit` Error type.
///
/// The main error type for all operations in this crate.
pub use error::Error;
