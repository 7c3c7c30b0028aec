use thiserror::Error;

use crate::{analysis::BlockId, deobfuscation::EvalError};

/// Helper macro for creating malformed input errors with source location information.
///
/// Raised while building a control-flow graph from a flat method body, before any
/// rewriting has taken place.
#[macro_export]
macro_rules! malformed_error {
    // Single string version
    ($msg:literal) => {
        $crate::Error::Malformed {
            message: format!($msg),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:literal, $($arg:tt)*) => {
        $crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Helper macro for creating structural invariant violations with source location information.
///
/// A structural error means an edge or a block was not in the state a mutation
/// expected it to be in. It always points at a bug in an earlier graph mutation.
#[macro_export]
macro_rules! structural_error {
    ($msg:literal) => {
        $crate::Error::Structural {
            message: format!($msg),
            file: file!(),
            line: line!(),
        }
    };

    ($fmt:literal, $($arg:tt)*) => {
        $crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant is recoverable at method granularity: the
/// [`crate::deobfuscation::DeobfuscationEngine`] catches errors per method, keeps that
/// method's original body, and continues with the rest of the module.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Branch target or exception region outside the method
/// - [`Error::Empty`] - A method body without instructions
///
/// ## Graph Errors
/// - [`Error::Structural`] - An edge or block was not in the expected state
/// - [`Error::InstructionRange`] - An instruction range exceeds the block
/// - [`Error::InvalidBlock`] - A block handle does not name a live block
///
/// ## Evaluation and Configuration
/// - [`Error::Evaluator`] - An evaluator failure escalated by a caller
/// - [`Error::Configuration`] - Invalid engine limits
///
/// # Examples
///
/// ```rust
/// use cflowkit::{analysis::CfgBuilder, metadata::MethodBody, metadata::Token, Error};
///
/// let body = MethodBody::new(Token::new(0x0600_0001), Vec::new());
/// match CfgBuilder::build(&body) {
///     Err(Error::Empty) => {}
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method body is damaged and could not be turned into a graph.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A graph mutation found an edge or block in an unexpected state.
    ///
    /// Fatal for the current method only.
    #[error("Structural invariant violated - {file}:{line}: {message}")]
    Structural {
        /// Description of the violated invariant
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An instruction range `[index, index + count)` does not fit the block.
    #[error("Instruction range {index}+{count} exceeds block length {len}")]
    InstructionRange {
        /// First index of the requested range
        index: usize,
        /// Number of instructions in the requested range
        count: usize,
        /// Number of instructions in the block
        len: usize,
    },

    /// The block handle does not refer to a live block of this graph.
    #[error("Block {0} does not exist or was removed")]
    InvalidBlock(BlockId),

    /// Provided input was empty.
    #[error("Provided method body was empty")]
    Empty,

    /// An evaluator failure that a caller chose to escalate.
    #[error("{0}")]
    Evaluator(#[from] EvalError),

    /// The engine configuration is not usable.
    #[error("Invalid configuration - {0}")]
    Configuration(String),
}
