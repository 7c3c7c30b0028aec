//! Metadata types shared with the container layer.
//!
//! The container parser that produces these values lives outside this crate.
//! What remains here is the boundary shape:
//!
//! - [`Token`] identifies methods, fields and types
//! - [`MemberRef`] and [`MethodSig`] describe operands of call and field instructions
//! - [`MethodBody`] and [`ExceptionRegion`] are the flat form consumed and produced by the rewriter

pub mod method;
mod signature;
mod token;

pub use method::{ExceptionHandlerFlags, ExceptionRegion, MethodBody};
pub use signature::{ElementType, MemberKind, MemberRef, MemberRefRc, MethodSig};
pub use token::Token;
