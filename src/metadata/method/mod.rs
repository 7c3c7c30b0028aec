//! Flat method bodies and their exception regions.

mod body;
mod exceptions;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandlerFlags, ExceptionRegion};
