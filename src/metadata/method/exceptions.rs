//! Exception regions of a flat method body.
//!
//! Unlike the on-disk handler table, every boundary here is an instruction
//! index into [`crate::metadata::MethodBody::instructions`]. End positions are
//! exclusive and may equal the instruction count.

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Kind of handler attached to a protected region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// Typed catch clause
        const EXCEPTION = 0x0000;
        /// Filter clause followed by its handler
        const FILTER = 0x0001;
        /// Finally clause
        const FINALLY = 0x0002;
        /// Fault clause
        const FAULT = 0x0004;
    }
}

/// A try region together with one of its handlers.
///
/// Several regions may share the same `try_start`/`try_end` pair; they then
/// describe one protected block with multiple handlers, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Handler kind
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction
    pub try_start: usize,
    /// One past the last protected instruction
    pub try_end: usize,
    /// First instruction of the filter, for [`ExceptionHandlerFlags::FILTER`]
    pub filter_start: Option<usize>,
    /// First handler instruction
    pub handler_start: usize,
    /// One past the last handler instruction
    pub handler_end: usize,
    /// Caught exception type, for typed catch clauses
    pub catch_type: Option<Token>,
}

impl ExceptionRegion {
    /// Creates a typed catch region.
    #[must_use]
    pub fn catch(
        try_range: (usize, usize),
        handler_range: (usize, usize),
        catch_type: Token,
    ) -> Self {
        Self {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_range.0,
            try_end: try_range.1,
            filter_start: None,
            handler_start: handler_range.0,
            handler_end: handler_range.1,
            catch_type: Some(catch_type),
        }
    }

    /// Creates a finally region.
    #[must_use]
    pub fn finally(try_range: (usize, usize), handler_range: (usize, usize)) -> Self {
        Self {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_range.0,
            try_end: try_range.1,
            filter_start: None,
            handler_start: handler_range.0,
            handler_end: handler_range.1,
            catch_type: None,
        }
    }

    /// Creates a filter region; the filter runs from `filter_start` up to `handler_start`.
    #[must_use]
    pub fn filter(
        try_range: (usize, usize),
        filter_start: usize,
        handler_range: (usize, usize),
    ) -> Self {
        Self {
            flags: ExceptionHandlerFlags::FILTER,
            try_start: try_range.0,
            try_end: try_range.1,
            filter_start: Some(filter_start),
            handler_start: handler_range.0,
            handler_end: handler_range.1,
            catch_type: None,
        }
    }

    /// Returns `true` for a filter clause.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// Every boundary index of this region, used to start new blocks.
    pub fn boundaries(&self) -> impl Iterator<Item = usize> {
        [
            Some(self.try_start),
            Some(self.try_end),
            self.filter_start,
            Some(self.handler_start),
            Some(self.handler_end),
        ]
        .into_iter()
        .flatten()
    }
}
