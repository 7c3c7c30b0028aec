//! Graph transformation passes.
//!
//! # Normalize Phase
//!
//! Structural cleanup, run to a fixpoint before and after every productive
//! value sweep.
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`ConstantBranchPass`] | Evaluates conditionals and switches fed by literal pushes |
//! | [`DeadBlockPass`] | Removes blocks unreachable from the entry and live handlers |
//! | [`NopBlockPass`] | Redirects edges past blocks that only hold `nop`s |
//! | [`BlockMergePass`] | Merges a block into its single predecessor |
//! | [`BranchLayoutPass`] | Folds conditionals with equal edges and flips conditionals towards layout order |
//!
//! # Value Phase
//!
//! | Pass | Description |
//! |------|-------------|
//! | [`CallInliningPass`] | Replaces oracle calls with their evaluated results |
//!
//! # Pass Execution
//!
//! Passes are executed by the [`PassScheduler`](crate::compiler::PassScheduler).
//! Each pass implements the [`CfgPass`](crate::compiler::CfgPass) trait and
//! reports whether it changed the method it ran on.

mod blockmerge;
mod constbranch;
mod deadblocks;
mod inlining;
mod layout;
mod nopblocks;

pub use blockmerge::BlockMergePass;
pub use constbranch::ConstantBranchPass;
pub use deadblocks::DeadBlockPass;
pub use inlining::CallInliningPass;
pub use layout::BranchLayoutPass;
pub use nopblocks::NopBlockPass;
