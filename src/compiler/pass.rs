//! The pass interface.

use crate::{analysis::MethodCfg, compiler::PassContext, metadata::Token, Result};

/// A transformation over one method graph.
///
/// Passes are shared across worker threads and must not keep per-method
/// state; everything method-specific lives in the graph or in the
/// [`PassContext`].
pub trait CfgPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this pass run on a specific method?
    fn should_run(&self, _method: Token, _ctx: &PassContext) -> bool {
        true
    }

    /// Run the pass on a single method graph.
    ///
    /// Returns `true` if any changes were made. Events should be recorded
    /// directly to `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph was found in an inconsistent state. The
    /// scheduler then abandons the method.
    fn run_on_method(&self, cfg: &mut MethodCfg, ctx: &PassContext) -> Result<bool>;

    /// Called once before the pass runs in a sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &PassContext) -> Result<()> {
        Ok(())
    }

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
