use crate::config::{Configuration, NodeId};
use crate::error::Error;

/**
 * Common contract of the explicit time-stepping solvers. A solver is
 * configured exactly once (declare the expected configuration nodes, then
 * apply concrete values, allocate fields and resolve sources), after which
 * `solve` may be invoked arbitrarily many times. `solve` runs from within a
 * broadcast pool task: every execution context calls it once per step with
 * its own `thread_id`, and the solver coordinates the contexts internally
 * with barriers and reductions. The returned `dt` lets the caller drive
 * diagnostics and snapshot cadence.
 */
pub trait Solver {
    /// Declare the configuration nodes this solver expects, with defaults,
    /// under the given node.
    fn fill_configuration_scheme(&self, config: &mut Configuration, node: NodeId);

    /// Read concrete configuration values, validate them, and allocate the
    /// solver's fields. Contract violations (out-of-range sources,
    /// non-positive coefficients) are rejected here, before any step runs.
    fn apply_configuration(&mut self, config: &Configuration, node: NodeId) -> Result<(), Error>;

    /// Advance the fields by one step. Must be called from every pool
    /// context of a single broadcast task, in lockstep.
    fn solve(&self, step: u64, thread_id: usize, num_threads: usize) -> Result<f64, Error>;
}
