//! Synthesizes the counter-update statement injected at block entries.

use edgecov_trace::BlockId;

use crate::DEP_IMPORT_ALIAS;

/// Render the counter-update call for the edge `src -> dst`.
///
/// The statement reads the trace-table singleton through the reserved
/// import alias and records the edge; it is what lands as the first
/// statement of every instrumented basic block.
pub fn counter_stmt(src: BlockId, dst: BlockId) -> String {
    format!("{DEP_IMPORT_ALIAS}.GetTraceTable().AddCount({src}, {dst})")
}
