//! C ABI surface for the cgo shim package.
//!
//! The instrumentor emits a small Go package into the target tree whose
//! `AddCount`/`StartListening` wrappers call straight into these symbols;
//! the instrumented server links this crate as a static or shared library.

use tracing::error;

use crate::endpoint::start_listening;
use crate::table::get_trace_table;

/// Record one edge traversal. Callable from any thread.
#[unsafe(no_mangle)]
pub extern "C" fn edgecov_add_count(src: u16, dst: u16) {
    get_trace_table().add_count(src, dst);
}

/// Bind the coverage endpoint and start serving snapshot requests.
///
/// Errors are logged rather than returned: the caller is the injected
/// first statement of the target's `main`, which has no error path.
#[unsafe(no_mangle)]
pub extern "C" fn edgecov_start_listening() {
    if let Err(err) = start_listening() {
        error!(error = %err, "failed to start coverage endpoint");
    }
}
