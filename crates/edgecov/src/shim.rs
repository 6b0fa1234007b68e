//! Emission of the cgo shim package the rewritten sources import.
//!
//! Counter calls in the instrumented tree go through
//! `github.com/edgecov/edgecov/dep`; that package is a thin cgo bridge
//! into the Rust trace runtime (built as a static or shared library).
//! The builder writes it into the target tree and points the target's
//! `go.mod` at it with a replace directive.

use std::fs;
use std::path::Path;

use edgecov_rewrite::DEP_IMPORT_PATH;
use tracing::{debug, info};

use crate::Result;

/// Directory of the emitted shim package, relative to the target root.
pub const DEP_DIR: &str = "dep";

const DEP_GO: &str = r#"// Package dep bridges instrumented sources to the edgecov trace runtime.
//
// Every basic block of the rewritten tree calls
// GetTraceTable().AddCount(src, dst) through this package; the calls land
// in the edgecov-trace library linked into the final binary.
package dep

/*
#cgo LDFLAGS: -ledgecov_trace
#include <stdint.h>
extern void edgecov_add_count(uint16_t src, uint16_t dst);
extern void edgecov_start_listening(void);
*/
import "C"

// TraceTable is a handle on the runtime's process-wide counter table.
type TraceTable struct{}

var table TraceTable

// GetTraceTable returns the trace table singleton.
func GetTraceTable() *TraceTable {
	return &table
}

// AddCount records one traversal of the edge src -> dst.
func (t *TraceTable) AddCount(src, dst uint16) {
	C.edgecov_add_count(C.uint16_t(src), C.uint16_t(dst))
}

// StartListening binds the coverage endpoint and starts serving snapshot
// requests from the fuzz driver.
func StartListening() {
	C.edgecov_start_listening()
}
"#;

/// Write the shim package into the target tree and wire it into the
/// target's `go.mod` when one exists.
pub fn write_dep_package(target: &Path) -> Result<()> {
    let dir = target.join(DEP_DIR);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("dep.go"), DEP_GO)?;
    fs::write(
        dir.join("go.mod"),
        format!("module {DEP_IMPORT_PATH}\n\ngo 1.21\n"),
    )?;
    info!(dir = %dir.display(), "wrote trace shim package");

    let go_mod = target.join("go.mod");
    if go_mod.is_file() {
        let mut contents = fs::read_to_string(&go_mod)?;
        if contents.contains(DEP_IMPORT_PATH) {
            debug!("go.mod already references the shim");
        } else {
            contents.push_str(&format!(
                "\nrequire {DEP_IMPORT_PATH} v0.0.0\n\nreplace {DEP_IMPORT_PATH} => ./{DEP_DIR}\n"
            ));
            fs::write(&go_mod, contents)?;
        }
    }
    Ok(())
}
