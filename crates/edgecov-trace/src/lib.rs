//! Runtime support for edgecov-instrumented Go programs.
//!
//! This crate is linked into the instrumented process (as a staticlib or
//! cdylib, reached from Go through the emitted cgo shim package) and holds
//! the AFL-style edge coverage state:
//!
//! - **Trace table**: a 2^16-byte saturating counter array, one byte per
//!   edge key `(src << 1) ^ dst`, updated from every instrumented basic
//!   block.
//! - **Endpoint**: a Unix-domain socket accept loop that lets the fuzz
//!   driver pull a classified snapshot of the table between executions.
//!
//! The table is a process-wide singleton created lazily on first access;
//! the accept loop is started by the `StartListening()` call the
//! instrumentor injects at the top of the target's `main`.

#[cfg(unix)]
mod endpoint;
#[cfg(unix)]
mod ffi;
mod table;

#[cfg(unix)]
pub use endpoint::{DEFAULT_SOCKET_PATH, SOCKET_ENV, socket_path, start_listening};
pub use table::{BlockId, TRACE_BITS_SIZE, TraceTable, get_trace_table};

use std::path::PathBuf;

use thiserror::Error;

/// Trace runtime errors.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to bind coverage endpoint at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
