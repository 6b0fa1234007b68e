//! Coverage endpoint: a Unix-domain socket the fuzz driver polls.
//!
//! Protocol: one request per connection. Whatever the driver sends is read
//! and discarded; the response is the full classified 2^16-byte snapshot,
//! after which the table is zeroed. Only one execution's trace is tracked
//! at a time; the driver is expected to serialize workloads on the
//! instrumented process.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, warn};

use crate::table::get_trace_table;
use crate::{Result, TraceError};

/// Environment variable overriding the endpoint socket path.
pub const SOCKET_ENV: &str = "EDGECOV_SOCKET";

/// Socket path used when `EDGECOV_SOCKET` is unset.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/edgecov.sock";

/// Effective endpoint socket path.
pub fn socket_path() -> PathBuf {
    std::env::var_os(SOCKET_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH), PathBuf::from)
}

/// Bind the coverage endpoint and start its accept loop.
///
/// Called from the first statement of the instrumented program's `main`.
/// Returns once the listener is bound; accepting runs on a dedicated
/// thread for the rest of the process lifetime.
pub fn start_listening() -> Result<()> {
    start_listening_at(&socket_path())
}

/// Bind the endpoint at an explicit path and start its accept loop.
pub fn start_listening_at(path: &Path) -> Result<()> {
    // A stale socket file from a previous run would fail the bind.
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path).map_err(|source| TraceError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "coverage endpoint listening");

    thread::spawn(move || accept_loop(&listener));
    Ok(())
}

fn accept_loop(listener: &UnixListener) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream) {
                        warn!(error = %err, "coverage request failed");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
            }
        }
    }
}

/// Serve one snapshot request: drain the request bytes, respond with the
/// classified table, and reset it for the next epoch.
fn handle_connection(mut stream: UnixStream) -> std::io::Result<()> {
    let mut request = [0u8; 64];
    let n = stream.read(&mut request)?;
    debug!(bytes = n, "coverage request received");

    let snapshot = get_trace_table().classify_snapshot_reset();
    stream.write_all(&snapshot[..])?;
    stream.flush()
}
