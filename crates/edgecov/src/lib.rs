//! edgecov - AFL-style edge coverage instrumentation for Go source trees.
//!
//! The builder copies (or clones) a Go source tree into a target
//! directory, rewrites every non-test source file so each basic block
//! entry records a coverage edge, injects the runtime import and the
//! endpoint startup call, and drops the cgo shim package the rewritten
//! sources link against. The target's own build system then produces the
//! instrumented binary.
//!
//! # Example
//!
//! ```ignore
//! use edgecov::{Config, pipeline};
//!
//! let config = Config::local("/src/tidb", "/tmp/edgecov-build");
//! config.validate()?;
//! let stats = pipeline::run(&config)?;
//! println!("{} counters injected", stats.counters);
//! ```

pub mod acquire;
pub mod config;
pub mod pipeline;
pub mod shim;

pub use config::{Config, DEFAULT_REMOTE_URL, DEFAULT_TARGET_DIR};
pub use pipeline::InstrumentStats;

use std::path::PathBuf;

use thiserror::Error;

/// Builder errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("directory of source code is not assigned")]
    MissingSource,
    #[error("source directory {} does not exist", .0.display())]
    SourceMissing(PathBuf),
    #[error("target directory {} already exists", .0.display())]
    TargetExists(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to rewrite {}: {source}", .path.display())]
    Rewrite {
        path: PathBuf,
        source: edgecov_rewrite::RewriteError,
    },
    #[error("git clone of {url} exited with {status}")]
    CloneFailed {
        url: String,
        status: std::process::ExitStatus,
    },
    #[error("no `func main` found under {}", .0.display())]
    NoEntryPoint(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
