//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::Parser;

use edgecov::{DEFAULT_REMOTE_URL, DEFAULT_TARGET_DIR};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "edgecov")]
#[command(about = "Rewrites a Go source tree with AFL-style edge coverage instrumentation")]
#[command(version)]
pub struct Cli {
    /// Path to the local source tree to instrument
    #[arg(long, value_name = "DIR")]
    pub src: Option<PathBuf>,

    /// Clone the remote repository instead of copying a local tree
    #[arg(long)]
    pub remote: bool,

    /// Repository URL used with --remote
    #[arg(long, value_name = "URL", default_value = DEFAULT_REMOTE_URL)]
    pub remote_url: String,

    /// Where the instrumented tree is written; must not exist yet
    #[arg(long, value_name = "DIR", default_value = DEFAULT_TARGET_DIR)]
    pub target: PathBuf,

    /// Entry-point source relative to the target root (auto-detected when omitted)
    #[arg(long, value_name = "FILE")]
    pub entry: Option<PathBuf>,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long)]
    pub verbose: bool,
}
