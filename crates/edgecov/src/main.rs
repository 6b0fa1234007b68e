//! edgecov CLI - Go edge coverage instrumentor

mod cli;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, EXIT_FAILURE, EXIT_SUCCESS};
use edgecov::{Config, pipeline};

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(default_level.parse().unwrap()),
        )
        .with_target(false)
        .init();

    let config = Config {
        src_dir: cli.src,
        from_remote: cli.remote,
        remote_url: cli.remote_url,
        target_dir: cli.target,
        entry: cli.entry,
    };

    std::process::exit(run(&config));
}

fn run(config: &Config) -> i32 {
    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        return EXIT_FAILURE;
    }
    match pipeline::run(config) {
        Ok(stats) => {
            info!(
                files_seen = stats.files_seen,
                files_rewritten = stats.files_rewritten,
                counters = stats.counters,
                "done"
            );
            EXIT_SUCCESS
        }
        Err(err) => {
            error!(error = %err, "instrumentation failed");
            EXIT_FAILURE
        }
    }
}
