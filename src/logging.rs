//! Tracing subscriber setup for the CLI.
//!
//! Logs go to stderr so search output on stdout stays clean. The
//! `REFINERY_LOG` environment variable takes an `EnvFilter` directive and
//! overrides the level picked from `debug`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "REFINERY_LOG";

fn default_directive(debug: bool) -> &'static str {
    if debug { "code_refinery=debug,refinery=debug,info" } else { "warn,code_refinery=info" }
}

/// Installs the global subscriber. Calling it twice is a no-op.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init();
}
