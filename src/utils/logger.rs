//! Logging setup
//!
//! One process-wide compact subscriber; `--verbose` lowers the threshold
//! from INFO to DEBUG.

use tracing_subscriber::EnvFilter;

fn filter_directive(verbose: bool) -> &'static str {
    if verbose {
        "benchrun=debug"
    } else {
        "benchrun=info"
    }
}

/// Initialize the logger.
pub fn init_logger(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directive(verbose)))
        .with_target(false)
        .compact()
        .init();
}
