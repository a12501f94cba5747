//! Development-time tracing for debugging the analyst.
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the product output.
//!
//! - **Finalized artifacts (`io/finalizer`)**: Code, table, and plots in the
//!   output directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for CLI logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=analyst=debug analyst run --file sales.csv --task "..."
/// ```
pub fn init() {
    init_with_default("warn");
}

/// Like [`init`], with `default_directives` used when `RUST_LOG` is unset.
///
/// Long-running services pass something chattier than `warn` so request
/// traces show up without extra setup.
pub fn init_with_default(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
