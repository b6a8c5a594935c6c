//! Diagnostics via `RUST_LOG`, written to stderr.
//!
//! Run progress and results go to stdout through `println!` in `main`;
//! this is only the tracing output of the library.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reads `RUST_LOG`, defaulting to `info`.
///
/// ```bash
/// RUST_LOG=shared::instagram=debug autopost --single --platform ig --topic "..."
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
