//! CLI entry point for the Solana pool indexer.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! CLI Layer (src/cli.rs)
//!     ↓
//! Config → Database → RPC client → ScanJob (scanner → decoders → index → cursor)
//! ```
//!
//! Exits non-zero when a command fails or a scan job aborts.

use solana_pool_indexer::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    // RUST_LOG, LOG_JSON and LOG_FILE control logging
    let log_guard = match observability::init_tracing(&observability::LogSettings::from_env()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(report) = cli::run().await {
        error!(error = ?report, "Application error");
        eprintln!("Error: {report:?}");
        drop(log_guard);
        std::process::exit(1);
    }
}
