//! Purpose: Install the process-wide tracing subscriber.
//! Exports: `init_tracing`, `DEFAULT_DIRECTIVE`.
//! Role: Shared by the CLI and the `xray_init_logging` export.
//! Invariants: `RUST_LOG` wins over the caller's directive; repeated calls are harmless.
use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Returns false when a subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
