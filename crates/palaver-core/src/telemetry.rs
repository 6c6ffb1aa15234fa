//! Tracing bootstrap for host applications and integration tests.

/// Initialize a fmt subscriber honoring `RUST_LOG`, falling back to the
/// given default level. Safe to call more than once; later calls are no-ops.
pub fn init(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level.to_string())),
        )
        .try_init();
}
