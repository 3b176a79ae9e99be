/// Installs a global fmt subscriber honoring `RUST_LOG` (default `info`).
///
/// Safe to call repeatedly: later calls are ignored once a subscriber exists.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
