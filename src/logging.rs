use tracing_subscriber::EnvFilter;

/// Console logging with `RUST_LOG` overrides, INFO by default.
pub fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();
}
