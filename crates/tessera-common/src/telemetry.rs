use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging for a process embedding this subsystem.
///
/// - `service_name`: identifies the embedding component (e.g. "tessera-bff")
///
/// Filtering follows `RUST_LOG` when set, defaulting to "info". Export to an
/// external observability sink is the embedding process's concern.
pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(service = service_name, "tracing initialized");
}
