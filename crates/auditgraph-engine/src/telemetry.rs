use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "auditgraph_engine=info,auditgraph_graph=info,auditgraph_ai=warn";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (or a crate-level default). Returns `false` when a global
/// subscriber was already installed.
pub fn init_tracing(default_filter: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.unwrap_or(DEFAULT_FILTER).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
