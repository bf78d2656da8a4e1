use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. Called once from `main`.
///
/// Defaults to `info` level; overridable with `RUST_LOG` the usual way
/// (`RUST_LOG=fleet_orchestrator=debug`).
pub fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// `h1`-equivalent phase banner, matching the original tool's banner cadence
/// but as a structured event instead of an ANSI-colored print.
#[macro_export]
macro_rules! phase_banner {
    ($name:expr) => {
        tracing::info!(phase = $name, "starting phase");
    };
}
