use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Returns `false` when a global subscriber was already set.
pub fn init_tracing() -> bool {
    init_tracing_with(tracing::Level::INFO)
}

pub fn init_tracing_with(default_level: tracing::Level) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(default_level).into())
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
