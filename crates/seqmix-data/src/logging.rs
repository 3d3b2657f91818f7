use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SEQMIX_LOG";

/// Initializes a `tracing_subscriber` on stderr. An explicit `level` wins;
/// otherwise `SEQMIX_LOG` is read first, then `RUST_LOG`, then `info`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(level: Option<&str>) -> bool {
    let filter = level.map_or_else(env_filter, EnvFilter::new);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
