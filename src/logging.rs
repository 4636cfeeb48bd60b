// src/logging.rs

/// Installs the `env_logger` backend for the `log` facade.
///
/// `RUST_LOG` wins when set; otherwise `level` (from the config file) or
/// `info` is used. Calling this twice is harmless.
pub fn init(level: Option<&str>) {
    let default_filter = level.filter(|l| !l.trim().is_empty()).unwrap_or("info");
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}
