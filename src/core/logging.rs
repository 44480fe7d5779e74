//! Logging setup
//!
//! Streaming emits `info` for loop lifecycle, `debug` per slice and
//! eviction, and `trace` per brick. `RUST_LOG` overrides the filter.

/// Initialize env_logger with an `info` default
///
/// # Example
/// ```no_run
/// volstream::core::logging::init();
/// log::info!("Streaming started");
/// ```
pub fn init() {
    init_with_filter("info");
}

/// Initialize env_logger with `filter` unless `RUST_LOG` is set
///
/// Millisecond timestamps, since slice budgets are tens of milliseconds.
/// Calling it again is a no-op.
pub fn init_with_filter(filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}
