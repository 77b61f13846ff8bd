use log::{error, info, LevelFilter};
use std::sync::Once;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracing_log::LogTracer;

static INIT: Once = Once::new();

/// Initialize the global logger from a configured level name such as "debug".
/// `RUST_LOG`, when set, takes precedence. Only the first call has an effect.
pub fn init_logger_with_config(log_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level));

        FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .init();

        // Bridge log events to tracing (after the subscriber is set up)
        if let Err(e) = LogTracer::init() {
            eprintln!("Warning: Failed to initialize LogTracer: {:?}", e);
        }

        log::set_max_level(max_level(log_level));
    });
}

fn max_level(log_level: &str) -> LevelFilter {
    log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}
