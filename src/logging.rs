//! Subscriber setup (spec §9.2): ANSI to stderr interactively, JSON otherwise.

use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use crate::config::LogLevel;
use crate::error::WotError;

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Minor => LevelFilter::DEBUG,
        LogLevel::Normal => LevelFilter::INFO,
        LogLevel::Warning => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}

/// Installs the global subscriber. Must be called at most once per process;
/// callers (tests included) should tolerate the "already set" error.
pub fn init(level: LogLevel, force_json: bool) -> Result<(), WotError> {
    let max_level = level_filter(level);
    let use_json = force_json || !std::io::stderr().is_terminal();
    let builder = FmtSubscriber::builder().with_max_level(max_level);

    let result = if use_json {
        tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stdout).with_ansi(false).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).with_ansi(true).finish(),
        )
    };

    result.map_err(|e| WotError::Unavailable(format!("installing log subscriber: {e}")))
}
