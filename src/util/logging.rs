use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

use crate::config::LogLevel;
use crate::error::{Result, WriterError};

fn level_filter(level: &LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

fn builder(level: &LogLevel) -> Builder {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter(None, level_filter(level))
        // Rows go to stdout when writing to the local stream, so logs stay on stderr
        .target(env_logger::Target::Stderr);
    builder
}

/// Initialize the logging system
pub fn init(level: &LogLevel) {
    builder(level).init();
}

/// Initialize the logging system, failing if a logger is already installed
pub fn try_init(level: &LogLevel) -> Result<()> {
    builder(level)
        .try_init()
        .map_err(|e| WriterError::Other(format!("Failed to initialise logging: {}", e)))
}
