//! Structured logging setup, in the manner of the teacher's `flux::logging`: a small config
//! struct an embedder can build however it likes (file, env, hardcoded), handed to `sloggers`
//! to produce the root `slog::Logger` every other module logs through.

use serde_derive::{Deserialize, Serialize};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub destination: LogDestination,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Debug,
            destination: LogDestination::Stderr,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for Severity {
    fn from(level: LogLevel) -> Severity {
        match level {
            LogLevel::Trace => Severity::Trace,
            LogLevel::Debug => Severity::Debug,
            LogLevel::Info => Severity::Info,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Error => Severity::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum LogDestination {
    Stdout,
    Stderr,
}

impl From<LogDestination> for Destination {
    fn from(dest: LogDestination) -> Destination {
        match dest {
            LogDestination::Stdout => Destination::Stdout,
            LogDestination::Stderr => Destination::Stderr,
        }
    }
}

/// Builds the root logger. Every subsystem (selector pools, services, the IPC talker) derives
/// a child logger from this one via `slog::Logger::new(&root, o!(...))` rather than building
/// its own sink.
pub fn init(config: &LoggingConfig) -> slog::Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(config.level.into());
    builder.destination(config.destination.into());

    builder.build().expect("terminal logger sink should never fail to build")
}
