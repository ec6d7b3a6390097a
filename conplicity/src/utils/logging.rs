use tracing::level_filters::LevelFilter;

use crate::error::{ConplicityError, Result};

/// Maps the level names accepted on the command line to a tracing filter.
/// `fatal` and `panic` have no tracing counterpart and fall back to ERROR.
pub fn parse_log_level(level: &str) -> Result<LevelFilter> {
    match level {
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" | "fatal" | "panic" => Ok(LevelFilter::ERROR),
        other => Err(ConplicityError::Config(format!("wrong log level '{other}'"))),
    }
}

/// Installs the global subscriber. Logs go to stderr so that command output
/// on stdout stays clean.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let level = parse_log_level(level)?;
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConplicityError::Config(format!("failed to set up logging: {e}")))
}
