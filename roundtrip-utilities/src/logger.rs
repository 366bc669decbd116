use std::{path::Path, time::SystemTime};

use log::LevelFilter;

use crate::SendableError;

/// Install the global logger: `[<time> <LEVEL> <target>] message` lines on
/// stdout, and appended to `log_file` when one is given.
pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("rdkafka", LevelFilter::Warn)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Parse a level name such as `info` or `DEBUG`.
pub fn parse_level(name: &str) -> Result<LevelFilter, SendableError> {
    name.trim()
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level '{name}'").into())
}
