use std::path::Path;

use log::{LevelFilter, info};

use crate::{SendableError, logger};

pub fn startup(name: &str, level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    logger::setup_logger(level, log_file)?;
    log_panics::init();

    info!("--- {} ---", name);
    if let Some(path) = log_file {
        info!("Also logging to {}", path.display());
    }

    Ok(())
}
