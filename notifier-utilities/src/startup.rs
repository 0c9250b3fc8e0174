use std::path::Path;

use log::{info, LevelFilter};
use notifier_models::errors::SendableError;

use crate::logger;

/// Install logging and panic reporting, then print the process banner.
pub fn startup(name: &str, level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    logger::setup_logger(level, log_file)?;
    log_panics::init();

    info!("--- {} ---", name);
    if let Ok(path) = std::env::current_dir() {
        info!("The current directory is {}", path.display());
    }

    Ok(())
}
