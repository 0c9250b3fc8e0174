use std::{path::Path, time::SystemTime};

use log::LevelFilter;
use notifier_models::errors::SendableError;

/// Format a log line as `[<rfc3339> <LEVEL> <target>] <message>`.
pub fn format_line(time: SystemTime, record: &log::Record<'_>) -> String {
    format!(
        "[{} {} {}] {}",
        humantime::format_rfc3339_seconds(time),
        record.level(),
        record.target(),
        record.args()
    )
}

pub fn setup_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<(), SendableError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, _message, record| {
            out.finish(format_args!("{}", format_line(SystemTime::now(), record)))
        })
        .level(level)
        // lapin and its protocol crates are chatty at info.
        .level_for("lapin", LevelFilter::Warn)
        .level_for("amq_protocol", LevelFilter::Warn)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}
