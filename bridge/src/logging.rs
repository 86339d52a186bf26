//! Structured logging setup: colored terminal output plus a dated rolling
//! file under the data directory, built on `fern`.

use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::path::Path;
use std::str::FromStr;

pub fn init(level: &str, log_dir: &Path) -> Result<(), fern::InitError> {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    std::fs::create_dir_all(log_dir).map_err(fern::InitError::Io)?;

    let stdout = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "\x1B[{color}m[{date}] [{level}] [{target}]\x1B[0m {message}",
                color = colors.get_color(&record.level()).to_fg_str(),
                date = Local::now().format("%Y-%m-%d %H:%M:%S"),
                level = record.level(),
                target = record.target(),
            ))
        })
        .chain(std::io::stdout());

    let file = fern::DateBased::new(log_dir, "bridge-%Y-%m-%d.log");
    let file_dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{date}] [{level}] [{target}] {message}",
                date = Local::now().format("%Y-%m-%d %H:%M:%S"),
                level = record.level(),
                target = record.target(),
            ))
        })
        .chain(file);

    fern::Dispatch::new()
        .level(level)
        .level_for("reqwest", LevelFilter::Warn)
        .level_for("tokio_tungstenite", LevelFilter::Warn)
        .chain(stdout)
        .chain(file_dispatch)
        .apply()
        .map_err(fern::InitError::SetLoggerError)?;

    Ok(())
}
