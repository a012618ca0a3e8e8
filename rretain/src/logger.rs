//! slog backend for the `log` macros used across the crates.

use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use anyhow::anyhow;
use slog::{o, Drain};

use crate::conf::logging::{Level, To};
use crate::Result;

pub use slog::Logger;

/// Route the `log` facade into `logger`, records below `level` are dropped.
pub fn logger_init(logger: Logger, level: Level) -> Result<()> {
    log::set_boxed_logger(Box::new(LogBridge(logger))).map_err(|e| anyhow!("set logger failed, {}", e))?;
    log::set_max_level(to_log_level(level.inner()).to_level_filter());
    Ok(())
}

struct LogBridge(Logger);

impl log::Log for LogBridge {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let location = slog::RecordLocation {
            file: r.file_static().unwrap_or("<unknown>"),
            line: r.line().unwrap_or_default(),
            column: 0,
            function: "",
            module: r.module_path_static().unwrap_or("<unknown>"),
        };
        let s = slog::RecordStatic { location: &location, level: to_slog_level(r.level()), tag: r.target() };
        self.0.log(&slog::Record::new(&s, r.args(), slog::b!()))
    }

    fn flush(&self) {}
}

fn to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn to_log_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error | slog::Level::Critical => log::Level::Error,
    }
}

/// Root logger writing to the console, `filename` or both, as `to` says.
pub fn config_logger(filename: &str, to: To, level: Level) -> Result<Logger> {
    let output = Output::new(filename, to)?;
    let decorator = slog_term::PlainSyncDecorator::new(output);
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(|w: &mut dyn Write| write!(w, "{}", now_str()))
        .build()
        .fuse();
    let drain = slog::LevelFilter::new(drain, level.inner()).fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();
    Ok(Logger::root(drain, o!()))
}

#[inline]
fn now_str() -> String {
    crate::utils::format_timestamp_millis(crate::utils::timestamp_millis())
}

struct Output {
    to: To,
    file: Option<File>,
    console: Stdout,
}

impl Output {
    fn new(filename: &str, to: To) -> Result<Self> {
        let file = if to.file() {
            if let Some(dir) = std::path::Path::new(filename).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
            Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(filename)
                    .map_err(|e| anyhow!("logger file config error, filename: {}, {:?}", filename, e))?,
            )
        } else {
            None
        };
        Ok(Self { to, file, console: io::stdout() })
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.to.off() {
            return Ok(buf.len());
        }
        if self.to.console() {
            self.console.write_all(buf)?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.to.console() {
            self.console.flush()?;
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_to_file() {
        let dir = std::env::temp_dir().join(format!("rretain-logger-{}", std::process::id()));
        let filename = dir.join("test.log").to_string_lossy().to_string();
        let mut out = Output::new(&filename, To::File).unwrap();
        out.write_all(b"hello\n").unwrap();
        out.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&filename).unwrap(), "hello\n");

        let mut off = Output::new(&filename, To::Off).unwrap();
        assert_eq!(off.write(b"dropped").unwrap(), 7);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn levels() {
        assert_eq!(to_log_level(slog::Level::Critical), log::Level::Error);
        assert_eq!(to_slog_level(log::Level::Warn), slog::Level::Warning);
    }
}
