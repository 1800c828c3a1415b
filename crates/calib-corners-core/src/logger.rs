//! Logging setup for the CLI.
//!
//! The plain logger writes `[LEVEL thread target] message` lines to stderr.
//! Detection runs on rayon workers, so the thread name is what tells frames
//! of different workers apart.

use std::io::Write;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct StderrLogger;

fn format_record(thread: Option<&str>, record: &Record) -> String {
    format!(
        "[{:>5} {} {}] {}",
        record.level(),
        thread.unwrap_or("-"),
        record.target(),
        record.args()
    )
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(std::thread::current().name(), record);
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr logger. Fails if another logger is already set.
pub fn init_stderr(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing` subscriber. `RUST_LOG` wins over `level` when set.
#[cfg(feature = "tracing")]
pub fn init_tracing(level: LevelFilter, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_thread_names(true);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder.with_timer(fmt::time::Uptime::default()).finish().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn record_line_names_thread_and_target() {
        let line = format_record(
            Some("calib-corners-2"),
            &Record::builder()
                .level(Level::Warn)
                .target("calib_corners::run")
                .args(format_args!("frame {} rejected", 7))
                .build(),
        );
        assert_eq!(line, "[ WARN calib-corners-2 calib_corners::run] frame 7 rejected");
    }

    #[test]
    fn unnamed_thread_is_dashed() {
        let line = format_record(
            None,
            &Record::builder()
                .level(Level::Info)
                .target("t")
                .args(format_args!("x"))
                .build(),
        );
        assert_eq!(line, "[ INFO - t] x");
    }
}
