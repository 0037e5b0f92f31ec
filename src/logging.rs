//! Logging setup.
//!
//! The launcher fans log output out to three sinks: the colored console, a
//! truncating log file under the logs root and the in-memory history ring.
//! Code all over the crate uses the standard `log` macros; the sinks are
//! wired up once at startup with `fern`.
//!
//! Reads the log level from the RUST_LOG environment variable, defaults to
//! "info".

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fern::colors::{Color, ColoredLevelConfig};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::errors::Result;
use crate::history::{EntryKind, SharedHistory};

/// Log sink feeding the history ring.
struct HistorySink {
    history: SharedHistory,
}

impl Log for HistorySink {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let kind = match record.level() {
            Level::Error => EntryKind::Error,
            Level::Warn => EntryKind::Warn,
            _ => EntryKind::Info,
        };
        self.history
            .add_entry(kind, record.target(), &record.args().to_string());
    }

    fn flush(&self) {}
}

fn level_from_env() -> LevelFilter {
    match std::env::var("RUST_LOG").as_deref() {
        Ok("trace") => LevelFilter::Trace,
        Ok("debug") => LevelFilter::Debug,
        Ok("warn") => LevelFilter::Warn,
        Ok("error") => LevelFilter::Error,
        Ok("off") => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn timestamp() -> (u64, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    (now.as_secs(), now.subsec_micros())
}

/// Initialize the logger chain: console + optional log file + history ring.
///
/// Can only be called once per process; a second call fails with a logger
/// error.
pub fn init(history: SharedHistory, log_file: Option<&Path>) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::BrightBlack);

    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            let (secs, micros) = timestamp();
            out.finish(format_args!(
                "[{:05}.{:06} {} {}] {}",
                secs,
                micros,
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());

    let mut dispatch = fern::Dispatch::new()
        .level(level_from_env())
        .chain(console)
        .chain(Box::new(HistorySink { history }) as Box<dyn Log>);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // truncating on open keeps one file per launcher run
        let file = fs::File::create(path)?;
        let file_dispatch = fern::Dispatch::new()
            .format(|out, message, record| {
                let (secs, micros) = timestamp();
                out.finish(format_args!(
                    "[{:05}.{:06} {} {}] {}",
                    secs,
                    micros,
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .chain(file);
        dispatch = dispatch.chain(file_dispatch);
    }

    dispatch.apply()?;
    Ok(())
}
