//! A logging implementation which prints log records on the kernel console
use core::fmt::Write;

use crate::print::KernelWriter;
use log::{Level, Log, Metadata, Record, SetLoggerError};

/// A [`Log`] implementation that writes every enabled record to the [`KernelWriter`].
///
/// Only the global `log::` filter is updated at runtime so that the logger itself needs no interior mutability.
pub struct KernelLogger {
    pub initial_log_level: Level,
}

impl KernelLogger {
    pub const fn new(max_log_level: Level) -> KernelLogger {
        KernelLogger {
            initial_log_level: max_log_level,
        }
    }

    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self).map(|_| log::set_max_level(self.initial_log_level.to_level_filter()))
    }

    pub fn update_log_level(&'static self, level: Level) {
        log::set_max_level(level.to_level_filter());
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // there is no better place to report a broken console to
            let _ = KernelWriter {}.write_fmt(format_args!(
                "{:<5} - {}: {}\n",
                record.level(),
                record.target(),
                record.args(),
            ));
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use log::LevelFilter;

    #[test]
    fn test_level_filter_follows_global_max_level() {
        static LOGGER: KernelLogger = KernelLogger::new(Level::Debug);
        LOGGER.install().unwrap();
        assert_eq!(log::max_level(), LevelFilter::Debug);

        let trace = Metadata::builder().level(Level::Trace).build();
        let info = Metadata::builder().level(Level::Info).build();
        assert!(!LOGGER.enabled(&trace));
        assert!(LOGGER.enabled(&info));

        LOGGER.update_log_level(Level::Warn);
        assert!(!LOGGER.enabled(&info));
    }
}
