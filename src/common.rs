// Licensed under the Apache-2.0 license

//! Logging hooks shared by the bus and device drivers.
//!
//! Drivers are generic over a [`Logger`] and default to [`NoOpLogger`], so a
//! build without logging pays nothing. Enable the `defmt` feature to get
//! [`DefmtLogger`].

use core::fmt::Arguments;

/// Severity attached to every log record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Sink for driver diagnostics.
///
/// Implementations must not block for long: drivers log from mainline code
/// and right after servicing an interrupt.
pub trait Logger {
    fn log(&self, level: LogLevel, args: Arguments<'_>);

    fn error(&self, args: Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }

    fn warn(&self, args: Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    fn info(&self, args: Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    fn debug(&self, args: Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    fn trace(&self, args: Arguments<'_>) {
        self.log(LogLevel::Trace, args);
    }
}

impl<T: Logger + ?Sized> Logger for &T {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        (**self).log(level, args);
    }
}

/// Discards every record.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _args: Arguments<'_>) {}
}

/// Forwards records to the `defmt` global logger.
#[cfg(feature = "defmt")]
#[derive(Copy, Clone, Debug, Default)]
pub struct DefmtLogger;

#[cfg(feature = "defmt")]
impl Logger for DefmtLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        let message = defmt::Display2Format(&args);
        match level {
            LogLevel::Error => defmt::error!("{}", message),
            LogLevel::Warn => defmt::warn!("{}", message),
            LogLevel::Info => defmt::info!("{}", message),
            LogLevel::Debug => defmt::debug!("{}", message),
            LogLevel::Trace => defmt::trace!("{}", message),
        }
    }
}

/// Collects records in memory so tests can assert on them.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingLogger {
    records: std::cell::RefCell<std::vec::Vec<(LogLevel, std::string::String)>>,
}

#[cfg(test)]
impl RecordingLogger {
    pub(crate) fn records(&self) -> std::vec::Vec<(LogLevel, std::string::String)> {
        self.records.borrow().clone()
    }

    pub(crate) fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records
            .borrow()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

#[cfg(test)]
impl Logger for RecordingLogger {
    fn log(&self, level: LogLevel, args: Arguments<'_>) {
        self.records.borrow_mut().push((level, std::format!("{args}")));
    }
}
