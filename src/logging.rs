//! Debug log sink injected into the cache manager, sweeper and executors.
//!
//! Library internals never consult a global switch: whether debug lines are
//! emitted is decided once at startup and carried by the [`Logger`] handed to
//! each component.

use std::fmt;
use std::sync::Arc;

/// Destination for debug lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// A gated, cloneable log sink.
///
/// When disabled, messages are dropped before they are formatted.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use ttlcall::logging::Logger;
///
/// let lines = Arc::new(Mutex::new(Vec::new()));
/// let captured = Arc::clone(&lines);
/// let logger = Logger::with_sink(true, move |line: &str| {
///     captured.lock().unwrap().push(line.to_owned());
/// });
///
/// logger.log(|| "cache miss".to_string());
/// assert_eq!(lines.lock().unwrap().as_slice(), ["cache miss"]);
/// ```
#[derive(Clone)]
pub struct Logger {
    enabled: bool,
    sink: LogSink,
}

impl Logger {
    /// A logger that forwards to `tracing::debug!` under the `ttlcall` target.
    pub fn tracing(enabled: bool) -> Self {
        Self::with_sink(enabled, |line: &str| {
            tracing::debug!(target: "ttlcall", "{line}");
        })
    }

    pub fn with_sink<F>(enabled: bool, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            enabled,
            sink: Arc::new(sink),
        }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self::tracing(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Emits the line produced by `message` if the logger is enabled.
    pub fn log<F>(&self, message: F)
    where
        F: FnOnce() -> String,
    {
        if self.enabled {
            (self.sink)(&message());
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
