//! Logging from ORR.

use std::fmt;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::{LogLevel, LogTarget, LoggingConfig};

//----------- Logger -------------------------------------------------------

/// The state of the ORR logger.
pub struct Logger {
    filter: Handle<EnvFilter, Registry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}

impl Logger {
    /// Launch the ORR logger.
    ///
    /// ## Panics
    ///
    /// Panics if a global [`tracing`] logger has been set already.
    pub fn launch(config: &LoggingConfig) -> Result<&'static Logger, String> {
        let filter = make_env_filter(config)?;

        // A reload layer is tracing's way of making it possible to change
        // values at runtime: it hands back a handle we can use to swap the
        // EnvFilter when the configuration changes.
        let (filter, filter_handle) = reload::Layer::new(filter);

        match &config.target {
            LogTarget::File { path } => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|err| format!("could not open log file '{path}': {err}"))?;
                let layer = FmtLayer::new().with_ansi(false).with_writer(file);
                tracing_subscriber::registry().with(filter).with(layer).init()
            }
            LogTarget::Stdout => {
                let layer = FmtLayer::new()
                    .with_ansi(supports_color::on(supports_color::Stream::Stdout).is_some())
                    .with_writer(std::io::stdout);
                tracing_subscriber::registry().with(filter).with(layer).init()
            }
            LogTarget::Stderr => {
                let layer = FmtLayer::new()
                    .with_ansi(supports_color::on(supports_color::Stream::Stderr).is_some())
                    .with_writer(std::io::stderr);
                tracing_subscriber::registry().with(filter).with(layer).init()
            }
        }

        Ok(Box::leak(Box::new(Self {
            filter: filter_handle,
        })))
    }

    /// Reload the active filter from an updated [`LoggingConfig`].
    ///
    /// The output target itself cannot be changed without a restart; only
    /// the level is live-reloadable, matching the teacher's split between
    /// `launch` (fixed target) and `apply` (filter only).
    pub fn apply(&self, config: &LoggingConfig) -> Result<(), String> {
        self.filter
            .reload(make_env_filter(config)?)
            .map_err(|_| "could not reload filter".to_string())
    }
}

/// Build a new [`EnvFilter`] from the configured level.
fn make_env_filter(config: &LoggingConfig) -> Result<EnvFilter, String> {
    Ok(EnvFilter::default().add_directive(LevelFilter::from(config.level).into()))
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}
