//! Configuring ORR.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// ORR's configuration.
///
/// Loaded from a TOML file (`--config`), with a handful of settings
/// overridable directly on the command line.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path to the configuration file.
    pub config_path: Utf8PathBuf,

    /// Path to the Config Store's SQLite database file.
    pub db_path: Utf8PathBuf,

    /// How often the Node Watcher ticks, in seconds.
    pub tick_interval: Duration,

    /// The Cluster Manager's back-off ceiling, in seconds.
    pub max_backoff: Duration,

    /// How long a node may go without a `Ping` before one is due, in seconds.
    pub version_skew: Duration,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Register ORR's command-line arguments on an existing [`clap::Command`].
    pub fn setup_cli(cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .default_value("/etc/orr/orr.toml")
                .help("Path to the configuration file"),
        )
        .arg(
            clap::Arg::new("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Override the configured log level"),
        )
    }

    /// Build a [`Config`] from parsed command-line arguments, using defaults
    /// for everything not yet read from the configuration file.
    pub fn init(matches: &clap::ArgMatches) -> Result<Self, String> {
        let config_path: Utf8PathBuf = matches
            .get_one::<String>("config")
            .expect("has a default")
            .into();

        let mut logging = LoggingConfig::default();
        if let Some(level) = matches.get_one::<String>("log_level") {
            logging.level = level
                .parse()
                .map_err(|_| format!("invalid log level: '{level}'"))?;
        }

        Ok(Self {
            config_path,
            db_path: "/var/lib/orr/orr.db".into(),
            tick_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(10),
            version_skew: Duration::from_secs(30),
            logging,
        })
    }

    /// Load (and merge in) settings from `self.config_path`.
    ///
    /// CLI-provided overrides (currently just `log_level`) take precedence
    /// over the file.
    pub fn init_from_file(&mut self) -> Result<(), String> {
        let cli_log_level_override = self.logging.level_overridden_by_cli;

        let text = std::fs::read_to_string(&self.config_path)
            .map_err(|err| format!("could not read '{}': {err}", self.config_path))?;
        let file: FileConfig = toml::from_str(&text)
            .map_err(|err| format!("could not parse '{}': {err}", self.config_path))?;

        if let Some(db_path) = file.db_path {
            self.db_path = db_path;
        }
        if let Some(secs) = file.tick_interval_secs {
            self.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.max_backoff_secs {
            self.max_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = file.version_skew_secs {
            self.version_skew = Duration::from_secs(secs);
        }
        if let Some(logging) = file.logging {
            if !cli_log_level_override {
                self.logging.level = logging.level.unwrap_or(self.logging.level);
            }
            self.logging.target = logging.target.unwrap_or(self.logging.target);
        }

        Ok(())
    }
}

/// The subset of [`Config`] that may be set via the TOML configuration file.
#[derive(Deserialize)]
struct FileConfig {
    db_path: Option<Utf8PathBuf>,
    tick_interval_secs: Option<u64>,
    max_backoff_secs: Option<u64>,
    version_skew_secs: Option<u64>,
    logging: Option<FileLoggingConfig>,
}

#[derive(Deserialize)]
struct FileLoggingConfig {
    level: Option<LogLevel>,
    target: Option<LogTarget>,
}

//----------- LoggingConfig -----------------------------------------------------

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub target: LogTarget,
    /// Set once `--log-level` has been applied, so a later file load does
    /// not clobber the explicit CLI choice.
    level_overridden_by_cli: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            target: LogTarget::Stdout,
            level_overridden_by_cli: false,
        }
    }
}

/// A logging verbosity level.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warning" | "warn" => Self::Warning,
            "error" => Self::Error,
            _ => return Err(()),
        })
    }
}

/// Where log output is sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum LogTarget {
    Stdout,
    Stderr,
    File { path: Utf8PathBuf },
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

impl AsRef<Utf8Path> for Config {
    fn as_ref(&self) -> &Utf8Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_case_insensitively() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("Warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("bogus".parse::<LogLevel>().is_err());
    }

    #[test]
    fn file_config_overrides_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
            db_path = "/tmp/orr-test.db"
            tick_interval_secs = 7
            max_backoff_secs = 20

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(file.db_path.unwrap(), Utf8PathBuf::from("/tmp/orr-test.db"));
        assert_eq!(file.tick_interval_secs, Some(7));
        assert_eq!(file.logging.unwrap().level, Some(LogLevel::Debug));
    }
}
