//! Logging utilities and configuration for the mirror pipelines.
//!
//! Runs over ~20k catalog records, so per-record logging is opt-in. The
//! [`LogConfig`] switches gate the noisy categories; run-level summaries are
//! always emitted at `info`.

/// Per-component logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to log one line per new/changed/skipped record
    pub log_record_details: bool,
    /// Whether to log individual blob store reads and writes
    pub log_storage_operations: bool,
    /// Whether to log per-period statistics as they are computed
    pub log_period_details: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_record_details: false,
            log_storage_operations: true,
            log_period_details: false,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging a single run.
    pub fn verbose() -> Self {
        Self {
            log_record_details: true,
            log_storage_operations: true,
            log_period_details: true,
            max_field_length: 1024,
        }
    }

    /// Creates a minimal configuration for scheduled production runs.
    pub fn production() -> Self {
        Self {
            log_record_details: false,
            log_storage_operations: false,
            log_period_details: false,
            max_field_length: 128,
        }
    }
}

/// Macro for per-record debug logging.
#[macro_export]
macro_rules! log_record {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_record_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Macro for conditional blob store logging.
#[macro_export]
macro_rules! log_storage_op {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_storage_operations {
            tracing::info!($($arg)*);
        }
    };
}

/// Macro for per-period statistics logging.
#[macro_export]
macro_rules! log_period {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_period_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
///
/// Cuts on a character boundary so multi-byte titles never split.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber setup for the binaries.
pub mod setup {
    use tracing::Level;

    /// Configuration for subscriber initialization.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for dependencies
        pub level: Level,
        /// Log level for the `oam_mirror` crate
        pub mirror_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::WARN,
                mirror_level: Level::INFO,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON output for log shipping from scheduled workflows.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                mirror_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        /// Verbose human-readable output.
        pub fn development() -> Self {
            Self {
                level: Level::INFO,
                mirror_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        /// Sets the log level for the `oam_mirror` crate.
        pub fn with_mirror_level(mut self, level: Level) -> Self {
            self.mirror_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},oam_mirror={}",
                    self.level.as_str().to_lowercase(),
                    self.mirror_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Initializes the global subscriber.
    ///
    /// `RUST_LOG` takes precedence over the generated filter.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use oam_mirror::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::default().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
