//! Logging setup shared by every binary in this workspace: a clap-flattenable
//! [`LoggingConfig`] and an [`init`] function that wires it to a
//! `tracing_subscriber` pipeline.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_copy_implementations, missing_debug_implementations, missing_docs)]

use clap::ArgEnum;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ArgEnum)]
pub enum LogFormat {
    /// Compact, human-readable `key=value` style lines.
    Logfmt,
    /// One JSON object per line, for log aggregators.
    Json,
}

/// Logging flags shared by every binary.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Log output format.
    #[clap(
        arg_enum,
        long = "log-format",
        env = "VAULT_LOG_FORMAT",
        default_value = "logfmt",
        ignore_case = true
    )]
    pub log_format: LogFormat,

    /// `tracing_subscriber::EnvFilter` directive string, e.g. `info` or
    /// `coordinator=debug,ring=info`.
    #[clap(long = "log-filter", env = "VAULT_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber built from this configuration.
    ///
    /// Panics if a subscriber has already been installed; this is meant to
    /// be called exactly once, near the top of `main`.
    pub fn init(&self) {
        let filter = EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

        match self.log_format {
            LogFormat::Logfmt => {
                fmt().with_target(true).compact().with_env_filter(filter).init();
            }
            LogFormat::Json => {
                fmt().json().with_target(true).with_env_filter(filter).init();
            }
        }
    }
}
