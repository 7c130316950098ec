//! Structured logging setup for the `axs` binary.
//!
//! The library only emits `tracing` events. Field conventions:
//!
//! - `entry`: name of the entry being worked on
//! - `action`: action name of a call
//! - `path`: filesystem location of a stored entry
//! - `pipeline` / `step`: pipeline run counter and step index
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(entry = "be_like", action = "meme", "running pipeline step");
//! ```

use std::{fmt as std_fmt, io};

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer},
    prelude::*,
};

use crate::config::LoggingConfig;

/// Environment variable selecting the log format.
pub const FORMAT_ENV: &str = "AXS_LOG_FORMAT";

/// Event formatter that tags lines with "(axs)" instead of module paths.
struct AxsFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for AxsFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
        )?;

        if self.with_ansi {
            let color = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{color}{:5}(axs)\x1b[0m: ", meta.level())?;
        } else {
            write!(writer, "{:5}(axs): ", meta.level())?;
        }

        // Fields of the enclosing call spans, outermost first.
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let ext = span.extensions();
                if let Some(fields) = ext.get::<fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{}{{{}}} ", span.name(), fields)?;
                    }
                }
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored.
    Pretty,
    /// Same layout without colors (CI).
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn parse(text: &str) -> Option<Self> {
        match text.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }

    /// `AXS_LOG_FORMAT`, else the configured format, else compact under CI
    /// and pretty otherwise.
    pub fn resolve(configured: Option<&str>) -> Self {
        std::env::var(FORMAT_ENV)
            .ok()
            .as_deref()
            .and_then(Self::parse)
            .or_else(|| configured.and_then(Self::parse))
            .unwrap_or_else(|| {
                if std::env::var("CI").is_ok() {
                    Self::Compact
                } else {
                    Self::Pretty
                }
            })
    }
}

/// Install the global subscriber writing to stderr.
///
/// `RUST_LOG` overrides the configured level. Calling this twice is harmless;
/// the second subscriber is ignored.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match LogFormat::resolve(config.format.as_deref()) {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(AxsFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(AxsFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("a global subscriber is already installed");
    }
}
