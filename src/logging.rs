//! Structured logging for annot
//!
//! All engine logs carry structured fields so cache behaviour can be followed
//! in aggregated output.
//!
//! # Field conventions
//!
//! - `quest`: fully versioned quest name (e.g. `humor_1_3`)
//! - `operation`: what is being done (`invoke`, `lookup`, `store`, `export`)
//! - `status`: outcome (`hit`, `miss`, `memo`, `error`)
//! - `call_hash`: hash of the effective arguments and edit contents
//! - `digest`: quest digest
//! - `entry_count`: number of records or dependencies involved
//!
//! ```rust
//! use tracing::info;
//!
//! let name = "humor_1_3";
//! let call_hash = "3f2a";
//! info!(
//!     quest = %name,
//!     operation = "invoke",
//!     status = "hit",
//!     call_hash = %call_hash,
//!     "cache hit"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Formatter printing `LEVEL(annot)` instead of the module path
struct AnnotFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for AnnotFormatter
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
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(annot)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(annot): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, for terminals
    Pretty,
    /// Uncolored, for CI
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Read `ANNOT_LOG_FORMAT`; falls back to compact under `CI`, else pretty
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var("ANNOT_LOG_FORMAT").ok().as_deref(),
            std::env::var("CI").is_ok(),
        )
    }

    fn parse(value: Option<&str>, ci: bool) -> Self {
        match value.unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Install the global subscriber, writing to stderr
///
/// `RUST_LOG` takes precedence over `default_level` (the configured
/// `observability.log_level`). Calling this twice is a no-op.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // a subscriber may already be installed
    let _ = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(AnnotFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(AnnotFormatter { with_ansi: false })
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
}
