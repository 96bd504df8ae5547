//! Log output for `qa_client` events.
//!
//! The binary owns the global subscriber. This module contributes the
//! formatting layer for events emitted from this crate and the filter the
//! CLI starts from.

use std::io::{self, IsTerminal};

use tracing_subscriber::filter::{LevelFilter, ParseError};
use tracing_subscriber::fmt::format::{FmtSpan, Writer};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt};

/// Target prefix of every event emitted by this crate.
pub const TARGET_PREFIX: &str = "qa_client";

/// Directive applied on top of `RUST_LOG` in verbose mode.
const VERBOSE_DIRECTIVE: &str = "qa_client=debug";

/// `2025-09-12T10:20:30Z`
#[derive(Clone, Debug, Default)]
struct UtcSeconds;

impl FormatTime for UtcSeconds {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        w.write_str(&now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}

/// Compact fmt layer that renders only `qa_client` events, on stderr so
/// answer tokens on stdout stay clean.
///
/// In verbose mode every line carries its source location and instrumented
/// turns log their duration when the span closes.
pub fn layer<S>(verbose: bool) -> impl Layer<S> + Send + Sync
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let only_this_crate = filter::filter_fn(|meta| meta.target().starts_with(TARGET_PREFIX));
    let span_events = if verbose { FmtSpan::CLOSE } else { FmtSpan::NONE };

    let format = fmt::format()
        .compact()
        .with_timer(UtcSeconds)
        .with_target(verbose)
        .with_source_location(verbose);

    fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_span_events(span_events)
        .event_format(format)
        .with_filter(only_this_crate)
}

/// `RUST_LOG`, or `info` when unset; `verbose` raises this crate to `debug`.
///
/// # Errors
/// Returns the parse error of the verbose directive.
pub fn env_filter(verbose: bool) -> Result<EnvFilter, ParseError> {
    let base = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if !verbose {
        return Ok(base);
    }
    Ok(base.add_directive(VERBOSE_DIRECTIVE.parse()?))
}
