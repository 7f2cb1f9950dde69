//! Tracing subscriber setup for programs built on apex-isam.
//!
//! The library itself only emits `tracing` events; this module installs a
//! formatter for them. Enabled with the `logging` feature.

use tracing::Level;

/// Install the bracketed formatter with INFO as the default level.
///
/// `RUST_LOG` overrides the level, e.g. `RUST_LOG=apex_isam=debug` to see the
/// per-update bookkeeping of the incremental solver.
///
/// ```no_run
/// use apex_isam::init_logger;
///
/// init_logger();
/// tracing::info!("estimator started");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the bracketed formatter with a custom default level.
///
/// ```no_run
/// use apex_isam::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// ```
pub fn init_logger_with_level(default_level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_level(false)
        .with_thread_ids(false)
        .event_format(BracketFormatter)
        .init();
}

/// `[LEVEL YYYY-MM-DD HH:MM:SS origin] message`, where origin is the module
/// for INFO and above and `file:line` for DEBUG and TRACE.
struct BracketFormatter;

impl BracketFormatter {
    fn level_tag(level: &Level) -> &'static str {
        match *level {
            Level::ERROR => "\x1b[31mERROR\x1b[0m",
            Level::WARN => "\x1b[33mWARN\x1b[0m",
            Level::INFO => "\x1b[32mINFO\x1b[0m",
            Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
            Level::TRACE => "\x1b[35mTRACE\x1b[0m",
        }
    }
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for BracketFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = metadata.level();

        write!(
            writer,
            "[{} {} ",
            Self::level_tag(level),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        let verbose = *level == Level::DEBUG || *level == Level::TRACE;
        match (verbose, metadata.file()) {
            (true, Some(file)) => {
                let filename = file.rsplit('/').next().unwrap_or(file);
                write!(writer, "{filename}")?;
                if let Some(line) = metadata.line() {
                    write!(writer, ":{line}")?;
                }
            }
            _ => write!(writer, "{}", metadata.target())?,
        }
        write!(writer, "] ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
