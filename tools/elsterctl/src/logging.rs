//! Console logging
//!
//! Log lines go to stderr, command output to stdout.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Bracketed label and ANSI color of a level
fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
    }
}

/// `HH:MM:SS.mmm [LEVEL] message`
struct ConsoleFormat;

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let (label, color) = level_style(*event.metadata().level());
        let time = chrono::Local::now().format("%H:%M:%S%.3f");

        if writer.has_ansi_escapes() {
            write!(writer, "{time} {color}{label}\x1b[0m ")?;
        } else {
            write!(writer, "{time} {label} ")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Logging options taken from the command line
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Explicit filter, wins over `RUST_LOG`
    pub filter: Option<String>,
    pub verbose: bool,
    pub ansi: bool,
}

impl LogOptions {
    /// Filter directive: explicit option, then `RUST_LOG`, then the default level
    fn directive(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        if let Ok(env) = std::env::var("RUST_LOG") {
            if !env.trim().is_empty() {
                return env;
            }
        }
        if self.verbose { "debug" } else { "info" }.to_string()
    }
}

/// Install the global subscriber
pub fn init(options: &LogOptions) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(options.directive())?;
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi)
        .event_format(ConsoleFormat);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()?;
    Ok(())
}
