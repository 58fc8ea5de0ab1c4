//! Logging.
use std::{fmt, sync::OnceLock};

use chrono::{
    format::{DelayedFormat, Item, StrftimeItems},
    Utc,
};
use ffwd_config::GenericConfiguration;
use ffwd_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use tracing::{field, level_filters::LevelFilter, Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt as _,
    registry::LookupSpan,
    util::SubscriberInitExt as _,
    EnvFilter, Layer,
};

const APP_NAME: &str = "FFWD";

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct LoggingConfiguration {
    /// Filtering directives, in `EnvFilter` syntax.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to write logs as JSON.
    ///
    /// Defaults to `false`, which writes single-line text records.
    #[serde(default)]
    pub log_format_json: bool,
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: false,
        }
    }
}

impl LoggingConfiguration {
    /// Reads the logging configuration from the given configuration.
    ///
    /// # Errors
    ///
    /// If either key is present but has the wrong type, an error is returned.
    pub fn try_from_config(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let log_level = config
            .try_get_typed::<String>("log_level")
            .error_context("Failed to read `log_level`.")?
            .unwrap_or_else(default_log_level);
        let log_format_json = config
            .try_get_typed::<bool>("log_format_json")
            .error_context("Failed to read `log_format_json`.")?
            .unwrap_or(false);

        Ok(Self {
            log_level,
            log_format_json,
        })
    }

    fn env_filter(&self) -> Result<EnvFilter, GenericError> {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(&self.log_level)
            .with_error_context(|| format!("Invalid log level '{}'.", self.log_level))
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Records are written to standard output from a background thread. The returned guard flushes any buffered records
/// when dropped, so it must be held until the process exits.
///
/// # Errors
///
/// If the log level is not a valid filter, or the logging subsystem was already initialized, an error is returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<WorkerGuard, GenericError> {
    let filter = config.env_filter()?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let layer = if config.log_format_json {
        tracing_subscriber::fmt::Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::Layer::new()
            .event_format(AgentLikeFormatter)
            .with_writer(writer)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| generic_error!("Failed to initialize logging: {}", e))?;

    Ok(guard)
}

/// Formats records as `<time> | FFWD | <level> | (<file>:<line>) | key:value,... | message`.
struct AgentLikeFormatter;

impl<S, N> FormatEvent<S, N> for AgentLikeFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} | {} | {} | ",
            delayed_format_now(),
            APP_NAME,
            metadata.level()
        )?;

        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            write!(writer, "({}:{})", file, line)?;
        } else {
            write!(writer, "(unknown:0)")?;
        }

        let mut visitor = AgentLikeFieldVisitor::new(writer.by_ref());
        event.record(&mut visitor);
        visitor.finish()?;

        writeln!(writer)
    }
}

/// Writes structured fields as `key:value` pairs separated by commas, followed by the message.
///
/// The first write error is kept and returned from `finish`. Every write after it is skipped.
struct AgentLikeFieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    last_result: fmt::Result,
}

impl<'writer> AgentLikeFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            fields_written: 0,
            message: String::new(),
            last_result: Ok(()),
        }
    }

    fn try_write(&mut self, field: &field::Field, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        if self.last_result.is_err() {
            return;
        }

        // The message always comes last.
        if field.name() == "message" {
            self.last_result = f(&mut self.message);
            return;
        }

        let lead = if self.fields_written == 0 { " | " } else { "," };
        self.last_result = write!(self.writer, "{}{}:", lead, field.name());
        if self.last_result.is_err() {
            return;
        }

        self.last_result = f(&mut self.writer);
        if self.last_result.is_ok() {
            self.fields_written += 1;
        }
    }
}

impl field::Visit for AgentLikeFieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        self.try_write(field, |w| write!(w, "{:?}", value));
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.try_write(field, |w| write!(w, "{}", value));
    }
}

impl VisitOutput<fmt::Result> for AgentLikeFieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.last_result?;

        if self.message.is_empty() {
            Ok(())
        } else {
            write!(self.writer, " | {}", self.message)
        }
    }
}

/// Formats the current time as `2024-12-31 23:59:59 UTC`.
fn delayed_format_now() -> DelayedFormat<impl Iterator<Item = &'static Item<'static>> + Clone> {
    static FORMAT_ITEMS: OnceLock<Vec<Item<'static>>> = OnceLock::new();
    let format_items = FORMAT_ITEMS.get_or_init(|| StrftimeItems::new("%Y-%m-%d %H:%M:%S UTC").collect());

    Utc::now().format_with_items(format_items.iter())
}
