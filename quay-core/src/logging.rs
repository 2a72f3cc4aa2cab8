//! Log sink initialization.
//!
//! One `tracing` subscriber serves both sinks: an optional console `fmt`
//! layer and an optional file `fmt` layer, gated by a single level filter
//! derived from `application.logLevel`. Every event renders as one line of
//! `<ISO-8601-UTC> [<LEVEL>] <MESSAGE>` with millisecond precision, e.g.
//! `2024-05-01T12:00:00.000Z [INFO] listener active`.
//!
//! The subscriber is installed once, before the configuration is available,
//! and reconfigured through the returned [`Logging`] handle after the config
//! store has loaded (and again after a reload).

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{ChronoUtc, FormatTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ApplicationSettings;

const UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Map a configured level name onto a `tracing` filter.
///
/// The configuration vocabulary is wider than tracing's (fatal/critical/
/// error all gate at ERROR, spam is TRACE).
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "none" => LevelFilter::OFF,
        "fatal" | "critical" | "error" => LevelFilter::ERROR,
        "warning" | "warn" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "spam" | "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Event renderer for both sinks: UTC timestamp, the level in square
/// brackets, then the message and any structured fields.
#[derive(Clone)]
struct LineFormat {
    timer: ChronoUtc,
}

impl LineFormat {
    fn new() -> Self {
        Self {
            timer: ChronoUtc::new(UTC_FORMAT.to_string()),
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        self.timer.format_time(&mut writer)?;
        write!(writer, " [{}] ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Handle for reconfiguring the installed sinks.
pub struct Logging {
    set_filter: Box<dyn Fn(LevelFilter) + Send + Sync>,
    set_console: Box<dyn Fn(bool) + Send + Sync>,
    set_file: Box<dyn Fn(Option<&str>) + Send + Sync>,
}

impl Logging {
    /// Re-apply level and sink settings, e.g. once the config is loaded.
    pub fn apply(&self, settings: &ApplicationSettings) {
        (self.set_filter)(level_filter(&settings.log_level));
        (self.set_console)(settings.console_logging);
        (self.set_file)(settings.log_file.as_deref());
    }
}

/// Install the global subscriber.
///
/// A file sink that cannot be opened is disabled with a single diagnostic
/// line on stderr; the console sink is unaffected. Re-initialization (tests)
/// is a no-op for the subscriber; the returned handle then controls nothing.
pub fn init_logging(initial: &ApplicationSettings) -> Logging {
    let console_layer_for =
        |enabled: bool| enabled.then(|| fmt::layer().event_format(LineFormat::new()));
    let file_layer_for = |path: Option<&str>| {
        let path = path?;
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                fmt::layer()
                    .event_format(LineFormat::new())
                    .with_writer(Mutex::new(file)),
            ),
            Err(err) => {
                eprintln!("quay: file log sink '{path}' disabled: {err}");
                None
            }
        }
    };

    let (filter, filter_handle) = reload::Layer::new(level_filter(&initial.log_level));
    let (console, console_handle) =
        reload::Layer::new(console_layer_for(initial.console_logging));
    let (file, file_handle) = reload::Layer::new(file_layer_for(initial.log_file.as_deref()));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();

    Logging {
        set_filter: Box::new(move |level| {
            let _ = filter_handle.reload(level);
        }),
        set_console: Box::new(move |enabled| {
            let _ = console_handle.reload(console_layer_for(enabled));
        }),
        set_file: Box::new(move |path: Option<&str>| {
            let _ = file_handle.reload(file_layer_for(path));
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn level_vocabulary_maps_onto_tracing() {
        assert_eq!(level_filter("none"), LevelFilter::OFF);
        assert_eq!(level_filter("Fatal"), LevelFilter::ERROR);
        assert_eq!(level_filter("critical"), LevelFilter::ERROR);
        assert_eq!(level_filter("ERROR"), LevelFilter::ERROR);
        assert_eq!(level_filter("warning"), LevelFilter::WARN);
        assert_eq!(level_filter("info"), LevelFilter::INFO);
        assert_eq!(level_filter("debug"), LevelFilter::DEBUG);
        assert_eq!(level_filter("spam"), LevelFilter::TRACE);
    }

    #[test]
    fn unknown_level_defaults_to_info() {
        assert_eq!(level_filter("verbose"), LevelFilter::INFO);
    }

    #[derive(Clone)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> fmt::MakeWriter<'a> for Capture {
        type Writer = CaptureWriter;

        fn make_writer(&'a self) -> Self::Writer {
            CaptureWriter(self.0.clone())
        }
    }

    #[test]
    fn line_format_is_timestamp_bracketed_level_message() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .event_format(LineFormat::new())
                .with_writer(Capture(buffer.clone())),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("listener active");
            tracing::error!("bind failed");
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let line = regex::Regex::new(
            r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z \[INFO\] listener active$",
        )
        .unwrap();
        let mut lines = output.lines();
        assert!(
            line.is_match(lines.next().unwrap()),
            "unexpected line shape: {output:?}"
        );
        assert!(lines.next().unwrap().contains("[ERROR] bind failed"));
    }

    #[test]
    fn structured_fields_render_after_the_message() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .event_format(LineFormat::new())
                .with_writer(Capture(buffer.clone())),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(ip = "10.0.0.1", "client over request budget");
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            output.contains("[WARN] client over request budget ip=\"10.0.0.1\""),
            "unexpected line shape: {output:?}"
        );
    }

    #[test]
    fn unopenable_file_sink_is_tolerated() {
        let settings = ApplicationSettings {
            log_level: "info".to_string(),
            log_file: Some("/nonexistent-dir/quay.log".to_string()),
            console_logging: false,
        };
        // Must not panic; the sink is simply disabled.
        let logging = init_logging(&ApplicationSettings::default());
        logging.apply(&settings);
    }
}
