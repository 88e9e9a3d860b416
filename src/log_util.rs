use crate::splitter_util::make_dir;
use crate::SplitError;
use chrono::Local;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_FILE_NAME: &str = "filesplitter.log";

/// Map a level name to its filter. `critical` aliases `error`; anything
/// unrecognized yields `None` and the caller keeps its default.
pub fn parse_level(text: &str) -> Option<LevelFilter> {
    match text {
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warning" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        "critical" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}

// std's ThreadId has no stable numeric accessor, so threads get a small
// sequential number the first time they log.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Event format producing `<tid> [HH:MM:SS.ffffff] (<level>) <message>`.
/// The thread id comes first so the log can be sorted by worker.
struct SplitterFormat;

impl<S, N> FormatEvent<S, N> for SplitterFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = match *event.metadata().level() {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warning",
            Level::ERROR => "error",
        };
        write!(
            writer,
            "{} [{}] ({}) ",
            current_thread_id(),
            Local::now().format("%H:%M:%S%.6f"),
            level
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global file logger: `<logdir>/filesplitter.log`, truncated on
/// each run, shared by all worker threads.
pub fn init_logger(logdir: &Path, level: LevelFilter) -> Result<(), SplitError> {
    make_dir(logdir).map_err(|e| SplitError::DirCreate {
        path: logdir.to_path_buf(),
        source: e,
    })?;

    let logname = logdir.join(LOG_FILE_NAME);
    let file = File::create(&logname)?;

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .event_format(SplitterFormat)
        .with_writer(Mutex::new(file))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| SplitError::Logger(e.to_string()))?;

    Ok(())
}
