//! Append-only log file sink: `[<YYYY-MM-DD HH:MM:SS>] [<LEVEL>] <message>`.
//!
//! Installed as a `tracing_subscriber` layer next to the console output.
//! DEBUG and TRACE events are not written.
use chrono::Local;
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

fn level_label(level: &Level) -> Option<&'static str> {
    match *level {
        Level::ERROR => Some("ERROR"),
        Level::WARN => Some("WARNING"),
        Level::INFO => Some("INFO"),
        _ => None,
    }
}

pub fn format_line(timestamp: &str, label: &str, message: &str) -> String {
    format!("[{timestamp}] [{label}] {message}")
}

/// `<file>.1`
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

/// Move `path` to `<path>.1` when it is larger than `max_bytes`.
pub fn rotate_if_large(path: &Path, max_bytes: u64) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > max_bytes => {
            fs::rename(path, rotated_path(path))?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Last `n` lines of the log file; empty when it does not exist yet.
pub fn tail(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let lines: Vec<&str> = content.lines().collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

pub struct LogFileLayer {
    file: Mutex<File>,
}

impl LogFileLayer {
    /// Rotate an oversized file, then open it for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        rotate_if_large(path, MAX_LOG_BYTES)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: Subscriber> Layer<S> for LogFileLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(label) = level_label(event.metadata().level()) else {
            return;
        };
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let message = format!("{}{}", visitor.message, visitor.fields);
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let line = format_line(&timestamp, label, &message);

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(file, "{line}");
    }
}
