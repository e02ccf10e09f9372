//! Structured logger & correlation propagation.
//!
//! One JSON object per line: `{ts, level, msg, correlationID, component,
//! extra}`. Writes are buffered; losing a single buffered message on exit is
//! treated as a correctness bug, so every exit path — normal return, panic,
//! SIGINT, SIGTERM — must flush before the process actually exits
//! on every exit path.

use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::RwLock;

use masterclaw_protocol::CorrelationId;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::safe::mask_sensitive;
use crate::safe::sanitize_for_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    ts: String,
    level: Level,
    msg: String,
    #[serde(rename = "correlationID", skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    component: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    extra: Value,
}

/// A leveled, buffered, append-only JSON-lines logger.
pub struct JsonLogger {
    min_level: Level,
    buffer: Mutex<Vec<u8>>,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl JsonLogger {
    pub fn new(sink: Box<dyn Write + Send>, min_level: Level) -> Arc<Self> {
        Arc::new(Self {
            min_level,
            buffer: Mutex::new(Vec::new()),
            sink: Mutex::new(sink),
        })
    }

    pub fn stderr(min_level: Level) -> Arc<Self> {
        Self::new(Box::new(std::io::stderr()), min_level)
    }

    pub fn log(&self, level: Level, component: &str, msg: &str, extra: Value) {
        if level < self.min_level {
            return;
        }
        let record = LogRecord {
            ts: now_rfc3339(),
            level,
            msg: sanitize_for_log(msg),
            correlation_id: current_correlation_id().map(|id| id.as_str().to_string()),
            component,
            extra: mask_sensitive(&extra),
        };
        let mut line = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        line.push(b'\n');

        let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(&line);
        // Flush proactively once the buffer grows past a page; still
        // flushed unconditionally on every exit path regardless.
        if buf.len() > 8192 {
            drop(buf);
            self.flush();
        }
    }

    pub fn debug(&self, component: &str, msg: &str) {
        self.log(Level::Debug, component, msg, Value::Null);
    }
    pub fn info(&self, component: &str, msg: &str) {
        self.log(Level::Info, component, msg, Value::Null);
    }
    pub fn warn(&self, component: &str, msg: &str) {
        self.log(Level::Warn, component, msg, Value::Null);
    }
    pub fn error(&self, component: &str, msg: &str) {
        self.log(Level::Error, component, msg, Value::Null);
    }

    /// Drain the buffer to the sink. Idempotent: calling this twice in a
    /// row on an empty buffer is a cheap no-op, which matters because every
    /// exit path calls it regardless of whether an earlier path already
    /// did.
    pub fn flush(&self) {
        let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buf.is_empty() {
            return;
        }
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.write_all(&buf);
            let _ = sink.flush();
        }
        buf.clear();
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

static CURRENT_CORRELATION_ID: OnceLock<RwLock<Option<CorrelationId>>> = OnceLock::new();

fn correlation_slot() -> &'static RwLock<Option<CorrelationId>> {
    CURRENT_CORRELATION_ID.get_or_init(|| RwLock::new(None))
}

/// Set the process-wide "current" correlation ID. The dispatcher calls this
/// once per command; helpers (HTTP, subprocess, audit) pick it up
/// implicitly so callers never have to thread it through every signature.
pub fn set_current_correlation_id(id: CorrelationId) {
    if let Ok(mut slot) = correlation_slot().write() {
        *slot = Some(id);
    }
}

pub fn current_correlation_id() -> Option<CorrelationId> {
    correlation_slot().read().ok().and_then(|slot| slot.clone())
}

/// Install hooks so the logger's buffer is guaranteed to flush on a panic
/// or a SIGINT/SIGTERM. Call this once, right after the logger is
/// constructed, before any handler runs.
pub fn install_exit_flush_hooks(logger: Arc<JsonLogger>) {
    let panic_logger = Arc::clone(&logger);
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        panic_logger.error("panic", &info.to_string());
        panic_logger.flush();
        previous_hook(info);
    }));

    #[cfg(unix)]
    {
        let signal_logger = Arc::clone(&logger);
        tokio::spawn(async move {
            use tokio::signal::unix::SignalKind;
            use tokio::signal::unix::signal;
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            signal_logger.warn("signal", "received termination signal");
            signal_logger.flush();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone)]
    struct VecSink(Arc<StdMutex<Vec<u8>>>);

    impl Write for VecSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn log_lines_are_one_json_object_each() {
        let storage = Arc::new(StdMutex::new(Vec::new()));
        let logger = JsonLogger::new(Box::new(VecSink(Arc::clone(&storage))), Level::Debug);
        logger.info("dispatcher", "hello");
        logger.warn("dispatcher", "world");
        logger.flush();

        let bytes = storage.lock().unwrap().clone();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("ts").is_some());
            assert!(parsed.get("level").is_some());
        }
    }

    #[test]
    fn below_min_level_is_dropped() {
        let storage = Arc::new(StdMutex::new(Vec::new()));
        let logger = JsonLogger::new(Box::new(VecSink(Arc::clone(&storage))), Level::Warn);
        logger.debug("dispatcher", "should not appear");
        logger.flush();
        assert!(storage.lock().unwrap().is_empty());
    }

    #[test]
    fn messages_are_sanitized_before_logging() {
        let storage = Arc::new(StdMutex::new(Vec::new()));
        let logger = JsonLogger::new(Box::new(VecSink(Arc::clone(&storage))), Level::Debug);
        logger.info("dispatcher", "line one\r\nline two");
        logger.flush();
        let text = String::from_utf8(storage.lock().unwrap().clone()).unwrap();
        let parsed: Value = serde_json::from_str(text.trim()).unwrap();
        let msg = parsed["msg"].as_str().unwrap();
        assert!(!msg.contains('\n') || msg == "line oneline two");
    }

    #[test]
    fn flush_is_idempotent_on_empty_buffer() {
        let storage = Arc::new(StdMutex::new(Vec::new()));
        let logger = JsonLogger::new(Box::new(VecSink(Arc::clone(&storage))), Level::Debug);
        logger.flush();
        logger.flush();
        assert!(storage.lock().unwrap().is_empty());
    }
}
