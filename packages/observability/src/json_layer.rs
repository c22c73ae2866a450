//! JSONL layer: one [`LogEntry`] object per event.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// One line of the JSONL log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// UTC, microsecond precision.
    pub timestamp: String,
    /// Upper-case level name.
    pub level: String,
    pub service: String,
    pub pid: u32,
    /// Module path of the call site.
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, Value>,
    /// Enclosing spans, outermost first, joined with `:`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Field names whose values never reach the log file.
const REDACTED_FIELDS: [&str; 5] = [
    "password",
    "access_token",
    "refresh_token",
    "token",
    "authorization",
];

const REDACTED: &str = "[redacted]";

fn is_sensitive(name: &str) -> bool {
    REDACTED_FIELDS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

/// Collects the message and structured fields of one event.
#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, Value>,
    message: Option<String>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        } else if is_sensitive(name) {
            self.fields
                .insert(name.to_string(), Value::String(REDACTED.to_string()));
        } else {
            self.fields.insert(name.to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.insert(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

/// Writes each event as one [`LogEntry`] line. Sensitive fields are
/// replaced with a placeholder.
pub struct JsonLayer<W> {
    service: String,
    pid: u32,
    writers: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service: String, writers: W) -> Self {
        Self {
            service,
            pid: std::process::id(),
            writers,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let span_path = ctx.event_scope(event).map(|scope| {
            scope
                .from_root()
                .map(|span| span.name())
                .collect::<Vec<_>>()
                .join(":")
        });

        let metadata = event.metadata();

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            level: metadata.level().as_str().to_string(),
            service: self.service.clone(),
            pid: self.pid,
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            span: span_path,
            file: metadata.file().map(|s| s.to_string()),
            line: metadata.line(),
        };

        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        let _ = writeln!(self.writers.make_writer(), "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_log_entry_skips_empty_fields() {
        let entry = LogEntry {
            timestamp: "2026-01-15T10:30:00.000000Z".to_string(),
            level: "INFO".to_string(),
            service: "forms-session".to_string(),
            pid: 12345,
            target: "realtime_hub::manager".to_string(),
            message: "connected to hub".to_string(),
            fields: HashMap::new(),
            span: None,
            file: None,
            line: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"service\":\"forms-session\""));
        assert!(!json.contains("fields"));
        assert!(!json.contains("span"));
    }

    #[test]
    fn test_layer_writes_one_line_per_event() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry()
            .with(JsonLayer::new("test".to_string(), capture.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(topic = "tmpl-1", attempt = 2u64, "joined group");
            tracing::warn!("second");
        });

        let output = String::from_utf8(capture.0.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message"], "joined group");
        assert_eq!(first["level"], "INFO");
        assert_eq!(first["fields"]["topic"], "tmpl-1");
        assert_eq!(first["fields"]["attempt"], 2);
    }

    #[test]
    fn test_sensitive_fields_are_redacted() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry()
            .with(JsonLayer::new("test".to_string(), capture.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("refresh");
            let _guard = span.enter();
            tracing::debug!(refresh_token = "R1", Password = "hunter2", user_id = "7", "sending");
        });

        let output = String::from_utf8(capture.0.lock().clone()).unwrap();
        assert!(!output.contains("R1"));
        assert!(!output.contains("hunter2"));

        let entry: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(entry["fields"]["refresh_token"], "[redacted]");
        assert_eq!(entry["fields"]["user_id"], "7");
        assert_eq!(entry["span"], "refresh");
    }
}
