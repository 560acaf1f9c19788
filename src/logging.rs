//! Structured JSON logger
//!
//! One log line = one event, synchronous and unbuffered. A line renders
//! as a JSON object with `event` first, `severity` second, and the
//! remaining fields in alphabetical order, so output is stable across
//! runs. String escaping is delegated to serde_json rather than done by
//! hand. Severity routing and the LOG_LEVEL threshold live in the sink
//! dispatch: events below the threshold get no sink at all, and errors
//! and above sink to stderr.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::Value;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// Parse a LOG_LEVEL value; unknown values default to INFO
    pub fn from_level_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" | "DEBUG" => Severity::Trace,
            "WARN" | "WARNING" => Severity::Warn,
            "ERROR" => Severity::Error,
            "FATAL" => Severity::Fatal,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Minimum severity emitted; below this, events get no sink
static THRESHOLD: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// One structured event, not yet rendered
struct LogEvent<'a> {
    severity: Severity,
    event: &'a str,
    fields: &'a [(&'a str, &'a str)],
}

impl LogEvent<'_> {
    /// Render to a single JSON line. Key order is fixed: event,
    /// severity, then fields alphabetically.
    fn render(&self) -> String {
        let mut ordered: Vec<(&str, &str)> = Vec::with_capacity(self.fields.len() + 2);
        ordered.push(("event", self.event));
        ordered.push(("severity", self.severity.as_str()));

        let mut tail: Vec<(&str, &str)> = self.fields.to_vec();
        tail.sort_by_key(|(key, _)| *key);
        ordered.extend(tail);

        let mut line = String::with_capacity(128);
        line.push('{');
        for (position, (key, value)) in ordered.iter().enumerate() {
            if position > 0 {
                line.push(',');
            }
            // Value::String's Display emits correctly escaped JSON
            line.push_str(&Value::String((*key).to_string()).to_string());
            line.push(':');
            line.push_str(&Value::String((*value).to_string()).to_string());
        }
        line.push('}');
        line.push('\n');
        line
    }
}

/// A structured logger that outputs single-line JSON events
pub struct Logger;

impl Logger {
    /// Set the process-wide severity threshold (from LOG_LEVEL)
    pub fn set_threshold(level: Severity) {
        THRESHOLD.store(level as u8, Ordering::Relaxed);
    }

    /// Pick the sink for a severity: `None` below the threshold, stderr
    /// for errors and above, stdout otherwise
    fn sink_for(severity: Severity) -> Option<Box<dyn Write>> {
        if (severity as u8) < THRESHOLD.load(Ordering::Relaxed) {
            return None;
        }
        if severity >= Severity::Error {
            Some(Box::new(io::stderr()))
        } else {
            Some(Box::new(io::stdout()))
        }
    }

    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let Some(mut sink) = Self::sink_for(severity) else {
            return;
        };
        let line = LogEvent {
            severity,
            event,
            fields,
        }
        .render();
        let _ = sink.write_all(line.as_bytes());
        let _ = sink.flush();
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        LogEvent {
            severity,
            event,
            fields,
        }
        .render()
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(Severity::from_level_str("debug"), Severity::Trace);
        assert_eq!(Severity::from_level_str("WARNING"), Severity::Warn);
        assert_eq!(Severity::from_level_str("bogus"), Severity::Info);
    }

    #[test]
    fn test_rendered_line_is_one_json_object() {
        let line = render(
            Severity::Warn,
            "BATCH_OPERATION_FAILED",
            &[("op_id", "op_3"), ("error", "FK violation")],
        );

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["event"], "BATCH_OPERATION_FAILED");
        assert_eq!(parsed["severity"], "WARN");
        assert_eq!(parsed["op_id"], "op_3");
        assert_eq!(parsed["error"], "FK violation");
    }

    #[test]
    fn test_key_order_is_event_severity_then_sorted() {
        let line = render(
            Severity::Info,
            "REQUEST",
            &[("entity", "album"), ("action", "read"), ("subject", "u-1")],
        );

        let keys: Vec<usize> = ["\"event\"", "\"severity\"", "\"action\"", "\"entity\"", "\"subject\""]
            .iter()
            .map(|key| line.find(key).unwrap())
            .collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_field_order_in_input_does_not_matter() {
        let forward = render(Severity::Info, "E", &[("a", "1"), ("b", "2")]);
        let reversed = render(Severity::Info, "E", &[("b", "2"), ("a", "1")]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_serde_escaping_round_trips() {
        let tricky = "quote \" backslash \\ newline \n tab \t control \u{1}";
        let line = render(Severity::Info, "E", &[("value", tricky)]);

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["value"], tricky);
    }

    #[test]
    fn test_sink_dispatch_enforces_threshold() {
        Logger::set_threshold(Severity::Warn);
        assert!(Logger::sink_for(Severity::Trace).is_none());
        assert!(Logger::sink_for(Severity::Info).is_none());
        assert!(Logger::sink_for(Severity::Warn).is_some());
        assert!(Logger::sink_for(Severity::Fatal).is_some());
        Logger::set_threshold(Severity::Info);
    }
}
