use crate::types::{EventSource, RealtimeEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Type name used for frames that could not be parsed or applied.
pub const PROTOCOL_ERROR_TYPE: &str = "protocol_error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeEventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub type_name: String,
    /// 1 for a single event; bumped for each identical event that follows it.
    pub repeat_count: u32,
    /// Payload of the first event in the run.
    pub raw_payload: Value,
}

/// Display log in which runs of identical `(source, type_name)` collapse into
/// one entry.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Vec<RealtimeEventLogEntry>,
}

impl EventLog {
    pub fn record(&mut self, event: RealtimeEvent) {
        if let Some(last) = self.entries.last_mut() {
            if last.source == event.source && last.type_name == event.type_name {
                last.repeat_count += 1;
                return;
            }
        }
        self.entries.push(RealtimeEventLogEntry {
            timestamp: event.timestamp,
            source: event.source,
            type_name: event.type_name,
            repeat_count: 1,
            raw_payload: event.payload,
        });
    }

    pub fn record_protocol_error(&mut self, message: &str, raw: &str) {
        self.record(RealtimeEvent::new(
            EventSource::Server,
            PROTOCOL_ERROR_TYPE,
            serde_json::json!({ "message": message, "raw": raw }),
        ));
    }

    pub fn entries(&self) -> &[RealtimeEventLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
