use std::time::SystemTime;

use tracing::info;

use crate::delta::FileDelta;
use crate::session::SessionTotals;

/// A serializable telemetry event describing session progress.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub created_time: Option<SystemTime>,
    pub session_id: String,
    #[serde(flatten)]
    pub ty: EventType,
}

impl TelemetryEvent {
    pub fn new(session_id: impl Into<String>, ty: EventType) -> Self {
        Self {
            created_time: Some(SystemTime::now()),
            session_id: session_id.into(),
            ty,
        }
    }

    pub fn file_changed(session_id: impl Into<String>, delta: &FileDelta) -> Self {
        Self::new(session_id, EventType::FileChanged {
            file_name: delta.file_name.clone(),
            language_id: delta.language_id.clone(),
            lines_added: delta.lines_added,
            lines_removed: delta.lines_removed,
        })
    }

    pub fn session_ended(session_id: impl Into<String>, totals: SessionTotals) -> Self {
        Self::new(session_id, EventType::SessionEnded {
            files_changed: totals.files_changed,
            lines_added: totals.lines_added,
            lines_removed: totals.lines_removed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
#[serde(tag = "type")]
pub enum EventType {
    FileChanged {
        file_name: String,
        language_id: String,
        lines_added: usize,
        lines_removed: usize,
    },
    SessionEnded {
        files_changed: usize,
        lines_added: usize,
        lines_removed: usize,
    },
}

/// Fire-and-forget receiver of telemetry events. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn send_event(&self, event: TelemetryEvent);
}

/// Reports telemetry as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn send_event(&self, event: TelemetryEvent) {
        match event.ty {
            EventType::FileChanged {
                file_name,
                language_id,
                lines_added,
                lines_removed,
            } => info!(
                session_id = %event.session_id,
                %file_name,
                %language_id,
                lines_added,
                lines_removed,
                "file changed"
            ),
            EventType::SessionEnded {
                files_changed,
                lines_added,
                lines_removed,
            } => info!(
                session_id = %event.session_id,
                files_changed,
                lines_added,
                lines_removed,
                "session ended"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::delta::LineDelta;

    #[test]
    fn test_event_serialization() {
        let event = TelemetryEvent {
            created_time: None,
            session_id: "s".into(),
            ty: EventType::SessionEnded {
                files_changed: 2,
                lines_added: 5,
                lines_removed: 1,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "sessionEnded");
        assert_eq!(value["filesChanged"], 2);
        assert_eq!(serde_json::from_value::<TelemetryEvent>(value).unwrap(), event);
    }

    #[traced_test]
    #[test]
    fn test_tracing_sink_logs_events() {
        let sink = TracingTelemetrySink;
        sink.send_event(TelemetryEvent::file_changed(
            "s-1",
            &FileDelta::new("main.rs", "rust", LineDelta::new(4, 2)),
        ));
        sink.send_event(TelemetryEvent::session_ended("s-1", SessionTotals {
            files_changed: 1,
            lines_added: 4,
            lines_removed: 2,
        }));

        assert!(logs_contain("file changed"));
        assert!(logs_contain("file_name=main.rs"));
        assert!(logs_contain("session ended"));
        assert!(logs_contain("files_changed=1"));
    }
}
