//! Messages exchanged between a caller and the export worker.
//!
//! Requests flow in, events flow out. Exactly one terminal event (`done`
//! or `error`) closes a job; a cancelled job closes with neither.

use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use splice_ir::ProjectDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Start { project: Box<ProjectDescriptor> },
    Cancel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The worker accepts `start` from now on.
    Ready,
    /// Percent complete, never decreasing within a job.
    Progress { progress: f64 },
    /// The finished container. The bytes are shared rather than copied;
    /// the serialized form carries only their length.
    Done {
        #[serde(rename = "bytes", serialize_with = "byte_len")]
        buffer: Arc<Vec<u8>>,
    },
    Error { message: String },
    /// Advisory diagnostic.
    Debug { message: String },
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done { .. } | Event::Error { .. })
    }
}

fn byte_len<S: Serializer>(buffer: &Arc<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(buffer.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_are_tagged() {
        let start: Request = serde_json::from_str(
            r#"{"type": "start", "project": {"width": 8, "height": 8, "fps": 25}}"#,
        )
        .unwrap();
        match start {
            Request::Start { project } => assert_eq!(project.fps, 25.0),
            other => panic!("unexpected {:?}", other),
        }
        let cancel: Request = serde_json::from_str(r#"{"type": "cancel"}"#).unwrap();
        assert!(matches!(cancel, Request::Cancel));
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let ready = serde_json::to_value(Event::Ready).unwrap();
        assert_eq!(ready, serde_json::json!({"type": "ready"}));

        let progress = serde_json::to_value(Event::Progress { progress: 20.0 }).unwrap();
        assert_eq!(progress, serde_json::json!({"type": "progress", "progress": 20.0}));

        let done = serde_json::to_value(Event::Done {
            buffer: Arc::new(vec![0; 42]),
        })
        .unwrap();
        assert_eq!(done, serde_json::json!({"type": "done", "bytes": 42}));
    }

    #[test]
    fn test_terminal_events() {
        assert!(Event::Error { message: "x".into() }.is_terminal());
        assert!(!Event::Progress { progress: 5.0 }.is_terminal());
        assert!(!Event::Debug { message: "x".into() }.is_terminal());
    }
}
