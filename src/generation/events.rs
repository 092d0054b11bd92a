//! Progress events and their Server-Sent-Event framing.

use super::page::{GenerationSummary, PageStatus};
use serde_json::{json, Value};

/// Anything that can be framed as a named SSE event.
pub trait SseEvent {
    fn event_name(&self) -> &'static str;

    fn payload(&self) -> Value;

    /// `event: <name>\ndata: <json>\n\n`
    fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_name(), self.payload())
    }

    /// One JSON object per line: `{"event": <name>, "data": <json>}`
    fn to_json_line(&self) -> String {
        json!({ "event": self.event_name(), "data": self.payload() }).to_string()
    }
}

/// Event emitted by the generation coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { index: usize, status: PageStatus },
    Complete { index: usize, image_url: String },
    Error { index: usize, message: String },
    Finish(GenerationSummary),
    RetryStart { message: String },
    RetryFinish(GenerationSummary),
}

impl ProgressEvent {
    pub fn index(&self) -> Option<usize> {
        match self {
            ProgressEvent::Progress { index, .. }
            | ProgressEvent::Complete { index, .. }
            | ProgressEvent::Error { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// `complete` or `error` for a single page
    pub fn is_page_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }

    pub fn summary(&self) -> Option<GenerationSummary> {
        match self {
            ProgressEvent::Finish(summary) | ProgressEvent::RetryFinish(summary) => Some(*summary),
            _ => None,
        }
    }
}

impl SseEvent for ProgressEvent {
    fn event_name(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Finish(_) => "finish",
            ProgressEvent::RetryStart { .. } => "retry_start",
            ProgressEvent::RetryFinish(_) => "retry_finish",
        }
    }

    fn payload(&self) -> Value {
        match self {
            ProgressEvent::Progress { index, status } => {
                json!({ "index": index, "status": status.as_str() })
            }
            ProgressEvent::Complete { index, image_url } => {
                json!({ "index": index, "image_url": image_url })
            }
            ProgressEvent::Error { index, message } => {
                json!({ "index": index, "message": message })
            }
            ProgressEvent::Finish(summary) | ProgressEvent::RetryFinish(summary) => json!({
                "success": summary.success,
                "total": summary.total,
                "completed": summary.completed,
                "failed": summary.failed,
            }),
            ProgressEvent::RetryStart { message } => json!({ "message": message }),
        }
    }
}
