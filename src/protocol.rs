//! Wire format spoken with the compiler process.
//!
//! Messages are newline-delimited JSON objects. Requests carry the job id and
//! kind; the compiler answers with `result`/`error` messages tagged by `type`,
//! and may send `ready` or free-form `notification` messages at any time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_lsp::lsp_types::{
    GotoDefinitionResponse, Hover, HoverContents, Location, MarkupContent, MarkupKind, Range,
};

use crate::diagnostics::CompileReport;
use crate::error::{JobError, JobOutcome};
use crate::job::{Job, JobId, RequestKind};
use crate::transport::EditorNotice;

#[derive(Debug, Serialize)]
struct WireRequest {
    id: JobId,
    kind: RequestKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Encode a job as one line (without the trailing newline).
pub fn encode_job(job: &Job) -> serde_json::Result<String> {
    serde_json::to_string(&WireRequest {
        id: job.id,
        kind: job.kind(),
        params: job.request.wire_params(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum CompilerMessage {
    Ready,
    Result {
        id: JobId,
        #[serde(default)]
        result: Value,
    },
    Error {
        id: JobId,
        message: String,
    },
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Something the compiler process did, as seen by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilerEvent {
    Ready,
    Response { id: JobId, outcome: JobOutcome },
    /// Garbage that could not be tied to a job id.
    Unmatched { reason: String },
    Notification(EditorNotice),
    Exited,
}

/// Decode one line from the compiler. Blank lines yield `None`.
pub fn decode_line(line: &str) -> Option<CompilerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let event = match serde_json::from_str::<CompilerMessage>(line) {
        Ok(CompilerMessage::Ready) => CompilerEvent::Ready,
        Ok(CompilerMessage::Result { id, result }) => CompilerEvent::Response {
            id,
            outcome: Ok(result),
        },
        Ok(CompilerMessage::Error { id, message }) => CompilerEvent::Response {
            id,
            outcome: Err(JobError::Compiler(message)),
        },
        Ok(CompilerMessage::Notification { method, params }) => {
            CompilerEvent::Notification(EditorNotice::from_compiler(method, params))
        }
        Err(e) => match recover_id(line) {
            Some(id) => CompilerEvent::Response {
                id,
                outcome: Err(JobError::Protocol(e.to_string())),
            },
            None => CompilerEvent::Unmatched {
                reason: e.to_string(),
            },
        },
    };
    Some(event)
}

fn recover_id(line: &str) -> Option<JobId> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("id")?.as_u64().map(JobId)
}

/// Parse the result of a recompile or workspace job.
pub fn decode_report(result: &Value) -> Result<CompileReport, JobError> {
    if result.is_null() {
        return Ok(CompileReport::default());
    }
    CompileReport::deserialize(result).map_err(|e| JobError::Protocol(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct HoverReply {
    contents: String,
    #[serde(default)]
    range: Option<Range>,
}

/// Turn a hover job outcome into an LSP hover. Failures become `None`.
pub fn decode_hover(outcome: JobOutcome) -> Option<Hover> {
    let value = match outcome {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Hover unavailable: {}", e);
            return None;
        }
    };
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<HoverReply>(value) {
        Ok(reply) => Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: reply.contents,
            }),
            range: reply.range,
        }),
        Err(e) => {
            log::warn!("Malformed hover result from compiler: {}", e);
            None
        }
    }
}

/// Turn a goto-definition job outcome into an LSP response. Failures become `None`.
pub fn decode_definition(outcome: JobOutcome) -> Option<GotoDefinitionResponse> {
    let value = match outcome {
        Ok(value) => value,
        Err(e) => {
            log::debug!("Definition unavailable: {}", e);
            return None;
        }
    };
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<Location>(value) {
        Ok(location) => Some(GotoDefinitionResponse::Scalar(location)),
        Err(e) => {
            log::warn!("Malformed definition result from compiler: {}", e);
            None
        }
    }
}
