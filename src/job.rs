//! Jobs: the units of work routed to the external compiler.
//!
//! Every editor event that needs the compiler becomes a [`JobRequest`]. The
//! request's [`RequestKind`] decides how the engine treats it through a single
//! exhaustive [`RequestKind::category`] table.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_lsp::lsp_types::{Position, Url};

/// Engine-assigned job identifier. Fresh for every submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wire-level kind of a job. Serialized names match the compiler protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    InternalReady,
    ApiAddUri,
    ApiRemUri,
    DocumentChanged,
    DocumentSaved,
    Hover,
    GotoDefinition,
    Shutdown,
}

/// How the engine schedules a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCategory {
    /// Per-document recompile; a queued job for the same URI is replaced.
    Recompile,
    /// Full-workspace recheck; previously published diagnostics are retracted first.
    Workspace,
    /// Request/response; the caller waits for the matching result.
    Query,
    /// Process lifecycle.
    Lifecycle,
}

impl RequestKind {
    pub fn category(self) -> JobCategory {
        match self {
            Self::DocumentChanged | Self::DocumentSaved => JobCategory::Recompile,
            Self::InternalReady | Self::ApiAddUri | Self::ApiRemUri => JobCategory::Workspace,
            Self::Hover | Self::GotoDefinition => JobCategory::Query,
            Self::Shutdown => JobCategory::Lifecycle,
        }
    }

    pub fn is_coalescable(self) -> bool {
        self.category() == JobCategory::Recompile
    }

    pub fn expects_reply(self) -> bool {
        self.category() == JobCategory::Query
    }

    /// Whether a successful result is a compile report carrying diagnostics.
    pub fn produces_diagnostics(self) -> bool {
        matches!(
            self.category(),
            JobCategory::Recompile | JobCategory::Workspace
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InternalReady => "internalReady",
            Self::ApiAddUri => "apiAddUri",
            Self::ApiRemUri => "apiRemUri",
            Self::DocumentChanged => "documentChanged",
            Self::DocumentSaved => "documentSaved",
            Self::Hover => "hover",
            Self::GotoDefinition => "gotoDefinition",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of an open document at the moment a job was formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub uri: Url,
    pub version: i32,
    pub text: String,
}

/// A document position the compiler is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionQuery {
    pub uri: Url,
    pub position: Position,
}

/// A job request together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    InternalReady,
    AddUri(Url),
    RemoveUri(Url),
    DocumentChanged(DocumentSnapshot),
    DocumentSaved(DocumentSnapshot),
    Hover(PositionQuery),
    GotoDefinition(PositionQuery),
    Shutdown,
}

/// Identity under which queued jobs replace one another.
///
/// Changes and saves share the recompile family, so a save supersedes a queued
/// change of the same document and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoalesceKey {
    Recompile(Url),
}

impl JobRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::InternalReady => RequestKind::InternalReady,
            Self::AddUri(_) => RequestKind::ApiAddUri,
            Self::RemoveUri(_) => RequestKind::ApiRemUri,
            Self::DocumentChanged(_) => RequestKind::DocumentChanged,
            Self::DocumentSaved(_) => RequestKind::DocumentSaved,
            Self::Hover(_) => RequestKind::Hover,
            Self::GotoDefinition(_) => RequestKind::GotoDefinition,
            Self::Shutdown => RequestKind::Shutdown,
        }
    }

    pub fn coalesce_key(&self) -> Option<CoalesceKey> {
        match self {
            Self::DocumentChanged(doc) | Self::DocumentSaved(doc) => {
                Some(CoalesceKey::Recompile(doc.uri.clone()))
            }
            Self::InternalReady
            | Self::AddUri(_)
            | Self::RemoveUri(_)
            | Self::Hover(_)
            | Self::GotoDefinition(_)
            | Self::Shutdown => None,
        }
    }

    /// Payload sent to the compiler, or `None` for kinds without one.
    pub fn wire_params(&self) -> Option<Value> {
        match self {
            Self::InternalReady | Self::Shutdown => None,
            Self::AddUri(uri) | Self::RemoveUri(uri) => Some(json!({ "uri": uri })),
            Self::DocumentChanged(doc) | Self::DocumentSaved(doc) => {
                serde_json::to_value(doc).ok()
            }
            Self::Hover(query) | Self::GotoDefinition(query) => serde_json::to_value(query).ok(),
        }
    }
}

/// A request that has been given an id by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub request: JobRequest,
}

impl Job {
    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(uri: &str, version: i32) -> DocumentSnapshot {
        DocumentSnapshot {
            uri: Url::parse(uri).unwrap(),
            version,
            text: format!("v{version}"),
        }
    }

    #[test]
    fn categories_match_routing_table() {
        assert!(RequestKind::DocumentChanged.is_coalescable());
        assert!(RequestKind::DocumentSaved.is_coalescable());
        assert!(!RequestKind::InternalReady.is_coalescable());
        assert!(!RequestKind::ApiAddUri.is_coalescable());
        assert!(!RequestKind::ApiRemUri.is_coalescable());
        assert!(!RequestKind::Shutdown.is_coalescable());

        assert!(RequestKind::Hover.expects_reply());
        assert!(RequestKind::GotoDefinition.expects_reply());
        assert!(!RequestKind::DocumentChanged.expects_reply());

        assert_eq!(RequestKind::ApiRemUri.category(), JobCategory::Workspace);
        assert_eq!(RequestKind::Shutdown.category(), JobCategory::Lifecycle);
        assert!(!RequestKind::Hover.produces_diagnostics());
    }

    #[test]
    fn kind_serializes_to_protocol_names() {
        for kind in [
            RequestKind::InternalReady,
            RequestKind::ApiAddUri,
            RequestKind::ApiRemUri,
            RequestKind::DocumentChanged,
            RequestKind::DocumentSaved,
            RequestKind::Hover,
            RequestKind::GotoDefinition,
            RequestKind::Shutdown,
        ] {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn change_and_save_share_a_coalesce_key() {
        let change = JobRequest::DocumentChanged(snapshot("file:///a.src", 1));
        let save = JobRequest::DocumentSaved(snapshot("file:///a.src", 2));
        let other = JobRequest::DocumentChanged(snapshot("file:///b.src", 1));

        assert_eq!(change.coalesce_key(), save.coalesce_key());
        assert_ne!(change.coalesce_key(), other.coalesce_key());
        assert_eq!(JobRequest::InternalReady.coalesce_key(), None);
    }

    #[test]
    fn wire_params_shapes() {
        assert_eq!(JobRequest::InternalReady.wire_params(), None);

        let uri = Url::parse("file:///lib/mod.src").unwrap();
        assert_eq!(
            JobRequest::AddUri(uri).wire_params(),
            Some(json!({ "uri": "file:///lib/mod.src" }))
        );

        let params = JobRequest::DocumentSaved(snapshot("file:///a.src", 3))
            .wire_params()
            .unwrap();
        assert_eq!(params["version"], 3);
        assert_eq!(params["text"], "v3");

        let query = JobRequest::Hover(PositionQuery {
            uri: Url::parse("file:///a.src").unwrap(),
            position: Position::new(4, 2),
        });
        let params = query.wire_params().unwrap();
        assert_eq!(params["position"]["line"], 4);
        assert_eq!(params["position"]["character"], 2);
    }
}
