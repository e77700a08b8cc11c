//! Outbound side of the editor connection.
//!
//! The scheduler only talks to the editor through [`Transport`], which the
//! tower-lsp [`Client`] implements. Tests substitute a recording transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::{LogMessageParams, MessageType, ShowMessageParams};
use tower_lsp::Client;

use crate::diagnostics::Publication;
use crate::engine::EngineState;

/// `compilerBridge/status`: the engine changed state.
pub enum CompilerStatus {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerStatusParams {
    pub state: EngineState,
}

impl Notification for CompilerStatus {
    type Params = CompilerStatusParams;
    const METHOD: &'static str = "compilerBridge/status";
}

/// `compilerBridge/notification`: a compiler notification with no LSP equivalent.
pub enum CompilerNotification {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerNotificationParams {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Notification for CompilerNotification {
    type Params = CompilerNotificationParams;
    const METHOD: &'static str = "compilerBridge/notification";
}

/// Editor-directed notification other than diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorNotice {
    ShowMessage { typ: MessageType, message: String },
    LogMessage { typ: MessageType, message: String },
    Status(EngineState),
    Relay { method: String, params: Value },
}

impl EditorNotice {
    /// Map a compiler notification onto the closest editor notification.
    pub fn from_compiler(method: String, params: Value) -> Self {
        match method.as_str() {
            "window/showMessage" => {
                if let Ok(parsed) = serde_json::from_value::<ShowMessageParams>(params.clone()) {
                    return Self::ShowMessage {
                        typ: parsed.typ,
                        message: parsed.message,
                    };
                }
            }
            "window/logMessage" => {
                if let Ok(parsed) = serde_json::from_value::<LogMessageParams>(params.clone()) {
                    return Self::LogMessage {
                        typ: parsed.typ,
                        message: parsed.message,
                    };
                }
            }
            _ => {}
        }
        Self::Relay { method, params }
    }
}

#[tower_lsp::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_diagnostics(&self, publication: Publication);

    async fn send_notification(&self, notice: EditorNotice);
}

#[tower_lsp::async_trait]
impl Transport for Client {
    async fn send_diagnostics(&self, publication: Publication) {
        self.publish_diagnostics(publication.uri, publication.diagnostics, None)
            .await;
    }

    async fn send_notification(&self, notice: EditorNotice) {
        match notice {
            EditorNotice::ShowMessage { typ, message } => self.show_message(typ, message).await,
            EditorNotice::LogMessage { typ, message } => self.log_message(typ, message).await,
            EditorNotice::Status(state) => {
                Client::send_notification::<CompilerStatus>(self, CompilerStatusParams { state })
                    .await
            }
            EditorNotice::Relay { method, params } => {
                Client::send_notification::<CompilerNotification>(
                    self,
                    CompilerNotificationParams { method, params },
                )
                .await
            }
        }
    }
}
