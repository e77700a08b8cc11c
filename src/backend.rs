//! Backend struct for the compiler bridge language server.
//!
//! The Backend implements the `LanguageServer` trait from tower-lsp. It keeps
//! the open documents in memory and turns editor events into compiler jobs,
//! which it hands to the job scheduler. It never talks to the compiler itself.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::capabilities::{RESTART_COMMAND, STATUS_COMMAND};
use crate::config::{BridgeConfig, SETTINGS_SECTION};
use crate::job::{DocumentSnapshot, JobRequest, PositionQuery};
use crate::protocol;
use crate::proxy::{CompilerLauncher, ProcessLauncher};
use crate::scheduler::{self, EngineHandle};
use crate::transport::Transport;

/// State for a single open document.
#[derive(Debug, Clone)]
struct DocumentState {
    /// The full text content of the document
    text: String,
    /// The LSP document version number
    version: i32,
}

/// Parameters of `apiAddUri` / `apiRemUri`.
///
/// Clients send the URI bare, wrapped in an object, or as a one-element
/// positional array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UriParams {
    Bare(Url),
    Object { uri: Url },
    Positional(Vec<Url>),
}

impl UriParams {
    fn into_uris(self) -> Vec<Url> {
        match self {
            Self::Bare(uri) | Self::Object { uri } => vec![uri],
            Self::Positional(uris) => uris,
        }
    }
}

/// The Backend struct holds server state.
///
/// # State
/// - `documents`: In-memory storage of open document contents
/// - `config`: Bridge configuration, refined by the client
/// - `engine`: Handle to the scheduler that owns the compiler
pub struct Backend {
    /// In-memory storage of open document state, keyed by document URI
    documents: RwLock<HashMap<Url, DocumentState>>,
    /// Current configuration; compiler settings take effect on the next (re)launch
    config: RwLock<BridgeConfig>,
    engine: EngineHandle,
}

impl Backend {
    /// Create a Backend that launches the compiler as a child process and
    /// publishes through `client`.
    pub fn new(client: Client, config: BridgeConfig) -> Self {
        Self::with_components(config, ProcessLauncher, client)
    }

    /// Create a Backend with an explicit compiler launcher and transport.
    pub fn with_components<L, T>(config: BridgeConfig, launcher: L, transport: T) -> Self
    where
        L: CompilerLauncher,
        T: Transport,
    {
        Self {
            documents: RwLock::new(HashMap::new()),
            config: RwLock::new(config),
            engine: scheduler::spawn(launcher, transport),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Snapshot the stored document, if open.
    async fn snapshot(&self, uri: &Url) -> Option<DocumentSnapshot> {
        let documents = self.documents.read().await;
        documents.get(uri).map(|state| DocumentSnapshot {
            uri: uri.clone(),
            version: state.version,
            text: state.text.clone(),
        })
    }

    /// `internalReady`: the client finished its own startup.
    pub async fn internal_ready(&self) {
        log::info!("Client signalled internalReady");
        self.engine.submit(JobRequest::InternalReady);
    }

    /// `apiAddUri`: a URI joined the project.
    pub async fn api_add_uri(&self, params: UriParams) {
        for uri in params.into_uris() {
            log::info!("URI added to project: {}", uri);
            self.engine.submit(JobRequest::AddUri(uri));
        }
    }

    /// `apiRemUri`: a URI left the project.
    pub async fn api_rem_uri(&self, params: UriParams) {
        for uri in params.into_uris() {
            log::info!("URI removed from project: {}", uri);
            self.engine.submit(JobRequest::RemoveUri(uri));
        }
    }
}

fn root_path(params: &InitializeParams) -> Option<PathBuf> {
    #[allow(deprecated)]
    let root_uri = params
        .workspace_folders
        .as_ref()
        .and_then(|folders| folders.first())
        .map(|folder| folder.uri.clone())
        .or_else(|| params.root_uri.clone())?;
    root_uri.to_file_path().ok()
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let root = root_path(&params);
        {
            let mut config = self.config.write().await;
            if let Some(options) = &params.initialization_options {
                match config.merged(options) {
                    Ok(merged) => *config = merged,
                    Err(e) => log::warn!("Ignoring invalid initializationOptions: {}", e),
                }
            }
            *config = config.clone().with_default_root(root);
            log::debug!("Effective configuration: {:?}", *config);
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "compiler-bridge-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: crate::capabilities::server_capabilities(),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("Compiler bridge initialized");
        let config = self.config.read().await.clone();
        self.engine.launch(config);
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("Shutdown requested");
        self.engine.submit(JobRequest::Shutdown);
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        let version = params.text_document.version;

        log::info!("Document opened: {}", uri);

        {
            let mut documents = self.documents.write().await;
            documents.insert(
                uri.clone(),
                DocumentState {
                    text: text.clone(),
                    version,
                },
            );
        }

        self.engine
            .submit(JobRequest::DocumentChanged(DocumentSnapshot { uri, version, text }));
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Full document sync: the last change carries the whole text.
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        let text = change.text;

        log::debug!("Document changed: {} (v{})", uri, version);

        {
            let mut documents = self.documents.write().await;
            documents.insert(
                uri.clone(),
                DocumentState {
                    text: text.clone(),
                    version,
                },
            );
        }

        self.engine
            .submit(JobRequest::DocumentChanged(DocumentSnapshot { uri, version, text }));
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;

        log::info!("Document saved: {}", uri);

        let snapshot = match (params.text, self.snapshot(&uri).await) {
            (Some(text), stored) => {
                let version = stored.map(|doc| doc.version).unwrap_or_default();
                DocumentSnapshot { uri, version, text }
            }
            (None, Some(stored)) => stored,
            (None, None) => {
                log::warn!("Document not found in storage: {}", uri);
                return;
            }
        };

        self.engine.submit(JobRequest::DocumentSaved(snapshot));
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;

        log::info!("Document closed: {}", uri);

        // Project diagnostics outlive the buffer, so they are left to the compiler.
        let mut documents = self.documents.write().await;
        documents.remove(&uri);
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::info!("Configuration changed");

        let Some(section) = params.settings.get(SETTINGS_SECTION) else {
            return;
        };
        let mut config = self.config.write().await;
        match config.merged(section) {
            Ok(new_config) => {
                log::debug!("Updated configuration: {:?}", new_config);
                *config = new_config;
            }
            Err(e) => {
                log::warn!("Failed to parse configuration: {}", e);
            }
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let query = PositionQuery {
            uri: params.text_document_position_params.text_document.uri,
            position: params.text_document_position_params.position,
        };
        let outcome = self.engine.request(JobRequest::Hover(query)).await;
        Ok(protocol::decode_hover(outcome))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let query = PositionQuery {
            uri: params.text_document_position_params.text_document.uri,
            position: params.text_document_position_params.position,
        };
        let outcome = self.engine.request(JobRequest::GotoDefinition(query)).await;
        Ok(protocol::decode_definition(outcome))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        match params.command.as_str() {
            RESTART_COMMAND => {
                let config = self.config.read().await.clone();
                self.engine.restart(config);
                Ok(None)
            }
            STATUS_COMMAND => {
                let status = self.engine.status().await;
                Ok(status.and_then(|status| serde_json::to_value(status).ok()))
            }
            other => Err(Error::invalid_params(format!("Unknown command: {other}"))),
        }
    }
}
