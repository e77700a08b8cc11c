//! Server capability declarations for the compiler bridge.
//!
//! This module returns the `ServerCapabilities` struct that tells the client
//! which LSP features this server supports.

use tower_lsp::lsp_types::*;

/// Terminate the compiler and start a fresh one.
pub const RESTART_COMMAND: &str = "compilerBridge.restart";

/// Report engine state, queue length and tracked diagnostics.
pub const STATUS_COMMAND: &str = "compilerBridge.status";

/// Returns the server capabilities to be sent during initialization.
///
/// Currently declares:
/// - Text document sync (open/change/close, save with text)
/// - Hover
/// - Go to definition
/// - The restart and status commands
pub fn server_capabilities() -> ServerCapabilities {
    ServerCapabilities {
        // Full document sync - receive entire document on each change
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::FULL),
                save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                    include_text: Some(true),
                })),
                ..Default::default()
            },
        )),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        definition_provider: Some(OneOf::Left(true)),
        execute_command_provider: Some(ExecuteCommandOptions {
            commands: vec![RESTART_COMMAND.to_string(), STATUS_COMMAND.to_string()],
            ..Default::default()
        }),
        ..Default::default()
    }
}
