//! Diagnostics for the compiler bridge.
//!
//! This module converts compiler-reported diagnostics into LSP diagnostics and
//! keeps the ledger of which URIs currently show markers in the editor, so
//! that stale markers are retracted once a recompilation stops reporting them.

use std::collections::HashMap;

use serde::Deserialize;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Range, Url};

/// Severity as spelled by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

impl From<CompilerSeverity> for DiagnosticSeverity {
    fn from(severity: CompilerSeverity) -> Self {
        match severity {
            CompilerSeverity::Error => DiagnosticSeverity::ERROR,
            CompilerSeverity::Warning => DiagnosticSeverity::WARNING,
            CompilerSeverity::Information => DiagnosticSeverity::INFORMATION,
            CompilerSeverity::Hint => DiagnosticSeverity::HINT,
        }
    }
}

/// One diagnostic in a compile report. Ranges are already 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompilerDiagnostic {
    pub range: Range,
    pub message: String,
    #[serde(default = "default_severity")]
    pub severity: CompilerSeverity,
}

fn default_severity() -> CompilerSeverity {
    CompilerSeverity::Error
}

/// Diagnostics for one file in a compile report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileDiagnostics {
    pub uri: Url,
    #[serde(default)]
    pub diagnostics: Vec<CompilerDiagnostic>,
}

/// Result payload of a recompile or workspace job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompileReport {
    #[serde(default)]
    pub files: Vec<FileDiagnostics>,
}

/// Convert a compiler diagnostic to an LSP `Diagnostic`.
pub fn to_lsp_diagnostic(diagnostic: &CompilerDiagnostic, source: &str) -> Diagnostic {
    Diagnostic {
        range: diagnostic.range,
        severity: Some(diagnostic.severity.into()),
        source: Some(source.to_string()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

/// One outbound `publishDiagnostics` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub uri: Url,
    pub diagnostics: Vec<Diagnostic>,
}

impl Publication {
    pub fn is_retraction(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// URIs that currently show at least one diagnostic in the editor.
///
/// Never holds an empty list: "tracked" means "currently showing markers".
#[derive(Debug, Default)]
pub struct DiagnosticsLedger {
    published: HashMap<Url, Vec<Diagnostic>>,
}

impl DiagnosticsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh diagnostic set for `uri` and return what to send.
    ///
    /// An empty set for an untracked URI sends nothing.
    pub fn publish(&mut self, uri: Url, diagnostics: Vec<Diagnostic>) -> Option<Publication> {
        if diagnostics.is_empty() {
            self.published.remove(&uri)?;
            log::debug!("Retracting diagnostics for {}", uri);
            return Some(Publication {
                uri,
                diagnostics: Vec::new(),
            });
        }

        self.published.insert(uri.clone(), diagnostics.clone());
        Some(Publication { uri, diagnostics })
    }

    /// Retract every tracked URI and empty the ledger.
    pub fn clear_all(&mut self) -> Vec<Publication> {
        let mut retractions: Vec<Publication> = self
            .published
            .drain()
            .map(|(uri, _)| Publication {
                uri,
                diagnostics: Vec::new(),
            })
            .collect();
        retractions.sort_by(|a, b| a.uri.as_str().cmp(b.uri.as_str()));
        retractions
    }

    pub fn is_tracked(&self, uri: &Url) -> bool {
        self.published.contains_key(uri)
    }

    pub fn get(&self, uri: &Url) -> Option<&[Diagnostic]> {
        self.published.get(uri).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}
