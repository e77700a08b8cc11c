//! Server-side configuration for the compiler bridge.
//!
//! Command-line flags produce the base configuration. Editors refine it through
//! `initializationOptions` and the `compilerBridge` settings section, both of
//! which are deep-merged over the current values so partial objects work.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the settings section read from the editor.
pub const SETTINGS_SECTION: &str = "compilerBridge";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// How to launch the compiler process
    #[serde(default)]
    pub compiler: CompilerSettings,
    /// `source` attached to published diagnostics (default: "compiler")
    #[serde(default = "default_diagnostics_source")]
    pub diagnostics_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerSettings {
    /// Executable name or path (default: "compiler")
    #[serde(default = "default_command")]
    pub command: String,
    /// Extra arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; the workspace root when unset
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

fn default_command() -> String {
    "compiler".to_string()
}

fn default_diagnostics_source() -> String {
    "compiler".to_string()
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            working_directory: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            compiler: CompilerSettings::default(),
            diagnostics_source: default_diagnostics_source(),
        }
    }
}

impl BridgeConfig {
    /// Overlay `overrides` onto this configuration.
    ///
    /// Accepts either the settings object itself or an object holding it under
    /// [`SETTINGS_SECTION`]. Keys absent from `overrides` keep their values.
    pub fn merged(&self, overrides: &Value) -> Result<Self, serde_json::Error> {
        let overrides = overrides.get(SETTINGS_SECTION).unwrap_or(overrides);
        let mut base = serde_json::to_value(self)?;
        merge_values(&mut base, overrides);
        serde_json::from_value(base)
    }

    /// Fill the compiler working directory from the workspace root if unset.
    pub fn with_default_root(mut self, root: Option<PathBuf>) -> Self {
        if self.compiler.working_directory.is_none() {
            self.compiler.working_directory = root;
        }
        self
    }
}

fn merge_values(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overrides) => {
            if !overrides.is_null() {
                *base = overrides.clone();
            }
        }
    }
}
