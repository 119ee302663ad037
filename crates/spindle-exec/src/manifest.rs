//! `.nba` analysis manifests.

use serde::Deserialize;
use serde_yaml::Value;

/// Fields of an analysis manifest the node reads. Other keys are ignored
/// and left for the driver script.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnalysisManifest {
    #[serde(default)]
    pub nba_type: Option<Value>,
    #[serde(default)]
    pub recording_nwb_file: Option<Value>,
    #[serde(default)]
    pub recording_electrical_series_path: Option<Value>,
}

impl AnalysisManifest {
    /// Parse manifest text; an empty document is an empty manifest.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// The analysis type as written, for error messages.
    pub fn nba_type_text(&self) -> String {
        match &self.nba_type {
            Some(v) => scalar_text(v).unwrap_or_else(|| format!("{v:?}")),
            None => "undefined".to_string(),
        }
    }

    pub fn recording_nwb_file(&self) -> Option<String> {
        self.recording_nwb_file
            .as_ref()
            .and_then(scalar_text)
            .filter(|s| !s.is_empty())
    }

    pub fn recording_electrical_series_path(&self) -> Option<String> {
        self.recording_electrical_series_path
            .as_ref()
            .and_then(scalar_text)
            .filter(|s| !s.is_empty())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
