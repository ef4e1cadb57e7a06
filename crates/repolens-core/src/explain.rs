//! Typed shapes of model output, and the validate-or-degrade parser.
//!
//! Model responses are untrusted input. [`parse_or_degrade`] extracts the
//! first JSON object, deserializes it into the expected shape (every
//! required field present and correctly typed), and otherwise falls back
//! to a degraded record built from the raw text. Malformed output never
//! escapes as an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::LensError;
use crate::json::json_object_candidates;
use crate::models::{KeyFunction, Layer};

/// Result of one structured request, flagged when the fallback was used.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explained<T> {
    pub value: T,
    /// `true` when the response could not be parsed and `value` is the
    /// raw-text fallback.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileExplanation {
    pub purpose: String,
    pub layer: String,
    pub summary: String,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub key_functions: Vec<KeyFunction>,
}

impl FileExplanation {
    pub fn fallback(raw: &str) -> Self {
        let text = raw.trim().to_string();
        Self {
            purpose: text.clone(),
            summary: text,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolExplanation {
    pub name: String,
    pub kind: String,
    pub purpose: String,
    #[serde(default)]
    pub parameters: Option<Vec<ParameterInfo>>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub side_effects: Option<Vec<String>>,
}

impl SymbolExplanation {
    /// Fallback keeps the identity the caller asked about.
    pub fn fallback(raw: &str, name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            purpose: raw.trim().to_string(),
            ..Default::default()
        }
    }
}

/// Whole-repository analysis as returned by the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryOverview {
    pub summary: String,
    pub architecture: String,
    pub patterns: Vec<String>,
    pub frameworks: Vec<String>,
    pub build_system: String,
    pub entry_points: Vec<String>,
    pub layers: Vec<Layer>,
}

impl RepositoryOverview {
    pub fn fallback(raw: &str) -> Self {
        Self {
            summary: raw.trim().to_string(),
            ..Default::default()
        }
    }
}

/// Deserialize the first JSON object in `raw`.
///
/// Balanced regions that are not JSON objects (`{placeholder}` in prose)
/// are skipped. The first real object must then match `T`.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, LensError> {
    let object = json_object_candidates(raw)
        .find_map(|candidate| match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) if value.is_object() => Some(value),
            _ => None,
        })
        .ok_or_else(|| {
            LensError::MalformedUpstreamOutput("no JSON object in response".to_string())
        })?;
    serde_json::from_value(object).map_err(|e| LensError::MalformedUpstreamOutput(e.to_string()))
}

/// Parse `raw` into `T`, or build the degraded record with `fallback`.
pub fn parse_or_degrade<T, F>(raw: &str, fallback: F) -> Explained<T>
where
    T: DeserializeOwned,
    F: FnOnce(&str) -> T,
{
    match parse_structured(raw) {
        Ok(value) => Explained {
            value,
            degraded: false,
        },
        Err(err) => {
            tracing::warn!(error = %err, "degrading unparsable model output");
            Explained {
                value: fallback(raw),
                degraded: true,
            }
        }
    }
}
