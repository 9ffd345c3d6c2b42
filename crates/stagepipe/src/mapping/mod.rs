//! Field mapping reconciliation: candidate generation, duplicate detection,
//! and the approval workflow.

pub mod duplicates;
pub mod model;
pub mod reconciler;

pub use model::{FixedModel, MappingModel, Suggestion, SuggestionRequest};
pub use reconciler::{BulkMappingReport, GenerateParams, GenerateReport, MappingReconciler};

use serde::Serialize;

/// How a mapping came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingMethod {
    Manual,
    MlAuto,
    LlmCortex,
    System,
}

impl MappingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingMethod::Manual => "MANUAL",
            MappingMethod::MlAuto => "ML_AUTO",
            MappingMethod::LlmCortex => "LLM_CORTEX",
            MappingMethod::System => "SYSTEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MANUAL" => Some(MappingMethod::Manual),
            "ML_AUTO" => Some(MappingMethod::MlAuto),
            "LLM_CORTEX" => Some(MappingMethod::LlmCortex),
            "SYSTEM" => Some(MappingMethod::System),
            _ => None,
        }
    }

    /// Only model-generated mappings carry a confidence score.
    pub fn is_generated(&self) -> bool {
        matches!(self, MappingMethod::MlAuto | MappingMethod::LlmCortex)
    }
}

impl std::fmt::Display for MappingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed or approved field correspondence.
///
/// The `duplicate` flag is derived on every read from the currently active
/// mapping set, never stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub mapping_id: i64,
    pub source_table: String,
    pub source_field: String,
    pub target_table: String,
    pub target_column: String,
    pub tpa: String,
    pub method: MappingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transformation_logic: Option<String>,
    pub duplicate: bool,
}
