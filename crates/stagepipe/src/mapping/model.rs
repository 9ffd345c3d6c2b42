//! Seam to the external suggestion model.

use super::MappingMethod;

/// Inputs to one candidate-generation run.
#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub method: MappingMethod,
    pub source_table: String,
    pub target_table: String,
    pub tpa: String,
    /// Free-form parameters forwarded to the model unchanged.
    pub params: serde_json::Value,
}

/// A single suggested correspondence returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub source_field: String,
    pub target_column: String,
    pub confidence: f64,
}

/// The external scoring model. Implementations wrap whatever inference
/// service is deployed; the reconciler treats them as a black box that
/// returns zero or more suggestions or fails with a message.
pub trait MappingModel: Send + Sync {
    /// Field names present in the raw data for one tpa. An empty result
    /// makes the reconciler fail fast before any inference happens.
    fn source_fields(&self, source_table: &str, tpa: &str) -> Result<Vec<String>, String>;

    /// Scores candidate correspondences for the request.
    fn suggest(&self, request: &SuggestionRequest) -> Result<Vec<Suggestion>, String>;
}

/// Model stub returning canned suggestions. Test and demo use.
#[derive(Debug, Default)]
pub struct FixedModel {
    pub fields: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    /// When set, both calls fail with this message.
    pub failure: Option<String>,
}

impl FixedModel {
    pub fn with_suggestions(fields: Vec<String>, suggestions: Vec<Suggestion>) -> Self {
        Self {
            fields,
            suggestions,
            failure: None,
        }
    }
}

impl MappingModel for FixedModel {
    fn source_fields(&self, _source_table: &str, _tpa: &str) -> Result<Vec<String>, String> {
        match &self.failure {
            Some(msg) => Err(msg.clone()),
            None => Ok(self.fields.clone()),
        }
    }

    fn suggest(&self, _request: &SuggestionRequest) -> Result<Vec<Suggestion>, String> {
        match &self.failure {
            Some(msg) => Err(msg.clone()),
            None => Ok(self.suggestions.clone()),
        }
    }
}
