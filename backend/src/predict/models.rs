use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// Body returned by the prediction API on creation and on every poll.
#[derive(Debug, Deserialize)]
pub struct PredictionResponse {
    pub id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
pub struct PredictionUrls {
    pub get: String,
}

/// Client-side handle for one remote invocation. Mutated only by polling
/// until the remote job reaches a terminal state.
#[derive(Debug)]
pub struct PredictionJob {
    pub id: String,
    pub deployment: String,
    pub status: JobStatus,
    pub output: Option<Value>,
    pub error: Option<Value>,
    pub poll_url: String,
    pub created_at: DateTime<Utc>,
}

impl PredictionJob {
    pub fn from_response(deployment: &str, base_url: &str, response: PredictionResponse) -> Self {
        let poll_url = response
            .urls
            .map(|urls| urls.get)
            .unwrap_or_else(|| format!("{base_url}/predictions/{}", response.id));
        Self {
            id: response.id,
            deployment: deployment.to_string(),
            status: response.status,
            output: response.output,
            error: response.error,
            poll_url,
            created_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, response: PredictionResponse) {
        self.status = response.status;
        self.output = response.output;
        self.error = response.error;
    }

    /// Diagnostic supplied by the remote side, or a status fallback.
    pub fn error_detail(&self) -> String {
        match &self.error {
            Some(Value::String(detail)) => detail.clone(),
            Some(value) => value.to_string(),
            None => format!("job ended with status {:?}", self.status),
        }
    }
}

/// Output contract of the explain deployment. `metrics` stays a raw value
/// so a missing or non-numeric probability degrades instead of failing
/// deserialization.
#[derive(Debug, Deserialize)]
pub struct ExplainOutput {
    pub heatmap: String,
    #[serde(default)]
    pub metrics: Value,
}

impl ExplainOutput {
    pub fn probability(&self) -> Option<f64> {
        self.metrics.get("probability").and_then(Value::as_f64)
    }
}

/// Inline image payload for a prediction input.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", BASE64.encode(bytes))
}
