use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// One discrete step of the fixed analysis pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Original,
    Crop,
    Heatmap,
    Result,
}

impl Stage {
    /// Progress-bar fraction (0-100) once this stage is on screen.
    pub fn progress(&self) -> u8 {
        match self {
            Stage::Original => 20,
            Stage::Crop => 45,
            Stage::Heatmap => 70,
            Stage::Result => 100,
        }
    }

    pub fn caption(&self) -> &'static str {
        match self {
            Stage::Original => "Original uploaded image",
            Stage::Crop => "Detected reaction region",
            Stage::Heatmap => "Model attention heatmap",
            Stage::Result => "Screening result",
        }
    }
}

/// Three-way classification derived from the reaction probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum TriageLabel {
    #[serde(rename = "LIKELY POSITIVE")]
    #[strum(serialize = "LIKELY POSITIVE")]
    LikelyPositive,
    #[serde(rename = "MANUAL CHECK REQUIRED")]
    #[strum(serialize = "MANUAL CHECK REQUIRED")]
    ManualCheckRequired,
    #[serde(rename = "NEGATIVE")]
    #[strum(serialize = "NEGATIVE")]
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub label: TriageLabel,
    pub advice: String,
    pub probability: f64,
}

/// Wire event consumed by the presentation client, one JSON line each.
///
/// `Result` and `Error` are mutually exclusive for a given run; a failed
/// run never carries a result card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Started {
        run_id: Uuid,
    },
    Panel {
        stage: Stage,
        caption: String,
        progress: u8,
        image_base64: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        busy: Option<String>,
    },
    Result {
        label: TriageLabel,
        advice: String,
        probability: f64,
        progress: u8,
    },
    Error {
        stage: Stage,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: Uuid,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub replaced: bool,
}
