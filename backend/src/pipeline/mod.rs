//! The fixed four-stage analysis sequence: original, crop, heatmap, result.
//!
//! Forward-only state machine with an absorbing failure state. A run never
//! produces a partial result: any stage failure emits a `Failed` event and
//! aborts before a `ResultReady` can be observed.

pub mod triage;

use image::DynamicImage;
use log::{error, info, warn};
use serde_json::{Value, json};
use shared::{Stage, TriageResult};
use uuid::Uuid;

use crate::codec::{self, CodecError, FetchError};
use crate::predict::client::{PredictionClient, PredictionError};
use crate::predict::http::HttpClient;
use crate::predict::models::{ExplainOutput, data_uri};
use crate::session::UploadedImage;

/// Progress signal produced while a run advances. Delivered synchronously,
/// in emission order; the observer renders each before the next is emitted.
#[derive(Debug, Clone)]
pub enum StageEvent {
    Started { run_id: Uuid },
    StageCompleted { stage: Stage, image: DynamicImage },
    ResultReady(TriageResult),
    Failed { stage: Stage, message: String },
}

pub trait StageObserver {
    fn on_event(&mut self, event: StageEvent);
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("unexpected {stage} output: {detail}")]
    MalformedOutput { stage: Stage, detail: String },
}

pub struct ReactionPipeline<H: HttpClient> {
    client: PredictionClient<H>,
    crop_deployment: String,
    explain_deployment: String,
}

impl<H: HttpClient> ReactionPipeline<H> {
    pub fn new(
        client: PredictionClient<H>,
        crop_deployment: impl Into<String>,
        explain_deployment: impl Into<String>,
    ) -> Self {
        Self {
            client,
            crop_deployment: crop_deployment.into(),
            explain_deployment: explain_deployment.into(),
        }
    }

    /// Runs the full sequence for one image snapshot. Emits `Started`, one
    /// `StageCompleted` per stage, then exactly one of `ResultReady` or
    /// `Failed`. Stage N+1 never starts before stage N's remote job is
    /// terminal.
    pub async fn run(
        &self,
        image: &UploadedImage,
        observer: &mut dyn StageObserver,
    ) -> Result<TriageResult, PipelineError> {
        let run_id = Uuid::new_v4();
        info!("run {run_id}: analyzing {}", image.file_name);
        observer.on_event(StageEvent::Started { run_id });
        observer.on_event(StageEvent::StageCompleted {
            stage: Stage::Original,
            image: image.pixels.clone(),
        });

        // Crop stage: original bytes in, region URL out.
        let input = json!({ "image": data_uri(&image.mime_type, &image.raw) });
        let crop_output = self
            .client
            .predict(&self.crop_deployment, input)
            .await
            .map_err(|e| self.fail(observer, Stage::Crop, e.into()))?;
        let crop_url = image_reference(Stage::Crop, &crop_output)
            .map_err(|e| self.fail(observer, Stage::Crop, e))?;
        let cropped = codec::fetch_and_decode(self.client.http(), &crop_url)
            .await
            .map_err(|e| self.fail(observer, Stage::Crop, e.into()))?;
        observer.on_event(StageEvent::StageCompleted {
            stage: Stage::Crop,
            image: cropped.clone(),
        });

        // Explain stage: PNG re-encoding of the crop in, heatmap + metrics out.
        let png = codec::encode_png(&cropped)
            .map_err(|e| self.fail(observer, Stage::Heatmap, e.into()))?;
        let input = json!({ "image": data_uri("image/png", &png) });
        let explain_output = self
            .client
            .predict(&self.explain_deployment, input)
            .await
            .map_err(|e| self.fail(observer, Stage::Heatmap, e.into()))?;
        let explain: ExplainOutput = serde_json::from_value(explain_output).map_err(|e| {
            self.fail(
                observer,
                Stage::Heatmap,
                PipelineError::MalformedOutput {
                    stage: Stage::Heatmap,
                    detail: e.to_string(),
                },
            )
        })?;
        let heatmap = codec::fetch_and_decode(self.client.http(), &explain.heatmap)
            .await
            .map_err(|e| self.fail(observer, Stage::Heatmap, e.into()))?;
        observer.on_event(StageEvent::StageCompleted {
            stage: Stage::Heatmap,
            image: heatmap,
        });

        // Result stage: a missing or non-numeric probability coerces to 0,
        // which triages NEGATIVE. Logged rather than silent.
        let probability = explain.probability().unwrap_or_else(|| {
            warn!("run {run_id}: explain metrics carry no numeric probability, defaulting to 0");
            0.0
        });
        let result = triage::classify(probability);
        info!("run {run_id}: {} (p = {probability:.4})", result.label);
        observer.on_event(StageEvent::ResultReady(result.clone()));
        Ok(result)
    }

    fn fail(
        &self,
        observer: &mut dyn StageObserver,
        stage: Stage,
        err: PipelineError,
    ) -> PipelineError {
        error!("analysis failed during {stage} stage: {err}");
        observer.on_event(StageEvent::Failed {
            stage,
            message: err.to_string(),
        });
        err
    }
}

/// Crop deployments return either a bare URL string or a single-element
/// list of URLs.
fn image_reference(stage: Stage, output: &Value) -> Result<String, PipelineError> {
    let url = match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    url.ok_or_else(|| PipelineError::MalformedOutput {
        stage,
        detail: format!("expected an image URL, got {output}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::http::NetworkError;
    use crate::predict::http::tests::MockHttp;
    use image::{Rgb, RgbImage};
    use shared::TriageLabel;
    use std::time::Duration;

    const BASE: &str = "https://api.test/v1";
    const CROP_CREATE: &str = "https://api.test/v1/deployments/acct/cropmodel/predictions";
    const EXPLAIN_CREATE: &str = "https://api.test/v1/deployments/acct/explainmodel/predictions";
    const CROP_URL: &str = "https://img.test/crop.png";
    const HEATMAP_URL: &str = "https://img.test/heatmap.png";

    fn test_png() -> Vec<u8> {
        let pixels = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([120, 80, 60])));
        codec::encode_png(&pixels).unwrap()
    }

    fn test_image() -> UploadedImage {
        UploadedImage::from_upload("reaction.png".into(), "image/png".into(), test_png()).unwrap()
    }

    fn pipeline(http: MockHttp) -> ReactionPipeline<MockHttp> {
        let client = PredictionClient::new(
            http,
            BASE,
            "test-token",
            Duration::from_millis(1),
            None,
        );
        ReactionPipeline::new(client, "acct/cropmodel", "acct/explainmodel")
    }

    fn enqueue_crop_success(http: &MockHttp) {
        http.enqueue(
            CROP_CREATE,
            Ok(format!(r#"{{"id":"c1","status":"succeeded","output":"{CROP_URL}"}}"#).into_bytes()),
        );
        http.enqueue(CROP_URL, Ok(test_png()));
    }

    fn enqueue_explain_success(http: &MockHttp, metrics: &str) {
        http.enqueue(
            EXPLAIN_CREATE,
            Ok(format!(
                r#"{{"id":"e1","status":"succeeded","output":{{"heatmap":"{HEATMAP_URL}","metrics":{metrics}}}}}"#
            )
            .into_bytes()),
        );
        http.enqueue(HEATMAP_URL, Ok(test_png()));
    }

    #[derive(Default)]
    struct Recording {
        events: Vec<StageEvent>,
    }

    impl StageObserver for Recording {
        fn on_event(&mut self, event: StageEvent) {
            self.events.push(event);
        }
    }

    fn completed_stages(events: &[StageEvent]) -> Vec<Stage> {
        events
            .iter()
            .filter_map(|event| match event {
                StageEvent::StageCompleted { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn full_run_reports_positive_result() {
        let http = MockHttp::new();
        enqueue_crop_success(&http);
        enqueue_explain_success(&http, r#"{"probability":0.72}"#);

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let result = pipeline.run(&test_image(), &mut observer).await.unwrap();

        assert_eq!(result.label, TriageLabel::LikelyPositive);
        assert_eq!(result.probability, 0.72);

        assert!(matches!(observer.events[0], StageEvent::Started { .. }));
        assert_eq!(
            completed_stages(&observer.events),
            vec![Stage::Original, Stage::Crop, Stage::Heatmap]
        );
        match observer.events.last() {
            Some(StageEvent::ResultReady(last)) => assert_eq!(*last, result),
            other => panic!("expected ResultReady last, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_probability_defaults_to_negative() {
        let http = MockHttp::new();
        enqueue_crop_success(&http);
        enqueue_explain_success(&http, "{}");

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let result = pipeline.run(&test_image(), &mut observer).await.unwrap();

        assert_eq!(result.label, TriageLabel::Negative);
        assert_eq!(result.probability, 0.0);
    }

    #[tokio::test]
    async fn non_numeric_probability_defaults_to_negative() {
        let http = MockHttp::new();
        enqueue_crop_success(&http);
        enqueue_explain_success(&http, r#"{"probability":"high"}"#);

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let result = pipeline.run(&test_image(), &mut observer).await.unwrap();
        assert_eq!(result.label, TriageLabel::Negative);
    }

    #[tokio::test]
    async fn crop_fetch_failure_aborts_without_result() {
        let http = MockHttp::new();
        http.enqueue(
            CROP_CREATE,
            Ok(format!(r#"{{"id":"c1","status":"succeeded","output":"{CROP_URL}"}}"#).into_bytes()),
        );
        http.enqueue(
            CROP_URL,
            Err(NetworkError::Status {
                status: 500,
                url: CROP_URL.into(),
            }),
        );

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let err = pipeline.run(&test_image(), &mut observer).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)));

        assert_eq!(completed_stages(&observer.events), vec![Stage::Original]);
        assert!(
            !observer
                .events
                .iter()
                .any(|event| matches!(event, StageEvent::ResultReady(_)))
        );
        match observer.events.last() {
            Some(StageEvent::Failed { stage, .. }) => assert_eq!(*stage, Stage::Crop),
            other => panic!("expected Failed last, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn explain_is_never_invoked_before_crop_completes() {
        let http = MockHttp::new();
        http.enqueue(
            CROP_CREATE,
            Ok(br#"{"id":"c1","status":"failed","error":"no reaction region found"}"#.to_vec()),
        );

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let err = pipeline.run(&test_image(), &mut observer).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Prediction(PredictionError::RemoteFailed { .. })
        ));

        let log = pipeline.client.http().request_log();
        assert_eq!(log, vec![format!("POST {CROP_CREATE}")]);
    }

    #[tokio::test]
    async fn malformed_crop_output_is_rejected() {
        let http = MockHttp::new();
        http.enqueue(
            CROP_CREATE,
            Ok(br#"{"id":"c1","status":"succeeded","output":{"weird":true}}"#.to_vec()),
        );

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let err = pipeline.run(&test_image(), &mut observer).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn crop_output_may_be_a_single_element_list() {
        let http = MockHttp::new();
        http.enqueue(
            CROP_CREATE,
            Ok(
                format!(r#"{{"id":"c1","status":"succeeded","output":["{CROP_URL}"]}}"#)
                    .into_bytes(),
            ),
        );
        http.enqueue(CROP_URL, Ok(test_png()));
        enqueue_explain_success(&http, r#"{"probability":0.5}"#);

        let pipeline = pipeline(http);
        let mut observer = Recording::default();
        let result = pipeline.run(&test_image(), &mut observer).await.unwrap();
        assert_eq!(result.label, TriageLabel::ManualCheckRequired);
    }

    #[tokio::test]
    async fn consecutive_runs_are_independent() {
        let http = MockHttp::new();
        enqueue_crop_success(&http);
        enqueue_explain_success(&http, r#"{"probability":0.72}"#);
        enqueue_crop_success(&http);
        enqueue_explain_success(&http, r#"{"probability":0.10}"#);

        let pipeline = pipeline(http);

        let mut first = Recording::default();
        let first_result = pipeline.run(&test_image(), &mut first).await.unwrap();
        let mut second = Recording::default();
        let second_result = pipeline.run(&test_image(), &mut second).await.unwrap();

        assert_eq!(first_result.label, TriageLabel::LikelyPositive);
        assert_eq!(second_result.label, TriageLabel::Negative);
        assert_eq!(
            completed_stages(&first.events),
            completed_stages(&second.events)
        );
        assert_eq!(first.events.len(), second.events.len());
    }
}
