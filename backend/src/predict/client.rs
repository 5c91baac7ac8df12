use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

use super::http::{HttpClient, NetworkError};
use super::models::{JobStatus, PredictionJob, PredictionResponse};

#[derive(Debug, thiserror::Error)]
pub enum PredictionError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("remote inference on {deployment} failed: {detail}")]
    RemoteFailed { deployment: String, detail: String },
    #[error("malformed prediction API response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("prediction on {deployment} did not reach a terminal state within {timeout:?}")]
    TimedOut {
        deployment: String,
        timeout: Duration,
    },
}

/// Synchronous-feeling facade over an asynchronous remote prediction job:
/// submit, then poll the job at a fixed interval until it is terminal.
///
/// With no overall timeout configured (the default), a hung remote job
/// blocks its run indefinitely.
#[derive(Clone)]
pub struct PredictionClient<H: HttpClient> {
    http: H,
    base_url: String,
    token: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl<H: HttpClient> PredictionClient<H> {
    pub fn new(
        http: H,
        base_url: impl Into<String>,
        token: impl Into<String>,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            poll_interval,
            timeout,
        }
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    /// Creates a prediction on the named deployment. The deployment id is a
    /// trusted external reference and is not validated locally.
    pub async fn submit(
        &self,
        deployment: &str,
        input: Value,
    ) -> Result<PredictionJob, PredictionError> {
        let url = format!("{}/deployments/{}/predictions", self.base_url, deployment);
        let body = json!({ "input": input });
        debug!("submitting prediction to {deployment}");
        let bytes = self.http.post_json(&url, &self.token, &body).await?;
        let response: PredictionResponse = serde_json::from_slice(&bytes)?;
        info!(
            "prediction {} created on {deployment} ({:?})",
            response.id, response.status
        );
        Ok(PredictionJob::from_response(
            deployment,
            &self.base_url,
            response,
        ))
    }

    /// Polls until the job is terminal. `succeeded` yields the output;
    /// `failed` and `canceled` surface the remote diagnostic.
    pub async fn await_completion(
        &self,
        mut job: PredictionJob,
    ) -> Result<Value, PredictionError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        while !job.status.is_terminal() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(PredictionError::TimedOut {
                        deployment: job.deployment,
                        timeout: self.timeout.unwrap_or_default(),
                    });
                }
            }
            sleep(self.poll_interval).await;
            let bytes = self.http.get_with_bearer(&job.poll_url, &self.token).await?;
            let response: PredictionResponse = serde_json::from_slice(&bytes)?;
            job.apply(response);
        }

        let elapsed = chrono::Utc::now() - job.created_at;
        match job.status {
            JobStatus::Succeeded => {
                debug!(
                    "prediction {} on {} succeeded after {}ms",
                    job.id,
                    job.deployment,
                    elapsed.num_milliseconds()
                );
                Ok(job.output.take().unwrap_or(Value::Null))
            }
            _ => {
                warn!(
                    "prediction {} on {} ended {:?} after {}ms",
                    job.id,
                    job.deployment,
                    job.status,
                    elapsed.num_milliseconds()
                );
                let detail = job.error_detail();
                Err(PredictionError::RemoteFailed {
                    deployment: job.deployment,
                    detail,
                })
            }
        }
    }

    /// Submit-and-wait convenience used by the pipeline stages.
    pub async fn predict(&self, deployment: &str, input: Value) -> Result<Value, PredictionError> {
        let job = self.submit(deployment, input).await?;
        self.await_completion(job).await
    }
}
