use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::mastery::types::{SkillId, StudentId};

const MAX_RETRIES: usize = 2;
const BASE_BACKOFF_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum CfError {
    #[error("CF estimator not configured: {0}")]
    NotConfigured(&'static str),
    #[error("no CF estimate for student {student} skill {skill}")]
    NoEstimate { student: String, skill: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("CF estimate timed out after {0:?}")]
    Timeout(Duration),
    #[error("CF estimate {0} is not a finite number")]
    OutOfDomain(f64),
}

/// Collaborative-filtering baseline: a population-level mastery prior for
/// pairs without direct evidence. Trained and served elsewhere.
#[async_trait]
pub trait CfEstimator: Send + Sync {
    async fn estimate(&self, student: &StudentId, skill: &SkillId) -> Result<f64, CfError>;
}

/// Non-finite values are errors, finite ones are clipped to `[0, 1]`.
pub fn normalize_estimate(value: f64) -> Result<f64, CfError> {
    if !value.is_finite() {
        return Err(CfError::OutOfDomain(value));
    }
    Ok(value.clamp(0.0, 1.0))
}

#[derive(Debug, Clone)]
pub struct CfClientConfig {
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    estimate: f64,
}

/// HTTP client for a CF model served at
/// `GET {endpoint}/students/{student}/skills/{skill}/estimate`.
///
/// `config.timeout` is the budget for one estimate including retries; each
/// request gets an equal share of what the backoff sleeps leave over.
#[derive(Clone)]
pub struct HttpCfClient {
    config: CfClientConfig,
    client: reqwest::Client,
    attempt_timeout: Duration,
}

impl HttpCfClient {
    pub fn new(config: CfClientConfig) -> Self {
        let attempt_timeout = attempt_timeout(config.timeout);
        let client = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            attempt_timeout,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    fn url(&self, student: &StudentId, skill: &SkillId) -> String {
        format!(
            "{}/students/{}/skills/{}/estimate",
            self.config.endpoint.trim_end_matches('/'),
            urlencoding::encode(student.as_str()),
            urlencoding::encode(skill.as_str()),
        )
    }
}

#[async_trait]
impl CfEstimator for HttpCfClient {
    async fn estimate(&self, student: &StudentId, skill: &SkillId) -> Result<f64, CfError> {
        let url = self.url(student, skill);
        let mut last_error = None;

        for retry in 0..=MAX_RETRIES {
            let err = match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body = resp.json::<EstimateResponse>().await?;
                        return normalize_estimate(body.estimate);
                    }
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(CfError::NoEstimate {
                            student: student.to_string(),
                            skill: skill.to_string(),
                        });
                    }
                    let body = resp.text().await.unwrap_or_default();
                    let err = CfError::HttpStatus { status, body };
                    if !is_retryable(status) {
                        return Err(err);
                    }
                    err
                }
                Err(e) => CfError::Request(e),
            };

            if retry < MAX_RETRIES {
                let backoff = backoff(retry);
                warn!(retry, %student, %skill, error = %err, "CF estimate failed, retrying");
                sleep(backoff).await;
            }
            last_error = Some(err);
        }

        Err(last_error.unwrap_or(CfError::NotConfigured("unknown")))
    }
}

/// Fixed estimates held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticCfTable {
    estimates: HashMap<(StudentId, SkillId), f64>,
}

impl StaticCfTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, student: impl Into<StudentId>, skill: impl Into<SkillId>, value: f64) -> Self {
        self.insert(student.into(), skill.into(), value);
        self
    }

    pub fn insert(&mut self, student: StudentId, skill: SkillId, value: f64) {
        self.estimates.insert((student, skill), value);
    }
}

#[async_trait]
impl CfEstimator for StaticCfTable {
    async fn estimate(&self, student: &StudentId, skill: &SkillId) -> Result<f64, CfError> {
        let value = self
            .estimates
            .get(&(student.clone(), skill.clone()))
            .copied()
            .ok_or_else(|| CfError::NoEstimate {
                student: student.to_string(),
                skill: skill.to_string(),
            })?;
        normalize_estimate(value)
    }
}

/// Used when no CF service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCf;

#[async_trait]
impl CfEstimator for UnavailableCf {
    async fn estimate(&self, _student: &StudentId, _skill: &SkillId) -> Result<f64, CfError> {
        Err(CfError::NotConfigured("CF_ENDPOINT"))
    }
}

fn backoff(retry: usize) -> Duration {
    Duration::from_millis(BASE_BACKOFF_MS << retry)
}

fn attempt_timeout(budget: Duration) -> Duration {
    let attempts = MAX_RETRIES as u32 + 1;
    let sleeps: Duration = (0..MAX_RETRIES).map(backoff).sum();
    match budget.checked_sub(sleeps) {
        Some(left) if !left.is_zero() => left / attempts,
        _ => budget / attempts,
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}
