//! CapSolver client.

use super::{translate_error_code, CaptchaProvider};
use async_trait::async_trait;
use breakwater_types::{ProviderSettings, SolverError, TurnstileRequest, TurnstileResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const PROVIDER_NAME: &str = "capsolver";
pub const DEFAULT_API_URL: &str = "https://api.capsolver.com";

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(120);
const TRANSPORT_SLACK: Duration = Duration::from_secs(10);

/// CapSolver does not quote per-solve prices; this is the published
/// turnstile rate.
const COST_PER_SOLVE_USD: f64 = 0.0025;

pub struct CapSolverProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl CapSolverProvider {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, SolverError> {
        let poll_deadline = settings.timeout.unwrap_or(DEFAULT_POLL_DEADLINE);
        let client = reqwest::Client::builder()
            .timeout(poll_deadline + TRANSPORT_SLACK)
            .build()
            .map_err(|e| SolverError::Http {
                provider: PROVIDER_NAME.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            poll_interval: POLL_INTERVAL,
            poll_deadline,
        })
    }

    /// Shrink the poll cadence; integration tests use this to avoid
    /// real-time waits.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn api_key(&self) -> Result<&str, SolverError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(SolverError::NoProvidersConfigured)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, SolverError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response =
            self.client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| SolverError::Http {
                    provider: PROVIDER_NAME.to_string(),
                    message: e.to_string(),
                })?;
        response.json::<R>().await.map_err(|e| SolverError::Http {
            provider: PROVIDER_NAME.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl CaptchaProvider for CapSolverProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn solve_turnstile(
        &self,
        request: &TurnstileRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnstileResult, SolverError> {
        let api_key = self.api_key()?;
        let started = Instant::now();

        let metadata = if request.action.is_some() || request.cdata.is_some() {
            Some(TurnstileMetadata {
                action: request.action.as_deref(),
                cdata: request.cdata.as_deref(),
            })
        } else {
            None
        };

        let create: CreateTaskResponse = self
            .post(
                "createTask",
                &CreateTaskRequest {
                    client_key: api_key,
                    task: TurnstileTask::AntiTurnstileTaskProxyLess {
                        website_url: &request.page_url,
                        website_key: &request.site_key,
                        metadata,
                    },
                },
            )
            .await?;
        if create.error_id != 0 {
            return Err(translate_error_code(
                PROVIDER_NAME,
                create.error_code.as_deref().unwrap_or("UNKNOWN"),
            ));
        }
        let task_id = create.task_id.ok_or_else(|| SolverError::Http {
            provider: PROVIDER_NAME.to_string(),
            message: "createTask reply carried no taskId".to_string(),
        })?;
        debug!(task_id = %task_id, "capsolver task created");

        let deadline = started + self.poll_deadline;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SolverError::Canceled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if Instant::now() >= deadline {
                return Err(SolverError::Timeout {
                    provider: PROVIDER_NAME.to_string(),
                    deadline: self.poll_deadline,
                });
            }

            let result: TaskResultResponse = self
                .post(
                    "getTaskResult",
                    &GetTaskResultRequest {
                        client_key: api_key,
                        task_id: &task_id,
                    },
                )
                .await?;
            if result.error_id != 0 {
                return Err(translate_error_code(
                    PROVIDER_NAME,
                    result.error_code.as_deref().unwrap_or("UNKNOWN"),
                ));
            }

            match result.status.as_deref() {
                Some("ready") => {
                    let token = result
                        .solution
                        .map(|s| s.token)
                        .filter(|t| !t.is_empty());
                    if let Some(token) = token {
                        return Ok(TurnstileResult {
                            token,
                            solve_time: started.elapsed(),
                            cost: COST_PER_SOLVE_USD,
                            provider_name: PROVIDER_NAME.to_string(),
                        });
                    }
                }
                Some("failed") => {
                    return Err(SolverError::Rejected {
                        provider: PROVIDER_NAME.to_string(),
                        code: result
                            .error_code
                            .unwrap_or_else(|| "TASK_FAILED".to_string()),
                        retryable: true,
                    });
                }
                _ => {}
            }
        }
    }

    async fn balance(&self) -> Result<f64, SolverError> {
        let api_key = self.api_key()?;
        let response: BalanceResponse = self
            .post("getBalance", &BalanceRequest { client_key: api_key })
            .await?;
        if response.error_id != 0 {
            return Err(translate_error_code(
                PROVIDER_NAME,
                response.error_code.as_deref().unwrap_or("UNKNOWN"),
            ));
        }
        Ok(response.balance.unwrap_or(0.0))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest<'a> {
    client_key: &'a str,
    task: TurnstileTask<'a>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum TurnstileTask<'a> {
    #[serde(rename_all = "camelCase")]
    AntiTurnstileTaskProxyLess {
        #[serde(rename = "websiteURL")]
        website_url: &'a str,
        website_key: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<TurnstileMetadata<'a>>,
    },
}

#[derive(Serialize)]
struct TurnstileMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cdata: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetTaskResultRequest<'a> {
    client_key: &'a str,
    task_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceRequest<'a> {
    client_key: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_code: Option<String>,
    /// CapSolver task ids are strings, unlike 2captcha's numeric ones.
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    solution: Option<TurnstileSolution>,
}

#[derive(Deserialize)]
struct TurnstileSolution {
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    balance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_payload_uses_the_capsolver_shape() {
        let request = CreateTaskRequest {
            client_key: "key",
            task: TurnstileTask::AntiTurnstileTaskProxyLess {
                website_url: "https://example.com",
                website_key: "0xBBBB",
                metadata: Some(TurnstileMetadata {
                    action: Some("login"),
                    cdata: None,
                }),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"AntiTurnstileTaskProxyLess\""));
        assert!(json.contains("\"metadata\":{\"action\":\"login\"}"));
    }

    #[test]
    fn metadata_is_omitted_without_action_or_cdata() {
        let request = CreateTaskRequest {
            client_key: "key",
            task: TurnstileTask::AntiTurnstileTaskProxyLess {
                website_url: "https://example.com",
                website_key: "0xBBBB",
                metadata: None,
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("metadata"));
    }
}
