//! 2captcha client (v2 JSON API).

use super::{translate_error_code, CaptchaProvider};
use async_trait::async_trait;
use breakwater_types::{ProviderSettings, SolverError, TurnstileRequest, TurnstileResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const PROVIDER_NAME: &str = "2captcha";
pub const DEFAULT_API_URL: &str = "https://api.2captcha.com";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(120);
/// Transport budget on top of the polling deadline.
const TRANSPORT_SLACK: Duration = Duration::from_secs(10);

pub struct TwoCaptchaProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    poll_interval: Duration,
    poll_deadline: Duration,
}

impl TwoCaptchaProvider {
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
impl CaptchaProvider for TwoCaptchaProvider {
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

        let create: CreateTaskResponse = self
            .post(
                "createTask",
                &CreateTaskRequest {
                    client_key: api_key,
                    task: TurnstileTask::TurnstileTaskProxyless {
                        website_url: &request.page_url,
                        website_key: &request.site_key,
                        user_agent: Some(&request.user_agent),
                        action: request.action.as_deref(),
                        data: request.cdata.as_deref(),
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
        debug!(task_id = task_id, "2captcha task created");

        let deadline = started + self.poll_deadline;
        loop {
            // First poll only after a full interval; the provider never has
            // a result instantly.
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
                        task_id,
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
                        // Cost arrives as a numeric string.
                        let cost = result
                            .cost
                            .as_deref()
                            .and_then(|c| c.parse::<f64>().ok())
                            .unwrap_or(0.0);
                        return Ok(TurnstileResult {
                            token,
                            solve_time: started.elapsed(),
                            cost,
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
    TurnstileTaskProxyless {
        #[serde(rename = "websiteURL")]
        website_url: &'a str,
        website_key: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_agent: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<&'a str>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetTaskResultRequest<'a> {
    client_key: &'a str,
    task_id: u64,
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
    #[serde(default)]
    task_id: Option<u64>,
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
    #[serde(default)]
    cost: Option<String>,
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
