//! HTTP reminder gateway client.
//!
//! Talks to a delayed-job service over REST: POST a job with a delay,
//! get back a handle, DELETE the handle to cancel. Authentication is an
//! optional bearer token.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::ReminderGateway;
use crate::nudge::model::ReminderPayload;

/// Client for the delayed-delivery scheduler.
pub struct HttpReminderGateway {
    endpoint: String,
    api_token: Option<secrecy::SecretString>,
    request_timeout: Duration,
    client: reqwest::Client,
}

/// Request body for job registration.
#[derive(Debug, Serialize)]
struct ScheduleJobRequest<'a> {
    delay_minutes: u32,
    payload: &'a ReminderPayload,
}

/// Response body from job registration.
#[derive(Debug, Deserialize)]
struct ScheduleJobResponse {
    handle: String,
}

impl HttpReminderGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            endpoint: config.endpoint,
            api_token: config.api_token,
            request_timeout: config.request_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.endpoint)
    }

    fn job_url(&self, handle: &str) -> String {
        format!("{}/jobs/{handle}", self.endpoint)
    }

    fn map_send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout {
                timeout: self.request_timeout,
            }
        } else {
            GatewayError::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ReminderGateway for HttpReminderGateway {
    async fn schedule(
        &self,
        payload: &ReminderPayload,
        delay_minutes: u32,
    ) -> Result<String, GatewayError> {
        let body = ScheduleJobRequest {
            delay_minutes,
            payload,
        };

        let mut request = self
            .client
            .post(self.jobs_url())
            .timeout(self.request_timeout)
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| self.map_send_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Unavailable {
                reason: format!("schedule returned {status}: {err}"),
            });
        }

        let job: ScheduleJobResponse =
            resp.json().await.map_err(|e| GatewayError::InvalidResponse {
                reason: e.to_string(),
            })?;

        tracing::debug!(
            handle = %job.handle,
            delay_minutes,
            user_id = %payload.user_id,
            "Reminder job registered"
        );
        Ok(job.handle)
    }

    async fn cancel(&self, handle: &str) -> Result<(), GatewayError> {
        let mut request = self
            .client
            .delete(self.job_url(handle))
            .timeout(self.request_timeout);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| self.map_send_error(e))?;

        // A job the gateway no longer knows about is already gone.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(handle, "Reminder job already absent on cancel");
            return Ok(());
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Unavailable {
                reason: format!("cancel returned {status}: {err}"),
            });
        }

        tracing::debug!(handle, "Reminder job cancelled");
        Ok(())
    }
}
