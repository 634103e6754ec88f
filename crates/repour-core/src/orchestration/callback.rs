use std::sync::Arc;
use std::time::Duration;

use crate::config::CallbackConfig;
use crate::models::{CallbackDestination, CoreError, CoreErrorKind, OutcomeRecord, TaskId};

/// Blocking delivery of one serialized payload. Any error is retried.
pub trait CallbackTransport: Send + Sync {
    fn send(&self, destination: &CallbackDestination, body: &str) -> Result<(), CoreError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(request_timeout).build(),
        }
    }
}

impl CallbackTransport for UreqTransport {
    fn send(&self, destination: &CallbackDestination, body: &str) -> Result<(), CoreError> {
        let mut request = self
            .agent
            .request(destination.method.as_str(), &destination.url)
            .set("Content-Type", "application/json");
        for (key, value) in &destination.headers {
            request = request.set(key, value);
        }

        match request.send_string(body) {
            Ok(response) if (200..300).contains(&response.status()) => Ok(()),
            Ok(response) => Err(delivery_error(format!(
                "callback '{}' answered with status {}",
                destination.url,
                response.status()
            ))),
            Err(ureq::Error::Status(code, _)) => Err(delivery_error(format!(
                "callback '{}' answered with status {code}",
                destination.url
            ))),
            Err(ureq::Error::Transport(transport)) => Err(delivery_error(format!(
                "callback '{}' unreachable: {transport}",
                destination.url
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CallbackConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CallbackConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeliveryResult {
    pub task_id: TaskId,
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<CoreError>,
}

#[derive(Clone)]
pub struct CallbackDispatcher {
    transport: Arc<dyn CallbackTransport>,
    policy: RetryPolicy,
}

impl CallbackDispatcher {
    pub fn new(transport: Arc<dyn CallbackTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn from_config(config: &CallbackConfig) -> Self {
        Self::new(
            Arc::new(UreqTransport::new(Duration::from_millis(
                config.request_timeout_ms,
            ))),
            RetryPolicy::from_config(config),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Delivers the outcome with bounded retries. Failure is reported and
    /// logged, never propagated: the task's terminal state is already final.
    pub async fn deliver(
        &self,
        destination: &CallbackDestination,
        outcome: &OutcomeRecord,
    ) -> DeliveryResult {
        let task_id = outcome.task_id().clone();

        let body = match serde_json::to_string(&outcome.to_payload()) {
            Ok(body) => Arc::new(body),
            Err(error) => {
                let error = CoreError::new(
                    CoreErrorKind::Internal,
                    format!("failed to serialize callback payload: {error}"),
                )
                .for_task(&task_id);
                tracing::error!(task_id = %task_id, error = %error, "callback payload not serializable");
                return DeliveryResult {
                    task_id,
                    delivered: false,
                    attempts: 0,
                    last_error: Some(error),
                };
            }
        };

        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            let transport = self.transport.clone();
            let target = destination.clone();
            let payload = body.clone();
            let sent = tokio::task::spawn_blocking(move || transport.send(&target, &payload))
                .await
                .unwrap_or_else(|join_error| {
                    Err(CoreError::new(
                        CoreErrorKind::Internal,
                        format!("callback delivery join failure: {join_error}"),
                    ))
                });

            match sent {
                Ok(()) => {
                    tracing::info!(
                        task_id = %task_id,
                        url = %destination.url,
                        status = ?outcome.state(),
                        attempt,
                        "callback delivered"
                    );
                    return DeliveryResult {
                        task_id,
                        delivered: true,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Err(error) => {
                    let error = error.for_task(&task_id);
                    tracing::warn!(
                        task_id = %task_id,
                        url = %destination.url,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %error,
                        "callback delivery attempt failed"
                    );
                    last_error = Some(error);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        tracing::error!(
            task_id = %task_id,
            url = %destination.url,
            attempts = self.policy.max_attempts,
            "giving up on callback delivery"
        );
        DeliveryResult {
            task_id,
            delivered: false,
            attempts: self.policy.max_attempts,
            last_error,
        }
    }
}

fn delivery_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::Delivery, message)
}
