//! Retry logic with exponential backoff and jitter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::classifier::{ErrorClassifier, FetchFailure};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::throttling::RequestThrottle;

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Calculate the delay for a given retry attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.min(i32::MAX as u32) as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// HTTP client that retries classified-retryable failures with backoff.
///
/// Backoff sleeps suspend only the calling task.
#[derive(Clone)]
pub struct RetryingHttpClient {
    inner: Arc<dyn HttpClient>,
    classifier: ErrorClassifier,
    config: RetryConfig,
    throttle: Option<RequestThrottle>,
    label: String,
}

impl RetryingHttpClient {
    pub fn new(
        inner: Arc<dyn HttpClient>,
        classifier: ErrorClassifier,
        config: RetryConfig,
    ) -> Self {
        Self {
            inner,
            classifier,
            config,
            throttle: None,
            label: String::from("http"),
        }
    }

    pub fn with_throttle(mut self, throttle: RequestThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Name attached to log events (usually the provider id).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Executes `request`, retrying while failures classify as retryable and the
    /// attempt budget lasts.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, FetchFailure> {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if let Some(throttle) = &self.throttle {
                throttle.until_ready().await;
            }

            debug!(
                provider = %self.label,
                attempt,
                url = %request.redacted_url(),
                "sending request"
            );

            let failure = match self.inner.execute(request.clone()).await {
                Ok(response) => match self.classifier.failure_of(&response) {
                    None => return Ok(response),
                    Some(failure) => failure,
                },
                Err(error) => FetchFailure::from_transport(&error),
            };

            let retryable = self.classifier.is_retryable(&failure);
            if !retryable || attempt >= max_attempts {
                warn!(
                    provider = %self.label,
                    attempt,
                    status = ?failure.status,
                    provider_code = ?failure.provider_code(),
                    retryable,
                    error = %failure.message,
                    "request failed; giving up"
                );
                return Err(failure.with_attempts(attempt));
            }

            let delay = self.config.delay_for_attempt(attempt - 1);
            warn!(
                provider = %self.label,
                attempt,
                status = ?failure.status,
                provider_code = ?failure.provider_code(),
                retryable,
                delay_ms = delay.as_millis() as u64,
                "request failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
