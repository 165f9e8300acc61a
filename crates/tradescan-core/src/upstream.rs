//! Shared GET path for provider adapters: cache, then rate limit, then retried transport.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::data_source::SourceError;
use crate::http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::retry::RetryConfig;
use crate::throttling::Throttle;

/// Cached, throttled and retried access to one upstream provider.
#[derive(Clone)]
pub struct Upstream {
    name: &'static str,
    http_client: Arc<dyn HttpClient>,
    cache: TtlCache<String>,
    throttle: Throttle,
    retry: RetryConfig,
    auth: HttpAuth,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("name", &self.name)
            .field("throttle", &self.throttle)
            .field("retry", &self.retry)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl Upstream {
    pub fn new(
        name: &'static str,
        http_client: Arc<dyn HttpClient>,
        cache: TtlCache<String>,
        throttle: Throttle,
    ) -> Self {
        Self {
            name,
            http_client,
            cache,
            throttle,
            retry: RetryConfig::default(),
            auth: HttpAuth::None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cache(&self) -> &TtlCache<String> {
        &self.cache
    }

    /// Body of a successful GET, served from cache when a fresh copy exists.
    pub async fn get_cached(
        &self,
        cache_key: &str,
        request: HttpRequest,
        ttl_override: Option<Duration>,
    ) -> Result<String, SourceError> {
        self.cache
            .get_or_try_insert_with(cache_key, ttl_override, || self.get(request))
            .await
    }

    /// Uncached GET. Every attempt takes its own rate-limit permit; running out of
    /// local budget ends the call without retrying.
    pub async fn get(&self, request: HttpRequest) -> Result<String, SourceError> {
        let request = request.with_auth(&self.auth);
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            self.throttle.acquire().await?;

            let outcome = match tokio::time::timeout(
                request.timeout,
                self.http_client.execute(request.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(HttpError::timeout(format!(
                    "{} request timed out after {}ms",
                    self.name,
                    request.timeout.as_millis()
                ))),
            };

            let has_attempts_left = attempt + 1 < max_attempts;
            match outcome {
                Ok(response) if response.is_success() => return Ok(response.body),
                Ok(response) => {
                    if has_attempts_left && self.retry.should_retry_status(response.status) {
                        tracing::warn!(
                            upstream = self.name,
                            status = response.status,
                            attempt = attempt + 1,
                            "retrying upstream request after error status"
                        );
                    } else {
                        return Err(self.status_error(&response));
                    }
                }
                Err(error) => {
                    if has_attempts_left && self.retry.should_retry_error(&error) {
                        tracing::warn!(
                            upstream = self.name,
                            error = error.message(),
                            attempt = attempt + 1,
                            "retrying upstream request after transport error"
                        );
                    } else {
                        return Err(self.transport_error(&error));
                    }
                }
            }

            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    fn status_error(&self, response: &HttpResponse) -> SourceError {
        match response.status {
            429 => SourceError::rate_limited(
                format!("{} upstream rate limit reached", self.name),
                response.retry_after,
            ),
            // The caller's request was valid; a rejection is the provider's failure.
            status => SourceError::unavailable(format!(
                "{} upstream returned status {status}",
                self.name
            )),
        }
    }

    fn transport_error(&self, error: &HttpError) -> SourceError {
        if error.retryable() {
            SourceError::unavailable(format!("{} transport error: {}", self.name, error.message()))
        } else {
            SourceError::internal(format!("{} transport error: {}", self.name, error.message()))
        }
    }
}
