//! `NoteApi` over HTTP using reqwest.

use async_trait::async_trait;
use noteshare_core::api::{ApiError, NoteApi, Result};
use noteshare_core::note::{Note, SaveNoteRequest, SavedNote};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying a library entry's password.
pub const PASSWORD_HEADER: &str = "X-Note-Password";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry schedule for transient failures (429, 5xx, timeouts, network).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct HttpNoteApi {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpNoteApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn execute(&self, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response> {
        let mut attempt = 1;
        loop {
            let err = match build(&self.client).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    ApiError::from_response(status, &body)
                }
                Err(e) if e.is_timeout() => ApiError::Timeout,
                Err(e) => ApiError::Network(e.to_string()),
            };

            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                return Err(err);
            }
            let delay = self.retry.delay(attempt);
            warn!(
                "Request failed ({}), retrying in {:?} (attempt {}/{})",
                err,
                delay,
                attempt + 1,
                self.retry.max_attempts
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Like `execute`, mapping 404 to `None`.
    async fn execute_optional(
        &self,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Option<Response>> {
        match self.execute(build).await {
            Ok(response) => Ok(Some(response)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

fn with_password(request: RequestBuilder, password: Option<&str>) -> RequestBuilder {
    match password.filter(|p| !p.is_empty()) {
        Some(password) => request.header(PASSWORD_HEADER, password),
        None => request,
    }
}

#[async_trait]
impl NoteApi for HttpNoteApi {
    async fn create_note(&self, content: &str) -> Result<Note> {
        let url = self.url("/api/notes");
        let body = json!({ "content": content });
        let response = self.execute(|c| c.post(&url).json(&body)).await?;
        let note: Note = decode(response).await?;
        debug!("Created note {}", note.id);
        Ok(note)
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let url = self.url(&format!("/api/notes/{}", id));
        match self.execute_optional(|c| c.get(&url)).await? {
            Some(response) => Ok(Some(decode(response).await?)),
            None => Ok(None),
        }
    }

    async fn update_note(&self, id: &str, content: &str) -> Result<()> {
        let url = self.url(&format!("/api/notes/{}", id));
        let body = json!({ "content": content });
        self.execute(|c| c.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn check_saved_note(&self, note_id: &str) -> Result<Option<SavedNote>> {
        let url = self.url(&format!("/api/saved-notes/check/{}", note_id));
        match self.execute_optional(|c| c.get(&url)).await? {
            Some(response) => Ok(Some(decode(response).await?)),
            None => Ok(None),
        }
    }

    async fn save_note(&self, request: &SaveNoteRequest) -> Result<SavedNote> {
        let url = self.url("/api/saved-notes");
        let password = request.password.as_deref();
        let response = self
            .execute(|c| with_password(c.post(&url).json(request), password))
            .await?;
        decode(response).await
    }

    async fn list_saved_notes(&self) -> Result<Vec<SavedNote>> {
        let url = self.url("/api/saved-notes");
        let response = self.execute(|c| c.get(&url)).await?;
        decode(response).await
    }

    async fn delete_saved_note(&self, id: &str, password: Option<&str>) -> Result<()> {
        let url = self.url(&format!("/api/saved-notes/{}", id));
        self.execute(|c| with_password(c.delete(&url), password))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpNoteApi::new("http://localhost:8080/").unwrap();
        assert_eq!(api.url("/api/notes"), "http://localhost:8080/api/notes");
    }
}
