//! HTTP client for the hosted Assistants API.

use super::{AssistantClient, AssistantInfo, Run, ThreadMessage, ToolOutput};
use crate::config::AssistantConfig;
use crate::errors::AssistantError;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Assistants API client with secure API key handling.
pub struct OpenAiAssistantClient {
    /// Never exposed in logs or debug output.
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAssistantClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

impl OpenAiAssistantClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::NotConfigured`] without an API key and
    /// [`AssistantError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AssistantError::NotConfigured(
                    "API key missing; set assistant.api_key or STRATAFLOW_ASSISTANT__API_KEY"
                        .to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| AssistantError::transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AssistantError> {
        let response = request.send().await.map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AssistantError::Decode(e.to_string()))
    }
}

/// Maps client-side failures: everything but decoding is a transport fault.
fn map_request_error(err: reqwest::Error) -> AssistantError {
    if err.is_decode() {
        AssistantError::Decode(err.to_string())
    } else {
        AssistantError::transport(err.to_string())
    }
}

/// Rate limiting and server errors are transient, other statuses are not.
fn classify_status(status: StatusCode, body: String) -> AssistantError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        AssistantError::transport(format!("HTTP {status}: {body}"))
    } else {
        AssistantError::Api {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl AssistantClient for OpenAiAssistantClient {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let thread: IdOnly = self
            .send(self.request(Method::POST, "/threads").json(&json!({})))
            .await?;
        debug!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        let _: IdOnly = self
            .send(
                self.request(Method::POST, &format!("/threads/{thread_id}/messages"))
                    .json(&json!({"role": "user", "content": content})),
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, AssistantError> {
        self.send(
            self.request(Method::POST, &format!("/threads/{thread_id}/runs"))
                .json(&json!({"assistant_id": assistant_id})),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        self.send(self.request(Method::GET, &format!("/threads/{thread_id}/runs/{run_id}")))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run, AssistantError> {
        self.send(
            self.request(
                Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            )
            .json(&json!({"tool_outputs": outputs})),
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, AssistantError> {
        let list: ListResponse<ThreadMessage> = self
            .send(
                self.request(Method::GET, &format!("/threads/{thread_id}/messages"))
                    .query(&[("order", "asc"), ("limit", "100")]),
            )
            .await?;
        Ok(list.data)
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<AssistantInfo, AssistantError> {
        self.send(self.request(Method::GET, &format!("/assistants/{assistant_id}")))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = OpenAiAssistantClient::new(&AssistantConfig::default()).unwrap_err();
        assert!(matches!(err, AssistantError::NotConfigured(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = AssistantConfig {
            api_key: Some("sk-test-123".to_string()),
            api_base: "https://example.invalid/v1/".to_string(),
            ..AssistantConfig::default()
        };
        let client = OpenAiAssistantClient::new(&config).unwrap();
        let debug = format!("{client:?}");

        assert!(!debug.contains("sk-test-123"));
        assert!(debug.contains("https://example.invalid/v1\""));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, String::new()).is_transient());

        let err = classify_status(StatusCode::NOT_FOUND, "no such run".to_string());
        assert_eq!(
            err,
            AssistantError::Api {
                status: 404,
                message: "no such run".to_string()
            }
        );
        assert!(!err.is_transient());
    }
}
