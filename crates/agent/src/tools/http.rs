use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::warn;

use navigator_core::domain::tool::{ToolInvocation, ToolName};

use super::{Tool, ToolCallError};

/// A collaborator reached over HTTP at `{base_url}/{tool_name}`.
#[derive(Clone, Debug)]
pub struct HttpTool {
    client: Client,
    endpoint: String,
    name: ToolName,
}

impl HttpTool {
    pub fn new(base_url: &str, name: ToolName) -> Self {
        Self::with_client(Client::new(), base_url, name)
    }

    pub fn with_client(client: Client, base_url: &str, name: ToolName) -> Self {
        let endpoint = format!("{}/{}", base_url.trim_end_matches('/'), name.as_str());
        Self { client, endpoint, name }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> ToolName {
        self.name
    }

    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
        let body = json!({
            "invocation_id": invocation.id.0,
            "idempotency_key": invocation.idempotency_key.as_ref().map(|key| key.0.clone()),
            "arguments": invocation.arguments,
        });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &invocation.idempotency_key {
            request = request.header("Idempotency-Key", key.0.as_str());
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status();
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            warn!(
                event_name = "tool.http.server_error",
                tool = %self.name,
                status = %status,
                "collaborator returned a server error"
            );
            return Err(ToolCallError::Server { status: status.as_u16(), message });
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(ToolCallError::Rejected(format!("{status}: {message}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| ToolCallError::Dropped(format!("unreadable response body: {error}")))?;
        if status == StatusCode::MULTI_STATUS {
            return Err(ToolCallError::Partial(payload));
        }
        Ok(payload)
    }
}

fn map_send_error(error: reqwest::Error) -> ToolCallError {
    if error.is_timeout() {
        ToolCallError::Timeout
    } else if error.is_connect() {
        ToolCallError::ConnectFailed(error.to_string())
    } else {
        ToolCallError::Dropped(error.to_string())
    }
}
