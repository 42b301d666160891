use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use navigator_core::config::LlmConfig;
use navigator_core::domain::agent::AgentId;

/// Optional language model behind the keyword classifier. It only ever
/// labels text; it never drafts user-facing replies.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct HttpLlmClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            max_retries: 0,
        }
    }

    /// `None` when the classifier is disabled or has no endpoint.
    pub fn from_config(config: &LlmConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let endpoint = config.endpoint.as_ref()?;
        let mut client = Self::new(endpoint.clone(), config.model.clone());
        client.api_key = config.api_key.clone();
        client.max_retries = config.max_retries;
        Some(client)
    }

    async fn attempt(&self, prompt: &str) -> Result<String> {
        let body = json!({ "model": self.model, "prompt": prompt });
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("language model request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("language model returned status {}", response.status()));
        }

        let payload: Value =
            response.json().await.context("language model returned an unreadable body")?;
        ["text", "completion", "output"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("language model response had no text field"))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.attempt(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.retry",
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "retrying language model request"
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn classification_prompt(text: &str) -> String {
    let labels = AgentId::ALL.iter().map(AgentId::as_str).collect::<Vec<_>>().join(", ");
    format!(
        "Classify the user's treatment-navigation request into exactly one label from \
         [{labels}]. Answer with the label only.\nRequest: {text}"
    )
}

/// Asks the model for a specialist label. Any error, timeout or unknown label
/// yields `None` so the caller falls back to its own reply.
pub async fn classify_need(llm: &dyn LlmClient, text: &str, timeout: Duration) -> Option<AgentId> {
    let prompt = classification_prompt(text);
    let answer = match tokio::time::timeout(timeout, llm.complete(&prompt)).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(error)) => {
            warn!(event_name = "llm.classify.failed", error = %error, "classifier call failed");
            return None;
        }
        Err(_) => {
            warn!(event_name = "llm.classify.timeout", timeout_ms = timeout.as_millis() as u64);
            return None;
        }
    };

    let label = answer.trim().trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_');
    let agent = AgentId::parse(label).filter(|agent| *agent != AgentId::Triage);
    debug!(event_name = "llm.classify.completed", label, matched = agent.is_some());
    agent
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use navigator_core::domain::agent::AgentId;

    use super::{classify_need, LlmClient};

    struct FixedClient(&'static str);

    #[async_trait]
    impl LlmClient for FixedClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(anyhow!("unavailable"))
        }
    }

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("scheduler".to_string())
        }
    }

    #[tokio::test]
    async fn known_labels_map_to_specialists() {
        let client = FixedClient(" Insurance_Verification.\n");
        let agent = classify_need(&client, "text", Duration::from_secs(1)).await;
        assert_eq!(agent, Some(AgentId::InsuranceVerification));
    }

    #[tokio::test]
    async fn failures_and_unknown_labels_fall_back() {
        let timeout = Duration::from_millis(50);
        assert_eq!(classify_need(&FixedClient("billing"), "text", timeout).await, None);
        assert_eq!(classify_need(&FixedClient("triage"), "text", timeout).await, None);
        assert_eq!(classify_need(&FailingClient, "text", timeout).await, None);
        assert_eq!(classify_need(&SlowClient, "text", timeout).await, None);
    }
}
