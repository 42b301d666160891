//! External collaborators behind one uniform, retry-aware gateway.

pub mod demo;
pub mod gateway;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use navigator_core::config::ToolsConfig;
use navigator_core::domain::tool::{ToolInvocation, ToolName};

pub use demo::demo_registry;
pub use gateway::{RetryPolicy, ToolGateway};
pub use http::HttpTool;

/// How a single collaborator attempt went wrong.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ToolCallError {
    #[error("connection refused: {0}")]
    ConnectFailed(String),
    #[error("attempt timed out")]
    Timeout,
    #[error("connection dropped before acknowledgement: {0}")]
    Dropped(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("partially applied")]
    Partial(Value),
}

impl ToolCallError {
    /// Safe to try again for a lookup.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::Timeout | Self::Dropped(_) | Self::Server { .. }
        )
    }

    /// The request may already have taken effect on the other side.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, Self::Timeout | Self::Dropped(_))
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;
    async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// HTTP collaborators when a base URL is configured, the demo set otherwise.
pub fn registry_from_config(config: &ToolsConfig) -> ToolRegistry {
    match config.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        Some(base_url) => {
            let mut registry = ToolRegistry::default();
            for tool in ToolName::ALL {
                registry.register(HttpTool::new(base_url, tool));
            }
            registry
        }
        None => demo_registry(),
    }
}

#[cfg(test)]
mod tests {
    use navigator_core::config::AppConfig;
    use navigator_core::domain::tool::ToolName;

    use super::{registry_from_config, ToolCallError};

    #[test]
    fn every_tool_is_registered_in_both_modes() {
        let mut config = AppConfig::default().tools;
        assert_eq!(registry_from_config(&config).len(), ToolName::ALL.len());

        config.base_url = Some("http://collaborators.internal:9000".to_string());
        let registry = registry_from_config(&config);
        assert_eq!(registry.len(), ToolName::ALL.len());
        assert!(registry.get(ToolName::SendMessage).is_some());
    }

    #[test]
    fn only_unacknowledged_errors_leave_the_outcome_unknown() {
        assert!(ToolCallError::Timeout.outcome_unknown());
        assert!(ToolCallError::Dropped("reset".to_string()).outcome_unknown());
        assert!(!ToolCallError::Server { status: 503, message: String::new() }.outcome_unknown());
        assert!(ToolCallError::Server { status: 503, message: String::new() }.is_transient());
        assert!(!ToolCallError::Rejected("bad payer".to_string()).is_transient());
    }
}
