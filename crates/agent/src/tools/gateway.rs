use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use navigator_core::config::ToolsConfig;
use navigator_core::domain::tool::{
    OperationKey, ToolInvocation, ToolInvocationId, ToolName, ToolResult, ToolStatus,
};

use super::{Tool, ToolCallError, ToolRegistry};
use crate::safety::PiiRedactor;

/// Exponential backoff between attempts of the same invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { initial_backoff_ms: 200, max_backoff_ms: 2_000, backoff_multiplier: 2.0 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay = if base.is_finite() { base as u64 } else { self.max_backoff_ms };
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// The only path from agents to collaborators. Every call yields exactly one
/// [`ToolResult`], whatever happened underneath.
#[derive(Clone)]
pub struct ToolGateway {
    registry: ToolRegistry,
    redactor: PiiRedactor,
    policy: RetryPolicy,
    default_timeout: Duration,
    default_max_retries: u32,
}

impl ToolGateway {
    pub fn new(
        registry: ToolRegistry,
        policy: RetryPolicy,
        default_timeout: Duration,
        default_max_retries: u32,
    ) -> Self {
        Self {
            registry,
            redactor: PiiRedactor::new(),
            policy,
            default_timeout,
            default_max_retries,
        }
    }

    pub fn from_config(registry: ToolRegistry, config: &ToolsConfig) -> Self {
        Self::new(registry, RetryPolicy::from_config(config), config.timeout(), config.max_retries)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn call(&self, tool: ToolName, arguments: Value) -> ToolResult {
        self.invoke(tool, arguments, self.default_timeout, self.default_max_retries).await
    }

    pub async fn invoke(
        &self,
        tool: ToolName,
        arguments: Value,
        timeout: Duration,
        max_retries: u32,
    ) -> ToolResult {
        let started = Instant::now();
        let (arguments, redacted) = self.redactor.redact_value(&arguments, &[]);
        let invocation = ToolInvocation {
            id: ToolInvocationId(format!("inv-{}", Uuid::new_v4())),
            tool,
            arguments,
            idempotency_key: (!tool.is_idempotent())
                .then(|| OperationKey(format!("op-{}", Uuid::new_v4()))),
        };
        if redacted {
            info!(
                event_name = "tool.arguments.redacted",
                tool = %tool,
                invocation_id = %invocation.id.0,
                "removed personal identifiers from tool arguments"
            );
        }

        let Some(handler) = self.registry.get(tool) else {
            warn!(event_name = "tool.unregistered", tool = %tool, "no collaborator registered");
            return ToolResult {
                invocation,
                status: ToolStatus::Failed {
                    retryable: false,
                    reason: format!("no collaborator registered for {tool}"),
                },
                attempts: 0,
                elapsed_ms: 0,
            };
        };

        let retry_budget = if tool.is_idempotent() { max_retries } else { max_retries.min(1) };
        let mut attempts = 0u32;
        let status = loop {
            attempts += 1;
            match run_attempt(Arc::clone(&handler), invocation.clone(), timeout).await {
                Ok(payload) => break ToolStatus::Succeeded { payload },
                Err(error) => {
                    warn!(
                        event_name = "tool.attempt.failed",
                        tool = %tool,
                        invocation_id = %invocation.id.0,
                        attempt = attempts,
                        error = %error,
                        "tool attempt failed"
                    );

                    let retryable = if tool.is_idempotent() {
                        error.is_transient()
                    } else {
                        error.outcome_unknown()
                    };
                    if !retryable || attempts > retry_budget {
                        break terminal_status(&error);
                    }

                    let delay = self.policy.compute_delay(attempts - 1);
                    info!(
                        event_name = "tool.retry",
                        tool = %tool,
                        invocation_id = %invocation.id.0,
                        next_attempt = attempts + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying tool invocation"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            event_name = "tool.completed",
            tool = %tool,
            invocation_id = %invocation.id.0,
            status = status.as_str(),
            attempts,
            elapsed_ms,
            "tool invocation finished"
        );

        ToolResult { invocation, status, attempts, elapsed_ms }
    }
}

/// Runs one attempt as its own task. On timeout the handle is dropped and the
/// task finishes in the background; its result is discarded.
async fn run_attempt(
    tool: Arc<dyn Tool>,
    invocation: ToolInvocation,
    timeout: Duration,
) -> Result<Value, ToolCallError> {
    let task = tokio::spawn(async move { tool.execute(&invocation).await });
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => Err(ToolCallError::Dropped(join_error.to_string())),
        Err(_) => Err(ToolCallError::Timeout),
    }
}

fn terminal_status(error: &ToolCallError) -> ToolStatus {
    match error {
        ToolCallError::ConnectFailed(_) | ToolCallError::Server { .. } => {
            ToolStatus::Failed { retryable: true, reason: error.to_string() }
        }
        ToolCallError::Rejected(_) => {
            ToolStatus::Failed { retryable: false, reason: error.to_string() }
        }
        ToolCallError::Timeout | ToolCallError::Dropped(_) | ToolCallError::Partial(_) => {
            ToolStatus::Indeterminate { reason: error.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use navigator_core::domain::tool::{ToolInvocation, ToolName, ToolStatus};

    use super::{RetryPolicy, ToolGateway};
    use crate::tools::{Tool, ToolCallError, ToolRegistry};

    struct ScriptedTool {
        name: ToolName,
        delay: Duration,
        script: Mutex<VecDeque<Result<Value, ToolCallError>>>,
        calls: Arc<Mutex<Vec<ToolInvocation>>>,
    }

    impl ScriptedTool {
        fn new(
            name: ToolName,
            delay: Duration,
            script: Vec<Result<Value, ToolCallError>>,
        ) -> (Self, Arc<Mutex<Vec<ToolInvocation>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let tool = Self {
                name,
                delay,
                script: Mutex::new(script.into()),
                calls: Arc::clone(&calls),
            };
            (tool, calls)
        }
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn name(&self) -> ToolName {
            self.name
        }

        async fn execute(&self, invocation: &ToolInvocation) -> Result<Value, ToolCallError> {
            self.calls.lock().expect("calls lock").push(invocation.clone());
            tokio::time::sleep(self.delay).await;
            self.script.lock().expect("script lock").pop_front().unwrap_or(Ok(json!({})))
        }
    }

    fn gateway_with(tool: ScriptedTool) -> ToolGateway {
        let mut registry = ToolRegistry::default();
        registry.register(tool);
        let policy =
            RetryPolicy { initial_backoff_ms: 1, max_backoff_ms: 5, backoff_multiplier: 2.0 };
        ToolGateway::new(registry, policy, Duration::from_millis(500), 2)
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy =
            RetryPolicy { initial_backoff_ms: 200, max_backoff_ms: 1_000, backoff_multiplier: 2.0 };
        assert_eq!(policy.compute_delay(0), Duration::from_millis(200));
        assert_eq!(policy.compute_delay(1), Duration::from_millis(400));
        assert_eq!(policy.compute_delay(5), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn idempotent_timeouts_are_retried_up_to_the_budget() {
        let (tool, calls) =
            ScriptedTool::new(ToolName::FacilitySearch, Duration::from_millis(200), Vec::new());
        let gateway = gateway_with(tool);

        let arguments = json!({"address": "Atlanta, GA"});
        let result =
            gateway.invoke(ToolName::FacilitySearch, arguments, Duration::from_millis(20), 2).await;

        assert_eq!(calls.lock().expect("calls lock").len(), 3);
        assert_eq!(result.attempts, 3);
        assert!(result.is_indeterminate());
        assert!(result.invocation.idempotency_key.is_none());
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let (tool, calls) = ScriptedTool::new(
            ToolName::InsuranceVerification,
            Duration::ZERO,
            vec![
                Err(ToolCallError::Server { status: 503, message: "busy".to_string() }),
                Ok(json!({"accepted": true})),
            ],
        );
        let gateway = gateway_with(tool);

        let result = gateway.call(ToolName::InsuranceVerification, json!({"payer": "aetna"})).await;

        assert_eq!(calls.lock().expect("calls lock").len(), 2);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.payload(), Some(&json!({"accepted": true})));
    }

    #[tokio::test]
    async fn non_idempotent_unknown_outcome_is_retried_once_with_the_same_key() {
        let (tool, calls) = ScriptedTool::new(
            ToolName::ScheduleAppointment,
            Duration::ZERO,
            vec![
                Err(ToolCallError::Dropped("reset by peer".to_string())),
                Err(ToolCallError::Dropped("reset by peer".to_string())),
                Ok(json!({"appointment_id": "appt-1"})),
            ],
        );
        let gateway = gateway_with(tool);

        let result = gateway.call(ToolName::ScheduleAppointment, json!({"facility_id": "f"})).await;

        let calls = calls.lock().expect("calls lock");
        assert_eq!(calls.len(), 2);
        assert!(calls[0].idempotency_key.is_some());
        assert_eq!(calls[0].idempotency_key, calls[1].idempotency_key);
        assert!(result.is_indeterminate());
    }

    #[tokio::test]
    async fn non_idempotent_server_errors_are_never_retried() {
        let (tool, calls) = ScriptedTool::new(
            ToolName::SendMessage,
            Duration::ZERO,
            vec![Err(ToolCallError::Server { status: 500, message: "boom".to_string() })],
        );
        let gateway = gateway_with(tool);

        let result = gateway.call(ToolName::SendMessage, json!({"body": "hello"})).await;

        assert_eq!(calls.lock().expect("calls lock").len(), 1);
        assert!(matches!(result.status, ToolStatus::Failed { retryable: true, .. }));
    }

    #[tokio::test]
    async fn partial_success_is_indeterminate_and_not_retried() {
        let (tool, calls) = ScriptedTool::new(
            ToolName::CreateReminder,
            Duration::ZERO,
            vec![Err(ToolCallError::Partial(json!({"sms": "sent", "email": "failed"})))],
        );
        let gateway = gateway_with(tool);

        let result = gateway.call(ToolName::CreateReminder, json!({"time": "Tuesday"})).await;

        assert_eq!(calls.lock().expect("calls lock").len(), 1);
        assert!(result.is_indeterminate());
    }

    #[tokio::test]
    async fn string_arguments_are_redacted_before_leaving() {
        let (tool, calls) = ScriptedTool::new(ToolName::SendMessage, Duration::ZERO, Vec::new());
        let gateway = gateway_with(tool);

        let arguments = json!({
            "facility_id": "fac-atl-001",
            "body": "My name is Jane Doe, call 555-111-2222"
        });
        let result = gateway.call(ToolName::SendMessage, arguments).await;

        let calls = calls.lock().expect("calls lock");
        let sent = calls[0].arguments.to_string();
        assert!(!sent.contains("Jane Doe"));
        assert!(!sent.contains("555-111-2222"));
        assert_eq!(result.invocation.arguments, calls[0].arguments);
    }

    #[tokio::test]
    async fn unregistered_tools_fail_without_attempts() {
        let gateway = gateway_with(
            ScriptedTool::new(ToolName::FacilitySearch, Duration::ZERO, Vec::new()).0,
        );
        let result = gateway.call(ToolName::DocumentAnalysis, json!({})).await;

        assert_eq!(result.attempts, 0);
        assert!(matches!(result.status, ToolStatus::Failed { retryable: false, .. }));
    }
}
