use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use navigator_agent::Orchestrator;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically closes idle sessions until `shutdown` flips to `true`.
pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        info!(
            event_name = "system.sweeper.started",
            correlation_id = "sweeper",
            interval_ms = every.as_millis() as u64,
            "idle session sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let closed = orchestrator.close_idle_sessions(Utc::now()).await;
                    if closed.is_empty() {
                        debug!(event_name = "system.sweeper.idle", correlation_id = "sweeper");
                    } else {
                        info!(
                            event_name = "system.sweeper.closed",
                            correlation_id = "sweeper",
                            closed = closed.len(),
                            "closed idle sessions"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            event_name = "system.sweeper.stopped",
            correlation_id = "sweeper",
            "idle session sweeper stopped"
        );
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use navigator_agent::tools::{demo_registry, RetryPolicy};
    use navigator_agent::{
        AgentRegistry, Orchestrator, OrchestratorSettings, SafetyGate, ToolGateway, TurnRequest,
    };
    use navigator_core::domain::session::CloseReason;
    use tokio::sync::watch;

    use super::spawn;

    fn orchestrator(idle: Duration) -> Arc<Orchestrator> {
        let tools =
            ToolGateway::new(demo_registry(), RetryPolicy::default(), Duration::from_secs(1), 1);
        Arc::new(Orchestrator::new(
            AgentRegistry::with_builtin(),
            tools,
            SafetyGate::default(),
            OrchestratorSettings { session_idle_timeout: idle, ..OrchestratorSettings::default() },
        ))
    }

    #[tokio::test]
    async fn sweeper_closes_sessions_past_the_idle_timeout() {
        let orchestrator = orchestrator(Duration::ZERO);
        let reply = orchestrator
            .handle_turn(TurnRequest::new(None, "I need help finding treatment"))
            .await
            .expect("turn handled");

        let (stop, shutdown) = watch::channel(false);
        let handle = spawn(orchestrator.clone(), Duration::from_millis(10), shutdown);
        tokio::time::sleep(Duration::from_millis(120)).await;
        stop.send(true).expect("sweeper listening");
        handle.await.expect("sweeper joined");

        let session = orchestrator.session_snapshot(&reply.session_id).await.expect("session");
        assert!(session.is_closed());
        assert_eq!(session.close_reason, Some(CloseReason::Inactivity));
    }

    #[tokio::test]
    async fn sweeper_leaves_recent_sessions_open() {
        let orchestrator = orchestrator(Duration::from_secs(3_600));
        let reply = orchestrator
            .handle_turn(TurnRequest::new(None, "I need help finding treatment"))
            .await
            .expect("turn handled");

        let (stop, shutdown) = watch::channel(false);
        let handle = spawn(orchestrator.clone(), Duration::from_millis(10), shutdown);
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(stop);
        handle.await.expect("sweeper joined");

        let session = orchestrator.session_snapshot(&reply.session_id).await.expect("session");
        assert!(!session.is_closed());
    }
}
