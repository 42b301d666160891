use std::sync::Arc;

use navigator_agent::{Orchestrator, TurnRequest};
use navigator_core::config::{AppConfig, LoadOptions};
use navigator_core::domain::session::SessionId;
use navigator_core::errors::InterfaceError;
use navigator_db::{connect_from_config, migrations, SqlConversationArchive};

use crate::commands::{current_thread_runtime, CommandResult};

type Failure = (&'static str, String, u8);

/// Runs one turn through an orchestrator backed by the configured archive.
/// `--session` resumes an archived session, turns included.
pub fn run(text: &str, session: Option<&str>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "turn",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "turn",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(execute(&config, text, session)) {
        Ok(data) => CommandResult::success_with_data("turn", "turn handled", Some(data)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("turn", error_class, message, exit_code)
        }
    }
}

async fn execute(
    config: &AppConfig,
    text: &str,
    session: Option<&str>,
) -> Result<serde_json::Value, Failure> {
    let pool = connect_from_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), 5u8))?;

    let archive = SqlConversationArchive::new(pool.clone());
    let orchestrator = Orchestrator::from_config(config).with_archive(Arc::new(archive.clone()));

    let session_id = session.map(|raw| SessionId(raw.trim().to_string()));
    let request = TurnRequest::new(session_id.clone(), text);
    let correlation_id = request.correlation_id.clone();
    if let Some(id) = &session_id {
        resume(&orchestrator, &archive, id, &correlation_id).await?;
    }

    let outcome = orchestrator.handle_turn(request).await;
    pool.close().await;

    let reply = outcome.map_err(|error| {
        let interface = error.into_interface(correlation_id);
        (error_class(&interface), interface.user_message().to_string(), 6u8)
    })?;
    serde_json::to_value(&reply).map_err(|error| ("serialization", error.to_string(), 7u8))
}

async fn resume(
    orchestrator: &Orchestrator,
    archive: &SqlConversationArchive,
    id: &SessionId,
    correlation_id: &str,
) -> Result<(), Failure> {
    let mut session = archive
        .find_session(id)
        .await
        .map_err(|error| ("archive", error.to_string(), 4u8))?
        .ok_or_else(|| ("not_found", format!("session {id} is not in the archive"), 6u8))?;
    session.turns =
        archive.list_turns(id).await.map_err(|error| ("archive", error.to_string(), 4u8))?;
    orchestrator.resume_session(session, correlation_id).await;
    Ok(())
}

fn error_class(error: &InterfaceError) -> &'static str {
    match error {
        InterfaceError::BadRequest { .. } => "bad_request",
        InterfaceError::NotFound { .. } => "not_found",
        InterfaceError::Conflict { .. } => "conflict",
        InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
        InterfaceError::Internal { .. } => "internal",
    }
}
