use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::Row;

use navigator_core::archive::{ArchiveError, ConversationArchive};
use navigator_core::domain::session::{Session, SessionId};
use navigator_core::domain::turn::{Turn, TurnId};

use super::RepositoryError;
use crate::DbPool;

/// Archive of committed sessions and turns in SQLite. Private originals are
/// never serialized, so only redacted user text reaches these tables.
#[derive(Clone)]
pub struct SqlConversationArchive {
    pool: DbPool,
}

impl SqlConversationArchive {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Session summary as last archived. Turns are loaded separately.
    pub async fn find_session(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, phase, current_agent, slots_json, consecutive_failures, created_at,
                    last_activity_at, closed_at, close_reason
             FROM conversation_sessions WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_session(r)?)),
            None => Ok(None),
        }
    }

    pub async fn list_turns(&self, id: &SessionId) -> Result<Vec<Turn>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, turn_number, user_text, reply, disposition, handled_by_json,
                    pre_verdicts_json, post_verdicts_json, tool_results_json, phase_trace_json,
                    recorded_at
             FROM conversation_turns WHERE session_id = ? ORDER BY turn_number",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_turn).collect()
    }

    pub async fn count_sessions(&self) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM conversation_sessions")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Upserts the summary. A closed row is final and a snapshot with fewer
    /// turns than the stored one is ignored.
    async fn save_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let turn_count = i64::try_from(session.turns.len()).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO conversation_sessions (id, phase, current_agent, slots_json,
                                                consecutive_failures, turn_count, created_at,
                                                last_activity_at, closed_at, close_reason,
                                                updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 phase = excluded.phase,
                 current_agent = excluded.current_agent,
                 slots_json = excluded.slots_json,
                 consecutive_failures = excluded.consecutive_failures,
                 turn_count = excluded.turn_count,
                 last_activity_at = excluded.last_activity_at,
                 closed_at = excluded.closed_at,
                 close_reason = excluded.close_reason,
                 updated_at = excluded.updated_at
             WHERE conversation_sessions.closed_at IS NULL
               AND excluded.turn_count >= conversation_sessions.turn_count",
        )
        .bind(&session.id.0)
        .bind(encode_label(&session.phase)?)
        .bind(encode_label(&session.current_agent)?)
        .bind(encode(&session.slots)?)
        .bind(i64::from(session.consecutive_failures))
        .bind(turn_count)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.to_rfc3339())
        .bind(session.closed_at.map(|at| at.to_rfc3339()))
        .bind(session.close_reason.map(|reason| reason.as_str()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_turn(&self, session_id: &SessionId, turn: &Turn) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation_turns (id, session_id, turn_number, user_text, reply,
                                             disposition, handled_by_json, pre_verdicts_json,
                                             post_verdicts_json, tool_results_json,
                                             phase_trace_json, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, turn_number) DO NOTHING",
        )
        .bind(&turn.id.0)
        .bind(&session_id.0)
        .bind(i64::from(turn.number))
        .bind(&turn.user_text)
        .bind(&turn.reply)
        .bind(turn.disposition.as_str())
        .bind(encode(&turn.handled_by)?)
        .bind(encode(&turn.pre_verdicts)?)
        .bind(encode(&turn.post_verdicts)?)
        .bind(encode(&turn.tool_results)?)
        .bind(encode(&turn.phase_trace)?)
        .bind(turn.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationArchive for SqlConversationArchive {
    async fn record_session(&self, session: &Session) -> Result<(), ArchiveError> {
        Ok(self.save_session(session).await?)
    }

    async fn record_turn(&self, session_id: &SessionId, turn: &Turn) -> Result<(), ArchiveError> {
        Ok(self.save_turn(session_id, turn).await?)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Encode(e.to_string()))
}

/// Unit enums are stored by their serde name, e.g. `awaiting_input`.
fn encode_label<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(value) {
        Ok(Value::String(label)) => Ok(label),
        Ok(other) => Err(RepositoryError::Encode(format!("expected a label, got {other}"))),
        Err(e) => Err(RepositoryError::Encode(e.to_string())),
    }
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_label<T: DeserializeOwned>(label: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(Value::String(label.to_string()))
        .map_err(|e| RepositoryError::Decode(format!("unknown label `{label}`: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {e}")))
}

fn column<T>(row: &sqlx::sqlite::SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let closed_at: Option<String> = column(row, "closed_at")?;
    let close_reason: Option<String> = column(row, "close_reason")?;
    let failures: i64 = column(row, "consecutive_failures")?;

    Ok(Session {
        id: SessionId(column(row, "id")?),
        created_at: parse_time(&column::<String>(row, "created_at")?)?,
        last_activity_at: parse_time(&column::<String>(row, "last_activity_at")?)?,
        phase: decode_label(&column::<String>(row, "phase")?)?,
        current_agent: decode_label(&column::<String>(row, "current_agent")?)?,
        turns: Vec::new(),
        slots: decode(&column::<String>(row, "slots_json")?)?,
        consecutive_failures: u32::try_from(failures).unwrap_or(u32::MAX),
        closed_at: closed_at.as_deref().map(parse_time).transpose()?,
        close_reason: close_reason.as_deref().map(decode_label).transpose()?,
    })
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, RepositoryError> {
    let number: i64 = column(row, "turn_number")?;

    Ok(Turn {
        id: TurnId(column(row, "id")?),
        number: u32::try_from(number)
            .map_err(|_| RepositoryError::Decode(format!("invalid turn number {number}")))?,
        user_text: column(row, "user_text")?,
        private_original: None,
        reply: column(row, "reply")?,
        handled_by: decode(&column::<String>(row, "handled_by_json")?)?,
        pre_verdicts: decode(&column::<String>(row, "pre_verdicts_json")?)?,
        post_verdicts: decode(&column::<String>(row, "post_verdicts_json")?)?,
        tool_results: decode(&column::<String>(row, "tool_results_json")?)?,
        phase_trace: decode(&column::<String>(row, "phase_trace_json")?)?,
        disposition: decode_label(&column::<String>(row, "disposition")?)?,
        recorded_at: parse_time(&column::<String>(row, "recorded_at")?)?,
    })
}
