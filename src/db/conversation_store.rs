use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::error;

use crate::db::{ConversationLogStore, TurnAppend};
use crate::errors::AppError;
use crate::models::{ChatSession, Message, MessageRole};

/// Postgres-backed conversation log.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<Message, AppError> {
    let role_str: String = row
        .try_get("role")
        .map_err(|e| AppError::db_query("Failed to read role", e))?;
    let role = MessageRole::try_from(role_str)
        .map_err(|e| AppError::Unexpected(format!("Unknown message role: {e}")))?;
    Ok(Message {
        id: row
            .try_get("id")
            .map_err(|e| AppError::db_query("Failed to read id", e))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| AppError::db_query("Failed to read session_id", e))?,
        role,
        content: row
            .try_get("content")
            .map_err(|e| AppError::db_query("Failed to read content", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| AppError::db_query("Failed to read created_at", e))?,
    })
}

#[async_trait]
impl ConversationLogStore for PgConversationStore {
    async fn create_session(&self, session: &ChatSession) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO chat_sessions (id, report_id, created_at)
             VALUES ($1, $2, $3)",
        )
        .bind(&session.id)
        .bind(&session.report_id)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create session {}: {e}", session.id);
            AppError::db_query("Failed to create session", e)
        })?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<ChatSession>, AppError> {
        sqlx::query_as::<_, ChatSession>(
            "SELECT id, report_id, created_at FROM chat_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find session {id}: {e}");
            AppError::db_query(format!("Failed to find session {id}"), e)
        })
    }

    async fn append(&self, message: &Message) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append message {}: {e}", message.id);
            AppError::db_query("Failed to append message", e)
        })?;
        Ok(())
    }

    async fn append_user_within_limit(
        &self,
        session_id: &str,
        text: &str,
        limit: u32,
    ) -> Result<TurnAppend, AppError> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction for session {session_id}: {e}");
            AppError::db_query("Failed to begin transaction", e)
        })?;

        // Lock the session row first. READ COMMITTED alone does not
        // serialize concurrent count-then-insert sequences; the FOR UPDATE
        // lock makes every in-flight turn for this session queue behind it.
        let locked = sqlx::query("SELECT id FROM chat_sessions WHERE id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to lock session {session_id}: {e}");
                AppError::db_query("Failed to lock session", e)
            })?;
        if locked.is_none() {
            return Err(AppError::SessionNotFound { id: session_id.to_string() });
        }

        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM chat_messages
             WHERE session_id = $1 AND role = 'user'",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to count user messages for session {session_id}: {e}");
            AppError::db_query("Failed to count user messages", e)
        })?;
        let count: i64 = row
            .try_get("n")
            .map_err(|e| AppError::db_query("Failed to read count", e))?;
        let count = count as u32;

        if count >= limit {
            tx.rollback().await.map_err(|e| {
                error!("Failed to roll back turn append for session {session_id}: {e}");
                AppError::db_query("Failed to roll back turn append", e)
            })?;
            return Ok(TurnAppend::Closed { turns: count });
        }

        let message = Message::new(
            session_id.to_string(),
            MessageRole::User,
            text.to_string(),
        );

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, role, content, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to append user message for session {session_id}: {e}");
            AppError::db_query("Failed to append user message", e)
        })?;

        tx.commit().await.map_err(|e| {
            error!("Failed to commit turn append for session {session_id}: {e}");
            AppError::db_query("Failed to commit turn append", e)
        })?;

        Ok(TurnAppend::Appended { message, turn: count + 1 })
    }

    async fn count_user_messages(&self, session_id: &str) -> Result<u32, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM chat_messages
             WHERE session_id = $1 AND role = 'user'",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count user messages for session {session_id}: {e}");
            AppError::db_query("Failed to count user messages", e)
        })?;
        let count: i64 = row
            .try_get("n")
            .map_err(|e| AppError::db_query("Failed to read count", e))?;
        Ok(count as u32)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at
             FROM chat_messages
             WHERE session_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to fetch messages for session {session_id}: {e}");
            AppError::db_query(format!("Failed to fetch messages for session {session_id}"), e)
        })?;

        rows.into_iter().map(row_to_message).collect()
    }
}
