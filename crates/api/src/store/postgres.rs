//! Postgres-backed conversation store

use async_trait::async_trait;
use sqlx::{types::Json, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use supportsync_shared::{
    AgentId, AnalysisResult, Conversation, ConversationId, ConversationStatus,
    ConversationSummary, CustomerId, Message, MessageId, NewMessage, Role,
};

use super::{ConversationStore, StoreError, StoreResult};

const CONVERSATION_COLUMNS: &str =
    "id, customer_id, assigned_agent_id, status, created_at, last_activity_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sequence, sender_role, sender_id, content, \
     attachment_ref, derived_text, created_at, analysis";

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    customer_id: Uuid,
    assigned_agent_id: Option<Uuid>,
    status: String,
    created_at: OffsetDateTime,
    last_activity_at: OffsetDateTime,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: row.id.into(),
            customer_id: row.customer_id.into(),
            assigned_agent_id: row.assigned_agent_id.map(AgentId),
            status: row
                .status
                .parse::<ConversationStatus>()
                .map_err(StoreError::Database)?,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    #[sqlx(flatten)]
    conversation: ConversationRow,
    last_message_summary: Option<String>,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sequence: i64,
    sender_role: String,
    sender_id: Uuid,
    content: String,
    attachment_ref: Option<String>,
    derived_text: Option<String>,
    created_at: OffsetDateTime,
    analysis: Option<Json<AnalysisResult>>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.id.into(),
            conversation_id: row.conversation_id.into(),
            sequence: row.sequence,
            sender_role: row.sender_role.parse::<Role>().map_err(StoreError::Database)?,
            sender_id: row.sender_id,
            content: row.content,
            attachment_ref: row.attachment_ref,
            derived_text: row.derived_text,
            created_at: row.created_at,
            analysis: row.analysis.map(|Json(analysis)| analysis),
        })
    }
}

// =============================================================================
// Store
// =============================================================================

/// Conversation store on a shared Postgres database
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_conversation(&self, id: ConversationId) -> StoreResult<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Conversation::try_from).transpose()
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn open_conversation(&self, customer_id: CustomerId) -> StoreResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent first messages from the same customer
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(customer_id.to_string())
            .execute(&mut *tx)
            .await?;

        let existing: Option<ConversationRow> = sqlx::query_as(&format!(
            r#"
            SELECT {CONVERSATION_COLUMNS} FROM conversations
            WHERE customer_id = $1 AND status = 'open'
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(customer_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match existing {
            Some(row) => row,
            None => {
                let row: ConversationRow = sqlx::query_as(&format!(
                    r#"
                    INSERT INTO conversations (id, customer_id, status)
                    VALUES ($1, $2, 'open')
                    RETURNING {CONVERSATION_COLUMNS}
                    "#
                ))
                .bind(ConversationId::new().0)
                .bind(customer_id.0)
                .fetch_one(&mut *tx)
                .await?;

                tracing::info!(
                    conversation_id = %row.id,
                    customer_id = %customer_id,
                    "Created conversation"
                );
                row
            }
        };

        tx.commit().await?;
        row.try_into()
    }

    async fn get_conversation(&self, id: ConversationId) -> StoreResult<Conversation> {
        self.fetch_conversation(id)
            .await?
            .ok_or(StoreError::ConversationNotFound(id))
    }

    async fn close_conversation(&self, id: ConversationId) -> StoreResult<Conversation> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            r#"
            UPDATE conversations
            SET status = 'closed', last_activity_at = NOW()
            WHERE id = $1
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::ConversationNotFound(id))?.try_into()
    }

    async fn create_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;

        // Row lock keeps sequence order equal to commit order within a conversation
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM conversations WHERE id = $1 FOR UPDATE")
                .bind(message.conversation_id.0)
                .fetch_optional(&mut *tx)
                .await?;

        match status.as_deref() {
            None => return Err(StoreError::ConversationNotFound(message.conversation_id)),
            Some("closed") => return Err(StoreError::ConversationClosed(message.conversation_id)),
            Some(_) => {}
        }

        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_role, sender_id, content, attachment_ref, derived_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(MessageId::new().0)
        .bind(message.conversation_id.0)
        .bind(message.sender_role.as_str())
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(&message.attachment_ref)
        .bind(&message.derived_text)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_activity_at = NOW() WHERE id = $1")
            .bind(message.conversation_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn conversation_history(&self, id: ConversationId) -> StoreResult<Vec<Message>> {
        if self.fetch_conversation(id).await?.is_none() {
            return Err(StoreError::ConversationNotFound(id));
        }

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY sequence ASC"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn set_assignment(
        &self,
        id: ConversationId,
        agent: Option<AgentId>,
        expected_prior: Option<AgentId>,
    ) -> StoreResult<Conversation> {
        let updated: Option<ConversationRow> = sqlx::query_as(&format!(
            r#"
            UPDATE conversations
            SET assigned_agent_id = $2, last_activity_at = NOW()
            WHERE id = $1
              AND status = 'open'
              AND assigned_agent_id IS NOT DISTINCT FROM $3
            RETURNING {CONVERSATION_COLUMNS}
            "#
        ))
        .bind(id.0)
        .bind(agent.map(|a| a.0))
        .bind(expected_prior.map(|a| a.0))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return row.try_into();
        }

        // Work out why the conditional update matched nothing
        let current = self
            .fetch_conversation(id)
            .await?
            .ok_or(StoreError::ConversationNotFound(id))?;

        if !current.is_open() {
            return Err(StoreError::ConversationClosed(id));
        }

        Err(StoreError::Conflict {
            current: current.assigned_agent_id,
        })
    }

    async fn list_active_conversations(&self) -> StoreResult<Vec<ConversationSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.customer_id, c.assigned_agent_id, c.status, c.created_at, c.last_activity_at,
                   (SELECT m.content FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.sequence DESC
                    LIMIT 1) AS last_message_summary
            FROM conversations c
            WHERE c.status = 'open'
            ORDER BY c.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ConversationSummary {
                    conversation: row.conversation.try_into()?,
                    last_message_summary: row.last_message_summary,
                })
            })
            .collect()
    }

    async fn save_analysis(&self, analysis: &AnalysisResult) -> StoreResult<()> {
        let result = sqlx::query("UPDATE messages SET analysis = $2 WHERE id = $1")
            .bind(analysis.message_id.0)
            .bind(Json(analysis))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MessageNotFound(analysis.message_id));
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
