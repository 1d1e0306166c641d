use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_model::{Message, MessageId};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use super::MessageStore;
use crate::error::StoreError;

/// Postgres has a 65535 bind parameter ceiling; three binds per row.
const MAX_ROWS_PER_STATEMENT: usize = 65_535 / 3;

#[derive(Clone, Debug)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    content: String,
    timestamp: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message::at(row.content, row.timestamp).with_id(MessageId(row.id))
    }
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply the embedded migrations.
    pub async fn connect(
        url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        crate::MIGRATOR
            .run(&pool)
            .await
            .map_err(|err| StoreError::Database(err.into()))?;
        info!(max_connections, "connected message store to PostgreSQL");
        Ok(Self::new(pool))
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn bulk_insert(
        &self,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, StoreError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        if self.pool.is_closed() {
            return Err(StoreError::Closed);
        }

        let ids: Vec<MessageId> =
            messages.iter().map(|_| MessageId::new()).collect();
        let rows: Vec<(&Message, &MessageId)> =
            messages.iter().zip(ids.iter()).collect();

        let mut tx = self.pool().begin().await?;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO messages (id, content, timestamp) ",
            );
            builder.push_values(chunk, |mut row, (message, id)| {
                row.push_bind(id.to_uuid())
                    .push_bind(message.content.clone())
                    .push_bind(message.timestamp);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(rows = ids.len(), "inserted message batch");
        Ok(ids)
    }

    async fn list_all(&self) -> Result<Vec<Message>, StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::Closed);
        }

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, content, timestamp
            FROM messages
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
