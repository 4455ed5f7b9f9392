//! PostgreSQL persistence backend.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};
use uuid::Uuid;
use waggle_protocol::{EventRecord, EventStatus};

use crate::error::PersistenceError;

const PING_TIMEOUT: Duration = Duration::from_secs(2);

pub struct PostgresBackend {
    client: Client,
}

impl PostgresBackend {
    /// Connect and spawn the connection driver task.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection terminated");
            }
        });

        Ok(Self { client })
    }

    fn row_to_record(row: &Row) -> Result<EventRecord, PersistenceError> {
        let status: String = row.get("status");
        Ok(EventRecord {
            id: row.get("id"),
            status: EventStatus::from_str(&status)
                .map_err(|e| PersistenceError::Backend(e.to_string()))?,
            topic: row.get("topic"),
            message: row.get("message"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl super::backend::PersistenceBackend for PostgresBackend {
    async fn init(&self) -> Result<(), PersistenceError> {
        self.client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS bus_events (
                    id UUID PRIMARY KEY,
                    status TEXT NOT NULL,
                    topic TEXT NOT NULL,
                    message TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS bus_events_created_at
                    ON bus_events (created_at);
                "#,
            )
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn ping(&self) -> bool {
        match tokio::time::timeout(PING_TIMEOUT, self.client.simple_query("SELECT 1")).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "postgres ping failed");
                false
            }
            Err(_) => {
                debug!("postgres ping timed out");
                false
            }
        }
    }

    async fn store(&self, record: &EventRecord) -> Result<(), PersistenceError> {
        self.client
            .execute(
                r#"
                INSERT INTO bus_events (id, status, topic, message, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[
                    &record.id,
                    &record.status.as_str(),
                    &record.topic,
                    &record.message,
                    &record.created_at,
                ],
            )
            .await
            .map(|_| ())
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn update(&self, id: Uuid, status: EventStatus) -> Result<(), PersistenceError> {
        self.client
            .execute(
                "UPDATE bus_events SET status = $2 WHERE id = $1",
                &[&id, &status.as_str()],
            )
            .await
            .map(|_| ())
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }

    async fn retrieve(
        &self,
        since: Option<DateTime<Utc>>,
        statuses: Option<&[EventStatus]>,
    ) -> Result<Vec<EventRecord>, PersistenceError> {
        let status_names: Option<Vec<String>> =
            statuses.map(|set| set.iter().map(|s| s.as_str().to_string()).collect());

        let rows = self
            .client
            .query(
                r#"
                SELECT id, status, topic, message, created_at
                FROM bus_events
                WHERE ($1::TIMESTAMPTZ IS NULL OR created_at >= $1)
                  AND ($2::TEXT[] IS NULL OR status = ANY($2))
                ORDER BY created_at ASC
                "#,
                &[&since, &status_names],
            )
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn prune_before(&self, before: DateTime<Utc>) -> Result<u64, PersistenceError> {
        self.client
            .execute("DELETE FROM bus_events WHERE created_at < $1", &[&before])
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }
}
