//! Operational (audit) event persistence.

use chrono::Utc;

use super::{models::OperationalEvent, Store};
use crate::error::Result;

impl Store {
    /// Append an audit record.
    pub async fn record_operational_event(
        &self,
        event_type: &str,
        initiator: &str,
        details: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO operational_events (event_type, initiator, details, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(event_type)
        .bind(initiator)
        .bind(details)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The most recent audit records, newest first.
    pub async fn list_operational_events(&self, limit: i64) -> Result<Vec<OperationalEvent>> {
        let events = sqlx::query_as::<_, OperationalEvent>(
            "SELECT * FROM operational_events ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }
}
