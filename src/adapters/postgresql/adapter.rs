//! PostgreSQL adapter implementing the storage traits
//!
//! Each mapping type is routed to its table by [`MappingSchema`]. The shared
//! table carries a `mapping_type` discriminator; the dedicated tables don't.

use crate::adapters::database::traits::{
    FailedEventStorage, MappingStorage, MarkerStorage, RecordOutcome,
};
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::models::{
    PostgreSQLFailedEvent, PostgreSQLMapping, PostgreSQLMarker,
};
use crate::core::sync::failed::FailedEvent;
use crate::core::sync::marker::FeedMarker;
use crate::domain::ids::{FeedUrl, HealthId};
use crate::domain::mapping::{IdMapping, MappingSchema, MappingType};
use crate::domain::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_postgres::types::ToSql;

const MAPPING_COLUMNS: &str = "internal_id, external_id, uri, last_sync_datetime";

fn db_err(context: &'static str) -> impl Fn(tokio_postgres::Error) -> SyncError {
    move |e| SyncError::Storage(format!("{context}: {e}"))
}

fn integrity_err(context: &'static str) -> impl Fn(tokio_postgres::Error) -> SyncError {
    move |e| SyncError::IdentityIntegrity(format!("{context}: {e}"))
}

/// `AND mapping_type = $n` for the shared table, nothing otherwise
fn type_filter(mapping_type: MappingType, placeholder: usize) -> String {
    if mapping_type.schema() == MappingSchema::Shared {
        format!(" AND mapping_type = ${placeholder}")
    } else {
        String::new()
    }
}

fn patient_segment(health_id: &HealthId) -> String {
    format!("/patients/{}/", health_id.as_str())
}

/// PostgreSQL implementation of the storage traits
pub struct PostgreSQLAdapter {
    client: Arc<PostgreSQLClient>,
}

impl PostgreSQLAdapter {
    pub fn new(client: PostgreSQLClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &Arc<PostgreSQLClient> {
        &self.client
    }

    /// Applies the migration
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client.ensure_schema().await
    }

    async fn find_one(
        &self,
        column: &str,
        value: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        let table = mapping_type.schema().table_name();
        let type_name = mapping_type.as_str();
        let query = format!(
            "SELECT {MAPPING_COLUMNS} FROM {table} WHERE {column} = $1{} LIMIT 1",
            type_filter(mapping_type, 2)
        );

        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&value];
        if mapping_type.schema() == MappingSchema::Shared {
            params.push(&type_name);
        }

        let rows = self.client.query(&query, &params).await?;
        Ok(rows
            .first()
            .map(|row| PostgreSQLMapping::from_row(row, mapping_type).to_domain()))
    }
}

#[async_trait]
impl MappingStorage for PostgreSQLAdapter {
    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn find_mapping_by_internal_id(
        &self,
        internal_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        self.find_one("internal_id", internal_id, mapping_type).await
    }

    async fn find_mapping_by_external_id(
        &self,
        external_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        self.find_one("external_id", external_id, mapping_type).await
    }

    async fn find_mappings_by_health_id(
        &self,
        health_id: &HealthId,
        mapping_type: MappingType,
    ) -> Result<Vec<IdMapping>> {
        let table = mapping_type.schema().table_name();
        let type_name = mapping_type.as_str();
        let hid = health_id.as_str();
        let segment = patient_segment(health_id);

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let query = if mapping_type == MappingType::Encounter {
            params.push(&hid);
            format!("SELECT {MAPPING_COLUMNS} FROM {table} WHERE health_id = $1")
        } else {
            params.push(&segment);
            if mapping_type.schema() == MappingSchema::Shared {
                params.push(&type_name);
            }
            format!(
                "SELECT {MAPPING_COLUMNS} FROM {table} WHERE strpos(uri, $1) > 0{}",
                type_filter(mapping_type, 2)
            )
        };

        let rows = self.client.query(&query, &params).await?;
        Ok(rows
            .iter()
            .map(|row| PostgreSQLMapping::from_row(row, mapping_type).to_domain())
            .collect())
    }

    async fn insert_mapping(&self, mapping: &IdMapping) -> Result<()> {
        let table = mapping.mapping_type.schema().table_name();
        let type_name = mapping.mapping_type.as_str();
        let health_id = mapping.health_id().map(|h| h.as_str().to_string());

        let mut params: Vec<&(dyn ToSql + Sync)> =
            vec![&mapping.internal_id, &mapping.external_id, &mapping.uri];
        let statement = match mapping.mapping_type.schema() {
            MappingSchema::Encounter => {
                params.push(&health_id);
                params.push(&mapping.last_sync_time);
                format!(
                    "INSERT INTO {table} (internal_id, external_id, uri, health_id, last_sync_datetime) \
                     VALUES ($1, $2, $3, $4, $5)"
                )
            }
            MappingSchema::Shared => {
                params.push(&type_name);
                params.push(&mapping.last_sync_time);
                format!(
                    "INSERT INTO {table} (internal_id, external_id, uri, mapping_type, last_sync_datetime) \
                     VALUES ($1, $2, $3, $4, $5)"
                )
            }
            MappingSchema::MedicationOrder | MappingSchema::Patient => {
                params.push(&mapping.last_sync_time);
                format!(
                    "INSERT INTO {table} (internal_id, external_id, uri, last_sync_datetime) \
                     VALUES ($1, $2, $3, $4)"
                )
            }
        };

        self.client.execute(&statement, &params).await?;
        tracing::debug!(
            internal_id = %mapping.internal_id,
            external_id = %mapping.external_id,
            mapping_type = %mapping.mapping_type,
            "Inserted identity mapping"
        );
        Ok(())
    }

    async fn update_mapping(&self, mapping: &IdMapping) -> Result<()> {
        let table = mapping.mapping_type.schema().table_name();
        let type_name = mapping.mapping_type.as_str();
        let health_id = mapping.health_id().map(|h| h.as_str().to_string());

        let mut params: Vec<&(dyn ToSql + Sync)> = vec![
            &mapping.external_id,
            &mapping.uri,
            &mapping.last_sync_time,
            &mapping.internal_id,
        ];
        let statement = match mapping.mapping_type.schema() {
            MappingSchema::Encounter => {
                params.push(&health_id);
                format!(
                    "UPDATE {table} SET external_id = $1, uri = $2, last_sync_datetime = $3, health_id = $5 \
                     WHERE internal_id = $4"
                )
            }
            MappingSchema::Shared => {
                params.push(&type_name);
                format!(
                    "UPDATE {table} SET external_id = $1, uri = $2, last_sync_datetime = $3 \
                     WHERE internal_id = $4 AND mapping_type = $5"
                )
            }
            MappingSchema::MedicationOrder | MappingSchema::Patient => format!(
                "UPDATE {table} SET external_id = $1, uri = $2, last_sync_datetime = $3 \
                 WHERE internal_id = $4"
            ),
        };

        let updated = self.client.execute(&statement, &params).await?;
        if updated == 0 {
            return Err(SyncError::Storage(format!(
                "No {} mapping for internal id {} to update",
                mapping.mapping_type, mapping.internal_id
            )));
        }
        Ok(())
    }

    async fn replace_health_id(
        &self,
        old: &HealthId,
        new: &HealthId,
        sync_time: DateTime<Utc>,
    ) -> Result<usize> {
        let old_segment = patient_segment(old);
        let new_segment = patient_segment(new);
        let new_hid = new.as_str();

        let mut conn = self.client.get_connection().await?;
        conn.batch_execute(&self.client.statement_timeout_sql())
            .await
            .map_err(db_err("Failed to set statement timeout"))?;

        let tx = conn
            .transaction()
            .await
            .map_err(integrity_err("Failed to start health id transaction"))?;

        let encounters = tx
            .execute(
                "UPDATE encounter_id_mapping \
                 SET uri = REPLACE(uri, $1, $2), health_id = $3, last_sync_datetime = $4 \
                 WHERE strpos(uri, $1) > 0",
                &[&old_segment, &new_segment, &new_hid, &sync_time],
            )
            .await
            .map_err(integrity_err("Failed to rewrite encounter mappings"))?;

        let orders = tx
            .execute(
                "UPDATE medication_order_id_mapping \
                 SET uri = REPLACE(uri, $1, $2), last_sync_datetime = $3 \
                 WHERE strpos(uri, $1) > 0",
                &[&old_segment, &new_segment, &sync_time],
            )
            .await
            .map_err(integrity_err("Failed to rewrite medication order mappings"))?;

        tx.commit()
            .await
            .map_err(integrity_err("Failed to commit health id rewrite"))?;

        let rewritten = usize::try_from(encounters + orders).unwrap_or(usize::MAX);
        tracing::info!(
            old_health_id = %old,
            new_health_id = %new,
            rewritten,
            "Rewrote mappings for merged patient"
        );
        Ok(rewritten)
    }

    async fn count_mappings(&self) -> Result<Vec<(MappingType, usize)>> {
        let mut counts = Vec::new();

        for mapping_type in [
            MappingType::Encounter,
            MappingType::MedicationOrder,
            MappingType::Patient,
        ] {
            let query = format!(
                "SELECT COUNT(*) AS total FROM {}",
                mapping_type.schema().table_name()
            );
            let rows = self.client.query(&query, &[]).await?;
            let total: i64 = rows.first().map_or(0, |row| row.get("total"));
            if total > 0 {
                counts.push((mapping_type, usize::try_from(total).unwrap_or(0)));
            }
        }

        let rows = self
            .client
            .query(
                "SELECT mapping_type, COUNT(*) AS total FROM shr_id_mapping GROUP BY mapping_type",
                &[],
            )
            .await?;
        for row in rows {
            let type_name: String = row.get("mapping_type");
            let total: i64 = row.get("total");
            match type_name.parse::<MappingType>() {
                Ok(mapping_type) => counts.push((mapping_type, usize::try_from(total).unwrap_or(0))),
                Err(e) => tracing::warn!(error = %e, "Skipping unknown mapping type in shr_id_mapping"),
            }
        }

        Ok(counts)
    }
}

#[async_trait]
impl MarkerStorage for PostgreSQLAdapter {
    async fn load_marker(&self, feed_url: &FeedUrl) -> Result<Option<FeedMarker>> {
        let url = feed_url.as_str();
        let rows = self
            .client
            .query(
                "SELECT feed_url, last_read_entry_id, last_read_at FROM feed_markers WHERE feed_url = $1",
                &[&url],
            )
            .await?;

        rows.first()
            .map(|row| PostgreSQLMarker::from_row(row).to_domain())
            .transpose()
    }

    async fn save_marker(&self, marker: &FeedMarker) -> Result<()> {
        let url = marker.feed_url.as_str();
        self.client
            .execute(
                "INSERT INTO feed_markers (feed_url, last_read_entry_id, last_read_at, updated_at) \
                 VALUES ($1, $2, $3, NOW()) \
                 ON CONFLICT (feed_url) DO UPDATE SET \
                     last_read_entry_id = EXCLUDED.last_read_entry_id, \
                     last_read_at = EXCLUDED.last_read_at, \
                     updated_at = NOW()",
                &[&url, &marker.last_read_entry_id, &marker.last_read_at],
            )
            .await?;
        Ok(())
    }

    async fn all_markers(&self) -> Result<Vec<FeedMarker>> {
        let rows = self
            .client
            .query(
                "SELECT feed_url, last_read_entry_id, last_read_at FROM feed_markers ORDER BY feed_url",
                &[],
            )
            .await?;

        rows.iter()
            .map(|row| PostgreSQLMarker::from_row(row).to_domain())
            .collect()
    }
}

#[async_trait]
impl FailedEventStorage for PostgreSQLAdapter {
    async fn failed_events(&self, feed_url: &FeedUrl) -> Result<Vec<FailedEvent>> {
        let url = feed_url.as_str();
        let rows = self
            .client
            .query(
                "SELECT feed_url, event_id, title, content, error_message, failure_count, failed_at \
                 FROM failed_events WHERE feed_url = $1 ORDER BY id ASC",
                &[&url],
            )
            .await?;

        rows.iter()
            .map(|row| PostgreSQLFailedEvent::from_row(row).to_domain())
            .collect()
    }

    async fn record_failure(&self, event: FailedEvent, capacity: usize) -> Result<RecordOutcome> {
        let url = event.feed_url.as_str();
        let failure_count = i32::try_from(event.failure_count).unwrap_or(i32::MAX);

        let mut conn = self.client.get_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(db_err("Failed to start failed-event transaction"))?;

        let updated = tx
            .query_opt(
                "UPDATE failed_events \
                 SET failure_count = failure_count + 1, error_message = $3, failed_at = $4 \
                 WHERE feed_url = $1 AND event_id = $2 \
                 RETURNING failure_count",
                &[&url, &event.event_id, &event.error_message, &event.failed_at],
            )
            .await
            .map_err(db_err("Failed to update failed event"))?;

        if let Some(row) = updated {
            tx.commit()
                .await
                .map_err(db_err("Failed to commit failed event"))?;
            let count: i32 = row.get("failure_count");
            return Ok(RecordOutcome::Incremented {
                failure_count: u32::try_from(count).unwrap_or(0),
            });
        }

        tx.execute(
            "INSERT INTO failed_events \
             (feed_url, event_id, title, content, error_message, failure_count, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &url,
                &event.event_id,
                &event.title,
                &event.content,
                &event.error_message,
                &failure_count,
                &event.failed_at,
            ],
        )
        .await
        .map_err(db_err("Failed to insert failed event"))?;

        let rows = tx
            .query(
                "SELECT id, event_id FROM failed_events WHERE feed_url = $1 ORDER BY id ASC",
                &[&url],
            )
            .await
            .map_err(db_err("Failed to list failed events"))?;

        let overflow = rows.len().saturating_sub(capacity.max(1));
        let (ids, evicted): (Vec<i64>, Vec<String>) = rows
            .iter()
            .take(overflow)
            .map(|row| (row.get::<_, i64>("id"), row.get::<_, String>("event_id")))
            .unzip();

        if !ids.is_empty() {
            tx.execute("DELETE FROM failed_events WHERE id = ANY($1)", &[&ids])
                .await
                .map_err(db_err("Failed to evict failed events"))?;
        }

        tx.commit()
            .await
            .map_err(db_err("Failed to commit failed event"))?;

        Ok(RecordOutcome::Inserted { evicted })
    }

    async fn remove_failed_event(&self, feed_url: &FeedUrl, event_id: &str) -> Result<bool> {
        let url = feed_url.as_str();
        let removed = self
            .client
            .execute(
                "DELETE FROM failed_events WHERE feed_url = $1 AND event_id = $2",
                &[&url, &event_id],
            )
            .await?;
        Ok(removed > 0)
    }

    async fn count_failed_events(&self, feed_url: &FeedUrl) -> Result<usize> {
        let url = feed_url.as_str();
        let rows = self
            .client
            .query(
                "SELECT COUNT(*) AS total FROM failed_events WHERE feed_url = $1",
                &[&url],
            )
            .await?;
        let total: i64 = rows.first().map_or(0, |row| row.get("total"));
        Ok(usize::try_from(total).unwrap_or(0))
    }
}
