//! Batched removal of features and their contained children.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use citydb_core::{format_timestamp, AdapterMetadata, DeleteMode, ModelError, QualifiedName};
use citydb_query::CompiledQuery;
use sqlx::pool::PoolConnection;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info, warn};

use crate::adapter::{DatabaseAdapter, SqliteAdapter};
use crate::error::{OperationError, OperationResult};
use crate::options::DeleteOptions;
use crate::report::OperationReport;
use crate::retry::Retry;
use crate::rows::RELATION_CONTAINS;
use crate::util::bind_row_params;

/// Deletes features in batches, one statement per feature type and batch.
pub struct Deleter<'a, A: DatabaseAdapter = SqliteAdapter> {
    adapter: &'a A,
    connection: PoolConnection<Sqlite>,
    options: DeleteOptions,
    /// Pending ids per feature type
    pending: BTreeMap<QualifiedName, BTreeSet<i64>>,
    report: OperationReport,
}

impl<'a, A: DatabaseAdapter> Deleter<'a, A> {
    pub async fn new(adapter: &'a A, options: DeleteOptions) -> OperationResult<Self> {
        let connection = adapter.connection().await?;
        Ok(Self {
            adapter,
            connection,
            options,
            pending: BTreeMap::new(),
            report: OperationReport::default(),
        })
    }

    #[must_use]
    pub fn report(&self) -> &OperationReport {
        &self.report
    }

    /// Queues a feature for deletion (may trigger a flush of its type).
    ///
    /// # Returns
    /// - `Ok(true)` if the batch of `feature_type` was flushed
    /// - `Ok(false)` if the id was buffered
    pub async fn delete(&mut self, id: i64, feature_type: &QualifiedName) -> OperationResult<bool> {
        if self.adapter.registry().config(feature_type).is_none() {
            return Err(OperationError::model(
                id,
                ModelError::UnknownFeatureType(feature_type.to_string()),
            ));
        }

        let ids = self.pending.entry(feature_type.clone()).or_default();
        ids.insert(id);

        if ids.len() >= self.adapter.maximum_batch_size() {
            self.flush_type(feature_type).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Queues every feature selected by `query`, grouped by feature type.
    /// Returns the number of selected features.
    pub async fn delete_matching(&mut self, query: &CompiledQuery) -> OperationResult<usize> {
        let sql = format!(
            "SELECT q.id, f.objectclass FROM ({}) q JOIN feature f ON f.id = q.id",
            query.sql
        );
        let rows: Vec<(i64, String)> = bind_row_params(sqlx::query_as(&sql), &query.params)
            .fetch_all(&mut *self.connection)
            .await?;

        let mut selected: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for (id, object_class) in rows {
            selected.entry(object_class).or_default().push(id);
        }

        let mut queued = 0;
        for (object_class, ids) in selected {
            let feature_type: QualifiedName = object_class.parse().map_err(|err: String| {
                OperationError::model(ids[0], ModelError::Corrupt(err))
            })?;
            for id in ids {
                self.delete(id, &feature_type).await?;
                queued += 1;
            }
        }
        debug!(queued, "queued matching features for deletion");
        Ok(queued)
    }

    /// Flushes all pending ids. Does nothing when nothing is pending.
    pub async fn execute_batch(&mut self) -> OperationResult<()> {
        let feature_types: Vec<QualifiedName> = self.pending.keys().cloned().collect();
        for feature_type in feature_types {
            self.flush_type(&feature_type).await?;
        }
        Ok(())
    }

    /// Flushes the remainder and releases the connection.
    pub async fn close(mut self) -> OperationResult<OperationReport> {
        self.execute_batch().await?;
        info!(
            deleted = self.report.succeeded,
            failed = self.report.failed,
            batches = self.report.batches,
            mode = ?self.options.mode,
            "delete session closed"
        );
        Ok(self.report)
    }

    async fn flush_type(&mut self, feature_type: &QualifiedName) -> OperationResult<()> {
        if self.pending.get(feature_type).map_or(true, BTreeSet::is_empty) {
            self.pending.remove(feature_type);
            return Ok(());
        }
        if self.options.cancellation.is_cancelled() {
            return Err(OperationError::Cancelled);
        }
        let Some(ids) = self.pending.remove(feature_type) else {
            return Ok(());
        };

        let batch = self.report.batches;
        let mut retry = Retry::new(&self.options.retry);
        let result = loop {
            match delete_batch(&mut self.connection, self.options.mode, &ids, batch).await {
                Err(err) => match retry.next_delay(&err) {
                    Some(delay) => {
                        warn!(batch, error = %err, ?delay, "retrying delete batch");
                        tokio::time::sleep(delay).await;
                    }
                    None => break Err(err),
                },
                ok => break ok,
            }
        };

        match result {
            Ok(affected) => {
                self.report.succeeded += ids.len();
                self.report.batches += 1;
                debug!(
                    batch,
                    feature_type = %feature_type,
                    ids = ids.len(),
                    affected,
                    "flushed delete batch"
                );
                Ok(())
            }
            Err(err) => {
                self.report.record_failure(&err);
                Err(err)
            }
        }
    }
}

/// Removes or terminates `ids` and every feature they contain, in one
/// statement. Returns the number of affected feature rows.
async fn delete_batch(
    connection: &mut SqliteConnection,
    mode: DeleteMode,
    ids: &BTreeSet<i64>,
    batch: usize,
) -> OperationResult<u64> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "WITH RECURSIVE doomed(id) AS (SELECT id FROM feature WHERE id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    builder.push(
        " UNION SELECT p.val_feature_id FROM property p JOIN doomed d ON p.feature_id = d.id \
         WHERE p.val_feature_id IS NOT NULL AND p.val_relation_type = ",
    );
    builder.push_bind(RELATION_CONTAINS);
    builder.push(") ");

    match mode {
        DeleteMode::Delete => {
            builder.push("DELETE FROM feature WHERE id IN (SELECT id FROM doomed)");
        }
        DeleteMode::Terminate => {
            builder.push("UPDATE feature SET termination_date = ");
            builder.push_bind(format_timestamp(&Utc::now()));
            builder.push(" WHERE id IN (SELECT id FROM doomed) AND termination_date IS NULL");
        }
    }

    let result = builder
        .build()
        .execute(&mut *connection)
        .await
        .map_err(|source| OperationError::Storage {
            batch,
            object_id: ids
                .first()
                .map(ToString::to_string)
                .unwrap_or_default(),
            source,
        })?;
    Ok(result.rows_affected())
}
