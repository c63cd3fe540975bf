//! Writes features into the relational layout.
//!
//! Each root feature is planned into rows that refer to each other through
//! [`Handle`]s. Surrogate keys are assigned when a batch is flushed, inside
//! one transaction per batch, and recorded per handle so that later rows and
//! later roots can link to earlier ones.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use citydb_core::{
    format_timestamp, AdapterMetadata, Appearance, AppearanceValue, Envelope, Feature, FeatureValue, Geometry,
    GeometryValue, ImplicitGeometry, ImplicitGeometryValue, ImportMode, ModelError, ModelResult,
    ObjectId, Preprocessor, QualifiedName,
};
use once_cell::unsync::OnceCell;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Sqlite, SqliteConnection};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{DatabaseAdapter, SqliteAdapter};
use crate::error::{OperationError, OperationResult};
use crate::options::ImportOptions;
use crate::report::OperationReport;
use crate::retry::Retry;
use crate::rows::{
    Placement, ValueColumns, KIND_APPEARANCE, KIND_FEATURE, KIND_GEOMETRY, KIND_IMPLICIT_GEOMETRY,
    RELATION_CONTAINS, RELATION_REFERENCES,
};

/// Row identity within an import session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Handle(usize);

/// Foreign key value: a row of this session or an existing database key.
#[derive(Debug, Clone, Copy)]
enum Target {
    Handle(Handle),
    Key(i64),
}

/// Kinds of objects addressable by object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjectKind {
    Feature,
    Geometry,
    ImplicitGeometry,
    Appearance,
}

impl ObjectKind {
    fn table(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Geometry => "geometry_data",
            Self::ImplicitGeometry => "implicit_geometry",
            Self::Appearance => "appearance",
        }
    }

    /// Column of the `property` table linking to this kind.
    fn property_column(self) -> &'static str {
        match self {
            Self::Feature => "val_feature_id",
            Self::Geometry => "val_geometry_id",
            Self::ImplicitGeometry => "val_implicitgeom_id",
            Self::Appearance => "val_appearance_id",
        }
    }
}

#[derive(Debug)]
struct FeatureRow {
    handle: Handle,
    object_id: String,
    object_class: String,
    lineage: Option<String>,
    creation_date: Option<String>,
    termination_date: Option<String>,
    envelope: Option<Envelope>,
}

#[derive(Debug)]
struct GeometryRow {
    handle: Handle,
    object_id: Option<String>,
    geometry_type: &'static str,
    coordinates: String,
    feature: Option<Handle>,
    envelope: Option<Envelope>,
}

#[derive(Debug)]
struct ImplicitGeometryRow {
    handle: Handle,
    object_id: String,
    mime_type: Option<String>,
    library_object: Option<String>,
    relative_geometry: Option<Handle>,
}

#[derive(Debug)]
struct AppearanceRow {
    handle: Handle,
    object_id: String,
    theme: Option<String>,
    surface_data: String,
}

#[derive(Debug)]
struct PropertyRow {
    handle: Handle,
    feature: Handle,
    seq: i64,
    namespace: String,
    name: String,
    datatype: &'static str,
    values: ValueColumns,
    lod: Option<String>,
    geometry: Option<Target>,
    implicit_geometry: Option<Target>,
    placement: Option<String>,
    appearance: Option<Target>,
    feature_ref: Option<Target>,
    relation: Option<i64>,
    reference: Option<String>,
}

impl PropertyRow {
    fn new(handle: Handle, feature: Handle, seq: i64, name: &QualifiedName, datatype: &'static str) -> Self {
        Self {
            handle,
            feature,
            seq,
            namespace: name.namespace.clone(),
            name: name.name.clone(),
            datatype,
            values: ValueColumns::default(),
            lod: None,
            geometry: None,
            implicit_geometry: None,
            placement: None,
            appearance: None,
            feature_ref: None,
            relation: None,
            reference: None,
        }
    }
}

#[derive(Debug)]
enum Row {
    Feature(FeatureRow),
    Geometry(GeometryRow),
    ImplicitGeometry(ImplicitGeometryRow),
    Appearance(AppearanceRow),
    Property(PropertyRow),
    /// Sets the link of an already written property row.
    Link {
        property: Handle,
        kind: ObjectKind,
        target: Target,
    },
}

/// Queued row and the object id of the feature it belongs to.
#[derive(Debug)]
struct Pending {
    owner: ObjectId,
    row: Row,
}

/// Reference whose target was not known when its property row was planned.
#[derive(Debug)]
struct Deferred {
    owner: ObjectId,
    property: Handle,
    kind: ObjectKind,
    object_id: ObjectId,
}

/// Writes features through one dedicated connection.
pub struct Importer<'a, A: DatabaseAdapter = SqliteAdapter> {
    adapter: &'a A,
    connection: PoolConnection<Sqlite>,
    options: ImportOptions,
    session: Uuid,
    preprocessor: Preprocessor,
    pending: Vec<Pending>,
    /// Surrogate key per handle, filled in when the row is flushed.
    keys: Vec<Option<i64>>,
    cache: HashMap<(ObjectKind, ObjectId), Handle>,
    lineage: OnceCell<Option<String>>,
    report: OperationReport,
}

impl<'a, A: DatabaseAdapter> Importer<'a, A> {
    pub async fn new(adapter: &'a A, options: ImportOptions) -> OperationResult<Self> {
        let connection = adapter.connection().await?;
        let session = Uuid::now_v7();
        debug!(%session, mode = ?options.mode, "import session started");
        Ok(Self {
            adapter,
            connection,
            options,
            session,
            preprocessor: Preprocessor::new(),
            pending: Vec::new(),
            keys: Vec::new(),
            cache: HashMap::new(),
            lineage: OnceCell::new(),
            report: OperationReport::default(),
        })
    }

    #[must_use]
    pub fn session(&self) -> Uuid {
        self.session
    }

    #[must_use]
    pub fn report(&self) -> &OperationReport {
        &self.report
    }

    /// Writes one root feature with its children and returns its surrogate
    /// key. A feature that fails validation is reported and skipped; the
    /// session stays usable.
    pub async fn import(&mut self, feature: &Feature) -> OperationResult<i64> {
        if self.options.cancellation.is_cancelled() {
            return Err(OperationError::Cancelled);
        }

        self.preprocessor.process(feature);
        self.report
            .deprecated
            .extend(self.preprocessor.deprecated().iter().cloned());

        if let Err(source) = self.adapter.registry().prepare(feature) {
            let err = OperationError::model(&feature.object_id, source);
            warn!(object_id = %feature.object_id, error = %err, "skipping invalid feature");
            self.report.record_failure(&err);
            return Err(err);
        }

        if self.options.mode == ImportMode::SkipExisting {
            if let Some(key) = self.existing_feature(&feature.object_id).await? {
                debug!(object_id = %feature.object_id, key, "skipping existing feature");
                self.report.skipped += 1;
                return Ok(key);
            }
        }

        let first_handle = self.keys.len();
        match self.write_root(feature).await {
            Ok(key) => {
                self.report.succeeded += 1;
                Ok(key)
            }
            Err(err) => {
                warn!(object_id = %feature.object_id, error = %err, "feature import failed");
                self.discard_unflushed(first_handle);
                self.report.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Clears the session caches between logical documents.
    pub fn end_document(&mut self) {
        self.discard_unflushed(0);
        self.cache.clear();
        self.keys.clear();
        self.preprocessor.clear();
    }

    /// Flushes outstanding rows and releases the connection.
    pub async fn close(mut self) -> OperationResult<OperationReport> {
        self.flush().await?;
        info!(
            session = %self.session,
            succeeded = self.report.succeeded,
            failed = self.report.failed,
            skipped = self.report.skipped,
            batches = self.report.batches,
            "import session closed"
        );
        Ok(self.report)
    }

    async fn write_root(&mut self, feature: &Feature) -> OperationResult<i64> {
        let lineage = self.lineage();
        let mut rows = Vec::new();
        let mut deferred = Vec::new();
        let root = self
            .plan_feature(feature, lineage.as_deref(), &mut rows, &mut deferred)
            .map_err(|source| OperationError::model(&feature.object_id, source))?;

        for reference in deferred {
            let target = self.resolve(reference.kind, &reference.object_id).await?.ok_or_else(|| {
                OperationError::UnresolvedReference {
                    object_id: reference.object_id.to_string(),
                    referenced_by: feature.object_id.to_string(),
                }
            })?;
            debug!(
                object_id = %reference.object_id,
                owner = %reference.owner,
                "resolved deferred reference"
            );
            rows.push(Pending {
                owner: reference.owner,
                row: Row::Link {
                    property: reference.property,
                    kind: reference.kind,
                    target,
                },
            });
        }

        let max_batch_size = self.adapter.maximum_batch_size();
        for row in rows {
            self.pending.push(row);
            if self.pending.len() >= max_batch_size {
                self.flush().await?;
            }
        }
        self.flush().await?;

        self.key(root).ok_or_else(|| {
            OperationError::Core(citydb_core::CoreError::invalid_state(format!(
                "no key assigned to `{}`",
                feature.object_id
            )))
        })
    }

    /// Lineage template with its tokens substituted, computed on first use.
    fn lineage(&self) -> Option<String> {
        self.lineage
            .get_or_init(|| {
                self.options.lineage.as_ref().map(|template| {
                    template
                        .replace("@file@", self.options.source_file.as_deref().unwrap_or_default())
                        .replace("@date@", &Utc::now().format("%Y-%m-%d").to_string())
                        .replace("@session@", &self.session.to_string())
                })
            })
            .clone()
    }

    fn allocate(&mut self) -> Handle {
        self.keys.push(None);
        Handle(self.keys.len() - 1)
    }

    fn key(&self, handle: Handle) -> Option<i64> {
        self.keys.get(handle.0).copied().flatten()
    }

    fn cached(&self, kind: ObjectKind, object_id: &ObjectId) -> Option<Handle> {
        self.cache.get(&(kind, object_id.clone())).copied()
    }

    fn plan_feature(
        &mut self,
        feature: &Feature,
        lineage: Option<&str>,
        rows: &mut Vec<Pending>,
        deferred: &mut Vec<Deferred>,
    ) -> ModelResult<Handle> {
        if let Some(handle) = self.cached(ObjectKind::Feature, &feature.object_id) {
            return Ok(handle);
        }

        let owner = feature.object_id.clone();
        let handle = self.allocate();
        self.cache
            .insert((ObjectKind::Feature, owner.clone()), handle);
        rows.push(Pending {
            owner: owner.clone(),
            row: Row::Feature(FeatureRow {
                handle,
                object_id: owner.to_string(),
                object_class: feature.feature_type.to_string(),
                lineage: feature.lineage.clone().or_else(|| lineage.map(str::to_string)),
                creation_date: feature.creation_date.as_ref().map(format_timestamp),
                termination_date: feature.termination_date.as_ref().map(format_timestamp),
                envelope: feature.envelope(),
            }),
        });

        let mut seq = 0;

        for attribute in &feature.attributes {
            let property = self.allocate();
            let mut row = PropertyRow::new(
                property,
                handle,
                seq,
                &attribute.name,
                attribute.value.data_type().as_str(),
            );
            row.values = ValueColumns::encode(&attribute.value);
            rows.push(Pending {
                owner: owner.clone(),
                row: Row::Property(row),
            });
            seq += 1;
        }

        for geometry_property in &feature.geometries {
            let property = self.allocate();
            let mut row = PropertyRow::new(property, handle, seq, &geometry_property.name, KIND_GEOMETRY);
            row.lod = geometry_property.lod.clone();
            match &geometry_property.value {
                GeometryValue::Inline(geometry) => {
                    let geometry = self.plan_geometry(geometry, Some(handle), &owner, rows);
                    row.geometry = Some(Target::Handle(geometry));
                }
                GeometryValue::Reference(target) => {
                    row.reference = Some(target.to_string());
                    row.geometry = self.link_or_defer(ObjectKind::Geometry, target, &owner, property, deferred);
                }
            }
            rows.push(Pending {
                owner: owner.clone(),
                row: Row::Property(row),
            });
            seq += 1;
        }

        for implicit in &feature.implicit_geometries {
            let property = self.allocate();
            let mut row = PropertyRow::new(property, handle, seq, &implicit.name, KIND_IMPLICIT_GEOMETRY);
            row.lod = implicit.lod.clone();
            if implicit.transformation.is_some() || implicit.reference_point.is_some() {
                let placement = Placement {
                    transformation: implicit.transformation.map(|matrix| matrix.to_vec()),
                    reference_point: implicit.reference_point,
                };
                row.placement = Some(
                    serde_json::to_string(&placement)
                        .map_err(|err| ModelError::InvalidGeometry(err.to_string()))?,
                );
            }

            let object_id = implicit.value.object_id();
            let template = match &implicit.value {
                ImplicitGeometryValue::Inline(template) => Some(Arc::clone(template)),
                ImplicitGeometryValue::Reference(target) => {
                    self.preprocessor.implicit_geometry(target).cloned()
                }
            };
            row.implicit_geometry = match (self.cached(ObjectKind::ImplicitGeometry, object_id), template) {
                (Some(existing), _) => Some(Target::Handle(existing)),
                (None, Some(template)) => {
                    Some(Target::Handle(self.plan_implicit_geometry(&template, &owner, rows)))
                }
                (None, None) => {
                    row.reference = Some(object_id.to_string());
                    self.link_or_defer(ObjectKind::ImplicitGeometry, object_id, &owner, property, deferred)
                }
            };
            rows.push(Pending {
                owner: owner.clone(),
                row: Row::Property(row),
            });
            seq += 1;
        }

        for appearance_property in &feature.appearances {
            let property = self.allocate();
            let mut row =
                PropertyRow::new(property, handle, seq, &appearance_property.name, KIND_APPEARANCE);
            row.appearance = match &appearance_property.value {
                AppearanceValue::Inline(appearance) => {
                    match self.cached(ObjectKind::Appearance, &appearance.object_id) {
                        Some(existing) => Some(Target::Handle(existing)),
                        None => Some(Target::Handle(self.plan_appearance(appearance, &owner, rows)?)),
                    }
                }
                AppearanceValue::Reference(target) => {
                    row.reference = Some(target.to_string());
                    self.link_or_defer(ObjectKind::Appearance, target, &owner, property, deferred)
                }
            };
            rows.push(Pending {
                owner: owner.clone(),
                row: Row::Property(row),
            });
            seq += 1;
        }

        for child_property in &feature.children {
            let property = self.allocate();
            let mut row = PropertyRow::new(property, handle, seq, &child_property.name, KIND_FEATURE);
            match &child_property.value {
                FeatureValue::Inline(child) => {
                    let child = self.plan_feature(child, lineage, rows, deferred)?;
                    row.feature_ref = Some(Target::Handle(child));
                    row.relation = Some(RELATION_CONTAINS);
                }
                FeatureValue::Reference(target) => {
                    row.relation = Some(RELATION_REFERENCES);
                    row.reference = Some(target.to_string());
                    row.feature_ref =
                        self.link_or_defer(ObjectKind::Feature, target, &owner, property, deferred);
                }
            }
            rows.push(Pending {
                owner: owner.clone(),
                row: Row::Property(row),
            });
            seq += 1;
        }

        Ok(handle)
    }

    /// Links to a row already seen in this session, or defers the reference
    /// until the root is complete.
    fn link_or_defer(
        &self,
        kind: ObjectKind,
        target: &ObjectId,
        owner: &ObjectId,
        property: Handle,
        deferred: &mut Vec<Deferred>,
    ) -> Option<Target> {
        if let Some(handle) = self.cached(kind, target) {
            return Some(Target::Handle(handle));
        }
        deferred.push(Deferred {
            owner: owner.clone(),
            property,
            kind,
            object_id: target.clone(),
        });
        None
    }

    fn plan_geometry(
        &mut self,
        geometry: &Geometry,
        feature: Option<Handle>,
        owner: &ObjectId,
        rows: &mut Vec<Pending>,
    ) -> Handle {
        if let Some(object_id) = &geometry.object_id {
            if let Some(handle) = self.cached(ObjectKind::Geometry, object_id) {
                return handle;
            }
        }

        let handle = self.allocate();
        if let Some(object_id) = &geometry.object_id {
            self.cache
                .insert((ObjectKind::Geometry, object_id.clone()), handle);
        }
        rows.push(Pending {
            owner: owner.clone(),
            row: Row::Geometry(GeometryRow {
                handle,
                object_id: geometry.object_id.as_ref().map(ToString::to_string),
                geometry_type: geometry.kind.as_str(),
                coordinates: geometry.coordinates.to_string(),
                feature,
                envelope: geometry.envelope(),
            }),
        });
        handle
    }

    fn plan_implicit_geometry(
        &mut self,
        template: &ImplicitGeometry,
        owner: &ObjectId,
        rows: &mut Vec<Pending>,
    ) -> Handle {
        let relative_geometry = template
            .geometry
            .as_ref()
            .map(|geometry| self.plan_geometry(geometry, None, owner, rows));
        let handle = self.allocate();
        self.cache.insert(
            (ObjectKind::ImplicitGeometry, template.object_id.clone()),
            handle,
        );
        rows.push(Pending {
            owner: owner.clone(),
            row: Row::ImplicitGeometry(ImplicitGeometryRow {
                handle,
                object_id: template.object_id.to_string(),
                mime_type: template.mime_type.clone(),
                library_object: template.library_object.clone(),
                relative_geometry,
            }),
        });
        handle
    }

    fn plan_appearance(
        &mut self,
        appearance: &Appearance,
        owner: &ObjectId,
        rows: &mut Vec<Pending>,
    ) -> ModelResult<Handle> {
        let surface_data = serde_json::to_string(&appearance.surface_data)
            .map_err(|err| ModelError::Corrupt(err.to_string()))?;
        let handle = self.allocate();
        self.cache
            .insert((ObjectKind::Appearance, appearance.object_id.clone()), handle);
        rows.push(Pending {
            owner: owner.clone(),
            row: Row::Appearance(AppearanceRow {
                handle,
                object_id: appearance.object_id.to_string(),
                theme: appearance.theme.clone(),
                surface_data,
            }),
        });
        Ok(handle)
    }

    /// Session cache first, then the database by object id.
    async fn resolve(&mut self, kind: ObjectKind, object_id: &ObjectId) -> OperationResult<Option<Target>> {
        if let Some(handle) = self.cached(kind, object_id) {
            return Ok(Some(Target::Handle(handle)));
        }
        let sql = format!(
            "SELECT id FROM {} WHERE objectid = ? ORDER BY id LIMIT 1",
            kind.table()
        );
        let key: Option<i64> = sqlx::query_scalar(&sql)
            .bind(object_id.as_str())
            .fetch_optional(&mut *self.connection)
            .await?;
        Ok(key.map(Target::Key))
    }

    async fn existing_feature(&mut self, object_id: &ObjectId) -> OperationResult<Option<i64>> {
        if let Some(key) = self
            .cached(ObjectKind::Feature, object_id)
            .and_then(|handle| self.key(handle))
        {
            return Ok(Some(key));
        }
        match self.resolve(ObjectKind::Feature, object_id).await? {
            Some(Target::Key(key)) => Ok(Some(key)),
            _ => Ok(None),
        }
    }

    /// Drops queued rows and forgets cached handles that never got a key.
    /// Drops queued rows and the handles allocated for them from
    /// `first_handle` on. Handles whose rows were already flushed stay.
    fn discard_unflushed(&mut self, first_handle: usize) {
        self.pending.clear();
        let flushed = self
            .keys
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |index| index + 1);
        self.keys.truncate(first_handle.max(flushed));
        let keys = &self.keys;
        self.cache
            .retain(|_, handle| keys.get(handle.0).copied().flatten().is_some());
    }

    async fn flush(&mut self) -> OperationResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.options.cancellation.is_cancelled() {
            return Err(OperationError::Cancelled);
        }

        let batch = self.report.batches;
        let mut retry = Retry::new(&self.options.retry);
        let assigned = loop {
            match write_batch(&mut self.connection, &self.pending, &self.keys, batch).await {
                Ok(assigned) => break assigned,
                Err(err) => match retry.next_delay(&err) {
                    Some(delay) => {
                        warn!(batch, error = %err, ?delay, "retrying import batch");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        };

        for (handle, key) in assigned {
            self.keys[handle.0] = Some(key);
        }
        debug!(batch, rows = self.pending.len(), "flushed import batch");
        self.pending.clear();
        self.report.batches += 1;
        Ok(())
    }
}

/// Writes all queued rows in one transaction and returns the keys assigned
/// to their handles.
async fn write_batch(
    connection: &mut SqliteConnection,
    rows: &[Pending],
    keys: &[Option<i64>],
    batch: usize,
) -> OperationResult<Vec<(Handle, i64)>> {
    let storage = |owner: &ObjectId, source: sqlx::Error| OperationError::Storage {
        batch,
        object_id: owner.to_string(),
        source,
    };
    let first_owner = rows.first().map(|pending| &pending.owner);

    let mut tx = connection.begin().await.map_err(|source| OperationError::Storage {
        batch,
        object_id: first_owner.map(ToString::to_string).unwrap_or_default(),
        source,
    })?;

    let mut assigned: HashMap<Handle, i64> = HashMap::with_capacity(rows.len());
    let mut order = Vec::with_capacity(rows.len());
    for pending in rows {
        let written = insert_row(&mut tx, &pending.row, keys, &assigned)
            .await
            .map_err(|source| storage(&pending.owner, source))?;
        if let Some((handle, key)) = written {
            assigned.insert(handle, key);
            order.push((handle, key));
        }
    }

    tx.commit().await.map_err(|source| OperationError::Storage {
        batch,
        object_id: first_owner.map(ToString::to_string).unwrap_or_default(),
        source,
    })?;
    Ok(order)
}

fn key_of(target: Option<Target>, keys: &[Option<i64>], assigned: &HashMap<Handle, i64>) -> Option<i64> {
    match target? {
        Target::Key(key) => Some(key),
        Target::Handle(handle) => keys
            .get(handle.0)
            .copied()
            .flatten()
            .or_else(|| assigned.get(&handle).copied()),
    }
}

fn envelope_columns(envelope: Option<Envelope>) -> [Option<f64>; 6] {
    match envelope {
        Some(Envelope { min, max }) => [
            Some(min[0]),
            Some(min[1]),
            Some(min[2]),
            Some(max[0]),
            Some(max[1]),
            Some(max[2]),
        ],
        None => [None; 6],
    }
}

async fn insert_row(
    connection: &mut SqliteConnection,
    row: &Row,
    keys: &[Option<i64>],
    assigned: &HashMap<Handle, i64>,
) -> Result<Option<(Handle, i64)>, sqlx::Error> {
    let handle_key = |handle: Option<Handle>| key_of(handle.map(Target::Handle), keys, assigned);

    match row {
        Row::Feature(feature) => {
            let [min_x, min_y, min_z, max_x, max_y, max_z] = envelope_columns(feature.envelope);
            let key: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO feature (
                    objectid, objectclass, lineage, creation_date, termination_date,
                    min_x, min_y, min_z, max_x, max_y, max_z
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(feature.object_id.as_str())
            .bind(feature.object_class.as_str())
            .bind(feature.lineage.as_deref())
            .bind(feature.creation_date.as_deref())
            .bind(feature.termination_date.as_deref())
            .bind(min_x)
            .bind(min_y)
            .bind(min_z)
            .bind(max_x)
            .bind(max_y)
            .bind(max_z)
            .fetch_one(&mut *connection)
            .await?;
            Ok(Some((feature.handle, key)))
        }
        Row::Geometry(geometry) => {
            let [min_x, min_y, min_z, max_x, max_y, max_z] = envelope_columns(geometry.envelope);
            let key: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO geometry_data (
                    objectid, geometry_type, coordinates, feature_id,
                    min_x, min_y, min_z, max_x, max_y, max_z
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(geometry.object_id.as_deref())
            .bind(geometry.geometry_type)
            .bind(geometry.coordinates.as_str())
            .bind(handle_key(geometry.feature))
            .bind(min_x)
            .bind(min_y)
            .bind(min_z)
            .bind(max_x)
            .bind(max_y)
            .bind(max_z)
            .fetch_one(&mut *connection)
            .await?;
            Ok(Some((geometry.handle, key)))
        }
        Row::ImplicitGeometry(template) => {
            let key: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO implicit_geometry (objectid, mime_type, library_object, relative_geometry_id)
                VALUES (?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(template.object_id.as_str())
            .bind(template.mime_type.as_deref())
            .bind(template.library_object.as_deref())
            .bind(handle_key(template.relative_geometry))
            .fetch_one(&mut *connection)
            .await?;
            Ok(Some((template.handle, key)))
        }
        Row::Appearance(appearance) => {
            let key: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO appearance (objectid, theme, surface_data)
                VALUES (?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(appearance.object_id.as_str())
            .bind(appearance.theme.as_deref())
            .bind(appearance.surface_data.as_str())
            .fetch_one(&mut *connection)
            .await?;
            Ok(Some((appearance.handle, key)))
        }
        Row::Property(property) => {
            let key: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO property (
                    feature_id, seq, namespace, name, datatype,
                    val_string, val_int, val_double, val_timestamp, val_uri, val_uom, val_codespace,
                    val_lod, val_geometry_id, val_implicitgeom_id, val_placement, val_appearance_id,
                    val_feature_id, val_relation_type, val_reference
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(handle_key(Some(property.feature)))
            .bind(property.seq)
            .bind(property.namespace.as_str())
            .bind(property.name.as_str())
            .bind(property.datatype)
            .bind(property.values.string.as_deref())
            .bind(property.values.int)
            .bind(property.values.double)
            .bind(property.values.timestamp.as_deref())
            .bind(property.values.uri.as_deref())
            .bind(property.values.uom.as_deref())
            .bind(property.values.code_space.as_deref())
            .bind(property.lod.as_deref())
            .bind(key_of(property.geometry, keys, assigned))
            .bind(key_of(property.implicit_geometry, keys, assigned))
            .bind(property.placement.as_deref())
            .bind(key_of(property.appearance, keys, assigned))
            .bind(key_of(property.feature_ref, keys, assigned))
            .bind(property.relation)
            .bind(property.reference.as_deref())
            .fetch_one(&mut *connection)
            .await?;
            Ok(Some((property.handle, key)))
        }
        Row::Link {
            property,
            kind,
            target,
        } => {
            let sql = format!("UPDATE property SET {} = ? WHERE id = ?", kind.property_column());
            sqlx::query(&sql)
                .bind(key_of(Some(*target), keys, assigned))
                .bind(handle_key(Some(*property)))
                .execute(&mut *connection)
                .await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{create_sqlite_pool, run_migrations};

    async fn adapter() -> SqliteAdapter {
        let path = std::env::temp_dir().join(format!("citydb-importer-{}.db", Uuid::now_v7()));
        let pool = create_sqlite_pool(&format!("sqlite://{}", path.display()), 1)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteAdapter::new(pool, 100)
    }

    fn building(object_id: &str) -> Feature {
        Feature::new(object_id, QualifiedName::new("bldg", "Building")).with_geometry(
            QualifiedName::new("bldg", "lod1MultiSurface"),
            Some("1"),
            Geometry::multi_surface(&[vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 0.0, 0.0],
            ]]),
        )
    }

    #[tokio::test]
    async fn failed_root_releases_its_handles() {
        let adapter = adapter().await;
        let mut importer = Importer::new(&adapter, ImportOptions::default())
            .await
            .unwrap();

        let dangling = building("b-0")
            .with_reference(QualifiedName::new("bldg", "relatedTo"), "missing");
        assert!(importer.import(&dangling).await.is_err());
        assert!(importer.keys.is_empty());
        assert!(importer.cache.is_empty());

        importer.import(&building("b-1")).await.unwrap();
        let kept = importer.keys.len();
        assert!(kept > 0);
        assert!(importer.keys.iter().all(Option::is_some));

        let dangling = building("b-2")
            .with_reference(QualifiedName::new("bldg", "relatedTo"), "missing");
        assert!(importer.import(&dangling).await.is_err());
        assert_eq!(importer.keys.len(), kept);
        assert!(importer.cached(ObjectKind::Feature, &ObjectId::new("b-1")).is_some());
        assert!(importer.cached(ObjectKind::Feature, &ObjectId::new("b-2")).is_none());
    }
}
