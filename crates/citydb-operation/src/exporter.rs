//! Rebuilds features from the relational layout.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use citydb_core::{
    parse_timestamp, AdapterMetadata, Appearance, AppearanceProperty, AppearanceValue, Attribute,
    CoreError, DataType, Feature, FeatureProperty, FeatureValue, Geometry, GeometryProperty,
    GeometryType, GeometryValue, ImplicitGeometry, ImplicitGeometryProperty,
    ImplicitGeometryValue, LodFilter, ModelError, ModelResult, ObjectId, QualifiedName,
    SurfaceData,
};
use citydb_query::CompiledQuery;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::{debug, info, warn};

use crate::adapter::{DatabaseAdapter, SqliteAdapter};
use crate::error::{OperationError, OperationResult};
use crate::options::ExportOptions;
use crate::report::OperationReport;
use crate::rows::{
    Placement, ValueColumns, KIND_APPEARANCE, KIND_FEATURE, KIND_GEOMETRY, KIND_IMPLICIT_GEOMETRY,
    RELATION_CONTAINS,
};
use crate::util::bind_params;

#[derive(Debug)]
struct FeatureRecord {
    object_id: String,
    object_class: String,
    lineage: Option<String>,
    creation_date: Option<String>,
    termination_date: Option<String>,
}

#[derive(Debug)]
struct PropertyRecord {
    namespace: String,
    name: String,
    datatype: String,
    values: ValueColumns,
    lod: Option<String>,
    geometry_id: Option<i64>,
    implicit_geometry_id: Option<i64>,
    placement: Option<String>,
    appearance_id: Option<i64>,
    feature_id: Option<i64>,
    relation: Option<i64>,
    reference: Option<String>,
    target_object_id: Option<String>,
}

impl PropertyRecord {
    fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(self.namespace.as_str(), self.name.as_str())
    }

    fn contains_child(&self) -> bool {
        self.datatype == KIND_FEATURE && self.relation == Some(RELATION_CONTAINS)
    }

    /// Object id of the referenced target, preferring the live row.
    fn target(&self, live: Option<&str>) -> Option<ObjectId> {
        live.or(self.reference.as_deref()).map(ObjectId::from)
    }
}

#[derive(Debug)]
struct GeometryRecord {
    object_id: Option<String>,
    geometry_type: String,
    coordinates: String,
    feature_id: Option<i64>,
}

#[derive(Debug)]
struct ImplicitGeometryRecord {
    object_id: String,
    mime_type: Option<String>,
    library_object: Option<String>,
    relative_geometry_id: Option<i64>,
}

#[derive(Debug)]
struct AppearanceRecord {
    object_id: String,
    theme: Option<String>,
    surface_data: String,
}

/// Rows of one root feature and its contained children.
#[derive(Debug, Default)]
struct Subtree {
    features: HashMap<i64, FeatureRecord>,
    properties: HashMap<i64, Vec<PropertyRecord>>,
    geometries: HashMap<i64, GeometryRecord>,
    implicit_geometries: HashMap<i64, ImplicitGeometryRecord>,
    appearances: HashMap<i64, AppearanceRecord>,
}

/// Reads features through one dedicated connection.
pub struct Exporter<'a, A: DatabaseAdapter = SqliteAdapter> {
    adapter: &'a A,
    connection: PoolConnection<Sqlite>,
    options: ExportOptions,
    report: OperationReport,
}

impl<'a, A: DatabaseAdapter> Exporter<'a, A> {
    pub async fn new(adapter: &'a A, options: ExportOptions) -> OperationResult<Self> {
        let connection = adapter.connection().await?;
        Ok(Self {
            adapter,
            connection,
            options,
            report: OperationReport::default(),
        })
    }

    #[must_use]
    pub fn report(&self) -> &OperationReport {
        &self.report
    }

    /// Runs a compiled query and returns the selected feature ids in order.
    pub async fn query_ids(&mut self, query: &CompiledQuery) -> OperationResult<Vec<i64>> {
        let ids = bind_params(sqlx::query_scalar::<_, i64>(&query.sql), &query.params)
            .fetch_all(&mut *self.connection)
            .await?;
        debug!(count = ids.len(), "query selected features");
        Ok(ids)
    }

    /// Rebuilds one root feature with its contained children.
    pub async fn export_feature(&mut self, id: i64, lod_filter: &LodFilter) -> OperationResult<Feature> {
        let max_depth = lod_filter
            .search_depth()
            .map_or(self.options.max_hierarchy_depth, |depth| {
                depth.min(self.options.max_hierarchy_depth)
            });
        let subtree = match load_subtree(&mut self.connection, id, max_depth).await {
            Ok(subtree) => subtree,
            Err(source) if is_decode_error(&source) => {
                let err = OperationError::model(id, ModelError::Corrupt(source.to_string()));
                self.report.record_failure(&err);
                return Err(err);
            }
            Err(source) => return Err(source.into()),
        };
        let Some(root) = subtree.features.get(&id) else {
            let err = OperationError::from(CoreError::not_found("feature", id.to_string()));
            self.report.record_failure(&err);
            return Err(err);
        };
        let root_object_id = root.object_id.clone();

        let result = Assembler::new(&subtree, lod_filter)
            .and_then(|mut assembler| assembler.feature(id))
            .and_then(|feature| {
                self.adapter.registry().finish(&feature)?;
                Ok(feature)
            });

        match result {
            Ok(feature) => {
                self.report.succeeded += 1;
                Ok(feature)
            }
            Err(source) => {
                let err = OperationError::model(root_object_id, source);
                self.report.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Streams every feature selected by `query` to `sink`. Features that
    /// cannot be rebuilt are reported and skipped. Returns the number of
    /// features handed to `sink`.
    pub async fn export<F>(
        &mut self,
        query: &CompiledQuery,
        lod_filter: &LodFilter,
        mut sink: F,
    ) -> OperationResult<usize>
    where
        F: FnMut(Feature),
    {
        let ids = self.query_ids(query).await?;
        let mut exported = 0;
        for id in ids {
            if self.options.cancellation.is_cancelled() {
                return Err(OperationError::Cancelled);
            }
            match self.export_feature(id, lod_filter).await {
                Ok(feature) => {
                    sink(feature);
                    exported += 1;
                }
                Err(err) if err.is_object_fault() => {
                    warn!(id, error = %err, "skipping feature that cannot be exported");
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            exported,
            failed = self.report.failed,
            "export finished"
        );
        Ok(exported)
    }

    /// Releases the connection and returns the run report.
    #[must_use]
    pub fn close(self) -> OperationReport {
        self.report
    }
}

/// Row data that exists but cannot be read as the expected column type.
fn is_decode_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_)
    )
}

/// Loads the rows of `root` and of contained children up to `max_depth`
/// levels below it.
async fn load_subtree(
    connection: &mut SqliteConnection,
    root: i64,
    max_depth: u32,
) -> Result<Subtree, sqlx::Error> {
    let mut subtree = Subtree::default();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([(root, 0u32)]);

    while let Some((id, depth)) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let Some(record) = load_feature(connection, id).await? else {
            continue;
        };
        let properties = load_properties(connection, id).await?;
        if depth < max_depth {
            for property in properties.iter().filter(|property| property.contains_child()) {
                if let Some(child) = property.feature_id {
                    if !visited.contains(&child) {
                        queue.push_back((child, depth + 1));
                    }
                }
            }
        }
        subtree.features.insert(id, record);
        subtree.properties.insert(id, properties);
    }

    let all_properties = || subtree.properties.values().flatten();
    let implicit_ids: BTreeSet<i64> = all_properties()
        .filter_map(|property| property.implicit_geometry_id)
        .collect();
    let appearance_ids: BTreeSet<i64> = all_properties()
        .filter_map(|property| property.appearance_id)
        .collect();
    let mut geometry_ids: BTreeSet<i64> = all_properties()
        .filter_map(|property| property.geometry_id)
        .collect();

    let implicit_geometries = load_by_ids(
        connection,
        "SELECT id, objectid, mime_type, library_object, relative_geometry_id FROM implicit_geometry",
        &implicit_ids,
        |row| {
            Ok(ImplicitGeometryRecord {
                object_id: row.try_get("objectid")?,
                mime_type: row.try_get("mime_type")?,
                library_object: row.try_get("library_object")?,
                relative_geometry_id: row.try_get("relative_geometry_id")?,
            })
        },
    )
    .await?;
    geometry_ids.extend(
        implicit_geometries
            .values()
            .filter_map(|template| template.relative_geometry_id),
    );

    subtree.geometries = load_by_ids(
        connection,
        "SELECT id, objectid, geometry_type, coordinates, feature_id FROM geometry_data",
        &geometry_ids,
        |row| {
            Ok(GeometryRecord {
                object_id: row.try_get("objectid")?,
                geometry_type: row.try_get("geometry_type")?,
                coordinates: row.try_get("coordinates")?,
                feature_id: row.try_get("feature_id")?,
            })
        },
    )
    .await?;
    subtree.implicit_geometries = implicit_geometries;
    subtree.appearances = load_by_ids(
        connection,
        "SELECT id, objectid, theme, surface_data FROM appearance",
        &appearance_ids,
        |row| {
            Ok(AppearanceRecord {
                object_id: row.try_get("objectid")?,
                theme: row.try_get("theme")?,
                surface_data: row.try_get("surface_data")?,
            })
        },
    )
    .await?;

    debug!(
        root,
        features = subtree.features.len(),
        geometries = subtree.geometries.len(),
        "loaded feature subtree"
    );
    Ok(subtree)
}

async fn load_feature(
    connection: &mut SqliteConnection,
    id: i64,
) -> Result<Option<FeatureRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT objectid, objectclass, lineage, creation_date, termination_date
          FROM feature
         WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *connection)
    .await?;

    row.map(|row| {
        Ok::<_, sqlx::Error>(FeatureRecord {
            object_id: row.try_get("objectid")?,
            object_class: row.try_get("objectclass")?,
            lineage: row.try_get("lineage")?,
            creation_date: row.try_get("creation_date")?,
            termination_date: row.try_get("termination_date")?,
        })
    })
    .transpose()
}

async fn load_properties(
    connection: &mut SqliteConnection,
    feature_id: i64,
) -> Result<Vec<PropertyRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT p.namespace, p.name, p.datatype,
               p.val_string, p.val_int, p.val_double, p.val_timestamp, p.val_uri, p.val_uom,
               p.val_codespace, p.val_lod, p.val_geometry_id, p.val_implicitgeom_id,
               p.val_placement, p.val_appearance_id, p.val_feature_id, p.val_relation_type,
               p.val_reference, t.objectid AS target_objectid
          FROM property p
     LEFT JOIN feature t ON t.id = p.val_feature_id
         WHERE p.feature_id = ?
      ORDER BY p.seq, p.id
        "#,
    )
    .bind(feature_id)
    .fetch_all(&mut *connection)
    .await?;

    rows.iter().map(map_property).collect()
}

fn map_property(row: &SqliteRow) -> Result<PropertyRecord, sqlx::Error> {
    Ok(PropertyRecord {
        namespace: row.try_get("namespace")?,
        name: row.try_get("name")?,
        datatype: row.try_get("datatype")?,
        values: ValueColumns::from_row(row)?,
        lod: row.try_get("val_lod")?,
        geometry_id: row.try_get("val_geometry_id")?,
        implicit_geometry_id: row.try_get("val_implicitgeom_id")?,
        placement: row.try_get("val_placement")?,
        appearance_id: row.try_get("val_appearance_id")?,
        feature_id: row.try_get("val_feature_id")?,
        relation: row.try_get("val_relation_type")?,
        reference: row.try_get("val_reference")?,
        target_object_id: row.try_get("target_objectid")?,
    })
}

/// Loads the rows of `table_query` whose `id` is in `ids`, keyed by id.
async fn load_by_ids<T, F>(
    connection: &mut SqliteConnection,
    table_query: &str,
    ids: &BTreeSet<i64>,
    map: F,
) -> Result<HashMap<i64, T>, sqlx::Error>
where
    F: Fn(&SqliteRow) -> Result<T, sqlx::Error>,
{
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new(table_query);
    builder.push(" WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(&mut *connection).await?;
    rows.iter()
        .map(|row| Ok::<_, sqlx::Error>((row.try_get("id")?, map(row)?)))
        .collect()
}

/// Turns the loaded rows of one subtree into the feature model. Shared
/// templates and appearances are built once and handed out as clones of
/// the same `Arc`.
struct Assembler<'s> {
    subtree: &'s Subtree,
    lod_filter: &'s LodFilter,
    geometries: HashMap<i64, Geometry>,
    implicit_geometries: HashMap<i64, Arc<ImplicitGeometry>>,
    appearances: HashMap<i64, Arc<Appearance>>,
    assembled: HashSet<i64>,
}

impl<'s> Assembler<'s> {
    fn new(subtree: &'s Subtree, lod_filter: &'s LodFilter) -> ModelResult<Self> {
        let geometries = subtree
            .geometries
            .iter()
            .map(|(id, record)| Ok((*id, parse_geometry(record)?)))
            .collect::<ModelResult<HashMap<_, _>>>()?;

        let implicit_geometries = subtree
            .implicit_geometries
            .iter()
            .map(|(id, record)| {
                let template = ImplicitGeometry {
                    object_id: ObjectId::from(record.object_id.as_str()),
                    mime_type: record.mime_type.clone(),
                    library_object: record.library_object.clone(),
                    geometry: record
                        .relative_geometry_id
                        .and_then(|geometry| geometries.get(&geometry).cloned()),
                };
                (*id, Arc::new(template))
            })
            .collect();

        let appearances = subtree
            .appearances
            .iter()
            .map(|(id, record)| {
                let surface_data: Vec<SurfaceData> = serde_json::from_str(&record.surface_data)
                    .map_err(|err| {
                        ModelError::Corrupt(format!(
                            "surface data of appearance `{}`: {err}",
                            record.object_id
                        ))
                    })?;
                let appearance = Appearance {
                    object_id: ObjectId::from(record.object_id.as_str()),
                    theme: record.theme.clone(),
                    surface_data,
                };
                Ok((*id, Arc::new(appearance)))
            })
            .collect::<ModelResult<HashMap<_, _>>>()?;

        Ok(Self {
            subtree,
            lod_filter,
            geometries,
            implicit_geometries,
            appearances,
            assembled: HashSet::new(),
        })
    }

    fn feature(&mut self, id: i64) -> ModelResult<Feature> {
        self.assembled.insert(id);
        let subtree = self.subtree;
        let record = subtree
            .features
            .get(&id)
            .ok_or_else(|| ModelError::Corrupt(format!("feature row {id} is missing")))?;

        let feature_type: QualifiedName = record
            .object_class
            .parse()
            .map_err(ModelError::UnknownFeatureType)?;
        let mut feature = Feature::new(record.object_id.as_str(), feature_type);
        feature.lineage = record.lineage.clone();
        feature.creation_date = record.creation_date.as_deref().map(timestamp).transpose()?;
        feature.termination_date = record.termination_date.as_deref().map(timestamp).transpose()?;

        let properties = subtree.properties.get(&id).map(Vec::as_slice).unwrap_or_default();
        for property in properties {
            match property.datatype.as_str() {
                KIND_GEOMETRY => {
                    if !self.lod_filter.accepts(property.lod.as_deref()) {
                        continue;
                    }
                    if let Some(value) = self.geometry_value(id, property)? {
                        feature.geometries.push(GeometryProperty {
                            name: property.qualified_name(),
                            lod: property.lod.clone(),
                            value,
                        });
                    }
                }
                KIND_IMPLICIT_GEOMETRY => {
                    if !self.lod_filter.accepts(property.lod.as_deref()) {
                        continue;
                    }
                    feature
                        .implicit_geometries
                        .push(self.implicit_geometry_property(property)?);
                }
                KIND_APPEARANCE => {
                    let value = match property
                        .appearance_id
                        .and_then(|appearance| self.appearances.get(&appearance))
                    {
                        Some(appearance) => AppearanceValue::Inline(Arc::clone(appearance)),
                        None => AppearanceValue::Reference(dangling(property)?),
                    };
                    feature.appearances.push(AppearanceProperty {
                        name: property.qualified_name(),
                        value,
                    });
                }
                KIND_FEATURE => {
                    if let Some(value) = self.child_value(property)? {
                        feature.children.push(FeatureProperty {
                            name: property.qualified_name(),
                            value,
                        });
                    }
                }
                datatype => {
                    let data_type: DataType = datatype.parse().map_err(|()| {
                        ModelError::Corrupt(format!("unknown property datatype `{datatype}`"))
                    })?;
                    feature.attributes.push(Attribute {
                        name: property.qualified_name(),
                        value: property.values.decode(data_type)?,
                    });
                }
            }
        }

        Ok(feature)
    }

    /// Inline when the geometry row belongs to `owner`, otherwise a
    /// reference to its object id.
    fn geometry_value(&self, owner: i64, property: &PropertyRecord) -> ModelResult<Option<GeometryValue>> {
        let Some(geometry_id) = property.geometry_id else {
            return Ok(property
                .reference
                .as_deref()
                .map(|target| GeometryValue::Reference(ObjectId::from(target))));
        };
        let geometry = self
            .geometries
            .get(&geometry_id)
            .ok_or_else(|| ModelError::Corrupt(format!("geometry row {geometry_id} is missing")))?;
        let owned = self
            .subtree
            .geometries
            .get(&geometry_id)
            .map_or(true, |record| record.feature_id == Some(owner));

        let value = match &geometry.object_id {
            Some(object_id) if !owned => GeometryValue::Reference(object_id.clone()),
            _ => GeometryValue::Inline(geometry.clone()),
        };
        Ok(Some(value))
    }

    fn implicit_geometry_property(&self, property: &PropertyRecord) -> ModelResult<ImplicitGeometryProperty> {
        let value = match property
            .implicit_geometry_id
            .and_then(|template| self.implicit_geometries.get(&template))
        {
            Some(template) => ImplicitGeometryValue::Inline(Arc::clone(template)),
            None => ImplicitGeometryValue::Reference(dangling(property)?),
        };

        let placement = property
            .placement
            .as_deref()
            .map(serde_json::from_str::<Placement>)
            .transpose()
            .map_err(|err| ModelError::Corrupt(format!("implicit geometry placement: {err}")))?;
        let (transformation, reference_point) = match placement {
            Some(placement) => (placement.transformation_matrix()?, placement.reference_point),
            None => (None, None),
        };

        Ok(ImplicitGeometryProperty {
            name: property.qualified_name(),
            lod: property.lod.clone(),
            transformation,
            reference_point,
            value,
        })
    }

    fn child_value(&mut self, property: &PropertyRecord) -> ModelResult<Option<FeatureValue>> {
        let target = property.target(property.target_object_id.as_deref());
        if !property.contains_child() {
            return target.map(FeatureValue::Reference).map(Some).ok_or_else(|| {
                ModelError::Corrupt(format!("reference `{}` has no target", property.name))
            });
        }

        match property.feature_id {
            Some(child) if self.assembled.contains(&child) => Ok(target.map(FeatureValue::Reference)),
            Some(child) if self.subtree.features.contains_key(&child) => {
                Ok(Some(FeatureValue::Inline(Box::new(self.feature(child)?))))
            }
            // below the export depth or already deleted
            _ => Ok(None),
        }
    }
}

fn parse_geometry(record: &GeometryRecord) -> ModelResult<Geometry> {
    let kind = GeometryType::from_name(&record.geometry_type).ok_or_else(|| {
        ModelError::InvalidGeometry(format!("unknown geometry type `{}`", record.geometry_type))
    })?;
    let coordinates: serde_json::Value = serde_json::from_str(&record.coordinates)
        .map_err(|err| ModelError::InvalidGeometry(err.to_string()))?;
    let mut geometry = Geometry::new(kind, &coordinates)?;
    geometry.object_id = record.object_id.as_deref().map(ObjectId::from);
    Ok(geometry)
}

fn timestamp(text: &str) -> ModelResult<chrono::DateTime<chrono::Utc>> {
    parse_timestamp(text).map_err(|err| ModelError::Corrupt(format!("invalid timestamp `{text}`: {err}")))
}

/// Target object id of a property whose row link is gone.
fn dangling(property: &PropertyRecord) -> ModelResult<ObjectId> {
    property
        .reference
        .as_deref()
        .map(ObjectId::from)
        .ok_or_else(|| {
            ModelError::Corrupt(format!(
                "property `{}:{}` has no target",
                property.namespace, property.name
            ))
        })
}
