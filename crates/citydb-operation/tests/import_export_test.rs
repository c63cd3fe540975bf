mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use citydb_core::{
    AdapterMetadata, Appearance, AttributeSpec, DataType, Feature, FeatureTypeRegistry,
    FeatureValue, Geometry, GeometryProperty, GeometryValue, ImplicitGeometry,
    ImplicitGeometryProperty, ImplicitGeometryValue, ImportMode, LodFilter, ModelError,
    QualifiedName, SurfaceData, TypeConfig, Value,
};
use citydb_operation::{Cancellation, ExportOptions, Exporter, ImportOptions, Importer, OperationError};
use citydb_query::{CompiledQuery, Query};

use common::{bldg, building, count, gen, setup_adapter, setup_adapter_with, square, wall};

fn frn(name: &str) -> QualifiedName {
    QualifiedName::new("frn", name)
}

fn implicit_value(feature: &Feature) -> &ImplicitGeometryValue {
    &feature.implicit_geometries[0].value
}

#[tokio::test]
async fn import_and_export_round_trip() {
    let adapter = setup_adapter(100).await;
    let appearance = Arc::new(
        Appearance::new("app-1", Some("summer")).with_surface_data(SurfaceData::Material {
            diffuse_color: Some([0.8, 0.2, 0.2]),
            transparency: None,
            targets: vec!["wall-1".into()],
        }),
    );

    let mut original = building("b-1", &["2"])
        .with_attribute(bldg("yearOfConstruction"), Value::Integer(1990))
        .with_attribute(bldg("measuredHeight"), Value::measure(12.5, "m"))
        .with_attribute(bldg("function"), Value::code("1000"))
        .with_attribute(gen("heritage"), Value::Boolean(true))
        .with_attribute(gen("owner"), Value::String("city".into()))
        .with_appearance(appearance)
        .with_child(bldg("boundary"), wall("wall-1"));
    original.creation_date = Some(Utc.with_ymd_and_hms(2020, 1, 1, 8, 30, 0).unwrap());

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let key = importer.import(&original).await.expect("import");
    let report = importer.close().await.expect("close importer");
    assert_eq!(report.succeeded, 1);
    assert!(report.is_clean());

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(key, &LodFilter::new())
        .await
        .expect("export");
    assert_eq!(exported, original);
}

#[tokio::test]
async fn shared_implicit_geometry_is_written_once_and_exported_as_one_instance() {
    let adapter = setup_adapter(100).await;
    let template = Arc::new(ImplicitGeometry::new(
        "tpl-1",
        Some(Geometry::point([0.0, 0.0, 2.0])),
    ));
    let installation = |object_id: &str, origin: [f64; 3]| {
        Feature::new(object_id, bldg("BuildingInstallation")).with_implicit_geometry(
            ImplicitGeometryProperty::new(
                bldg("lod2ImplicitRepresentation"),
                Some("2"),
                ImplicitGeometryValue::Inline(Arc::clone(&template)),
            )
            .with_reference_point(origin),
        )
    };
    let feature = building("b-1", &[])
        .with_child(bldg("buildingInstallation"), installation("inst-1", [1.0, 1.0, 0.0]))
        .with_child(bldg("buildingInstallation"), installation("inst-2", [5.0, 1.0, 0.0]));

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let key = importer.import(&feature).await.expect("import");
    importer.close().await.expect("close importer");

    assert_eq!(count(adapter.pool(), "implicit_geometry").await, 1);
    assert_eq!(count(adapter.pool(), "geometry_data").await, 1);

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(key, &LodFilter::new())
        .await
        .expect("export");
    assert_eq!(exported, feature);

    let children: Vec<&Feature> = exported.child_features().collect();
    match (implicit_value(children[0]), implicit_value(children[1])) {
        (ImplicitGeometryValue::Inline(first), ImplicitGeometryValue::Inline(second)) => {
            assert!(Arc::ptr_eq(first, second));
        }
        other => panic!("expected inline templates, got {other:?}"),
    }
}

#[tokio::test]
async fn implicit_geometry_references_resolve_across_roots_and_documents() {
    let adapter = setup_adapter(100).await;
    let template = Arc::new(ImplicitGeometry::new(
        "tpl-bench",
        Some(Geometry::point([0.0, 0.0, 0.5])),
    ));
    let furniture = |object_id: &str, value: ImplicitGeometryValue| {
        Feature::new(object_id, frn("CityFurniture")).with_implicit_geometry(
            ImplicitGeometryProperty::new(frn("lod2ImplicitRepresentation"), Some("2"), value)
                .with_reference_point([3.0, 4.0, 0.0]),
        )
    };

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    importer
        .import(&furniture("bench-1", ImplicitGeometryValue::Inline(template)))
        .await
        .expect("import template owner");
    importer
        .import(&furniture("bench-2", ImplicitGeometryValue::Reference("tpl-bench".into())))
        .await
        .expect("reference resolved from session cache");
    importer.end_document();
    let third = importer
        .import(&furniture("bench-3", ImplicitGeometryValue::Reference("tpl-bench".into())))
        .await
        .expect("reference resolved from database");
    importer.close().await.expect("close importer");

    assert_eq!(count(adapter.pool(), "implicit_geometry").await, 1);

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(third, &LodFilter::new())
        .await
        .expect("export");
    match implicit_value(&exported) {
        ImplicitGeometryValue::Inline(template) => {
            assert_eq!(template.object_id.as_str(), "tpl-bench");
            assert_eq!(template.geometry, Some(Geometry::point([0.0, 0.0, 0.5])));
        }
        other => panic!("expected inline template, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_flushes_when_queued_rows_reach_maximum() {
    let adapter = setup_adapter(4).await;
    let with_attributes = |object_id: &str, attributes: usize| {
        (0..attributes).fold(building(object_id, &[]), |feature, index| {
            feature.with_attribute(gen(&format!("a{index}")), Value::Integer(index as i64))
        })
    };

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");

    // one feature row plus three property rows
    importer
        .import(&with_attributes("b-1", 3))
        .await
        .expect("import b-1");
    assert_eq!(importer.report().batches, 1);

    // five rows with a maximum of four
    importer
        .import(&with_attributes("b-2", 4))
        .await
        .expect("import b-2");
    assert_eq!(importer.report().batches, 3);

    let report = importer.close().await.expect("close importer");
    assert_eq!(report.batches, 3);
    assert_eq!(count(adapter.pool(), "property").await, 7);
}

#[tokio::test]
async fn forward_geometry_reference_within_root_is_resolved() {
    let adapter = setup_adapter(100).await;
    let shared = square(0.0, 3.0).with_object_id("geom-shared");
    let first = Feature::new("wall-1", bldg("WallSurface")).with_geometry_property(
        GeometryProperty::reference(bldg("lod2MultiSurface"), Some("2"), "geom-shared"),
    );
    let second = Feature::new("wall-2", bldg("WallSurface")).with_geometry(
        bldg("lod2MultiSurface"),
        Some("2"),
        shared.clone(),
    );
    let feature = building("b-1", &[])
        .with_child(bldg("boundary"), first)
        .with_child(bldg("boundary"), second);

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let key = importer.import(&feature).await.expect("import");
    importer.close().await.expect("close importer");

    assert_eq!(count(adapter.pool(), "geometry_data").await, 1);
    let linked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM property WHERE val_geometry_id IS NOT NULL",
    )
    .fetch_one(adapter.pool())
    .await
    .expect("count links");
    assert_eq!(linked, 2);

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(key, &LodFilter::new())
        .await
        .expect("export");
    assert_eq!(exported, feature);
}

#[tokio::test]
async fn unresolved_reference_fails_root_and_session_continues() {
    let adapter = setup_adapter(100).await;
    let dangling = building("b-1", &["1"]).with_reference(bldg("relatedTo"), "missing");

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let err = importer.import(&dangling).await.unwrap_err();
    assert!(matches!(
        err,
        OperationError::UnresolvedReference { ref object_id, ref referenced_by }
            if object_id == "missing" && referenced_by == "b-1"
    ));

    importer
        .import(&building("b-2", &["1"]))
        .await
        .expect("next root imports");
    let report = importer.close().await.expect("close importer");
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(
        report.first_fault.and_then(|fault| fault.object_id).as_deref(),
        Some("b-1")
    );
    assert_eq!(count(adapter.pool(), "feature").await, 1);
}

#[tokio::test]
async fn references_to_earlier_roots_are_linked() {
    let adapter = setup_adapter(100).await;
    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let target = importer
        .import(&building("b-1", &["1"]))
        .await
        .expect("import target");
    let source = importer
        .import(&building("b-2", &["1"]).with_reference(bldg("relatedTo"), "b-1"))
        .await
        .expect("import source");
    importer.close().await.expect("close importer");

    let linked: Option<i64> = sqlx::query_scalar(
        "SELECT val_feature_id FROM property WHERE feature_id = ? AND name = 'relatedTo'",
    )
    .bind(source)
    .fetch_one(adapter.pool())
    .await
    .expect("reference row");
    assert_eq!(linked, Some(target));

    // a reference does not make the target a child
    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let query = Query::new()
        .compile(adapter.schema_mapping())
        .expect("compile");
    assert_eq!(exporter.query_ids(&query).await.expect("ids"), vec![target, source]);
}

#[tokio::test]
async fn invalid_feature_is_reported_and_skipped() {
    let adapter = setup_adapter(100).await;
    let invalid = building("b-1", &[]).with_attribute(bldg("colour"), Value::String("red".into()));

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let err = importer.import(&invalid).await.unwrap_err();
    assert!(matches!(
        err,
        OperationError::Model {
            source: ModelError::UndeclaredProperty { .. },
            ..
        }
    ));
    importer
        .import(&building("b-2", &[]))
        .await
        .expect("session continues");

    let report = importer.close().await.expect("close importer");
    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert_eq!(count(adapter.pool(), "feature").await, 1);
}

#[tokio::test]
async fn skip_existing_reuses_stored_feature() {
    let adapter = setup_adapter(100).await;
    let options = ImportOptions::default().with_mode(ImportMode::SkipExisting);

    let mut importer = Importer::new(&adapter, options.clone())
        .await
        .expect("importer");
    let first = importer
        .import(&building("b-1", &["1"]))
        .await
        .expect("first import");
    let again = importer
        .import(&building("b-1", &["1"]))
        .await
        .expect("skipped in session");
    assert_eq!(first, again);
    importer.close().await.expect("close importer");

    let mut importer = Importer::new(&adapter, options).await.expect("importer");
    let later = importer
        .import(&building("b-1", &["2"]))
        .await
        .expect("skipped from database");
    let report = importer.close().await.expect("close importer");

    assert_eq!(later, first);
    assert_eq!(report.skipped, 1);
    assert_eq!(count(adapter.pool(), "feature").await, 1);
}

#[tokio::test]
async fn lineage_template_is_applied_once_per_session() {
    let adapter = setup_adapter(100).await;
    let options = ImportOptions::default()
        .with_lineage("@file@ session @session@")
        .with_source_file("city.gml");

    let mut importer = Importer::new(&adapter, options).await.expect("importer");
    let session = importer.session();
    let plain = importer
        .import(&building("b-1", &[]))
        .await
        .expect("import");
    let mut own = building("b-2", &[]);
    own.lineage = Some("survey 2019".into());
    let kept = importer.import(&own).await.expect("import");
    importer.close().await.expect("close importer");

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let plain = exporter
        .export_feature(plain, &LodFilter::new())
        .await
        .expect("export");
    let kept = exporter
        .export_feature(kept, &LodFilter::new())
        .await
        .expect("export");
    assert_eq!(plain.lineage, Some(format!("city.gml session {session}")));
    assert_eq!(kept.lineage.as_deref(), Some("survey 2019"));
}

#[tokio::test]
async fn cancelled_import_writes_nothing() {
    let adapter = setup_adapter(100).await;
    let cancellation = Cancellation::new();
    let mut importer = Importer::new(
        &adapter,
        ImportOptions::default().with_cancellation(cancellation.clone()),
    )
    .await
    .expect("importer");

    cancellation.cancel();
    let err = importer.import(&building("b-1", &[])).await.unwrap_err();
    assert!(matches!(err, OperationError::Cancelled));
    assert_eq!(count(adapter.pool(), "feature").await, 0);
}

#[tokio::test]
async fn export_drops_geometry_of_unselected_lods() {
    let adapter = setup_adapter(100).await;
    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let key = importer
        .import(&building("b-1", &["1", "2"]))
        .await
        .expect("import");
    importer.close().await.expect("close importer");

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(key, &LodFilter::new().with_lods(["2"]))
        .await
        .expect("export");
    assert_eq!(exported.geometries.len(), 1);
    assert_eq!(exported.geometries[0].lod.as_deref(), Some("2"));
    assert!(matches!(exported.geometries[0].value, GeometryValue::Inline(_)));
}

#[tokio::test]
async fn export_depth_limits_contained_children() {
    let adapter = setup_adapter(100).await;
    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let key = importer
        .import(&building("b-1", &["1"]).with_child(bldg("boundary"), wall("wall-1")))
        .await
        .expect("import");
    importer.close().await.expect("close importer");

    let mut exporter = Exporter::new(
        &adapter,
        ExportOptions::default().with_max_hierarchy_depth(0),
    )
    .await
    .expect("exporter");
    let exported = exporter
        .export_feature(key, &LodFilter::new())
        .await
        .expect("export");
    assert!(exported.children.is_empty());
    assert_eq!(exported.geometries.len(), 1);
}

static STRICT: &[TypeConfig] = &[TypeConfig {
    namespace: "test",
    name: "Strict",
    top_level: true,
    lods: &["1"],
    attributes: &[AttributeSpec::required("name", DataType::String)],
    geometries: &[],
    implicit_geometries: &[],
    children: &[],
    appearances: false,
}];

#[tokio::test]
async fn export_reports_missing_required_attribute_and_skips_root() {
    let adapter = setup_adapter_with(FeatureTypeRegistry::from_configs(STRICT)).await;
    let strict = |object_id: &str| {
        Feature::new(object_id, QualifiedName::new("test", "Strict"))
            .with_attribute(QualifiedName::new("test", "name"), Value::String(object_id.into()))
    };

    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let broken = importer.import(&strict("s-1")).await.expect("import s-1");
    importer.import(&strict("s-2")).await.expect("import s-2");
    importer.close().await.expect("close importer");

    sqlx::query("DELETE FROM property WHERE feature_id = ?")
        .bind(broken)
        .execute(adapter.pool())
        .await
        .expect("remove attribute");

    let query = Query::new()
        .compile(adapter.schema_mapping())
        .expect("compile");
    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let mut exported = Vec::new();
    let handed_out = exporter
        .export(&query, &LodFilter::new(), |feature| exported.push(feature))
        .await
        .expect("export");

    assert_eq!(handed_out, 1);
    assert_eq!(exported[0].object_id.as_str(), "s-2");
    let report = exporter.close();
    assert_eq!((report.succeeded, report.failed), (1, 1));
    let fault = report.first_fault.expect("fault recorded");
    assert_eq!(fault.object_id.as_deref(), Some("s-1"));
    assert!(fault.message.contains("requires attribute `name`"));
}

#[tokio::test]
async fn export_skips_vanished_and_unreadable_roots() {
    let adapter = setup_adapter(100).await;
    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let unreadable = importer.import(&building("b-1", &["1"])).await.expect("import b-1");
    let readable = importer.import(&building("b-2", &["1"])).await.expect("import b-2");
    importer.close().await.expect("close importer");

    sqlx::query("UPDATE feature SET lineage = X'00' WHERE id = ?")
        .bind(unreadable)
        .execute(adapter.pool())
        .await
        .expect("corrupt lineage");

    // id 0 was selected but no longer exists when it is rebuilt
    let query = CompiledQuery {
        sql: "SELECT 0 UNION ALL SELECT id FROM feature ORDER BY 1".to_string(),
        params: Vec::new(),
    };
    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let mut exported = Vec::new();
    let handed_out = exporter
        .export(&query, &LodFilter::new(), |feature| exported.push(feature))
        .await
        .expect("export continues past faulty roots");

    assert_eq!(handed_out, 1);
    assert_eq!(exported[0].object_id.as_str(), "b-2");
    let report = exporter.close();
    assert_eq!((report.succeeded, report.failed), (1, 2));
    let fault = report.first_fault.expect("fault recorded");
    assert_eq!(fault.object_id.as_deref(), Some("0"));
    assert!(fault.message.contains("was not found"));

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let err = exporter
        .export_feature(unreadable, &LodFilter::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OperationError::Model {
            source: ModelError::Corrupt(_),
            ..
        }
    ));
    assert!(exporter.export_feature(readable, &LodFilter::new()).await.is_ok());
}

#[tokio::test]
async fn contained_child_appears_as_value_not_root() {
    let adapter = setup_adapter(100).await;
    let mut importer = Importer::new(&adapter, ImportOptions::default())
        .await
        .expect("importer");
    let key = importer
        .import(&building("b-1", &["1"]).with_child(bldg("boundary"), wall("wall-1")))
        .await
        .expect("import");
    importer.close().await.expect("close importer");

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let query = Query::new()
        .compile(adapter.schema_mapping())
        .expect("compile");
    assert_eq!(exporter.query_ids(&query).await.expect("ids"), vec![key]);

    let exported = exporter
        .export_feature(key, &LodFilter::new())
        .await
        .expect("export");
    assert!(matches!(
        &exported.children[0].value,
        FeatureValue::Inline(child) if child.object_id.as_str() == "wall-1"
    ));
}
