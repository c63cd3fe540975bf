mod common;

use citydb_core::{
    AdapterMetadata, DeleteMode, Feature, FeatureValue, LodFilter, LodMode, ModelError, Value,
};
use citydb_operation::{
    DeleteOptions, Deleter, ExportOptions, Exporter, ImportOptions, Importer, OperationError,
    SqliteAdapter,
};
use citydb_query::{parse_json, parse_text, Query};
use serde_json::json;

use common::{bldg, building, count, gen, setup_adapter, wall};

async fn import_all(adapter: &SqliteAdapter, features: &[Feature]) -> Vec<i64> {
    let mut importer = Importer::new(adapter, ImportOptions::default())
        .await
        .expect("importer");
    let mut keys = Vec::with_capacity(features.len());
    for feature in features {
        keys.push(importer.import(feature).await.expect("import"));
    }
    importer.close().await.expect("close importer");
    keys
}

async fn selected(adapter: &SqliteAdapter, query: &Query) -> Vec<i64> {
    let compiled = query.compile(adapter.schema_mapping()).expect("compile");
    let mut exporter = Exporter::new(adapter, ExportOptions::default())
        .await
        .expect("exporter");
    exporter.query_ids(&compiled).await.expect("query ids")
}

#[tokio::test]
async fn empty_execute_batch_is_a_no_op() {
    let adapter = setup_adapter(10).await;
    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");

    deleter.execute_batch().await.expect("empty batch");
    deleter.execute_batch().await.expect("empty batch");
    let report = deleter.close().await.expect("close deleter");
    assert_eq!(report.batches, 0);
    assert_eq!(report.succeeded, 0);
}

#[tokio::test]
async fn duplicate_ids_collapse_into_one_statement() {
    let adapter = setup_adapter(10).await;
    let features: Vec<Feature> = (0..8)
        .map(|index| building(&format!("b-{index}"), &["1"]))
        .collect();
    let keys = import_all(&adapter, &features).await;

    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");
    for key in [keys[4], keys[4], keys[6]] {
        assert!(!deleter.delete(key, &bldg("Building")).await.expect("queue"));
    }
    deleter.execute_batch().await.expect("flush");
    deleter.execute_batch().await.expect("nothing left");

    let report = deleter.close().await.expect("close deleter");
    assert_eq!(report.batches, 1);
    assert_eq!(report.succeeded, 2);
    assert_eq!(count(adapter.pool(), "feature").await, 6);

    let remaining = selected(&adapter, &Query::new()).await;
    assert!(!remaining.contains(&keys[4]));
    assert!(!remaining.contains(&keys[6]));
}

#[tokio::test]
async fn reaching_maximum_batch_size_flushes_that_type() {
    let adapter = setup_adapter(2).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-1", &["1"]),
            building("b-2", &["1"]),
            building("b-3", &["1"]),
        ],
    )
    .await;

    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");
    assert!(!deleter.delete(keys[0], &bldg("Building")).await.expect("queue"));
    assert!(deleter.delete(keys[1], &bldg("Building")).await.expect("flush"));
    assert_eq!(deleter.report().batches, 1);
    assert_eq!(count(adapter.pool(), "feature").await, 1);

    assert!(!deleter.delete(keys[2], &bldg("Building")).await.expect("queue"));
    let report = deleter.close().await.expect("close deleter");
    assert_eq!(report.batches, 2);
    assert_eq!(count(adapter.pool(), "feature").await, 0);
}

#[tokio::test]
async fn delete_cascades_to_children_and_nulls_references() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-1", &["2"]).with_child(bldg("boundary"), wall("wall-1")),
            building("b-2", &["1"]).with_reference(bldg("relatedTo"), "b-1"),
        ],
    )
    .await;

    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");
    deleter.delete(keys[0], &bldg("Building")).await.expect("queue");
    deleter.close().await.expect("close deleter");

    assert_eq!(count(adapter.pool(), "feature").await, 1);
    // b-2 keeps its geometry property and the dangling reference
    assert_eq!(count(adapter.pool(), "geometry_data").await, 1);
    assert_eq!(count(adapter.pool(), "property").await, 2);

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(keys[1], &LodFilter::new())
        .await
        .expect("export");
    assert!(matches!(
        &exported.children[0].value,
        FeatureValue::Reference(target) if target.as_str() == "b-1"
    ));
}

#[tokio::test]
async fn terminate_mode_keeps_rows() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[building("b-1", &["2"]).with_child(bldg("boundary"), wall("wall-1"))],
    )
    .await;

    let mut deleter = Deleter::new(
        &adapter,
        DeleteOptions::default().with_mode(DeleteMode::Terminate),
    )
    .await
    .expect("deleter");
    deleter.delete(keys[0], &bldg("Building")).await.expect("queue");
    deleter.close().await.expect("close deleter");

    let terminated: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM feature WHERE termination_date IS NOT NULL")
            .fetch_one(adapter.pool())
            .await
            .expect("count terminated");
    assert_eq!(terminated, 2);

    let mut exporter = Exporter::new(&adapter, ExportOptions::default())
        .await
        .expect("exporter");
    let exported = exporter
        .export_feature(keys[0], &LodFilter::new())
        .await
        .expect("export");
    assert!(exported.termination_date.is_some());
}

#[tokio::test]
async fn unknown_feature_type_is_rejected() {
    let adapter = setup_adapter(10).await;
    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");
    let err = deleter.delete(1, &bldg("Castle")).await.unwrap_err();
    assert!(matches!(
        err,
        OperationError::Model {
            source: ModelError::UnknownFeatureType(_),
            ..
        }
    ));
}

#[tokio::test]
async fn delete_matching_removes_filtered_features() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-1", &["1"]).with_attribute(bldg("yearOfConstruction"), Value::Integer(1950)),
            building("b-2", &["1"]).with_attribute(bldg("yearOfConstruction"), Value::Integer(2005)),
            building("b-3", &["1"]).with_attribute(bldg("yearOfConstruction"), Value::Integer(1890)),
        ],
    )
    .await;

    let query = Query::new()
        .with_filter(parse_text("bldg:yearOfConstruction < 2000").expect("parse"))
        .compile(adapter.schema_mapping())
        .expect("compile");
    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");
    assert_eq!(deleter.delete_matching(&query).await.expect("select"), 2);
    let report = deleter.close().await.expect("close deleter");

    assert_eq!(report.succeeded, 2);
    assert_eq!(selected(&adapter, &Query::new()).await, vec![keys[1]]);
}

#[tokio::test]
async fn delete_matching_groups_selected_features_by_type() {
    let adapter = setup_adapter(10).await;
    import_all(
        &adapter,
        &[
            building("b-1", &["1"]).with_child(bldg("boundary"), wall("wall-1")),
            building("b-2", &["1"]),
        ],
    )
    .await;

    let query = Query::new()
        .including_children()
        .compile(adapter.schema_mapping())
        .expect("compile");
    let mut deleter = Deleter::new(&adapter, DeleteOptions::default())
        .await
        .expect("deleter");
    assert_eq!(deleter.delete_matching(&query).await.expect("select"), 3);
    let report = deleter.close().await.expect("close deleter");

    // one statement for the buildings, one for the wall surface
    assert_eq!(report.batches, 2);
    assert_eq!(report.succeeded, 3);
    assert_eq!(count(adapter.pool(), "feature").await, 0);
}

#[tokio::test]
async fn text_and_json_filters_select_the_same_features() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-1", &["1"])
                .with_attribute(bldg("function"), Value::code("1000"))
                .with_attribute(bldg("storeysAboveGround"), Value::Integer(2)),
            building("b-2", &["1"])
                .with_attribute(bldg("function"), Value::code("2000"))
                .with_attribute(bldg("storeysAboveGround"), Value::Integer(5)),
            building("b-3", &["1"])
                .with_attribute(bldg("function"), Value::code("1000"))
                .with_attribute(bldg("storeysAboveGround"), Value::Integer(7)),
        ],
    )
    .await;

    let text = parse_text("bldg:function = '1000' AND bldg:storeysAboveGround > 3").expect("text");
    let document = parse_json(&json!({
        "op": "and",
        "args": [
            {"op": "=", "args": [{"property": "bldg:function"}, "1000"]},
            {"op": ">", "args": [{"property": "bldg:storeysAboveGround"}, 3]}
        ]
    }))
    .expect("json");

    let by_text = selected(&adapter, &Query::new().with_filter(text)).await;
    let by_json = selected(&adapter, &Query::new().with_filter(document)).await;
    assert_eq!(by_text, vec![keys[2]]);
    assert_eq!(by_text, by_json);
}

#[tokio::test]
async fn lod_filter_modes_and_search_depth() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-1", &["1"]),
            building("b-2", &["2"]),
            building("b-3", &["1", "2"]),
            // LOD 2 only on the contained wall
            building("b-4", &[]).with_child(bldg("boundary"), wall("wall-4")),
        ],
    )
    .await;
    let lods = || LodFilter::new().with_lods(["1", "2"]);
    let query = |lod_filter: LodFilter| Query::new().with_lod_filter(lod_filter);

    assert_eq!(
        selected(&adapter, &query(lods())).await,
        vec![keys[0], keys[1], keys[2], keys[3]]
    );
    assert_eq!(
        selected(&adapter, &query(lods().with_search_depth(0))).await,
        vec![keys[0], keys[1], keys[2]]
    );
    assert_eq!(
        selected(&adapter, &query(lods().with_mode(LodMode::And))).await,
        vec![keys[2]]
    );
    assert_eq!(
        selected(
            &adapter,
            &query(LodFilter::new().with_lods(["2"]).with_search_depth(1))
        )
        .await,
        vec![keys[1], keys[2], keys[3]]
    );
}

#[tokio::test]
async fn spatial_filter_uses_feature_envelope() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-near", &["1"]),
            Feature::new("b-far", bldg("Building")).with_geometry(
                bldg("lod1MultiSurface"),
                Some("1"),
                common::square(100.0, 0.0),
            ),
        ],
    )
    .await;

    let filter = parse_text("S_INTERSECTS(envelope, BBOX(-1, -1, 2, 2))").expect("parse");
    assert_eq!(
        selected(&adapter, &Query::new().with_filter(filter)).await,
        vec![keys[0]]
    );
}

#[tokio::test]
async fn like_filter_is_case_sensitive() {
    let adapter = setup_adapter(10).await;
    let keys = import_all(
        &adapter,
        &[
            building("b-1", &["1"]).with_attribute(gen("owner"), Value::String("City".into())),
            building("b-2", &["1"]).with_attribute(gen("owner"), Value::String("city_hall".into())),
            building("b-3", &["1"]).with_attribute(gen("owner"), Value::String("cityXhall".into())),
        ],
    )
    .await;

    let query = |filter: &str| Query::new().with_filter(parse_text(filter).expect("parse"));
    assert_eq!(selected(&adapter, &query("gen:owner LIKE 'c%'")).await, vec![keys[1], keys[2]]);
    assert_eq!(selected(&adapter, &query("gen:owner LIKE 'C%'")).await, vec![keys[0]]);
    assert_eq!(
        selected(&adapter, &query(r"gen:owner LIKE 'city\_%'")).await,
        vec![keys[1]]
    );
    assert_eq!(
        selected(&adapter, &query("CASEI(gen:owner) LIKE CASEI('CITY')")).await,
        vec![keys[0]]
    );
}
