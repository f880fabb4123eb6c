use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use graphsync::{
    config::SyncConfig,
    errors::SyncError,
    graph::GraphStore,
    mapper::EntityMapper,
    models::{EntityFilter, EntityKind, NodeId, RecordSource, SyncCursor},
    schema::{ASSET_CATEGORY, RETENTION_CATEGORY},
    sync::{DeviceTelemetryStream, MetricFeed, MetricStream, StreamSynchronizer},
    upsert::Upserter,
};
use serde_json::json;

mod common;

use common::{record, TestContext};

fn upserter(ctx: &TestContext) -> Arc<Upserter> {
    Arc::new(Upserter::new(
        ctx.storage.store.clone(),
        ctx.storage.store.clone(),
        366,
    ))
}

fn telemetry_stream(ctx: &TestContext) -> DeviceTelemetryStream {
    DeviceTelemetryStream::new(
        ctx.source.clone(),
        ctx.storage.store.clone(),
        upserter(ctx),
        SyncConfig::default().network_context,
    )
}

async fn metric_stream(ctx: &TestContext, feed: MetricFeed) -> anyhow::Result<MetricStream> {
    let mapper = Arc::new(EntityMapper::new(
        ctx.storage.store.clone(),
        SyncConfig::default().hierarchy,
    ));
    mapper.build().await?;
    Ok(MetricStream::new(
        feed,
        ctx.source.clone(),
        mapper,
        upserter(ctx),
        Duration::from_secs(24 * 60 * 60),
    ))
}

async fn metric_of(ctx: &TestContext, owner: &NodeId, key: &str) -> anyhow::Result<NodeId> {
    let found = ctx
        .storage
        .store
        .find_entities(owner, &EntityFilter::named(key, EntityKind::Metric))
        .await?;
    assert_eq!(found.len(), 1, "expected exactly one metric '{key}'");
    Ok(found[0].id.clone())
}

fn seed_devices(ctx: &TestContext, asset_name: &str, temperature: f64) {
    *ctx.source.devices.lock().unwrap() = vec![
        record(
            RecordSource::Device,
            json!({
                "dev_id": "D1",
                "asset_name": asset_name,
                "asset_id": "A-1",
                "asset_type": "elevator",
                "description": "Sensor box",
                "sample_rate": 60
            }),
        ),
        record(RecordSource::Device, json!({ "dev_id": "D2" })),
    ];
    ctx.source.telemetry.lock().unwrap().insert(
        "D1".to_string(),
        vec![
            record(
                RecordSource::Telemetry,
                json!({
                    "dev_id": "D1",
                    "id": "7",
                    "data_type": "temperature",
                    "value": temperature,
                    "unit": "C",
                    "timestamp": 1_600_000_000_000i64
                }),
            ),
            record(
                RecordSource::Telemetry,
                json!({ "dev_id": "D1", "id": "8", "data_type": "humidity", "value": null }),
            ),
        ],
    );
}

#[tokio::test]
async fn devices_and_their_telemetry_land_under_the_network() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let stream = telemetry_stream(&ctx);
    let cursor = SyncCursor::new("telemetry");
    seed_devices(&ctx, "Lift 1", 21.5);

    let first = stream.sync_once(&cursor).await?;
    assert_eq!(first.processed, 3);
    assert_eq!(first.created, 3);
    assert_eq!(first.skipped, 1);
    assert_eq!(ctx.storage.store.count_entities(EntityKind::Device)?, 2);

    let devices = ctx
        .storage
        .store
        .find_entities(&ctx.seeded.network, &EntityFilter::named("D1", EntityKind::Device))
        .await?;
    let device = devices[0].id.clone();
    let metric = metric_of(&ctx, &device, "temperature-7").await?;
    assert_eq!(ctx.storage.store.points(&metric)?, vec![(1_600_000_000_000, 21.5)]);
    assert_eq!(ctx.storage.store.current_value(&metric)?, Some(21.5));

    let retention = ctx
        .storage
        .store
        .get_attributes_by_category(&metric, RETENTION_CATEGORY)
        .await?;
    assert_eq!(retention[0].value, "366");

    // Same inventory again: devices untouched, readings appended.
    seed_devices(&ctx, "Lift 1", 22.0);
    let second = stream.sync_once(&cursor).await?;
    assert_eq!(second.created, 1);
    assert_eq!(ctx.storage.store.count_entities(EntityKind::Device)?, 2);
    assert_eq!(ctx.storage.store.points(&metric)?.len(), 2);
    assert_eq!(ctx.storage.store.current_value(&metric)?, Some(22.0));
    Ok(())
}

#[tokio::test]
async fn changed_device_fields_are_rewritten_in_place() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let stream = telemetry_stream(&ctx);
    let cursor = SyncCursor::new("telemetry");

    seed_devices(&ctx, "Lift 1", 21.5);
    stream.sync_once(&cursor).await?;
    seed_devices(&ctx, "Lift 1 bis", 21.5);
    stream.sync_once(&cursor).await?;

    let devices = ctx
        .storage
        .store
        .find_entities(&ctx.seeded.network, &EntityFilter::named("D1", EntityKind::Device))
        .await?;
    assert_eq!(devices.len(), 1);
    let asset = ctx
        .storage
        .store
        .get_attributes_by_category(&devices[0].id, ASSET_CATEGORY)
        .await?;
    let name = asset.iter().find(|attribute| attribute.label == "Name").unwrap();
    assert_eq!(name.value, "Lift 1 bis");
    Ok(())
}

#[tokio::test]
async fn missing_network_context_fails_the_cycle() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let stream = DeviceTelemetryStream::new(
        ctx.source.clone(),
        ctx.storage.store.clone(),
        upserter(&ctx),
        "Unknown Network",
    );
    seed_devices(&ctx, "Lift 1", 21.5);

    let err = stream
        .sync_once(&SyncCursor::new("telemetry"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MappingNotFound { level: "context", .. }));
    Ok(())
}

#[tokio::test]
async fn performance_samples_become_unit_metrics() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let stream = metric_stream(&ctx, MetricFeed::Performance).await?;
    ctx.source.performance.lock().unwrap().insert(
        "U1".to_string(),
        vec![
            record(
                RecordSource::Performance,
                json!({
                    "unit_id": "U1",
                    "data_type": "door_cycles",
                    "value": "42",
                    "unit": "count",
                    "timestamp": "2021-01-04 17:08:58.0"
                }),
            ),
            record(
                RecordSource::Performance,
                json!({ "unit_id": "U1", "data_type": "runs", "value": "n/a" }),
            ),
        ],
    );

    let stats = stream.sync_once(&SyncCursor::new("performance")).await?;
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 1);

    let metric = metric_of(&ctx, &ctx.seeded.units["U1"], "U1-door_cycles").await?;
    assert_eq!(
        ctx.storage.store.points(&metric)?,
        vec![(1_609_780_138_000, 42.0)]
    );
    Ok(())
}

#[tokio::test]
async fn performance_window_starts_at_the_cursor() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let stream = metric_stream(&ctx, MetricFeed::Performance).await?;

    stream.fetch(&SyncCursor::new("performance")).await?;
    let (from, to) = ctx.source.performance_ranges.lock().unwrap()[0];
    assert_eq!(to - from, chrono::Duration::hours(24));

    let last_sync = Utc.timestamp_millis_opt(1_609_780_138_000).unwrap();
    let mut cursor = SyncCursor::new("performance");
    cursor.advance(last_sync);
    ctx.source.performance_ranges.lock().unwrap().clear();
    stream.fetch(&cursor).await?;

    let ranges = ctx.source.performance_ranges.lock().unwrap().clone();
    // One request per mapped unit key.
    assert_eq!(ranges.len(), 4);
    assert!(ranges.iter().all(|(from, _)| *from == last_sync));
    Ok(())
}

#[tokio::test]
async fn huge_lookback_clamps_the_window_start() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let mapper = Arc::new(EntityMapper::new(
        ctx.storage.store.clone(),
        SyncConfig::default().hierarchy,
    ));
    mapper.build().await?;
    let stream = MetricStream::new(
        MetricFeed::Performance,
        ctx.source.clone(),
        mapper,
        upserter(&ctx),
        Duration::from_millis(u64::MAX / 4),
    );

    stream.fetch(&SyncCursor::new("performance")).await?;
    let (from, to) = ctx.source.performance_ranges.lock().unwrap()[0];
    assert_eq!(from, chrono::DateTime::<Utc>::MIN_UTC);
    assert!(from < to);
    Ok(())
}

#[tokio::test]
async fn status_samples_of_unknown_units_are_skipped() -> anyhow::Result<()> {
    let ctx = common::init_test_context().await?;
    let stream = metric_stream(&ctx, MetricFeed::Status).await?;
    ctx.source.status.lock().unwrap().insert(
        "U2".to_string(),
        vec![
            record(
                RecordSource::Status,
                json!({ "unit_id": "U2", "data_type": "in_service", "value": true }),
            ),
            record(
                RecordSource::Status,
                json!({ "unit_id": "U7", "data_type": "in_service", "value": false }),
            ),
        ],
    );

    let stats = stream.sync_once(&SyncCursor::new("status")).await?;
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 1);

    let metric = metric_of(&ctx, &ctx.seeded.units["U2"], "U2-in_service").await?;
    assert_eq!(ctx.storage.store.current_value(&metric)?, Some(1.0));
    Ok(())
}
