use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::fetch::RemoteSource;
use crate::graph::{find_named_child, GraphStore};
use crate::mapper::EntityMapper;
use crate::models::{
    EntityKind, MetricSpec, NodeId, RecordSource, RemoteRecord, SyncCursor, SyncStats,
};
use crate::schema::{
    TicketKind, DEVICE_KEY_FIELD, SAMPLE_ID_FIELD, SAMPLE_TIME_FIELD, SAMPLE_TYPE_FIELD,
    SAMPLE_UNIT_FIELD, SAMPLE_VALUE_FIELD, UNIT_KEY_FIELD,
};
use crate::upsert::{TicketScope, Upserter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// One polling stream: fetch a snapshot, then converge the graph to it.
///
/// `fetch` failures abandon the cycle. `reconcile` only fails when the scope it
/// writes into cannot be resolved; per-record failures are logged and counted
/// in the returned stats.
#[async_trait]
pub trait StreamSynchronizer: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, cursor: &SyncCursor) -> Result<Vec<RemoteRecord>>;

    async fn reconcile(&self, batch: Vec<RemoteRecord>) -> Result<SyncStats>;

    async fn sync_once(&self, cursor: &SyncCursor) -> Result<SyncStats> {
        let batch = self.fetch(cursor).await?;
        self.reconcile(batch).await
    }
}

fn ensure_mapping(mapper: &EntityMapper) -> Result<()> {
    if mapper.is_built() {
        Ok(())
    } else {
        Err(SyncError::InvalidState("entity mapping not built yet".to_string()))
    }
}

async fn context_scope(graph: &dyn GraphStore, name: &str) -> Result<NodeId> {
    let root = graph.root_id();
    find_named_child(graph, &root, name, EntityKind::Context)
        .await?
        .map(|context| context.id)
        .ok_or_else(|| SyncError::MappingNotFound {
            level: "context",
            name: name.to_string(),
        })
}

/// Reads `value`, `unit` and `timestamp` off a sample; a missing timestamp means now.
fn sample_reading(record: &RemoteRecord, key: String) -> Result<(MetricSpec, f64, i64)> {
    let value = record.number(SAMPLE_VALUE_FIELD).ok_or_else(|| {
        SyncError::upsert(
            &key,
            format!("non-numeric value '{}'", record.text(SAMPLE_VALUE_FIELD)),
        )
    })?;
    let timestamp = record
        .timestamp_millis(SAMPLE_TIME_FIELD)
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let spec = MetricSpec {
        key,
        unit: record.text(SAMPLE_UNIT_FIELD),
        data_type: "Real".to_string(),
    };
    Ok((spec, value, timestamp))
}

/// Ticket feeds, reconciled kind by kind in configuration order.
pub struct TicketStream {
    source: Arc<dyn RemoteSource>,
    graph: Arc<dyn GraphStore>,
    mapper: Arc<EntityMapper>,
    upserter: Arc<Upserter>,
    config: Arc<SyncConfig>,
}

impl TicketStream {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        graph: Arc<dyn GraphStore>,
        mapper: Arc<EntityMapper>,
        upserter: Arc<Upserter>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            source,
            graph,
            mapper,
            upserter,
            config,
        }
    }

    async fn ticket_scope(&self, context: &NodeId, kind: TicketKind) -> Result<TicketScope> {
        let name = self.config.processes.for_kind(kind);
        let process = find_named_child(self.graph.as_ref(), context, name, EntityKind::Process)
            .await?
            .ok_or_else(|| SyncError::MappingNotFound {
                level: "process",
                name: name.to_string(),
            })?;
        Ok(TicketScope {
            kind,
            process: process.id,
            sentinel: self.config.sentinel_for(kind),
        })
    }
}

#[async_trait]
impl StreamSynchronizer for TicketStream {
    fn name(&self) -> &str {
        "tickets"
    }

    async fn fetch(&self, _cursor: &SyncCursor) -> Result<Vec<RemoteRecord>> {
        ensure_mapping(&self.mapper)?;
        let mut batch = Vec::new();
        for kind in &self.config.ticket_kinds {
            let records = self.source.fetch_tickets(*kind).await?;
            log::info!("Fetched {} {} record(s).", records.len(), kind);
            batch.extend(records);
        }
        Ok(batch)
    }

    async fn reconcile(&self, batch: Vec<RemoteRecord>) -> Result<SyncStats> {
        let context = context_scope(self.graph.as_ref(), &self.config.ticket_context).await?;
        let mut scopes = Vec::with_capacity(self.config.ticket_kinds.len());
        for kind in &self.config.ticket_kinds {
            scopes.push(self.ticket_scope(&context, *kind).await?);
        }

        let mut stats = SyncStats::default();
        for scope in &scopes {
            let records = batch
                .iter()
                .filter(|record| record.source == RecordSource::Ticket(scope.kind));
            for record in records {
                let unit = record.text(UNIT_KEY_FIELD);
                let Some(target) = self.mapper.resolve(&unit) else {
                    log::warn!("{}; skipping {} record.", SyncError::MappingMiss(unit), scope.kind);
                    stats.skipped += 1;
                    continue;
                };

                match self.upserter.upsert_ticket(scope, &target, record).await {
                    Ok(outcome) => stats.record(&outcome),
                    Err(err) => {
                        log::warn!("{}", SyncError::upsert(unit, err));
                        stats.failed += 1;
                    }
                }
                tokio::task::yield_now().await;
            }
        }
        Ok(stats)
    }
}

/// Device inventory plus the last telemetry of every device.
pub struct DeviceTelemetryStream {
    source: Arc<dyn RemoteSource>,
    graph: Arc<dyn GraphStore>,
    upserter: Arc<Upserter>,
    network_context: String,
}

impl DeviceTelemetryStream {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        graph: Arc<dyn GraphStore>,
        upserter: Arc<Upserter>,
        network_context: impl Into<String>,
    ) -> Self {
        Self {
            source,
            graph,
            upserter,
            network_context: network_context.into(),
        }
    }
}

#[async_trait]
impl StreamSynchronizer for DeviceTelemetryStream {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn fetch(&self, _cursor: &SyncCursor) -> Result<Vec<RemoteRecord>> {
        let devices = self.source.fetch_devices().await?;
        log::info!("Fetched {} device(s).", devices.len());

        let mut batch = Vec::with_capacity(devices.len());
        for device in devices {
            let key = device.text(DEVICE_KEY_FIELD);
            let telemetry = if key.is_empty() {
                Vec::new()
            } else {
                self.source.fetch_telemetry(&key).await?
            };
            batch.push(device);
            batch.extend(telemetry);
        }
        Ok(batch)
    }

    async fn reconcile(&self, batch: Vec<RemoteRecord>) -> Result<SyncStats> {
        let network = context_scope(self.graph.as_ref(), &self.network_context).await?;

        // dev_id -> device node, `None` when the device itself failed.
        let mut devices: HashMap<String, Option<NodeId>> = HashMap::new();
        let mut stats = SyncStats::default();

        for record in &batch {
            let key = record.text(DEVICE_KEY_FIELD);
            match record.source {
                RecordSource::Device => match self.upserter.upsert_device(&network, record).await {
                    Ok(outcome) => {
                        devices.insert(key, outcome.node_id().cloned());
                        stats.record(&outcome);
                    }
                    Err(err) => {
                        log::warn!("{}", SyncError::upsert(&key, err));
                        devices.insert(key, None);
                        stats.failed += 1;
                    }
                },
                RecordSource::Telemetry => {
                    let device = match devices.get(&key) {
                        Some(Some(device)) => device,
                        Some(None) => {
                            stats.failed += 1;
                            continue;
                        }
                        None => {
                            log::warn!("{}; telemetry without device.", SyncError::MappingMiss(key));
                            stats.skipped += 1;
                            continue;
                        }
                    };
                    if record.is_null(SAMPLE_VALUE_FIELD) {
                        stats.skipped += 1;
                        continue;
                    }

                    let endpoint = format!(
                        "{}-{}",
                        record.text(SAMPLE_TYPE_FIELD),
                        record.text(SAMPLE_ID_FIELD)
                    );
                    let written = match sample_reading(record, endpoint) {
                        Ok((spec, value, timestamp)) => {
                            self.upserter
                                .upsert_metric(device, &spec, value, timestamp)
                                .await
                        }
                        Err(err) => Err(err),
                    };
                    match written {
                        Ok(outcome) => stats.record(&outcome),
                        Err(err) => {
                            log::warn!("Telemetry of device '{}' not written: {}", key, err);
                            stats.failed += 1;
                        }
                    }
                }
                other => {
                    log::debug!("Ignoring {:?} record in telemetry stream.", other);
                    stats.skipped += 1;
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFeed {
    Performance,
    Status,
}

impl MetricFeed {
    pub fn name(&self) -> &'static str {
        match self {
            MetricFeed::Performance => "performance",
            MetricFeed::Status => "status",
        }
    }
}

/// Performance or status samples for every mapped unit, written as metrics of
/// the unit's node.
pub struct MetricStream {
    feed: MetricFeed,
    source: Arc<dyn RemoteSource>,
    mapper: Arc<EntityMapper>,
    upserter: Arc<Upserter>,
    lookback: chrono::Duration,
}

impl MetricStream {
    pub fn new(
        feed: MetricFeed,
        source: Arc<dyn RemoteSource>,
        mapper: Arc<EntityMapper>,
        upserter: Arc<Upserter>,
        lookback: std::time::Duration,
    ) -> Self {
        Self {
            feed,
            source,
            mapper,
            upserter,
            lookback: chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::days(1)),
        }
    }
}

#[async_trait]
impl StreamSynchronizer for MetricStream {
    fn name(&self) -> &str {
        self.feed.name()
    }

    async fn fetch(&self, cursor: &SyncCursor) -> Result<Vec<RemoteRecord>> {
        ensure_mapping(&self.mapper)?;
        let to = Utc::now();
        let from = cursor.last_sync.unwrap_or_else(|| {
            to.checked_sub_signed(self.lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        });

        let mut batch = Vec::new();
        for key in self.mapper.keys() {
            let records = match self.feed {
                MetricFeed::Performance => self.source.fetch_performance(&key, from, to).await?,
                MetricFeed::Status => self.source.fetch_status(&key).await?,
            };
            batch.extend(records);
        }
        log::info!("Fetched {} {} sample(s).", batch.len(), self.feed.name());
        Ok(batch)
    }

    async fn reconcile(&self, batch: Vec<RemoteRecord>) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        for record in &batch {
            let unit = record.text(UNIT_KEY_FIELD);
            let Some(node) = self.mapper.resolve(&unit) else {
                log::warn!("{}; skipping {} sample.", SyncError::MappingMiss(unit), self.feed.name());
                stats.skipped += 1;
                continue;
            };
            if record.is_null(SAMPLE_VALUE_FIELD) {
                stats.skipped += 1;
                continue;
            }

            let key = format!("{}-{}", unit.trim(), record.text(SAMPLE_TYPE_FIELD));
            let written = match sample_reading(record, key) {
                Ok((spec, value, timestamp)) => {
                    self.upserter
                        .upsert_metric(&node, &spec, value, timestamp)
                        .await
                }
                Err(err) => Err(err),
            };
            match written {
                Ok(outcome) => stats.record(&outcome),
                Err(err) => {
                    log::warn!("{} sample of '{}' not written: {}", self.feed.name(), unit, err);
                    stats.failed += 1;
                }
            }
            tokio::task::yield_now().await;
        }
        Ok(stats)
    }
}

pub const MAPPING_STREAM: &str = "mapping";

/// Rebuilds the entity mapping on its own cadence.
pub struct MappingRefresh {
    mapper: Arc<EntityMapper>,
}

impl MappingRefresh {
    pub fn new(mapper: Arc<EntityMapper>) -> Self {
        Self { mapper }
    }
}

#[async_trait]
impl StreamSynchronizer for MappingRefresh {
    fn name(&self) -> &str {
        MAPPING_STREAM
    }

    async fn fetch(&self, _cursor: &SyncCursor) -> Result<Vec<RemoteRecord>> {
        self.mapper.build().await?;
        Ok(Vec::new())
    }

    async fn reconcile(&self, _batch: Vec<RemoteRecord>) -> Result<SyncStats> {
        Ok(SyncStats {
            processed: self.mapper.len(),
            ..SyncStats::default()
        })
    }
}
