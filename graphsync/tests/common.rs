use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use graphsync::{
    config::{StorageConfig, SyncConfig},
    errors::{Result, SyncError},
    fetch::RemoteSource,
    graph::GraphStore,
    models::{EntityKind, NodeId, RecordSource, RemoteRecord},
    schema::TicketKind,
    GraphSync,
};
use serde_json::Value;
use tempfile::TempDir;

/// Node ids of the seeded graph.
#[allow(dead_code)]
pub struct Seeded {
    pub units: HashMap<String, NodeId>,
    pub processes: HashMap<TicketKind, NodeId>,
    pub network: NodeId,
}

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub storage: GraphSync,
    pub source: Arc<ScriptedSource>,
    pub seeded: Seeded,
}

pub async fn init_test_context() -> anyhow::Result<TestContext> {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = tempfile::tempdir()?;
    let storage = GraphSync::new(StorageConfig::new(temp_dir.path())).await?;
    let seeded = seed_graph(storage.store.as_ref(), &SyncConfig::default()).await?;

    Ok(TestContext {
        temp_dir,
        storage,
        source: Arc::new(ScriptedSource::default()),
        seeded,
    })
}

/// Builds `Equipments/Elevators/Otis` with units U1, U2 and the composite
/// "U4/U5", a ticket process with two steps per kind and the device network.
pub async fn seed_graph(graph: &dyn GraphStore, config: &SyncConfig) -> anyhow::Result<Seeded> {
    let root = graph.root_id();
    let context = graph
        .create_entity(&root, &config.hierarchy.context, EntityKind::Context)
        .await?;
    let category = graph
        .create_entity(&context, &config.hierarchy.category, EntityKind::Category)
        .await?;
    let group = graph
        .create_entity(&category, &config.hierarchy.group, EntityKind::Group)
        .await?;

    let mut units = HashMap::new();
    for name in ["U1", "U2", "U4/U5"] {
        let id = graph
            .create_entity(&group, name, EntityKind::Equipment)
            .await?;
        units.insert(name.to_string(), id);
    }

    let tickets = graph
        .create_entity(&root, &config.ticket_context, EntityKind::Context)
        .await?;
    let mut processes = HashMap::new();
    for kind in TicketKind::ALL {
        let process = graph
            .create_entity(&tickets, config.processes.for_kind(kind), EntityKind::Process)
            .await?;
        for step in ["Open", "Closed"] {
            graph
                .create_entity(&process, step, EntityKind::Step)
                .await?;
        }
        processes.insert(kind, process);
    }

    let network = graph
        .create_entity(&root, &config.network_context, EntityKind::Context)
        .await?;

    Ok(Seeded {
        units,
        processes,
        network,
    })
}

#[allow(dead_code)]
pub fn record(source: RecordSource, value: Value) -> RemoteRecord {
    RemoteRecord::from_value(source, value)
}

/// In-memory `RemoteSource` whose answers are set by the test.
#[derive(Default)]
#[allow(dead_code)]
pub struct ScriptedSource {
    pub tickets: Mutex<HashMap<TicketKind, Vec<RemoteRecord>>>,
    pub devices: Mutex<Vec<RemoteRecord>>,
    pub telemetry: Mutex<HashMap<String, Vec<RemoteRecord>>>,
    pub performance: Mutex<HashMap<String, Vec<RemoteRecord>>>,
    pub status: Mutex<HashMap<String, Vec<RemoteRecord>>>,
    pub performance_ranges: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub latency: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn set_tickets(&self, kind: TicketKind, records: Vec<RemoteRecord>) {
        self.tickets.lock().unwrap().insert(kind, records);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, records: Vec<RemoteRecord>) -> Result<Vec<RemoteRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Fetch("remote unavailable".to_string()));
        }
        Ok(records)
    }

    fn keyed(map: &Mutex<HashMap<String, Vec<RemoteRecord>>>, key: &str) -> Vec<RemoteRecord> {
        map.lock().unwrap().get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_tickets(&self, kind: TicketKind) -> Result<Vec<RemoteRecord>> {
        let records = self
            .tickets
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        self.answer(records).await
    }

    async fn fetch_devices(&self) -> Result<Vec<RemoteRecord>> {
        let records = self.devices.lock().unwrap().clone();
        self.answer(records).await
    }

    async fn fetch_telemetry(&self, device_key: &str) -> Result<Vec<RemoteRecord>> {
        let records = Self::keyed(&self.telemetry, device_key);
        self.answer(records).await
    }

    async fn fetch_performance(
        &self,
        device_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RemoteRecord>> {
        self.performance_ranges.lock().unwrap().push((from, to));
        let records = Self::keyed(&self.performance, device_key);
        self.answer(records).await
    }

    async fn fetch_status(&self, device_key: &str) -> Result<Vec<RemoteRecord>> {
        let records = Self::keyed(&self.status, device_key);
        self.answer(records).await
    }
}
