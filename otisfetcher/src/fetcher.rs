use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use graphsync::{
    errors::{Result as SyncResult, SyncError},
    fetch::RemoteSource,
    models::{RecordSource, RemoteRecord},
    schema::TicketKind,
};

use crate::{
    client::{OtisService, ReqwestService},
    mapper,
    models::Telemetry,
    params::OtisParams,
};

/// `RemoteSource` backed by the vendor gateway.
///
/// The asset inventory already embeds each device's latest telemetry, so
/// `fetch_devices` keeps it aside and `fetch_telemetry` answers from that
/// snapshot. A device missing from the snapshot triggers one inventory refresh.
pub struct OtisFetcher {
    client: Arc<dyn OtisService>,
    telemetry: Mutex<HashMap<String, Vec<Telemetry>>>,
}

impl OtisFetcher {
    pub fn new(client: Arc<dyn OtisService>) -> Self {
        Self {
            client,
            telemetry: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_client(params: OtisParams) -> SyncResult<Self> {
        let client = ReqwestService::new(params).map_err(|err| {
            SyncError::Config(format!("failed to create HTTP client: {err}"))
        })?;
        Ok(Self::new(Arc::new(client)))
    }

    async fn refresh_inventory(&self) -> SyncResult<Vec<RemoteRecord>> {
        let assets = self.client.assets().await?;
        let snapshot: HashMap<String, Vec<Telemetry>> = assets
            .iter()
            .flat_map(|asset| asset.devices.iter())
            .map(|device| (device.dev_id.clone(), device.last_telemetry.clone()))
            .collect();
        *self.telemetry.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
        Ok(mapper::device_records(&assets))
    }

    fn cached_telemetry(&self, dev_id: &str) -> Option<Vec<Telemetry>> {
        self.telemetry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dev_id)
            .cloned()
    }
}

#[async_trait]
impl RemoteSource for OtisFetcher {
    fn name(&self) -> &'static str {
        "otis"
    }

    async fn fetch_tickets(&self, kind: TicketKind) -> SyncResult<Vec<RemoteRecord>> {
        let batch = self.client.tickets(kind).await?;
        log::debug!("{} {} ticket row(s) received.", batch.len(), kind);
        Ok(mapper::ticket_records(&batch)?)
    }

    async fn fetch_devices(&self) -> SyncResult<Vec<RemoteRecord>> {
        self.refresh_inventory().await
    }

    async fn fetch_telemetry(&self, device_key: &str) -> SyncResult<Vec<RemoteRecord>> {
        let telemetry = match self.cached_telemetry(device_key) {
            Some(telemetry) => telemetry,
            None => {
                self.refresh_inventory().await?;
                self.cached_telemetry(device_key).unwrap_or_default()
            }
        };
        Ok(mapper::telemetry_records(device_key, &telemetry)?)
    }

    async fn fetch_performance(
        &self,
        device_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<RemoteRecord>> {
        let samples = self.client.performance(device_key, from, to).await?;
        Ok(mapper::sample_records(RecordSource::Performance, &samples)?)
    }

    async fn fetch_status(&self, device_key: &str) -> SyncResult<Vec<RemoteRecord>> {
        let samples = self.client.status(device_key).await?;
        Ok(mapper::sample_records(RecordSource::Status, &samples)?)
    }
}
