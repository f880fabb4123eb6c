use crate::errors::Result;
use crate::models::RemoteRecord;
use crate::schema::TicketKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The remote source of record. Every call returns a full snapshot, never a delta.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_tickets(&self, kind: TicketKind) -> Result<Vec<RemoteRecord>>;

    /// Device inventory, one record per device with its asset fields flattened in.
    async fn fetch_devices(&self) -> Result<Vec<RemoteRecord>>;

    async fn fetch_telemetry(&self, device_key: &str) -> Result<Vec<RemoteRecord>>;

    async fn fetch_performance(
        &self,
        device_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RemoteRecord>>;

    async fn fetch_status(&self, device_key: &str) -> Result<Vec<RemoteRecord>>;
}
