use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use graphsync::{
    errors::SyncError,
    fetch::RemoteSource,
    models::RecordSource,
    schema::{TicketKind, NEVER_SHUTDOWN_MESSAGE},
};
use otisfetcher::{
    client::OtisService,
    error::{OtisFetcherError, Result},
    models::{Asset, AvailabilityTicket, TicketBatch, UnitSample},
    OtisFetcher,
};
use serde_json::json;

struct MockOtisService {
    assets: Vec<Asset>,
    asset_calls: AtomicUsize,
    ranges: std::sync::Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockOtisService {
    fn new(assets: Vec<Asset>) -> Self {
        Self {
            assets,
            asset_calls: AtomicUsize::new(0),
            ranges: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OtisService for MockOtisService {
    async fn tickets(&self, kind: TicketKind) -> Result<TicketBatch> {
        match kind {
            TicketKind::Availability => {
                let rows: Vec<AvailabilityTicket> = serde_json::from_value(json!([
                    {
                        "unit_id": "U1",
                        "unit_display_name": "Lift 1",
                        "stop_datetime": "2021-01-04 17:08:58.0",
                        "back_in_service_datetime": null,
                        "resolution": "Porte bloquee",
                        "mechanic_name": "Martin"
                    },
                    { "Message": NEVER_SHUTDOWN_MESSAGE }
                ]))?;
                Ok(TicketBatch::Availability(rows))
            }
            _ => Err(OtisFetcherError::Api {
                status: 401,
                body: "Access denied due to invalid subscription key".into(),
            }),
        }
    }

    async fn assets(&self) -> Result<Vec<Asset>> {
        self.asset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.assets.clone())
    }

    async fn performance(
        &self,
        unit_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<UnitSample>> {
        self.ranges
            .lock()
            .unwrap()
            .push((unit_id.to_string(), from, to));
        Ok(vec![UnitSample {
            unit_id: unit_id.to_string(),
            data_type: "runs".into(),
            value: json!(42),
            unit: Some("count".into()),
            timestamp: Some(json!("2021-01-04T17:08:58Z")),
        }])
    }

    async fn status(&self, unit_id: &str) -> Result<Vec<UnitSample>> {
        Ok(vec![UnitSample {
            unit_id: unit_id.to_string(),
            data_type: "inService".into(),
            value: json!(1),
            unit: None,
            timestamp: None,
        }])
    }
}

fn sample_assets() -> Vec<Asset> {
    serde_json::from_value(json!([
        {
            "asset_name": "Lift 1",
            "asset_id": 1,
            "asset_type": "elevator",
            "asset_space": "Tour A",
            "devices": [{
                "dev_id": "D1",
                "description": "door sensor",
                "sample_rate": 60,
                "last_telemetry": [
                    { "id": 1, "data_type": "doorCycles", "value": 120, "unit": "count" },
                    { "id": 2, "data_type": "doorFaults", "value": null }
                ]
            }]
        },
        {
            "asset_name": "Lift 2",
            "devices": [{ "dev_id": "D2" }]
        }
    ]))
    .unwrap()
}

fn fetcher() -> (OtisFetcher, Arc<MockOtisService>) {
    let service = Arc::new(MockOtisService::new(sample_assets()));
    (OtisFetcher::new(service.clone()), service)
}

#[tokio::test]
async fn ticket_rows_become_records_of_their_kind() {
    let (fetcher, _) = fetcher();
    let records = fetcher
        .fetch_tickets(TicketKind::Availability)
        .await
        .expect("tickets");

    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|record| record.source == RecordSource::Ticket(TicketKind::Availability)));
    assert_eq!(records[0].text("unit_id"), "U1");
    assert_eq!(records[0].text("back_in_service_datetime"), "");
    assert_eq!(records[1].text("Message"), NEVER_SHUTDOWN_MESSAGE);
}

#[tokio::test]
async fn api_errors_surface_as_fetch_failures() {
    let (fetcher, _) = fetcher();
    let err = fetcher
        .fetch_tickets(TicketKind::Repair)
        .await
        .expect_err("repair feed is rejected");
    match err {
        SyncError::Fetch(message) => assert!(message.contains("401")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn telemetry_is_served_from_the_inventory_snapshot() {
    let (fetcher, service) = fetcher();

    let devices = fetcher.fetch_devices().await.expect("devices");
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].text("asset_name"), "Lift 1");
    assert_eq!(devices[1].text("dev_id"), "D2");

    let telemetry = fetcher.fetch_telemetry("D1").await.expect("telemetry");
    assert_eq!(telemetry.len(), 2);
    assert!(telemetry
        .iter()
        .all(|record| record.source == RecordSource::Telemetry && record.text("dev_id") == "D1"));
    assert!(telemetry[1].is_null("value"));

    assert!(fetcher.fetch_telemetry("D2").await.expect("empty").is_empty());
    assert_eq!(service.asset_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_device_refreshes_the_inventory_once() {
    let (fetcher, service) = fetcher();
    let telemetry = fetcher.fetch_telemetry("D9").await.expect("telemetry");
    assert!(telemetry.is_empty());
    assert_eq!(service.asset_calls.load(Ordering::SeqCst), 1);

    // The refresh populated the snapshot for the known devices.
    assert_eq!(fetcher.fetch_telemetry("D1").await.unwrap().len(), 2);
    assert_eq!(service.asset_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn performance_requests_forward_the_window() {
    let (fetcher, service) = fetcher();
    let from = Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2021, 1, 5, 0, 0, 0).unwrap();

    let samples = fetcher
        .fetch_performance("U1", from, to)
        .await
        .expect("performance");
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].source, RecordSource::Performance);
    assert_eq!(samples[0].text("unit_id"), "U1");
    assert_eq!(samples[0].text("value"), "42");
    assert_eq!(
        service.ranges.lock().unwrap().as_slice(),
        &[("U1".to_string(), from, to)]
    );

    let status = fetcher.fetch_status("U2").await.expect("status");
    assert_eq!(status[0].source, RecordSource::Status);
    assert!(status[0].is_null("timestamp"));
}
