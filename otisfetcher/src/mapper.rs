use graphsync::{
    models::{RecordSource, RemoteRecord},
    schema::{TicketKind, DEVICE_KEY_FIELD},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{OtisFetcherError, Result},
    models::{Asset, Device, Telemetry, TicketBatch, UnitSample},
};

fn to_record<T: Serialize>(source: RecordSource, row: &T) -> Result<RemoteRecord> {
    match serde_json::to_value(row)? {
        Value::Object(fields) => Ok(RemoteRecord::new(source, fields)),
        other => Err(OtisFetcherError::Internal(format!(
            "expected a JSON object for {:?}, got {}",
            source, other
        ))),
    }
}

fn rows_to_records<T: Serialize>(kind: TicketKind, rows: &[T]) -> Result<Vec<RemoteRecord>> {
    rows.iter()
        .map(|row| to_record(RecordSource::Ticket(kind), row))
        .collect()
}

pub fn ticket_records(batch: &TicketBatch) -> Result<Vec<RemoteRecord>> {
    match batch {
        TicketBatch::Availability(rows) => rows_to_records(TicketKind::Availability, rows),
        TicketBatch::Maintenance(rows) => rows_to_records(TicketKind::Maintenance, rows),
        TicketBatch::Repair(rows) => rows_to_records(TicketKind::Repair, rows),
        TicketBatch::CustomerCallback(rows) => {
            rows_to_records(TicketKind::CustomerCallback, rows)
        }
    }
}

fn device_fields(asset: &Asset, device: &Device) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        DEVICE_KEY_FIELD.to_string(),
        Value::String(device.dev_id.clone()),
    );
    let optional = |value: &Option<String>| value.clone().map(Value::String).unwrap_or(Value::Null);
    fields.insert("asset_name".to_string(), optional(&asset.asset_name));
    fields.insert(
        "asset_id".to_string(),
        asset.asset_id.clone().unwrap_or(Value::Null),
    );
    fields.insert("asset_type".to_string(), optional(&asset.asset_type));
    fields.insert("asset_space".to_string(), optional(&asset.asset_space));
    fields.insert("description".to_string(), optional(&device.description));
    fields.insert(
        "sample_rate".to_string(),
        device.sample_rate.clone().unwrap_or(Value::Null),
    );
    fields.insert(
        "sample_rate_extra".to_string(),
        device.sample_rate_extra.clone().unwrap_or(Value::Null),
    );
    fields.insert(
        "min_rest_between_cycles".to_string(),
        device.min_rest_between_cycles.clone().unwrap_or(Value::Null),
    );
    fields
}

/// One record per device, with the owning asset's fields merged in.
/// Devices without an id are dropped.
pub fn device_records(assets: &[Asset]) -> Vec<RemoteRecord> {
    assets
        .iter()
        .flat_map(|asset| asset.devices.iter().map(move |device| (asset, device)))
        .filter(|(_, device)| !device.dev_id.trim().is_empty())
        .map(|(asset, device)| RemoteRecord::new(RecordSource::Device, device_fields(asset, device)))
        .collect()
}

pub fn telemetry_records(dev_id: &str, telemetry: &[Telemetry]) -> Result<Vec<RemoteRecord>> {
    telemetry
        .iter()
        .map(|entry| {
            let mut record = to_record(RecordSource::Telemetry, entry)?;
            record.fields.insert(
                DEVICE_KEY_FIELD.to_string(),
                Value::String(dev_id.to_string()),
            );
            Ok(record)
        })
        .collect()
}

pub fn sample_records(source: RecordSource, samples: &[UnitSample]) -> Result<Vec<RemoteRecord>> {
    samples.iter().map(|sample| to_record(source, sample)).collect()
}
