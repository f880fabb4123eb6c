use serde::{Deserialize, Serialize};
use serde_json::Value;

// Ticket feeds. Every field is optional: the gateway omits or nulls fields
// freely, and the sentinel rows only carry `Message`.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub unit_id: Option<String>,
    pub unit_display_name: Option<String>,
    pub building_id: Option<String>,
    pub building_name: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityTicket {
    #[serde(flatten)]
    pub unit: UnitInfo,
    pub mechanic_name: Option<String>,
    pub stop_datetime: Option<String>,
    pub back_in_service_datetime: Option<String>,
    pub resolution: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTicket {
    #[serde(flatten)]
    pub unit: UnitInfo,
    pub completed_date: Option<String>,
    pub mechanic_name: Option<String>,
    pub type_of_visit: Option<String>,
    pub resolution: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairTicket {
    #[serde(flatten)]
    pub unit: UnitInfo,
    pub restart_datetime: Option<String>,
    pub mechanic_name: Option<String>,
    pub repair_description: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackTicket {
    #[serde(flatten)]
    pub unit: UnitInfo,
    pub call_datetime: Option<String>,
    pub caller_name: Option<String>,
    pub mechanic_dispatched: Option<String>,
    pub mechanic_arrived: Option<String>,
    pub mechanic_name: Option<String>,
    pub closeout_datetime: Option<String>,
    pub customer_percept_text: Option<String>,
    pub customer_service_request_id: Option<String>,
    pub resolution: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
}

/// A decoded ticket feed response.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketBatch {
    Availability(Vec<AvailabilityTicket>),
    Maintenance(Vec<MaintenanceTicket>),
    Repair(Vec<RepairTicket>),
    CustomerCallback(Vec<CallbackTicket>),
}

impl TicketBatch {
    pub fn len(&self) -> usize {
        match self {
            TicketBatch::Availability(rows) => rows.len(),
            TicketBatch::Maintenance(rows) => rows.len(),
            TicketBatch::Repair(rows) => rows.len(),
            TicketBatch::CustomerCallback(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// IoT inventory: assets own devices, devices carry their last telemetry.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub value: Value,
    pub unit: Option<String>,
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub dev_id: String,
    pub description: Option<String>,
    pub sample_rate: Option<Value>,
    pub sample_rate_extra: Option<Value>,
    pub min_rest_between_cycles: Option<Value>,
    #[serde(default)]
    pub last_telemetry: Vec<Telemetry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_name: Option<String>,
    pub asset_id: Option<Value>,
    pub asset_type: Option<String>,
    pub asset_space: Option<String>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetResponse {
    #[serde(default)]
    pub data: Vec<Asset>,
}

/// One performance or status reading of a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitSample {
    pub unit_id: String,
    pub data_type: String,
    #[serde(default)]
    pub value: Value,
    pub unit: Option<String>,
    pub timestamp: Option<Value>,
}
