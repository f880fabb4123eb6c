//! Field schemas of the remote feeds and how they land as graph attributes.

use serde::{Deserialize, Serialize};

/// One remote field and the attribute it is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: &'static str,
    pub category: &'static str,
    pub label: &'static str,
}

/// A remote field value meaning "no real event occurred".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinel {
    pub field: String,
    pub value: String,
}

impl Sentinel {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

pub const MESSAGE_FIELD: &str = "Message";
pub const NEVER_SHUTDOWN_MESSAGE: &str = "This unit was never shutdown in last 12 months";
pub const NO_DATA_MESSAGE: &str = "No Data Available";

const UNIT_FIELDS: [&str; 7] = [
    "unit_id",
    "unit_display_name",
    "building_id",
    "building_name",
    "street_address",
    "city",
    "postal_code",
];

const AVAILABILITY_FIELDS: [&str; 12] = [
    UNIT_FIELDS[0],
    UNIT_FIELDS[1],
    UNIT_FIELDS[2],
    UNIT_FIELDS[3],
    UNIT_FIELDS[4],
    UNIT_FIELDS[5],
    UNIT_FIELDS[6],
    "mechanic_name",
    "stop_datetime",
    "back_in_service_datetime",
    "resolution",
    MESSAGE_FIELD,
];

const MAINTENANCE_FIELDS: [&str; 12] = [
    UNIT_FIELDS[0],
    UNIT_FIELDS[1],
    UNIT_FIELDS[2],
    UNIT_FIELDS[3],
    UNIT_FIELDS[4],
    UNIT_FIELDS[5],
    UNIT_FIELDS[6],
    "completed_date",
    "mechanic_name",
    "type_of_visit",
    "resolution",
    MESSAGE_FIELD,
];

const REPAIR_FIELDS: [&str; 11] = [
    UNIT_FIELDS[0],
    UNIT_FIELDS[1],
    UNIT_FIELDS[2],
    UNIT_FIELDS[3],
    UNIT_FIELDS[4],
    UNIT_FIELDS[5],
    UNIT_FIELDS[6],
    "restart_datetime",
    "mechanic_name",
    "repair_description",
    MESSAGE_FIELD,
];

const CUSTOMER_CALLBACK_FIELDS: [&str; 17] = [
    UNIT_FIELDS[0],
    UNIT_FIELDS[1],
    UNIT_FIELDS[2],
    UNIT_FIELDS[3],
    UNIT_FIELDS[4],
    UNIT_FIELDS[5],
    UNIT_FIELDS[6],
    "call_datetime",
    "caller_name",
    "mechanic_dispatched",
    "mechanic_arrived",
    "mechanic_name",
    "closeout_datetime",
    "customer_percept_text",
    "customer_service_request_id",
    "resolution",
    MESSAGE_FIELD,
];

/// The four ticket feeds. Each variant owns its field schema, the attribute
/// category its fields are mirrored into and its suppression sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Availability,
    Maintenance,
    Repair,
    CustomerCallback,
}

impl TicketKind {
    pub const ALL: [TicketKind; 4] = [
        TicketKind::Availability,
        TicketKind::Maintenance,
        TicketKind::Repair,
        TicketKind::CustomerCallback,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TicketKind::Availability => "availability",
            TicketKind::Maintenance => "maintenance",
            TicketKind::Repair => "repair",
            TicketKind::CustomerCallback => "customer_callback",
        }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            TicketKind::Availability => &AVAILABILITY_FIELDS,
            TicketKind::Maintenance => &MAINTENANCE_FIELDS,
            TicketKind::Repair => &REPAIR_FIELDS,
            TicketKind::CustomerCallback => &CUSTOMER_CALLBACK_FIELDS,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            TicketKind::Availability => "Otis Availability",
            TicketKind::Maintenance => "Otis Maintenance",
            TicketKind::Repair => "Otis Repair",
            TicketKind::CustomerCallback => "Otis Customer Callback",
        }
    }

    /// Field whose value names the ticket.
    pub fn title_field(&self) -> &'static str {
        match self {
            TicketKind::Availability => "resolution",
            TicketKind::Maintenance => "type_of_visit",
            TicketKind::Repair => "repair_description",
            TicketKind::CustomerCallback => "customer_percept_text",
        }
    }

    /// Field that is filled once the event is over.
    pub fn completion_field(&self) -> &'static str {
        match self {
            TicketKind::Availability => "back_in_service_datetime",
            TicketKind::Maintenance => "completed_date",
            TicketKind::Repair => "restart_datetime",
            TicketKind::CustomerCallback => "closeout_datetime",
        }
    }

    pub fn default_sentinel(&self) -> Sentinel {
        match self {
            TicketKind::Availability => Sentinel::new(MESSAGE_FIELD, NEVER_SHUTDOWN_MESSAGE),
            _ => Sentinel::new(MESSAGE_FIELD, NO_DATA_MESSAGE),
        }
    }

    pub fn field_specs(&self) -> Vec<FieldSpec> {
        let category = self.category();
        self.fields()
            .iter()
            .map(|&field| FieldSpec {
                field,
                category,
                label: field,
            })
            .collect()
    }
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub const ASSET_CATEGORY: &str = "Asset";
pub const DEVICE_CATEGORY: &str = "Device";

/// Device inventory records carry their asset's fields under an `asset_` prefix.
pub const DEVICE_FIELDS: [FieldSpec; 8] = [
    FieldSpec {
        field: "asset_name",
        category: ASSET_CATEGORY,
        label: "Name",
    },
    FieldSpec {
        field: "asset_id",
        category: ASSET_CATEGORY,
        label: "Id",
    },
    FieldSpec {
        field: "asset_type",
        category: ASSET_CATEGORY,
        label: "Type",
    },
    FieldSpec {
        field: "asset_space",
        category: ASSET_CATEGORY,
        label: "Space",
    },
    FieldSpec {
        field: "description",
        category: DEVICE_CATEGORY,
        label: "Description",
    },
    FieldSpec {
        field: "sample_rate",
        category: DEVICE_CATEGORY,
        label: "Sample rate",
    },
    FieldSpec {
        field: "sample_rate_extra",
        category: DEVICE_CATEGORY,
        label: "Sample rate extra",
    },
    FieldSpec {
        field: "min_rest_between_cycles",
        category: DEVICE_CATEGORY,
        label: "Min rest between cycles",
    },
];

pub const DEVICE_KEY_FIELD: &str = "dev_id";
pub const UNIT_KEY_FIELD: &str = "unit_id";

/// Fields shared by telemetry, performance and status samples.
pub const SAMPLE_ID_FIELD: &str = "id";
pub const SAMPLE_TYPE_FIELD: &str = "data_type";
pub const SAMPLE_VALUE_FIELD: &str = "value";
pub const SAMPLE_UNIT_FIELD: &str = "unit";
pub const SAMPLE_TIME_FIELD: &str = "timestamp";

pub const RETENTION_CATEGORY: &str = "default";
pub const RETENTION_LABEL: &str = "timeSeries maxDay";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_carries_its_message_and_key_fields() {
        for kind in TicketKind::ALL {
            let fields = kind.fields();
            assert!(fields.contains(&UNIT_KEY_FIELD), "{kind}");
            assert!(fields.contains(&MESSAGE_FIELD), "{kind}");
            assert!(fields.contains(&kind.title_field()), "{kind}");
            assert!(fields.contains(&kind.completion_field()), "{kind}");
        }
    }

    #[test]
    fn only_availability_uses_the_never_shutdown_sentinel() {
        assert_eq!(
            TicketKind::Availability.default_sentinel().value,
            NEVER_SHUTDOWN_MESSAGE
        );
        assert_eq!(TicketKind::Repair.default_sentinel().value, NO_DATA_MESSAGE);
    }

    #[test]
    fn device_labels_are_unique_per_category() {
        let mut seen = std::collections::HashSet::new();
        for spec in DEVICE_FIELDS {
            assert!(seen.insert((spec.category, spec.label)));
        }
    }
}
