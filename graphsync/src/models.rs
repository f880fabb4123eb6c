use crate::schema::TicketKind;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Root,
    Context,
    Category,
    Group,
    Equipment,
    Device,
    Metric,
    Process,
    Step,
    Ticket,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Root => "root",
            EntityKind::Context => "context",
            EntityKind::Category => "category",
            EntityKind::Group => "group",
            EntityKind::Equipment => "equipment",
            EntityKind::Device => "device",
            EntityKind::Metric => "metric",
            EntityKind::Process => "process",
            EntityKind::Step => "step",
            EntityKind::Ticket => "ticket",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw {
            "root" => EntityKind::Root,
            "context" => EntityKind::Context,
            "category" => EntityKind::Category,
            "group" => EntityKind::Group,
            "equipment" => EntityKind::Equipment,
            "device" => EntityKind::Device,
            "metric" => EntityKind::Metric,
            "process" => EntityKind::Process,
            "step" => EntityKind::Step,
            "ticket" => EntityKind::Ticket,
            _ => return None,
        };
        Some(kind)
    }
}

/// A node of the persisted graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub id: NodeId,
    pub name: String,
    pub kind: EntityKind,
}

/// Predicate used by `GraphStore::find_entities`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    pub name: Option<String>,
    pub kind: Option<EntityKind>,
}

impl EntityFilter {
    pub fn named(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: Some(name.into()),
            kind: Some(kind),
        }
    }

    pub fn of_kind(kind: EntityKind) -> Self {
        Self {
            name: None,
            kind: Some(kind),
        }
    }

    pub fn matches(&self, entity: &LocalEntity) -> bool {
        self.name.as_deref().map_or(true, |name| entity.name == name)
            && self.kind.map_or(true, |kind| entity.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Text,
    Number,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::Text => "text",
            AttributeType::Number => "number",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "number" => AttributeType::Number,
            _ => AttributeType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub label: String,
    pub value: String,
    pub value_type: AttributeType,
}

impl Attribute {
    pub fn text(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            value_type: AttributeType::Text,
        }
    }

    pub fn number(label: impl Into<String>, value: impl ToString) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
            value_type: AttributeType::Number,
        }
    }
}

/// Everything a new ticket is born with, written in one go.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub process: NodeId,
    /// Equipment node the ticket is also linked under.
    pub target: NodeId,
    pub name: String,
    pub attributes: Vec<(&'static str, Attribute)>,
    /// Resolved tickets start one step past the first.
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub key: String,
    pub unit: String,
    pub data_type: String,
}

/// Which feed a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "kind")]
pub enum RecordSource {
    Ticket(TicketKind),
    Device,
    Telemetry,
    Performance,
    Status,
}

/// A flat key/value snapshot fetched from the remote source of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub source: RecordSource,
    pub fields: Map<String, Value>,
}

impl RemoteRecord {
    pub fn new(source: RecordSource, fields: Map<String, Value>) -> Self {
        Self { source, fields }
    }

    /// Builds a record from any JSON value; non-object values yield no fields.
    pub fn from_value(source: RecordSource, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { source, fields }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// The field coerced to a string. Missing, null and blank values all become `""`.
    pub fn text(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) if s.trim().is_empty() => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn is_null(&self, field: &str) -> bool {
        matches!(self.fields.get(field), None | Some(Value::Null))
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.fields.get(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Accepts epoch milliseconds, RFC 3339 or the `YYYY-MM-DD hh:mm:ss[.f]` form the ticket feeds use.
    pub fn timestamp_millis(&self, field: &str) -> Option<i64> {
        match self.fields.get(field)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => parse_timestamp_millis(s.trim()),
            _ => None,
        }
    }
}

pub fn parse_timestamp_millis(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(millis) = raw.parse::<i64>() {
        return Some(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// What a single upsert did to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(NodeId),
    Updated(NodeId),
    Unchanged(NodeId),
    Suppressed,
}

impl UpsertOutcome {
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) | UpsertOutcome::Unchanged(id) => {
                Some(id)
            }
            UpsertOutcome::Suppressed => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_) | UpsertOutcome::Updated(_))
    }
}

/// Result of one `sync_once` pass over a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records handled without error, including no-ops and suppressed ones.
    pub processed: usize,
    /// Records dropped because their natural key did not resolve.
    pub skipped: usize,
    pub failed: usize,
    /// Records that caused a creation or update.
    pub created: usize,
}

impl SyncStats {
    pub fn record(&mut self, outcome: &UpsertOutcome) {
        self.processed += 1;
        if outcome.is_mutation() {
            self.created += 1;
        }
    }

    pub fn merge(&mut self, other: SyncStats) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.created += other.created;
    }
}

/// Per-stream progress marker, advanced only after a full successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub stream: String,
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncCursor {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            last_sync: None,
        }
    }

    pub fn advance(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Fetching,
    Reconciling,
    Sleeping,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopStatus {
    pub stream: String,
    pub state: LoopState,
    pub cycles: u64,
    pub failures: u64,
    pub last_stats: Option<SyncStats>,
    pub last_error: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl LoopStatus {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            state: LoopState::Idle,
            cycles: 0,
            failures: 0,
            last_stats: None,
            last_error: None,
            last_sync: None,
        }
    }
}

// --- Metadata Catalog (SQLite) Models ---

#[derive(Debug, Clone, Serialize)]
pub struct RunLog {
    pub run_id: i64,
    pub stream: String,
    pub start_time: i64, // Unix timestamp
    pub end_time: Option<i64>,
    pub status: String,
    pub details: String, // JSON string
}
