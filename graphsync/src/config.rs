use crate::errors::{Result, SyncError};
use crate::schema::{Sentinel, TicketKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfig {
    pub catalog_path: PathBuf,
    pub graph_path: PathBuf,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            catalog_path: base_path.join("catalog.sqlite"),
            graph_path: base_path.join("graph.sqlite"),
        }
    }
}

/// Names of the fixed `context -> category -> group` path the mapper walks.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HierarchyConfig {
    pub context: String,
    pub category: String,
    pub group: String,
    /// Splits composite leaf names such as `"ABC1/ABC2"` into one key per unit.
    pub key_delimiter: String,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            context: "Equipments".to_string(),
            category: "Elevators".to_string(),
            group: "Otis".to_string(),
            key_delimiter: "/".to_string(),
        }
    }
}

/// Workflow process names, one per ticket feed.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProcessNames {
    pub availability: String,
    pub maintenance: String,
    pub repair: String,
    pub customer_callback: String,
}

impl Default for ProcessNames {
    fn default() -> Self {
        Self {
            availability: "Availability".to_string(),
            maintenance: "Maintenance".to_string(),
            repair: "Repair".to_string(),
            customer_callback: "Customer Callback".to_string(),
        }
    }
}

impl ProcessNames {
    pub fn for_kind(&self, kind: TicketKind) -> &str {
        match kind {
            TicketKind::Availability => &self.availability,
            TicketKind::Maintenance => &self.maintenance,
            TicketKind::Repair => &self.repair,
            TicketKind::CustomerCallback => &self.customer_callback,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSchedule {
    /// Zero disables the stream.
    pub interval_ms: u64,
    #[serde(default)]
    pub initial_delay_ms: u64,
}

impl StreamSchedule {
    pub fn every(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            initial_delay_ms: interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_ms > 0
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Schedules {
    pub tickets: StreamSchedule,
    pub telemetry: StreamSchedule,
    pub performance: StreamSchedule,
    pub status: StreamSchedule,
    pub mapping_refresh: StreamSchedule,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            tickets: StreamSchedule::every(15 * 60 * 1000),
            telemetry: StreamSchedule::every(60 * 1000),
            performance: StreamSchedule::every(60 * 60 * 1000),
            status: StreamSchedule::every(5 * 60 * 1000),
            mapping_refresh: StreamSchedule::every(24 * 60 * 60 * 1000),
        }
    }
}

/// Everything the reconciliation engine needs, passed once at construction.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub hierarchy: HierarchyConfig,
    pub network_context: String,
    pub ticket_context: String,
    pub processes: ProcessNames,
    pub ticket_kinds: Vec<TicketKind>,
    /// Overrides of the per-kind suppression sentinel.
    pub sentinels: HashMap<TicketKind, Sentinel>,
    pub schedules: Schedules,
    pub cooldown_ms: u64,
    pub cycle_timeout_ms: Option<u64>,
    pub performance_lookback_ms: u64,
    pub timeseries_max_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hierarchy: HierarchyConfig::default(),
            network_context: "Otis Network".to_string(),
            ticket_context: "Tickets".to_string(),
            processes: ProcessNames::default(),
            ticket_kinds: TicketKind::ALL.to_vec(),
            sentinels: HashMap::new(),
            schedules: Schedules::default(),
            cooldown_ms: 60 * 1000,
            cycle_timeout_ms: None,
            performance_lookback_ms: 24 * 60 * 60 * 1000,
            timeseries_max_days: 366,
        }
    }
}

/// Upper bound for `performance_lookback_ms`: one leap year.
pub const MAX_PERFORMANCE_LOOKBACK_MS: u64 = 366 * 24 * 60 * 60 * 1000;

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let hierarchy = [
            ("hierarchy.context", &self.hierarchy.context),
            ("hierarchy.category", &self.hierarchy.category),
            ("hierarchy.group", &self.hierarchy.group),
            ("network_context", &self.network_context),
            ("ticket_context", &self.ticket_context),
        ];
        for (key, value) in hierarchy {
            if value.trim().is_empty() {
                return Err(SyncError::Config(format!("{key} must not be empty")));
            }
        }
        if self.hierarchy.key_delimiter.is_empty() {
            return Err(SyncError::Config(
                "hierarchy.key_delimiter must not be empty".to_string(),
            ));
        }
        if self.cooldown_ms == 0 {
            return Err(SyncError::Config("cooldown_ms must be positive".to_string()));
        }
        if self.performance_lookback_ms > MAX_PERFORMANCE_LOOKBACK_MS {
            return Err(SyncError::Config(format!(
                "performance_lookback_ms must be at most {MAX_PERFORMANCE_LOOKBACK_MS}"
            )));
        }
        Ok(())
    }

    pub fn sentinel_for(&self, kind: TicketKind) -> Sentinel {
        self.sentinels
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.default_sentinel())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_ms.map(Duration::from_millis)
    }

    pub fn performance_lookback(&self) -> Duration {
        Duration::from_millis(self.performance_lookback_ms)
    }
}
