use crate::equivalence::EquivalenceChecker;
use crate::errors::{Result, SyncError};
use crate::graph::{GraphStore, TimeSeriesStore};
use crate::models::{
    Attribute, EntityFilter, EntityKind, MetricSpec, NewTicket, NodeId, RemoteRecord,
    UpsertOutcome,
};
use crate::schema::{
    Sentinel, TicketKind, DEVICE_FIELDS, DEVICE_KEY_FIELD, RETENTION_CATEGORY, RETENTION_LABEL,
    UNIT_KEY_FIELD,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Where tickets of one kind live and when they must be ignored.
#[derive(Debug, Clone)]
pub struct TicketScope {
    pub kind: TicketKind,
    pub process: NodeId,
    pub sentinel: Sentinel,
}

pub fn is_suppressed(record: &RemoteRecord, sentinel: &Sentinel) -> bool {
    record.text(&sentinel.field).trim() == sentinel.value.trim()
}

/// `"{unit_id} - {title}"`, falling back to the kind label when the title is blank.
pub fn ticket_name(kind: TicketKind, record: &RemoteRecord) -> String {
    let title = record.text(kind.title_field());
    let title = title.trim();
    let title = if title.is_empty() { kind.label() } else { title };
    format!("{} - {}", record.text(UNIT_KEY_FIELD).trim(), title)
}

/// Create-if-absent, no-op-if-equivalent writes against the graph.
pub struct Upserter {
    graph: Arc<dyn GraphStore>,
    series: Arc<dyn TimeSeriesStore>,
    checker: EquivalenceChecker,
    timeseries_max_days: u32,
}

impl Upserter {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        series: Arc<dyn TimeSeriesStore>,
        timeseries_max_days: u32,
    ) -> Self {
        Self {
            checker: EquivalenceChecker::new(Arc::clone(&graph)),
            graph,
            series,
            timeseries_max_days,
        }
    }

    /// Creates a ticket for `record` unless it is suppressed or an equivalent
    /// ticket with the same name already exists in the process.
    pub async fn upsert_ticket(
        &self,
        scope: &TicketScope,
        target: &NodeId,
        record: &RemoteRecord,
    ) -> Result<UpsertOutcome> {
        let kind = scope.kind;
        if is_suppressed(record, &scope.sentinel) {
            log::debug!(
                "Suppressed {} record for unit '{}'",
                kind,
                record.text(UNIT_KEY_FIELD)
            );
            return Ok(UpsertOutcome::Suppressed);
        }

        let name = ticket_name(kind, record);
        let candidates = self
            .graph
            .find_entities(&scope.process, &EntityFilter::named(&name, EntityKind::Ticket))
            .await?;
        for candidate in &candidates {
            if self
                .checker
                .are_equal(record, candidate, kind.category())
                .await?
            {
                return Ok(UpsertOutcome::Unchanged(candidate.id.clone()));
            }
        }

        let attributes = kind
            .field_specs()
            .into_iter()
            .map(|spec| {
                (
                    spec.category,
                    Attribute::text(spec.label, record.text(spec.field)),
                )
            })
            .collect();
        let id = self
            .graph
            .create_ticket(&NewTicket {
                process: scope.process.clone(),
                target: target.clone(),
                name: name.clone(),
                attributes,
                completed: !record.text(kind.completion_field()).is_empty(),
            })
            .await?;

        log::info!("Created {} ticket '{}' ({})", kind, name, id);
        Ok(UpsertOutcome::Created(id))
    }

    /// Devices are identified by name: absent ones are created with their
    /// attributes, present ones get only their changed attributes rewritten.
    pub async fn upsert_device(
        &self,
        network: &NodeId,
        record: &RemoteRecord,
    ) -> Result<UpsertOutcome> {
        let key = record.text(DEVICE_KEY_FIELD);
        let key = key.trim();
        if key.is_empty() {
            return Err(SyncError::upsert("<device>", "record has no dev_id"));
        }

        let existing = self
            .graph
            .find_entities(network, &EntityFilter::named(key, EntityKind::Device))
            .await?;

        let Some(device) = existing.into_iter().next() else {
            let id = self
                .graph
                .create_entity(network, key, EntityKind::Device)
                .await?;
            for spec in DEVICE_FIELDS {
                self.graph
                    .add_attribute(
                        &id,
                        spec.category,
                        Attribute::text(spec.label, record.text(spec.field)),
                    )
                    .await?;
            }
            log::info!("Created device '{}' ({})", key, id);
            return Ok(UpsertOutcome::Created(id));
        };

        let mut stored: HashMap<&str, HashMap<String, String>> = HashMap::new();
        let mut changed = false;
        for spec in DEVICE_FIELDS {
            if !record.has_field(spec.field) {
                continue;
            }
            if !stored.contains_key(spec.category) {
                let attributes = self
                    .graph
                    .get_attributes_by_category(&device.id, spec.category)
                    .await?;
                stored.insert(
                    spec.category,
                    attributes
                        .into_iter()
                        .map(|attribute| (attribute.label, attribute.value))
                        .collect(),
                );
            }
            let desired = record.text(spec.field);
            let current = stored
                .get(spec.category)
                .and_then(|labels| labels.get(spec.label));
            if current.map(|value| value.trim()) != Some(desired.trim()) {
                self.graph
                    .add_attribute(
                        &device.id,
                        spec.category,
                        Attribute::text(spec.label, desired),
                    )
                    .await?;
                changed = true;
            }
        }

        if changed {
            log::debug!("Updated attributes of device '{}'", key);
            Ok(UpsertOutcome::Updated(device.id))
        } else {
            Ok(UpsertOutcome::Unchanged(device.id))
        }
    }

    /// Ensures the metric node exists, then appends the reading and sets it as
    /// the current value. Readings are never deduplicated.
    pub async fn upsert_metric(
        &self,
        entity: &NodeId,
        spec: &MetricSpec,
        value: f64,
        timestamp_millis: i64,
    ) -> Result<UpsertOutcome> {
        let existing = self
            .graph
            .find_entities(entity, &EntityFilter::named(&spec.key, EntityKind::Metric))
            .await?;

        let outcome = match existing.into_iter().next() {
            Some(metric) => UpsertOutcome::Updated(metric.id),
            None => {
                let id = self.graph.create_child_metric(entity, spec).await?;
                self.graph
                    .add_attribute(
                        &id,
                        RETENTION_CATEGORY,
                        Attribute::number(RETENTION_LABEL, self.timeseries_max_days),
                    )
                    .await?;
                log::debug!("Created metric '{}' under {}", spec.key, entity);
                UpsertOutcome::Created(id)
            }
        };

        if let Some(metric) = outcome.node_id() {
            self.series.append(metric, value, timestamp_millis).await?;
            self.series.set_current_value(metric, value).await?;
        }
        Ok(outcome)
    }
}
