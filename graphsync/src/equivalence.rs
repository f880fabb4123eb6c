use crate::errors::Result;
use crate::graph::GraphStore;
use crate::models::{Attribute, LocalEntity, RemoteRecord};
use std::sync::Arc;

/// Decides whether a fetched record is already represented by a local entity.
pub struct EquivalenceChecker {
    graph: Arc<dyn GraphStore>,
}

impl EquivalenceChecker {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    pub async fn are_equal(
        &self,
        record: &RemoteRecord,
        entity: &LocalEntity,
        category: &str,
    ) -> Result<bool> {
        let attributes = self
            .graph
            .get_attributes_by_category(&entity.id, category)
            .await?;
        Ok(attributes_match(record, &attributes))
    }
}

/// One-directional comparison: every stored attribute that the record also
/// carries must agree after trimming. Attributes the record lacks are ignored,
/// so an entity with no stored attributes matches anything.
pub fn attributes_match(record: &RemoteRecord, attributes: &[Attribute]) -> bool {
    attributes
        .iter()
        .filter(|attribute| record.has_field(&attribute.label))
        .all(|attribute| record.text(&attribute.label).trim() == attribute.value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSource;
    use crate::schema::TicketKind;
    use serde_json::json;

    fn record() -> RemoteRecord {
        RemoteRecord::from_value(
            RecordSource::Ticket(TicketKind::Maintenance),
            json!({
                "unit_id": "U1",
                "resolution": "Visite annuelle ",
                "mechanic_name": null,
                "new_field": "x"
            }),
        )
    }

    #[test]
    fn no_stored_attributes_is_vacuously_equal() {
        assert!(attributes_match(&record(), &[]));
    }

    #[test]
    fn values_are_compared_trimmed() {
        let attributes = vec![
            Attribute::text("unit_id", "U1"),
            Attribute::text("resolution", " Visite annuelle"),
            Attribute::text("mechanic_name", ""),
        ];
        assert!(attributes_match(&record(), &attributes));
    }

    #[test]
    fn a_single_mismatch_breaks_equality() {
        let attributes = vec![
            Attribute::text("unit_id", "U1"),
            Attribute::text("resolution", "Remplacement"),
        ];
        assert!(!attributes_match(&record(), &attributes));
    }

    #[test]
    fn attributes_missing_from_the_record_are_ignored() {
        let attributes = vec![
            Attribute::text("unit_id", "U1"),
            Attribute::text("stop_datetime", "2020-02-21"),
        ];
        assert!(attributes_match(&record(), &attributes));
    }
}
