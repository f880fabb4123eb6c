use crate::errors::Result;
use crate::models::{
    Attribute, EntityFilter, EntityKind, LocalEntity, MetricSpec, NewTicket, NodeId,
};
use async_trait::async_trait;

/// The persisted graph the engine converges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    fn root_id(&self) -> NodeId;

    /// All descendants of `scope` matching `filter`, in creation order.
    async fn find_entities(&self, scope: &NodeId, filter: &EntityFilter)
        -> Result<Vec<LocalEntity>>;

    async fn children(&self, node: &NodeId) -> Result<Vec<LocalEntity>>;

    async fn create_entity(&self, parent: &NodeId, name: &str, kind: EntityKind)
        -> Result<NodeId>;

    async fn add_child(&self, parent: &NodeId, child: &NodeId) -> Result<()>;

    /// Creates the ticket node, its links, attributes and workflow position
    /// atomically: on error nothing of the ticket is left behind.
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<NodeId>;

    async fn create_child_metric(&self, entity: &NodeId, spec: &MetricSpec) -> Result<NodeId>;

    async fn get_attributes_by_category(
        &self,
        entity: &NodeId,
        category: &str,
    ) -> Result<Vec<Attribute>>;

    /// Inserts the attribute or overwrites the one with the same label in `category`.
    async fn add_attribute(&self, entity: &NodeId, category: &str, attribute: Attribute)
        -> Result<()>;

    /// Moves `entity` to the step following its current one in `process`.
    async fn advance_workflow_step(&self, process: &NodeId, entity: &NodeId) -> Result<()>;

    async fn workflow_step(&self, process: &NodeId, entity: &NodeId) -> Result<Option<String>>;
}

/// Append-only readings keyed by metric node.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn append(&self, metric: &NodeId, value: f64, timestamp_millis: i64) -> Result<()>;

    async fn set_current_value(&self, metric: &NodeId, value: f64) -> Result<()>;
}

/// Looks up the single child of `scope` with the given name and kind.
pub async fn find_named_child(
    graph: &dyn GraphStore,
    scope: &NodeId,
    name: &str,
    kind: EntityKind,
) -> Result<Option<LocalEntity>> {
    let filter = EntityFilter::named(name, kind);
    Ok(graph
        .children(scope)
        .await?
        .into_iter()
        .find(|entity| filter.matches(entity)))
}
