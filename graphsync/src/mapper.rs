use crate::config::HierarchyConfig;
use crate::errors::{Result, SyncError};
use crate::graph::{find_named_child, GraphStore};
use crate::models::{EntityKind, LocalEntity, NodeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Resolves natural keys (unit ids) to graph nodes.
///
/// The mapping is built by walking `context -> category -> group` and keying
/// every leaf under the group by its display name. It is rebuilt wholesale;
/// entries are never invalidated one by one, so a stale or missing key only
/// makes `resolve` return `None`.
pub struct EntityMapper {
    graph: Arc<dyn GraphStore>,
    hierarchy: HierarchyConfig,
    cache: RwLock<Option<HashMap<String, NodeId>>>,
}

impl EntityMapper {
    pub fn new(graph: Arc<dyn GraphStore>, hierarchy: HierarchyConfig) -> Self {
        Self {
            graph,
            hierarchy,
            cache: RwLock::new(None),
        }
    }

    async fn level(
        &self,
        scope: &NodeId,
        level: &'static str,
        name: &str,
        kind: EntityKind,
    ) -> Result<LocalEntity> {
        find_named_child(self.graph.as_ref(), scope, name, kind)
            .await?
            .ok_or_else(|| SyncError::MappingNotFound {
                level,
                name: name.to_string(),
            })
    }

    /// Rebuilds the mapping from the graph and swaps it in.
    pub async fn build(&self) -> Result<HashMap<String, NodeId>> {
        let root = self.graph.root_id();
        let context = self
            .level(&root, "context", &self.hierarchy.context, EntityKind::Context)
            .await?;
        let category = self
            .level(
                &context.id,
                "category",
                &self.hierarchy.category,
                EntityKind::Category,
            )
            .await?;
        let group = self
            .level(&category.id, "group", &self.hierarchy.group, EntityKind::Group)
            .await?;

        let mut mapping = HashMap::new();
        for leaf in self.graph.children(&group.id).await? {
            for key in split_composite_key(&leaf.name, &self.hierarchy.key_delimiter) {
                if let Some(previous) = mapping.insert(key.clone(), leaf.id.clone()) {
                    if previous != leaf.id {
                        log::warn!(
                            "Natural key '{}' appears on several nodes; keeping {}",
                            key,
                            leaf.id
                        );
                    }
                }
            }
        }

        log::info!(
            "Entity mapping built from '{}/{}/{}' with {} key(s).",
            self.hierarchy.context,
            self.hierarchy.category,
            self.hierarchy.group,
            mapping.len()
        );
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(mapping.clone());
        Ok(mapping)
    }

    pub fn resolve(&self, key: &str) -> Option<NodeId> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|mapping| mapping.get(key.trim()).cloned())
    }

    /// Known keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = guard
            .as_ref()
            .map(|mapping| mapping.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_built(&self) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// `"ABC1 / ABC2"` -> `["ABC1", "ABC2"]`; blank parts are dropped.
pub fn split_composite_key(name: &str, delimiter: &str) -> Vec<String> {
    name.split(delimiter)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
