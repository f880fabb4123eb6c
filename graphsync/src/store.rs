use crate::config::StorageConfig;
use crate::errors::{Result, SyncError};
use crate::graph::{GraphStore, TimeSeriesStore};
use crate::models::{
    Attribute, AttributeType, EntityFilter, EntityKind, LocalEntity, MetricSpec, NewTicket,
    NodeId,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub const ROOT_ID: &str = "root";

/// Graph and time-series store kept in one SQLite file.
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let conn = Connection::open(&config.graph_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS relations (
                parent_id TEXT NOT NULL,
                child_id TEXT NOT NULL,
                PRIMARY KEY (parent_id, child_id)
            );
            CREATE TABLE IF NOT EXISTS attributes (
                node_id TEXT NOT NULL,
                category TEXT NOT NULL,
                label TEXT NOT NULL,
                value TEXT NOT NULL,
                value_type TEXT NOT NULL,
                PRIMARY KEY (node_id, category, label)
            );
            CREATE TABLE IF NOT EXISTS metrics (
                node_id TEXT PRIMARY KEY,
                unit TEXT NOT NULL,
                data_type TEXT NOT NULL,
                current_value REAL
            );
            CREATE TABLE IF NOT EXISTS points (
                metric_id TEXT NOT NULL,
                value REAL NOT NULL,
                ts INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS points_by_metric ON points (metric_id, ts);
            CREATE TABLE IF NOT EXISTS workflow (
                process_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                PRIMARY KEY (process_id, entity_id)
            );
            COMMIT;",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO nodes (id, name, kind) VALUES (?1, ?1, ?2)",
            params![ROOT_ID, EntityKind::Root.as_str()],
        )?;
        Ok(())
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<LocalEntity>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, name, kind FROM nodes WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        row.map(|(id, name, kind)| to_entity(id, name, &kind))
            .transpose()
    }

    pub fn count_entities(&self, kind: EntityKind) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM nodes WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_attributes(&self, entity: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attributes WHERE node_id = ?1",
            params![entity],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Stored readings of a metric as `(timestamp_millis, value)`, oldest first.
    pub fn points(&self, metric: &str) -> Result<Vec<(i64, f64)>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT ts, value FROM points WHERE metric_id = ?1 ORDER BY ts, rowid")?;
        let rows = stmt.query_map(params![metric], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn current_value(&self, metric: &str) -> Result<Option<f64>> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT current_value FROM metrics WHERE node_id = ?1",
                params![metric],
                |row| row.get::<_, Option<f64>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    fn steps_of(conn: &Connection, process: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT n.name FROM nodes n
             JOIN relations r ON r.child_id = n.id
             WHERE r.parent_id = ?1 AND n.kind = ?2
             ORDER BY n.rowid",
        )?;
        let rows = stmt.query_map(params![process, EntityKind::Step.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn write_attribute(
    conn: &Connection,
    entity: &NodeId,
    category: &str,
    attribute: &Attribute,
) -> Result<()> {
    conn.execute(
        "INSERT INTO attributes (node_id, category, label, value, value_type)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(node_id, category, label) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type",
        params![
            entity,
            category,
            attribute.label,
            attribute.value,
            attribute.value_type.as_str()
        ],
    )?;
    Ok(())
}

fn to_entity(id: String, name: String, kind: &str) -> Result<LocalEntity> {
    let kind = EntityKind::parse(kind)
        .ok_or_else(|| SyncError::NotFound(format!("unknown entity kind '{kind}' on {id}")))?;
    Ok(LocalEntity { id, name, kind })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    fn root_id(&self) -> NodeId {
        ROOT_ID.to_string()
    }

    async fn find_entities(
        &self,
        scope: &NodeId,
        filter: &EntityFilter,
    ) -> Result<Vec<LocalEntity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH RECURSIVE descendants(id) AS (
                SELECT child_id FROM relations WHERE parent_id = ?1
                UNION
                SELECT r.child_id FROM relations r JOIN descendants d ON r.parent_id = d.id
            )
            SELECT n.id, n.name, n.kind FROM nodes n
            JOIN descendants d ON n.id = d.id
            WHERE (?2 IS NULL OR n.name = ?2) AND (?3 IS NULL OR n.kind = ?3)
            ORDER BY n.rowid",
        )?;
        let rows = stmt.query_map(
            params![
                scope,
                filter.name.as_deref(),
                filter.kind.map(|kind| kind.as_str())
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, String>(2)?)),
        )?;

        let mut entities = Vec::new();
        for row in rows {
            let (id, name, kind) = row?;
            entities.push(to_entity(id, name, &kind)?);
        }
        Ok(entities)
    }

    async fn children(&self, node: &NodeId) -> Result<Vec<LocalEntity>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT n.id, n.name, n.kind FROM nodes n
             JOIN relations r ON r.child_id = n.id
             WHERE r.parent_id = ?1
             ORDER BY n.rowid",
        )?;
        let rows = stmt.query_map(params![node], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get::<_, String>(2)?))
        })?;

        let mut entities = Vec::new();
        for row in rows {
            let (id, name, kind) = row?;
            entities.push(to_entity(id, name, &kind)?);
        }
        Ok(entities)
    }

    async fn create_entity(
        &self,
        parent: &NodeId,
        name: &str,
        kind: EntityKind,
    ) -> Result<NodeId> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let parent_kind: Option<String> = tx
            .query_row(
                "SELECT kind FROM nodes WHERE id = ?1",
                params![parent],
                |row| row.get(0),
            )
            .optional()?;
        let parent_kind =
            parent_kind.ok_or_else(|| SyncError::NotFound(format!("parent node {parent}")))?;

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO nodes (id, name, kind) VALUES (?1, ?2, ?3)",
            params![id, name, kind.as_str()],
        )?;
        tx.execute(
            "INSERT INTO relations (parent_id, child_id) VALUES (?1, ?2)",
            params![parent, id],
        )?;
        // Tickets created inside a process start on its first step.
        if kind == EntityKind::Ticket && parent_kind == EntityKind::Process.as_str() {
            tx.execute(
                "INSERT INTO workflow (process_id, entity_id, step_index) VALUES (?1, ?2, 0)",
                params![parent, id],
            )?;
        }
        tx.commit()?;

        log::debug!("Inserting node: {} ({} '{}')", id, kind.as_str(), name);
        Ok(id)
    }

    async fn add_child(&self, parent: &NodeId, child: &NodeId) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO relations (parent_id, child_id) VALUES (?1, ?2)",
            params![parent, child],
        )?;
        Ok(())
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<NodeId> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let process_kind: Option<String> = tx
            .query_row(
                "SELECT kind FROM nodes WHERE id = ?1",
                params![ticket.process],
                |row| row.get(0),
            )
            .optional()?;
        if process_kind.as_deref() != Some(EntityKind::Process.as_str()) {
            return Err(SyncError::NotFound(format!("process {}", ticket.process)));
        }
        let steps = Self::steps_of(&tx, &ticket.process)?;
        if ticket.completed && steps.is_empty() {
            return Err(SyncError::NotFound(format!(
                "process {} has no workflow steps",
                ticket.process
            )));
        }
        let step_index = if ticket.completed {
            1.min(steps.len() as i64 - 1)
        } else {
            0
        };

        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO nodes (id, name, kind) VALUES (?1, ?2, ?3)",
            params![id, ticket.name, EntityKind::Ticket.as_str()],
        )?;
        for parent in [&ticket.process, &ticket.target] {
            tx.execute(
                "INSERT OR IGNORE INTO relations (parent_id, child_id) VALUES (?1, ?2)",
                params![parent, id],
            )?;
        }
        for (category, attribute) in &ticket.attributes {
            write_attribute(&tx, &id, category, attribute)?;
        }
        tx.execute(
            "INSERT INTO workflow (process_id, entity_id, step_index) VALUES (?1, ?2, ?3)",
            params![ticket.process, id, step_index],
        )?;
        tx.commit()?;

        log::debug!("Inserting ticket: {} ('{}', step {})", id, ticket.name, step_index);
        Ok(id)
    }

    async fn create_child_metric(&self, entity: &NodeId, spec: &MetricSpec) -> Result<NodeId> {
        let id = self
            .create_entity(entity, &spec.key, EntityKind::Metric)
            .await?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO metrics (node_id, unit, data_type, current_value) VALUES (?1, ?2, ?3, NULL)",
            params![id, spec.unit, spec.data_type],
        )?;
        Ok(id)
    }

    async fn get_attributes_by_category(
        &self,
        entity: &NodeId,
        category: &str,
    ) -> Result<Vec<Attribute>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT label, value, value_type FROM attributes
             WHERE node_id = ?1 AND category = ?2
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![entity, category], |row| {
            Ok(Attribute {
                label: row.get(0)?,
                value: row.get(1)?,
                value_type: AttributeType::parse(&row.get::<_, String>(2)?),
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    async fn add_attribute(
        &self,
        entity: &NodeId,
        category: &str,
        attribute: Attribute,
    ) -> Result<()> {
        let conn = self.conn();
        write_attribute(&conn, entity, category, &attribute)
    }

    async fn advance_workflow_step(&self, process: &NodeId, entity: &NodeId) -> Result<()> {
        let conn = self.conn();
        let steps = Self::steps_of(&conn, process)?;
        if steps.is_empty() {
            return Err(SyncError::NotFound(format!(
                "process {process} has no workflow steps"
            )));
        }

        let current: Option<i64> = conn
            .query_row(
                "SELECT step_index FROM workflow WHERE process_id = ?1 AND entity_id = ?2",
                params![process, entity],
                |row| row.get(0),
            )
            .optional()?;
        let last = steps.len() as i64 - 1;
        let next = current.map_or(1, |idx| idx + 1).min(last);

        conn.execute(
            "INSERT INTO workflow (process_id, entity_id, step_index) VALUES (?1, ?2, ?3)
             ON CONFLICT(process_id, entity_id) DO UPDATE SET step_index = excluded.step_index",
            params![process, entity, next],
        )?;
        log::debug!(
            "Ticket {} moved to step '{}' of process {}",
            entity,
            steps[next as usize],
            process
        );
        Ok(())
    }

    async fn workflow_step(&self, process: &NodeId, entity: &NodeId) -> Result<Option<String>> {
        let conn = self.conn();
        let current: Option<i64> = conn
            .query_row(
                "SELECT step_index FROM workflow WHERE process_id = ?1 AND entity_id = ?2",
                params![process, entity],
                |row| row.get(0),
            )
            .optional()?;
        let Some(idx) = current else {
            return Ok(None);
        };
        let steps = Self::steps_of(&conn, process)?;
        Ok(steps.get(idx as usize).cloned())
    }
}

#[async_trait]
impl TimeSeriesStore for SqliteGraphStore {
    async fn append(&self, metric: &NodeId, value: f64, timestamp_millis: i64) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO points (metric_id, value, ts) VALUES (?1, ?2, ?3)",
            params![metric, value, timestamp_millis],
        )?;
        Ok(())
    }

    async fn set_current_value(&self, metric: &NodeId, value: f64) -> Result<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE metrics SET current_value = ?1 WHERE node_id = ?2",
            params![value, metric],
        )?;
        if updated == 0 {
            return Err(SyncError::NotFound(format!("metric {metric}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteGraphStore {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.initialize_schema().unwrap();
        store
    }

    #[tokio::test]
    async fn find_entities_walks_descendants_with_filter() {
        let store = setup();
        let root = store.root_id();
        let context = store
            .create_entity(&root, "Equipments", EntityKind::Context)
            .await
            .unwrap();
        let group = store
            .create_entity(&context, "Otis", EntityKind::Group)
            .await
            .unwrap();
        let elevator = store
            .create_entity(&group, "ABC1", EntityKind::Equipment)
            .await
            .unwrap();

        let found = store
            .find_entities(&root, &EntityFilter::named("ABC1", EntityKind::Equipment))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, elevator);

        let none = store
            .find_entities(&group, &EntityFilter::named("ABC1", EntityKind::Device))
            .await
            .unwrap();
        assert!(none.is_empty());

        let children = store.children(&context).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "Otis");
    }

    #[tokio::test]
    async fn add_attribute_overwrites_same_label() {
        let store = setup();
        let root = store.root_id();
        let node = store
            .create_entity(&root, "dev", EntityKind::Device)
            .await
            .unwrap();

        store
            .add_attribute(&node, "Device", Attribute::text("Description", "old"))
            .await
            .unwrap();
        store
            .add_attribute(&node, "Device", Attribute::text("Description", "new"))
            .await
            .unwrap();

        let attributes = store
            .get_attributes_by_category(&node, "Device")
            .await
            .unwrap();
        assert_eq!(attributes, vec![Attribute::text("Description", "new")]);
        assert!(store
            .get_attributes_by_category(&node, "Asset")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn tickets_start_on_first_step_and_advance_until_last() {
        let store = setup();
        let root = store.root_id();
        let process = store
            .create_entity(&root, "Repair", EntityKind::Process)
            .await
            .unwrap();
        for step in ["Open", "Resolved"] {
            store
                .create_entity(&process, step, EntityKind::Step)
                .await
                .unwrap();
        }
        let ticket = store
            .create_entity(&process, "U1 - fix", EntityKind::Ticket)
            .await
            .unwrap();

        assert_eq!(
            store.workflow_step(&process, &ticket).await.unwrap().as_deref(),
            Some("Open")
        );
        store.advance_workflow_step(&process, &ticket).await.unwrap();
        store.advance_workflow_step(&process, &ticket).await.unwrap();
        assert_eq!(
            store.workflow_step(&process, &ticket).await.unwrap().as_deref(),
            Some("Resolved")
        );
    }

    #[tokio::test]
    async fn create_ticket_writes_everything_or_nothing() {
        let store = setup();
        let root = store.root_id();
        let unit = store
            .create_entity(&root, "U1", EntityKind::Equipment)
            .await
            .unwrap();
        let process = store
            .create_entity(&root, "Repair", EntityKind::Process)
            .await
            .unwrap();
        let ticket = |completed| NewTicket {
            process: process.clone(),
            target: unit.clone(),
            name: "U1 - fix".into(),
            attributes: vec![("Repair", Attribute::text("mechanic_name", "Dupont"))],
            completed,
        };

        // A completed ticket needs a step to move to.
        assert!(matches!(
            store.create_ticket(&ticket(true)).await,
            Err(SyncError::NotFound(_))
        ));
        assert_eq!(store.count_entities(EntityKind::Ticket).unwrap(), 0);
        assert!(store.children(&unit).await.unwrap().is_empty());

        for step in ["Open", "Closed"] {
            store
                .create_entity(&process, step, EntityKind::Step)
                .await
                .unwrap();
        }
        let done = store.create_ticket(&ticket(true)).await.unwrap();
        let open = store.create_ticket(&ticket(false)).await.unwrap();
        assert_eq!(
            store.workflow_step(&process, &done).await.unwrap().as_deref(),
            Some("Closed")
        );
        assert_eq!(
            store.workflow_step(&process, &open).await.unwrap().as_deref(),
            Some("Open")
        );
        assert_eq!(store.count_attributes(&done).unwrap(), 1);
        assert_eq!(store.children(&unit).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn series_is_additive_and_current_value_tracks_last_write() {
        let store = setup();
        let root = store.root_id();
        let device = store
            .create_entity(&root, "dev", EntityKind::Device)
            .await
            .unwrap();
        let metric = store
            .create_child_metric(
                &device,
                &MetricSpec {
                    key: "speed-1".into(),
                    unit: "m/s".into(),
                    data_type: "real".into(),
                },
            )
            .await
            .unwrap();

        store.append(&metric, 1.0, 10).await.unwrap();
        store.append(&metric, 1.0, 10).await.unwrap();
        store.set_current_value(&metric, 2.5).await.unwrap();

        assert_eq!(store.points(&metric).unwrap(), vec![(10, 1.0), (10, 1.0)]);
        assert_eq!(store.current_value(&metric).unwrap(), Some(2.5));
        assert!(store.set_current_value(&device, 1.0).await.is_err());
    }
}
