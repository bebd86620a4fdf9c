//! # Repair Facility
//!
//! Administrative operations addressed by logical table name.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  stockroom-repair CLI / admin screen                                    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  RepairRegistry ── broadcast(table, op) ──┬──► RateController           │
//! │                                           ├──► CustomerController       │
//! │                                           └──► TransactionController    │
//! │                                                   │                     │
//! │              each one matches `table` against its accessors and runs    │
//! │              TableAccessor::repair(op); other names are ignored         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DbResult;
use crate::table::{Record, TableAccessor};

/// One administrative operation on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOp {
    /// Release every registered row lock, orphans included.
    ForceUnlock,
    /// Drop and recreate the main and auxiliary tables.
    ForcePurge,
    /// Create the main and auxiliary tables if missing.
    AssureExistence,
    /// Drop the row cache.
    RefreshCache,
    /// Re-insert missing auxiliary rows.
    MirrorAuxRows,
}

impl fmt::Display for RepairOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepairOp::ForceUnlock => "force_unlock",
            RepairOp::ForcePurge => "force_purge",
            RepairOp::AssureExistence => "assure_existence",
            RepairOp::RefreshCache => "refresh_cache",
            RepairOp::MirrorAuxRows => "mirror_aux_rows",
        };
        f.write_str(name)
    }
}

impl<R: Record> TableAccessor<R> {
    /// Runs one repair operation on this table.
    pub async fn repair(&self, op: RepairOp) -> DbResult<()> {
        match op {
            RepairOp::ForceUnlock => {
                self.unlock_all(true);
            }
            RepairOp::ForcePurge => {
                self.purge_table_schema().await?;
                self.assure_table_schema().await?;
            }
            RepairOp::AssureExistence => {
                self.assure_table_schema().await?;
            }
            RepairOp::RefreshCache => self.refresh_all(),
            RepairOp::MirrorAuxRows => {
                self.create_all_aux_rows().await?;
            }
        }
        Ok(())
    }
}

/// A component owning one or more tables that can be repaired by name.
///
/// Names a component does not own are ignored.
#[async_trait]
pub trait Repairable: Send + Sync {
    /// Logical names of the tables this component owns.
    fn list_tables(&self) -> Vec<&'static str>;

    /// Runs `op` on `table`. Returns `false` if the table is not owned here.
    async fn repair(&self, table: &str, op: RepairOp) -> DbResult<bool>;

    async fn force_full_unlock(&self, table: &str) -> DbResult<bool> {
        self.repair(table, RepairOp::ForceUnlock).await
    }

    async fn force_full_purge(&self, table: &str) -> DbResult<bool> {
        self.repair(table, RepairOp::ForcePurge).await
    }

    async fn assure_existence(&self, table: &str) -> DbResult<bool> {
        self.repair(table, RepairOp::AssureExistence).await
    }

    async fn refresh_cache(&self, table: &str) -> DbResult<bool> {
        self.repair(table, RepairOp::RefreshCache).await
    }

    async fn mirror_aux_rows(&self, table: &str) -> DbResult<bool> {
        self.repair(table, RepairOp::MirrorAuxRows).await
    }
}

/// Every repairable component of one database.
#[derive(Clone, Default)]
pub struct RepairRegistry {
    members: Vec<Arc<dyn Repairable>>,
}

impl RepairRegistry {
    pub fn new() -> Self {
        RepairRegistry::default()
    }

    pub fn register(&mut self, member: Arc<dyn Repairable>) {
        self.members.push(member);
    }

    /// Union of the table names of every member, in registration order.
    pub fn backable_tables(&self) -> Vec<&'static str> {
        let mut tables: Vec<&'static str> = Vec::new();
        for name in self.members.iter().flat_map(|m| m.list_tables()) {
            if !tables.contains(&name) {
                tables.push(name);
            }
        }
        tables
    }

    /// Sends `op` for `table` to every member.
    ///
    /// Returns whether any member owns the table; an unknown name is a no-op.
    pub async fn broadcast(&self, table: &str, op: RepairOp) -> DbResult<bool> {
        let mut handled = false;
        for member in &self.members {
            handled |= member.repair(table, op).await?;
        }

        info!(table, op = %op, handled, "Repair operation broadcast");
        Ok(handled)
    }

    /// Runs `op` on every backable table. Returns the number of tables.
    pub async fn broadcast_all(&self, op: RepairOp) -> DbResult<usize> {
        let tables = self.backable_tables();
        for table in &tables {
            self.broadcast(table, op).await?;
        }
        Ok(tables.len())
    }

    /// Creates every missing table.
    pub async fn assure_all(&self) -> DbResult<usize> {
        self.broadcast_all(RepairOp::AssureExistence).await
    }
}

impl fmt::Debug for RepairRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepairRegistry")
            .field("tables", &self.backable_tables())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::table::testing::{count, memory, Note, Tag};
    use crate::table::{AllRows, SyncMode};

    struct Notebook {
        conn: Connection,
        notes: TableAccessor<Note>,
        tags: TableAccessor<Tag>,
    }

    #[async_trait]
    impl Repairable for Notebook {
        fn list_tables(&self) -> Vec<&'static str> {
            vec![self.notes.table_name(), self.tags.table_name()]
        }

        async fn repair(&self, table: &str, op: RepairOp) -> DbResult<bool> {
            if table == self.notes.table_name() {
                self.notes.repair(op).await?;
            } else if table == self.tags.table_name() {
                self.tags.repair(op).await?;
            } else {
                return Ok(false);
            }
            Ok(true)
        }
    }

    async fn registry() -> (RepairRegistry, Arc<Notebook>) {
        let conn = memory().await;
        let notebook = Arc::new(Notebook {
            notes: TableAccessor::new(conn.clone()),
            tags: TableAccessor::new(conn.clone()),
            conn,
        });
        let mut registry = RepairRegistry::new();
        registry.register(notebook.clone());
        (registry, notebook)
    }

    #[tokio::test]
    async fn test_assure_all_creates_every_table() {
        let (registry, notebook) = registry().await;
        assert_eq!(registry.backable_tables(), vec!["notes", "tags"]);
        assert_eq!(registry.assure_all().await.unwrap(), 2);

        let rows = notebook
            .notes
            .load_many(&AllRows, SyncMode::NoLoad)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_table_is_a_no_op() {
        let (registry, _) = registry().await;
        assert!(!registry
            .broadcast("invoices", RepairOp::ForcePurge)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_force_purge_empties_table() {
        let (registry, notebook) = registry().await;
        registry.assure_all().await.unwrap();

        let (note, guard) = notebook.notes.create(Note::default());
        note.store(&guard).await.unwrap();
        drop(guard);

        assert!(notebook.force_full_purge("notes").await.unwrap());
        assert_eq!(notebook.notes.cached_len(), 0);
        assert_eq!(count(&notebook.conn, "SELECT COUNT(*) FROM notes").await, 0);
        assert_eq!(count(&notebook.conn, "SELECT COUNT(*) FROM notes_aux").await, 0);
    }

    #[tokio::test]
    async fn test_force_unlock_through_registry() {
        let (registry, notebook) = registry().await;
        registry.assure_all().await.unwrap();

        let (tag, guard) = notebook
            .tags
            .create_keyed("urgent".to_string(), Tag::default())
            .await
            .unwrap();
        assert!(tag.is_locked());

        registry
            .broadcast("tags", RepairOp::ForceUnlock)
            .await
            .unwrap();
        assert!(!tag.is_locked());
        assert!(!guard.is_valid());
        assert!(matches!(
            tag.store(&guard).await,
            Err(crate::error::DbError::NotLocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_mirror_restores_aux_rows() {
        let (registry, notebook) = registry().await;
        registry.assure_all().await.unwrap();

        let (note, guard) = notebook.notes.create(Note::default());
        note.store(&guard).await.unwrap();
        notebook
            .conn
            .execute(&notebook.conn.prepare("DELETE FROM notes_aux"))
            .await
            .unwrap();

        assert!(notebook.mirror_aux_rows("notes").await.unwrap());
        assert_eq!(count(&notebook.conn, "SELECT COUNT(*) FROM notes_aux").await, 1);
    }
}
