//! # Row Entity
//!
//! One live, mutable, in-memory row plus the protocol that keeps it in step
//! with storage.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RowEntity lifecycle                             │
//! │                                                                         │
//! │   fresh (no id)          stub (id only)           populated             │
//! │   loaded, !exists        !loaded, exists?         loaded, exists        │
//! │   locked                                                                │
//! │        │                      │  load()/load_from()     ▲               │
//! │        │                      └─────────────────────────┘               │
//! │        │ store()  ── INSERT main + INSERT aux (one transaction) ──►     │
//! │        │                                                 populated      │
//! │                                                                         │
//! │   populated ── modify() + store() ── UPDATE ──► populated               │
//! │   populated ── delete() ── DELETE main, DELETE aux ──► !exists          │
//! │                                                                         │
//! │   modify / store / delete require the caller's RowGuard for this row    │
//! │   (NotLocked for a missing, foreign or stale guard)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Storage operations below only use the [`Connection`]; a `RowEntity` has
//! no path back to its `TableAccessor`, so a row operation can never re-enter
//! the cache or the lock registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlx::sqlite::SqliteRow;
use tracing::{debug, warn};

use super::def::{KeyKind, PrimaryKey, Record};
use super::lock::{RowGuard, RowLock};
use crate::connection::Connection;
use crate::error::{DbError, DbResult, StorageFailure};
use crate::statement::{SqlValue, Statement};

struct EntityState<R: Record> {
    id: Option<R::Id>,
    record: R,
    loaded: bool,
    exists: bool,
}

/// A cached row of the table described by `R`.
///
/// Handed out as `Arc<RowEntity<R>>` by the table accessor; at most one live
/// instance exists per primary key.
pub struct RowEntity<R: Record> {
    conn: Connection,
    lock: Arc<RowLock>,
    /// Bumped on every change of the in-memory row; lets bulk loads detect
    /// that a row changed while they were waiting for its lock.
    version: AtomicU64,
    state: Mutex<EntityState<R>>,
}

impl<R: Record> RowEntity<R> {
    /// A reference to an existing (or hoped-for) row, no columns loaded.
    pub(crate) fn stub(conn: Connection, id: R::Id, lock: Arc<RowLock>) -> Self {
        RowEntity {
            conn,
            lock,
            version: AtomicU64::new(0),
            state: Mutex::new(EntityState {
                id: Some(id),
                record: R::default(),
                loaded: false,
                exists: false,
            }),
        }
    }

    /// A new row pending insert. Nobody else can see it yet, so it starts
    /// out locked by its creator, who receives the guard.
    pub(crate) fn fresh(conn: Connection, id: Option<R::Id>, record: R) -> (Self, RowGuard) {
        let (lock, guard) = RowLock::held();
        let entity = RowEntity {
            conn,
            lock,
            version: AtomicU64::new(0),
            state: Mutex::new(EntityState {
                id,
                record,
                loaded: true,
                exists: false,
            }),
        };
        (entity, guard)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The primary key, `None` until a generated key has been assigned.
    pub fn primary_id(&self) -> Option<R::Id> {
        self.state().id.clone()
    }

    /// Name of the main table.
    pub fn table(&self) -> &'static str {
        R::table().name
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    /// Whether the row lock is currently held, by anyone.
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Whether `guard` is a live hold on this row's lock.
    pub fn holds(&self, guard: &RowGuard) -> bool {
        guard.guards(&self.lock)
    }

    /// Snapshot of the column data.
    pub fn record(&self) -> R {
        self.state().record.clone()
    }

    /// Reads the column data in place.
    pub fn with_record<T>(&self, f: impl FnOnce(&R) -> T) -> T {
        f(&self.state().record)
    }

    /// Mutates the column data. Requires the caller's guard on this row.
    pub fn modify<T>(&self, guard: &RowGuard, f: impl FnOnce(&mut R) -> T) -> DbResult<T> {
        self.require_lock(guard)?;
        let out = f(&mut self.state().record);
        self.bump();
        Ok(out)
    }

    /// Whether the row exists in storage.
    ///
    /// Returns the cached flag unless `force_check` is set, in which case a
    /// `COUNT(*)` query refreshes it.
    pub async fn exists(&self, force_check: bool) -> DbResult<bool> {
        if !force_check {
            return Ok(self.state().exists);
        }

        let Some(id) = self.primary_id() else {
            return Ok(false);
        };

        let found = self.check_row_existence(&id).await?;
        self.state().exists = found;
        Ok(found)
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Takes the row lock, waiting for the current holder if there is one.
    ///
    /// The lock is held until the returned guard is passed to
    /// [`unlock`](Self::unlock) or dropped.
    pub async fn lock(&self) -> RowGuard {
        RowLock::acquire(&self.lock).await.0
    }

    /// Releases the hold of `guard`. Idempotent: returns `false` if the
    /// guard is stale or belongs to another row (the guard is consumed
    /// either way).
    pub fn unlock(&self, guard: RowGuard) -> bool {
        let ours = self.holds(&guard);
        guard.release() && ours
    }

    // =========================================================================
    // Synchronization with storage
    // =========================================================================

    /// Fetches the current column values by primary key.
    ///
    /// ## Returns
    /// * `Ok(())` - columns loaded, `loaded = exists = true`
    /// * `Err(DbError::NotFound)` - no row for this key; the instance is
    ///   reset to an unloaded stub with `exists = false`
    pub async fn load(&self) -> DbResult<()> {
        let id = self.require_id()?;

        match self.load_row(&id).await? {
            Some(record) => {
                self.populate(record);
                Ok(())
            }
            None => {
                {
                    let mut state = self.state();
                    state.record = R::default();
                    state.loaded = false;
                    state.exists = false;
                }
                self.bump();
                Err(DbError::not_found(self.table(), &id))
            }
        }
    }

    /// Populates the columns from an already-fetched full row.
    ///
    /// The lock state is left alone: bulk loads establish locking themselves.
    pub fn load_from(&self, row: &SqliteRow) -> DbResult<()> {
        let record = R::read(row)
            .map_err(|e| DbError::storage("load", self.table(), self.id_string(), e))?;
        self.populate(record);
        Ok(())
    }

    /// Writes the row: INSERT (plus identity reservation) when it does not
    /// exist yet, UPDATE otherwise. Requires the caller's guard on this row.
    pub async fn store(&self, guard: &RowGuard) -> DbResult<()> {
        self.require_lock(guard)?;

        let (id, record, exists) = {
            let state = self.state();
            (state.id.clone(), state.record.clone(), state.exists)
        };

        match id {
            Some(id) if exists => {
                self.update_row(&id, &record).await?;
                debug!(table = self.table(), id = %id, "Row updated");
            }
            id => {
                let assigned = self.create_row(id.as_ref(), &record).await?;
                debug!(table = self.table(), id = %assigned, "Row inserted");
                let mut state = self.state();
                state.id = Some(assigned);
                state.exists = true;
                state.loaded = true;
            }
        }

        self.bump();
        Ok(())
    }

    /// Deletes the main row, then its auxiliary row. Requires the caller's
    /// guard on this row.
    ///
    /// A failure to delete the auxiliary row is logged, not returned.
    pub async fn delete(&self, guard: &RowGuard) -> DbResult<()> {
        self.require_lock(guard)?;
        let id = self.require_id()?;

        let removed = self.delete_row(&id).await?;
        if removed == 0 {
            debug!(table = self.table(), id = %id, "Main row was already absent");
        }

        if let Err(failure) = self.delete_aux_row(&id).await {
            let err = DbError::AuxiliaryInconsistency {
                table: self.table().to_string(),
                id: id.to_string(),
                reason: failure.to_string(),
            };
            warn!(error = %err, "Auxiliary row not removed");
        }

        self.state().exists = false;
        self.bump();
        Ok(())
    }

    // =========================================================================
    // Crate-internal state transfer (used by TableAccessor)
    // =========================================================================

    /// Takes the row lock; also returns whether another holder had to be
    /// awaited.
    pub(crate) async fn lock_contended(&self) -> (RowGuard, bool) {
        RowLock::acquire(&self.lock).await
    }

    /// Breaks the current hold, whoever owns it.
    pub(crate) fn force_unlock(&self) -> bool {
        self.lock.force_release()
    }

    pub(crate) fn lock_handle(&self) -> &Arc<RowLock> {
        &self.lock
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn exists_cached(&self) -> bool {
        self.state().exists
    }

    /// Installs columns read from storage.
    pub(crate) fn populate(&self, record: R) {
        {
            let mut state = self.state();
            state.record = record;
            state.loaded = true;
            state.exists = true;
        }
        self.bump();
    }

    /// Records that storage returned this key, leaving the columns alone.
    pub(crate) fn mark_exists(&self) {
        self.state().exists = true;
    }

    /// Installs caller-provided columns without touching `exists`.
    pub(crate) fn stage(&self, record: R) {
        {
            let mut state = self.state();
            state.record = record;
            state.loaded = true;
        }
        self.bump();
    }

    /// Copies columns and flags from another instance of the same row.
    pub(crate) fn adopt(&self, other: &RowEntity<R>) {
        let (record, loaded, exists) = {
            let theirs = other.state();
            (theirs.record.clone(), theirs.loaded, theirs.exists)
        };
        {
            let mut state = self.state();
            state.record = record;
            state.loaded = loaded;
            state.exists = exists;
        }
        self.bump();
    }

    // =========================================================================
    // Storage operations (Connection only)
    // =========================================================================

    async fn load_row(&self, id: &R::Id) -> DbResult<Option<R>> {
        let def = R::table();
        let stmt = self
            .conn
            .prepare(def.select_by_id_sql())
            .bind(id.to_value());

        let row = self
            .conn
            .fetch_optional(&stmt)
            .await
            .map_err(|f| DbError::storage("load", def.name, Some(id.to_string()), f))?;

        row.map(|row| R::read(&row))
            .transpose()
            .map_err(|e| DbError::storage("load", def.name, Some(id.to_string()), e))
    }

    async fn check_row_existence(&self, id: &R::Id) -> DbResult<bool> {
        let def = R::table();
        let stmt = self
            .conn
            .prepare(def.count_by_id_sql())
            .bind(id.to_value());

        let count = self
            .conn
            .fetch_count(&stmt)
            .await
            .map_err(|f| DbError::storage("exists", def.name, Some(id.to_string()), f))?;
        Ok(count > 0)
    }

    /// Inserts the main row and reserves its identity in the auxiliary table.
    async fn create_row(&self, id: Option<&R::Id>, record: &R) -> DbResult<R::Id> {
        let def = R::table();

        let main = match id {
            Some(id) => self
                .conn
                .prepare(def.insert_sql(true))
                .bind(id.to_value())
                .bind_all(record.values()),
            None if def.key_kind == KeyKind::Generated => self
                .conn
                .prepare(def.insert_sql(false))
                .bind_all(record.values()),
            None => {
                return Err(DbError::MissingIdentity {
                    table: def.name.to_string(),
                })
            }
        };

        let supplied = id.map(PrimaryKey::to_value);
        let rowid = self
            .conn
            .insert_reserving(&main, move |rowid| {
                self.create_aux_row(supplied.unwrap_or(SqlValue::Integer(rowid)))
            })
            .await
            .map_err(|f| DbError::storage("insert", def.name, id.map(|id| id.to_string()), f))?;

        match id {
            Some(id) => Ok(id.clone()),
            None => R::Id::from_generated(rowid).ok_or_else(|| DbError::MissingIdentity {
                table: def.name.to_string(),
            }),
        }
    }

    fn create_aux_row(&self, id: SqlValue) -> Statement {
        self.conn.prepare(R::table().aux_insert_sql()).bind(id)
    }

    async fn update_row(&self, id: &R::Id, record: &R) -> DbResult<()> {
        let def = R::table();
        let stmt = self
            .conn
            .prepare(def.update_sql())
            .bind_all(record.values())
            .bind(id.to_value());

        let updated = self
            .conn
            .execute(&stmt)
            .await
            .map_err(|f| DbError::storage("update", def.name, Some(id.to_string()), f))?;

        if updated == 0 {
            self.state().exists = false;
            return Err(DbError::not_found(def.name, id));
        }
        Ok(())
    }

    async fn delete_row(&self, id: &R::Id) -> DbResult<u64> {
        let def = R::table();
        let stmt = self.conn.prepare(def.delete_sql()).bind(id.to_value());

        self.conn
            .execute(&stmt)
            .await
            .map_err(|f| DbError::storage("delete", def.name, Some(id.to_string()), f))
    }

    async fn delete_aux_row(&self, id: &R::Id) -> Result<u64, StorageFailure> {
        let stmt = self
            .conn
            .prepare(R::table().aux_delete_sql())
            .bind(id.to_value());
        self.conn.execute(&stmt).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn state(&self) -> MutexGuard<'_, EntityState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn id_string(&self) -> Option<String> {
        self.primary_id().map(|id| id.to_string())
    }

    fn require_id(&self) -> DbResult<R::Id> {
        self.primary_id().ok_or_else(|| DbError::MissingIdentity {
            table: self.table().to_string(),
        })
    }

    fn require_lock(&self, guard: &RowGuard) -> DbResult<()> {
        if self.holds(guard) {
            return Ok(());
        }
        Err(DbError::NotLocked {
            table: self.table().to_string(),
            id: self.id_string().unwrap_or_else(|| "<pending>".to_string()),
        })
    }
}

impl<R: Record> fmt::Debug for RowEntity<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("RowEntity")
            .field("table", &R::table().name)
            .field("id", &state.id)
            .field("loaded", &state.loaded)
            .field("exists", &state.exists)
            .field("locked", &self.lock.is_held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::testing::{count, create_tables, memory, Note, Tag};

    fn note(body: &str) -> Note {
        Note {
            body: body.to_string(),
            pinned: false,
        }
    }

    #[tokio::test]
    async fn test_store_fresh_inserts_main_and_aux_row() {
        let conn = memory().await;
        create_tables::<Note>(&conn).await;

        let (entity, guard) = RowEntity::fresh(conn.clone(), None, note("first"));
        entity.store(&guard).await.unwrap();

        let id = entity.primary_id().unwrap();
        assert!(entity.exists(false).await.unwrap());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notes").await, 1);
        assert_eq!(
            count(&conn, &format!("SELECT COUNT(*) FROM notes_aux WHERE id = {id}")).await,
            1
        );
    }

    #[tokio::test]
    async fn test_store_and_delete_require_lock() {
        let conn = memory().await;
        create_tables::<Note>(&conn).await;

        let (entity, guard) = RowEntity::fresh(conn.clone(), None, note("draft"));
        let (_, foreign) = RowEntity::fresh(conn.clone(), None, note("other"));
        assert!(entity.unlock(guard));

        let err = entity.store(&foreign).await.unwrap_err();
        assert!(matches!(err, DbError::NotLocked { .. }));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notes").await, 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notes_aux").await, 0);

        let err = entity.modify(&foreign, |n| n.pinned = true).unwrap_err();
        assert!(matches!(err, DbError::NotLocked { .. }));
        assert!(!entity.record().pinned);
    }

    #[tokio::test]
    async fn test_non_holder_cannot_write_or_unlock() {
        let conn = memory().await;
        create_tables::<Note>(&conn).await;

        let (created, guard) = RowEntity::fresh(conn.clone(), None, note("mine"));
        created.store(&guard).await.unwrap();
        drop(guard);

        let id = created.primary_id().unwrap();
        let shared = Arc::new(RowLock::default());
        let entity = RowEntity::<Note>::stub(conn.clone(), id, Arc::clone(&shared));
        entity.load().await.unwrap();
        let holder = entity.lock().await;

        let twin = RowEntity::<Note>::stub(conn.clone(), id, shared);
        let forced = twin.force_unlock();
        assert!(forced);
        let intruder = twin.lock().await;

        assert!(matches!(
            entity.modify(&holder, |n| n.body = "stale".to_string()),
            Err(DbError::NotLocked { .. })
        ));
        assert!(matches!(entity.store(&holder).await, Err(DbError::NotLocked { .. })));
        assert!(!entity.unlock(holder));
        assert!(entity.is_locked());
        assert!(entity.holds(&intruder));
    }

    #[tokio::test]
    async fn test_update_path_after_modify() {
        let conn = memory().await;
        create_tables::<Note>(&conn).await;

        let (entity, guard) = RowEntity::fresh(conn.clone(), None, note("before"));
        entity.store(&guard).await.unwrap();
        entity.modify(&guard, |n| n.body = "after".to_string()).unwrap();
        entity.store(&guard).await.unwrap();
        entity.unlock(guard);

        let id = entity.primary_id().unwrap();
        let stub = RowEntity::<Note>::stub(conn.clone(), id, Arc::default());
        stub.load().await.unwrap();
        assert_eq!(stub.record().body, "after");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notes").await, 1);
    }

    #[tokio::test]
    async fn test_load_missing_row_is_not_found() {
        let conn = memory().await;
        create_tables::<Note>(&conn).await;

        let stub = RowEntity::<Note>::stub(conn.clone(), 42, Arc::default());
        let err = stub.load().await.unwrap_err();

        assert!(err.is_not_found());
        assert!(!stub.is_loaded());
        assert!(!stub.exists(true).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_aux_table() {
        let conn = memory().await;
        create_tables::<Note>(&conn).await;

        let (entity, guard) = RowEntity::fresh(conn.clone(), None, note("doomed"));
        entity.store(&guard).await.unwrap();

        conn.execute_ddl(&conn.prepare("DROP TABLE notes_aux"))
            .await
            .unwrap();

        entity.delete(&guard).await.unwrap();
        assert!(!entity.exists(false).await.unwrap());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notes").await, 0);
    }

    #[tokio::test]
    async fn test_supplied_key_without_id_is_rejected() {
        let conn = memory().await;
        create_tables::<Tag>(&conn).await;

        let (entity, guard) = RowEntity::fresh(conn.clone(), None, Tag::default());
        let err = entity.store(&guard).await.unwrap_err();
        assert!(matches!(err, DbError::MissingIdentity { .. }));

        let (entity, guard) =
            RowEntity::fresh(conn.clone(), Some("urgent".to_string()), Tag::default());
        entity.store(&guard).await.unwrap();
        assert_eq!(entity.primary_id().as_deref(), Some("urgent"));
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM tags_aux WHERE code = 'urgent'").await,
            1
        );
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_entity_unstored() {
        let conn = memory().await;
        create_tables::<Tag>(&conn).await;

        let (first, guard) = RowEntity::fresh(conn.clone(), Some("dup".to_string()), Tag::default());
        first.store(&guard).await.unwrap();

        let (second, guard) =
            RowEntity::fresh(conn.clone(), Some("dup".to_string()), Tag::default());
        let err = second.store(&guard).await.unwrap_err();

        assert!(matches!(
            err,
            DbError::Storage {
                source: StorageFailure::UniqueViolation { .. },
                ..
            }
        ));
        assert!(!second.exists(false).await.unwrap());
    }
}
