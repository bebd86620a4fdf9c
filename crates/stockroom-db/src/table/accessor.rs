//! # Table Accessor
//!
//! The identity-mapped cache and locking protocol for one table.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TableAccessor<R>                                 │
//! │                                                                         │
//! │   std Mutex<TableCache>  (held for lookups only, never across .await)   │
//! │   ┌───────────────────────────────┐   ┌─────────────────────────────┐   │
//! │   │ rows:  id ──► Arc<RowEntity>  │   │ locks: id ──► Arc<RowLock>  │   │
//! │   │ cleared by refresh_all        │   │ survives refresh_all        │   │
//! │   └───────────────┬───────────────┘   └──────────────┬──────────────┘   │
//! │                   │ every entity of id X shares      │                  │
//! │                   └───────── the registry lock of X ◄┘                  │
//! │                                                                         │
//! │   load_many(filter, mode)                                               │
//! │     1. SELECT id[, columns] ... WHERE <filter> ORDER BY <order column>  │
//! │     2. merge each row into the cache (one short critical section/row)   │
//! │     3. Locked mode: lock rows in primary-key order, re-fetch the ones   │
//! │        that changed while waiting, drop the ones deleted meanwhile      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the lock registry outlives cache entries, an instance built after
//! `refresh_all` shares its lock with the evicted instance of the same key:
//! two live instances of one row can never both be locked.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stockroom_core::CoreError;
use tracing::{debug, info, warn};

use super::def::{PrimaryKey, Record};
use super::entity::RowEntity;
use super::filter::FilterStatement;
use super::lock::{RowGuard, RowLock};
use crate::connection::Connection;
use crate::error::{DbError, DbResult};

// =============================================================================
// Sync modes
// =============================================================================

/// Synchronization policy of a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// Identities only: stubs, no column fetch, no locks.
    NoLoad,
    /// Columns populated from the result rows; rows stay unlocked. A row that
    /// is currently locked and loaded keeps its in-memory columns.
    Load,
    /// Columns populated and every returned row locked for the caller.
    Locked,
}

impl SyncMode {
    /// Whether the bulk query selects the full column list.
    pub fn fetches_columns(self) -> bool {
        !matches!(self, SyncMode::NoLoad)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::NoLoad => "no_load",
            SyncMode::Load => "load",
            SyncMode::Locked => "locked",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Bulk results
// =============================================================================

/// Rows returned by [`TableAccessor::load_many`], in the filter's order.
///
/// In `Locked` mode `guards[i]` holds the lock of `rows[i]`; in the other
/// modes `guards` is empty. Dropping the value releases every lock it holds.
pub struct BulkLoad<R: Record> {
    pub rows: Vec<Arc<RowEntity<R>>>,
    pub guards: Vec<RowGuard>,
}

impl<R: Record> BulkLoad<R> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RowEntity<R>>> {
        self.rows.iter()
    }

    /// Primary keys of the returned rows.
    pub fn ids(&self) -> Vec<R::Id> {
        self.rows.iter().filter_map(|entity| entity.primary_id()).collect()
    }

    /// Row `index` together with its guard (`Locked` mode only).
    pub fn locked(&self, index: usize) -> Option<(&Arc<RowEntity<R>>, &RowGuard)> {
        Some((self.rows.get(index)?, self.guards.get(index)?))
    }

    /// The rows alone. Any locks are released.
    pub fn into_rows(self) -> Vec<Arc<RowEntity<R>>> {
        self.rows
    }
}

impl<R: Record> fmt::Debug for BulkLoad<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkLoad")
            .field("rows", &self.rows.len())
            .field("guards", &self.guards.len())
            .finish()
    }
}

/// Per-row merge outcome of a bulk fetch.
struct Merged {
    version: u64,
    /// Columns were taken from this fetch.
    populated: bool,
}

// =============================================================================
// Cache
// =============================================================================

struct TableCache<R: Record> {
    rows: HashMap<R::Id, Arc<RowEntity<R>>>,
    locks: HashMap<R::Id, Arc<RowLock>>,
}

impl<R: Record> TableCache<R> {
    fn new() -> Self {
        TableCache {
            rows: HashMap::new(),
            locks: HashMap::new(),
        }
    }

    fn lock_for(&mut self, id: &R::Id) -> Arc<RowLock> {
        Arc::clone(self.locks.entry(id.clone()).or_default())
    }

    /// The live instance for `id`, creating a stub on the registry lock.
    fn entry(&mut self, conn: &Connection, id: &R::Id) -> Arc<RowEntity<R>> {
        if let Some(entity) = self.rows.get(id) {
            return Arc::clone(entity);
        }
        let lock = self.lock_for(id);
        let entity = Arc::new(RowEntity::stub(conn.clone(), id.clone(), lock));
        self.rows.insert(id.clone(), Arc::clone(&entity));
        entity
    }

    /// Makes `entity` (or a twin sharing the registry lock) the cached
    /// instance for `id`. Caller has checked that `id` is not cached.
    fn install(&mut self, conn: &Connection, id: &R::Id, entity: Arc<RowEntity<R>>) -> Arc<RowEntity<R>> {
        let registered = self.locks.get(id).map(Arc::clone);
        let canonical = match registered {
            Some(registered) if !Arc::ptr_eq(&registered, entity.lock_handle()) => {
                let twin = Arc::new(RowEntity::stub(conn.clone(), id.clone(), registered));
                twin.adopt(&entity);
                twin
            }
            _ => {
                self.locks
                    .insert(id.clone(), Arc::clone(entity.lock_handle()));
                entity
            }
        };
        self.rows.insert(id.clone(), Arc::clone(&canonical));
        canonical
    }

    /// Drops registry entries nobody references and nobody holds.
    fn prune_idle_locks(&mut self) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| Arc::strong_count(lock) > 1 || lock.is_held());
        before - self.locks.len()
    }
}

// =============================================================================
// Accessor
// =============================================================================

/// Cached, lock-aware access to the table described by `R`.
pub struct TableAccessor<R: Record> {
    conn: Connection,
    cache: Mutex<TableCache<R>>,
}

impl<R: Record> TableAccessor<R> {
    pub fn new(conn: Connection) -> Self {
        TableAccessor {
            conn,
            cache: Mutex::new(TableCache::new()),
        }
    }

    /// Main table name.
    pub fn table_name(&self) -> &'static str {
        R::table().name
    }

    /// Auxiliary table name.
    pub fn aux_table_name(&self) -> &'static str {
        R::table().aux_name
    }

    /// Number of cached row instances.
    pub fn cached_len(&self) -> usize {
        self.cache().rows.len()
    }

    // =========================================================================
    // Single rows
    // =========================================================================

    /// Returns the live instance for `id`, creating an unloaded stub if the
    /// row is not cached. No storage round-trip, no lock.
    pub async fn load(&self, id: R::Id) -> Arc<RowEntity<R>> {
        self.cache().entry(&self.conn, &id)
    }

    /// [`load`](Self::load) plus the row lock. The lock is taken after the
    /// cache mutex has been released; the call waits for the current holder
    /// if there is one.
    pub async fn load_locked(&self, id: R::Id) -> (Arc<RowEntity<R>>, RowGuard) {
        let entity = self.load(id).await;
        let guard = entity.lock().await;
        (entity, guard)
    }

    /// [`load`](Self::load) followed by a column fetch if the instance is
    /// not loaded yet.
    pub async fn load_populated(&self, id: R::Id) -> DbResult<Arc<RowEntity<R>>> {
        let entity = self.load(id).await;
        if !entity.is_loaded() {
            entity.load().await?;
        }
        Ok(entity)
    }

    /// [`load_locked`](Self::load_locked) followed by a column fetch if the
    /// instance is not loaded yet. On failure the guard is dropped, which
    /// releases the lock taken here.
    pub async fn load_populated_locked(&self, id: R::Id) -> DbResult<(Arc<RowEntity<R>>, RowGuard)> {
        let (entity, guard) = self.load_locked(id).await;
        if !entity.is_loaded() {
            entity.load().await?;
        }
        Ok((entity, guard))
    }

    /// A new row pending insert, locked by the caller. Generated-key tables
    /// get their key from `store`; hand the stored entity to
    /// [`cache_one`](Self::cache_one) afterwards.
    pub fn create(&self, record: R) -> (Arc<RowEntity<R>>, RowGuard) {
        let (entity, guard) = RowEntity::fresh(self.conn.clone(), None, record);
        (Arc::new(entity), guard)
    }

    /// Locks the row `id` and stages `record` as the columns of a row that
    /// does not exist yet. The returned (cached) instance is ready for
    /// `store`, which inserts it.
    ///
    /// ## Errors
    /// `CoreError::AlreadyExists` if storage already holds a row for `id`;
    /// the lock is released again.
    pub async fn create_keyed(&self, id: R::Id, record: R) -> DbResult<(Arc<RowEntity<R>>, RowGuard)> {
        let (entity, guard) = self.load_locked(id.clone()).await;
        if entity.exists(true).await? {
            return Err(DbError::Domain(CoreError::AlreadyExists {
                entity: self.table_name(),
                key: id.to_string(),
            }));
        }
        entity.stage(record);
        Ok((entity, guard))
    }

    /// Adds a freshly stored entity to the cache.
    ///
    /// ## Returns
    /// The canonical instance for the entity's key. If an instance for that
    /// key was already cached (or the key still has a registered lock) the
    /// stored columns are folded into the canonical instance and that
    /// instance is returned. The caller's guard only covers the returned
    /// instance when it is `entity` itself.
    ///
    /// ## Errors
    /// `DbError::Unsaved` if the entity was never stored.
    pub fn cache_one(&self, entity: Arc<RowEntity<R>>) -> DbResult<Arc<RowEntity<R>>> {
        let id = match entity.primary_id() {
            Some(id) if entity.exists_cached() => id,
            _ => {
                return Err(DbError::Unsaved {
                    table: self.table_name().to_string(),
                })
            }
        };

        let canonical = {
            let mut cache = self.cache();
            match cache.rows.get(&id).map(Arc::clone) {
                Some(existing) if Arc::ptr_eq(&existing, &entity) => existing,
                Some(existing) => {
                    existing.adopt(&entity);
                    existing
                }
                None => cache.install(&self.conn, &id, Arc::clone(&entity)),
            }
        };

        if !Arc::ptr_eq(&canonical, &entity) {
            debug!(table = self.table_name(), id = %id, "Folded stored row into cached instance");
        }
        Ok(canonical)
    }

    /// Merges an entity built outside the cache (or evicted by
    /// `refresh_all`) back into it by primary key and fetches its columns.
    ///
    /// Returns the canonical cached instance, which shares its lock with
    /// every other instance of the same key.
    pub async fn internal_load(&self, entity: Arc<RowEntity<R>>) -> DbResult<Arc<RowEntity<R>>> {
        let id = entity.primary_id().ok_or_else(|| DbError::MissingIdentity {
            table: self.table_name().to_string(),
        })?;

        let canonical = {
            let mut cache = self.cache();
            match cache.rows.get(&id) {
                Some(existing) => Arc::clone(existing),
                None => cache.install(&self.conn, &id, entity),
            }
        };

        if let Err(err) = canonical.load().await {
            if err.is_not_found() {
                self.evict(&id, &canonical);
            }
            return Err(err);
        }
        Ok(canonical)
    }

    /// Deletes the row (main and auxiliary) and evicts it from the cache.
    /// Requires the row lock, like [`RowEntity::delete`].
    pub async fn delete(&self, entity: &Arc<RowEntity<R>>, guard: &RowGuard) -> DbResult<()> {
        entity.delete(guard).await?;
        if let Some(id) = entity.primary_id() {
            self.evict(&id, entity);
            debug!(table = self.table_name(), id = %id, "Row deleted and evicted");
        }
        Ok(())
    }

    // =========================================================================
    // Bulk loads
    // =========================================================================

    /// Loads every row matched by `filter` under the given sync mode.
    ///
    /// Results reuse cached instances and keep the filter's row order; a
    /// key matched more than once is returned once.
    ///
    /// In `Locked` mode rows are locked in primary-key order after the
    /// merge. A row whose lock was contended, whose in-memory state changed
    /// while waiting, or whose columns were not taken from this fetch is
    /// re-fetched; a row deleted meanwhile is unlocked and left out. The
    /// caller must not already hold the lock of a matched row.
    pub async fn load_many(&self, filter: &dyn FilterStatement, mode: SyncMode) -> DbResult<BulkLoad<R>> {
        let def = R::table();
        let template = def.select_template(mode.fetches_columns());
        let stmt = filter.create(&self.conn, &template, def.order_column);

        let versions_before: HashMap<R::Id, u64> = self
            .cache()
            .rows
            .iter()
            .map(|(id, entity)| (id.clone(), entity.version()))
            .collect();

        let rows = self
            .conn
            .fetch_all(&stmt)
            .await
            .map_err(|f| DbError::storage("load_many", def.name, None, f))?;

        let mut seen = HashSet::with_capacity(rows.len());
        let mut entities = Vec::with_capacity(rows.len());
        let mut merged = Vec::with_capacity(rows.len());

        for row in &rows {
            let id = R::Id::read(row, def.id_column)
                .map_err(|e| DbError::storage("load_many", def.name, None, e))?;
            if !seen.insert(id.clone()) {
                continue;
            }

            let entity = self.cache().entry(&self.conn, &id);
            let untouched = entity.version() == versions_before.get(&id).copied().unwrap_or(0);

            let mut populated = false;
            if mode.fetches_columns() {
                let holder_view = entity.is_locked() && entity.is_loaded();
                if untouched && !holder_view {
                    entity.load_from(row)?;
                    populated = true;
                }
            } else if untouched {
                entity.mark_exists();
            }

            merged.push(Merged {
                version: entity.version(),
                populated,
            });
            entities.push(entity);
        }

        let bulk = if mode == SyncMode::Locked {
            self.lock_in_key_order(entities, &merged).await?
        } else {
            BulkLoad {
                rows: entities,
                guards: Vec::new(),
            }
        };

        debug!(
            table = def.name,
            mode = %mode,
            count = bulk.len(),
            "Bulk load finished"
        );
        Ok(bulk)
    }

    async fn lock_in_key_order(&self, entities: Vec<Arc<RowEntity<R>>>, merged: &[Merged]) -> DbResult<BulkLoad<R>> {
        let mut order: Vec<(R::Id, usize)> = entities
            .iter()
            .enumerate()
            .filter_map(|(index, entity)| entity.primary_id().map(|id| (id, index)))
            .collect();
        order.sort();

        let mut guards: Vec<Option<RowGuard>> = entities.iter().map(|_| None).collect();

        for (id, index) in order {
            let entity = &entities[index];
            let (guard, contended) = entity.lock_contended().await;

            let current =
                !contended && merged[index].populated && entity.version() == merged[index].version;
            if current {
                guards[index] = Some(guard);
                continue;
            }

            match entity.load().await {
                Ok(()) => guards[index] = Some(guard),
                Err(err) if err.is_not_found() => {
                    drop(guard);
                    self.evict(&id, entity);
                    debug!(table = self.table_name(), id = %id, "Row vanished while waiting for its lock");
                }
                Err(err) => {
                    warn!(
                        table = self.table_name(),
                        id = %id,
                        released = guards.iter().flatten().count(),
                        error = %err,
                        "Locked bulk load aborted"
                    );
                    return Err(err);
                }
            }
        }

        let (rows, guards): (Vec<_>, Vec<_>) = entities
            .into_iter()
            .zip(guards)
            .filter_map(|(entity, guard)| guard.map(|guard| (entity, guard)))
            .unzip();
        Ok(BulkLoad { rows, guards })
    }

    // =========================================================================
    // Cache and lock administration
    // =========================================================================

    /// Breaks row locks, whoever holds them. Guards of broken holds go
    /// stale: writes through them fail with `DbError::NotLocked`.
    ///
    /// * `force = false` - locks of rows that are live in the cache
    /// * `force = true` - every registered lock, including orphans left
    ///   behind by `refresh_all`; idle registry entries are pruned afterwards
    ///
    /// Returns how many locks were actually held and released.
    pub fn unlock_all(&self, force: bool) -> usize {
        let mut cache = self.cache();
        let released = if force {
            let released = cache
                .locks
                .values()
                .map(|lock| lock.force_release())
                .filter(|was_held| *was_held)
                .count();
            cache.prune_idle_locks();
            released
        } else {
            cache
                .rows
                .values()
                .map(|entity| entity.force_unlock())
                .filter(|was_held| *was_held)
                .count()
        };

        info!(table = self.table_name(), force, released, "Released row locks");
        released
    }

    /// Drops every cached instance. Storage is untouched; registered locks
    /// that are still held or referenced survive.
    pub fn refresh_all(&self) {
        let mut cache = self.cache();
        let dropped = cache.rows.len();
        cache.rows.clear();
        let pruned = cache.prune_idle_locks();
        debug!(table = self.table_name(), dropped, pruned, "Cache refreshed");
    }

    // =========================================================================
    // Schema lifecycle
    // =========================================================================

    /// Creates the main and auxiliary tables if missing.
    ///
    /// Returns `true` when at least one of them had to be created.
    pub async fn assure_table_schema(&self) -> DbResult<bool> {
        let def = R::table();
        let tables = self
            .conn
            .list_tables(false)
            .await
            .map_err(|f| DbError::storage("assure_schema", def.name, None, f))?;

        if tables.contains(def.name) && tables.contains(def.aux_name) {
            return Ok(false);
        }

        for sql in [def.create_sql(), def.aux_create_sql()] {
            self.conn
                .execute_ddl(&self.conn.prepare(sql))
                .await
                .map_err(|f| DbError::storage("assure_schema", def.name, None, f))?;
        }

        info!(table = def.name, aux = def.aux_name, "Created table schema");
        Ok(true)
    }

    /// Drops the auxiliary and main tables (if present) and refreshes the
    /// cache.
    pub async fn purge_table_schema(&self) -> DbResult<()> {
        let def = R::table();
        for sql in [def.aux_drop_sql(), def.drop_sql()] {
            self.conn
                .execute_ddl(&self.conn.prepare(sql))
                .await
                .map_err(|f| DbError::storage("purge_schema", def.name, None, f))?;
        }

        self.refresh_all();
        info!(table = def.name, "Purged table schema");
        Ok(())
    }

    /// Restores the auxiliary mirror for every key of the main table in one
    /// statement. Returns the number of auxiliary rows inserted.
    pub async fn create_all_aux_rows(&self) -> DbResult<u64> {
        let def = R::table();
        let inserted = self
            .conn
            .execute(&self.conn.prepare(def.mirror_sql()))
            .await
            .map_err(|f| DbError::storage("mirror_aux", def.name, None, f))?;

        info!(table = def.name, inserted, "Auxiliary rows mirrored");
        Ok(inserted)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn cache(&self) -> MutexGuard<'_, TableCache<R>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `entity` from the cache if it is the cached instance of `id`.
    fn evict(&self, id: &R::Id, entity: &Arc<RowEntity<R>>) {
        let mut cache = self.cache();
        if cache
            .rows
            .get(id)
            .is_some_and(|cached| Arc::ptr_eq(cached, entity))
        {
            cache.rows.remove(id);
        }
    }
}

impl<R: Record> fmt::Debug for TableAccessor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache();
        f.debug_struct("TableAccessor")
            .field("table", &R::table().name)
            .field("cached", &cache.rows.len())
            .field("registered_locks", &cache.locks.len())
            .finish()
    }
}
