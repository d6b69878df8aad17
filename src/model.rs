//! Entities and the live model handle.
//!
//! An [`EntityDef`] is the static description of a table: its name, its
//! column schema, and an optional `boot` hook that registers the entity's
//! default relations. A [`Model`] is the live handle built from one: it
//! owns the mutable query state, the registered relation descriptors, a
//! shared session and cache handle, and every terminal operation.
//!
//! One model completes a full build → execute → reset cycle before
//! starting another; the state is never shared between two in-flight
//! queries.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::builder::QueryState;
use crate::cache::{CacheHandle, CachedResult, ResultCache};
use crate::config::DbConfig;
use crate::connection::{self, SessionHandle};
use crate::error::DbError;
use crate::relation::{attach, delete, Relation};
use crate::row::{Row, RowCollection};
use crate::schema::{ColumnSchema, ColumnType};
use crate::value::Value;

/// Static description of one entity: table name, column schema, and an
/// optional hook that registers its default relations on construction.
#[derive(Debug, Clone)]
pub struct EntityDef {
    /// Backing table name.
    pub table: String,
    /// Column name → bind type mapping; immutable once built.
    pub columns: ColumnSchema,
    /// Runs after construction on every model built from this entity.
    /// Used to register the relations that cascade deletes recurse into.
    pub boot: Option<fn(&mut Model)>,
}

impl EntityDef {
    /// Describe an entity.
    pub fn new(table: impl Into<String>, columns: ColumnSchema) -> Self {
        Self {
            table: table.into(),
            columns,
            boot: None,
        }
    }

    /// Attach a boot hook.
    pub fn with_boot(mut self, boot: fn(&mut Model)) -> Self {
        self.boot = Some(boot);
        self
    }
}

/// Consumer of a computed total row count, fed by
/// [`Model::paginate`]. Pagination bookkeeping itself is a collaborator
/// concern.
pub trait Paginator {
    /// Receive the total number of rows the unlimited query would match.
    fn set_total(&mut self, total: u64);
}

/// Live handle for building and executing queries against one entity.
pub struct Model {
    pub(crate) entity: EntityDef,
    pub(crate) config: DbConfig,
    pub(crate) state: QueryState,
    pub(crate) projection: Option<Vec<String>>,
    pub(crate) type_overrides: HashMap<String, ColumnType>,
    pub(crate) relations: Vec<Relation>,
    pub(crate) session: SessionHandle,
    pub(crate) cache: ResultCache,
    pub(crate) cache_ttl: Option<u64>,
    pub(crate) last_cache_key: Option<String>,
    pub(crate) last_affected: u64,
    pub(crate) last_insert_id: u64,
    pub(crate) served_from_cache: bool,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("entity", &self.entity)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("projection", &self.projection)
            .field("type_overrides", &self.type_overrides)
            .field("relations", &self.relations)
            .field("cache_ttl", &self.cache_ttl)
            .field("last_cache_key", &self.last_cache_key)
            .field("last_affected", &self.last_affected)
            .field("last_insert_id", &self.last_insert_id)
            .field("served_from_cache", &self.served_from_cache)
            .finish_non_exhaustive()
    }
}

static FIND_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^findBy(?P<field>\w+)$").expect("static pattern"));

impl Model {
    /// Build a model, acquiring (or reusing) the session for the
    /// configured database and the process-default cache store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] when a new session cannot be
    /// established.
    pub fn connect(entity: EntityDef, config: &DbConfig) -> Result<Self, DbError> {
        let session = connection::acquire(config)?;
        Ok(Self::with_session(
            entity,
            config.clone(),
            session,
            crate::cache::default_store(),
        ))
    }

    /// Build a model over explicit session and cache handles. This is the
    /// injection seam used by tests and by the relation engine when it
    /// spawns related models.
    pub fn with_session(
        entity: EntityDef,
        config: DbConfig,
        session: SessionHandle,
        store: CacheHandle,
    ) -> Self {
        let mut model = Model {
            entity,
            config,
            state: QueryState::new(),
            projection: None,
            type_overrides: HashMap::new(),
            relations: Vec::new(),
            session,
            cache: ResultCache::new(store),
            cache_ttl: None,
            last_cache_key: None,
            last_affected: 0,
            last_insert_id: 0,
            served_from_cache: false,
        };
        if let Some(boot) = model.entity.boot {
            boot(&mut model);
        }
        model
    }

    /// Spawn a model for a related entity sharing this model's session,
    /// cache store and configuration.
    pub(crate) fn related(&self, entity: &EntityDef) -> Model {
        Model::with_session(
            entity.clone(),
            self.config.clone(),
            std::rc::Rc::clone(&self.session),
            self.cache.store_handle(),
        )
    }

    /// The entity's table name.
    pub fn table(&self) -> &str {
        &self.entity.table
    }

    /// The entity's column schema.
    pub fn schema(&self) -> &ColumnSchema {
        &self.entity.columns
    }

    /// Rows affected by the last executed statement.
    pub fn affected_rows(&self) -> u64 {
        self.last_affected
    }

    /// Generated identifier of the last insert.
    pub fn insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Whether the last fetch was served from the result cache without
    /// touching the backend.
    pub fn served_from_cache(&self) -> bool {
        self.served_from_cache
    }

    /// Drop every cached entry scoped to this entity's table.
    pub fn flush_cache(&self) {
        self.cache.flush(&self.entity.table);
    }

    /// Release this model's database session from the registry.
    pub fn disconnect(&self) {
        connection::disconnect(&self.config);
    }

    // ------------------------------------------------------------------
    // Select terminals
    // ------------------------------------------------------------------

    /// Compose and run the accumulated query as a single-row SELECT.
    ///
    /// Returns `Ok(None)` when no row matched — an explicit no-rows
    /// signal, distinct from a pending result.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn get(&mut self) -> Result<Option<Row>, DbError> {
        let columns = self.take_projection();
        self.state.sql = format!(
            "SELECT {columns} FROM {} {}",
            self.entity.table, self.state.sql
        );
        self.get_row_result()
    }

    /// Compose and run the accumulated query as a multi-row SELECT.
    ///
    /// Returns `Ok(None)` when no row matched.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn get_all(&mut self) -> Result<Option<RowCollection>, DbError> {
        let columns = self.take_projection();
        self.state.sql = format!(
            "SELECT {columns} FROM {} {}",
            self.entity.table, self.state.sql
        );
        self.get_rows_result()
    }

    /// `SELECT MIN(a) as min, MAX(b) as max` over the accumulated
    /// filters. `max_field` defaults to `min_field`.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn get_min_max(
        &mut self,
        min_field: &str,
        max_field: Option<&str>,
    ) -> Result<Option<Row>, DbError> {
        let max_field = max_field.unwrap_or(min_field);
        self.state.sql = format!(
            "SELECT MIN({min_field}) as min, MAX({max_field}) as max FROM {} {}",
            self.entity.table, self.state.sql
        );
        self.get_row_result()
    }

    /// Single-row lookup by column value, ordered by id.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn find(&mut self, column: &str, value: impl Into<Value>) -> Result<Option<Row>, DbError> {
        self.state.sql = format!(
            "SELECT * FROM {} WHERE {column}= ? ORDER BY id LIMIT 1",
            self.entity.table
        );
        self.bind_value(column, value);
        self.get_row_result()
    }

    /// [`find`](Self::find) on the `id` column.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn find_by_id(&mut self, id: i64) -> Result<Option<Row>, DbError> {
        self.find("id", id)
    }

    /// Dynamic dispatch for `findBy<Field>` method names: the field is
    /// lowercased and routed to [`find`](Self::find).
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] for any other method name, or when no
    /// value argument is supplied.
    pub fn call(&mut self, method: &str, args: &[Value]) -> Result<Option<Row>, DbError> {
        if let Some(captures) = FIND_BY.captures(method) {
            let field = captures["field"].to_lowercase();
            let value = args.first().cloned().ok_or_else(|| {
                DbError::InvalidArgument(format!("{method} requires a value argument"))
            })?;
            return self.find(&field, value);
        }
        Err(DbError::InvalidArgument(format!("{method} method not found")))
    }

    /// `SELECT COUNT(*) AS count ... LIMIT 1` existence probe.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn check_if_exists(
        &mut self,
        column: &str,
        value: impl Into<Value>,
    ) -> Result<bool, DbError> {
        self.state.sql = format!(
            "SELECT COUNT(*) AS count FROM {} WHERE {column}=? LIMIT 1",
            self.entity.table
        );
        self.bind_value(column, value);
        let row = self.get_row_result()?;
        Ok(row.and_then(|r| r.int("count")).unwrap_or(0) != 0)
    }

    /// `DESCRIBE` the entity's table (or another) and return its `Field`
    /// column.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from execution.
    pub fn fetch_columns(&mut self, table: Option<&str>) -> Result<Vec<Value>, DbError> {
        let target = table.unwrap_or(&self.entity.table).to_string();
        self.set_sql(&format!("DESCRIBE {target}"));
        let rows = self.get_rows_result()?;
        Ok(rows.map(|collection| collection.column("Field")).unwrap_or_default())
    }

    /// Count the rows the accumulated filters match. When the SQL carries
    /// a `GROUP ` clause the count is the number of groups.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn count_rows(&mut self) -> Result<u64, DbError> {
        self.state.sql = format!(
            "SELECT COUNT(*) as total FROM {} {}",
            self.entity.table, self.state.sql
        );

        if self.state.sql.contains("GROUP ") {
            let groups = self.get_rows_result()?;
            return Ok(groups.map(|collection| collection.len() as u64).unwrap_or(0));
        }

        let row = self.get_row_result()?;
        Ok(row
            .and_then(|r| r.int("total"))
            .map(|total| total.max(0) as u64)
            .unwrap_or(0))
    }

    /// Total-count computation for pagination: truncates the accumulated
    /// SQL at its first `ORDER`/`LIMIT` occurrence (keeping filters,
    /// dropping ordering and limiting), counts under a temporary cache
    /// TTL, then restores SQL, bindings and cache setting exactly.
    ///
    /// The truncation is a plain text scan; a filter value containing the
    /// literal substring `ORDER` or `LIMIT` will truncate early. Known
    /// sharp edge, kept for compatibility.
    fn pagination_count(&mut self, cache_ttl: u64) -> Result<u64, DbError> {
        let backup = self.backup_query();
        let previous_ttl = self.cache_ttl;

        self.cache(cache_ttl);

        if !self.state.sql.is_empty() {
            let cut = self
                .state
                .sql
                .find("ORDER")
                .or_else(|| self.state.sql.find("LIMIT"));
            if let Some(position) = cut {
                self.state.sql = self.state.sql[..position].trim().to_string();
                // The truncated tail owned the offset/limit pseudo binds;
                // drop them so the count statement binds only its filters.
                let mut index = 0;
                while index < self.state.bound_columns.len() {
                    if matches!(self.state.bound_columns[index].as_str(), "offset" | "limit") {
                        self.state.bound_columns.remove(index);
                        self.state.bound_values.remove(index);
                    } else {
                        index += 1;
                    }
                }
            }
        }

        let total = self.count_rows();

        self.restore_backup(backup);
        self.cache_ttl = previous_ttl;

        total
    }

    /// Feed the total row count of the current (unlimited) query into a
    /// paginator, leaving the builder state untouched.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from the count query.
    pub fn paginate(
        &mut self,
        paginator: &mut dyn Paginator,
        cache_ttl: u64,
    ) -> Result<&mut Self, DbError> {
        let total = self.pagination_count(cache_ttl)?;
        paginator.set_total(total);
        Ok(self)
    }

    // ------------------------------------------------------------------
    // Write terminals
    // ------------------------------------------------------------------

    /// Low-level insert entry point behind [`insert`](Self::insert),
    /// [`insert_multiple`](Self::insert_multiple) and
    /// [`insert_on_duplicate`](Self::insert_on_duplicate): a row width
    /// for multi-row inserts, and whether to append the
    /// `ON DUPLICATE KEY UPDATE` arm. Combining both is unsupported.
    ///
    /// # Errors
    ///
    /// [`DbError::MissingWriteColumns`] when nothing is staged,
    /// [`DbError::InvalidArgument`] for the unsupported combination or a
    /// ragged staging, plus any binding/execution error.
    pub fn insert_with(
        &mut self,
        multiple: Option<usize>,
        on_duplicate: bool,
    ) -> Result<u64, DbError> {
        if self.state.write_columns.is_empty() {
            return Err(DbError::MissingWriteColumns);
        }
        if on_duplicate && multiple.is_some() {
            return Err(DbError::InvalidArgument(
                "ON DUPLICATE KEY UPDATE is not supported for multi-row inserts".to_string(),
            ));
        }

        let (columns, placeholders) = match multiple {
            None => {
                let columns = self.state.write_columns.join(",");
                let placeholders = vec!["?"; self.state.write_columns.len()].join(",");
                (columns, placeholders)
            }
            Some(width) => {
                let staged = self.state.write_columns.len();
                if width == 0 || staged % width != 0 {
                    return Err(DbError::InvalidArgument(format!(
                        "{staged} staged value(s) do not fill rows of width {width}"
                    )));
                }
                let columns = self.state.write_columns[..width].join(",");
                let tuple = vec!["?"; width].join(",");
                let placeholders = vec![tuple; staged / width].join("), (");
                (columns, placeholders)
            }
        };

        self.state.sql = if on_duplicate {
            // Re-bind every staged column for the UPDATE arm, in staging
            // order.
            let staged: Vec<(String, Value)> = self
                .state
                .write_columns
                .iter()
                .cloned()
                .zip(self.state.bound_values.iter().cloned())
                .collect();
            let mut assignments = Vec::with_capacity(staged.len());
            for (column, value) in staged {
                assignments.push(format!(" {column} = ? "));
                self.set_column_value(&column, value);
            }
            format!(
                "INSERT INTO {} ({columns}) VALUES ({placeholders}) ON DUPLICATE KEY UPDATE {}",
                self.entity.table,
                assignments.join(",")
            )
        } else {
            format!(
                "INSERT INTO {} ({columns}) VALUES ({placeholders})",
                self.entity.table
            )
        };

        let outcome = self.run_query()?;
        self.flush_cache();
        Ok(outcome.insert_id)
    }

    /// Insert one row from the staged write columns and return the
    /// generated identifier. Flushes this table's cache scope.
    ///
    /// # Errors
    ///
    /// [`DbError::MissingWriteColumns`] when nothing is staged, plus any
    /// binding/execution error.
    pub fn insert(&mut self) -> Result<u64, DbError> {
        self.insert_with(None, false)
    }

    /// Insert several rows at once. The staged values must be in
    /// row-major order and `width` columns wide per row; the column list
    /// is taken from the first row's staging.
    ///
    /// # Errors
    ///
    /// [`DbError::MissingWriteColumns`] when nothing is staged,
    /// [`DbError::InvalidArgument`] when the staged count does not fill
    /// whole rows, plus any binding/execution error.
    pub fn insert_multiple(&mut self, width: usize) -> Result<u64, DbError> {
        self.insert_with(Some(width), false)
    }

    /// Insert one row with an `ON DUPLICATE KEY UPDATE` arm re-binding
    /// every staged column.
    ///
    /// # Errors
    ///
    /// [`DbError::MissingWriteColumns`] when nothing is staged, plus any
    /// binding/execution error.
    pub fn insert_on_duplicate(&mut self) -> Result<u64, DbError> {
        self.insert_with(None, true)
    }

    /// Update the staged write columns on the rows the accumulated WHERE
    /// fragment matches. Returns the affected-row count and flushes this
    /// table's cache scope.
    ///
    /// # Errors
    ///
    /// [`DbError::MissingWriteColumns`] when nothing is staged,
    /// [`DbError::InvalidArgument`] when no WHERE fragment was built, plus
    /// any binding/execution error.
    pub fn update(&mut self) -> Result<u64, DbError> {
        if self.state.write_columns.is_empty() {
            return Err(DbError::MissingWriteColumns);
        }
        if self.state.sql.trim().is_empty() {
            return Err(DbError::InvalidArgument(
                "update requires a WHERE fragment; stage conditions first".to_string(),
            ));
        }

        let assignments = self
            .state
            .write_columns
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(",");
        self.state.sql = format!(
            "UPDATE {} SET {assignments} {}",
            self.entity.table, self.state.sql
        );

        let outcome = self.run_query()?;
        self.flush_cache();
        Ok(outcome.affected)
    }

    /// Apply `column = column <modifier> ?` to the rows the accumulated
    /// WHERE fragment matches.
    ///
    /// With no WHERE fragment staged this updates **every** row of the
    /// table; that is long-standing documented behavior, not an
    /// oversight. Flushes this table's cache scope.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn modify_field(
        &mut self,
        column: &str,
        value: impl Into<Value>,
        modifier: &str,
    ) -> Result<u64, DbError> {
        self.state.sql = format!(
            "UPDATE {} SET {column} = {column} {modifier} ? {}",
            self.entity.table, self.state.sql
        );
        // The SET placeholder precedes every staged filter bind.
        self.state.bound_columns.insert(0, column.to_string());
        self.state.bound_values.insert(0, value.into());

        let outcome = self.run_query()?;
        self.flush_cache();
        Ok(outcome.affected)
    }

    /// Delete the rows the accumulated WHERE fragment matches. Relations
    /// that declare themselves deletable contribute LEFT JOIN fragments
    /// and their table names, so one statement can cascade across tables.
    /// Flushes this table's cache scope.
    ///
    /// `tables` overrides the default delete target list (this entity's
    /// own table).
    ///
    /// # Errors
    ///
    /// Any [`DbError`] from binding or execution.
    pub fn delete(&mut self, tables: &[&str]) -> Result<u64, DbError> {
        let mut deletable: Vec<String> = if tables.is_empty() {
            vec![self.entity.table.clone()]
        } else {
            tables.iter().map(|t| t.to_string()).collect()
        };

        let relations = self.relations.clone();
        let local_table = self.entity.table.clone();
        let join_sql = delete::related_delete_sql(self, &relations, &local_table, &mut deletable)?;

        self.state.sql = format!(
            "DELETE {} FROM {} {join_sql} {}",
            deletable.join(","),
            self.entity.table,
            self.state.sql
        );

        let outcome = self.run_query()?;
        self.flush_cache();
        Ok(outcome.affected)
    }

    // ------------------------------------------------------------------
    // Fetch internals
    // ------------------------------------------------------------------

    /// Run the (already composed) statement and materialize a single row,
    /// serving from and feeding the result cache, attaching registered
    /// relations, and clearing the descriptor list on every exit path.
    pub(crate) fn get_row_result(&mut self) -> Result<Option<Row>, DbError> {
        let relations = std::mem::take(&mut self.relations);
        self.served_from_cache = false;
        let requested_ttl = self.cache_ttl;

        if let Some(ttl) = requested_ttl {
            let key = ResultCache::key(
                &self.entity.table,
                &self.state.sql,
                &self.state.bound_columns,
                &self.state.bound_values,
            );
            if let Some(CachedResult::Row(row)) = self.cache.get(&key, ttl) {
                self.served_from_cache = true;
                self.cache_ttl = None;
                self.state.reset();
                self.projection = None;
                return Ok(Some(row));
            }
        }

        let outcome = self.run_query()?;
        let Some(mut row) = outcome.rows.into_iter().next() else {
            self.cache_ttl = None;
            return Ok(None);
        };

        attach::attach_single(self, &relations, &mut row)?;

        if let Some(ttl) = requested_ttl {
            if let Some(key) = self.last_cache_key.clone() {
                self.cache.set(&key, &CachedResult::Row(row.clone()), ttl);
            }
            self.cache_ttl = None;
        }

        Ok(Some(row))
    }

    /// Multi-row counterpart of [`get_row_result`](Self::get_row_result).
    pub(crate) fn get_rows_result(&mut self) -> Result<Option<RowCollection>, DbError> {
        let relations = std::mem::take(&mut self.relations);
        self.served_from_cache = false;
        let requested_ttl = self.cache_ttl;

        if let Some(ttl) = requested_ttl {
            let key = ResultCache::key(
                &self.entity.table,
                &self.state.sql,
                &self.state.bound_columns,
                &self.state.bound_values,
            );
            if let Some(CachedResult::Rows(collection)) = self.cache.get(&key, ttl) {
                self.served_from_cache = true;
                self.cache_ttl = None;
                self.state.reset();
                self.projection = None;
                return Ok(Some(collection));
            }
        }

        let outcome = self.run_query()?;
        if outcome.rows.is_empty() {
            self.cache_ttl = None;
            return Ok(None);
        }

        let mut rows = outcome.rows;
        attach::attach_multi(self, &relations, &mut rows)?;
        let collection = RowCollection::new(rows);

        if let Some(ttl) = requested_ttl {
            if let Some(key) = self.last_cache_key.clone() {
                self.cache
                    .set(&key, &CachedResult::Rows(collection.clone()), ttl);
            }
            self.cache_ttl = None;
        }

        Ok(Some(collection))
    }
}
