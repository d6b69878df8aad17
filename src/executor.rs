//! Statement execution.
//!
//! Consumes a finished query state and walks it through the backend:
//! infer a bind type for every staged column, prepare, bind, execute,
//! materialize. The state is cleared afterwards regardless of outcome so
//! one model instance is reusable across independent queries.

use std::collections::HashMap;

use crate::cache::ResultCache;
use crate::error::DbError;
use crate::model::Model;
use crate::row::Row;
use crate::schema::{ColumnSchema, ColumnType};

/// Outcome of one executed statement.
#[derive(Debug, Default)]
pub(crate) struct ExecOutcome {
    pub(crate) rows: Vec<Row>,
    pub(crate) affected: u64,
    pub(crate) insert_id: u64,
}

/// Resolve a bind type for every staged column.
///
/// The `offset`/`limit` pseudo columns always bind as integers. A
/// qualified name (`table.column`) resolves by its unqualified suffix.
/// Per-model overrides are consulted before the entity schema. A column
/// neither declares is a hard [`DbError::InvalidColumn`], never a silent
/// default.
pub(crate) fn infer_bind_types(
    columns: &[String],
    schema: &ColumnSchema,
    overrides: &HashMap<String, ColumnType>,
) -> Result<Vec<ColumnType>, DbError> {
    let mut types = Vec::with_capacity(columns.len());

    for column in columns {
        if column == "offset" || column == "limit" {
            types.push(ColumnType::Int);
            continue;
        }

        let name = match column.split_once('.') {
            Some((_, suffix)) => suffix.trim_matches('.').trim(),
            None => column.as_str(),
        };

        let resolved = overrides
            .get(name)
            .copied()
            .or_else(|| schema.get(name))
            .ok_or_else(|| DbError::InvalidColumn(name.to_string()))?;
        types.push(resolved);
    }

    Ok(types)
}

impl Model {
    /// Run the accumulated statement through prepare → bind → execute →
    /// materialize, then reset the query state whatever the outcome.
    pub(crate) fn run_query(&mut self) -> Result<ExecOutcome, DbError> {
        let cache_key = ResultCache::key(
            self.entity.table.as_str(),
            &self.state.sql,
            &self.state.bound_columns,
            &self.state.bound_values,
        );

        let result = self.run_query_inner();

        self.last_cache_key = Some(cache_key);
        self.state.reset();
        self.projection = None;

        if let Ok(outcome) = &result {
            self.last_affected = outcome.affected;
            self.last_insert_id = outcome.insert_id;
        }
        result
    }

    fn run_query_inner(&mut self) -> Result<ExecOutcome, DbError> {
        let types = infer_bind_types(
            &self.state.bound_columns,
            &self.entity.columns,
            &self.type_overrides,
        )?;

        if types.len() != self.state.bound_values.len() {
            return Err(DbError::BindMismatch {
                values: self.state.bound_values.len(),
                types: types.len(),
            });
        }

        log::debug!(
            "executing `{}` [{}] with {} value(s)",
            self.state.sql,
            types.iter().map(|t| t.bind_letter()).collect::<String>(),
            self.state.bound_values.len()
        );

        let mut session = self.session.borrow_mut();
        let mut statement = session.prepare(&self.state.sql)?;
        statement.bind(&types, &self.state.bound_values)?;
        statement.execute()?;
        let rows = statement.fetch_rows()?;

        Ok(ExecOutcome {
            affected: statement.rows_affected(),
            insert_id: statement.last_insert_id(),
            rows,
        })
    }
}
