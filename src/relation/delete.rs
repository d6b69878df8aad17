//! Relation contributions to cascading deletes.
//!
//! A deletable relation folds a LEFT JOIN fragment and its table name
//! into the delete statement, so one statement removes the base rows and
//! their dependents. `HasOne` recurses into the foreign entity's own
//! relations (registered by its boot hook) for multi-level cascades;
//! `BelongsTo` never participates, because deleting an owner must not
//! delete the thing it belongs to.

use crate::error::DbError;
use crate::model::Model;
use crate::relation::def::{Relation, RelationKind};

/// Collect the JOIN SQL and deletable table names every relation in the
/// list contributes, joining against `local_table`.
pub(crate) fn related_delete_sql(
    model: &Model,
    relations: &[Relation],
    local_table: &str,
    deletable: &mut Vec<String>,
) -> Result<String, DbError> {
    let mut sql = String::new();

    for relation in relations {
        match &relation.kind {
            RelationKind::BelongsTo => {}
            RelationKind::HasOne => {
                let foreign_table = relation.foreign.table.clone();
                sql.push_str(&format!(
                    " LEFT JOIN {foreign_table} ON {foreign_table}.{} = {local_table}.{}",
                    relation.foreign_column, relation.local_column
                ));
                deletable.push(foreign_table.clone());

                // Recurse through the foreign entity's own relations,
                // rebased on the foreign table.
                let foreign_model = model.related(&relation.foreign);
                let nested = related_delete_sql(
                    &foreign_model,
                    foreign_model.relations(),
                    &foreign_table,
                    deletable,
                )?;
                sql.push_str(&nested);
            }
            RelationKind::HasMany => {
                let foreign_table = relation.foreign.table.clone();
                sql.push_str(&format!(
                    " LEFT JOIN {foreign_table} ON {foreign_table}.{} = {local_table}.{}",
                    relation.foreign_column, relation.local_column
                ));
                deletable.push(foreign_table);
            }
            RelationKind::HasManyToMany {
                junction,
                junction_local,
                ..
            } => {
                let junction_table = junction.table.clone();
                sql.push_str(&format!(
                    " LEFT JOIN {junction_table} ON {junction_table}.{junction_local} = {local_table}.id"
                ));
                deletable.push(junction_table);
            }
        }
    }

    Ok(sql)
}
