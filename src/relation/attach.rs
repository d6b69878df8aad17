//! Eager attachment of related data onto fetched rows.
//!
//! The multi-row strategy avoids per-row query storms: index the base
//! rows by their local-column value, fetch every related row with one
//! batched `IN (...)` query, then splice each related row back onto the
//! parents whose key matches. A base row with no match simply keeps no
//! alias field. Relations run sequentially in registration order; each
//! related fetch is a full builder → executor cycle on a spawned model.

use std::collections::HashMap;

use crate::error::DbError;
use crate::model::Model;
use crate::relation::def::{Relation, RelationKind};
use crate::row::Row;
use crate::schema::ColumnType;
use crate::value::Value;

/// Attach every registered relation onto a multi-row result.
pub(crate) fn attach_multi(
    model: &Model,
    relations: &[Relation],
    rows: &mut Vec<Row>,
) -> Result<(), DbError> {
    for relation in relations {
        match relation.kind {
            RelationKind::HasOne | RelationKind::HasMany | RelationKind::BelongsTo => {
                attach_direct_multi(model, relation, rows)?;
            }
            RelationKind::HasManyToMany { .. } => {
                attach_junction_multi(model, relation, rows)?;
            }
        }
    }
    Ok(())
}

/// Attach every registered relation onto a single fetched row.
pub(crate) fn attach_single(
    model: &Model,
    relations: &[Relation],
    row: &mut Row,
) -> Result<(), DbError> {
    for relation in relations {
        match relation.kind {
            RelationKind::HasOne | RelationKind::BelongsTo => {
                attach_direct_single(model, relation, row)?;
            }
            RelationKind::HasMany => {
                attach_many_single(model, relation, row)?;
            }
            RelationKind::HasManyToMany { .. } => {
                attach_junction_single(model, relation, row)?;
            }
        }
    }
    Ok(())
}

/// Index base rows by local-column value: key string → row positions,
/// plus the distinct values in first-seen order for the IN list.
fn build_index(rows: &[Row], local_column: &str) -> (HashMap<String, Vec<usize>>, Vec<Value>) {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    let mut distinct = Vec::new();

    for (position, row) in rows.iter().enumerate() {
        let Some(value) = row.get(local_column) else {
            continue;
        };
        let key = value.key_string();
        let positions = index.entry(key).or_insert_with(|| {
            distinct.push(value.clone());
            Vec::new()
        });
        positions.push(position);
    }

    (index, distinct)
}

fn configure(foreign: &mut Model, relation: &Relation) {
    if let Some(columns) = &relation.columns {
        foreign.project(columns);
    }
    if let Some(ttl) = relation.cache_ttl {
        foreign.cache(ttl);
    }
}

fn attach_direct_multi(
    model: &Model,
    relation: &Relation,
    rows: &mut Vec<Row>,
) -> Result<(), DbError> {
    let (index, distinct) = build_index(rows, &relation.local_column);
    if distinct.is_empty() {
        return Ok(());
    }

    let mut foreign = model.related(&relation.foreign);
    configure(&mut foreign, relation);
    foreign.and_in(&relation.foreign_column, Value::List(distinct))?;
    foreign.order_by("id", "ASC");

    let Some(related) = foreign.get_all()? else {
        return Ok(());
    };

    let alias = relation.alias_or_default();
    for related_row in related.rows() {
        let Some(key) = related_row
            .get(&relation.foreign_column)
            .map(Value::key_string)
        else {
            continue;
        };
        let Some(positions) = index.get(&key) else {
            continue;
        };
        for &position in positions {
            match relation.kind {
                RelationKind::HasMany => rows[position].push_related(&alias, related_row.clone()),
                _ => rows[position].set(&alias, Value::Row(Box::new(related_row.clone()))),
            }
        }
    }
    Ok(())
}

fn attach_direct_single(model: &Model, relation: &Relation, row: &mut Row) -> Result<(), DbError> {
    let Some(local_value) = row.get(&relation.local_column).cloned() else {
        return Ok(());
    };

    let mut foreign = model.related(&relation.foreign);
    configure(&mut foreign, relation);
    foreign.where_(&relation.foreign_column, local_value);
    foreign.first();

    if let Some(related) = foreign.get()? {
        row.set(&relation.alias_or_default(), Value::Row(Box::new(related)));
    }
    Ok(())
}

fn attach_many_single(model: &Model, relation: &Relation, row: &mut Row) -> Result<(), DbError> {
    let Some(local_value) = row.get(&relation.local_column).cloned() else {
        return Ok(());
    };

    let mut foreign = model.related(&relation.foreign);
    configure(&mut foreign, relation);
    foreign.where_(&relation.foreign_column, local_value);
    foreign.order_by("id", "ASC");

    if let Some(related) = foreign.get_all()? {
        row.set(
            &relation.alias_or_default(),
            Value::Rows(related.into_rows()),
        );
    }
    Ok(())
}

fn attach_junction_multi(
    model: &Model,
    relation: &Relation,
    rows: &mut Vec<Row>,
) -> Result<(), DbError> {
    let RelationKind::HasManyToMany {
        junction,
        junction_local,
        junction_foreign,
    } = &relation.kind
    else {
        return Ok(());
    };

    let (index, distinct) = build_index(rows, &relation.local_column);
    if distinct.is_empty() {
        return Ok(());
    }

    let junction_table = junction.table.clone();
    let foreign_table = relation.foreign.table.clone();

    let mut foreign = model.related(&relation.foreign);
    foreign.join(
        &junction_table,
        &format!("{junction_table}.{junction_foreign}"),
        &format!("{foreign_table}.id"),
    );
    // The junction key is filtered on but lives outside the foreign
    // entity's schema; type it through the overlay.
    foreign.set_column_type(junction_local, ColumnType::Int);
    foreign.and_in(
        &format!("{junction_table}.{junction_local}"),
        Value::List(distinct),
    )?;
    foreign.order_by(&format!("{foreign_table}.id"), "ASC");

    // The junction key column rides along so results can be grouped back
    // onto their parents.
    let mut columns = relation
        .columns
        .clone()
        .unwrap_or_else(|| vec![format!("{foreign_table}.*")]);
    columns.push(format!("{junction_table}.{junction_local}"));
    foreign.project(&columns);
    if let Some(ttl) = relation.cache_ttl {
        foreign.cache(ttl);
    }

    let Some(related) = foreign.get_all()? else {
        return Ok(());
    };

    let alias = relation.alias_or_default();
    for related_row in related.rows() {
        let Some(key) = related_row.get(junction_local).map(Value::key_string) else {
            continue;
        };
        let Some(positions) = index.get(&key) else {
            continue;
        };
        for &position in positions {
            rows[position].push_related(&alias, related_row.clone());
        }
    }
    Ok(())
}

fn attach_junction_single(model: &Model, relation: &Relation, row: &mut Row) -> Result<(), DbError> {
    let RelationKind::HasManyToMany {
        junction,
        junction_local,
        junction_foreign,
    } = &relation.kind
    else {
        return Ok(());
    };

    let Some(local_value) = row.get(&relation.local_column).cloned() else {
        return Ok(());
    };

    let junction_table = junction.table.clone();
    let foreign_table = relation.foreign.table.clone();

    let mut foreign = model.related(&relation.foreign);
    foreign.join(
        &junction_table,
        &format!("{junction_table}.{junction_foreign}"),
        &format!("{foreign_table}.id"),
    );
    foreign.set_column_type(junction_local, ColumnType::Int);
    foreign.where_(&format!("{junction_table}.{junction_local}"), local_value);
    foreign.order_by(&format!("{foreign_table}.id"), "ASC");

    let columns = relation
        .columns
        .clone()
        .unwrap_or_else(|| vec![format!("{foreign_table}.*")]);
    foreign.project(&columns);
    if let Some(ttl) = relation.cache_ttl {
        foreign.cache(ttl);
    }

    let related = foreign.get_all()?;
    row.set(
        &relation.alias_or_default(),
        Value::Rows(related.map(|c| c.into_rows()).unwrap_or_default()),
    );
    Ok(())
}
