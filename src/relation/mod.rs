//! Declared associations and their eager resolution.
//!
//! Relations are registered imperatively on a model instance, consumed by
//! the next terminal fetch, and cleared unconditionally afterwards. Each
//! registered relation resolves with exactly one additional query against
//! the already-fetched base result — the batched `IN (...)` strategy —
//! and splices related rows onto their parents by a computed join index.
//!
//! Per fetch the lifecycle is: register → fetch base rows → attach (each
//! descriptor once, in registration order) → clear.

pub(crate) mod attach;
pub mod def;
pub(crate) mod delete;

pub use def::{Relation, RelationKind};

use crate::error::DbError;
use crate::model::{EntityDef, Model};
use crate::value::Value;

impl Model {
    fn push_relation(&mut self, relation: Relation) -> &mut Relation {
        self.relations.push(relation);
        self.relations.last_mut().expect("just pushed")
    }

    /// Declare a one-to-one association: `self.id → foreign.<column>`.
    pub fn has_one(&mut self, foreign: &EntityDef, foreign_column: &str) -> &mut Relation {
        self.has_one_via(foreign, foreign_column, "id")
    }

    /// [`has_one`](Self::has_one) keyed on an explicit local column.
    pub fn has_one_via(
        &mut self,
        foreign: &EntityDef,
        foreign_column: &str,
        local_column: &str,
    ) -> &mut Relation {
        self.push_relation(Relation::new(
            RelationKind::HasOne,
            local_column,
            foreign.clone(),
            foreign_column,
        ))
    }

    /// Declare a one-to-many association: `self.id → foreign.<column>`,
    /// attached as an array-valued field.
    pub fn has_many(&mut self, foreign: &EntityDef, foreign_column: &str) -> &mut Relation {
        self.push_relation(Relation::new(
            RelationKind::HasMany,
            "id",
            foreign.clone(),
            foreign_column,
        ))
    }

    /// Declare the inverse association: `self.<column> → foreign.id`.
    pub fn belongs_to(&mut self, foreign: &EntityDef, local_column: &str) -> &mut Relation {
        self.belongs_to_via(foreign, local_column, "id")
    }

    /// [`belongs_to`](Self::belongs_to) keyed on an explicit foreign
    /// column.
    pub fn belongs_to_via(
        &mut self,
        foreign: &EntityDef,
        local_column: &str,
        foreign_column: &str,
    ) -> &mut Relation {
        self.push_relation(Relation::new(
            RelationKind::BelongsTo,
            local_column,
            foreign.clone(),
            foreign_column,
        ))
    }

    /// Declare a many-to-many association through a junction entity.
    /// `junction_local` holds this entity's key, `junction_foreign` the
    /// foreign entity's.
    pub fn has_many_to_many(
        &mut self,
        foreign: &EntityDef,
        junction: &EntityDef,
        junction_local: &str,
        junction_foreign: &str,
    ) -> &mut Relation {
        self.push_relation(Relation::new(
            RelationKind::HasManyToMany {
                junction: junction.clone(),
                junction_local: junction_local.to_string(),
                junction_foreign: junction_foreign.to_string(),
            },
            "id",
            foreign.clone(),
            "id",
        ))
    }

    /// The currently registered relation descriptors.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Drop every registered relation descriptor.
    pub fn clear_relations(&mut self) -> &mut Self {
        self.relations.clear();
        self
    }

    /// Reconcile the junction rows of the most recently declared
    /// many-to-many relation for `local_value` against a desired set of
    /// foreign ids.
    ///
    /// Junction rows outside the desired set are deleted (all of them
    /// when the set is empty); ids absent from storage are bulk-inserted;
    /// rows already present are left untouched. Calling twice with the
    /// same set is a no-op the second time.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] when no relation is registered or the
    /// last one is not many-to-many, plus any binding/execution error
    /// from the reconciliation statements.
    pub fn attach_to(
        &mut self,
        local_value: impl Into<Value>,
        foreign_ids: Vec<Value>,
    ) -> Result<(), DbError> {
        let Some(relation) = self.relations.last().cloned() else {
            return Err(DbError::InvalidArgument(
                "define a many-to-many relationship before attach_to".to_string(),
            ));
        };
        self.clear_relations();

        let RelationKind::HasManyToMany {
            junction,
            junction_local,
            junction_foreign,
        } = &relation.kind
        else {
            return Err(DbError::InvalidArgument(
                "attach_to requires a many-to-many relationship".to_string(),
            ));
        };

        let local_value = local_value.into();
        let mut junction_model = self.related(junction);

        // Drop junction rows that fell out of the desired set.
        junction_model.where_(junction_local, local_value.clone());
        if !foreign_ids.is_empty() {
            junction_model.not_in(junction_foreign, Value::List(foreign_ids.clone()))?;
        }
        junction_model.delete(&[])?;

        if foreign_ids.is_empty() {
            return Ok(());
        }

        // Diff the survivors against the desired set.
        junction_model
            .where_(junction_local, local_value.clone())
            .order_by("id", "ASC");
        let current = junction_model.get_all()?;
        let current_keys: Vec<String> = current
            .map(|collection| {
                collection
                    .column(junction_foreign)
                    .iter()
                    .map(Value::key_string)
                    .collect()
            })
            .unwrap_or_default();

        let missing: Vec<Value> = foreign_ids
            .into_iter()
            .filter(|id| !current_keys.contains(&id.key_string()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        for id in missing {
            junction_model.set_column_value(junction_local, local_value.clone());
            junction_model.set_column_value(junction_foreign, id);
        }
        junction_model.insert_multiple(2)?;
        Ok(())
    }
}
