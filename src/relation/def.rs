//! Relation descriptors.
//!
//! A [`Relation`] declares an association between two entities. The four
//! kinds form a closed set, dispatched by a single match in the attach
//! and cascade-delete algorithms rather than by virtual override.
//! Descriptors are registered imperatively on a model before a fetch and
//! consumed by that fetch; the list is cleared afterwards whatever the
//! outcome.

use crate::model::EntityDef;

/// The kind of association, with the junction metadata for the
/// many-to-many case.
#[derive(Debug, Clone)]
pub enum RelationKind {
    /// One related row per local key (`local.column → foreign.column`).
    HasOne,
    /// Many related rows per local key, collected into an array-valued
    /// field.
    HasMany,
    /// Inverse direction: this entity holds the foreign key.
    BelongsTo,
    /// Many-to-many through a junction table.
    HasManyToMany {
        /// The junction entity.
        junction: EntityDef,
        /// Junction column holding this entity's key.
        junction_local: String,
        /// Junction column holding the foreign entity's key.
        junction_foreign: String,
    },
}

/// A declared association, plus its presentation knobs.
#[derive(Debug, Clone)]
pub struct Relation {
    pub(crate) kind: RelationKind,
    pub(crate) local_column: String,
    pub(crate) foreign: EntityDef,
    pub(crate) foreign_column: String,
    pub(crate) alias: Option<String>,
    pub(crate) columns: Option<Vec<String>>,
    pub(crate) cache_ttl: Option<u64>,
}

impl Relation {
    pub(crate) fn new(
        kind: RelationKind,
        local_column: impl Into<String>,
        foreign: EntityDef,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            local_column: local_column.into(),
            foreign,
            foreign_column: foreign_column.into(),
            alias: None,
            columns: None,
            cache_ttl: None,
        }
    }

    /// Attach related data under this field name instead of the foreign
    /// table name.
    pub fn name_as(&mut self, alias: &str) -> &mut Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Project only these columns when fetching related rows.
    pub fn columns(&mut self, columns: &[&str]) -> &mut Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Cache the related fetch with this TTL in seconds.
    pub fn cache(&mut self, ttl: u64) -> &mut Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// The association kind.
    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    /// The column on the base entity the association keys on.
    pub fn local_column(&self) -> &str {
        &self.local_column
    }

    /// The related entity.
    pub fn foreign(&self) -> &EntityDef {
        &self.foreign
    }

    /// The column on the foreign entity the association keys on.
    pub fn foreign_column(&self) -> &str {
        &self.foreign_column
    }

    /// The field name related data attaches under.
    pub(crate) fn alias_or_default(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.foreign.table.clone())
    }
}
