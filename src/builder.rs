//! The fluent SQL-fragment builder.
//!
//! Every method here mutates the model's [`QueryState`] and returns the
//! model again so calls chain; none of them performs I/O. The terminal
//! operations (fetch, insert, update, delete, ...) live on
//! [`Model`](crate::model::Model) in the model module.
//!
//! Condition placement follows one rule: the first condition appended to
//! a query gets the `WHERE` keyword, every later one gets the
//! caller-supplied connective (`AND`/`OR`). Grouped sub-conditions opened
//! by [`group_condition`](crate::model::Model::group_condition) use
//! [`just_where`](crate::model::Model::just_where) for their first member,
//! which forces an empty prefix.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DbError;
use crate::model::Model;
use crate::schema::ColumnType;
use crate::value::Value;

/// Mutable accumulator behind one in-flight query.
///
/// The invariant `bound_columns.len() == bound_values.len()` holds at all
/// times; the two vectors are parallel. `write_columns` is the subset of
/// staged columns destined for INSERT/UPDATE value lists, as opposed to
/// read-only filter bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    /// Raw SQL text under construction.
    pub sql: String,
    /// Names of staged bindings, in placeholder order.
    pub bound_columns: Vec<String>,
    /// Staged values, parallel to `bound_columns`.
    pub bound_values: Vec<Value>,
    /// Columns staged as INSERT/UPDATE targets.
    pub write_columns: Vec<String>,
    /// Whether a condition keyword has been emitted for this query.
    pub condition_started: bool,
}

impl QueryState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Clear every field back to the just-constructed default.
    pub(crate) fn reset(&mut self) {
        self.sql.clear();
        self.bound_columns.clear();
        self.bound_values.clear();
        self.write_columns.clear();
        self.condition_started = false;
    }
}

/// Snapshot of the restorable parts of a [`QueryState`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBackup {
    sql: String,
    bound_columns: Vec<String>,
    bound_values: Vec<Value>,
}

static ORDER_COLUMN_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static pattern"));
static GROUP_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_.\-]+").expect("static pattern"));

impl Model {
    /// The connective to prefix the next condition with: `WHERE` exactly
    /// once per query, then the caller-supplied keyword.
    pub fn condition(&mut self, alt: &str) -> String {
        if self.state.condition_started {
            return alt.to_string();
        }
        self.state.condition_started = true;
        "WHERE".to_string()
    }

    /// Whether a condition keyword has been emitted for this query.
    pub fn condition_started(&self) -> bool {
        self.state.condition_started
    }

    fn where_condition(
        &mut self,
        keyword: &str,
        column: &str,
        compare: &str,
        value: Value,
    ) -> &mut Self {
        self.state
            .sql
            .push_str(&format!(" {keyword} {column} {compare} ? "));
        self.state.bound_columns.push(column.to_string());
        self.state.bound_values.push(value);
        self.state.condition_started = true;
        self
    }

    /// Append `column = ?` under the automatic condition keyword.
    pub fn where_(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("AND");
        self.where_condition(&keyword, column, "=", value.into())
    }

    /// Append `column <compare> ?` under the automatic condition keyword.
    pub fn where_op(&mut self, column: &str, compare: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("AND");
        self.where_condition(&keyword, column, compare, value.into())
    }

    /// Append `column = ?` under `AND`.
    pub fn and_where(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("AND");
        self.where_condition(&keyword, column, "=", value.into())
    }

    /// Append `column <compare> ?` under `AND`.
    pub fn and_where_op(
        &mut self,
        column: &str,
        compare: &str,
        value: impl Into<Value>,
    ) -> &mut Self {
        let keyword = self.condition("AND");
        self.where_condition(&keyword, column, compare, value.into())
    }

    /// Append `column = ?` under `OR`.
    pub fn or_where(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("OR");
        self.where_condition(&keyword, column, "=", value.into())
    }

    /// Append `column <compare> ?` under `OR`.
    pub fn or_where_op(
        &mut self,
        column: &str,
        compare: &str,
        value: impl Into<Value>,
    ) -> &mut Self {
        let keyword = self.condition("OR");
        self.where_condition(&keyword, column, compare, value.into())
    }

    /// Append `column = ?` with no connective. Only meaningful as the
    /// first condition inside a [`group_condition`](Self::group_condition)
    /// block.
    pub fn just_where(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.where_condition("", column, "=", value.into())
    }

    /// [`just_where`](Self::just_where) with an explicit comparator.
    pub fn just_where_op(
        &mut self,
        column: &str,
        compare: &str,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.where_condition("", column, compare, value.into())
    }

    /// Wrap the conditions appended by `build` in parentheses under the
    /// given connective: ` <keyword> ( ... ) `.
    ///
    /// # Errors
    ///
    /// Propagates any error from the callback.
    pub fn group_condition<F>(&mut self, keyword: &str, build: F) -> Result<&mut Self, DbError>
    where
        F: FnOnce(&mut Self) -> Result<(), DbError>,
    {
        self.state.sql.push_str(&format!(" {keyword} ("));
        build(self)?;
        self.state.sql.push_str(") ");
        Ok(self)
    }

    fn in_condition(
        &mut self,
        keyword: &str,
        column: &str,
        values: Value,
        negative: bool,
    ) -> Result<&mut Self, DbError> {
        if matches!(values, Value::Row(_) | Value::Rows(_)) {
            return Err(DbError::InvalidArgument(
                "IN-list value cannot be an object".to_string(),
            ));
        }

        // An empty value set cannot expand to placeholders, but the
        // literal 0 (and "0") is a real value, not an empty set.
        let effectively_empty = match &values {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            Value::Text(text) => text.is_empty(),
            Value::Double(d) => *d == 0.0,
            _ => false,
        };

        if effectively_empty {
            // Self-contradictory predicate: zero rows for an inclusive
            // IN, no filtering at all for a negated one.
            let tautology = if negative { "1=1" } else { "2=1" };
            self.state.sql.push_str(&format!(" {keyword} {tautology}"));
            return Ok(self);
        }

        let items: Vec<Value> = match values {
            Value::List(items) => items,
            Value::Text(text) if text.contains(',') => {
                text.split(',').map(|piece| Value::Text(piece.to_string())).collect()
            }
            scalar => vec![scalar],
        };

        for item in &items {
            if !item.is_scalar() {
                return Err(DbError::InvalidArgument(
                    "IN-list element cannot be an object".to_string(),
                ));
            }
        }
        let placeholders = vec!["?"; items.len()].join(",");
        for item in items {
            self.set_column_value(column, item);
        }

        let negation = if negative { "NOT " } else { "" };
        self.state
            .sql
            .push_str(&format!(" {keyword} {column} {negation}IN ({placeholders}) "));
        Ok(self)
    }

    /// `column IN (...)` under the automatic condition keyword.
    ///
    /// Accepts a list, a comma-separated string, or a single scalar (one
    /// placeholder). An empty set emits the `2=1` contradiction so no row
    /// matches.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] when the value is an object.
    pub fn where_in(&mut self, column: &str, values: impl Into<Value>) -> Result<&mut Self, DbError> {
        let keyword = self.condition("AND");
        self.in_condition(&keyword, column, values.into(), false)
    }

    /// `column IN (...)` under `AND`.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] when the value is an object.
    pub fn and_in(&mut self, column: &str, values: impl Into<Value>) -> Result<&mut Self, DbError> {
        let keyword = self.condition("AND");
        self.in_condition(&keyword, column, values.into(), false)
    }

    /// `column IN (...)` under `OR`.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] when the value is an object.
    pub fn or_in(&mut self, column: &str, values: impl Into<Value>) -> Result<&mut Self, DbError> {
        let keyword = self.condition("OR");
        self.in_condition(&keyword, column, values.into(), false)
    }

    /// `column NOT IN (...)` under the automatic condition keyword. An
    /// empty set emits the `1=1` tautology: nothing is filtered out.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] when the value is an object.
    pub fn not_in(&mut self, column: &str, values: impl Into<Value>) -> Result<&mut Self, DbError> {
        let keyword = self.condition("AND");
        self.in_condition(&keyword, column, values.into(), true)
    }

    /// `(column BETWEEN ? AND ?)` under the automatic condition keyword.
    pub fn between(
        &mut self,
        column: &str,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> &mut Self {
        let keyword = self.condition("AND");
        self.between_with(column, start, end, &keyword)
    }

    /// [`between`](Self::between) under an explicit connective.
    pub fn between_with(
        &mut self,
        column: &str,
        start: impl Into<Value>,
        end: impl Into<Value>,
        keyword: &str,
    ) -> &mut Self {
        self.state
            .sql
            .push_str(&format!(" {keyword} ({column} BETWEEN ? AND ?) "));
        self.set_column_value(column, start.into());
        self.set_column_value(column, end.into());
        self
    }

    /// `<FN>(column) BETWEEN ? AND ?` for date-window filters. `group_fn`
    /// wraps the column in a SQL date function, `DATE` by default.
    pub fn date_range(
        &mut self,
        column: &str,
        start: impl Into<Value>,
        end: impl Into<Value>,
        group_fn: Option<&str>,
    ) -> &mut Self {
        let keyword = self.condition("AND");
        let wrapped = match group_fn.unwrap_or("DATE") {
            "" => column.to_string(),
            function => format!("{function}({column})"),
        };
        self.state
            .sql
            .push_str(&format!(" {keyword} {wrapped} BETWEEN ? AND ?"));
        self.set_column_value(column, start.into());
        self.set_column_value(column, end.into());
        self
    }

    fn match_condition(&mut self, keyword: &str, column: &str, value: Value) -> &mut Self {
        self.state
            .sql
            .push_str(&format!(" {keyword} MATCH({column}) AGAINST (? IN BOOLEAN MODE) "));
        self.set_column_value(column, value);
        self
    }

    /// Fulltext `MATCH(column) AGAINST (? IN BOOLEAN MODE)` under the
    /// automatic condition keyword.
    pub fn match_against(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("AND");
        self.match_condition(&keyword, column, value.into())
    }

    /// Fulltext match under `AND`.
    pub fn and_match(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("AND");
        self.match_condition(&keyword, column, value.into())
    }

    /// Fulltext match under `OR`.
    pub fn or_match(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        let keyword = self.condition("OR");
        self.match_condition(&keyword, column, value.into())
    }

    /// ` <kind> JOIN <table> ON <second> <compare> <first> `.
    pub fn join_as(
        &mut self,
        kind: &str,
        table: &str,
        second_field: &str,
        compare: &str,
        first_field: &str,
    ) -> &mut Self {
        self.state.sql.push_str(&format!(
            " {kind} JOIN {table} ON {second_field} {compare} {first_field} "
        ));
        self
    }

    /// INNER JOIN on equality.
    pub fn join(&mut self, table: &str, second_field: &str, first_field: &str) -> &mut Self {
        self.join_as("INNER", table, second_field, "=", first_field)
    }

    /// LEFT JOIN on equality.
    pub fn left_join(&mut self, table: &str, second_field: &str, first_field: &str) -> &mut Self {
        self.join_as("LEFT", table, second_field, "=", first_field)
    }

    /// Append `ORDER BY column direction`.
    ///
    /// The column is sanitized down to letters, digits, `.`, `_` and `-`;
    /// any direction other than `ASC` (case-insensitive) becomes `DESC`.
    pub fn order_by(&mut self, column: &str, direction: &str) -> &mut Self {
        let column = ORDER_COLUMN_SANITIZER.replace_all(column, "");
        let direction = if direction.eq_ignore_ascii_case("ASC") {
            "ASC"
        } else {
            "DESC"
        };
        self.state
            .sql
            .push_str(&format!(" ORDER BY {column} {direction} "));
        self
    }

    /// Append `ORDER BY RAND()`.
    pub fn order_by_rand(&mut self) -> &mut Self {
        self.state.sql.push_str(" ORDER BY RAND() ");
        self
    }

    /// `ORDER BY id ASC LIMIT 1` shorthand.
    pub fn first(&mut self) -> &mut Self {
        self.order_by("id", "ASC").limit(1)
    }

    /// `ORDER BY id DESC LIMIT 1` shorthand.
    pub fn last(&mut self) -> &mut Self {
        self.order_by("id", "DESC").limit(1)
    }

    /// Append `GROUP BY column`, keeping only the leading run of
    /// word/sep characters of the input.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidArgument`] when no usable column name remains.
    pub fn group_by(&mut self, column: &str) -> Result<&mut Self, DbError> {
        let Some(matched) = GROUP_COLUMN.find(column) else {
            return Err(DbError::InvalidArgument(format!(
                "`{column}` is not a valid GROUP BY column"
            )));
        };
        self.state
            .sql
            .push_str(&format!(" GROUP BY {} ", matched.as_str()));
        Ok(self)
    }

    /// Append `LIMIT 0,count`.
    ///
    /// The offset and count bind through the `offset`/`limit` pseudo
    /// columns, which always infer as integers regardless of schema.
    pub fn limit(&mut self, count: u64) -> &mut Self {
        self.limit_offset(0, count)
    }

    /// Append `LIMIT offset,count`.
    pub fn limit_offset(&mut self, offset: u64, count: u64) -> &mut Self {
        self.state.sql.push_str(" LIMIT ?,?");
        self.state.bound_columns.push("offset".to_string());
        self.state.bound_values.push(Value::Int(offset as i64));
        self.state.bound_columns.push("limit".to_string());
        self.state.bound_values.push(Value::Int(count as i64));
        self
    }

    /// Stage a column projection for the next `get`/`get_all` (the
    /// default is `*`). Consumed when the SELECT is composed.
    pub fn project<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Self {
        self.projection = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// Request caching of the next fetch with the given TTL in seconds.
    pub fn cache(&mut self, ttl: u64) -> &mut Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Dynamically assign a value to a schema column, staging it for both
    /// binding and writing.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidColumn`] when the column is not declared by the
    /// entity schema (or this model's bind-type overlay).
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<&mut Self, DbError> {
        if !self.entity.columns.contains(column) && !self.type_overrides.contains_key(column) {
            return Err(DbError::InvalidColumn(column.to_string()));
        }
        Ok(self.set_column_value(column, value))
    }

    /// Stage a binding into both the bound list and the write list, with
    /// no schema validation.
    pub fn set_column_value(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.state.bound_columns.push(column.to_string());
        self.state.write_columns.push(column.to_string());
        self.state.bound_values.push(value.into());
        self
    }

    /// Stage a read-only binding (bound list only).
    pub fn bind_value(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.state.bound_columns.push(column.to_string());
        self.state.bound_values.push(value.into());
        self
    }

    /// Remove the first staged binding (and write marker) for a column.
    pub fn remove_column_value(&mut self, column: &str) -> &mut Self {
        if let Some(pos) = self.state.bound_columns.iter().position(|c| c == column) {
            self.state.bound_columns.remove(pos);
            self.state.bound_values.remove(pos);
        }
        if let Some(pos) = self.state.write_columns.iter().position(|c| c == column) {
            self.state.write_columns.remove(pos);
        }
        self
    }

    /// Override the bind type of a column for this model instance. The
    /// entity's own schema is immutable; this overlay is how a query can
    /// bind columns the schema does not declare (for example a junction
    /// table's key).
    pub fn set_column_type(&mut self, column: &str, column_type: ColumnType) -> &mut Self {
        self.type_overrides.insert(column.to_string(), column_type);
        self
    }

    /// Replace the SQL fragment wholesale. Staged bindings are kept.
    pub fn set_sql(&mut self, sql: &str) -> &mut Self {
        self.state.sql = sql.to_string();
        self
    }

    /// Append raw SQL to the fragment.
    pub fn append_sql(&mut self, sql: &str) -> &mut Self {
        self.state.sql.push(' ');
        self.state.sql.push_str(sql);
        self
    }

    /// Prepend raw SQL to the fragment.
    pub fn prepend_sql(&mut self, sql: &str) -> &mut Self {
        self.state.sql = format!("{sql} {}", self.state.sql);
        self
    }

    /// The SQL fragment currently under construction.
    pub fn get_sql(&self) -> &str {
        &self.state.sql
    }

    /// Snapshot the restorable query state (SQL, bound columns, bound
    /// values).
    pub fn backup_query(&self) -> QueryBackup {
        QueryBackup {
            sql: self.state.sql.clone(),
            bound_columns: self.state.bound_columns.clone(),
            bound_values: self.state.bound_values.clone(),
        }
    }

    /// Restore a snapshot taken with [`backup_query`](Self::backup_query).
    pub fn restore_backup(&mut self, backup: QueryBackup) -> &mut Self {
        self.state.sql = backup.sql;
        self.state.bound_columns = backup.bound_columns;
        self.state.bound_values = backup.bound_values;
        self
    }

    pub(crate) fn take_projection(&mut self) -> String {
        match self.projection.take() {
            Some(columns) if !columns.is_empty() => columns.join(", "),
            _ => "*".to_string(),
        }
    }
}
