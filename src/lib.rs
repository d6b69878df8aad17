//! # Cobble
//!
//! Fluent MySQL query builder and lightweight ORM: a stateful SQL
//! accumulator with condition-keyword tracking, schema-driven bind-type
//! inference, eager relation loading over batched `IN (...)` queries, and
//! a table-scoped result cache.
//!
//! The call model is synchronous and blocking throughout: builder methods
//! mutate per-model state and return immediately; terminal operations
//! block until the backend responds. One live session is held per
//! distinct target database and shared by every model built against it.
//!
//! ```no_run
//! use cobble::{columns, DbConfig, EntityDef, Model};
//!
//! # fn main() -> Result<(), cobble::DbError> {
//! let users = EntityDef::new("users", columns! { "id" => Int, "name" => Str });
//! let config = DbConfig::from_file("config/database")
//!     .map_err(|e| cobble::DbError::Connection(e.to_string()))?;
//!
//! let mut model = Model::connect(users, &config)?;
//! let id = {
//!     model.set("name", "Alice")?;
//!     model.insert()?
//! };
//!
//! if let Some(row) = model.find_by_id(id as i64)? {
//!     println!("hello, {}", row.text("name").unwrap_or("?"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
mod executor;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod model;
pub mod relation;
pub mod row;
pub mod schema;
pub mod value;

pub use builder::{QueryBackup, QueryState};
#[cfg(feature = "redis-cache")]
pub use cache::RedisStore;
pub use cache::{CacheHandle, CacheStore, CachedResult, MemoryStore};
pub use config::{ConfigError, DbConfig};
pub use connection::{DriverStatement, MySqlSession, SessionDriver, SessionHandle};
pub use error::DbError;
pub use model::{EntityDef, Model, Paginator};
pub use relation::{Relation, RelationKind};
pub use row::{Row, RowCollection};
pub use schema::{ColumnSchema, ColumnType};
pub use value::Value;
