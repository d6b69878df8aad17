//! The database session capability and the MySQL driver behind it.
//!
//! The executor talks to the backend through two narrow traits:
//! [`SessionDriver`] prepares a statement, and [`DriverStatement`] walks
//! it through bind → execute → fetch. [`MySqlSession`] implements them
//! over the blocking `mysql` client.
//!
//! Sessions are shared, lazily established resources scoped per distinct
//! target database: [`acquire`] keeps at most one live session per
//! database name and hands out shared handles to it. The call model is
//! single-threaded and blocking throughout, so the registry is
//! thread-local.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params};

use crate::config::DbConfig;
use crate::error::DbError;
use crate::row::Row;
use crate::schema::ColumnType;
use crate::value::Value;

/// Shared handle to a live session.
pub type SessionHandle = Rc<RefCell<dyn SessionDriver>>;

/// A live database session that can prepare parameterized statements.
pub trait SessionDriver {
    /// Prepare a statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidStatement`] when the backend rejects the
    /// SQL text, with the backend's diagnostic attached.
    fn prepare<'a>(&'a mut self, sql: &str) -> Result<Box<dyn DriverStatement + 'a>, DbError>;
}

/// A prepared statement mid-lifecycle: bind → execute → read results.
pub trait DriverStatement {
    /// Bind values under the given types, one type per value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BindMismatch`] when the counts diverge and
    /// [`DbError::InvalidArgument`] when a non-scalar value is bound.
    fn bind(&mut self, types: &[ColumnType], values: &[Value]) -> Result<(), DbError>;

    /// Execute the statement.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidStatement`] carrying the backend's
    /// diagnostic when execution fails.
    fn execute(&mut self) -> Result<(), DbError>;

    /// Rows affected by the last execution.
    fn rows_affected(&self) -> u64;

    /// Generated identifier of the last insert, `0` when none.
    fn last_insert_id(&self) -> u64;

    /// Materialize the result set of the last execution.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidStatement`] when row retrieval fails.
    fn fetch_rows(&mut self) -> Result<Vec<Row>, DbError>;
}

/// Blocking MySQL session over a [`mysql::Conn`].
pub struct MySqlSession {
    conn: Conn,
}

impl MySqlSession {
    /// Establish a session from explicit configuration.
    ///
    /// This is a blocking call; it returns once the handshake completes.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] on invalid configuration or a
    /// failed handshake.
    pub fn connect(config: &DbConfig) -> Result<Self, DbError> {
        validate_config(config)?;

        let mut builder = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()));

        if let Some(charset) = &config.charset {
            builder = builder.init(vec![format!("SET NAMES {charset}")]);
        }

        let conn = Conn::new(Opts::from(builder))
            .map_err(|e| DbError::Connection(e.to_string()))?;

        log::info!("established session for database `{}`", config.database);
        Ok(Self { conn })
    }
}

fn validate_config(config: &DbConfig) -> Result<(), DbError> {
    if config.host.is_empty() {
        return Err(DbError::Connection("host must not be empty".to_string()));
    }
    if config.user.is_empty() {
        return Err(DbError::Connection("user must not be empty".to_string()));
    }
    if config.database.is_empty() {
        return Err(DbError::Connection("database must not be empty".to_string()));
    }
    Ok(())
}

impl SessionDriver for MySqlSession {
    fn prepare<'a>(&'a mut self, sql: &str) -> Result<Box<dyn DriverStatement + 'a>, DbError> {
        let stmt = self
            .conn
            .prep(sql)
            .map_err(|e| DbError::InvalidStatement(format!("{e} in `{sql}`")))?;

        Ok(Box::new(MySqlStatement {
            conn: &mut self.conn,
            stmt,
            params: Vec::new(),
            affected: 0,
            insert_id: 0,
            rows: Vec::new(),
        }))
    }
}

struct MySqlStatement<'a> {
    conn: &'a mut Conn,
    stmt: mysql::Statement,
    params: Vec<mysql::Value>,
    affected: u64,
    insert_id: u64,
    rows: Vec<Row>,
}

impl DriverStatement for MySqlStatement<'_> {
    fn bind(&mut self, types: &[ColumnType], values: &[Value]) -> Result<(), DbError> {
        if types.len() != values.len() {
            return Err(DbError::BindMismatch {
                values: values.len(),
                types: types.len(),
            });
        }

        self.params = types
            .iter()
            .zip(values)
            .map(|(ty, value)| to_driver_value(*ty, value))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn execute(&mut self) -> Result<(), DbError> {
        let params = if self.params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(std::mem::take(&mut self.params))
        };

        let rows: Vec<mysql::Row> = self
            .conn
            .exec(&self.stmt, params)
            .map_err(|e| DbError::InvalidStatement(e.to_string()))?;

        self.affected = self.conn.affected_rows();
        self.insert_id = self.conn.last_insert_id();
        self.rows = rows.into_iter().map(materialize_row).collect();
        Ok(())
    }

    fn rows_affected(&self) -> u64 {
        self.affected
    }

    fn last_insert_id(&self) -> u64 {
        self.insert_id
    }

    fn fetch_rows(&mut self) -> Result<Vec<Row>, DbError> {
        Ok(std::mem::take(&mut self.rows))
    }
}

/// Coerce a staged value to the driver representation its declared bind
/// type calls for. Text is leniently parsed for numeric types, matching
/// the loose typing of string-heavy callers.
fn to_driver_value(ty: ColumnType, value: &Value) -> Result<mysql::Value, DbError> {
    if !value.is_scalar() {
        return Err(DbError::InvalidArgument(format!(
            "cannot bind a {} value to a statement placeholder",
            value.type_name()
        )));
    }

    if matches!(value, Value::Null) {
        return Ok(mysql::Value::NULL);
    }

    let driver_value = match ty {
        ColumnType::Int => mysql::Value::Int(value.as_int().unwrap_or(0)),
        ColumnType::Double => mysql::Value::Double(value.as_double().unwrap_or(0.0)),
        ColumnType::Str | ColumnType::Blob => match value {
            Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
            Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
            Value::Int(i) => mysql::Value::Bytes(i.to_string().into_bytes()),
            Value::Double(d) => mysql::Value::Bytes(d.to_string().into_bytes()),
            _ => unreachable!("scalar check above"),
        },
    };
    Ok(driver_value)
}

fn from_driver_value(value: mysql::Value) -> Value {
    match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Int(i) => Value::Int(i),
        mysql::Value::UInt(u) => Value::Int(u as i64),
        mysql::Value::Float(f) => Value::Double(f64::from(f)),
        mysql::Value::Double(d) => Value::Double(d),
        mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        mysql::Value::Date(y, mo, d, h, mi, s, _us) => {
            Value::Text(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
        }
        mysql::Value::Time(neg, days, h, mi, s, _us) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(h) + days * 24;
            Value::Text(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
        }
    }
}

fn materialize_row(row: mysql::Row) -> Row {
    let names: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|column| column.name_str().into_owned())
        .collect();

    let mut out = Row::new();
    for (name, value) in names.into_iter().zip(row.unwrap()) {
        out.set(&name, from_driver_value(value));
    }
    out
}

thread_local! {
    static SESSIONS: RefCell<HashMap<String, SessionHandle>> =
        RefCell::new(HashMap::new());
}

/// Acquire the session for a database, establishing it on first use.
///
/// Repeat requests for the same database name return the same live
/// session; at most one session per distinct database is held.
///
/// # Errors
///
/// Returns [`DbError::Connection`] when a new session cannot be
/// established.
pub fn acquire(config: &DbConfig) -> Result<SessionHandle, DbError> {
    SESSIONS.with(|sessions| {
        if let Some(handle) = sessions.borrow().get(&config.database) {
            return Ok(Rc::clone(handle));
        }

        let session = MySqlSession::connect(config)?;
        let handle: SessionHandle = Rc::new(RefCell::new(session));
        sessions
            .borrow_mut()
            .insert(config.database.clone(), Rc::clone(&handle));
        Ok(handle)
    })
}

/// Drop the registered session for one database, closing it once the
/// last model handle releases it.
pub fn disconnect(config: &DbConfig) {
    SESSIONS.with(|sessions| {
        sessions.borrow_mut().remove(&config.database);
    });
}

/// Drop every registered session.
pub fn terminate() {
    SESSIONS.with(|sessions| sessions.borrow_mut().clear());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DbConfig {
        DbConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: "app".to_string(),
            password: String::new(),
            database: "app_db".to_string(),
            charset: None,
        }
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut c = config();
        c.host = String::new();
        assert!(validate_config(&c).is_err());

        let mut c = config();
        c.database = String::new();
        assert!(validate_config(&c).is_err());

        assert!(validate_config(&config()).is_ok());
    }

    #[test]
    fn test_int_coercion() {
        let v = to_driver_value(ColumnType::Int, &Value::Text("41".into())).unwrap();
        assert_eq!(v, mysql::Value::Int(41));
        let v = to_driver_value(ColumnType::Int, &Value::Int(7)).unwrap();
        assert_eq!(v, mysql::Value::Int(7));
    }

    #[test]
    fn test_null_binds_as_null_regardless_of_type() {
        for ty in [ColumnType::Int, ColumnType::Str, ColumnType::Double, ColumnType::Blob] {
            assert_eq!(to_driver_value(ty, &Value::Null).unwrap(), mysql::Value::NULL);
        }
    }

    #[test]
    fn test_non_scalar_bind_is_rejected() {
        let list = Value::List(vec![Value::Int(1)]);
        assert!(matches!(
            to_driver_value(ColumnType::Int, &list),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_text_round_trip_through_driver_value() {
        let v = from_driver_value(mysql::Value::Bytes(b"hello".to_vec()));
        assert_eq!(v, Value::Text("hello".to_string()));
    }

    #[test]
    fn test_date_renders_as_text() {
        let v = from_driver_value(mysql::Value::Date(2024, 2, 29, 12, 0, 5, 0));
        assert_eq!(v, Value::Text("2024-02-29 12:00:05".to_string()));
    }
}
