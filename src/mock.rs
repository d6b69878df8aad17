//! Scripted session driver for tests.
//!
//! [`MockSession`] implements the session capability over two shared
//! queues: results to hand back, in order, and a log of every executed
//! statement with its SQL, inferred bind types and bound values. Clones
//! share the queues, so a test can keep one clone for scripting and
//! assertions while the model drives another.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::DbConfig;
use crate::connection::{DriverStatement, SessionDriver, SessionHandle};
use crate::error::DbError;
use crate::row::Row;
use crate::schema::ColumnType;
use crate::value::Value;

/// One scripted statement outcome.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    /// Rows the statement "returns".
    pub rows: Vec<Row>,
    /// Affected-row count.
    pub affected: u64,
    /// Generated insert id.
    pub insert_id: u64,
}

impl MockResult {
    /// An empty result set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result set of rows.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// A write outcome with an affected-row count.
    pub fn affected(affected: u64) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }

    /// An insert outcome with a generated id.
    pub fn insert_id(insert_id: u64) -> Self {
        Self {
            insert_id,
            affected: 1,
            ..Self::default()
        }
    }
}

/// A statement the mock executed, as the executor handed it over.
#[derive(Debug, Clone)]
pub struct ExecutedStatement {
    /// Final SQL text.
    pub sql: String,
    /// Inferred bind types, in placeholder order.
    pub types: Vec<ColumnType>,
    /// Bound values, in placeholder order.
    pub values: Vec<Value>,
}

/// Scripted [`SessionDriver`] double.
#[derive(Clone, Default)]
pub struct MockSession {
    results: Rc<RefCell<VecDeque<MockResult>>>,
    executed: Rc<RefCell<Vec<ExecutedStatement>>>,
}

impl MockSession {
    /// Create a session with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome for the next executed statement. Unqueued
    /// statements execute as empty results.
    pub fn queue(&self, result: MockResult) {
        self.results.borrow_mut().push_back(result);
    }

    /// Every statement executed so far, oldest first.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.executed.borrow().clone()
    }

    /// Number of statements executed so far.
    pub fn statement_count(&self) -> usize {
        self.executed.borrow().len()
    }

    /// Wrap (a clone of) this session in a shared handle for
    /// [`Model::with_session`](crate::model::Model::with_session).
    pub fn into_handle(self) -> SessionHandle {
        Rc::new(RefCell::new(self))
    }
}

impl SessionDriver for MockSession {
    fn prepare<'a>(&'a mut self, sql: &str) -> Result<Box<dyn DriverStatement + 'a>, DbError> {
        Ok(Box::new(MockStatement {
            session: self,
            sql: sql.to_string(),
            types: Vec::new(),
            values: Vec::new(),
            outcome: MockResult::empty(),
        }))
    }
}

struct MockStatement<'a> {
    session: &'a mut MockSession,
    sql: String,
    types: Vec<ColumnType>,
    values: Vec<Value>,
    outcome: MockResult,
}

impl DriverStatement for MockStatement<'_> {
    fn bind(&mut self, types: &[ColumnType], values: &[Value]) -> Result<(), DbError> {
        if types.len() != values.len() {
            return Err(DbError::BindMismatch {
                values: values.len(),
                types: types.len(),
            });
        }
        for value in values {
            if !value.is_scalar() {
                return Err(DbError::InvalidArgument(format!(
                    "cannot bind a {} value to a statement placeholder",
                    value.type_name()
                )));
            }
        }
        self.types = types.to_vec();
        self.values = values.to_vec();
        Ok(())
    }

    fn execute(&mut self) -> Result<(), DbError> {
        self.session.executed.borrow_mut().push(ExecutedStatement {
            sql: self.sql.clone(),
            types: self.types.clone(),
            values: self.values.clone(),
        });
        self.outcome = self
            .session
            .results
            .borrow_mut()
            .pop_front()
            .unwrap_or_default();
        Ok(())
    }

    fn rows_affected(&self) -> u64 {
        self.outcome.affected
    }

    fn last_insert_id(&self) -> u64 {
        self.outcome.insert_id
    }

    fn fetch_rows(&mut self) -> Result<Vec<Row>, DbError> {
        Ok(std::mem::take(&mut self.outcome.rows))
    }
}

/// Configuration fixture for tests; never actually connected.
pub fn test_config() -> DbConfig {
    DbConfig {
        host: "localhost".to_string(),
        port: 3306,
        user: "test".to_string(),
        password: String::new(),
        database: "test_db".to_string(),
        charset: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_script_and_log() {
        let session = MockSession::new();
        let clone = session.clone();
        session.queue(MockResult::insert_id(7));

        let mut driver = clone;
        let mut statement = driver.prepare("INSERT INTO t (a) VALUES (?)").unwrap();
        statement
            .bind(&[ColumnType::Int], &[Value::Int(1)])
            .unwrap();
        statement.execute().unwrap();
        assert_eq!(statement.last_insert_id(), 7);
        drop(statement);

        assert_eq!(session.statement_count(), 1);
        assert_eq!(session.executed()[0].values, vec![Value::Int(1)]);
    }

    #[test]
    fn test_unqueued_statements_return_empty() {
        let mut session = MockSession::new();
        let mut statement = session.prepare("SELECT 1").unwrap();
        statement.bind(&[], &[]).unwrap();
        statement.execute().unwrap();
        assert!(statement.fetch_rows().unwrap().is_empty());
        assert_eq!(statement.rows_affected(), 0);
    }
}
