//! End-to-end query scenarios over the scripted session driver.

use cobble::mock::{test_config, MockResult, MockSession};
use cobble::{columns, ColumnType, DbError, EntityDef, MemoryStore, Model, Paginator, Row, Value};

fn users_entity() -> EntityDef {
    EntityDef::new(
        "users",
        columns! { "id" => Int, "name" => Str, "status" => Int, "score" => Double },
    )
}

fn model_with(session: &MockSession) -> Model {
    Model::with_session(
        users_entity(),
        test_config(),
        session.clone().into_handle(),
        MemoryStore::new().into_handle(),
    )
}

fn squish(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[test]
fn test_insert_then_find_by_id_round_trip() {
    let session = MockSession::new();
    let mut model = model_with(&session);

    session.queue(MockResult::insert_id(42));
    session.queue(MockResult::rows(vec![Row::from_pairs([
        ("id", Value::Int(42)),
        ("name", Value::Text("Alice".into())),
    ])]));

    model.set("name", "Alice").unwrap();
    let id = model.insert().unwrap();
    assert_eq!(id, 42);
    assert_eq!(model.insert_id(), 42);

    let row = model.find_by_id(id as i64).unwrap().expect("row expected");
    assert_eq!(row.text("name"), Some("Alice"));

    let executed = session.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(
        squish(&executed[0].sql),
        "INSERT INTO users (name) VALUES (?)"
    );
    assert_eq!(executed[0].types, vec![ColumnType::Str]);
    assert_eq!(
        squish(&executed[1].sql),
        "SELECT * FROM users WHERE id= ? ORDER BY id LIMIT 1"
    );
    assert_eq!(executed[1].values, vec![Value::Int(42)]);
}

#[test]
fn test_insert_without_staged_columns_fails() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    assert_eq!(model.insert().unwrap_err(), DbError::MissingWriteColumns);
    assert_eq!(session.statement_count(), 0);
}

#[test]
fn test_where_in_empty_set_matches_no_rows() {
    let session = MockSession::new();
    let mut model = model_with(&session);

    model.where_in("status", Vec::<i64>::new()).unwrap();
    let result = model.get_all().unwrap();
    assert!(result.is_none());

    let executed = session.executed();
    assert_eq!(squish(&executed[0].sql), "SELECT * FROM users WHERE 2=1");
    assert!(executed[0].values.is_empty());
}

#[test]
fn test_where_in_matches_members_in_order() {
    let session = MockSession::new();
    let mut model = model_with(&session);

    session.queue(MockResult::rows(vec![
        Row::from_pairs([("id", 1), ("status", 1)]),
        Row::from_pairs([("id", 2), ("status", 2)]),
    ]));

    model.where_in("status", vec![1, 2]).unwrap();
    model.order_by("id", "ASC");
    let rows = model.get_all().unwrap().expect("rows expected");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].int("id"), Some(1));
    assert_eq!(rows[1].int("id"), Some(2));

    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "SELECT * FROM users WHERE status IN (?,?) ORDER BY id ASC"
    );
    assert_eq!(executed[0].values, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(executed[0].types, vec![ColumnType::Int, ColumnType::Int]);
}

#[test]
fn test_state_resets_after_every_execution() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    let pristine = model.backup_query();

    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 1)])]));
    model.where_("status", 1).limit(5);
    model.get_all().unwrap();

    assert_eq!(model.backup_query(), pristine);
    assert_eq!(model.get_sql(), "");
    assert!(!model.condition_started());

    // The instance is reusable: the next query starts from WHERE again.
    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 2)])]));
    model.where_("status", 2);
    model.get_all().unwrap();
    let executed = session.executed();
    assert!(squish(&executed[1].sql).contains("WHERE status = ?"));
}

#[test]
fn test_state_resets_even_when_binding_fails() {
    let session = MockSession::new();
    let mut model = model_with(&session);

    model.where_("nickname", "x");
    let err = model.get_all().unwrap_err();
    assert_eq!(err, DbError::InvalidColumn("nickname".to_string()));
    assert_eq!(session.statement_count(), 0);

    assert_eq!(model.get_sql(), "");
    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 1)])]));
    assert!(model.where_("status", 1).get_all().unwrap().is_some());
}

#[test]
fn test_update_requires_where_and_write_columns() {
    let session = MockSession::new();
    let mut model = model_with(&session);

    assert_eq!(model.update().unwrap_err(), DbError::MissingWriteColumns);

    model.set("name", "Bob").unwrap();
    assert!(matches!(
        model.update().unwrap_err(),
        DbError::InvalidArgument(_)
    ));
}

#[test]
fn test_update_builds_set_clause_and_reports_affected() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::affected(3));

    model.set("name", "Bob").unwrap();
    model.set("status", 2).unwrap();
    model.where_("score", 1.5);
    let affected = model.update().unwrap();

    assert_eq!(affected, 3);
    assert_eq!(model.affected_rows(), 3);
    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "UPDATE users SET name = ?,status = ? WHERE score = ?"
    );
    assert_eq!(
        executed[0].types,
        vec![ColumnType::Str, ColumnType::Int, ColumnType::Double]
    );
}

#[test]
fn test_insert_on_duplicate_rebinds_staged_columns() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::insert_id(9));

    model.set("name", "Ann").unwrap();
    model.set("status", 1).unwrap();
    let id = model.insert_on_duplicate().unwrap();

    assert_eq!(id, 9);
    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "INSERT INTO users (name,status) VALUES (?,?) ON DUPLICATE KEY UPDATE name = ? , status = ?"
    );
    assert_eq!(
        executed[0].values,
        vec![
            Value::Text("Ann".into()),
            Value::Int(1),
            Value::Text("Ann".into()),
            Value::Int(1)
        ]
    );
}

#[test]
fn test_multi_row_insert_regroups_placeholders() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::insert_id(5));

    model.set("name", "a").unwrap();
    model.set("status", 1).unwrap();
    model.set("name", "b").unwrap();
    model.set("status", 2).unwrap();
    model.insert_multiple(2).unwrap();

    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "INSERT INTO users (name,status) VALUES (?,?), (?,?)"
    );
    assert_eq!(executed[0].values.len(), 4);
}

#[test]
fn test_multi_row_insert_rejects_ragged_staging() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    model.set("name", "a").unwrap();
    assert!(matches!(
        model.insert_multiple(2).unwrap_err(),
        DbError::InvalidArgument(_)
    ));
}

#[test]
fn test_duplicate_with_multi_row_is_unsupported() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    model.set("name", "a").unwrap();
    model.set("status", 1).unwrap();
    let err = model.insert_with(Some(2), true).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
    assert_eq!(session.statement_count(), 0);
}

#[test]
fn test_modify_field_prepends_its_bind() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::affected(1));

    model.where_("id", 7);
    let affected = model.modify_field("score", 0.5, "+").unwrap();

    assert_eq!(affected, 1);
    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "UPDATE users SET score = score + ? WHERE id = ?"
    );
    assert_eq!(executed[0].values, vec![Value::Double(0.5), Value::Int(7)]);
    assert_eq!(executed[0].types, vec![ColumnType::Double, ColumnType::Int]);
}

#[test]
fn test_modify_field_without_filter_touches_whole_table() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::affected(100));

    let affected = model.modify_field("status", 1, "-").unwrap();
    assert_eq!(affected, 100);
    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "UPDATE users SET status = status - ?"
    );
}

#[test]
fn test_delete_defaults_to_own_table() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::affected(2));

    model.where_("status", 0);
    let affected = model.delete(&[]).unwrap();

    assert_eq!(affected, 2);
    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "DELETE users FROM users WHERE status = ?"
    );
}

#[test]
fn test_count_rows_reads_total_field() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("total", 12)])]));

    model.where_("status", 1);
    assert_eq!(model.count_rows().unwrap(), 12);
    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "SELECT COUNT(*) as total FROM users WHERE status = ?"
    );
}

#[test]
fn test_count_rows_counts_groups_under_group_by() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![
        Row::from_pairs([("total", 4)]),
        Row::from_pairs([("total", 8)]),
    ]));

    model.group_by("status").unwrap();
    assert_eq!(model.count_rows().unwrap(), 2);
}

struct TotalSink {
    total: Option<u64>,
}

impl Paginator for TotalSink {
    fn set_total(&mut self, total: u64) {
        self.total = Some(total);
    }
}

#[test]
fn test_paginate_counts_without_order_and_limit_and_restores_state() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("total", 57)])]));

    model.where_("status", 1).order_by("id", "ASC").limit_offset(20, 10);
    let before = model.backup_query();
    let sql_before = model.get_sql().to_string();

    let mut sink = TotalSink { total: None };
    model.paginate(&mut sink, 3600).unwrap();

    assert_eq!(sink.total, Some(57));
    assert_eq!(model.backup_query(), before);
    assert_eq!(model.get_sql(), sql_before);

    let executed = session.executed();
    let count_sql = squish(&executed[0].sql);
    assert_eq!(count_sql, "SELECT COUNT(*) as total FROM users WHERE status = ?");
    assert!(!count_sql.contains("ORDER"));
    assert!(!count_sql.contains("LIMIT"));
    // The offset/limit binds of the truncated tail are dropped with it.
    assert_eq!(executed[0].values, vec![Value::Int(1)]);
}

#[test]
fn test_paginate_restores_state_when_query_had_no_order_or_limit() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("total", 3)])]));

    model.where_("status", 1);
    let before = model.backup_query();

    let mut sink = TotalSink { total: None };
    model.paginate(&mut sink, 60).unwrap();

    assert_eq!(sink.total, Some(3));
    assert_eq!(model.backup_query(), before);
}

#[test]
fn test_pagination_truncation_misfires_on_literal_order_text() {
    // The truncation is a plain substring scan: a raw fragment carrying
    // the literal word ORDER is cut there, filters and all.
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("total", 0)])]));

    model.set_sql("WHERE name = 'ORDER FORMS'");
    let mut sink = TotalSink { total: None };
    model.paginate(&mut sink, 60).unwrap();

    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "SELECT COUNT(*) as total FROM users WHERE name = '"
    );
}

#[test]
fn test_find_by_dynamic_dispatch() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([
        ("id", Value::Int(1)),
        ("name", Value::Text("Ann".into())),
    ])]));

    let row = model
        .call("findByName", &[Value::Text("Ann".into())])
        .unwrap()
        .expect("row expected");
    assert_eq!(row.int("id"), Some(1));

    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "SELECT * FROM users WHERE name= ? ORDER BY id LIMIT 1"
    );
}

#[test]
fn test_unknown_dynamic_method_is_rejected() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    let err = model.call("deleteEverything", &[]).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
    assert_eq!(session.statement_count(), 0);
}

#[test]
fn test_check_if_exists() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("count", 1)])]));
    assert!(model.check_if_exists("name", "Ann").unwrap());

    session.queue(MockResult::rows(vec![Row::from_pairs([("count", 0)])]));
    assert!(!model.check_if_exists("name", "Zed").unwrap());
}

#[test]
fn test_get_min_max() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([
        ("min", 1),
        ("max", 99),
    ])]));

    let row = model.get_min_max("id", None).unwrap().expect("row expected");
    assert_eq!(row.int("min"), Some(1));
    assert_eq!(row.int("max"), Some(99));

    let executed = session.executed();
    assert_eq!(
        squish(&executed[0].sql),
        "SELECT MIN(id) as min, MAX(id) as max FROM users"
    );
}

#[test]
fn test_fetch_columns_projects_field_names() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![
        Row::from_pairs([("Field", "id"), ("Type", "int")]),
        Row::from_pairs([("Field", "name"), ("Type", "varchar(255)")]),
    ]));

    let fields = model.fetch_columns(None).unwrap();
    assert_eq!(
        fields,
        vec![Value::Text("id".into()), Value::Text("name".into())]
    );
    assert_eq!(squish(&session.executed()[0].sql), "DESCRIBE users");
}

#[test]
fn test_projection_applies_to_next_select_only() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 1)])]));
    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 2)])]));

    model.project(&["id", "name"]).where_("status", 1);
    model.get_all().unwrap();
    model.where_("status", 2);
    model.get_all().unwrap();

    let executed = session.executed();
    assert!(squish(&executed[0].sql).starts_with("SELECT id, name FROM users"));
    assert!(squish(&executed[1].sql).starts_with("SELECT * FROM users"));
}

#[test]
fn test_limit_binds_as_integers_regardless_of_schema() {
    let session = MockSession::new();
    let mut model = model_with(&session);
    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 1)])]));

    model.where_("name", "Ann").limit_offset(10, 5);
    model.get_all().unwrap();

    let executed = session.executed();
    assert_eq!(
        executed[0].types,
        vec![ColumnType::Str, ColumnType::Int, ColumnType::Int]
    );
    assert_eq!(
        executed[0].values,
        vec![Value::Text("Ann".into()), Value::Int(10), Value::Int(5)]
    );
}
