//! Result-cache behavior over the scripted session driver.

use std::cell::RefCell;
use std::rc::Rc;

use cobble::mock::{test_config, MockResult, MockSession};
use cobble::{
    columns, CacheHandle, CacheStore, EntityDef, MemoryStore, Model, Row, Value,
};

fn users_entity() -> EntityDef {
    EntityDef::new("users", columns! { "id" => Int, "name" => Str, "status" => Int })
}

fn model_with(session: &MockSession, store: CacheHandle) -> Model {
    Model::with_session(
        users_entity(),
        test_config(),
        session.clone().into_handle(),
        store,
    )
}

fn ann() -> Row {
    Row::from_pairs([("id", Value::Int(1)), ("name", Value::Text("Ann".into()))])
}

#[test]
fn test_cached_fetch_skips_execution_on_repeat() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));

    model.where_("status", 1).cache(60);
    let first = model.get_all().unwrap().expect("rows expected");
    assert!(!model.served_from_cache());
    assert_eq!(session.statement_count(), 1);

    // Identical query again: served from cache, no second statement.
    model.where_("status", 1).cache(60);
    let second = model.get_all().unwrap().expect("rows expected");
    assert!(model.served_from_cache());
    assert_eq!(session.statement_count(), 1);
    assert_eq!(first, second);
}

#[test]
fn test_different_bindings_miss_the_cache() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    session.queue(MockResult::rows(vec![Row::from_pairs([("id", 2)])]));

    model.where_("status", 1).cache(60);
    model.get_all().unwrap();
    model.where_("status", 2).cache(60);
    model.get_all().unwrap();

    assert_eq!(session.statement_count(), 2);
}

#[test]
fn test_uncached_fetch_never_populates_the_store() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1);
    model.get_all().unwrap();

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(60);
    model.get_all().unwrap();
    // The earlier uncached run left nothing behind: this one executed.
    assert_eq!(session.statement_count(), 2);
}

#[test]
fn test_writes_flush_the_table_scope() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(3600);
    model.get_all().unwrap();
    assert_eq!(session.statement_count(), 1);

    session.queue(MockResult::insert_id(7));
    model.set("name", "Ben").unwrap();
    model.insert().unwrap();

    // The write invalidated the whole table scope: the repeat executes.
    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(3600);
    model.get_all().unwrap();
    assert!(!model.served_from_cache());
    assert_eq!(session.statement_count(), 3);
}

#[test]
fn test_modify_field_also_flushes() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(3600);
    model.get_all().unwrap();

    session.queue(MockResult::affected(1));
    model.where_("id", 1);
    model.modify_field("status", 1, "+").unwrap();

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(3600);
    model.get_all().unwrap();
    assert!(!model.served_from_cache());
}

#[test]
fn test_single_row_fetch_caches_too() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("id", 1).cache(60);
    let row = model.get().unwrap().expect("row expected");
    assert_eq!(row.text("name"), Some("Ann"));

    model.where_("id", 1).cache(60);
    let cached = model.get().unwrap().expect("row expected");
    assert!(model.served_from_cache());
    assert_eq!(session.statement_count(), 1);
    assert_eq!(row, cached);
}

#[test]
fn test_cache_hit_still_clears_relations() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(60);
    model.get_all().unwrap();

    let books = EntityDef::new("books", columns! { "id" => Int, "author_id" => Int });
    model.has_many(&books, "author_id");
    model.where_("status", 1).cache(60);
    model.get_all().unwrap();

    assert!(model.served_from_cache());
    assert!(model.relations().is_empty());
    assert_eq!(session.statement_count(), 1);
}

/// A store that fails every operation, to prove failures degrade to
/// cache misses instead of aborting the query.
struct BrokenStore;

impl CacheStore for BrokenStore {
    fn get(&mut self, _key: &str, _ttl: u64) -> Option<Vec<u8>> {
        None
    }

    fn set(&mut self, _key: &str, _value: &[u8], _ttl: u64) -> bool {
        false
    }

    fn flush(&mut self, _scope: &str) -> bool {
        false
    }
}

#[test]
fn test_broken_store_degrades_to_live_execution() {
    let session = MockSession::new();
    let store: CacheHandle = Rc::new(RefCell::new(BrokenStore));
    let mut model = model_with(&session, store);

    session.queue(MockResult::rows(vec![ann()]));
    session.queue(MockResult::rows(vec![ann()]));

    model.where_("status", 1).cache(60);
    assert!(model.get_all().unwrap().is_some());
    model.where_("status", 1).cache(60);
    assert!(model.get_all().unwrap().is_some());

    assert_eq!(session.statement_count(), 2);
    assert!(!model.served_from_cache());
}

#[test]
fn test_ttl_expiry_is_a_miss() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(0);
    model.get_all().unwrap();

    // TTL 0 means the entry is already stale at read time.
    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(0);
    model.get_all().unwrap();
    assert_eq!(session.statement_count(), 2);
}

#[test]
fn test_cache_request_is_single_shot() {
    let session = MockSession::new();
    let store = MemoryStore::new().into_handle();
    let mut model = model_with(&session, Rc::clone(&store));

    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1).cache(60);
    model.get_all().unwrap();

    // No cache() on this one: it must execute even though the previous
    // fetch was cached, and must not consult the store.
    session.queue(MockResult::rows(vec![ann()]));
    model.where_("status", 1);
    model.get_all().unwrap();
    assert_eq!(session.statement_count(), 2);
    assert!(!model.served_from_cache());
}
