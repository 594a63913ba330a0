//! Session behavior over the key-value backend: write queueing, flush
//! ordering, caching, dirty checking and failure handling.

use mapstore_core::{
    with_session, Datastore, DatastoreError, Interception, NativeEntryStore, OperationKind,
    SessionConfig, SimpleDatastore, WriteInterceptor,
};
use mapstore_kv::{KeyStrategy, KvStore};
use mapstore_model::{
    EntityBuilder, EntityHandle, EntityRef, IdGenerator, Identity, IdentityKind, MappingContext,
    ModelResult, PersistentEntity, PersistentProperty, Value,
};
use mapstore_testkit::{
    mapping_context, new_account, new_address, new_person, new_ticket, Account, Address, Person,
    Ticket,
};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn datastore() -> (Arc<KvStore>, SimpleDatastore) {
    let store = Arc::new(KvStore::new());
    let ds = SimpleDatastore::new(mapping_context(), Arc::clone(&store) as _);
    (store, ds)
}

#[test]
fn persist_defers_until_flush() {
    let (store, ds) = datastore();
    let mut session = ds.connect();

    let person = new_person("Ada", 36);
    let key = session.persist(&person).unwrap();
    assert_eq!(session.pending_count(OperationKind::Insert, "Person"), 1);
    assert_eq!(store.entry_count("people"), 0);

    session.flush().unwrap();
    assert_eq!(session.pending_total(), 0);
    assert_eq!(store.entry_count("people"), 1);
    person.with_typed::<Person, _>(|p| assert_eq!(p.id, Some(key.clone()))).unwrap();
}

#[test]
fn roundtrip_with_embedded_address() {
    let (_, ds) = datastore();
    let context = ds.mapping_context();
    let mut session = ds.connect();

    let person = new_person("Ada", 36);
    person.with_typed_mut::<Person, _>(|p| p.tags = vec!["pioneer".into()]).unwrap();
    context
        .access(&person)
        .unwrap()
        .set_raw(
            "address",
            Value::Entity(EntityRef::Loaded(new_address("London", "1 St James Sq"))),
        )
        .unwrap();
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();

    // Fresh session, so the instance comes back from the store.
    let mut fresh = ds.connect();
    let loaded = fresh.retrieve("Person", &key).unwrap().unwrap();
    assert!(!loaded.same_instance(&person));
    loaded
        .with_typed::<Person, _>(|p| {
            assert_eq!(p.name, "Ada");
            assert_eq!(p.age, 36);
            assert_eq!(p.tags, vec!["pioneer".to_string()]);
            let Value::Entity(EntityRef::Loaded(address)) = &p.address else {
                panic!("embedded address missing: {:?}", p.address);
            };
            address
                .with_typed::<Address, _>(|a| {
                    assert_eq!(a.city, "London");
                    assert_eq!(a.street, "1 St James Sq");
                })
                .unwrap();
        })
        .unwrap();
}

#[test]
fn identity_map_returns_the_same_instance() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let key = session.persist(&new_person("Ada", 36)).unwrap();
    session.flush().unwrap();

    let mut fresh = ds.connect();
    let first = fresh.retrieve("Person", &key).unwrap().unwrap();
    let second = fresh.retrieve("Person", &key).unwrap().unwrap();
    assert!(first.same_instance(&second));
    assert!(fresh.contains(&first));
    assert!(fresh.is_cached("Person", &key));
}

#[test]
fn keys_are_normalized_to_the_entity_kind() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let key = session.persist(&new_person("Ada", 36)).unwrap();
    session.flush().unwrap();

    let cached = session.retrieve("Person", &key).unwrap().unwrap();
    let by_text = session
        .retrieve("Person", &Identity::Text(key.to_string()))
        .unwrap()
        .unwrap();
    assert!(cached.same_instance(&by_text));
}

#[test]
fn indexed_property_finds_entries() {
    let (store, ds) = datastore();
    let context = ds.mapping_context();
    let entity = context.entity("Person").unwrap();
    let mut session = ds.connect();

    let key = session.persist(&new_person("Ada", 36)).unwrap();
    session.persist(&new_person("Grace", 45)).unwrap();
    session.flush().unwrap();

    let hits = store.find_by_indexed(&entity, "name", &Value::Text("Ada".into()));
    assert_eq!(hits, vec![key]);
}

#[test]
fn update_moves_the_property_index() {
    let (store, ds) = datastore();
    let context = ds.mapping_context();
    let entity = context.entity("Person").unwrap();
    let mut session = ds.connect();

    let person = new_person("Ada", 36);
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();

    person.with_typed_mut::<Person, _>(|p| p.name = "Grace".into()).unwrap();
    session.persist(&person).unwrap();
    session.flush().unwrap();

    assert!(store
        .find_by_indexed(&entity, "name", &Value::Text("Ada".into()))
        .is_empty());
    assert_eq!(
        store.find_by_indexed(&entity, "name", &Value::Text("Grace".into())),
        vec![key]
    );
}

#[test]
fn unchanged_instances_queue_nothing() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let person = new_person("Ada", 36);
    session.persist(&person).unwrap();
    session.flush().unwrap();

    assert!(!session.is_dirty(&person).unwrap());
    session.persist(&person).unwrap();
    assert_eq!(session.pending_total(), 0);

    person.with_typed_mut::<Person, _>(|p| p.age = 37).unwrap();
    assert!(session.is_dirty(&person).unwrap());
    session.persist(&person).unwrap();
    assert_eq!(session.pending_count(OperationKind::Update, "Person"), 1);
}

#[test]
fn refresh_discards_in_memory_changes() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let person = new_person("Ada", 36);
    session.persist(&person).unwrap();
    session.flush().unwrap();

    person.with_typed_mut::<Person, _>(|p| p.age = 99).unwrap();
    session.refresh(&person).unwrap();
    person.with_typed::<Person, _>(|p| assert_eq!(p.age, 36)).unwrap();
    assert!(!session.is_dirty(&person).unwrap());
}

#[test]
fn delete_removes_entry_cache_and_index() {
    let (store, ds) = datastore();
    let context = ds.mapping_context();
    let entity = context.entity("Person").unwrap();
    let mut session = ds.connect();

    let person = new_person("Ada", 36);
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();

    session.delete(&person).unwrap();
    assert_eq!(session.pending_count(OperationKind::Delete, "Person"), 1);
    session.flush().unwrap();

    assert_eq!(store.entry_count("people"), 0);
    assert!(!session.is_cached("Person", &key));
    assert!(store
        .find_by_indexed(&entity, "name", &Value::Text("Ada".into()))
        .is_empty());
    assert!(session.retrieve("Person", &key).unwrap().is_none());
}

#[test]
fn queue_capacity_is_enforced_per_entity() {
    let (store, ds) = datastore();
    let ds = ds.with_config(SessionConfig::new().with_queue_capacity(2));
    let mut session = ds.connect();

    session.persist(&new_person("A", 1)).unwrap();
    session.persist(&new_person("B", 2)).unwrap();
    let err = session.persist(&new_person("C", 3)).unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::CapacityExceeded { capacity: 2, .. }
    ));

    // A rejected request does not poison the work already queued.
    assert!(!session.has_error());
    session.flush().unwrap();
    assert_eq!(store.entry_count("people"), 2);
}

struct VetoAll;

impl WriteInterceptor for VetoAll {
    fn before_write(
        &self,
        _kind: OperationKind,
        _entity: &PersistentEntity,
        _handle: Option<&EntityHandle>,
    ) -> Interception {
        Interception::Veto
    }
}

#[test]
fn vetoed_writes_are_skipped_without_error() {
    let (store, ds) = datastore();
    let mut session = ds.connect();
    session.add_interceptor(Arc::new(VetoAll));

    session.persist(&new_person("Ada", 36)).unwrap();
    session.flush().unwrap();
    assert_eq!(store.entry_count("people"), 0);
}

struct VetoNextUpdate {
    armed: AtomicBool,
}

impl WriteInterceptor for VetoNextUpdate {
    fn before_write(
        &self,
        kind: OperationKind,
        _entity: &PersistentEntity,
        _handle: Option<&EntityHandle>,
    ) -> Interception {
        if matches!(kind, OperationKind::Update) && self.armed.swap(false, Ordering::SeqCst) {
            Interception::Veto
        } else {
            Interception::Proceed
        }
    }
}

#[test]
fn vetoed_update_does_not_advance_the_version() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let account = new_account("ada", 100);
    let key = session.persist(&account).unwrap();
    session.flush().unwrap();

    session.add_interceptor(Arc::new(VetoNextUpdate {
        armed: AtomicBool::new(true),
    }));
    account.with_typed_mut::<Account, _>(|a| a.balance = 10).unwrap();
    session.persist(&account).unwrap();
    session.flush().unwrap();
    // The skipped write leaves the instance at the stored version.
    account.with_typed::<Account, _>(|a| assert_eq!(a.version, 0)).unwrap();

    // So the next legitimate update goes through cleanly.
    account.with_typed_mut::<Account, _>(|a| a.balance = 25).unwrap();
    session.persist(&account).unwrap();
    session.flush().unwrap();
    account.with_typed::<Account, _>(|a| assert_eq!(a.version, 1)).unwrap();

    let mut fresh = ds.connect();
    let loaded = fresh.retrieve("Account", &key).unwrap().unwrap();
    loaded
        .with_typed::<Account, _>(|a| {
            assert_eq!(a.balance, 25);
            assert_eq!(a.version, 1);
        })
        .unwrap();
}

struct Recorder {
    log: Mutex<Vec<String>>,
}

impl WriteInterceptor for Recorder {
    fn before_write(
        &self,
        kind: OperationKind,
        entity: &PersistentEntity,
        _handle: Option<&EntityHandle>,
    ) -> Interception {
        self.log
            .lock()
            .push(format!("{}:{}", kind.label(), entity.name()));
        Interception::Proceed
    }
}

#[test]
fn flush_runs_inserts_then_updates_then_deletes() {
    let (_, ds) = datastore();
    let mut seed = ds.connect();
    let stale = seed.persist(&new_person("Stale", 1)).unwrap();
    let doomed = seed.persist(&new_person("Doomed", 2)).unwrap();
    seed.flush().unwrap();

    let mut session = ds.connect();
    let recorder = Arc::new(Recorder {
        log: Mutex::new(Vec::new()),
    });
    session.add_interceptor(Arc::clone(&recorder) as _);

    // Request in delete, insert, update order; execution reorders by kind.
    let victim = session.retrieve("Person", &doomed).unwrap().unwrap();
    session.delete(&victim).unwrap();
    session.persist(&new_person("Fresh", 3)).unwrap();
    let loaded = session.retrieve("Person", &stale).unwrap().unwrap();
    loaded.with_typed_mut::<Person, _>(|p| p.age = 10).unwrap();
    session.persist(&loaded).unwrap();
    session.flush().unwrap();

    assert_eq!(
        *recorder.log.lock(),
        vec![
            "insert:Person".to_string(),
            "update:Person".to_string(),
            "delete:Person".to_string(),
        ]
    );
}

#[test]
fn flush_failure_latches_the_session() {
    let (store, ds) = datastore();
    let context = ds.mapping_context();
    let entity = context.entity("Person").unwrap();
    let mut session = ds.connect();

    let person = new_person("Ada", 36);
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();

    // Pull the entry out from under the session so the update fails.
    store.delete_entries(&entity, std::slice::from_ref(&key)).unwrap();
    person.with_typed_mut::<Person, _>(|p| p.age = 37).unwrap();
    session.persist(&person).unwrap();
    let err = session.flush().unwrap_err();
    assert!(matches!(err, DatastoreError::Backend { .. }));
    assert!(session.has_error());

    let err = session.persist(&person).unwrap_err();
    assert!(matches!(err, DatastoreError::SessionUnusable));
    let err = session.retrieve("Person", &key).unwrap_err();
    assert!(matches!(err, DatastoreError::SessionUnusable));

    session.clear();
    assert!(!session.has_error());
    session.persist(&person).unwrap();
    session.flush().unwrap();
    assert_eq!(store.entry_count("people"), 1);
}

#[test]
fn store_assigned_keys_insert_immediately() {
    let store = Arc::new(KvStore::new().with_key_strategy(KeyStrategy::Sequence));
    let ds = SimpleDatastore::new(mapping_context(), Arc::clone(&store) as _);
    let mut session = ds.connect();

    let ticket = new_ticket("T-1");
    let key = session.persist(&ticket).unwrap();
    assert_eq!(key, Identity::Int(1));
    assert_eq!(session.pending_total(), 0);
    assert_eq!(store.entry_count("tickets"), 1);
    ticket.with_typed::<Ticket, _>(|t| assert_eq!(t.id, Some(Identity::Int(1)))).unwrap();

    let cached = session.retrieve("Ticket", &key).unwrap().unwrap();
    assert!(cached.same_instance(&ticket));
}

#[test]
fn immediate_insert_can_be_vetoed() {
    let store = Arc::new(KvStore::new().with_key_strategy(KeyStrategy::Sequence));
    let ds = SimpleDatastore::new(mapping_context(), Arc::clone(&store) as _);
    let mut session = ds.connect();
    session.add_interceptor(Arc::new(VetoAll));

    let err = session.persist(&new_ticket("T-1")).unwrap_err();
    assert!(matches!(err, DatastoreError::OperationVetoed { .. }));
    assert_eq!(store.entry_count("tickets"), 0);
}

#[test]
fn stateless_sessions_do_not_cache() {
    let (_, ds) = datastore();
    let ds = ds.with_config(SessionConfig::new().with_stateless(true));
    let mut session = ds.connect();
    assert!(session.is_stateless());

    let person = new_person("Ada", 36);
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();
    assert!(!session.contains(&person));

    let first = session.retrieve("Person", &key).unwrap().unwrap();
    let second = session.retrieve("Person", &key).unwrap().unwrap();
    assert!(!first.same_instance(&second));
}

#[test]
fn optimistic_lock_conflict_on_stale_update() {
    let (_, ds) = datastore();
    let mut writer = ds.connect();
    let account = new_account("ada", 100);
    let key = writer.persist(&account).unwrap();
    writer.flush().unwrap();
    account.with_typed::<Account, _>(|a| assert_eq!(a.version, 0)).unwrap();

    // A second session bumps the stored version.
    let mut other = ds.connect();
    let fresh = other.retrieve("Account", &key).unwrap().unwrap();
    fresh.with_typed_mut::<Account, _>(|a| a.balance = 50).unwrap();
    other.persist(&fresh).unwrap();
    other.flush().unwrap();
    fresh.with_typed::<Account, _>(|a| assert_eq!(a.version, 1)).unwrap();

    account.with_typed_mut::<Account, _>(|a| a.balance = 75).unwrap();
    writer.persist(&account).unwrap();
    let err = writer.flush().unwrap_err();
    assert!(matches!(err, DatastoreError::OptimisticLockConflict { .. }));
}

#[test]
fn pessimistic_lock_blocks_and_times_out() {
    let (store, ds) = datastore();
    let mut session = ds.connect();
    let account = new_account("ada", 100);
    let key = session.persist(&account).unwrap();
    session.flush().unwrap();

    session.lock(&account).unwrap();
    assert!(store.locks().is_locked("accounts", &key));

    let err = session
        .lock_with_timeout(&account, Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, DatastoreError::CannotAcquireLock { .. }));

    session.unlock(&account).unwrap();
    assert!(!store.locks().is_locked("accounts", &key));
    session.lock_with_timeout(&account, Duration::from_millis(20)).unwrap();
}

#[test]
fn transactions_commit_and_roll_back() {
    let (store, ds) = datastore();
    let mut session = ds.connect();

    let err = session.commit_transaction().unwrap_err();
    assert!(matches!(err, DatastoreError::NoTransaction));

    let tx = session.begin_transaction();
    session.persist(&new_person("Ada", 36)).unwrap();
    session.rollback_transaction().unwrap();
    assert!(!tx.is_active());
    assert_eq!(session.pending_total(), 0);
    session.flush().unwrap();
    assert_eq!(store.entry_count("people"), 0);

    session.begin_transaction();
    session.persist(&new_person("Grace", 45)).unwrap();
    session.commit_transaction().unwrap();
    assert_eq!(store.entry_count("people"), 1);
}

#[test]
fn persist_value_rejects_null_and_scalars() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    assert!(matches!(
        session.persist_value(&Value::Null),
        Err(DatastoreError::CannotPersistNull)
    ));
    assert!(matches!(
        session.persist_value(&Value::Int(3)),
        Err(DatastoreError::NotPersistentType { .. })
    ));
}

#[test]
fn attach_requires_an_identifier() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let err = session.attach(&new_person("Ada", 36)).unwrap_err();
    assert!(matches!(err, DatastoreError::DataIntegrityViolation { .. }));

    let person = new_person("Grace", 45);
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();

    let mut detached = ds.connect();
    detached.attach(&person).unwrap();
    assert!(detached.contains(&person));
    let cached = detached.retrieve("Person", &key).unwrap().unwrap();
    assert!(cached.same_instance(&person));
}

#[test]
fn session_attributes_are_instance_scoped() {
    let (_, ds) = datastore();
    let mut session = ds.connect();
    let a = new_person("A", 1);
    let b = new_person("B", 2);
    session.set_attribute(&a, "touched", Value::Bool(true));
    assert_eq!(session.get_attribute(&a, "touched"), Some(&Value::Bool(true)));
    assert_eq!(session.get_attribute(&b, "touched"), None);

    session.clear_instance(&a);
    assert_eq!(session.get_attribute(&a, "touched"), None);
}

#[test]
fn with_session_flushes_on_success() {
    let (store, ds) = datastore();
    with_session(&ds, |session| session.persist(&new_person("Ada", 36))).unwrap();
    assert_eq!(store.entry_count("people"), 1);
    assert!(matches!(
        mapstore_core::current_session(),
        Err(DatastoreError::ConnectionNotFound)
    ));
}

// A minimal mapped type whose required property can actually hold null.
#[derive(Default)]
struct Note {
    id: Option<Identity>,
    body: Value,
}

fn note_context() -> Arc<MappingContext> {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Note::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let note = instance.downcast_ref::<Note>()?;
        match property {
            "id" => Some(note.id.clone().map_or(Value::Null, Value::Id)),
            "body" => Some(note.body.clone()),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let note = instance
            .downcast_mut::<Note>()
            .ok_or_else(|| mapstore_model::ModelError::type_mismatch("Note", property, "wrong instance"))?;
        match (property, value) {
            ("id", Value::Id(id)) => note.id = Some(id),
            ("id", Value::Null) => note.id = None,
            ("body", value) => note.body = value,
            (name, _) => {
                return Err(mapstore_model::ModelError::property_not_found("Note", name))
            }
        }
        Ok(())
    }
    let context = MappingContext::new();
    context.register(
        EntityBuilder::new("Note")
            .family("notes")
            .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
            .property(PersistentProperty::simple("body").required())
            .build(),
        mapstore_model::Accessors { construct, get, set },
    );
    Arc::new(context)
}

#[test]
fn required_property_rejects_null() {
    let store = Arc::new(KvStore::new());
    let ds = SimpleDatastore::new(note_context(), store as _);
    let mut session = ds.connect();

    let note = EntityHandle::new("Note", Box::new(Note::default()));
    let err = session.persist(&note).unwrap_err();
    assert!(matches!(err, DatastoreError::DataIntegrityViolation { .. }));

    let filled = EntityHandle::new(
        "Note",
        Box::new(Note {
            id: None,
            body: Value::Text("remember".into()),
        }),
    );
    session.persist(&filled).unwrap();
    session.flush().unwrap();
}
