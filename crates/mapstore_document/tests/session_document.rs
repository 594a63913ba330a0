//! Session behavior over the document backend: native batch inserts, field
//! matching without engine-side indices, nested embedded documents and
//! sequence-assigned integer keys.

use mapstore_core::{
    Datastore, DatastoreError, Interception, OperationKind, SimpleDatastore, WriteInterceptor,
};
use mapstore_document::DocumentStore;
use mapstore_model::{EntityHandle, EntityRef, Identity, PersistentEntity, Value};
use mapstore_testkit::{
    mapping_context, new_account, new_address, new_customer, new_order, new_person, new_ticket,
    Account, Address, Customer, Order, Person, Ticket,
};
use std::sync::Arc;

fn datastore() -> (Arc<DocumentStore>, SimpleDatastore) {
    let store = Arc::new(DocumentStore::new());
    let ds = SimpleDatastore::new(mapping_context(), Arc::clone(&store) as _);
    (store, ds)
}

#[test]
fn inserts_land_as_one_batch_per_collection() {
    let (store, ds) = datastore();
    let mut session = ds.connect();

    for (name, age) in [("Ada", 36), ("Grace", 45), ("Edsger", 72)] {
        session.persist(&new_person(name, age)).unwrap();
    }
    assert_eq!(store.document_count("people"), 0);
    session.flush().unwrap();
    assert_eq!(store.document_count("people"), 3);
}

#[test]
fn fields_match_natively_without_engine_indices() {
    let (store, ds) = datastore();
    let context = ds.mapping_context();
    let entity = context.entity("Person").unwrap();
    let mut session = ds.connect();

    let key = session.persist(&new_person("Ada", 36)).unwrap();
    session.persist(&new_person("Grace", 45)).unwrap();
    session.flush().unwrap();

    let hits = store
        .find_by_field(&entity, "name", &Value::Text("Ada".into()))
        .unwrap();
    assert_eq!(hits, vec![key]);
    let misses = store
        .find_by_field(&entity, "name", &Value::Text("Alan".into()))
        .unwrap();
    assert!(misses.is_empty());
}

#[test]
fn embedded_instances_roundtrip_as_nested_documents() {
    let (_, ds) = datastore();
    let context = ds.mapping_context();
    let mut session = ds.connect();

    let person = new_person("Ada", 36);
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

    let mut fresh = ds.connect();
    let loaded = fresh.retrieve("Person", &key).unwrap().unwrap();
    loaded
        .with_typed::<Person, _>(|p| {
            let Value::Entity(EntityRef::Loaded(address)) = &p.address else {
                panic!("embedded address missing: {:?}", p.address);
            };
            address
                .with_typed::<Address, _>(|a| assert_eq!(a.city, "London"))
                .unwrap();
        })
        .unwrap();
}

#[test]
fn integer_keys_come_from_the_collection_sequence() {
    let (store, ds) = datastore();
    let mut session = ds.connect();

    let first = new_ticket("T-1");
    let second = new_ticket("T-2");
    assert_eq!(session.persist(&first).unwrap(), Identity::Int(1));
    assert_eq!(session.persist(&second).unwrap(), Identity::Int(2));
    // Both writes happened immediately; nothing waits for flush.
    assert_eq!(session.pending_total(), 0);
    assert_eq!(store.document_count("tickets"), 2);
    first.with_typed::<Ticket, _>(|t| assert_eq!(t.id, Some(Identity::Int(1)))).unwrap();

    let mut fresh = ds.connect();
    let loaded = fresh.retrieve("Ticket", &Identity::Int(2)).unwrap().unwrap();
    loaded.with_typed::<Ticket, _>(|t| assert_eq!(t.code, "T-2")).unwrap();
    // A textual key normalizes to the entity's integer kind.
    let by_text = fresh.retrieve("Ticket", &Identity::Text("2".into())).unwrap().unwrap();
    assert!(by_text.same_instance(&loaded));
}

struct VetoInserts;

impl WriteInterceptor for VetoInserts {
    fn before_write(
        &self,
        kind: OperationKind,
        _entity: &PersistentEntity,
        _handle: Option<&EntityHandle>,
    ) -> Interception {
        match kind {
            OperationKind::Insert => Interception::Veto,
            _ => Interception::Proceed,
        }
    }
}

#[test]
fn vetoed_inserts_are_dropped_from_the_batch() {
    let (store, ds) = datastore();
    let mut session = ds.connect();
    session.add_interceptor(Arc::new(VetoInserts));

    session.persist(&new_person("Ada", 36)).unwrap();
    session.persist(&new_person("Grace", 45)).unwrap();
    session.flush().unwrap();
    assert_eq!(store.document_count("people"), 0);
}

#[test]
fn associations_resolve_through_the_side_index() {
    let (_, ds) = datastore();
    let context = ds.mapping_context();
    let mut session = ds.connect();

    let customer = new_customer("ACME");
    let order = new_order(7);
    context
        .access(&order)
        .unwrap()
        .set_raw("customer", Value::Entity(EntityRef::Loaded(customer.clone())))
        .unwrap();
    let order_key = session.persist(&order).unwrap();
    session.flush().unwrap();
    let customer_key = customer.with_typed::<Customer, _>(|c| c.id.clone()).unwrap().unwrap();

    let mut fresh = ds.connect();
    let loaded = fresh.retrieve("Customer", &customer_key).unwrap().unwrap();
    let orders = loaded.with_typed::<Customer, _>(|c| c.orders.clone()).unwrap();
    let Value::Collection(reference) = orders else {
        panic!("expected an unresolved collection, found {orders:?}");
    };
    let resolved = fresh.resolve_collection(&reference).unwrap();
    assert_eq!(resolved.len(), 1);
    let resolved_key = resolved[0]
        .with_typed::<Order, _>(|o| o.id.clone())
        .unwrap()
        .unwrap();
    assert_eq!(resolved_key, order_key);
    resolved[0].with_typed::<Order, _>(|o| assert_eq!(o.number, 7)).unwrap();
}

#[test]
fn stale_updates_conflict_on_version() {
    let (_, ds) = datastore();
    let mut writer = ds.connect();
    let account = new_account("ada", 100);
    let key = writer.persist(&account).unwrap();
    writer.flush().unwrap();

    let mut other = ds.connect();
    let fresh = other.retrieve("Account", &key).unwrap().unwrap();
    fresh.with_typed_mut::<Account, _>(|a| a.balance = 50).unwrap();
    other.persist(&fresh).unwrap();
    other.flush().unwrap();

    account.with_typed_mut::<Account, _>(|a| a.balance = 75).unwrap();
    writer.persist(&account).unwrap();
    let err = writer.flush().unwrap_err();
    assert!(matches!(err, DatastoreError::OptimisticLockConflict { .. }));
    assert!(writer.has_error());

    // The winning write is still what the store holds.
    let mut check = ds.connect();
    let settled = check.retrieve("Account", &key).unwrap().unwrap();
    settled
        .with_typed::<Account, _>(|a| {
            assert_eq!(a.balance, 50);
            assert_eq!(a.version, 1);
        })
        .unwrap();
}

#[test]
fn deletes_remove_documents() {
    let (store, ds) = datastore();
    let mut session = ds.connect();
    let person = new_person("Ada", 36);
    let key = session.persist(&person).unwrap();
    session.flush().unwrap();
    assert_eq!(store.document_count("people"), 1);

    session.delete(&person).unwrap();
    session.flush().unwrap();
    assert_eq!(store.document_count("people"), 0);
    assert!(session.retrieve("Person", &key).unwrap().is_none());
}
