//! The reference mapping: a small domain exercising every property kind.
//!
//! `Person` covers simple, basic and embedded properties with an indexed
//! name. `Order` owns a cascade-persisted to-one `Customer` (bidirectional
//! with `Customer.orders`) and a cascade-persisted to-many of `LineItem`.
//! `Account` carries a version property for optimistic locking.

use mapstore_model::{
    Accessors, Cascade, EntityBuilder, EntityHandle, IdGenerator, IdentityKind, Identity,
    MappingContext, ModelError, ModelResult, PersistentProperty, Value, ValueType,
};
use std::any::Any;
use std::sync::Arc;

/// A person with an embedded address.
#[derive(Debug, Default)]
pub struct Person {
    /// Identifier, unset until persisted or assigned.
    pub id: Option<Identity>,
    /// Indexed display name.
    pub name: String,
    /// Age in years.
    pub age: i64,
    /// Free-form tags (a basic collection).
    pub tags: Vec<String>,
    /// Embedded address value (`Value::Null` or a loaded `Address`).
    pub address: Value,
}

/// An embedded address; has no identity of its own.
#[derive(Debug, Default)]
pub struct Address {
    /// City name.
    pub city: String,
    /// Street line.
    pub street: String,
}

/// The owning side of the Order association.
#[derive(Debug, Default)]
pub struct Customer {
    /// Identifier.
    pub id: Option<Identity>,
    /// Customer name.
    pub name: String,
    /// Inverse collection of orders (lazy by default).
    pub orders: Value,
}

/// An order with a cascade-persisted customer and line items.
#[derive(Debug, Default)]
pub struct Order {
    /// Identifier.
    pub id: Option<Identity>,
    /// Order number.
    pub number: i64,
    /// To-one customer reference.
    pub customer: Value,
    /// To-many line items.
    pub lines: Value,
}

/// A line item belonging to one order.
#[derive(Debug, Default)]
pub struct LineItem {
    /// Identifier.
    pub id: Option<Identity>,
    /// Stock keeping unit.
    pub sku: String,
    /// Quantity ordered.
    pub qty: i64,
}

/// A ticket whose integer key is assigned by the store at write time.
#[derive(Debug, Default)]
pub struct Ticket {
    /// Identifier, back-filled by the store on insert.
    pub id: Option<Identity>,
    /// Ticket code.
    pub code: String,
}

/// A versioned account for optimistic-locking tests.
#[derive(Debug, Default)]
pub struct Account {
    /// Identifier.
    pub id: Option<Identity>,
    /// Owner name.
    pub owner: String,
    /// Balance in minor units.
    pub balance: i64,
    /// Optimistic-lock version.
    pub version: i64,
}

fn id_value(id: &Option<Identity>) -> Value {
    id.clone().map_or(Value::Null, Value::Id)
}

fn set_id(slot: &mut Option<Identity>, value: Value) -> ModelResult<()> {
    match value {
        Value::Null => *slot = None,
        Value::Id(id) => *slot = Some(id),
        other => {
            return Err(ModelError::type_mismatch(
                "fixture",
                "id",
                format!("expected a key, found {}", other.type_name()),
            ))
        }
    }
    Ok(())
}

fn mismatch(entity: &str, property: &str, value: &Value) -> ModelError {
    ModelError::type_mismatch(
        entity,
        property,
        format!("unexpected {}", value.type_name()),
    )
}

fn wrong_instance(entity: &'static str) -> ModelError {
    ModelError::type_mismatch(entity, "<instance>", "wrong instance type")
}

fn person_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Person::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let person = instance.downcast_ref::<Person>()?;
        match property {
            "id" => Some(id_value(&person.id)),
            "name" => Some(Value::Text(person.name.clone())),
            "age" => Some(Value::Int(person.age)),
            "tags" => Some(Value::List(
                person.tags.iter().cloned().map(Value::Text).collect(),
            )),
            "address" => Some(person.address.clone()),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let person = instance
            .downcast_mut::<Person>()
            .ok_or_else(|| wrong_instance("Person"))?;
        match (property, value) {
            ("id", value) => set_id(&mut person.id, value)?,
            ("name", Value::Text(s)) => person.name = s,
            ("age", Value::Int(i)) => person.age = i,
            ("tags", Value::List(items)) => {
                person.tags = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Text(s) => Some(s),
                        _ => None,
                    })
                    .collect();
            }
            ("tags", Value::Null) => person.tags.clear(),
            ("address", value @ (Value::Null | Value::Entity(_))) => person.address = value,
            (name, value) => return Err(mismatch("Person", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

fn address_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Address::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let address = instance.downcast_ref::<Address>()?;
        match property {
            "city" => Some(Value::Text(address.city.clone())),
            "street" => Some(Value::Text(address.street.clone())),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let address = instance
            .downcast_mut::<Address>()
            .ok_or_else(|| wrong_instance("Address"))?;
        match (property, value) {
            ("city", Value::Text(s)) => address.city = s,
            ("street", Value::Text(s)) => address.street = s,
            (name, value) => return Err(mismatch("Address", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

fn customer_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Customer::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let customer = instance.downcast_ref::<Customer>()?;
        match property {
            "id" => Some(id_value(&customer.id)),
            "name" => Some(Value::Text(customer.name.clone())),
            "orders" => Some(customer.orders.clone()),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let customer = instance
            .downcast_mut::<Customer>()
            .ok_or_else(|| wrong_instance("Customer"))?;
        match (property, value) {
            ("id", value) => set_id(&mut customer.id, value)?,
            ("name", Value::Text(s)) => customer.name = s,
            ("orders", value) => customer.orders = value,
            (name, value) => return Err(mismatch("Customer", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

fn order_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Order::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let order = instance.downcast_ref::<Order>()?;
        match property {
            "id" => Some(id_value(&order.id)),
            "number" => Some(Value::Int(order.number)),
            "customer" => Some(order.customer.clone()),
            "lines" => Some(order.lines.clone()),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let order = instance
            .downcast_mut::<Order>()
            .ok_or_else(|| wrong_instance("Order"))?;
        match (property, value) {
            ("id", value) => set_id(&mut order.id, value)?,
            ("number", Value::Int(i)) => order.number = i,
            ("customer", value) => order.customer = value,
            ("lines", value) => order.lines = value,
            (name, value) => return Err(mismatch("Order", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

fn line_item_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(LineItem::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let line = instance.downcast_ref::<LineItem>()?;
        match property {
            "id" => Some(id_value(&line.id)),
            "sku" => Some(Value::Text(line.sku.clone())),
            "qty" => Some(Value::Int(line.qty)),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let line = instance
            .downcast_mut::<LineItem>()
            .ok_or_else(|| wrong_instance("LineItem"))?;
        match (property, value) {
            ("id", value) => set_id(&mut line.id, value)?,
            ("sku", Value::Text(s)) => line.sku = s,
            ("qty", Value::Int(i)) => line.qty = i,
            (name, value) => return Err(mismatch("LineItem", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

fn ticket_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Ticket::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let ticket = instance.downcast_ref::<Ticket>()?;
        match property {
            "id" => Some(id_value(&ticket.id)),
            "code" => Some(Value::Text(ticket.code.clone())),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let ticket = instance
            .downcast_mut::<Ticket>()
            .ok_or_else(|| wrong_instance("Ticket"))?;
        match (property, value) {
            ("id", value) => set_id(&mut ticket.id, value)?,
            ("code", Value::Text(s)) => ticket.code = s,
            (name, value) => return Err(mismatch("Ticket", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

fn account_accessors() -> Accessors {
    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Account::default())
    }
    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let account = instance.downcast_ref::<Account>()?;
        match property {
            "id" => Some(id_value(&account.id)),
            "owner" => Some(Value::Text(account.owner.clone())),
            "balance" => Some(Value::Int(account.balance)),
            "version" => Some(Value::Int(account.version)),
            _ => None,
        }
    }
    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let account = instance
            .downcast_mut::<Account>()
            .ok_or_else(|| wrong_instance("Account"))?;
        match (property, value) {
            ("id", value) => set_id(&mut account.id, value)?,
            ("owner", Value::Text(s)) => account.owner = s,
            ("balance", Value::Int(i)) => account.balance = i,
            ("version", Value::Int(i)) => account.version = i,
            (name, value) => return Err(mismatch("Account", name, &value)),
        }
        Ok(())
    }
    Accessors { construct, get, set }
}

/// Builds the reference mapping context with every fixture type registered.
#[must_use]
pub fn mapping_context() -> Arc<MappingContext> {
    let context = MappingContext::new();

    context.register(
        EntityBuilder::new("Person")
            .family("people")
            .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
            .property(
                PersistentProperty::simple("name")
                    .value_type(ValueType::Text)
                    .indexed()
                    .required(),
            )
            .property(PersistentProperty::simple("age").value_type(ValueType::Int))
            .property(PersistentProperty::basic("tags"))
            .property(PersistentProperty::embedded("address", "Address"))
            .build(),
        person_accessors(),
    );

    context.register(
        EntityBuilder::new("Address")
            .property(PersistentProperty::simple("city").value_type(ValueType::Text))
            .property(PersistentProperty::simple("street").value_type(ValueType::Text))
            .build(),
        address_accessors(),
    );

    context.register(
        EntityBuilder::new("Customer")
            .family("customers")
            .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
            .property(
                PersistentProperty::simple("name")
                    .value_type(ValueType::Text)
                    .indexed(),
            )
            .property(PersistentProperty::one_to_many("orders", "Order"))
            .build(),
        customer_accessors(),
    );

    context.register(
        EntityBuilder::new("Order")
            .family("orders")
            .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
            .property(PersistentProperty::simple("number").value_type(ValueType::Int))
            .property(
                PersistentProperty::to_one("customer", "Customer")
                    .cascade(Cascade::persist_only())
                    .inverse("orders"),
            )
            .property(
                PersistentProperty::one_to_many("lines", "LineItem").cascade(Cascade::all()),
            )
            .build(),
        order_accessors(),
    );

    context.register(
        EntityBuilder::new("LineItem")
            .family("line_items")
            .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
            .property(PersistentProperty::simple("sku").value_type(ValueType::Text))
            .property(PersistentProperty::simple("qty").value_type(ValueType::Int))
            .build(),
        line_item_accessors(),
    );

    context.register(
        EntityBuilder::new("Ticket")
            .family("tickets")
            .identity("id", IdentityKind::Int, IdGenerator::Store)
            .property(PersistentProperty::simple("code").value_type(ValueType::Text))
            .build(),
        ticket_accessors(),
    );

    context.register(
        EntityBuilder::new("Account")
            .family("accounts")
            .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
            .version("version")
            .property(PersistentProperty::simple("owner").value_type(ValueType::Text))
            .property(PersistentProperty::simple("balance").value_type(ValueType::Int))
            .build(),
        account_accessors(),
    );

    Arc::new(context)
}

/// Wraps a new `Person` in a handle.
#[must_use]
pub fn new_person(name: &str, age: i64) -> EntityHandle {
    EntityHandle::new(
        "Person",
        Box::new(Person {
            id: None,
            name: name.to_string(),
            age,
            tags: Vec::new(),
            address: Value::Null,
        }),
    )
}

/// Wraps a new `Address` in a handle.
#[must_use]
pub fn new_address(city: &str, street: &str) -> EntityHandle {
    EntityHandle::new(
        "Address",
        Box::new(Address {
            city: city.to_string(),
            street: street.to_string(),
        }),
    )
}

/// Wraps a new `Customer` in a handle.
#[must_use]
pub fn new_customer(name: &str) -> EntityHandle {
    EntityHandle::new(
        "Customer",
        Box::new(Customer {
            id: None,
            name: name.to_string(),
            orders: Value::Null,
        }),
    )
}

/// Wraps a new `Order` in a handle.
#[must_use]
pub fn new_order(number: i64) -> EntityHandle {
    EntityHandle::new(
        "Order",
        Box::new(Order {
            id: None,
            number,
            customer: Value::Null,
            lines: Value::Null,
        }),
    )
}

/// Wraps a new `LineItem` in a handle.
#[must_use]
pub fn new_line_item(sku: &str, qty: i64) -> EntityHandle {
    EntityHandle::new(
        "LineItem",
        Box::new(LineItem {
            id: None,
            sku: sku.to_string(),
            qty,
        }),
    )
}

/// Wraps a new `Ticket` in a handle.
#[must_use]
pub fn new_ticket(code: &str) -> EntityHandle {
    EntityHandle::new(
        "Ticket",
        Box::new(Ticket {
            id: None,
            code: code.to_string(),
        }),
    )
}

/// Wraps a new `Account` in a handle.
#[must_use]
pub fn new_account(owner: &str, balance: i64) -> EntityHandle {
    EntityHandle::new(
        "Account",
        Box::new(Account {
            id: None,
            owner: owner.to_string(),
            balance,
            version: 0,
        }),
    )
}
