//! # Mapstore Testkit
//!
//! Shared fixtures for testing mapstore backends: a reference mapping
//! context exercising every property kind, handle builders for the fixture
//! types, and proptest generators for values and identities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    mapping_context, new_account, new_address, new_customer, new_line_item, new_order,
    new_person, new_ticket, Account, Address, Customer, LineItem, Order, Person, Ticket,
};
pub use generators::{arb_identity, arb_scalar, arb_value};
