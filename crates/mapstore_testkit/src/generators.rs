//! Proptest generators for engine values and identities.

use mapstore_model::{Identity, Value};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy over all identity shapes.
pub fn arb_identity() -> impl Strategy<Value = Identity> {
    prop_oneof![
        any::<[u8; 16]>().prop_map(|bytes| Identity::Uuid(Uuid::from_bytes(bytes))),
        any::<i64>().prop_map(Identity::Int),
        "[a-z0-9-]{1,24}".prop_map(Identity::Text),
    ]
}

/// Strategy over scalar values (no lists, maps or associations).
pub fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        // Finite floats only; NaN breaks equality-based assertions.
        (-1.0e12f64..1.0e12).prop_map(Value::Float),
        ".{0,32}".prop_map(Value::Text),
        vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        arb_identity().prop_map(Value::Id),
    ]
}

/// Strategy over values including nested lists and maps.
pub fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 32, 8, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..8).prop_map(Value::List),
            btree_map("[a-z]{1,8}", inner, 0..8).prop_map(Value::Map),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn identities_display_roundtrip_text(id in arb_identity()) {
            let text = id.to_string();
            prop_assert!(!text.is_empty());
        }

        #[test]
        fn scalars_are_not_associations(value in arb_scalar()) {
            prop_assert!(value.as_entity().is_none());
        }
    }
}
