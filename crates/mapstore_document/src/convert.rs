//! Conversion between engine values and JSON documents.
//!
//! Identities and byte strings have no direct JSON shape; they are encoded
//! as single-key objects (`{"$id": ...}`, `{"$bytes": ...}`) so decoding is
//! unambiguous. Association values must have been resolved to identities by
//! the engine before an entry reaches this backend.

use mapstore_core::{CoreResult, DatastoreError};
use mapstore_model::{Identity, NativeEntry, Value};
use serde_json::{json, Map as JsonMap, Value as Json};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Encodes an identity as a prefixed token, reversible by [`parse_id_token`].
#[must_use]
pub fn id_token(id: &Identity) -> String {
    match id {
        Identity::Uuid(u) => format!("u:{u}"),
        Identity::Int(i) => format!("i:{i}"),
        Identity::Text(s) => format!("t:{s}"),
    }
}

/// Decodes an identity token produced by [`id_token`].
pub fn parse_id_token(token: &str) -> CoreResult<Identity> {
    let (prefix, rest) = token
        .split_once(':')
        .ok_or_else(|| DatastoreError::backend(format!("malformed id token {token:?}")))?;
    match prefix {
        "u" => Uuid::parse_str(rest)
            .map(Identity::Uuid)
            .map_err(|_| DatastoreError::backend(format!("malformed uuid token {token:?}"))),
        "i" => rest
            .parse::<i64>()
            .map(Identity::Int)
            .map_err(|_| DatastoreError::backend(format!("malformed int token {token:?}"))),
        "t" => Ok(Identity::Text(rest.to_string())),
        _ => Err(DatastoreError::backend(format!(
            "unknown id token prefix in {token:?}"
        ))),
    }
}

/// Converts an engine value into its JSON document shape.
pub fn value_to_json(value: &Value) -> CoreResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(b) => json!({ "$bytes": b }),
        Value::Id(id) => json!({ "$id": id_token(id) }),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(value_to_json)
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        Value::Map(map) => {
            let mut object = JsonMap::with_capacity(map.len());
            for (key, value) in map {
                object.insert(key.clone(), value_to_json(value)?);
            }
            Json::Object(object)
        }
        Value::Entity(_) | Value::Collection(_) => {
            return Err(DatastoreError::backend(
                "unresolved association value reached the document backend",
            ));
        }
    })
}

/// Converts a JSON document value back into an engine value.
pub fn json_to_value(json: &Json) -> CoreResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::List(
            items
                .iter()
                .map(json_to_value)
                .collect::<CoreResult<Vec<_>>>()?,
        ),
        Json::Object(object) => {
            if object.len() == 1 {
                if let Some(Json::String(token)) = object.get("$id") {
                    return Ok(Value::Id(parse_id_token(token)?));
                }
                if let Some(Json::Array(bytes)) = object.get("$bytes") {
                    let decoded = bytes
                        .iter()
                        .map(|b| {
                            b.as_u64()
                                .and_then(|b| u8::try_from(b).ok())
                                .ok_or_else(|| DatastoreError::backend("malformed byte array"))
                        })
                        .collect::<CoreResult<Vec<u8>>>()?;
                    return Ok(Value::Bytes(decoded));
                }
            }
            let mut map = BTreeMap::new();
            for (key, value) in object {
                map.insert(key.clone(), json_to_value(value)?);
            }
            Value::Map(map)
        }
    })
}

/// Converts a native entry into a JSON document.
pub fn entry_to_document(entry: &NativeEntry) -> CoreResult<Json> {
    let mut object = JsonMap::with_capacity(entry.len());
    for (key, value) in entry.iter() {
        object.insert(key.clone(), value_to_json(value)?);
    }
    Ok(Json::Object(object))
}

/// Converts a JSON document back into a native entry for the family.
pub fn document_to_entry(family: &str, document: &Json) -> CoreResult<NativeEntry> {
    let Json::Object(object) = document else {
        return Err(DatastoreError::backend("stored document is not an object"));
    };
    let mut values = BTreeMap::new();
    for (key, value) in object {
        values.insert(key.clone(), json_to_value(value)?);
    }
    Ok(NativeEntry::from_values(family, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_token_roundtrip() {
        for id in [
            Identity::random(),
            Identity::Int(-7),
            Identity::Text("order-1".into()),
        ] {
            assert_eq!(parse_id_token(&id_token(&id)).unwrap(), id);
        }
    }

    #[test]
    fn scalar_roundtrip() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::Float(1.5),
            Value::Text("hello".into()),
            Value::Bytes(vec![0, 255, 3]),
            Value::Id(Identity::Int(9)),
        ] {
            let json = value_to_json(&value).unwrap();
            assert_eq!(json_to_value(&json).unwrap(), value);
        }
    }

    #[test]
    fn nested_entry_roundtrip() {
        let mut address = NativeEntry::new("addresses");
        address.put("city", Value::Text("London".into()));
        let mut entry = NativeEntry::new("people");
        entry.put("name", Value::Text("Ada".into()));
        entry.put("tags", Value::List(vec![Value::Text("x".into())]));
        entry.put_entry("address", address);

        let document = entry_to_document(&entry).unwrap();
        let decoded = document_to_entry("people", &document).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn association_values_are_rejected() {
        let value = Value::Collection(mapstore_model::AssociationRef {
            owner_entity: "Order".into(),
            property: "lines".into(),
            owner_key: Identity::Int(1),
        });
        assert!(value_to_json(&value).is_err());
    }

    mod properties {
        use super::*;
        use mapstore_testkit::{arb_identity, arb_value};
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn generated_values_roundtrip(value in arb_value()) {
                let json = value_to_json(&value).unwrap();
                prop_assert_eq!(json_to_value(&json).unwrap(), value);
            }

            #[test]
            fn id_tokens_roundtrip(id in arb_identity()) {
                prop_assert_eq!(parse_id_token(&id_token(&id)).unwrap(), id);
            }
        }
    }
}
