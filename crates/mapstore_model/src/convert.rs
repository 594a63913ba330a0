//! Value conversion between live property shapes and stored shapes.

use crate::value::{Value, ValueType};
use crate::error::{ModelError, ModelResult};

/// Converts dynamic values to a property's declared shape.
///
/// Property writes pass through conversion so that a value read back from a
/// backend (or supplied loosely by a caller) lands on the instance in the
/// declared shape. Conversions are narrow and lossless; anything else is a
/// conversion error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionService;

impl ConversionService {
    /// Converts `value` to the given target shape.
    ///
    /// `Null` passes through unchanged for every target. Same-shape values
    /// pass through without copy-level changes.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Conversion`] when the value cannot losslessly
    /// represent the target shape.
    pub fn convert(&self, value: Value, target: ValueType) -> ModelResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match (value, target) {
            (v @ Value::Bool(_), ValueType::Bool)
            | (v @ Value::Int(_), ValueType::Int)
            | (v @ Value::Float(_), ValueType::Float)
            | (v @ Value::Text(_), ValueType::Text)
            | (v @ Value::Bytes(_), ValueType::Bytes)
            | (v @ Value::Id(_), ValueType::Id)
            | (v @ Value::List(_), ValueType::List)
            | (v @ Value::Map(_), ValueType::Map)
            | (v @ (Value::Entity(_) | Value::Collection(_)), ValueType::Entity) => Ok(v),

            (Value::Int(i), ValueType::Float) => Ok(Value::Float(i as f64)),
            (Value::Float(f), ValueType::Int) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
            (Value::Text(s), ValueType::Int) => s
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ModelError::conversion(format!("text {s:?}"), "int")),
            (Value::Text(s), ValueType::Float) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| ModelError::conversion(format!("text {s:?}"), "float")),
            (Value::Text(s), ValueType::Bool) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(ModelError::conversion(format!("text {s:?}"), "bool")),
            },
            (Value::Int(i), ValueType::Text) => Ok(Value::Text(i.to_string())),
            (Value::Bool(b), ValueType::Text) => Ok(Value::Text(b.to_string())),
            (Value::Id(id), ValueType::Text) => Ok(Value::Text(id.to_string())),

            (other, target) => Err(ModelError::conversion(
                other.type_name(),
                format!("{target:?}").to_lowercase(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn null_passes_through() {
        let svc = ConversionService;
        assert!(svc.convert(Value::Null, ValueType::Int).unwrap().is_null());
    }

    #[test]
    fn same_shape_passes_through() {
        let svc = ConversionService;
        assert_eq!(
            svc.convert(Value::Int(5), ValueType::Int).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn widening_int_to_float() {
        let svc = ConversionService;
        assert_eq!(
            svc.convert(Value::Int(2), ValueType::Float).unwrap(),
            Value::Float(2.0)
        );
    }

    #[test]
    fn text_parsing() {
        let svc = ConversionService;
        assert_eq!(
            svc.convert(Value::Text("42".into()), ValueType::Int).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            svc.convert(Value::Text("true".into()), ValueType::Bool).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn fractional_float_to_int_fails() {
        let svc = ConversionService;
        assert!(svc.convert(Value::Float(1.5), ValueType::Int).is_err());
    }

    #[test]
    fn id_to_text() {
        let svc = ConversionService;
        assert_eq!(
            svc.convert(Value::Id(Identity::Int(9)), ValueType::Text)
                .unwrap(),
            Value::Text("9".into())
        );
    }

    #[test]
    fn incompatible_fails() {
        let svc = ConversionService;
        assert!(svc.convert(Value::Bytes(vec![1]), ValueType::Int).is_err());
    }
}
