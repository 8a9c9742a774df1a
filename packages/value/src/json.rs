//! The JSON coder.
//!
//! JSON is modelled as a fixed-point sum type (`Type::Json`); this module
//! converts between `serde_json::Value` and the typed encoding. Numbers are
//! carried as decimal text so round-tripping never loses precision.

use serde_json::Value as Json;

use crate::value::Value;
use crate::{Result, ValueError};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

fn sum(tag: u8, value: Value) -> Value {
    Value::Sum {
        tag,
        value: Box::new(value),
    }
}

/// Encode a JSON document as a `Type::Json` value.
pub fn json_encode(j: &Json) -> Value {
    match j {
        Json::Null => sum(TAG_NULL, Value::unit()),
        Json::Bool(b) => sum(TAG_BOOL, Value::Bit(*b)),
        Json::Number(n) => sum(TAG_NUMBER, Value::string(&n.to_string())),
        Json::String(s) => sum(TAG_STRING, Value::string(s)),
        Json::Array(items) => sum(TAG_ARRAY, Value::List(items.iter().map(json_encode).collect())),
        Json::Object(map) => sum(
            TAG_OBJECT,
            Value::List(
                map.iter()
                    .map(|(k, v)| Value::Product(vec![Value::string(k), json_encode(v)]))
                    .collect(),
            ),
        ),
    }
}

/// Decode a `Type::Json` value back into a JSON document.
///
/// Total over well-typed input; unknown tags and malformed payloads fail
/// with `WrongType`.
pub fn json_decode(v: &Value) -> Result<Json> {
    let Value::Sum { tag, value } = v else {
        return Err(ValueError::wrong_type("json value is not a sum"));
    };
    match *tag {
        TAG_NULL => Ok(Json::Null),
        TAG_BOOL => match value.as_ref() {
            Value::Bit(b) => Ok(Json::Bool(*b)),
            _ => Err(ValueError::wrong_type("json bool payload is not a bit")),
        },
        TAG_NUMBER => {
            let text = decode_string(value)?;
            match serde_json::from_str::<Json>(&text) {
                Ok(n @ Json::Number(_)) => Ok(n),
                _ => Err(ValueError::wrong_type(format!(
                    "json number payload {:?} is not decimal",
                    text
                ))),
            }
        }
        TAG_STRING => Ok(Json::String(decode_string(value)?)),
        TAG_ARRAY => match value.as_ref() {
            Value::List(items) => items.iter().map(json_decode).collect::<Result<_>>().map(Json::Array),
            _ => Err(ValueError::wrong_type("json array payload is not a list")),
        },
        TAG_OBJECT => match value.as_ref() {
            Value::List(entries) => {
                let mut map = serde_json::Map::new();
                for entry in entries {
                    let Value::Product(kv) = entry else {
                        return Err(ValueError::wrong_type("json object entry is not a pair"));
                    };
                    let [k, v] = kv.as_slice() else {
                        return Err(ValueError::wrong_type("json object entry arity"));
                    };
                    map.insert(decode_string(k)?, json_decode(v)?);
                }
                Ok(Json::Object(map))
            }
            _ => Err(ValueError::wrong_type("json object payload is not a list")),
        },
        other => Err(ValueError::wrong_type(format!("unknown json tag {}", other))),
    }
}

fn decode_string(v: &Value) -> Result<String> {
    let bytes = v
        .as_string_bytes()
        .ok_or_else(|| ValueError::wrong_type("string payload is not a bit list"))?;
    String::from_utf8(bytes).map_err(|_| ValueError::wrong_type("string is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::Type;
    use serde_json::json;

    fn round_trip(j: Json) {
        let v = json_encode(&j);
        assert!(Type::Json.contains(&v), "{:?} not well-typed", j);
        assert_eq!(json_decode(&v).unwrap(), j);
    }

    #[test]
    fn all_variants_round_trip() {
        round_trip(json!(null));
        round_trip(json!(true));
        round_trip(json!(false));
        round_trip(json!(12345));
        round_trip(json!(-0.5));
        round_trip(json!("hello"));
        round_trip(json!([1, "two", null, [3]]));
        round_trip(json!({"k1": "hello", "k2": 12345, "nested": {"a": []}}));
    }

    #[test]
    fn numbers_stay_decimal_text() {
        let v = json_encode(&json!(12345));
        let Value::Sum { tag, value } = &v else {
            panic!()
        };
        assert_eq!(*tag, 2);
        assert_eq!(value.as_string_bytes().unwrap(), b"12345");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let v = Value::Sum {
            tag: 9,
            value: Box::new(Value::unit()),
        };
        assert!(matches!(
            json_decode(&v),
            Err(ValueError::WrongType { .. })
        ));
    }

    #[test]
    fn encoded_json_survives_marshalling() {
        use crate::marshal::{load, marshal};
        use crate::store::MemBlobStore;

        let j = json!({"k1": "hello", "k2": 12345});
        let v = json_encode(&j);
        let mut store = MemBlobStore::new();
        let bytes = marshal(&v, &Type::Json, &mut store).unwrap();
        let back = load(&Type::Json, &bytes, &mut store).unwrap();
        assert_eq!(json_decode(&back).unwrap(), j);
    }
}
