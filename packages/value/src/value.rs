//! Values.
//!
//! A `Value` is immutable after construction and fully materialised: lists
//! hold their elements, `Any` holds its payload. References only appear in
//! the marshalled form, so equality and traversal never touch a store.

use serde::{Deserialize, Serialize};

use crate::ty::Type;

/// A value of some [`Type`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A single bit.
    Bit(bool),
    /// An unsigned bit vector; `width` 1..=64.
    Bits { width: u32, value: u64 },
    /// A fixed-length byte array.
    Bytes(Vec<u8>),
    /// One variant of a sum.
    Sum { tag: u8, value: Box<Value> },
    /// An ordered tuple.
    Product(Vec<Value>),
    /// A general homogeneous list.
    List(Vec<Value>),
    /// A list of bits packed eight per byte: the byte-array fast path for
    /// strings and random output. Length is `8 * bytes.len()` elements.
    BitList(Vec<u8>),
    /// A port identity.
    Port([u8; 32]),
    /// A serialized expression, opaque at this layer.
    Lambda(Vec<u8>),
    /// A self-describing value.
    Any(Box<AnyValue>),
}

/// A tagged `(Type, Value)` pair of fixed marshalled width.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnyValue {
    pub ty: Type,
    pub value: Value,
}

impl AnyValue {
    pub fn new(ty: Type, value: Value) -> Self {
        AnyValue { ty, value }
    }
}

impl Value {
    /// The unit value: an empty product.
    pub fn unit() -> Value {
        Value::Product(Vec::new())
    }

    /// A UTF-8 string as a packed bit list.
    pub fn string(s: &str) -> Value {
        Value::BitList(s.as_bytes().to_vec())
    }

    pub fn b16(v: u16) -> Value {
        Value::Bits {
            width: 16,
            value: v as u64,
        }
    }

    pub fn b32(v: u32) -> Value {
        Value::Bits {
            width: 32,
            value: v as u64,
        }
    }

    pub fn b64(v: u64) -> Value {
        Value::Bits {
            width: 64,
            value: v,
        }
    }

    /// Extract string bytes if this value is a bit list on the byte fast
    /// path, or a general list of bits of length divisible by eight.
    pub fn as_string_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::BitList(bytes) => Some(bytes.clone()),
            Value::List(items) if items.len() % 8 == 0 => {
                let mut out = vec![0u8; items.len() / 8];
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Bit(true) => out[i / 8] |= 1 << (i % 8),
                        Value::Bit(false) => {}
                        _ => return None,
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// Structural equality.
    ///
    /// Unlike derived `PartialEq`, a packed bit list and the equivalent
    /// general list of bits compare equal. This is the equality the
    /// namespace CAS uses.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::BitList(_), Value::List(_)) | (Value::List(_), Value::BitList(_)) => {
                match (self.as_string_bytes(), other.as_string_bytes()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (Value::Sum { tag: ta, value: va }, Value::Sum { tag: tb, value: vb }) => {
                ta == tb && va.structural_eq(vb)
            }
            (Value::Product(xs), Value::Product(ys)) | (Value::List(xs), Value::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Any(a), Value::Any(b)) => a.ty == b.ty && a.value.structural_eq(&b.value),
            _ => self == other,
        }
    }
}

impl Type {
    /// Does `v` inhabit this type?
    ///
    /// Total: unknown shapes are simply `false`. Coders use this before
    /// trusting a decoded value.
    pub fn contains(&self, v: &Value) -> bool {
        match (self, v) {
            (Type::Bit, Value::Bit(_)) => true,
            (Type::Bits(n), Value::Bits { width, value }) => {
                width == n && (*n == 64 || *value < (1u64 << n))
            }
            (Type::Bytes(n), Value::Bytes(b)) => b.len() == *n as usize,
            (Type::Sum(variants), Value::Sum { tag, value }) => variants
                .get(*tag as usize)
                .is_some_and(|t| t.contains(value)),
            (Type::Product(fields), Value::Product(xs)) => {
                fields.len() == xs.len()
                    && fields.iter().zip(xs).all(|(t, x)| t.contains(x))
            }
            (Type::List(elem), Value::List(items)) => {
                items.iter().all(|x| elem.contains(x))
            }
            (Type::List(elem), Value::BitList(_)) => **elem == Type::Bit,
            (Type::Port(_), Value::Port(_)) => true,
            (Type::Lambda, Value::Lambda(_)) => true,
            (Type::Any, Value::Any(any)) => any.ty.contains(&any.value),
            (Type::Json, _) => Type::json_expanded().contains(v),
            _ => false,
        }
    }
}
