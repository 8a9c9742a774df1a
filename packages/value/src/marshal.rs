//! Marshalling between values and their fixed-width wire form.
//!
//! `marshal` writes the root bytes and posts every out-of-line blob into
//! the store, transitively. `load` is its inverse. Because marshalling
//! posts everything the value reaches, marshalling into a store is also how
//! a value is *pulled* from one store into another.

use crate::store::{BlobStore, Ref};
use crate::ty::Type;
use crate::value::{AnyValue, Value};
use crate::{Result, ValueError};

/// Marshal `v` at type `ty`, posting side blobs into `store`.
///
/// Returns exactly `ty.width_bytes()` bytes.
pub fn marshal(v: &Value, ty: &Type, store: &mut dyn BlobStore) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(ty.width_bytes());
    marshal_into(v, ty, store, &mut out)?;
    debug_assert_eq!(out.len(), ty.width_bytes());
    Ok(out)
}

fn marshal_into(
    v: &Value,
    ty: &Type,
    store: &mut dyn BlobStore,
    out: &mut Vec<u8>,
) -> Result<()> {
    match (ty, v) {
        (Type::Bit, Value::Bit(b)) => out.push(*b as u8),
        (Type::Bits(n), Value::Bits { width, value }) => {
            if width != n || (*n < 64 && *value >= (1u64 << n)) {
                return Err(ValueError::wrong_type(format!(
                    "bit vector {}b does not fit Bits({})",
                    width, n
                )));
            }
            out.extend_from_slice(&value.to_le_bytes()[..(*n as usize).div_ceil(8)]);
        }
        (Type::Bytes(n), Value::Bytes(b)) => {
            if b.len() != *n as usize {
                return Err(ValueError::wrong_type(format!(
                    "{} bytes where Bytes({}) expected",
                    b.len(),
                    n
                )));
            }
            out.extend_from_slice(b);
        }
        (Type::Sum(variants), Value::Sum { tag, value }) => {
            let vt = variants.get(*tag as usize).ok_or_else(|| {
                ValueError::wrong_type(format!("sum tag {} out of range", tag))
            })?;
            out.push(*tag);
            let before = out.len();
            marshal_into(value, vt, store, out)?;
            // Pad the payload to the widest variant.
            let widest = variants.iter().map(Type::width_bytes).max().unwrap_or(0);
            out.resize(before + widest, 0);
        }
        (Type::Product(fields), Value::Product(xs)) => {
            if fields.len() != xs.len() {
                return Err(ValueError::wrong_type(format!(
                    "product arity {} vs {}",
                    xs.len(),
                    fields.len()
                )));
            }
            for (x, ft) in xs.iter().zip(fields) {
                marshal_into(x, ft, store, out)?;
            }
        }
        (Type::List(elem), _) => {
            let (blob, count) = pack_list(v, elem, store)?;
            let r = store.post(&blob)?;
            r.write_to(out);
            out.extend_from_slice(&count.to_le_bytes());
        }
        (Type::Port(_), Value::Port(id)) => out.extend_from_slice(id),
        (Type::Lambda, Value::Lambda(body)) => {
            let r = store.post(body)?;
            r.write_to(out);
        }
        (Type::Any, Value::Any(any)) => {
            out.extend_from_slice(&marshal_any_root(any, store)?);
        }
        (Type::Json, _) => marshal_into(v, &Type::json_expanded(), store, out)?,
        _ => {
            return Err(ValueError::wrong_type(format!(
                "value shape does not inhabit {:?}",
                ty
            )))
        }
    }
    Ok(())
}

/// Pack list elements into a single blob; returns (blob, element count).
fn pack_list(v: &Value, elem: &Type, store: &mut dyn BlobStore) -> Result<(Vec<u8>, u32)> {
    match (elem, v) {
        // Byte-array fast path for lists of bits.
        (Type::Bit, Value::BitList(bytes)) => Ok((bytes.clone(), bytes.len() as u32 * 8)),
        (Type::Bit, Value::List(items)) => {
            let mut packed = vec![0u8; items.len().div_ceil(8)];
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Bit(true) => packed[i / 8] |= 1 << (i % 8),
                    Value::Bit(false) => {}
                    _ => return Err(ValueError::wrong_type("non-bit in list of bits")),
                }
            }
            Ok((packed, items.len() as u32))
        }
        (_, Value::List(items)) => {
            let mut blob = Vec::with_capacity(items.len() * elem.width_bytes());
            for item in items {
                marshal_into(item, elem, store, &mut blob)?;
            }
            Ok((blob, items.len() as u32))
        }
        _ => Err(ValueError::wrong_type("value is not a list")),
    }
}

/// Marshal an `AnyValue` into its fixed 72-byte root.
///
/// The type is serialized into its own blob so the root stays fixed-width
/// no matter how large the type is.
pub fn marshal_any_root(any: &AnyValue, store: &mut dyn BlobStore) -> Result<Vec<u8>> {
    let ty_bytes = serde_json::to_vec(&any.ty)
        .map_err(|e| ValueError::Store(Box::new(e)))?;
    let ty_ref = store.post(&ty_bytes)?;
    let root = marshal(&any.value, &any.ty, store)?;
    let value_ref = store.post(&root)?;
    let mut out = Vec::with_capacity(72);
    ty_ref.write_to(&mut out);
    value_ref.write_to(&mut out);
    Ok(out)
}

/// Load an `AnyValue` back from its 72-byte root.
pub fn load_any_root(root: &[u8], store: &mut dyn BlobStore) -> Result<AnyValue> {
    if root.len() < 72 {
        return Err(ValueError::ShortBuffer {
            need: 72,
            got: root.len(),
        });
    }
    let ty_ref = Ref::read_from(&root[..36])?;
    let value_ref = Ref::read_from(&root[36..72])?;
    let ty_bytes = store.get(&ty_ref)?;
    let ty: Type = serde_json::from_slice(&ty_bytes).map_err(|e| ValueError::Corrupt {
        id: ty_ref.id,
        message: format!("type blob does not parse: {}", e),
    })?;
    let value_bytes = store.get(&value_ref)?;
    let value = load(&ty, &value_bytes, store)?;
    Ok(AnyValue::new(ty, value))
}

/// Load a value of type `ty` from its marshalled bytes.
pub fn load(ty: &Type, bytes: &[u8], store: &mut dyn BlobStore) -> Result<Value> {
    let need = ty.width_bytes();
    if bytes.len() < need {
        return Err(ValueError::ShortBuffer {
            need,
            got: bytes.len(),
        });
    }
    load_prefix(ty, bytes, store)
}

fn load_prefix(ty: &Type, bytes: &[u8], store: &mut dyn BlobStore) -> Result<Value> {
    match ty {
        Type::Bit => Ok(Value::Bit(bytes[0] & 1 != 0)),
        Type::Bits(n) => {
            let nbytes = (*n as usize).div_ceil(8);
            let mut le = [0u8; 8];
            le[..nbytes].copy_from_slice(&bytes[..nbytes]);
            Ok(Value::Bits {
                width: *n,
                value: u64::from_le_bytes(le),
            })
        }
        Type::Bytes(n) => Ok(Value::Bytes(bytes[..*n as usize].to_vec())),
        Type::Sum(variants) => {
            let tag = bytes[0];
            let vt = variants.get(tag as usize).ok_or_else(|| {
                ValueError::wrong_type(format!("unknown sum tag {}", tag))
            })?;
            let value = load(vt, &bytes[1..], store)?;
            Ok(Value::Sum {
                tag,
                value: Box::new(value),
            })
        }
        Type::Product(fields) => {
            let mut xs = Vec::with_capacity(fields.len());
            let mut at = 0usize;
            for ft in fields {
                xs.push(load(ft, &bytes[at..], store)?);
                at += ft.width_bytes();
            }
            Ok(Value::Product(xs))
        }
        Type::List(elem) => {
            let r = Ref::read_from(&bytes[..36])?;
            let count =
                u32::from_le_bytes(bytes[36..40].try_into().expect("4-byte slice")) as usize;
            let blob = store.get(&r)?;
            unpack_list(elem, &blob, count, store)
        }
        Type::Port(_) => {
            let id: [u8; 32] = bytes[..32].try_into().expect("32-byte slice");
            Ok(Value::Port(id))
        }
        Type::Lambda => {
            let r = Ref::read_from(&bytes[..36])?;
            Ok(Value::Lambda(store.get(&r)?))
        }
        Type::Any => Ok(Value::Any(Box::new(load_any_root(&bytes[..72], store)?))),
        Type::Json => load_prefix(&Type::json_expanded(), bytes, store),
    }
}

fn unpack_list(
    elem: &Type,
    blob: &[u8],
    count: usize,
    store: &mut dyn BlobStore,
) -> Result<Value> {
    if *elem == Type::Bit {
        let need = count.div_ceil(8);
        if blob.len() < need {
            return Err(ValueError::ShortBuffer {
                need,
                got: blob.len(),
            });
        }
        if count % 8 == 0 {
            return Ok(Value::BitList(blob[..count / 8].to_vec()));
        }
        let items = (0..count)
            .map(|i| Value::Bit(blob[i / 8] >> (i % 8) & 1 != 0))
            .collect();
        return Ok(Value::List(items));
    }
    let w = elem.width_bytes();
    if blob.len() < w * count {
        return Err(ValueError::ShortBuffer {
            need: w * count,
            got: blob.len(),
        });
    }
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        items.push(load(elem, &blob[i * w..], store)?);
    }
    Ok(Value::List(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBlobStore;
    use crate::ty::PortType;

    fn round_trip(v: Value, ty: Type) {
        let mut store = MemBlobStore::new();
        let bytes = marshal(&v, &ty, &mut store).unwrap();
        assert_eq!(bytes.len(), ty.width_bytes());
        let back = load(&ty, &bytes, &mut store).unwrap();
        assert!(v.structural_eq(&back), "{:?} != {:?}", v, back);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Bit(true), Type::Bit);
        round_trip(Value::b32(0xdead_beef), Type::Bits(32));
        round_trip(Value::b64(u64::MAX), Type::Bits(64));
        round_trip(Value::Bytes(vec![1, 2, 3, 4]), Type::Bytes(4));
    }

    #[test]
    fn interesting_values_round_trip() {
        round_trip(
            Value::Product(vec![Value::b64(42), Value::b32(7)]),
            Type::Product(vec![Type::Bits(64), Type::Bits(32)]),
        );
        round_trip(
            Value::Sum {
                tag: 1,
                value: Box::new(Value::Bytes(vec![9; 16])),
            },
            Type::Sum(vec![Type::Bytes(4), Type::Bytes(16)]),
        );
        round_trip(Value::string("hello world"), Type::string());
        round_trip(
            Value::List(vec![Value::b32(1), Value::b32(2), Value::b32(3)]),
            Type::list_of(Type::Bits(32)),
        );
        round_trip(
            Value::Any(Box::new(AnyValue::new(Type::Bits(32), Value::b32(5)))),
            Type::Any,
        );
        round_trip(
            Value::List(vec![Value::string("a"), Value::string("bb")]),
            Type::list_of(Type::string()),
        );
    }

    #[test]
    fn odd_length_bit_list_round_trips() {
        let v = Value::List(vec![Value::Bit(true), Value::Bit(false), Value::Bit(true)]);
        round_trip(v, Type::string());
    }

    #[test]
    fn sum_payload_is_padded_to_widest() {
        let ty = Type::Sum(vec![Type::unit(), Type::Bytes(8)]);
        let mut store = MemBlobStore::new();
        let bytes = marshal(
            &Value::Sum {
                tag: 0,
                value: Box::new(Value::unit()),
            },
            &ty,
            &mut store,
        )
        .unwrap();
        assert_eq!(bytes.len(), 9);
    }

    #[test]
    fn unknown_tag_fails_to_load() {
        let ty = Type::Sum(vec![Type::unit(), Type::Bit]);
        let mut store = MemBlobStore::new();
        let mut bytes = marshal(
            &Value::Sum {
                tag: 1,
                value: Box::new(Value::Bit(true)),
            },
            &ty,
            &mut store,
        )
        .unwrap();
        bytes[0] = 9;
        assert!(matches!(
            load(&ty, &bytes, &mut store),
            Err(ValueError::WrongType { .. })
        ));
    }

    #[test]
    fn wrong_shape_fails_to_marshal() {
        let mut store = MemBlobStore::new();
        assert!(matches!(
            marshal(&Value::Bit(true), &Type::Bits(32), &mut store),
            Err(ValueError::WrongType { .. })
        ));
    }

    #[test]
    fn any_root_round_trips_and_is_fixed_width() {
        let any = AnyValue::new(Type::string(), Value::string("payload"));
        let mut store = MemBlobStore::new();
        let root = marshal_any_root(&any, &mut store).unwrap();
        assert_eq!(root.len(), 72);
        let back = load_any_root(&root, &mut store).unwrap();
        assert_eq!(back.ty, any.ty);
        assert!(back.value.structural_eq(&any.value));
    }

    #[test]
    fn marshalling_pulls_into_a_second_store() {
        // Marshal into A, then marshal the loaded value into B: every blob
        // the value reaches must land in B too.
        let any = AnyValue::new(
            Type::list_of(Type::string()),
            Value::List(vec![Value::string("x"), Value::string("y")]),
        );
        let mut a = MemBlobStore::new();
        let root = marshal_any_root(&any, &mut a).unwrap();
        let loaded = load_any_root(&root, &mut a).unwrap();

        let mut b = MemBlobStore::new();
        let root_b = marshal_any_root(&loaded, &mut b).unwrap();
        let again = load_any_root(&root_b, &mut b).unwrap();
        assert!(again.value.structural_eq(&any.value));
    }

    #[test]
    fn port_identity_round_trips() {
        let pt = PortType {
            input: Type::unit(),
            output: Type::unit(),
            request: Type::unit(),
            response: Type::unit(),
        };
        round_trip(Value::Port([7u8; 32]), Type::port(pt));
    }

    #[test]
    fn short_root_is_rejected() {
        let mut store = MemBlobStore::new();
        assert!(matches!(
            load(&Type::Bits(64), &[1, 2], &mut store),
            Err(ValueError::ShortBuffer { .. })
        ));
    }
}
