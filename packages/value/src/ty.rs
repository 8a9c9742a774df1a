//! The type language.
//!
//! Types drive marshalling: every type has a fixed marshalled width, with
//! variable-length data pushed behind refs. Widths are counted in bits
//! because single bits exist (`Bit`, and list-of-bit strings), but every
//! composite field is byte-aligned on the wire.

use serde::{Deserialize, Serialize};

/// Marshalled width of a [`Ref`](crate::Ref): 32-byte id plus LE32 length.
pub const REF_BYTES: usize = 36;

/// Marshalled width of an `AnyValue` root: type ref plus value ref.
pub const ANY_VALUE_BYTES: usize = 2 * REF_BYTES;

/// `ANY_VALUE_BYTES` in bits; the fixed width of `Type::Any`.
pub const ANY_VALUE_BITS: u32 = ANY_VALUE_BYTES as u32 * 8;

/// The typed 4-tuple a port carries: what flows in each direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortType {
    pub input: Type,
    pub output: Type,
    pub request: Type,
    pub response: Type,
}

/// A value type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    /// A single bit.
    Bit,
    /// An unsigned bit vector of the given width, 1..=64, little-endian.
    Bits(u32),
    /// A fixed-length byte array.
    Bytes(u32),
    /// An N-way tagged union. At most 256 variants; one tag byte on the
    /// wire, payload padded to the widest variant.
    Sum(Vec<Type>),
    /// An ordered tuple; fields are concatenated on the wire.
    Product(Vec<Type>),
    /// A homogeneous list: marshalled as a ref to the packed elements plus
    /// an element count. `List(Bit)` packs eight elements per byte.
    List(Box<Type>),
    /// A typed port identity (256 random bits).
    Port(Box<PortType>),
    /// A function: a ref to a serialized expression blob.
    Lambda,
    /// A self-describing value of fixed root width.
    Any,
    /// The JSON fixed point. Expands on demand via [`Type::json_expanded`].
    Json,
}

impl Type {
    /// The unit type: an empty product, zero bits wide.
    pub fn unit() -> Type {
        Type::Product(Vec::new())
    }

    /// Strings are lists of bits with the byte-array fast path.
    pub fn string() -> Type {
        Type::List(Box::new(Type::Bit))
    }

    pub fn list_of(t: Type) -> Type {
        Type::List(Box::new(t))
    }

    pub fn port(pt: PortType) -> Type {
        Type::Port(Box::new(pt))
    }

    /// Materialise the JSON sum. The `Array` and `Object` variants refer
    /// back to `Type::Json`, which is what makes the type a fixed point.
    pub fn json_expanded() -> Type {
        Type::Sum(vec![
            Type::unit(),                                                 // null
            Type::Bit,                                                    // bool
            Type::string(),                                               // number, decimal text
            Type::string(),                                               // string
            Type::list_of(Type::Json),                                    // array
            Type::list_of(Type::Product(vec![Type::string(), Type::Json])), // object
        ])
    }

    /// Exact width in bits of the marshalled (root) form.
    pub fn width_bits(&self) -> u32 {
        match self {
            Type::Bit => 1,
            Type::Bits(n) => *n,
            _ => self.width_bytes() as u32 * 8,
        }
    }

    /// Width in bytes of the marshalled (root) form. Sub-byte widths round
    /// up: a lone `Bit` occupies one zero-padded byte.
    pub fn width_bytes(&self) -> usize {
        match self {
            Type::Bit => 1,
            Type::Bits(n) => (*n as usize).div_ceil(8),
            Type::Bytes(n) => *n as usize,
            Type::Sum(variants) => {
                let widest = variants.iter().map(Type::width_bytes).max().unwrap_or(0);
                1 + widest
            }
            Type::Product(fields) => fields.iter().map(Type::width_bytes).sum(),
            Type::List(_) => REF_BYTES + 4,
            Type::Port(_) => 32,
            Type::Lambda => REF_BYTES,
            Type::Any => ANY_VALUE_BYTES,
            Type::Json => Type::json_expanded().width_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_widths() {
        assert_eq!(Type::Bit.width_bits(), 1);
        assert_eq!(Type::Bits(32).width_bits(), 32);
        assert_eq!(Type::Bytes(16).width_bits(), 128);
        assert_eq!(Type::unit().width_bits(), 0);
        assert_eq!(Type::Any.width_bits(), ANY_VALUE_BITS);
        assert_eq!(Type::string().width_bytes(), 40);
    }

    #[test]
    fn sum_width_is_tag_plus_widest() {
        let t = Type::Sum(vec![Type::unit(), Type::Bits(32), Type::Bytes(16)]);
        assert_eq!(t.width_bytes(), 1 + 16);
    }

    #[test]
    fn product_width_is_field_sum() {
        let t = Type::Product(vec![Type::Bits(64), Type::Bits(32)]);
        assert_eq!(t.width_bytes(), 12);
        assert_eq!(t.width_bits(), 96);
    }

    #[test]
    fn json_width_is_finite() {
        // The fixed point must not recurse through width computation:
        // Array and Object are lists, which are refs.
        assert_eq!(Type::Json.width_bytes(), 1 + 40);
    }
}
