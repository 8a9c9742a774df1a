//! Lazy expressions.
//!
//! The expression form a caller hands to `DoInProcess`. Serialisable, so a
//! lambda can live in a blob and round-trip through the namespace.

use serde::{Deserialize, Serialize};

use isopod_value::{AnyValue, Type, Value};

/// An unevaluated expression.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Lazy {
    /// An immediate value.
    Const(AnyValue),
    /// Look up a key in the overlaid namespace snapshot.
    Ns(String),
    /// The i-th argument of the enclosing application.
    Arg(u32),
    /// Build a product from components.
    Tuple(Vec<Lazy>),
    /// Project a product field.
    Field(Box<Lazy>, u32),
    /// Build one variant of a sum type.
    Inject {
        ty: Type,
        tag: u8,
        value: Box<Lazy>,
    },
    /// Apply a lambda to arguments.
    Apply(Box<Lazy>, Vec<Lazy>),
    /// Read the port's input channel.
    Input(Box<Lazy>),
    /// Write a value to the port's output channel.
    Output(Box<Lazy>, Box<Lazy>),
    /// Send a request, yield the response.
    Interact(Box<Lazy>, Box<Lazy>),
    /// Coerce the result to a self-describing `AnyValue`.
    AsAny(Box<Lazy>),
}

impl Lazy {
    pub fn constant(ty: Type, value: Value) -> Lazy {
        Lazy::Const(AnyValue::new(ty, value))
    }

    /// Serialize an expression body into a `Lambda` value, ready to be put
    /// into a namespace.
    pub fn into_lambda_value(self) -> AnyValue {
        let body = serde_json::to_vec(&self).expect("lazy expressions always serialize");
        AnyValue::new(Type::Lambda, Value::Lambda(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_value_round_trips_through_serde() {
        let lam = Lazy::Tuple(vec![Lazy::Arg(1), Lazy::Arg(0)]).into_lambda_value();
        let Value::Lambda(body) = &lam.value else {
            panic!("not a lambda value");
        };
        let back: Lazy = serde_json::from_slice(body).unwrap();
        assert!(matches!(back, Lazy::Tuple(ref xs) if xs.len() == 2));
    }
}
