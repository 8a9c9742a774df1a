//! JSON invocation.
//!
//! The outward-facing call surface: a namespace key naming a lambda, a
//! JSON document in, a JSON document out. The lambda is applied to the
//! process's namespace record and the encoded input, evaluated in a fresh
//! process under a step budget.

use isopod_value::{json_decode, json_encode, Type};
use isopod_vm::Lazy;

use crate::pod::Pod;
use crate::Result;

/// Step budget for one invocation.
pub const MAX_INVOKE_STEPS: u64 = 1 << 20;

impl Pod {
    /// Apply the lambda bound at `key` to `(namespace record, input)`.
    pub fn invoke_json(&self, key: &str, input: &serde_json::Value) -> Result<serde_json::Value> {
        let key = key.to_owned();
        let input = json_encode(input);
        self.do_in_process(move |proc| {
            let expr = Lazy::Apply(
                Box::new(Lazy::Ns(key)),
                vec![
                    Lazy::Const(proc.ns_record()),
                    Lazy::constant(Type::Json, input),
                ],
            );
            let out = proc.eval(expr, Some(MAX_INVOKE_STEPS))?;
            Ok(json_decode(&out.value)?)
        })
    }
}
