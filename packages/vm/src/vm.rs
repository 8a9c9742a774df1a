//! The virtual machine.
//!
//! A `Vm` owns a port table and a namespace snapshot, both bound once per
//! process, and evaluates one imported expression at a time. Evaluation is
//! a synchronous tree-walk; the step counter charges one step per node and
//! enforces an optional budget.

use std::collections::BTreeMap;

use isopod_value::{marshal, marshal_any_root, AnyValue, BlobStore, PortType, Type, Value};

use crate::error::VmError;
use crate::lazy::Lazy;
use crate::port::{bytes_to_words, word_len, words_to_bytes, PortBackend};
use crate::Result;

struct PortEntry {
    ty: PortType,
    backend: Box<dyn PortBackend>,
}

/// An evaluator instance, owned by exactly one process.
#[derive(Default)]
pub struct Vm {
    ports: BTreeMap<[u8; 32], PortEntry>,
    ns: BTreeMap<String, AnyValue>,
    program: Option<Lazy>,
    result: Option<AnyValue>,
    steps: u64,
    eval_pending: bool,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear program state. Ports and the namespace snapshot survive; they
    /// are per-process, not per-evaluation.
    pub fn reset(&mut self) {
        self.program = None;
        self.result = None;
        self.steps = 0;
        self.eval_pending = false;
    }

    /// Register a device backend under a port identity.
    pub fn register_port(&mut self, identity: [u8; 32], ty: PortType, backend: Box<dyn PortBackend>) {
        self.ports.insert(identity, PortEntry { ty, backend });
    }

    /// Bind a namespace key for `Lazy::Ns` lookups.
    pub fn bind_ns(&mut self, key: String, value: AnyValue) {
        self.ns.insert(key, value);
    }

    /// Load an expression, pulling every constant's blobs into the staging
    /// store so evaluation never reaches outside it.
    pub fn import_lazy(&mut self, store: &mut dyn BlobStore, lazy: Lazy) -> Result<()> {
        pull_constants(&lazy, store)?;
        self.program = Some(lazy);
        self.result = None;
        self.steps = 0;
        Ok(())
    }

    /// Arm the imported program for the next `run`.
    pub fn set_eval(&mut self) {
        self.eval_pending = self.program.is_some();
    }

    /// Evaluate to fixed point. Returns the step count.
    pub fn run(&mut self, store: &mut dyn BlobStore, max_steps: Option<u64>) -> Result<u64> {
        if !self.eval_pending {
            return Err(VmError::Empty("armed program"));
        }
        self.eval_pending = false;
        let program = self.program.clone().ok_or(VmError::Empty("program"))?;
        let mut walk = Walk {
            vm: self,
            store,
            max_steps,
        };
        let out = walk.eval(&program, &[])?;
        self.result = Some(out);
        Ok(self.steps)
    }

    /// Steps consumed by the last `run`.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The evaluation result, if any.
    pub fn result(&self) -> Option<&AnyValue> {
        self.result.as_ref()
    }

    /// Marshal the result's `AnyValue` root into `store`, posting every
    /// blob it reaches. Returns the fixed-width root bytes.
    pub fn export_any(&self, store: &mut dyn BlobStore) -> Result<Vec<u8>> {
        let result = self.result.as_ref().ok_or(VmError::Empty("result"))?;
        Ok(marshal_any_root(result, store)?)
    }
}

/// Marshal every `Const` in the expression into the staging store.
fn pull_constants(lazy: &Lazy, store: &mut dyn BlobStore) -> Result<()> {
    match lazy {
        Lazy::Const(any) => {
            marshal_any_root(any, store)?;
        }
        Lazy::Ns(_) | Lazy::Arg(_) => {}
        Lazy::Tuple(xs) => {
            for x in xs {
                pull_constants(x, store)?;
            }
        }
        Lazy::Field(e, _) | Lazy::Inject { value: e, .. } | Lazy::Input(e) | Lazy::AsAny(e) => {
            pull_constants(e, store)?
        }
        Lazy::Output(a, b) | Lazy::Interact(a, b) => {
            pull_constants(a, store)?;
            pull_constants(b, store)?;
        }
        Lazy::Apply(f, args) => {
            pull_constants(f, store)?;
            for a in args {
                pull_constants(a, store)?;
            }
        }
    }
    Ok(())
}

struct Walk<'a> {
    vm: &'a mut Vm,
    store: &'a mut dyn BlobStore,
    max_steps: Option<u64>,
}

impl Walk<'_> {
    fn step(&mut self) -> Result<()> {
        self.vm.steps += 1;
        if let Some(max) = self.max_steps {
            if self.vm.steps > max {
                return Err(VmError::StepLimit(max));
            }
        }
        Ok(())
    }

    fn eval(&mut self, lazy: &Lazy, args: &[AnyValue]) -> Result<AnyValue> {
        self.step()?;
        match lazy {
            Lazy::Const(any) => Ok(any.clone()),
            Lazy::Ns(key) => self
                .vm
                .ns
                .get(key)
                .cloned()
                .ok_or_else(|| VmError::UnboundKey(key.clone())),
            Lazy::Arg(i) => args
                .get(*i as usize)
                .cloned()
                .ok_or(VmError::ArgOutOfRange(*i)),
            Lazy::Tuple(xs) => {
                let mut tys = Vec::with_capacity(xs.len());
                let mut vals = Vec::with_capacity(xs.len());
                for x in xs {
                    let any = self.eval(x, args)?;
                    tys.push(any.ty);
                    vals.push(any.value);
                }
                Ok(AnyValue::new(Type::Product(tys), Value::Product(vals)))
            }
            Lazy::Field(e, i) => {
                let any = self.eval(e, args)?;
                let (Type::Product(tys), Value::Product(vals)) = (any.ty, any.value) else {
                    return Err(VmError::IllTyped("field projection on non-product".into()));
                };
                let i = *i as usize;
                if i >= vals.len() {
                    return Err(VmError::IllTyped(format!(
                        "field {} of {}-tuple",
                        i,
                        vals.len()
                    )));
                }
                Ok(AnyValue::new(tys[i].clone(), vals[i].clone()))
            }
            Lazy::Inject { ty, tag, value } => {
                let inner = self.eval(value, args)?;
                let out = Value::Sum {
                    tag: *tag,
                    value: Box::new(inner.value),
                };
                if !ty.contains(&out) {
                    return Err(VmError::IllTyped(format!("inject tag {} mismatch", tag)));
                }
                Ok(AnyValue::new(ty.clone(), out))
            }
            Lazy::Apply(f, arg_exprs) => {
                let f = self.eval(f, args)?;
                let Value::Lambda(body) = f.value else {
                    return Err(VmError::NotAFunction(format!("{:?}", f.ty)));
                };
                let body: Lazy = serde_json::from_slice(&body)
                    .map_err(|e| VmError::MalformedLambda(e.to_string()))?;
                let mut bound = Vec::with_capacity(arg_exprs.len());
                for a in arg_exprs {
                    bound.push(self.eval(a, args)?);
                }
                self.eval(&body, &bound)
            }
            Lazy::Input(p) => {
                let (identity, ty) = self.eval_port(p, args)?;
                let width = ty.input.width_bits();
                let mut buf = vec![0u32; word_len(width)];
                let entry = self.vm.ports.get(&identity).ok_or(VmError::UnknownPort)?;
                entry.backend.input(self.store, &mut buf)?;
                let bytes = words_to_bytes(&buf);
                let value = isopod_value::load(&ty.input, &bytes, self.store)?;
                Ok(AnyValue::new(ty.input, value))
            }
            Lazy::Output(p, v) => {
                let (identity, ty) = self.eval_port(p, args)?;
                let out = self.eval(v, args)?;
                let bytes = marshal(&out.value, &ty.output, self.store)?;
                let buf = bytes_to_words(&bytes);
                let entry = self.vm.ports.get(&identity).ok_or(VmError::UnknownPort)?;
                entry.backend.output(self.store, &buf)?;
                Ok(AnyValue::new(Type::unit(), Value::unit()))
            }
            Lazy::Interact(p, req) => {
                let (identity, ty) = self.eval_port(p, args)?;
                let req = self.eval(req, args)?;
                let req_bytes = marshal(&req.value, &ty.request, self.store)?;
                // One buffer sized for whichever direction is wider.
                let words = word_len(ty.request.width_bits())
                    .max(word_len(ty.response.width_bits()));
                let mut buf = vec![0u32; words];
                let req_words = bytes_to_words(&req_bytes);
                buf[..req_words.len()].copy_from_slice(&req_words);
                let entry = self.vm.ports.get(&identity).ok_or(VmError::UnknownPort)?;
                entry.backend.interact(self.store, &mut buf)?;
                let bytes = words_to_bytes(&buf);
                let value = isopod_value::load(&ty.response, &bytes, self.store)?;
                Ok(AnyValue::new(ty.response, value))
            }
            Lazy::AsAny(e) => {
                let inner = self.eval(e, args)?;
                Ok(AnyValue::new(Type::Any, Value::Any(Box::new(inner))))
            }
        }
    }

    /// Evaluate an expression to a port identity and fetch its type from
    /// the table. The type on the value is advisory; the table is the
    /// authority.
    fn eval_port(&mut self, p: &Lazy, args: &[AnyValue]) -> Result<([u8; 32], PortType)> {
        let any = self.eval(p, args)?;
        let Value::Port(identity) = any.value else {
            return Err(VmError::IllTyped("port operation on non-port".into()));
        };
        let entry = self.vm.ports.get(&identity).ok_or(VmError::UnknownPort)?;
        Ok((identity, entry.ty.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PortError;
    use isopod_value::MemBlobStore;

    fn run(vm: &mut Vm, lazy: Lazy) -> Result<AnyValue> {
        let mut store = MemBlobStore::new();
        vm.reset();
        vm.import_lazy(&mut store, lazy)?;
        vm.set_eval();
        vm.run(&mut store, None)?;
        Ok(vm.result().unwrap().clone())
    }

    #[test]
    fn constants_evaluate_to_themselves() {
        let mut vm = Vm::new();
        let out = run(&mut vm, Lazy::constant(Type::Bits(32), Value::b32(7))).unwrap();
        assert_eq!(out.value, Value::b32(7));
        assert_eq!(vm.steps(), 1);
    }

    #[test]
    fn ns_lookup_uses_the_snapshot() {
        let mut vm = Vm::new();
        vm.bind_ns("a".into(), AnyValue::new(Type::Bits(32), Value::b32(9)));
        let out = run(&mut vm, Lazy::Ns("a".into())).unwrap();
        assert_eq!(out.value, Value::b32(9));
        assert!(matches!(
            run(&mut vm, Lazy::Ns("missing".into())),
            Err(VmError::UnboundKey(_))
        ));
    }

    #[test]
    fn tuple_and_field() {
        let mut vm = Vm::new();
        let out = run(
            &mut vm,
            Lazy::Field(
                Box::new(Lazy::Tuple(vec![
                    Lazy::constant(Type::Bits(32), Value::b32(1)),
                    Lazy::constant(Type::string(), Value::string("x")),
                ])),
                1,
            ),
        )
        .unwrap();
        assert_eq!(out.ty, Type::string());
        assert_eq!(out.value, Value::string("x"));
    }

    #[test]
    fn lambda_application_binds_args() {
        let mut vm = Vm::new();
        vm.bind_ns(
            "second".into(),
            Lazy::Arg(1).into_lambda_value(),
        );
        let out = run(
            &mut vm,
            Lazy::Apply(
                Box::new(Lazy::Ns("second".into())),
                vec![
                    Lazy::constant(Type::Bits(32), Value::b32(1)),
                    Lazy::constant(Type::Bits(32), Value::b32(2)),
                ],
            ),
        )
        .unwrap();
        assert_eq!(out.value, Value::b32(2));
    }

    #[test]
    fn step_limit_is_enforced() {
        let mut vm = Vm::new();
        let wide = Lazy::Tuple(
            (0..100)
                .map(|i| Lazy::constant(Type::Bits(32), Value::b32(i)))
                .collect(),
        );
        let mut store = MemBlobStore::new();
        vm.import_lazy(&mut store, wide).unwrap();
        vm.set_eval();
        assert!(matches!(
            vm.run(&mut store, Some(10)),
            Err(VmError::StepLimit(10))
        ));
    }

    /// A port that echoes its request back, bit-inverted.
    struct InvertPort;

    impl PortBackend for InvertPort {
        fn interact(&self, _store: &mut dyn BlobStore, buf: &mut [u32]) -> std::result::Result<(), PortError> {
            for w in buf.iter_mut() {
                *w = !*w;
            }
            Ok(())
        }
    }

    fn b32_port() -> PortType {
        PortType {
            input: Type::unit(),
            output: Type::unit(),
            request: Type::Bits(32),
            response: Type::Bits(32),
        }
    }

    #[test]
    fn interact_round_trips_through_words() {
        let mut vm = Vm::new();
        let identity = [3u8; 32];
        let ty = b32_port();
        vm.register_port(identity, ty.clone(), Box::new(InvertPort));
        let port = Lazy::constant(Type::port(ty), Value::Port(identity));
        let out = run(
            &mut vm,
            Lazy::Interact(
                Box::new(port),
                Box::new(Lazy::constant(Type::Bits(32), Value::b32(0x00ff_00ff))),
            ),
        )
        .unwrap();
        assert_eq!(out.value, Value::b32(0xff00_ff00));
    }

    #[test]
    fn unknown_port_is_an_error() {
        let mut vm = Vm::new();
        let ty = b32_port();
        let port = Lazy::constant(Type::port(ty), Value::Port([9u8; 32]));
        assert!(matches!(
            run(&mut vm, Lazy::Input(Box::new(port))),
            Err(VmError::UnknownPort)
        ));
    }

    #[test]
    fn as_any_wraps_the_result() {
        let mut vm = Vm::new();
        let out = run(
            &mut vm,
            Lazy::AsAny(Box::new(Lazy::constant(Type::Bits(32), Value::b32(5)))),
        )
        .unwrap();
        assert_eq!(out.ty, Type::Any);
        let Value::Any(inner) = out.value else {
            panic!("not wrapped");
        };
        assert_eq!(inner.value, Value::b32(5));
    }

    #[test]
    fn export_import_through_a_store() {
        let mut vm = Vm::new();
        let mut store = MemBlobStore::new();
        vm.import_lazy(
            &mut store,
            Lazy::constant(Type::string(), Value::string("exported")),
        )
        .unwrap();
        vm.set_eval();
        vm.run(&mut store, None).unwrap();
        let root = vm.export_any(&mut store).unwrap();
        let back = isopod_value::load_any_root(&root, &mut store).unwrap();
        assert!(back.value.structural_eq(&Value::string("exported")));
    }
}
