//! Ephemeral evaluator processes.
//!
//! A process is one VM plus one staging store, alive for the span of a
//! `do_in_process` call. Spawning takes the next proc id and a namespace
//! snapshot in a single transaction, then overlays one device port per
//! configured key under a fresh random identity. Results are persisted
//! into the staging store before they are handed back, so a cancelled
//! process can never publish.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::params;

use isopod_blobs::{create_store, drop_store, Db, StoreHandle};
use isopod_value::{AnyValue, MemBlobStore, Type, Value};
use isopod_vm::{Lazy, Vm};
use tracing::debug;

use crate::config::{DeviceSpec, PodConfig};
use crate::devices::{cell, clock, console, net, random, PodCore};
use crate::devices::console::ConsoleWriter;
use crate::devices::net::NetworkNode;
use crate::{Error, Result};

pub struct Process {
    proc_id: i64,
    staging_id: i64,
    scratch: MemBlobStore,
    vm: Vm,
    // Mirror of everything bound into the VM, device ports included.
    ns: BTreeMap<String, AnyValue>,
    core: Arc<PodCore>,
}

impl Process {
    /// Spawn: allocate the next proc id and a staging store, snapshot the
    /// namespace, overlay devices.
    pub(crate) fn new(
        core: Arc<PodCore>,
        config: &PodConfig,
        console: ConsoleWriter,
        nodes: &BTreeMap<u32, Arc<NetworkNode>>,
    ) -> Result<Process> {
        let (proc_id, staging_id, snapshot) = core.db.with_tx(|tx| {
            tx.execute(
                "UPDATE pods SET last_proc_id = last_proc_id + 1 WHERE id = ?1",
                params![core.pod_id],
            )?;
            let proc_id: i64 = tx.query_row(
                "SELECT last_proc_id FROM pods WHERE id = ?1",
                params![core.pod_id],
                |row| row.get(0),
            )?;
            let staging_id = create_store(tx)?;
            let snapshot = crate::ns::all(tx, core.pod_id, core.store_id)?;
            Ok::<_, Error>((proc_id, staging_id, snapshot))
        })?;

        let mut vm = Vm::new();
        let mut ns = BTreeMap::new();
        for (k, v) in snapshot {
            vm.bind_ns(k.clone(), v.clone());
            ns.insert(k, v);
        }
        for (key, spec) in &config.devices {
            let identity: [u8; 32] = rand::random();
            let (ty, backend): (_, Box<dyn isopod_vm::PortBackend>) = match spec {
                DeviceSpec::Console => (
                    console::port_type(),
                    Box::new(console::ConsoleDevice::new(Arc::clone(&console))),
                ),
                DeviceSpec::Cell => (
                    cell::port_type(),
                    Box::new(cell::CellDevice::new(Arc::clone(&core), key.clone(), proc_id)),
                ),
                DeviceSpec::Wallclock => {
                    (clock::port_type(), Box::new(clock::WallClockDevice::new()))
                }
                DeviceSpec::Random => {
                    (random::port_type(), Box::new(random::RandomDevice::new()))
                }
                DeviceSpec::Network { key_index } => {
                    let node = nodes.get(key_index).ok_or_else(|| {
                        Error::InvalidConfig(format!("no node for key index {}", key_index))
                    })?;
                    (
                        net::port_type(),
                        Box::new(net::NodeDevice::new(
                            Arc::clone(node),
                            Arc::clone(&core),
                            proc_id,
                        )),
                    )
                }
            };
            let port = AnyValue::new(Type::port(ty.clone()), Value::Port(identity));
            vm.bind_ns(key.clone(), port.clone());
            ns.insert(key.clone(), port);
            vm.register_port(identity, ty, backend);
        }

        debug!(pod = core.pod_id, proc = proc_id, "process spawned");
        Ok(Process {
            proc_id,
            staging_id,
            scratch: MemBlobStore::new(),
            vm,
            ns,
            core,
        })
    }

    pub fn proc_id(&self) -> i64 {
        self.proc_id
    }

    /// The process's namespace as a `List(Product(String, Any))` value:
    /// the record conventionally passed as a lambda's first argument.
    pub fn ns_record(&self) -> AnyValue {
        let ty = Type::list_of(Type::Product(vec![Type::string(), Type::Any]));
        let items = self
            .ns
            .iter()
            .map(|(k, v)| {
                Value::Product(vec![
                    Value::BitList(k.as_bytes().to_vec()),
                    Value::Any(Box::new(v.clone())),
                ])
            })
            .collect();
        AnyValue::new(ty, Value::List(items))
    }

    /// Evaluate one expression to fixed point. The result is exported into
    /// the staging store inside a watermark-checked transaction before it
    /// is returned, so cancellation surfaces here even when every step of
    /// the walk was pure.
    pub fn eval(&mut self, expr: Lazy, max_steps: Option<u64>) -> Result<AnyValue> {
        self.vm.reset();
        self.vm
            .import_lazy(&mut self.scratch, Lazy::AsAny(Box::new(expr)))?;
        self.vm.set_eval();
        self.vm.run(&mut self.scratch, max_steps)?;

        let core = &self.core;
        let vm = &self.vm;
        let staging_id = self.staging_id;
        core.db.with_tx(|tx| {
            core.check_proc_alive(tx, self.proc_id)?;
            let mut staging = StoreHandle::new(tx, staging_id);
            vm.export_any(&mut staging)?;
            Ok::<_, Error>(())
        })?;

        let out = self
            .vm
            .result()
            .cloned()
            .ok_or(Error::Vm(isopod_vm::VmError::Empty("result")))?;
        match out.value {
            Value::Any(inner) => Ok(*inner),
            _ => Ok(out),
        }
    }

    /// Steps consumed by the last evaluation.
    pub fn steps(&self) -> u64 {
        self.vm.steps()
    }

    /// Tear down the staging store. Runs on every exit path, cancelled or
    /// not.
    pub(crate) fn stop(self, db: &Db) -> Result<()> {
        db.with_tx(|tx| {
            drop_store(tx, self.staging_id)?;
            Ok::<_, Error>(())
        })?;
        debug!(pod = self.core.pod_id, proc = self.proc_id, "process stopped");
        Ok(())
    }
}
