//! Pods.
//!
//! A pod is a store, a namespace, a wrapped secret, and a device map. All
//! durable state lives in SQLite; the in-memory `Pod` is a handle that
//! caches the unwrapped secret and runs the pod's network nodes. Opening a
//! pod advances the dead watermark past every proc id handed out in a
//! previous life, so nothing stale can ever write again.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use rusqlite::params;
use tokio::runtime::Handle;
use tracing::info;

use isopod_blobs::Db;
use isopod_transport::PeerId;
use isopod_value::{AnyValue, Type, Value};

use crate::book::AddressBook;
use crate::config::{DeviceSpec, PodConfig};
use crate::devices::console::ConsoleWriter;
use crate::devices::net::NetworkNode;
use crate::devices::{cell, clock, console, net, random, PodCore};
use crate::process::Process;
use crate::secret::unwrap_secret;
use crate::{ns, Error, Result};

/// What every pod shares: the database and the system-level services.
pub(crate) struct PodEnv {
    pub db: Db,
    pub console: ConsoleWriter,
    pub book: Arc<AddressBook>,
    pub runtime: Handle,
    pub net_bind: IpAddr,
    pub inbound_queue: usize,
}

pub struct Pod {
    id: i64,
    secret: [u8; 32],
    core: Arc<PodCore>,
    env: Arc<PodEnv>,
    config: Mutex<PodConfig>,
    nodes: Mutex<BTreeMap<u32, Arc<NetworkNode>>>,
}

impl Pod {
    /// Open a pod from its row: cancel every process of the previous life,
    /// unwrap the secret, and bring the configured nodes up.
    pub(crate) fn open(env: Arc<PodEnv>, wrap_key: &[u8; 32], pod_id: i64) -> Result<Arc<Pod>> {
        let (store_id, wrapped, config_json) = env.db.with_tx(|tx| {
            let n = tx.execute(
                "UPDATE pods SET dead_lteq = last_proc_id WHERE id = ?1",
                params![pod_id],
            )?;
            if n == 0 {
                return Err(Error::PodNotFound(pod_id));
            }
            tx.query_row(
                "SELECT store_id, secret, config FROM pods WHERE id = ?1",
                params![pod_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(Error::from)
        })?;

        let secret = unwrap_secret(wrap_key, &wrapped)?;
        let config = PodConfig::from_json(&config_json)?;
        let core = Arc::new(PodCore {
            db: env.db.clone(),
            pod_id,
            store_id,
        });
        let pod = Pod {
            id: pod_id,
            secret,
            core,
            env,
            config: Mutex::new(config),
            nodes: Mutex::new(BTreeMap::new()),
        };
        pod.reset_network()?;
        info!(pod = pod_id, "pod open");
        Ok(Arc::new(pod))
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn config(&self) -> PodConfig {
        self.config.lock().expect("config poisoned").clone()
    }

    /// Bind `key` to `any`, pulling its blobs into the pod store.
    pub fn put(&self, key: &str, any: &AnyValue) -> Result<()> {
        let core = &self.core;
        self.env
            .db
            .with_tx(|tx| ns::put(tx, core.pod_id, core.store_id, key, any))
    }

    /// Read `key`, or `None` when unbound.
    pub fn get(&self, key: &str) -> Result<Option<AnyValue>> {
        let core = &self.core;
        self.env
            .db
            .with(|conn| ns::get(conn, core.pod_id, core.store_id, key))
    }

    /// Atomic compare-and-swap on `key`; returns whichever value won.
    pub fn cas(&self, key: &str, prev: &AnyValue, next: &AnyValue) -> Result<AnyValue> {
        let core = &self.core;
        self.env
            .db
            .with_tx(|tx| ns::cas(tx, core.pod_id, core.store_id, key, prev, next))
    }

    /// Snapshot the user-visible namespace: every persistent binding, with
    /// a device handle overlaid per configured key, the way a process
    /// would see it.
    pub fn get_all(&self) -> Result<BTreeMap<String, AnyValue>> {
        let core = &self.core;
        let mut all = self
            .env
            .db
            .with(|conn| ns::all(conn, core.pod_id, core.store_id))?;
        for (key, spec) in &self.config().devices {
            let ty = match spec {
                DeviceSpec::Console => console::port_type(),
                DeviceSpec::Cell => cell::port_type(),
                DeviceSpec::Wallclock => clock::port_type(),
                DeviceSpec::Random => random::port_type(),
                DeviceSpec::Network { .. } => net::port_type(),
            };
            let identity: [u8; 32] = rand::random();
            all.insert(
                key.clone(),
                AnyValue::new(Type::port(ty), Value::Port(identity)),
            );
        }
        Ok(all)
    }

    /// Cancel every outstanding process: any proc id handed out so far is
    /// now at or below the dead watermark. Nodes are nudged after the
    /// watermark commits so a receive parked on an idle queue wakes up and
    /// fails its aliveness check.
    pub fn cancel_procs(&self) -> Result<()> {
        self.env.db.with_tx(|tx| {
            tx.execute(
                "UPDATE pods SET dead_lteq = last_proc_id WHERE id = ?1",
                params![self.id],
            )?;
            Ok::<_, Error>(())
        })?;
        for node in self.nodes.lock().expect("nodes poisoned").values() {
            node.nudge();
        }
        Ok(())
    }

    /// Replace the namespace and device map.
    ///
    /// Outstanding processes are cancelled first. `entries` become the new
    /// bindings, except that a key configured as a cell keeps its old
    /// value when it had one; cells are the pod's durable state and a
    /// reconfigure must not wipe them.
    pub fn reset(&self, config: PodConfig, entries: &BTreeMap<String, AnyValue>) -> Result<()> {
        config.validate()?;
        self.cancel_procs()?;

        let core = &self.core;
        self.env.db.with_tx(|tx| {
            let old = ns::all(tx, core.pod_id, core.store_id)?;
            ns::clear(tx, core.pod_id)?;
            for (key, any) in entries {
                ns::put(tx, core.pod_id, core.store_id, key, any)?;
            }
            for (key, spec) in &config.devices {
                if *spec == DeviceSpec::Cell {
                    if let Some(kept) = old.get(key) {
                        ns::put(tx, core.pod_id, core.store_id, key, kept)?;
                    }
                }
            }
            tx.execute(
                "UPDATE pods SET config = ?1 WHERE id = ?2",
                params![config.to_json(), self.id],
            )?;
            Ok::<_, Error>(())
        })?;

        *self.config.lock().expect("config poisoned") = config;
        self.reset_network()?;
        info!(pod = self.id, "pod reset");
        Ok(())
    }

    /// Restart the pod's nodes to match the configured key indices.
    fn reset_network(&self) -> Result<()> {
        let config = self.config();
        let mut nodes = self.nodes.lock().expect("nodes poisoned");
        for node in nodes.values() {
            node.stop();
        }
        nodes.clear();
        for spec in config.devices.values() {
            let DeviceSpec::Network { key_index } = spec else {
                continue;
            };
            if nodes.contains_key(key_index) {
                continue;
            }
            let node = NetworkNode::spawn(
                &self.secret,
                *key_index,
                self.env.net_bind,
                self.env.inbound_queue,
                &self.env.runtime,
                &self.env.book,
            )?;
            nodes.insert(*key_index, node);
        }
        Ok(())
    }

    /// Run `f` inside a fresh process. The staging store is torn down on
    /// every exit path; `f`'s error wins over teardown's.
    pub fn do_in_process<T>(&self, f: impl FnOnce(&mut Process) -> Result<T>) -> Result<T> {
        let (config, nodes) = {
            let config = self.config.lock().expect("config poisoned").clone();
            let nodes = self.nodes.lock().expect("nodes poisoned").clone();
            (config, nodes)
        };
        let mut proc = Process::new(
            Arc::clone(&self.core),
            &config,
            Arc::clone(&self.env.console),
            &nodes,
        )?;
        let out = f(&mut proc);
        let teardown = proc.stop(&self.env.db);
        match (out, teardown) {
            (Ok(t), Ok(())) => Ok(t),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Live node endpoints, keyed by key index.
    pub fn node_addrs(&self) -> BTreeMap<u32, (PeerId, SocketAddr)> {
        self.nodes
            .lock()
            .expect("nodes poisoned")
            .iter()
            .map(|(i, n)| (*i, (n.peer(), n.local_addr())))
            .collect()
    }

    /// Stop nodes and cancel processes; the durable state stays put.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.cancel_procs()?;
        let mut nodes = self.nodes.lock().expect("nodes poisoned");
        for node in nodes.values() {
            node.stop();
        }
        nodes.clear();
        Ok(())
    }
}
