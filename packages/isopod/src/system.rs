//! The system: every pod in one database.
//!
//! A `System` owns the SQLite handle, the tokio runtime the node tasks
//! run on, the wrap key for pod secrets, and a cache of open pods. The
//! database is the source of truth; the cache is rebuilt lazily whenever
//! it might be stale.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{params, OptionalExtension};
use tokio::runtime::Runtime;
use tracing::info;

use isopod_blobs::{create_store, drop_store, Db};
use isopod_transport::PeerId;

use crate::book::AddressBook;
use crate::pod::{Pod, PodEnv};
use crate::secret::{derive_wrap_key, wrap_secret};
use crate::{Error, Result};

/// How to stand a system up.
pub struct SystemConfig {
    /// Database file; in-memory when absent.
    pub db_path: Option<PathBuf>,
    /// Operator key material; the pod wrap key is derived from it.
    pub key_material: String,
    /// Console sink for every pod; stdout when absent.
    pub console: Option<Box<dyn Write + Send>>,
    /// Address node sockets bind on.
    pub net_bind: IpAddr,
    /// Inbound queue depth per node; datagrams beyond it are shed.
    pub inbound_queue: usize,
}

impl SystemConfig {
    pub fn new(key_material: &str) -> Self {
        SystemConfig {
            db_path: None,
            key_material: key_material.to_owned(),
            console: None,
            net_bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            inbound_queue: 1,
        }
    }

    pub fn on_disk(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }

    pub fn with_console(mut self, w: Box<dyn Write + Send>) -> Self {
        self.console = Some(w);
        self
    }

    pub fn with_inbound_queue(mut self, depth: usize) -> Self {
        self.inbound_queue = depth;
        self
    }
}

struct PodsCache {
    map: BTreeMap<i64, Arc<Pod>>,
    stale: bool,
}

pub struct System {
    wrap_key: [u8; 32],
    env: Arc<PodEnv>,
    pods: Mutex<PodsCache>,
    // Dropped last; node tasks live on it.
    _runtime: Runtime,
}

impl System {
    pub fn open(config: SystemConfig) -> Result<System> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let db = match &config.db_path {
            Some(path) => Db::open(path)?,
            None => Db::open_in_memory()?,
        };
        let console = Arc::new(Mutex::new(
            config.console.unwrap_or_else(|| Box::new(std::io::stdout())),
        ));
        let env = Arc::new(PodEnv {
            db,
            console,
            book: Arc::new(AddressBook::new()),
            runtime: runtime.handle().clone(),
            net_bind: config.net_bind,
            inbound_queue: config.inbound_queue,
        });
        info!(on_disk = config.db_path.is_some(), "system open");
        Ok(System {
            wrap_key: derive_wrap_key(&config.key_material),
            env,
            pods: Mutex::new(PodsCache {
                map: BTreeMap::new(),
                stale: true,
            }),
            _runtime: runtime,
        })
    }

    /// Create a pod with a fresh wrapped secret and an empty namespace.
    pub fn create(&self) -> Result<Arc<Pod>> {
        let secret: [u8; 32] = rand::random();
        let wrapped = wrap_secret(&self.wrap_key, &secret);
        let pod_id = self.env.db.with_tx(|tx| {
            let store_id = create_store(tx)?;
            tx.execute(
                "INSERT INTO pods (store_id, secret) VALUES (?1, ?2)",
                params![store_id, wrapped],
            )?;
            Ok::<_, Error>(tx.last_insert_rowid())
        })?;
        let pod = Pod::open(Arc::clone(&self.env), &self.wrap_key, pod_id)?;
        let mut pods = self.pods.lock().expect("pods poisoned");
        pods.map.insert(pod_id, Arc::clone(&pod));
        pods.stale = true;
        info!(pod = pod_id, "pod created");
        Ok(pod)
    }

    /// Look up an open pod, reloading from the database when the cache is
    /// stale.
    pub fn get(&self, pod_id: i64) -> Result<Arc<Pod>> {
        let mut pods = self.pods.lock().expect("pods poisoned");
        self.reload(&mut pods)?;
        pods.map
            .get(&pod_id)
            .cloned()
            .ok_or(Error::PodNotFound(pod_id))
    }

    /// Every pod id, in order.
    pub fn list(&self) -> Result<Vec<i64>> {
        let mut pods = self.pods.lock().expect("pods poisoned");
        self.reload(&mut pods)?;
        Ok(pods.map.keys().copied().collect())
    }

    /// Destroy a pod: cancel its processes, stop its nodes, drop its store
    /// and every row it owns.
    pub fn drop_pod(&self, pod_id: i64) -> Result<()> {
        let removed = {
            let mut pods = self.pods.lock().expect("pods poisoned");
            pods.stale = true;
            pods.map.remove(&pod_id)
        };
        if let Some(pod) = removed {
            pod.shutdown()?;
        }
        self.env.db.with_tx(|tx| {
            let store_id: Option<i64> = tx
                .query_row(
                    "SELECT store_id FROM pods WHERE id = ?1",
                    params![pod_id],
                    |row| row.get(0),
                )
                .optional()?;
            let store_id = store_id.ok_or(Error::PodNotFound(pod_id))?;
            drop_store(tx, store_id)?;
            tx.execute("DELETE FROM pod_ns WHERE pod_id = ?1", params![pod_id])?;
            tx.execute("DELETE FROM pods WHERE id = ?1", params![pod_id])?;
            Ok::<_, Error>(())
        })?;
        info!(pod = pod_id, "pod dropped");
        Ok(())
    }

    /// Record that `peer` can be reached at `addr`.
    pub fn add_loc(&self, peer: PeerId, addr: SocketAddr) {
        self.env.book.add(peer, addr);
    }

    /// Every known address for `peer`. Local nodes register themselves on
    /// spawn, so same-system peers are always resolvable.
    pub fn where_is(&self, peer: &PeerId) -> Vec<SocketAddr> {
        self.env.book.where_is(peer)
    }

    fn reload(&self, pods: &mut PodsCache) -> Result<()> {
        if !pods.stale {
            return Ok(());
        }
        let ids: Vec<i64> = self.env.db.with(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM pods ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()
                .map_err(Error::from)
        })?;
        let live: std::collections::BTreeSet<i64> = ids.iter().copied().collect();
        pods.map.retain(|id, _| live.contains(id));
        for id in ids {
            if !pods.map.contains_key(&id) {
                let pod = Pod::open(Arc::clone(&self.env), &self.wrap_key, id)?;
                pods.map.insert(id, pod);
            }
        }
        pods.stale = false;
        Ok(())
    }
}

impl Drop for System {
    fn drop(&mut self) {
        let pods = self.pods.lock().expect("pods poisoned");
        for pod in pods.map.values() {
            let _ = pod.shutdown();
        }
    }
}
