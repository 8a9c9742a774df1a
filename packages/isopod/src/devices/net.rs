//! The network node device.
//!
//! A node is an authenticated UDP endpoint whose Ed25519 identity is
//! derived from the pod secret and the configured key index. The receive
//! loop runs on the system runtime and feeds a bounded inbound queue;
//! when the queue is full, new datagrams are shed at the handler. Device
//! handlers are synchronous and bridge onto the runtime with `block_on`.
//!
//! `interact` is a four-way request sum: receive one message (blocking),
//! tell a peer, sign a value under the node key, verify a signature.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use isopod_transport::{derive_node_key, Artifact, PeerId, Transport, TransportError};
use isopod_value::{marshal_any_root, AnyValue, BlobStore, NullStore, PortType, Type, Value};
use isopod_vm::{PortBackend, PortError};

use crate::book::AddressBook;
use crate::devices::{read_words, write_words, PodCore};
use crate::error::to_port_err;
use crate::Error;

const TAG_RECV: u8 = 0;
const TAG_TELL: u8 = 1;
const TAG_SIGN: u8 = 2;
const TAG_VERIFY: u8 = 3;

/// `Sum[v4: Bytes(4), v6: Bytes(16)]`.
pub fn ip_type() -> Type {
    Type::Sum(vec![Type::Bytes(4), Type::Bytes(16)])
}

/// `Product[ip, port: Bits(16)]`.
pub fn udp_addr_type() -> Type {
    Type::Product(vec![ip_type(), Type::Bits(16)])
}

/// `Product[peer: Bytes(32), udp_addr]`.
pub fn addr_type() -> Type {
    Type::Product(vec![Type::Bytes(32), udp_addr_type()])
}

/// `Product[addr, payload: Any]`.
pub fn message_type() -> Type {
    Type::Product(vec![addr_type(), Type::Any])
}

pub fn port_type() -> PortType {
    PortType {
        input: Type::Product(vec![addr_type()]),
        output: Type::unit(),
        request: Type::Sum(vec![
            Type::unit(),                              // recv
            message_type(),                            // tell
            Type::Any,                                 // sign
            Type::Product(vec![Type::Any, Type::Any]), // verify: (target, credential)
        ]),
        response: Type::Sum(vec![
            message_type(),  // recv
            Type::unit(),    // tell
            Type::Bytes(64), // sign
            Type::Bit,       // verify
        ]),
    }
}

/// An address value: who, and where they were seen.
pub fn addr_to_value(peer: PeerId, addr: SocketAddr) -> Value {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => Value::Sum {
            tag: 0,
            value: Box::new(Value::Bytes(v4.octets().to_vec())),
        },
        IpAddr::V6(v6) => Value::Sum {
            tag: 1,
            value: Box::new(Value::Bytes(v6.octets().to_vec())),
        },
    };
    Value::Product(vec![
        Value::Bytes(peer.0.to_vec()),
        Value::Product(vec![ip, Value::b16(addr.port())]),
    ])
}

/// Decode an address value back to `(peer, socket address)`.
pub fn value_to_addr(v: &Value) -> std::result::Result<(PeerId, SocketAddr), PortError> {
    let bad = || PortError::Invalid("malformed address value".into());
    let Value::Product(parts) = v else {
        return Err(bad());
    };
    let [Value::Bytes(peer), Value::Product(udp)] = parts.as_slice() else {
        return Err(bad());
    };
    let peer = PeerId(peer.as_slice().try_into().map_err(|_| bad())?);
    let [Value::Sum { tag, value }, Value::Bits { value: port, .. }] = udp.as_slice() else {
        return Err(bad());
    };
    let Value::Bytes(octets) = value.as_ref() else {
        return Err(bad());
    };
    let ip = match *tag {
        0 => {
            let o: [u8; 4] = octets.as_slice().try_into().map_err(|_| bad())?;
            IpAddr::V4(Ipv4Addr::from(o))
        }
        1 => {
            let o: [u8; 16] = octets.as_slice().try_into().map_err(|_| bad())?;
            IpAddr::V6(Ipv6Addr::from(o))
        }
        _ => return Err(bad()),
    };
    Ok((peer, SocketAddr::new(ip, *port as u16)))
}

type Inbound = (PeerId, SocketAddr, AnyValue);

/// What a parked receive wakes up to.
pub(crate) enum RecvOutcome {
    Message(Inbound),
    /// The node went down; the queue sender is gone.
    Stopped,
    /// Woken without a message; the caller re-checks its watermark.
    Nudged,
}

/// A live node: socket task on the runtime, bounded inbound queue, and
/// the signing key it answers for.
pub struct NetworkNode {
    peer: PeerId,
    local: SocketAddr,
    transport: Arc<Transport>,
    key: ed25519_dalek::SigningKey,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    shutdown: watch::Sender<bool>,
    nudge: watch::Sender<u64>,
    runtime: Handle,
}

impl NetworkNode {
    /// Derive the key for `index`, bind a socket on `bind_ip`, and start
    /// the receive loop. Registers the node's own location in the book.
    pub(crate) fn spawn(
        secret: &[u8; 32],
        index: u32,
        bind_ip: IpAddr,
        queue: usize,
        runtime: &Handle,
        book: &Arc<AddressBook>,
    ) -> crate::Result<Arc<NetworkNode>> {
        let key = derive_node_key(secret, index);
        let transport = Arc::new(
            runtime.block_on(Transport::bind(SocketAddr::new(bind_ip, 0), key.clone()))?,
        );
        let peer = transport.peer();
        let local = transport.local_addr();

        let (tx, rx) = mpsc::channel::<Inbound>(queue.max(1));
        let (shutdown, stop_rx) = watch::channel(false);
        let handler_book = Arc::clone(book);
        let loop_transport = Arc::clone(&transport);
        runtime.spawn(async move {
            let handler: isopod_transport::InboundHandler =
                Box::new(move |from, peer, artifact: Artifact| {
                    let (any, _) = artifact.open()?;
                    handler_book.add(peer, from);
                    // Full queue sheds the datagram; sender retries or not.
                    tx.try_send((peer, from, any))
                        .map_err(|_| TransportError::Backpressure)
                });
            if let Err(e) = loop_transport.run(handler, stop_rx).await {
                debug!(error = %e, "node receive loop ended");
            }
        });

        book.add(peer, local);
        info!(key_index = index, %peer, %local, "network node up");
        let (nudge, _) = watch::channel(0u64);
        Ok(Arc::new(NetworkNode {
            peer,
            local,
            transport,
            key,
            inbound: Mutex::new(rx),
            shutdown,
            nudge,
            runtime: runtime.clone(),
        }))
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Stop the receive loop. Dropping the loop drops the queue sender,
    /// which unblocks any process waiting in `recv`.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    fn tell(&self, to: SocketAddr, any: &AnyValue) -> crate::Result<()> {
        let artifact = Artifact::from_any(any)?;
        self.runtime.block_on(self.transport.tell(to, &artifact))?;
        Ok(())
    }

    /// Wake every parked receive so it can re-check its watermark.
    pub(crate) fn nudge(&self) {
        self.nudge.send_modify(|generation| *generation += 1);
    }

    pub(crate) fn nudge_watch(&self) -> watch::Receiver<u64> {
        self.nudge.subscribe()
    }

    /// Block until a message arrives, the node stops, or `nudge` fires.
    /// The watch is versioned, so a nudge sent while the caller was still
    /// queueing on the inbound mutex is not lost.
    fn recv_or_nudge(&self, nudge: &mut watch::Receiver<u64>) -> RecvOutcome {
        let mut rx = self.inbound.lock().expect("inbound queue poisoned");
        self.runtime.block_on(async {
            tokio::select! {
                m = rx.recv() => match m {
                    Some(m) => RecvOutcome::Message(m),
                    None => RecvOutcome::Stopped,
                },
                changed = nudge.changed() => match changed {
                    Ok(()) => RecvOutcome::Nudged,
                    Err(_) => RecvOutcome::Stopped,
                },
            }
        })
    }

    fn sign_root(&self, any: &AnyValue) -> crate::Result<Signature> {
        let root = marshal_any_root(any, &mut NullStore).map_err(Error::Value)?;
        Ok(self.key.sign(&root))
    }
}

impl Drop for NetworkNode {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The port-facing half: one per process, borrowing the pod's node.
pub struct NodeDevice {
    node: Arc<NetworkNode>,
    core: Arc<PodCore>,
    proc_id: i64,
}

impl NodeDevice {
    pub(crate) fn new(node: Arc<NetworkNode>, core: Arc<PodCore>, proc_id: i64) -> Self {
        NodeDevice { node, core, proc_id }
    }

    fn check_alive(&self) -> std::result::Result<(), PortError> {
        self.core
            .db
            .with_tx(|tx| self.core.check_proc_alive(tx, self.proc_id))
            .map_err(to_port_err)
    }

    fn respond(
        &self,
        store: &mut dyn BlobStore,
        buf: &mut [u32],
        tag: u8,
        value: Value,
    ) -> std::result::Result<(), PortError> {
        let sum = Value::Sum {
            tag,
            value: Box::new(value),
        };
        write_words(store, buf, &sum, &port_type().response)
    }
}

impl PortBackend for NodeDevice {
    fn input(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let info = Value::Product(vec![addr_to_value(
            self.node.peer(),
            self.node.local_addr(),
        )]);
        write_words(store, buf, &info, &port_type().input)
    }

    fn interact(&self, store: &mut dyn BlobStore, buf: &mut [u32]) -> Result<(), PortError> {
        let req = read_words(store, buf, &port_type().request)?;
        let Value::Sum { tag, value } = req else {
            return Err(PortError::Invalid("node request is not a sum".into()));
        };
        match tag {
            TAG_RECV => {
                // Subscribe before the aliveness check: a cancel that
                // fires in between raised the watermark first, so one of
                // the two always observes it.
                let (peer, from, any) = loop {
                    let mut nudge = self.node.nudge_watch();
                    self.check_alive()?;
                    match self.node.recv_or_nudge(&mut nudge) {
                        RecvOutcome::Message(m) => break m,
                        RecvOutcome::Stopped => return Err(PortError::Cancelled),
                        RecvOutcome::Nudged => continue,
                    }
                };
                self.check_alive()?;
                let msg = Value::Product(vec![
                    addr_to_value(peer, from),
                    Value::Any(Box::new(any)),
                ]);
                self.respond(store, buf, TAG_RECV, msg)
            }
            TAG_TELL => {
                self.check_alive()?;
                let Value::Product(parts) = *value else {
                    return Err(PortError::Invalid("tell body is not a message".into()));
                };
                let mut parts = parts.into_iter();
                let (Some(addr), Some(Value::Any(payload))) = (parts.next(), parts.next())
                else {
                    return Err(PortError::Invalid("tell body is not a message".into()));
                };
                let (_, to) = value_to_addr(&addr)?;
                self.node
                    .tell(to, &payload)
                    .map_err(|e| PortError::Network(e.to_string()))?;
                self.respond(store, buf, TAG_TELL, Value::unit())
            }
            TAG_SIGN => {
                let Value::Any(target) = *value else {
                    return Err(PortError::Invalid("sign target is not any".into()));
                };
                let sig = self.node.sign_root(&target).map_err(to_port_err)?;
                self.respond(store, buf, TAG_SIGN, Value::Bytes(sig.to_bytes().to_vec()))
            }
            TAG_VERIFY => {
                let Value::Product(parts) = *value else {
                    return Err(PortError::Invalid("verify body is not a pair".into()));
                };
                let mut parts = parts.into_iter();
                let (Some(Value::Any(target)), Some(Value::Any(cred))) =
                    (parts.next(), parts.next())
                else {
                    return Err(PortError::Invalid("verify halves must be any".into()));
                };
                let ok = verify_credential(&target, &cred).map_err(to_port_err)?;
                self.respond(store, buf, TAG_VERIFY, Value::Bit(ok))
            }
            _ => Err(PortError::Invalid(format!("unknown node request tag {}", tag))),
        }
    }
}

/// Check an Ed25519 credential `(verifying key: Bytes(32), signature:
/// Bytes(64))` over the target's marshalled root. A malformed credential
/// verifies false rather than erroring; only marshalling can fail.
fn verify_credential(target: &AnyValue, cred: &AnyValue) -> crate::Result<bool> {
    let AnyValue {
        value: Value::Product(parts),
        ..
    } = cred
    else {
        return Ok(false);
    };
    let [Value::Bytes(vk), Value::Bytes(sig)] = parts.as_slice() else {
        return Ok(false);
    };
    let (Ok(vk_bytes), Ok(sig_bytes)) = (
        <[u8; 32]>::try_from(vk.as_slice()),
        <[u8; 64]>::try_from(sig.as_slice()),
    ) else {
        return Ok(false);
    };
    let Ok(vk) = VerifyingKey::from_bytes(&vk_bytes) else {
        return Ok(false);
    };
    let root = marshal_any_root(target, &mut NullStore)?;
    Ok(vk.verify(&root, &Signature::from_bytes(&sig_bytes)).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_value_round_trips() {
        let peer = PeerId([7; 32]);
        for addr in ["10.1.2.3:4567", "[2001:db8::1]:9999"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let v = addr_to_value(peer, addr);
            assert!(addr_type().contains(&v));
            assert_eq!(value_to_addr(&v).unwrap(), (peer, addr));
        }
    }

    #[test]
    fn malformed_addr_is_invalid() {
        assert!(matches!(
            value_to_addr(&Value::unit()),
            Err(PortError::Invalid(_))
        ));
    }

    #[test]
    fn credentials_verify_and_reject() {
        let key = derive_node_key(&[3; 32], 0);
        let target = AnyValue::new(Type::string(), Value::string("signed claim"));
        let root = marshal_any_root(&target, &mut NullStore).unwrap();
        let sig = key.sign(&root);

        let cred = |vk: [u8; 32], sig: [u8; 64]| {
            AnyValue::new(
                Type::Product(vec![Type::Bytes(32), Type::Bytes(64)]),
                Value::Product(vec![
                    Value::Bytes(vk.to_vec()),
                    Value::Bytes(sig.to_vec()),
                ]),
            )
        };

        let good = cred(key.verifying_key().to_bytes(), sig.to_bytes());
        assert!(verify_credential(&target, &good).unwrap());

        let mut bad_sig = sig.to_bytes();
        bad_sig[0] ^= 1;
        let bad = cred(key.verifying_key().to_bytes(), bad_sig);
        assert!(!verify_credential(&target, &bad).unwrap());

        let other = AnyValue::new(Type::string(), Value::string("different claim"));
        assert!(!verify_credential(&other, &good).unwrap());

        let junk = AnyValue::new(Type::Bits(32), Value::b32(0));
        assert!(!verify_credential(&target, &junk).unwrap());
    }
}
