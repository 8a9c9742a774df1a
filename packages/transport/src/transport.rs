//! The datagram transport.
//!
//! One UDP socket per node. `tell` signs and sends; `run` is the receive
//! loop, driven until the shutdown watch flips. Delivery hands each
//! authenticated artifact to the inbound handler; a handler error is the
//! receiver shedding load, which is logged and otherwise dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::keys::PeerId;
use crate::wire::{Artifact, Frame};
use crate::{Result, TransportError};

/// Largest datagram `tell` will emit. Below typical loopback/jumbo limits;
/// artifacts above this must be restructured by the caller.
pub const MAX_DATAGRAM: usize = 60_000;

/// Callback for authenticated inbound artifacts.
pub type InboundHandler =
    Box<dyn FnMut(SocketAddr, PeerId, Artifact) -> Result<()> + Send>;

/// An authenticated datagram endpoint.
pub struct Transport {
    socket: Arc<UdpSocket>,
    key: SigningKey,
    local: SocketAddr,
}

impl Transport {
    /// Bind a socket and take on the identity of `key`.
    pub async fn bind(addr: SocketAddr, key: SigningKey) -> Result<Transport> {
        let socket = UdpSocket::bind(addr).await?;
        let local = socket.local_addr()?;
        Ok(Transport {
            socket: Arc::new(socket),
            key,
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer(&self) -> PeerId {
        PeerId(self.key.verifying_key().to_bytes())
    }

    /// Sign and send an artifact to `to`.
    pub async fn tell(&self, to: SocketAddr, artifact: &Artifact) -> Result<()> {
        let wire = Frame::encode(&self.key, &artifact.encode());
        if wire.len() > MAX_DATAGRAM {
            return Err(TransportError::TooLarge {
                size: wire.len(),
                max: MAX_DATAGRAM,
            });
        }
        self.socket.send_to(&wire, to).await?;
        Ok(())
    }

    /// Receive loop. Runs until `shutdown` observes `true`.
    ///
    /// Frames that fail authentication and handler errors (shed load) are
    /// logged and dropped; neither stops the loop. Socket errors are
    /// terminal.
    pub async fn run(
        &self,
        mut handler: InboundHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM + 256];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(local = %self.local, "transport shut down");
                        return Ok(());
                    }
                }
                recv = self.socket.recv_from(&mut buf) => {
                    let (n, from) = recv?;
                    match Frame::decode(&buf[..n]).and_then(|frame| {
                        let artifact = Artifact::decode(&frame.payload)?;
                        Ok((frame.from, artifact))
                    }) {
                        Ok((peer, artifact)) => {
                            if let Err(e) = handler(from, peer, artifact) {
                                warn!(%from, error = %e, "inbound artifact dropped");
                            }
                        }
                        Err(e) => warn!(%from, error = %e, "bad datagram dropped"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_node_key;
    use isopod_value::{AnyValue, Type, Value};

    #[tokio::test]
    async fn loopback_tell_is_delivered_and_authenticated() {
        let a = Transport::bind("127.0.0.1:0".parse().unwrap(), derive_node_key(&[1; 32], 0))
            .await
            .unwrap();
        let b = Transport::bind("127.0.0.1:0".parse().unwrap(), derive_node_key(&[2; 32], 0))
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);
        let b_addr = b.local_addr();
        let b_task = tokio::spawn(async move {
            let handler: InboundHandler = Box::new(move |_, peer, artifact| {
                tx.try_send((peer, artifact))
                    .map_err(|_| TransportError::Backpressure)
            });
            b.run(handler, stop_rx).await
        });

        let any = AnyValue::new(Type::string(), Value::string("over the wire"));
        a.tell(b_addr, &Artifact::from_any(&any).unwrap())
            .await
            .unwrap();

        let (peer, artifact) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            rx.recv(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(peer, a.peer());
        let (got, _) = artifact.open().unwrap();
        assert!(got.value.structural_eq(&any.value));

        stop_tx.send(true).unwrap();
        b_task.await.unwrap().unwrap();
    }
}
