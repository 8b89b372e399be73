use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// A datagram as the session sees it: raw octets, the far endpoint, and
/// the arrival instant stamped by the adapter.
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub payload: Bytes,
    pub from: Endpoint,
    pub arrival: SystemTime,
}

/// PacketTransport is the seam between the session core and a concrete
/// transport. Implementations are non-blocking: `recv` suspends, `send`
/// completes or fails without waiting on the network.
#[async_trait]
pub trait PacketTransport {
    async fn send(&self, payload: Bytes, to: &Endpoint) -> Result<usize>;
    async fn recv(&self) -> Result<ReceivedPacket>;
    /// Tear down the receive path; a pending `recv` returns an error.
    async fn close(&self) -> Result<()>;
}

/// A deterministic in-process transport: two halves connected by channels,
/// with an optional drop predicate for loss experiments. Grounded in the
/// virtual network interfaces the original test harness replays dumps
/// through.
pub struct VirtualTransport {
    local: Endpoint,
    remote: Endpoint,
    tx: mpsc::UnboundedSender<(Bytes, Endpoint)>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<(Bytes, Endpoint)>>>,
    drop_predicate: Option<Arc<dyn Fn(&Bytes) -> bool + Send + Sync>>,
}

impl VirtualTransport {
    /// Builds a connected pair of transports.
    pub fn pair(a: Endpoint, b: Endpoint) -> (VirtualTransport, VirtualTransport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let left = VirtualTransport {
            local: a.clone(),
            remote: b.clone(),
            tx: a_tx,
            rx: Mutex::new(Some(a_rx)),
            drop_predicate: None,
        };
        let right = VirtualTransport {
            local: b,
            remote: a,
            tx: b_tx,
            rx: Mutex::new(Some(b_rx)),
            drop_predicate: None,
        };
        (left, right)
    }

    /// Installs a predicate deciding which outgoing datagrams the virtual
    /// network swallows.
    pub fn with_drop_predicate(
        mut self,
        predicate: Arc<dyn Fn(&Bytes) -> bool + Send + Sync>,
    ) -> Self {
        self.drop_predicate = Some(predicate);
        self
    }

    /// Drops outgoing media packets whose sequence number is in `seqs`.
    pub fn dropping_media_seqs(self, seqs: Vec<u16>) -> Self {
        self.with_drop_predicate(Arc::new(move |payload: &Bytes| {
            if payload.len() < 4 {
                return false;
            }
            // media packets only: version 2 and a non-control payload type
            // (the control range 200..=211 folds to 72..=83 under the
            // marker mask)
            let pt = payload[1] & 0x7F;
            if payload[0] >> 6 != 2 || (72..=83).contains(&pt) {
                return false;
            }
            let seq = ((payload[2] as u16) << 8) | payload[3] as u16;
            seqs.contains(&seq)
        }))
    }

    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn remote(&self) -> &Endpoint {
        &self.remote
    }
}

#[async_trait]
impl PacketTransport for VirtualTransport {
    async fn send(&self, payload: Bytes, _to: &Endpoint) -> Result<usize> {
        if let Some(predicate) = &self.drop_predicate {
            if predicate(&payload) {
                return Ok(payload.len());
            }
        }
        let len = payload.len();
        self.tx
            .send((payload, self.local.clone()))
            .map_err(|_| Error::TransportFault("virtual peer gone".into()))?;
        Ok(len)
    }

    async fn recv(&self) -> Result<ReceivedPacket> {
        let mut guard = self.rx.lock().await;
        let rx = guard
            .as_mut()
            .ok_or_else(|| Error::TransportFault("receive path closed".into()))?;
        match rx.recv().await {
            Some((payload, from)) => Ok(ReceivedPacket {
                payload,
                from,
                arrival: SystemTime::now(),
            }),
            None => Err(Error::TransportFault("virtual peer gone".into())),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.rx.lock().await;
        guard.take();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn endpoints() -> (Endpoint, Endpoint) {
        (
            Endpoint::new("192.0.2.1", 5004),
            Endpoint::new("192.0.2.2", 5004),
        )
    }

    #[tokio::test]
    async fn test_virtual_pair_delivers_with_arrival_stamp() {
        let (a, b) = endpoints();
        let (left, right) = VirtualTransport::pair(a.clone(), b);

        let before = SystemTime::now();
        left.send(Bytes::from_static(b"hello"), left.remote())
            .await
            .expect("send");

        let received = right.recv().await.expect("recv");
        assert_eq!(received.payload, Bytes::from_static(b"hello"));
        assert_eq!(received.from, a);
        assert!(received.arrival >= before);
    }

    #[tokio::test]
    async fn test_virtual_drop_predicate() {
        let (a, b) = endpoints();
        let (left, right) = VirtualTransport::pair(a, b);
        let left = left.with_drop_predicate(Arc::new(|p: &Bytes| p.len() == 1));

        left.send(Bytes::from_static(&[0xFF]), left.remote())
            .await
            .expect("send");
        left.send(Bytes::from_static(b"ok"), left.remote())
            .await
            .expect("send");

        let received = right.recv().await.expect("recv");
        assert_eq!(received.payload, Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_closed_receive_path_errors() {
        let (a, b) = endpoints();
        let (_left, right) = VirtualTransport::pair(a, b);
        right.close().await.expect("close");
        assert!(right.recv().await.is_err());
    }
}
