//! Message-queue transport (spec §4.4).
//!
//! A connection is a pair of directed, in-process `crossbeam_channel` queues
//! — one per direction — standing in for the original's named OS message
//! queues (`das/Core/IPC/include/das/Core/IPC/MessageQueueTransport.h`). The
//! routing policy it implements is unchanged: bodies at or under
//! `SMALL_MESSAGE_THRESHOLD` travel inline in the queue entry; anything
//! larger is written to a [`crate::shmem::SharedMemoryPool`] block and only
//! the block name travels inline, with `MessageHeader::FLAG_LARGE_BODY` set.
//! The channel payload itself is the wire-encoded byte form (spec §2's
//! "serialize (C2) → transport sends (C4)"): `send` calls
//! [`MessageHeader::encode`] and `receive` calls [`MessageHeader::decode`],
//! rather than pushing the typed struct through the channel directly.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use ipc_types::error::IpcError;
use ipc_types::header::{MessageHeader, HEADER_SIZE};

use crate::shmem::SharedMemoryPool;

/// Bodies larger than this are routed through shared memory instead of
/// traveling inline in the queue entry (spec §4.4 "large body" threshold).
pub const SMALL_MESSAGE_THRESHOLD: usize = 4096;

/// A framed message as it travels the queue: the encoded [`MessageHeader`]
/// bytes followed by the body slot (the real payload, or — when
/// `FLAG_LARGE_BODY` is set — the shared-memory block name encoded as UTF-8).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub bytes: Vec<u8>,
}

/// One directed queue pair, matching `MakeQueueName`'s "a connection owns
/// two named queues, one per direction" convention — here the two
/// directions are simply the two ends of one `crossbeam_channel`.
pub struct QueueTransport {
    outbound: Sender<Envelope>,
    inbound: Receiver<Envelope>,
    shmem: Arc<SharedMemoryPool>,
}

impl QueueTransport {
    pub fn new(outbound: Sender<Envelope>, inbound: Receiver<Envelope>, shmem: Arc<SharedMemoryPool>) -> Self {
        QueueTransport { outbound, inbound, shmem }
    }

    /// Create a connected pair of transports sharing one shared-memory pool,
    /// as if standing at the two ends of one connection.
    pub fn pair(pool_id: impl Into<String>) -> (QueueTransport, QueueTransport) {
        let (tx_a, rx_a) = crossbeam_channel::unbounded();
        let (tx_b, rx_b) = crossbeam_channel::unbounded();
        let shmem = Arc::new(SharedMemoryPool::new(pool_id.into()));
        (QueueTransport::new(tx_a, rx_b, Arc::clone(&shmem)), QueueTransport::new(tx_b, rx_a, shmem))
    }

    /// A transport whose outbound end feeds directly back into its own
    /// inbound end, rather than to a peer. Lets a single run loop issue a
    /// nested call to itself — its own REQUEST arrives right back at its own
    /// `receive` — the shape a reentrant handler produces when it is its own
    /// peer (spec §4.7 nested-call scenario exercised single-threaded).
    pub fn looped(pool_id: impl Into<String>) -> QueueTransport {
        let (tx, rx) = crossbeam_channel::unbounded();
        QueueTransport::new(tx, rx, Arc::new(SharedMemoryPool::new(pool_id.into())))
    }

    /// Send `header` with `body`, routing through shared memory if `body`
    /// exceeds [`SMALL_MESSAGE_THRESHOLD`]. The channel payload is the
    /// wire-encoded header (`MessageHeader::encode`) followed by the body
    /// slot, not the typed struct itself.
    pub fn send(&self, mut header: MessageHeader, body: &[u8]) -> Result<(), IpcError> {
        let body_slot = if body.len() > SMALL_MESSAGE_THRESHOLD {
            let block_name = self.shmem.allocate(body)?;
            header.set_large_body(true);
            header.body_size = body.len() as u32;
            block_name.into_bytes()
        } else {
            header.set_large_body(false);
            header.body_size = body.len() as u32;
            body.to_vec()
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&body_slot);
        self.outbound.send(Envelope { bytes }).map_err(|_| IpcError::ConnectionClosed)
    }

    /// Receive the next message, blocking up to `timeout`. The header is
    /// decoded off the front of the received bytes (`MessageHeader::decode`);
    /// large bodies are transparently read back out of shared memory and the
    /// block is freed once copied, so the sender's allocation does not leak
    /// on the happy path.
    pub fn receive(&self, timeout: Duration) -> Result<(MessageHeader, Vec<u8>), IpcError> {
        let envelope = self.inbound.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => IpcError::Timeout,
            RecvTimeoutError::Disconnected => IpcError::ConnectionClosed,
        })?;
        let header = MessageHeader::decode(&envelope.bytes)?;
        let body_slot = envelope.bytes[HEADER_SIZE..].to_vec();
        if header.has_large_body() {
            let block_name =
                String::from_utf8(body_slot).map_err(|_| IpcError::shared_memory_failure("non-utf8 block name"))?;
            let body = self.shmem.read(&block_name)?;
            self.shmem.deallocate(&block_name);
            Ok((header, body))
        } else {
            Ok((header, body_slot))
        }
    }

    /// Non-blocking poll; returns `Err(Timeout)` immediately if nothing is
    /// queued, matching `receive`'s error mapping for a zero-wait peek.
    pub fn try_receive(&self) -> Result<(MessageHeader, Vec<u8>), IpcError> {
        self.receive(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc_types::object_id::ObjectId;

    fn request_header(body_size: u32) -> MessageHeader {
        MessageHeader::request(1, 1, 1, ObjectId { session_id: 2, generation: 1, local_id: 1 }, body_size)
    }

    #[test]
    fn small_body_round_trips_inline() {
        let (a, b) = QueueTransport::pair("test_small");
        let payload = b"small payload".to_vec();
        a.send(request_header(payload.len() as u32), &payload).unwrap();
        let (header, body) = b.receive(Duration::from_secs(1)).unwrap();
        assert!(!header.has_large_body());
        assert_eq!(body, payload);
    }

    #[test]
    fn large_body_round_trips_through_shared_memory() {
        let (a, b) = QueueTransport::pair("test_large");
        let payload = vec![0xABu8; SMALL_MESSAGE_THRESHOLD + 1];
        a.send(request_header(payload.len() as u32), &payload).unwrap();
        let (header, body) = b.receive(Duration::from_secs(1)).unwrap();
        assert!(header.has_large_body());
        assert_eq!(body, payload);
    }

    #[test]
    fn receive_times_out_when_nothing_is_queued() {
        let (_a, b) = QueueTransport::pair("test_timeout");
        let err = b.receive(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, IpcError::Timeout);
    }

    #[test]
    fn receive_reports_connection_closed_once_sender_is_dropped() {
        let (a, b) = QueueTransport::pair("test_closed");
        drop(a);
        let err = b.receive(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, IpcError::ConnectionClosed);
    }
}
