//! # Transport
//!
//! Turns a TCP stream into a sequence of discrete payloads.
//!
//! # Architecture
//!
//! Each transport runs two Tokio tasks:
//!
//! 1. **Sender** - waits on an unbounded channel, drains everything queued
//!    so far into one batch and writes it as a single frame
//! 2. **Receiver** - reads one length-prefixed frame at a time, unpacks the
//!    batch and hands every payload to the payload handler
//!
//! ```text
//! send_raw ──► [transaction buffer] ──► channel ──► sender task ──► socket
//! socket ──► receiver task ──► decode_batch ──► payload handler
//! ```
//!
//! # Transactions
//!
//! [`Transport::start_transaction`] makes the calling thread the owner of a
//! burst. While it is open, payloads sent by the owner go to the burst and
//! payloads sent by any other thread are deferred. Closing the transaction
//! queues the burst, then the deferred payloads, so the burst is never
//! interleaved with concurrent traffic.
//!
//! # Thread Safety
//!
//! `Transport` is a cheap `Arc` handle. Closing is idempotent, may race
//! with in-flight reads and writes, and runs the disconnect handler exactly
//! once on whichever thread closed first.

use bytes::Bytes;
use parking_lot::Mutex;
use replica_core::{ReplicaError, Result};
use replica_protocol::framing::{self, FRAME_HEADER_LEN};
use replica_protocol::CompressionType;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Called for every received payload
pub type PayloadHandler = Box<dyn Fn(Bytes) + Send + Sync>;

/// Called once when the transport closes
pub type DisconnectHandler = Box<dyn FnOnce() + Send>;

/// Framing options shared by both ends of a connection
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub compression: CompressionType,
    pub max_frame_size: usize,
}

/// Socket halves waiting for [`Transport::start`]
pub struct TransportIo {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    outgoing: mpsc::UnboundedReceiver<Bytes>,
}

struct Transaction {
    owner: ThreadId,
    burst: Vec<Bytes>,
    deferred: Vec<Bytes>,
}

struct TransportInner {
    peer_addr: SocketAddr,
    options: TransportOptions,
    outgoing: mpsc::UnboundedSender<Bytes>,
    transaction: Mutex<Option<Transaction>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    /// Second handle on the socket, used to shut it down synchronously
    socket: std::net::TcpStream,
    on_disconnect: Mutex<Option<DisconnectHandler>>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Framed, optionally compressed, transactional TCP transport
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Wrap a connected stream. No I/O happens until [`start`](Self::start).
    ///
    /// # Errors
    /// Fails if the socket cannot be configured or duplicated.
    pub fn new(handle: &Handle, stream: TcpStream, options: TransportOptions) -> Result<(Self, TransportIo)> {
        stream.set_nodelay(true)?;
        socket2::SockRef::from(&stream).set_keepalive(true)?;
        let peer_addr = stream.peer_addr()?;

        let std_stream = stream.into_std()?;
        let socket = std_stream.try_clone()?;
        let stream = {
            let _guard = handle.enter();
            TcpStream::from_std(std_stream)?
        };
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let transport = Self {
            inner: Arc::new(TransportInner {
                peer_addr,
                options,
                outgoing: tx,
                transaction: Mutex::new(None),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                socket,
                on_disconnect: Mutex::new(None),
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
            }),
        };

        Ok((
            transport,
            TransportIo {
                reader,
                writer,
                outgoing: rx,
            },
        ))
    }

    /// Spawn the sender and receiver tasks
    pub fn start(&self, handle: &Handle, io: TransportIo, on_payload: PayloadHandler, on_disconnect: DisconnectHandler) {
        *self.inner.on_disconnect.lock() = Some(on_disconnect);

        handle.spawn(send_loop(self.inner.clone(), io.outgoing, io.writer));
        handle.spawn(receive_loop(self.inner.clone(), io.reader, on_payload));

        tracing::debug!("Transport to {} started", self.inner.peer_addr);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    /// Queue one payload for sending
    ///
    /// # Errors
    /// Returns an I/O `NotConnected` error once the transport is closed.
    pub fn send_raw(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(not_connected(self.inner.peer_addr));
        }

        let mut transaction = self.inner.transaction.lock();
        match transaction.as_mut() {
            Some(tx) if tx.owner == thread::current().id() => tx.burst.push(payload),
            Some(tx) => tx.deferred.push(payload),
            None => self
                .inner
                .outgoing
                .send(payload)
                .map_err(|_| not_connected(self.inner.peer_addr))?,
        }
        Ok(())
    }

    /// Open a transaction owned by the calling thread. No-op if one is
    /// already open.
    pub fn start_transaction(&self) {
        let mut transaction = self.inner.transaction.lock();
        if transaction.is_none() {
            *transaction = Some(Transaction {
                owner: thread::current().id(),
                burst: Vec::new(),
                deferred: Vec::new(),
            });
        }
    }

    /// Queue the burst followed by everything deferred during the transaction
    pub fn stop_transaction(&self) {
        let mut transaction = self.inner.transaction.lock();
        if let Some(tx) = transaction.take() {
            for payload in tx.burst.into_iter().chain(tx.deferred) {
                if self.inner.outgoing.send(payload).is_err() {
                    break;
                }
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.transaction.lock().is_some()
    }

    /// Close the socket and run the disconnect handler (once)
    pub fn close(&self) {
        self.inner.close();
    }
}

impl TransportInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Closing transport to {}", self.peer_addr);

        self.cancel.cancel();
        let _ = self.socket.shutdown(Shutdown::Both);

        let handler = self.on_disconnect.lock().take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

fn not_connected(peer: SocketAddr) -> ReplicaError {
    ReplicaError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("transport to {} is closed", peer),
    ))
}

async fn send_loop(inner: Arc<TransportInner>, mut outgoing: mpsc::UnboundedReceiver<Bytes>, mut writer: OwnedWriteHalf) {
    let limit = inner.options.max_frame_size;
    let mut carried: Option<Bytes> = None;
    loop {
        let first = match carried.take() {
            Some(payload) => payload,
            None => tokio::select! {
                _ = inner.cancel.cancelled() => break,
                payload = outgoing.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            },
        };

        // Keep the inflated body within the peer's frame limit
        let mut size = framing::batch_cost(&first);
        let mut batch = vec![first];
        while let Ok(payload) = outgoing.try_recv() {
            let cost = framing::batch_cost(&payload);
            if size + cost > limit {
                carried = Some(payload);
                break;
            }
            size += cost;
            batch.push(payload);
        }
        if size > limit {
            tracing::warn!("Payload of {} bytes for {} exceeds the frame limit", size, inner.peer_addr);
        }

        let frame = match framing::encode_batch(&batch, inner.options.compression) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode frame for {}: {}", inner.peer_addr, e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&frame).await {
            tracing::debug!("Write to {} failed: {}", inner.peer_addr, e);
            break;
        }
        inner.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
    }

    inner.close();
}

async fn receive_loop(inner: Arc<TransportInner>, mut reader: OwnedReadHalf, on_payload: PayloadHandler) {
    loop {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let read = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            read = reader.read_exact(&mut header) => read,
        };
        if let Err(e) = read {
            tracing::debug!("Connection {} closed: {}", inner.peer_addr, e);
            break;
        }

        let len = framing::frame_len(header);
        if len > inner.options.max_frame_size {
            tracing::warn!(
                "Frame of {} bytes from {} exceeds the {} byte limit",
                len,
                inner.peer_addr,
                inner.options.max_frame_size
            );
            break;
        }

        let mut body = vec![0u8; len];
        let read = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            read = reader.read_exact(&mut body) => read,
        };
        if let Err(e) = read {
            tracing::debug!("Connection {} closed mid-frame: {}", inner.peer_addr, e);
            break;
        }
        inner
            .bytes_received
            .fetch_add((FRAME_HEADER_LEN + len) as u64, Ordering::Relaxed);

        match framing::decode_batch(&body, inner.options.compression, inner.options.max_frame_size) {
            Ok(payloads) => {
                for payload in payloads {
                    if inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    on_payload(payload);
                }
            }
            Err(e) => {
                tracing::warn!("Corrupt frame from {}: {}", inner.peer_addr, e);
                break;
            }
        }
    }

    inner.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const OPTIONS: TransportOptions = TransportOptions {
        compression: CompressionType::Zlib,
        max_frame_size: 1024 * 1024,
    };

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    fn collecting(tx: mpsc::UnboundedSender<Bytes>) -> PayloadHandler {
        Box::new(move |payload| {
            let _ = tx.send(payload);
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_payloads_arrive_in_order() {
        let handle = Handle::current();
        let (a, b) = pair().await;
        let (sender, sender_io) = Transport::new(&handle, a, OPTIONS).unwrap();
        let (receiver, receiver_io) = Transport::new(&handle, b, OPTIONS).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        sender.start(&handle, sender_io, Box::new(|_| {}), Box::new(|| {}));
        receiver.start(&handle, receiver_io, collecting(tx), Box::new(|| {}));

        for i in 0..50u8 {
            sender.send_raw(Bytes::from(vec![i; i as usize + 1])).unwrap();
        }
        for i in 0..50u8 {
            let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(payload[0], i);
            assert_eq!(payload.len(), i as usize + 1);
        }
        assert!(sender.bytes_sent() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transaction_burst_precedes_deferred() {
        let handle = Handle::current();
        let (a, b) = pair().await;
        let (sender, sender_io) = Transport::new(&handle, a, OPTIONS).unwrap();
        let (receiver, receiver_io) = Transport::new(&handle, b, OPTIONS).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        receiver.start(&handle, receiver_io, collecting(tx), Box::new(|| {}));

        sender.start_transaction();
        sender.send_raw(Bytes::from_static(b"burst-1")).unwrap();

        let other = sender.clone();
        std::thread::spawn(move || other.send_raw(Bytes::from_static(b"concurrent")).unwrap())
            .join()
            .unwrap();

        sender.send_raw(Bytes::from_static(b"burst-2")).unwrap();
        assert!(sender.in_transaction());
        sender.start(&handle, sender_io, Box::new(|_| {}), Box::new(|| {}));
        sender.stop_transaction();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(
            received,
            vec![
                Bytes::from_static(b"burst-1"),
                Bytes::from_static(b"burst-2"),
                Bytes::from_static(b"concurrent"),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_is_idempotent_and_notifies_once() {
        let handle = Handle::current();
        let (a, b) = pair().await;
        let (local, local_io) = Transport::new(&handle, a, OPTIONS).unwrap();
        let (remote, remote_io) = Transport::new(&handle, b, OPTIONS).unwrap();

        let closes = Arc::new(AtomicU64::new(0));
        let counter = closes.clone();
        local.start(
            &handle,
            local_io,
            Box::new(|_| {}),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let (remote_tx, mut remote_closed) = mpsc::unbounded_channel::<()>();
        remote.start(
            &handle,
            remote_io,
            Box::new(|_| {}),
            Box::new(move || {
                let _ = remote_tx.send(());
            }),
        );

        local.close();
        local.close();
        assert!(local.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(local.send_raw(Bytes::from_static(b"late")).is_err());

        // the peer observes the shutdown as a normal disconnect
        tokio::time::timeout(Duration::from_secs(2), remote_closed.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(remote.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_oversized_frame_closes_connection() {
        let handle = Handle::current();
        let (mut raw, b) = pair().await;
        let (receiver, receiver_io) = Transport::new(&handle, b, OPTIONS).unwrap();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
        receiver.start(
            &handle,
            receiver_io,
            Box::new(|_| panic!("no payload expected")),
            Box::new(move || {
                let _ = closed_tx.send(());
            }),
        );

        raw.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), closed_rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inflating_frame_closes_connection() {
        let handle = Handle::current();
        let (mut raw, b) = pair().await;
        let (receiver, receiver_io) = Transport::new(&handle, b, OPTIONS).unwrap();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<()>();
        receiver.start(
            &handle,
            receiver_io,
            Box::new(|_| panic!("no payload expected")),
            Box::new(move || {
                let _ = closed_tx.send(());
            }),
        );

        // small on the wire, 8x the frame limit once inflated
        let body = replica_protocol::compression::compress(&vec![0u8; 8 * 1024 * 1024], CompressionType::Zlib).unwrap();
        assert!(body.len() < OPTIONS.max_frame_size);
        raw.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        raw.write_all(&body).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), closed_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(receiver.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backlog_is_split_under_frame_limit() {
        let small = TransportOptions {
            compression: CompressionType::None,
            max_frame_size: 256,
        };
        let handle = Handle::current();
        let (a, b) = pair().await;
        let (sender, sender_io) = Transport::new(&handle, a, small).unwrap();
        let (receiver, receiver_io) = Transport::new(&handle, b, small).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        receiver.start(&handle, receiver_io, collecting(tx), Box::new(|| {}));

        // queued before the sender task runs, so they would share one batch
        for i in 0..40u8 {
            sender.send_raw(Bytes::from(vec![i; 20])).unwrap();
        }
        sender.start(&handle, sender_io, Box::new(|_| {}), Box::new(|| {}));

        for i in 0..40u8 {
            let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(payload, Bytes::from(vec![i; 20]));
        }
        assert!(!receiver.is_closed());
    }
}
