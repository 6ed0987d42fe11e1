//! SSH Transport Layer manager (RFC 4253).
//!
//! This module owns a single TCP connection to an SSH server and delivers
//! the transport-layer guarantees on top of it: version exchange, binary
//! packet framing, key exchange sequencing, rekeying, strict-kex
//! enforcement, ordered multiplexed dispatch and orderly disconnect.
//!
//! # Connection lifecycle
//!
//! 1. **Connect** - resolve the hostname honoring the IP-version
//!    preference (or hand off to a [`ProxyData`]), connect with a timeout
//! 2. **Version exchange** - exchange "SSH-2.0-..." identification strings
//! 3. **First key exchange** - construct the codec and the
//!    [`KexEngine`], start the exchange, spawn the receive task
//! 4. **Ready** - application traffic flows; rekeys may interleave
//! 5. **Closed** - terminal; every observer is notified exactly once
//!
//! # Concurrency
//!
//! Three roles share one [`Transport`]:
//!
//! - the **receive task** (exactly one, spawned at initialization) owns
//!   the receive half of the codec and may never send application packets;
//! - **application tasks** (any number) send, register handlers, force
//!   rekeys;
//! - the **asynchronous send worker** (zero or one, transient) drains the
//!   bounded reply queue.
//!
//! Outbound access is serialised by one async mutex over the codec's send
//! half, paired with a watch gate carrying the `{kex_ongoing, closed}`
//! flags. The kex flag only changes while the send lock is held, so an
//! application sender that re-checks the gate under the lock observes the
//! same ordering the protocol requires: while a key exchange is running,
//! only KEX packets reach the wire.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skiff_proto::ssh::crypto::CryptoWishList;
//! use skiff_proto::ssh::kex::{DhGexParameters, KexEngine};
//! use skiff_proto::ssh::transport::{Transport, TransportConfig};
//!
//! # async fn example(engine_for: impl FnOnce(skiff_proto::ssh::transport::KexTransport) -> Arc<dyn KexEngine>) -> skiff_platform::SkiffResult<()> {
//! let config = TransportConfig::new("server.example.org", 22);
//! let transport = Transport::initialize(
//!     config,
//!     CryptoWishList::default(),
//!     DhGexParameters::default(),
//!     None,
//!     engine_for,
//! )
//! .await?;
//!
//! // Blocks until the first key exchange completes.
//! let info = transport.connection_info(1).await?;
//! println!("kex: {}", info.kex_algorithm);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use skiff_platform::{SkiffError, SkiffResult};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tracing::debug;

use crate::ssh::codec::{CodecRecv, CodecSend};
use crate::ssh::crypto::{BlockCipher, Compressor, CryptoWishList, PacketMac};
use crate::ssh::dispatcher;
use crate::ssh::ext_info::ExtensionInfo;
use crate::ssh::kex::{ConnectionInfo, DhGexParameters, KexEngine};
use crate::ssh::message::{MessageType, SSH_DISCONNECT_BY_APPLICATION};
use crate::ssh::router::{ConnectionMonitor, MessageHandler, MessageRouter};
use crate::ssh::version::{self, default_client_id, Hello};
use crate::ssh::wire::PacketWriter;

/// Upper bound on queued asynchronous replies. Without it, a peer that
/// triggers replies but never reads our data would grow the queue without
/// limit.
const ASYNC_QUEUE_LIMIT: usize = 100;

/// How long the asynchronous send worker lingers on an empty queue before
/// terminating.
const ASYNC_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

tokio::task_local! {
    /// Set for the whole receive task; sending application packets from
    /// inside it would deadlock the connection.
    pub(crate) static DISPATCH_CONTEXT: ();
}

/// Restricts the IP version used when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    /// Allow both IPv4 and IPv6, the default.
    #[default]
    Any,
    /// Require that the connection be over IPv4 only.
    V4Only,
    /// Require that the connection be over IPv6 only.
    V6Only,
}

/// A provider of pre-connected sockets (SOCKS, HTTP CONNECT, jump hosts).
///
/// When configured, hostname resolution and direct connection are skipped;
/// the proxy returns a stream that already reaches the SSH server.
#[async_trait]
pub trait ProxyData: Send + Sync {
    /// Opens a connection to `hostname:port` through the proxy.
    async fn open_connection(
        &self,
        hostname: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> SkiffResult<TcpStream>;
}

/// Connection parameters for one transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server hostname (resolved at connect time).
    pub hostname: String,
    /// Server port.
    pub port: u16,
    /// IP version restriction for direct connections.
    pub ip_version: IpVersion,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Our identification string, sent verbatim during version exchange.
    pub client_id: String,
}

impl TransportConfig {
    /// Creates a configuration with default preferences for `hostname:port`.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ip_version: IpVersion::default(),
            connect_timeout: Duration::from_secs(30),
            client_id: default_client_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Gate {
    kex_ongoing: bool,
    closed: bool,
}

#[derive(Default)]
struct CloseState {
    closed: bool,
    cause: Option<SkiffError>,
}

#[derive(Default)]
struct MonitorState {
    monitors: Vec<Arc<dyn ConnectionMonitor>>,
    informed: bool,
}

#[derive(Default)]
struct AsyncQueueState {
    queue: VecDeque<Vec<u8>>,
    worker_present: bool,
}

enum SendOutcome {
    Retry,
    Closed,
    Done(SkiffResult<()>),
}

pub(crate) struct TransportInner {
    hello: Hello,
    gate: watch::Sender<Gate>,
    send_half: AsyncMutex<CodecSend<OwnedWriteHalf>>,
    pub(crate) recv_half: AsyncMutex<CodecRecv<OwnedReadHalf>>,
    kex: OnceLock<Arc<dyn KexEngine>>,
    pub(crate) router: MessageRouter,
    monitors: Mutex<MonitorState>,
    close_state: Mutex<CloseState>,
    pub(crate) first_kex_finished: AtomicBool,
    extension_info: RwLock<ExtensionInfo>,
    async_queue: Mutex<AsyncQueueState>,
    async_wakeup: Notify,
}

impl TransportInner {
    pub(crate) fn kex_engine(&self) -> Option<Arc<dyn KexEngine>> {
        self.kex.get().cloned()
    }

    pub(crate) fn is_strict_kex(&self) -> bool {
        self.kex.get().map(|k| k.is_strict_kex()).unwrap_or(false)
    }

    fn closed_error(&self) -> SkiffError {
        let cause = self
            .close_state
            .lock()
            .expect("close state poisoned")
            .cause
            .clone();
        SkiffError::Closed(cause.map(Box::new))
    }

    /// Resolves once the connection is closed; used to interrupt blocked
    /// reads and writes.
    pub(crate) async fn wait_closed(&self) {
        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(|g| g.closed).await;
    }

    async fn write_packet(
        &self,
        tx: &mut CodecSend<OwnedWriteHalf>,
        payload: &[u8],
    ) -> SkiffResult<()> {
        let mut rx = self.gate.subscribe();
        tokio::select! {
            r = tx.send_packet(payload) => r,
            _ = rx.wait_for(|g| g.closed) => Err(self.closed_error()),
        }
    }

    /// The application send path.
    ///
    /// Forbidden from the receive task. Waits while a key exchange is
    /// running; re-checks `closed` on every wake. Any codec failure tears
    /// the connection down before the error is returned.
    pub(crate) async fn send_message(&self, payload: &[u8]) -> SkiffResult<()> {
        if DISPATCH_CONTEXT.try_with(|_| ()).is_ok() {
            return Err(SkiffError::SendFromDispatcher);
        }

        let mut gate_rx = self.gate.subscribe();
        loop {
            let _ = gate_rx.wait_for(|g| g.closed || !g.kex_ongoing).await;

            let outcome = {
                let mut tx = self.send_half.lock().await;
                let g = *self.gate.borrow();
                if g.closed {
                    SendOutcome::Closed
                } else if g.kex_ongoing {
                    // A rekey started between the gate check and the lock.
                    SendOutcome::Retry
                } else {
                    SendOutcome::Done(self.write_packet(&mut tx, payload).await)
                }
            };

            match outcome {
                SendOutcome::Retry => continue,
                SendOutcome::Closed => return Err(self.closed_error()),
                SendOutcome::Done(Ok(())) => return Ok(()),
                SendOutcome::Done(Err(e)) => {
                    self.close_with(Some(e.clone()), false).await;
                    return Err(e);
                }
            }
        }
    }

    /// The KEX-privileged send path.
    ///
    /// Raises the kex-ongoing flag and transmits under the same critical
    /// section, which is what keeps application packets strictly before
    /// the KEXINIT of the next exchange.
    pub(crate) async fn send_kex_message(&self, payload: &[u8]) -> SkiffResult<()> {
        let result = {
            let mut tx = self.send_half.lock().await;
            if self.gate.borrow().closed {
                return Err(self.closed_error());
            }
            self.gate.send_modify(|g| g.kex_ongoing = true);
            self.write_packet(&mut tx, payload).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close_with(Some(e.clone()), false).await;
                Err(e)
            }
        }
    }

    /// Marks the running key exchange as finished and releases parked
    /// application senders.
    pub(crate) fn kex_finished(&self) {
        self.first_kex_finished.store(true, Ordering::SeqCst);
        self.gate.send_modify(|g| g.kex_ongoing = false);
    }

    pub(crate) async fn start_compression(&self) {
        self.send_half.lock().await.start_compression();
        self.recv_half.lock().await.start_compression();
    }

    pub(crate) fn set_extension_info(&self, info: ExtensionInfo) {
        *self
            .extension_info
            .write()
            .expect("extension info poisoned") = info;
    }

    /// Closes the connection. Only the first call records the cause and
    /// touches the socket; every call past that is a no-op apart from the
    /// gate broadcast.
    pub(crate) async fn close_with(&self, cause: Option<SkiffError>, polite: bool) {
        if polite {
            let description = cause
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();

            let mut tx = self.send_half.lock().await;
            let newly_closed = self.record_close(cause);
            if newly_closed {
                let msg = disconnect_payload(SSH_DISCONNECT_BY_APPLICATION, &description);
                let _ = tx.send_packet(&msg).await;
                let _ = tx.shutdown().await;
            }
            self.gate.send_modify(|g| g.closed = true);
            drop(tx);
        } else {
            // Hard shutdown: record the cause and flip the gate before
            // taking the send lock, so a sender blocked mid-write wakes,
            // observes `Closed` and releases the lock we are about to take.
            let newly_closed = self.record_close(cause);
            self.gate.send_modify(|g| g.closed = true);
            if newly_closed {
                let mut tx = self.send_half.lock().await;
                let _ = tx.shutdown().await;
            }
        }

        let to_notify = {
            let mut ms = self.monitors.lock().expect("monitor list poisoned");
            if ms.informed {
                None
            } else {
                ms.informed = true;
                Some(ms.monitors.clone())
            }
        };

        if let Some(monitors) = to_notify {
            let cause = self
                .close_state
                .lock()
                .expect("close state poisoned")
                .cause
                .clone();
            for monitor in monitors {
                monitor.connection_lost(cause.as_ref()).await;
            }
        }
    }

    fn record_close(&self, cause: Option<SkiffError>) -> bool {
        let mut cs = self.close_state.lock().expect("close state poisoned");
        if cs.closed {
            false
        } else {
            cs.closed = true;
            cs.cause = cause;
            true
        }
    }
}

async fn async_send_worker(inner: Arc<TransportInner>) {
    debug!("Asynchronous send worker started");
    loop {
        let next = {
            inner
                .async_queue
                .lock()
                .expect("async queue poisoned")
                .queue
                .pop_front()
        };

        match next {
            Some(msg) => {
                if inner.send_message(&msg).await.is_err() {
                    // The connection is broken; foreground senders will hit
                    // the same error and drive the close. The presence
                    // marker stays set: queued messages can no longer be
                    // sent by any worker.
                    debug!("Asynchronous send worker exiting after send failure");
                    return;
                }
            }
            None => {
                let timed_out =
                    tokio::time::timeout(ASYNC_IDLE_TIMEOUT, inner.async_wakeup.notified())
                        .await
                        .is_err();
                let mut q = inner.async_queue.lock().expect("async queue poisoned");
                if timed_out && q.queue.is_empty() {
                    q.worker_present = false;
                    debug!("Asynchronous send worker stopped after idle timeout");
                    return;
                }
            }
        }
    }
}

fn disconnect_payload(code: u32, description: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.put_byte(MessageType::Disconnect as u8);
    w.put_u32(code);
    w.put_string(description.as_bytes());
    w.put_string(b"");
    w.into_bytes()
}

async fn connect_direct(
    hostname: &str,
    port: u16,
    connect_timeout: Duration,
    ip_version: IpVersion,
) -> SkiffResult<TcpStream> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hostname, port)).await?.collect();
    let addr = match ip_version {
        IpVersion::Any => addrs.first().copied(),
        IpVersion::V4Only => addrs.iter().find(|a| a.is_ipv4()).copied(),
        IpVersion::V6Only => addrs.iter().find(|a| a.is_ipv6()).copied(),
    };
    let addr = addr.ok_or_else(|| {
        SkiffError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("No suitable address for {} ({:?})", hostname, ip_version),
        ))
    })?;

    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(SkiffError::Io(e)),
        Err(_) => Err(SkiffError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("Connect to {} timed out after {:?}", addr, connect_timeout),
        ))),
    }
}

/// The transport's callback surface handed to the [`KexEngine`] at
/// construction.
///
/// The engine holds this handle instead of the transport itself, which
/// breaks the ownership cycle between the two: the handle only weakly
/// references the connection, and every operation fails with `Closed`
/// once the transport is gone.
#[derive(Clone)]
pub struct KexTransport {
    inner: Weak<TransportInner>,
    hello: Hello,
    hostname: String,
    port: u16,
}

impl KexTransport {
    fn upgrade(&self) -> SkiffResult<Arc<TransportInner>> {
        self.inner.upgrade().ok_or(SkiffError::Closed(None))
    }

    /// The server hostname, as configured.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Our identification string, a mandatory exchange-hash input.
    pub fn client_id(&self) -> &str {
        self.hello.client_id()
    }

    /// The server's identification string, a mandatory exchange-hash input.
    pub fn server_id(&self) -> &str {
        self.hello.server_id()
    }

    /// Sends one KEX packet through the privileged path.
    ///
    /// Marks the key exchange as ongoing as a side effect; application
    /// senders stay parked until [`kex_finished`](Self::kex_finished).
    pub async fn send_kex_message(&self, payload: &[u8]) -> SkiffResult<()> {
        self.upgrade()?.send_kex_message(payload).await
    }

    /// Reports the completion of a key exchange, releasing parked senders.
    pub fn kex_finished(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.kex_finished();
        }
    }

    /// Installs the newly derived outbound cipher and MAC.
    ///
    /// When strict key exchange was negotiated, the send sequence number
    /// is reset at the same instant.
    pub async fn set_send_cipher(
        &self,
        cipher: Box<dyn BlockCipher>,
        mac: Option<Box<dyn PacketMac>>,
    ) -> SkiffResult<()> {
        let inner = self.upgrade()?;
        let mut tx = inner.send_half.lock().await;
        tx.set_cipher(cipher, mac);
        if inner.is_strict_kex() {
            tx.reset_sequence_number();
        }
        Ok(())
    }

    /// Installs the newly derived inbound cipher and MAC.
    ///
    /// When strict key exchange was negotiated, the receive sequence
    /// number is reset at the same instant.
    pub async fn set_recv_cipher(
        &self,
        cipher: Box<dyn BlockCipher>,
        mac: Option<Box<dyn PacketMac>>,
    ) -> SkiffResult<()> {
        let inner = self.upgrade()?;
        let mut rx = inner.recv_half.lock().await;
        rx.set_cipher(cipher, mac);
        if inner.is_strict_kex() {
            rx.reset_sequence_number();
        }
        Ok(())
    }

    /// Installs the negotiated outbound compressor.
    pub async fn set_send_compressor(&self, comp: Box<dyn Compressor>) -> SkiffResult<()> {
        let inner = self.upgrade()?;
        inner.send_half.lock().await.set_compressor(comp);
        Ok(())
    }

    /// Installs the negotiated inbound compressor.
    pub async fn set_recv_compressor(&self, comp: Box<dyn Compressor>) -> SkiffResult<()> {
        let inner = self.upgrade()?;
        inner.recv_half.lock().await.set_compressor(comp);
        Ok(())
    }
}

/// One SSH-2 transport connection.
///
/// Cheap to clone; all clones refer to the same connection. Dropping the
/// last clone does not close the socket - call [`close`](Self::close).
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Opens the connection and brings the transport up.
    ///
    /// Establishes the TCP connection (directly or through `proxy`),
    /// performs the version exchange, constructs the codec, builds the
    /// key-exchange engine through `kex_factory`, starts the initial key
    /// exchange and spawns the receive task. The receive task never
    /// prevents process exit.
    ///
    /// Returns as soon as the first key exchange is **started**; use
    /// [`connection_info`](Self::connection_info)`(1)` to wait for it to
    /// complete.
    pub async fn initialize<F>(
        config: TransportConfig,
        wishlist: CryptoWishList,
        dhgex: DhGexParameters,
        proxy: Option<Arc<dyn ProxyData>>,
        kex_factory: F,
    ) -> SkiffResult<Transport>
    where
        F: FnOnce(KexTransport) -> Arc<dyn KexEngine>,
    {
        wishlist.validate()?;

        let mut stream = match &proxy {
            Some(proxy) => {
                proxy
                    .open_connection(&config.hostname, config.port, config.connect_timeout)
                    .await?
            }
            None => {
                connect_direct(
                    &config.hostname,
                    config.port,
                    config.connect_timeout,
                    config.ip_version,
                )
                .await?
            }
        };

        let hello = version::exchange(&mut stream, &config.client_id).await?;
        debug!("Version exchange complete with '{}'", hello.server_id());

        let (read_half, write_half) = stream.into_split();
        let (gate, _) = watch::channel(Gate::default());

        let inner = Arc::new(TransportInner {
            hello: hello.clone(),
            gate,
            send_half: AsyncMutex::new(CodecSend::new(write_half)),
            recv_half: AsyncMutex::new(CodecRecv::new(read_half)),
            kex: OnceLock::new(),
            router: MessageRouter::new(),
            monitors: Mutex::new(MonitorState::default()),
            close_state: Mutex::new(CloseState::default()),
            first_kex_finished: AtomicBool::new(false),
            extension_info: RwLock::new(ExtensionInfo::none_seen()),
            async_queue: Mutex::new(AsyncQueueState::default()),
            async_wakeup: Notify::new(),
        });

        let handle = KexTransport {
            inner: Arc::downgrade(&inner),
            hello,
            hostname: config.hostname,
            port: config.port,
        };
        let engine = kex_factory(handle);
        let _ = inner.kex.set(Arc::clone(&engine));

        if let Err(e) = engine.initiate(wishlist, dhgex).await {
            inner.close_with(Some(e.clone()), false).await;
            return Err(e);
        }

        let dispatcher_inner = Arc::clone(&inner);
        tokio::spawn(DISPATCH_CONTEXT.scope((), dispatcher::run(dispatcher_inner)));

        Ok(Transport { inner })
    }

    /// Our identification string as sent on the wire.
    pub fn client_id(&self) -> &str {
        self.inner.hello.client_id()
    }

    /// The server's identification string as received on the wire.
    pub fn server_id(&self) -> &str {
        self.inner.hello.server_id()
    }

    /// Sends one application packet.
    ///
    /// Blocks while a key exchange is running; the packet is serialised
    /// after every KEX packet of that exchange.
    ///
    /// # Errors
    ///
    /// - [`SkiffError::SendFromDispatcher`] when called from the receive
    ///   task (programmer error)
    /// - [`SkiffError::Closed`] once the connection is closed
    /// - the underlying codec error after it tore the connection down
    pub async fn send_message(&self, payload: &[u8]) -> SkiffResult<()> {
        self.inner.send_message(payload).await
    }

    /// Queues a reply the transport must emit without blocking the caller
    /// (global-request replies and similar).
    ///
    /// A transient background worker drains the queue through the normal
    /// send path and disappears after two idle seconds.
    ///
    /// # Errors
    ///
    /// [`SkiffError::PeerFlooding`] when 100 replies are already queued.
    pub fn send_async_message(&self, payload: &[u8]) -> SkiffResult<()> {
        let spawn_worker = {
            let mut q = self
                .inner
                .async_queue
                .lock()
                .expect("async queue poisoned");
            if q.queue.len() >= ASYNC_QUEUE_LIMIT {
                return Err(SkiffError::PeerFlooding);
            }
            q.queue.push_back(payload.to_vec());
            if q.worker_present {
                false
            } else {
                q.worker_present = true;
                true
            }
        };

        self.inner.async_wakeup.notify_one();
        if spawn_worker {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async_send_worker(inner));
        }
        Ok(())
    }

    /// Starts a rekey with fresh algorithm preferences.
    pub async fn force_key_exchange(
        &self,
        wishlist: CryptoWishList,
        dhgex: DhGexParameters,
    ) -> SkiffResult<()> {
        wishlist.validate()?;
        let engine = self.engine()?;
        engine.initiate(wishlist, dhgex).await
    }

    /// Waits for the `kex_number`-th key exchange (1-indexed) to complete
    /// and returns its outcome.
    pub async fn connection_info(&self, kex_number: u32) -> SkiffResult<ConnectionInfo> {
        let engine = self.engine()?;
        engine.connection_info(kex_number).await
    }

    /// The exchange hash of the first key exchange; `None` until it
    /// completes.
    pub fn session_identifier(&self) -> Option<Vec<u8>> {
        self.inner.kex_engine().and_then(|k| k.session_id())
    }

    /// The extension set most recently announced by the server.
    pub fn extension_info(&self) -> ExtensionInfo {
        self.inner
            .extension_info
            .read()
            .expect("extension info poisoned")
            .clone()
    }

    /// The error that closed this connection, if it is closed and a cause
    /// was recorded.
    pub fn reason_closed_cause(&self) -> Option<SkiffError> {
        self.inner
            .close_state
            .lock()
            .expect("close state poisoned")
            .cause
            .clone()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.gate.borrow().closed
    }

    /// Upper bound on the bytes framing adds to a payload; the channel
    /// layer sizes flow-control windows with it.
    pub async fn packet_overhead_estimate(&self) -> usize {
        self.inner.send_half.lock().await.overhead_estimate()
    }

    /// Registers a handler for the inclusive message-type range
    /// `low..=high`. Ranges may overlap; the first registration wins.
    pub fn register_message_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        low: u8,
        high: u8,
    ) {
        self.inner.router.register(handler, low, high);
    }

    /// Removes the registration matching this exact handler instance and
    /// range.
    pub fn remove_message_handler(
        &self,
        handler: &Arc<dyn MessageHandler>,
        low: u8,
        high: u8,
    ) -> bool {
        self.inner.router.unregister(handler, low, high)
    }

    /// Replaces the set of connection monitors.
    ///
    /// Monitors registered after the close notification went out will
    /// never be called.
    pub fn set_connection_monitors(&self, monitors: Vec<Arc<dyn ConnectionMonitor>>) {
        let mut ms = self.inner.monitors.lock().expect("monitor list poisoned");
        ms.monitors = monitors;
    }

    /// Closes the connection.
    ///
    /// With `polite`, an `SSH_MSG_DISCONNECT` (reason
    /// `SSH_DISCONNECT_BY_APPLICATION`, description from `cause`) is sent
    /// before the socket goes down, I/O errors ignored. Without it, the
    /// socket is torn down immediately so blocked senders wake.
    ///
    /// Observable effects happen exactly once no matter how many calls
    /// and failure paths race: one recorded cause, one notification per
    /// monitor.
    pub async fn close(&self, cause: Option<SkiffError>, polite: bool) {
        self.inner.close_with(cause, polite).await;
    }

    fn engine(&self) -> SkiffResult<Arc<dyn KexEngine>> {
        self.inner
            .kex_engine()
            .ok_or_else(|| SkiffError::Protocol("No key exchange engine installed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::wire::PacketReader;

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::new("server.example.org", 2222);
        assert_eq!(config.hostname, "server.example.org");
        assert_eq!(config.port, 2222);
        assert_eq!(config.ip_version, IpVersion::Any);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.client_id.starts_with("SSH-2.0-"));
    }

    #[test]
    fn test_disconnect_payload_format() {
        let payload = disconnect_payload(SSH_DISCONNECT_BY_APPLICATION, "bye");

        let mut r = PacketReader::new(&payload);
        assert_eq!(r.read_byte().unwrap(), MessageType::Disconnect as u8);
        assert_eq!(r.read_u32().unwrap(), 11);
        assert_eq!(r.read_string().unwrap(), b"bye");
        assert_eq!(r.read_string().unwrap(), b"");
        assert_eq!(r.remaining(), 0);
    }
}
