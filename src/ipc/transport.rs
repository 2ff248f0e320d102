//! Transport primitive: one blocking command/reply exchange per call.
//!
//! A [`Transport`] is the shared, process-wide channel object. It opens one
//! [`Conversation`] per peer name. Each conversation carries exactly one
//! outstanding request at a time; the caller blocks until the reply arrives
//! or the timeout elapses.
//!
//! [`SocketTransport`] is the production implementation. It speaks the
//! Content-Length framing from [`crate::ipc::framing`] over Unix domain
//! sockets and drives the sockets from a current-thread tokio runtime, so no
//! background thread is ever spawned.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::runtime::Runtime;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::{LinkConfig, TextEncoding};
use crate::error::LinkError;
use crate::ipc::framing::{write_message, Frame, FrameReader};
use crate::ipc::registry::PeerName;

/// Request id carried by the handshake frame. Requests start at 1.
const HANDSHAKE_ID: u64 = 0;

/// Longest wait a single exchange schedules; longer timeouts are clamped.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// An established conversation with one peer.
pub trait Conversation: Send {
    /// Peer this conversation talks to.
    fn peer(&self) -> &PeerName;

    /// Send `command` and block until the reply arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Timeout`] if no reply arrived in time (recoverable)
    /// - [`LinkError::Transport`] if the channel failed (the conversation is
    ///   disconnected afterwards)
    /// - [`LinkError::NotConnected`] after [`Conversation::disconnect`]
    fn request(&mut self, command: &str, timeout: Duration) -> Result<String, LinkError>;

    /// Release the channel. Calling it again does nothing.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Shared channel object that opens conversations by peer name.
pub trait Transport: Send + Sync {
    /// Establish a conversation with `peer`, including the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Connection`] if the peer is not running, refuses
    /// the handshake, or a different instance answers at that name.
    fn connect(&self, peer: &PeerName, timeout: Duration)
        -> Result<Box<dyn Conversation>, LinkError>;
}

/// Builds the shared [`Transport`] when the first channel needs it.
pub trait TransportFactory: Send + Sync {
    fn start(&self) -> Result<Arc<dyn Transport>, LinkError>;
}

/// Factory for [`SocketTransport`].
pub struct SocketTransportFactory {
    config: LinkConfig,
}

impl SocketTransportFactory {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for SocketTransportFactory {
    fn start(&self) -> Result<Arc<dyn Transport>, LinkError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LinkError::Transport(format!("Failed to start channel runtime: {}", e)))?;

        Ok(Arc::new(SocketTransport {
            runtime: Arc::new(ChannelRuntime(Some(runtime))),
            socket_dir: self.config.resolved_socket_dir(),
            client_name: self.config.client_name.clone(),
            encoding: self.config.text_encoding,
        }))
    }
}

/// Runtime shared by a transport and its conversations.
///
/// The last owner may be dropped inside another tokio runtime, so shutdown
/// never blocks.
struct ChannelRuntime(Option<Runtime>);

impl ChannelRuntime {
    fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output, LinkError> {
        match &self.0 {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(LinkError::NotConnected),
        }
    }
}

impl Drop for ChannelRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Local-socket transport.
///
/// Every peer name maps to `<socket_dir>/<name>.sock`.
pub struct SocketTransport {
    runtime: Arc<ChannelRuntime>,
    socket_dir: PathBuf,
    client_name: String,
    encoding: TextEncoding,
}

impl SocketTransport {
    /// Socket path for a peer.
    pub fn socket_path(&self, peer: &PeerName) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", peer.as_str()))
    }
}

impl Transport for SocketTransport {
    fn connect(
        &self,
        peer: &PeerName,
        timeout: Duration,
    ) -> Result<Box<dyn Conversation>, LinkError> {
        let path = self.socket_path(peer);
        debug!("Connecting to {} at {}", peer, path.display());

        let (reader, writer) = self
            .runtime
            .block_on(open_channel(peer, &path, &self.client_name, timeout))??;

        info!("Conversation with {} established", peer);
        Ok(Box::new(SocketConversation {
            reader,
            writer: Some(writer),
            peer: peer.clone(),
            next_id: HANDSHAKE_ID + 1,
            encoding: self.encoding,
            runtime: Arc::clone(&self.runtime),
        }))
    }
}

/// Connect the socket and run the handshake, both bounded by `timeout`.
async fn open_channel(
    peer: &PeerName,
    path: &Path,
    client_name: &str,
    timeout: Duration,
) -> Result<(FrameReader<OwnedReadHalf>, OwnedWriteHalf), LinkError> {
    let stream = match time::timeout(timeout, UnixStream::connect(path)).await {
        Err(_) => {
            return Err(LinkError::connection(
                peer.as_str(),
                format!("no answer from {} within {:?}", path.display(), timeout),
            ))
        }
        Ok(Err(e)) => {
            let reason = match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    format!("peer is not running (no listener at {})", path.display())
                }
                _ => format!("cannot open {}", path.display()),
            };
            return Err(LinkError::Connection {
                peer: peer.to_string(),
                reason,
                source: Some(e),
            });
        }
        Ok(Ok(stream)) => stream,
    };

    let (read_half, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(read_half);

    let answer = time::timeout(timeout, handshake(&mut reader, &mut writer, client_name)).await;
    match answer {
        Err(_) => Err(LinkError::connection(
            peer.as_str(),
            format!("handshake not answered within {:?}", timeout),
        )),
        Ok(Err(e)) => Err(LinkError::connection(
            peer.as_str(),
            format!("handshake failed: {:#}", e),
        )),
        Ok(Ok(None)) => Err(LinkError::connection(
            peer.as_str(),
            "peer closed the connection during the handshake",
        )),
        Ok(Ok(Some(frame))) => {
            let answered_as = frame.body.trim_end();
            if answered_as != peer.as_str() {
                return Err(LinkError::connection(
                    peer.as_str(),
                    format!(
                        "a different instance ({}) is bound at {}",
                        answered_as,
                        path.display()
                    ),
                ));
            }
            Ok((reader, writer))
        }
    }
}

async fn handshake(
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    client_name: &str,
) -> anyhow::Result<Option<Frame>> {
    write_message(writer, Some(HANDSHAKE_ID), client_name).await?;
    reader.read_frame().await
}

/// Conversation over one Unix socket.
pub struct SocketConversation {
    // Socket halves are declared before the runtime so they drop first.
    reader: FrameReader<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    peer: PeerName,
    next_id: u64,
    encoding: TextEncoding,
    runtime: Arc<ChannelRuntime>,
}

impl Conversation for SocketConversation {
    fn peer(&self) -> &PeerName {
        &self.peer
    }

    fn request(&mut self, command: &str, timeout: Duration) -> Result<String, LinkError> {
        self.encoding.check(command)?;

        let id = self.next_id;
        let Some(writer) = self.writer.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        self.next_id += 1;

        debug!("-> {} [{}] {}", self.peer, id, command);
        let result = self
            .runtime
            .block_on(exchange(&mut self.reader, writer, id, command, timeout))
            .and_then(|result| result);

        match &result {
            Ok(reply) => debug!("<- {} [{}] {}", self.peer, id, reply.trim_end()),
            Err(LinkError::Timeout(_)) => {
                warn!("Request {} to {} timed out after {:?}", id, self.peer, timeout)
            }
            Err(e) if e.is_fatal() => {
                warn!("Conversation with {} failed: {}", self.peer, e);
                self.disconnect();
            }
            Err(_) => {}
        }
        result
    }

    fn disconnect(&mut self) {
        // Dropping the write half shuts down the write side of the socket.
        // Nothing here may block: this runs from `Drop` as well.
        if self.writer.take().is_some() {
            info!("Conversation with {} closed", self.peer);
        }
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

/// One request/reply exchange, bounded by a single deadline.
///
/// Replies tagged with another request id are left over from requests that
/// already timed out and are skipped.
async fn exchange(
    reader: &mut FrameReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    id: u64,
    command: &str,
    timeout: Duration,
) -> Result<String, LinkError> {
    let deadline = Instant::now() + timeout.min(FAR_FUTURE);

    match time::timeout_at(deadline, write_message(writer, Some(id), command)).await {
        Err(_) => {
            return Err(LinkError::Transport(format!(
                "stalled while sending request {}",
                id
            )))
        }
        Ok(Err(e)) => return Err(LinkError::Transport(format!("{:#}", e))),
        Ok(Ok(())) => {}
    }

    loop {
        match time::timeout_at(deadline, reader.read_frame()).await {
            Err(_) => return Err(LinkError::Timeout(timeout)),
            Ok(Err(e)) => return Err(LinkError::Transport(format!("{:#}", e))),
            Ok(Ok(None)) => {
                return Err(LinkError::Transport(
                    "peer closed the conversation".to_string(),
                ))
            }
            Ok(Ok(Some(frame))) => match frame.request_id {
                Some(reply_id) if reply_id != id => {
                    warn!("Discarding stale reply {} while waiting for {}", reply_id, id);
                }
                _ => return Ok(frame.body),
            },
        }
    }
}

/// In-memory transport for unit tests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Handler = dyn Fn(&str, Duration) -> Result<String, LinkError> + Send + Sync;

    /// Counters shared by every object the mock creates.
    #[derive(Default)]
    pub(crate) struct MockStats {
        pub started: AtomicUsize,
        pub dropped: AtomicUsize,
        pub connects: AtomicUsize,
        pub disconnects: AtomicUsize,
        pub requests: AtomicUsize,
    }

    impl MockStats {
        pub fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    /// A scripted peer: every request is answered by `handler`.
    #[derive(Clone)]
    pub(crate) struct MockPeer {
        pub stats: Arc<MockStats>,
        pub offline: Arc<AtomicBool>,
        handler: Arc<Handler>,
    }

    impl MockPeer {
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&str, Duration) -> Result<String, LinkError> + Send + Sync + 'static,
        {
            Self {
                stats: Arc::new(MockStats::default()),
                offline: Arc::new(AtomicBool::new(false)),
                handler: Arc::new(handler),
            }
        }

        /// Peer that echoes every command back.
        pub fn echo() -> Self {
            Self::new(|command, _| Ok(format!("{}\r\n", command)))
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn factory(&self) -> Box<dyn TransportFactory> {
            Box::new(self.clone())
        }
    }

    impl TransportFactory for MockPeer {
        fn start(&self) -> Result<Arc<dyn Transport>, LinkError> {
            self.stats.started.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockTransport { peer: self.clone() }))
        }
    }

    struct MockTransport {
        peer: MockPeer,
    }

    impl Drop for MockTransport {
        fn drop(&mut self) {
            self.peer.stats.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Transport for MockTransport {
        fn connect(
            &self,
            peer: &PeerName,
            _timeout: Duration,
        ) -> Result<Box<dyn Conversation>, LinkError> {
            if self.peer.offline.load(Ordering::SeqCst) {
                return Err(LinkError::connection(peer.as_str(), "peer is not running"));
            }
            self.peer.stats.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConversation {
                name: peer.clone(),
                peer: self.peer.clone(),
                connected: true,
            }))
        }
    }

    struct MockConversation {
        name: PeerName,
        peer: MockPeer,
        connected: bool,
    }

    impl Conversation for MockConversation {
        fn peer(&self) -> &PeerName {
            &self.name
        }

        fn request(&mut self, command: &str, timeout: Duration) -> Result<String, LinkError> {
            if !self.connected {
                return Err(LinkError::NotConnected);
            }
            self.peer.stats.requests.fetch_add(1, Ordering::SeqCst);
            let result = (self.peer.handler)(command, timeout);
            if matches!(result, Err(LinkError::Transport(_))) {
                self.disconnect();
            }
            result
        }

        fn disconnect(&mut self) {
            if self.connected {
                self.connected = false;
                self.peer.stats.disconnects.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }
}
