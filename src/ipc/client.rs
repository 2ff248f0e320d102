//! Client handle for one conversation with a running Zemax instance.
//!
//! This module provides [`ZemaxLink`], the object callers own. A link takes a
//! peer name from the [`ChannelRegistry`], opens a conversation through the
//! registry's shared transport, and releases both exactly once when it is
//! closed or dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::codec::{decode_reply, encode_command, Arg, Reply, ReplyShape};
use crate::error::LinkError;
use crate::ipc::registry::{ChannelRegistry, PeerName};
use crate::ipc::transport::Conversation;
use crate::operations::{self, Operation};

/// Connection state of a [`ZemaxLink`].
///
/// Links only move forward: `Unconnected -> Connected -> Closed`. A closed
/// link is never reopened; create a new one instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unconnected,
    Connected,
    Closed,
}

struct LinkInner {
    state: LinkState,
    peer: Option<PeerName>,
    conversation: Option<Box<dyn Conversation>>,
    timeout: Duration,
}

/// A link to one running Zemax instance.
///
/// Every request on a link is serialised: a second call blocks until the
/// first has returned. Separate links are independent and can be used from
/// different threads at the same time.
///
/// # Connection Lifecycle
///
/// - `open()` - reserve a peer name and connect
/// - `send()` / `request()` - exchange commands (blocking, with timeout)
/// - `close()` - disconnect and give the peer name back (also run on drop)
///
/// # Example
///
/// ```ignore
/// use zdde::{Arg, ZemaxLink};
///
/// let link = ZemaxLink::connect()?;
/// let version = link.send("GetVersion", &[])?;
/// let trace = link.send(
///     "GetTrace",
///     &[Arg::from(1), Arg::from(0), Arg::from(-1), 0.0.into(), 1.0.into(), 0.0.into(), 0.0.into()],
/// )?;
/// link.close();
/// ```
pub struct ZemaxLink {
    registry: Arc<ChannelRegistry>,
    inner: Mutex<LinkInner>,
}

impl ZemaxLink {
    /// Create an unconnected link on the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(ChannelRegistry::global())
    }

    /// Create an unconnected link on an explicit registry.
    pub fn with_registry(registry: Arc<ChannelRegistry>) -> Self {
        let timeout = registry.default_timeout();
        Self {
            registry,
            inner: Mutex::new(LinkInner {
                state: LinkState::Unconnected,
                peer: None,
                conversation: None,
                timeout,
            }),
        }
    }

    /// Create a link on the process-wide registry and open it.
    pub fn connect() -> Result<Self, LinkError> {
        Self::connect_with(ChannelRegistry::global())
    }

    /// Create a link on `registry` and open it.
    pub fn connect_with(registry: Arc<ChannelRegistry>) -> Result<Self, LinkError> {
        let link = Self::with_registry(registry);
        link.open()?;
        Ok(link)
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a peer name and establish the conversation.
    ///
    /// If anything fails after the name was reserved, the name is given back
    /// and the live count is left untouched. Failures are not retried.
    ///
    /// # Errors
    ///
    /// - [`LinkError::AlreadyOpened`] if the link is not `Unconnected`
    /// - [`LinkError::Capacity`] if every peer name is in use
    /// - [`LinkError::Connection`] if the peer cannot be reached
    pub fn open(&self) -> Result<(), LinkError> {
        let mut inner = self.lock();
        if inner.state != LinkState::Unconnected {
            return Err(LinkError::AlreadyOpened(inner.state));
        }

        let peer = self.registry.acquire_peer_name()?;
        let connected = self
            .registry
            .transport()
            .and_then(|transport| transport.connect(&peer, inner.timeout));

        match connected {
            Ok(conversation) => {
                let live = self.registry.increment_live();
                info!("Link to {} open ({} live)", peer, live);
                inner.conversation = Some(conversation);
                inner.peer = Some(peer);
                inner.state = LinkState::Connected;
                Ok(())
            }
            Err(e) => {
                warn!("Could not open link to {}: {}", peer, e);
                self.registry.release_peer_name(&peer);
                Err(e)
            }
        }
    }

    /// Disconnect and return the peer name to the registry.
    ///
    /// Safe to call any number of times; only the first call on a connected
    /// link touches the registry. Never panics.
    pub fn close(&self) {
        let mut inner = self.lock();
        self.close_locked(&mut inner);
    }

    fn close_locked(&self, inner: &mut LinkInner) {
        match inner.state {
            LinkState::Closed => {}
            LinkState::Unconnected => {
                debug!("Closing a link that was never opened");
                inner.state = LinkState::Closed;
            }
            LinkState::Connected => {
                if let Some(mut conversation) = inner.conversation.take() {
                    conversation.disconnect();
                }
                let live = self.registry.decrement_live();
                if let Some(peer) = inner.peer.take() {
                    self.registry.release_peer_name(&peer);
                    info!("Link to {} closed ({} live)", peer, live);
                }
                inner.state = LinkState::Closed;
            }
        }
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Peer name held by this link while it is connected.
    pub fn peer_name(&self) -> Option<PeerName> {
        self.lock().peer.clone()
    }

    /// Current request timeout.
    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    /// Set the timeout used by every later request. Returns the new value.
    pub fn set_timeout(&self, timeout: Duration) -> Duration {
        let mut inner = self.lock();
        inner.timeout = timeout;
        inner.timeout
    }

    /// Send a raw command string and return the raw reply.
    ///
    /// # Errors
    ///
    /// - [`LinkError::NotConnected`] unless the link is `Connected`
    /// - [`LinkError::Timeout`] if no reply arrived in time; the link stays
    ///   connected
    /// - [`LinkError::Transport`] if the channel failed; the link is closed
    pub fn request(&self, command: &str) -> Result<String, LinkError> {
        let mut inner = self.lock();
        if inner.state != LinkState::Connected {
            return Err(LinkError::NotConnected);
        }

        let timeout = inner.timeout;
        let result = match inner.conversation.as_mut() {
            Some(conversation) => conversation.request(command, timeout),
            None => Err(LinkError::NotConnected),
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                self.close_locked(&mut inner);
            }
        }
        result
    }

    /// Encode `name` and `args`, send them and decode the reply.
    ///
    /// The reply shape comes from the operation table; names not in the table
    /// are decoded field by field with literal inference.
    pub fn send(&self, name: &str, args: &[Arg]) -> Result<Reply, LinkError> {
        if let Some(op) = operations::lookup(name) {
            return self.send_op(op, args);
        }
        debug!("{} is not in the operation table; inferring reply types", name);
        let command = encode_command(name, args)?;
        let raw = self.request(&command)?;
        decode_reply(name, &ReplyShape::Literals, &raw)
    }

    /// Encode and send one operation, decoding the reply by its shape.
    pub fn send_op(&self, op: &Operation, args: &[Arg]) -> Result<Reply, LinkError> {
        let command = encode_command(op.name, args)?;
        let raw = self.request(&command)?;
        decode_reply(op.name, &op.reply, &raw)
    }
}

impl Default for ZemaxLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ZemaxLink {
    fn drop(&mut self) {
        if self.is_connected() {
            debug!("Closing link on drop");
        }
        self.close();
    }
}

impl std::fmt::Debug for ZemaxLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ZemaxLink")
            .field("state", &inner.state)
            .field("peer", &inner.peer)
            .field("timeout", &inner.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::config::LinkConfig;
    use crate::ipc::transport::mock::{MockPeer, MockStats};
    use pretty_assertions::assert_eq;

    fn registry_for(peer: &MockPeer) -> Arc<ChannelRegistry> {
        Arc::new(ChannelRegistry::new(&LinkConfig::default(), peer.factory()))
    }

    #[test]
    fn test_new_link_is_unconnected() {
        let peer = MockPeer::echo();
        let link = ZemaxLink::with_registry(registry_for(&peer));

        assert_eq!(link.state(), LinkState::Unconnected);
        assert_eq!(link.peer_name(), None);
        assert_eq!(link.timeout(), Duration::from_secs(50));
        assert!(matches!(link.request("GetVersion"), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_open_and_close_update_registry() {
        let peer = MockPeer::echo();
        let registry = registry_for(&peer);
        let link = ZemaxLink::with_registry(Arc::clone(&registry));

        link.open().unwrap();
        assert_eq!(link.state(), LinkState::Connected);
        assert_eq!(link.peer_name(), Some(PeerName::new("ZEMAX")));
        assert_eq!(registry.live_count(), 1);
        assert!(registry.is_server_running());

        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(link.peer_name(), None);
        assert_eq!(registry.live_count(), 0);
        assert!(!registry.is_server_running());
        assert_eq!(MockStats::get(&peer.stats.disconnects), 1);
    }

    #[test]
    fn test_open_twice_is_refused_without_side_effects() {
        let peer = MockPeer::echo();
        let registry = registry_for(&peer);
        let link = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();

        let err = link.open().unwrap_err();
        assert!(matches!(err, LinkError::AlreadyOpened(LinkState::Connected)));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(MockStats::get(&peer.stats.connects), 1);

        link.close();
        let err = link.open().unwrap_err();
        assert!(matches!(err, LinkError::AlreadyOpened(LinkState::Closed)));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_capacity_bound_and_name_reuse() {
        let peer = MockPeer::echo();
        let registry = registry_for(&peer);

        let first = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();
        let second = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();
        assert_eq!(second.peer_name(), Some(PeerName::new("ZEMAX1")));

        let third = ZemaxLink::with_registry(Arc::clone(&registry));
        let err = third.open().unwrap_err();
        assert!(matches!(err, LinkError::Capacity { pool_size: 2 }));
        assert_eq!(third.state(), LinkState::Unconnected);
        assert_eq!(registry.live_count(), 2);

        let first_name = first.peer_name();
        first.close();

        third.open().unwrap();
        assert_eq!(third.peer_name(), first_name);
        assert_eq!(registry.live_count(), 2);
        drop(second);
        drop(third);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_close_twice_and_drop_decrement_once() {
        let peer = MockPeer::echo();
        let registry = registry_for(&peer);
        let keep = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();
        let link = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();
        assert_eq!(registry.live_count(), 2);

        link.close();
        link.close();
        drop(link);

        assert_eq!(registry.live_count(), 1);
        assert!(keep.is_connected());
        assert!(registry.is_server_running());
        assert_eq!(MockStats::get(&peer.stats.disconnects), 1);
    }

    #[test]
    fn test_failed_open_leaves_no_partial_state() {
        let peer = MockPeer::echo();
        let registry = registry_for(&peer);

        peer.set_offline(true);
        let link = ZemaxLink::with_registry(Arc::clone(&registry));
        let err = link.open().unwrap_err();
        assert!(matches!(err, LinkError::Connection { .. }));
        assert_eq!(link.state(), LinkState::Unconnected);
        assert_eq!(registry.live_count(), 0);
        assert!(!registry.is_server_running());

        peer.set_offline(false);
        let fresh = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();
        assert_eq!(fresh.peer_name(), Some(PeerName::new("ZEMAX")));
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_timeout_does_not_close_link() {
        let peer = MockPeer::new(|command, timeout| match command {
            "GetUpdate" => Err(LinkError::Timeout(timeout)),
            _ => Ok("0\r\n".to_string()),
        });
        let registry = registry_for(&peer);
        let link = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();
        link.set_timeout(Duration::from_secs(3));

        let err = link.request("GetUpdate").unwrap_err();
        assert!(matches!(err, LinkError::Timeout(t) if t == Duration::from_secs(3)));
        assert_eq!(link.state(), LinkState::Connected);

        assert_eq!(link.request("GetRefresh").unwrap(), "0\r\n");
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_transport_error_closes_link() {
        let peer = MockPeer::new(|_, _| Err(LinkError::Transport("peer died".to_string())));
        let registry = registry_for(&peer);
        let link = ZemaxLink::connect_with(Arc::clone(&registry)).unwrap();

        let err = link.request("GetVersion").unwrap_err();
        assert!(matches!(err, LinkError::Transport(_)));
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(registry.live_count(), 0);
        assert!(!registry.is_server_running());

        assert!(matches!(link.request("GetVersion"), Err(LinkError::NotConnected)));
        drop(link);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_send_decodes_through_operation_table() {
        let peer = MockPeer::new(|command, _| match command {
            "GetSystem" => Ok("5,0,2,0,0,1,20.0,1,1,0\r\n".to_string()),
            c if c.starts_with("GetTrace,1,0,-1,") => {
                Ok("0,0,0.0,1.5,0.0,0.0,0.0,1.0,0.0,0.0,1.0,1.0".to_string())
            }
            _ => Ok("BAD COMMAND\r\n".to_string()),
        });
        let link = ZemaxLink::connect_with(registry_for(&peer)).unwrap();

        let system = link.send("GetSystem", &[]).unwrap();
        assert_eq!(system.len(), 10);
        assert_eq!(system.get(0), Some(&Value::Int(5)));
        assert_eq!(system.get(6), Some(&Value::Float(20.0)));

        let trace = link
            .send(
                "GetTrace",
                &[
                    Arg::from(1),
                    Arg::from(0),
                    Arg::from(-1),
                    Arg::from(0.0),
                    Arg::from(1.0),
                    Arg::from(0.0),
                    Arg::from(0.0),
                ],
            )
            .unwrap();
        assert_eq!(trace.get(0), Some(&Value::Int(0)));
        assert_eq!(trace.float(3).unwrap(), 1.5);

        let err = link.send("GetPupil", &[]).unwrap_err();
        assert!(matches!(err, LinkError::RemoteRejected { ref command } if command == "GetPupil"));
        assert!(link.is_connected());
    }

    #[test]
    fn test_send_unknown_operation_infers_literals() {
        let peer = MockPeer::new(|_, _| Ok("OK,3,2.5e-1".to_string()));
        let link = ZemaxLink::connect_with(registry_for(&peer)).unwrap();

        let reply = link.send("SomethingNew", &[Arg::from("x")]).unwrap();
        assert_eq!(
            reply.values(),
            &[
                Value::Str("OK".to_string()),
                Value::Int(3),
                Value::Float(0.25)
            ]
        );
    }

    #[test]
    fn test_requests_on_one_link_are_serialised() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (flight, seen) = (Arc::clone(&in_flight), Arc::clone(&max_seen));
        let peer = MockPeer::new(move |_, _| {
            let now = flight.fetch_add(1, Ordering::SeqCst) + 1;
            seen.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            flight.fetch_sub(1, Ordering::SeqCst);
            Ok("0".to_string())
        });
        let link = Arc::new(ZemaxLink::connect_with(registry_for(&peer)).unwrap());

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let link = Arc::clone(&link);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        link.request("GetRefresh").unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(MockStats::get(&peer.stats.requests), 20);
    }

    #[test]
    fn test_close_unopened_link() {
        let peer = MockPeer::echo();
        let registry = registry_for(&peer);
        let link = ZemaxLink::with_registry(Arc::clone(&registry));

        link.close();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(MockStats::get(&peer.stats.started), 0);
    }
}
