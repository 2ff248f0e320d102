//! Process-wide channel bookkeeping.
//!
//! The peer application tells simultaneous instances apart by name
//! (`ZEMAX`, `ZEMAX1`). [`ChannelRegistry`] hands those names out to client
//! handles, counts the live channels and owns the shared transport object,
//! which is started on first use and dropped once the last handle is gone.
//! All of that state sits behind one mutex.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::ipc::transport::{SocketTransportFactory, Transport, TransportFactory};

/// Number of peer instances that can be addressed at once.
pub const MAX_CHANNELS: usize = 2;

/// Name of one addressable peer instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerName(String);

impl PeerName {
    /// Wrap a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name for pool slot `index`: the base name, then base name + index.
    pub fn for_slot(base: &str, index: usize) -> Self {
        if index == 0 {
            Self(base.to_string())
        } else {
            Self(format!("{}{}", base, index))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct RegistryState {
    live: usize,
    in_use: Vec<bool>,
    transport: Option<Arc<dyn Transport>>,
}

impl RegistryState {
    fn idle(&self) -> bool {
        self.live == 0 && self.in_use.iter().all(|used| !used)
    }

    /// Take the shared transport out once nothing holds a channel.
    fn take_if_idle(&mut self) -> Option<Arc<dyn Transport>> {
        if self.idle() {
            self.transport.take()
        } else {
            None
        }
    }
}

/// Shared registry of peer names, live channels and the transport object.
pub struct ChannelRegistry {
    names: Vec<PeerName>,
    default_timeout: Duration,
    factory: Box<dyn TransportFactory>,
    state: Mutex<RegistryState>,
}

impl ChannelRegistry {
    /// Build a registry over the given transport factory.
    pub fn new(config: &LinkConfig, factory: Box<dyn TransportFactory>) -> Self {
        let names = (0..MAX_CHANNELS)
            .map(|index| PeerName::for_slot(&config.base_name, index))
            .collect();

        Self {
            names,
            default_timeout: config.timeout(),
            factory,
            state: Mutex::new(RegistryState {
                live: 0,
                in_use: vec![false; MAX_CHANNELS],
                transport: None,
            }),
        }
    }

    /// Build a registry that talks to peers over local sockets.
    pub fn with_sockets(config: &LinkConfig) -> Self {
        Self::new(config, Box::new(SocketTransportFactory::new(config.clone())))
    }

    /// The process-wide registry used by [`ZemaxLink::new`].
    ///
    /// Built on first use from [`LinkConfig::load`]; an unreadable or invalid
    /// configuration falls back to the defaults with a warning.
    ///
    /// [`ZemaxLink::new`]: crate::ipc::ZemaxLink::new
    pub fn global() -> Arc<ChannelRegistry> {
        static GLOBAL: OnceLock<Arc<ChannelRegistry>> = OnceLock::new();

        GLOBAL
            .get_or_init(|| {
                let config = LinkConfig::load().unwrap_or_else(|e| {
                    warn!("Ignoring link configuration: {:#}", e);
                    LinkConfig::default()
                });
                Arc::new(ChannelRegistry::with_sockets(&config))
            })
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the first free peer name.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Capacity`] when every name is held.
    pub fn acquire_peer_name(&self) -> Result<PeerName, LinkError> {
        let mut state = self.lock();
        let Some(index) = state.in_use.iter().position(|used| !used) else {
            return Err(LinkError::Capacity {
                pool_size: self.names.len(),
            });
        };
        state.in_use[index] = true;
        debug!("Reserved peer name {}", self.names[index]);
        Ok(self.names[index].clone())
    }

    /// Return a peer name to the pool.
    ///
    /// Releasing a free or unknown name does nothing.
    pub fn release_peer_name(&self, name: &PeerName) {
        let retired = {
            let mut state = self.lock();
            match self.names.iter().position(|n| n == name) {
                Some(index) if state.in_use[index] => {
                    state.in_use[index] = false;
                    debug!("Released peer name {}", name);
                }
                Some(_) => debug!("Peer name {} was already free", name),
                None => debug!("Ignoring release of unknown peer name {}", name),
            }
            state.take_if_idle()
        };
        shut_down(retired);
    }

    /// Count one more live channel. Returns the new count.
    pub fn increment_live(&self) -> usize {
        let mut state = self.lock();
        if state.live >= self.names.len() {
            warn!(
                "Live channel count already at pool size {}; not incrementing",
                self.names.len()
            );
        } else {
            state.live += 1;
        }
        state.live
    }

    /// Count one fewer live channel. Returns the new count.
    ///
    /// The count never goes below zero.
    pub fn decrement_live(&self) -> usize {
        let (live, retired) = {
            let mut state = self.lock();
            if state.live == 0 {
                warn!("Live channel count already zero; not decrementing");
            } else {
                state.live -= 1;
            }
            (state.live, state.take_if_idle())
        };
        shut_down(retired);
        live
    }

    /// The shared transport, started on first use.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, LinkError> {
        let mut state = self.lock();
        if let Some(transport) = &state.transport {
            return Ok(Arc::clone(transport));
        }
        let transport = self.factory.start()?;
        info!("Channel server started");
        state.transport = Some(Arc::clone(&transport));
        Ok(transport)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live
    }

    pub fn pool_size(&self) -> usize {
        self.names.len()
    }

    /// Whether the shared transport object currently exists.
    pub fn is_server_running(&self) -> bool {
        self.lock().transport.is_some()
    }

    /// All names in the pool, in allocation order.
    pub fn peer_names(&self) -> &[PeerName] {
        &self.names
    }

    /// Timeout new handles start with.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ChannelRegistry")
            .field("names", &self.names)
            .field("live", &state.live)
            .field("in_use", &state.in_use)
            .field("server_running", &state.transport.is_some())
            .finish()
    }
}

/// Drop a retired transport outside the registry lock.
fn shut_down(retired: Option<Arc<dyn Transport>>) {
    if let Some(transport) = retired {
        drop(transport);
        info!("Channel server shut down");
    }
}
