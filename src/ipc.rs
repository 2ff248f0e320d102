//! Channel layer between this process and running Zemax instances.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                         ┌─────────────────────┐
//! │  ZemaxLink #1   │──┐                   ┌─►│  Zemax ("ZEMAX")    │
//! └─────────────────┘  │  ChannelRegistry  │  └─────────────────────┘
//!                      ├─► (names, live,  ─┤
//! ┌─────────────────┐  │   shared server)  │  ┌─────────────────────┐
//! │  ZemaxLink #2   │──┘                   └─►│  Zemax ("ZEMAX1")   │
//! └─────────────────┘                         └─────────────────────┘
//! ```
//!
//! Each peer listens on `<socket_dir>/<PeerName>.sock`. A conversation starts
//! with a handshake: the client sends its own name and the peer answers with
//! the name it is serving under.
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing. Requests carry a
//! `Request-Id` header so that a reply arriving after its request timed out
//! can be told apart from the next one:
//!
//! ```text
//! Content-Length: 10\r\n
//! Request-Id: 7\r\n
//! \r\n
//! GetVersion
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use zdde::ipc::ZemaxLink;
//!
//! let link = ZemaxLink::connect()?;
//! let raw = link.request("GetVersion")?;
//! ```

pub mod client;
pub mod framing;
pub mod registry;
pub mod transport;

pub use client::{LinkState, ZemaxLink};
pub use framing::{write_message, Frame, FrameReader};
pub use registry::{ChannelRegistry, PeerName, MAX_CHANNELS};
pub use transport::{Conversation, SocketTransportFactory, Transport, TransportFactory};
