//! zdde: a client library for driving Zemax over a request/reply channel.
//!
//! The crate is organised in layers:
//!
//! - `ipc` - the channel: registry of peer names, transport, client handle
//! - `codec` - command encoding and reply decoding
//! - `operations` - the table of known commands and their reply shapes
//! - `ops` / `models` - typed wrappers for common commands
//! - `config` - settings from file and environment
//!
//! # Example
//!
//! ```ignore
//! use zdde::ZemaxLink;
//!
//! let link = ZemaxLink::connect()?;
//! let system = link.get_system()?;
//! println!("{} surfaces", system.num_surfaces);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod models;
pub mod operations;
pub mod ops;

pub use codec::{Arg, FieldType, Reply, ReplyShape, Value};
pub use config::{LinkConfig, TextEncoding};
pub use error::LinkError;
pub use ipc::{ChannelRegistry, LinkState, PeerName, ZemaxLink};
pub use operations::Operation;
