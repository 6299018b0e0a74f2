// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live view sessions: transports, per-client session state and the
//! server-wide registry that evicts them.
//!
//! * [`transport`] – the send/close capability both transports implement.
//! * [`buffered`] – one-shot transport collecting sends for an SSR response.
//! * [`live`] – sequenced transport feeding a duplex connection.
//! * [`session`] – render state, bus wiring and event dispatch for one client.
//! * [`registry`] / [`ttl`] – session lookup, connection binding and expiry.

pub mod buffered;
pub mod live;
pub mod registry;
pub mod session;
pub mod transport;
pub mod ttl;

pub use buffered::{BufferedMessage, BufferedTransport};
pub use live::LiveTransport;
pub use registry::{spawn_sweeper, Registry, RegistryError, SweeperHandle};
pub use session::{ObserverId, Session, SessionConfig, SessionError, TouchObserver, View};
pub use transport::{close_quietly, RequestInfo, Transport, TransportError};
pub use ttl::{MemoryTtlStore, TtlStore};
