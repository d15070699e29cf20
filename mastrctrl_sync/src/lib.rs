//! Synchronization core for the MastrCtrl control surface.
//!
//! Every surface on the channel holds the same parameter set. [`SyncSession`]
//! wires the connection manager, message router, parameter registry and
//! display arbiter together; [`actor::spawn`] runs one on tokio against a real
//! WebSocket.

pub mod actor;
pub mod bridge;
pub mod clock;
pub mod color;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod format;
pub mod hardware;
pub mod hash;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
pub mod timer;
pub mod ws_transport;

pub use actor::{SessionCommand, SessionHandle};
pub use bridge::{HostBridge, HostEvent, HostParameter};
pub use clock::{Clock, ManualClock, Millis, SharedClock, SystemClock};
pub use config::{BackoffPolicy, EndpointList, ServerEndpoint, SyncConfig};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, Transport, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
pub use display::{DisplayArbiter, DisplayState};
pub use error::{ConfigError, ProtocolError, SessionError, TransportError};
pub use registry::{demo_parameters, Origin, ParameterChange, ParameterDescriptor, ParameterRegistry};
pub use relay::{RelayEvent, RelayServer};
pub use router::{Direction, HistoryEntry, MessageRouter};
pub use session::{SessionSnapshot, SyncSession, TransportEvent};
pub use ws_transport::WsTransport;

/// Installs the `RUST_LOG`-driven fmt subscriber used by the binaries.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
