//! SessionGate gateway: the transport router, its HTTP surface and the
//! bootstrap that wires sessions, pools and router together.

pub mod api;
pub mod bootstrap;
pub mod builtin;
pub mod cli;
pub mod router;
pub mod state;
pub mod transport;
