//! Bounded execution resources shared by every session.
//!
//! - [`ConnectionPool`]: execution slots, a FIFO overflow queue and a fixed
//!   set of worker tasks running [`OperationExecutor`] calls.
//! - [`ServerPool`]: at most N per-session [`ProtocolHandler`] instances,
//!   evicting the least recently active one when full.

pub mod connection;
pub mod executor;
pub mod handler;
pub mod server;
mod worker;

pub use connection::{ConnectionPool, PoolStats, RequestId};
pub use executor::{Operation, OperationExecutor};
pub use handler::{HandlerFactory, ProtocolHandler};
pub use server::{ServerEvent, ServerHandleInfo, ServerListener, ServerPool, ServerStats};
