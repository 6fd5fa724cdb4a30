//! Session table for SessionGate.
//!
//! The [`SessionManager`] owns every logical session: creation on first
//! contact, activity tracking, capacity eviction and the periodic idle
//! sweep.  Other components never reach into the table; they learn about
//! session deaths through [`SessionListener`] notifications.

pub mod events;
pub mod manager;

pub use events::{EvictionReason, SessionEvent, SessionListener};
pub use manager::{Session, SessionManager};
