//! Shared domain types for SessionGate: configuration, the error taxonomy
//! every crate reports through, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
