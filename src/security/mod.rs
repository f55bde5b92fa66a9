//! Security module for cloude-relay.
//!
//! Identity verification happens elsewhere; this module is the boolean gate
//! in front of the REST API and the viewer WebSocket.

pub mod auth;

pub use auth::{auth_middleware, TokenGate};
