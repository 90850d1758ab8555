//! session - connection lifecycle, wire protocol and transport
//!
//! `manager` owns the state machine, `protocol` the wire shapes, `link` the
//! websocket plumbing. The rest of the crate only sees the re-exports below.

pub mod link;
pub mod manager;
pub mod protocol;
mod state;

pub use link::{LinkConnector, LinkEvent, SessionLink, WsConnector};
pub use manager::{SessionManager, SessionOptions};
pub use state::SessionState;
