//! Live session over one WebSocket
//!
//! ```text
//! Disconnected ──connect──► Connecting ──setupComplete──► Connected
//!       ▲                        │                            │
//!       └────── close / error / disconnect (from any state) ◄─┘
//! ```

pub mod controller;
pub mod events;
pub mod transport;

pub use controller::{Session, SessionDeps, SessionHandle, SessionOptions};
pub use events::{DeviceKind, DisconnectReason, Notification, SessionEvent, SessionState};
