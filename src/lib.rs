//! LoRaWAN OTAA join server
//!
//! Verifies Join-Requests against provisioned devices, derives session keys,
//! records them in an append-only session log and answers with an encrypted
//! Join-Accept. Frames arrive and leave as JSON envelopes via [`bridge`].

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hexfmt;
pub mod join;
pub mod lorawan;
pub mod registry;
pub mod session;

pub use error::JoinError;
pub use join::{JoinAccept, JoinServer};
pub use registry::{DeviceIdentity, DeviceRegistry, Eui64};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionStore};
