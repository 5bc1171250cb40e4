//! Async client for the Arlo cloud camera API.
//!
//! The wire layer of the workspace: HTTP transport construction, the
//! multi-factor handshake calls, device/notify/stream endpoints, the push
//! event stream and the hub-local storage client. Session state and event
//! semantics live in `arlo-core`.

pub mod auth;
pub mod client;
pub mod devices;
pub mod endpoints;
pub mod error;
pub mod event_stream;
pub mod local;
pub mod models;
pub mod transport;

pub use auth::MfaProtocol;
pub use client::{ApiClient, OcAuth};
pub use endpoints::Endpoints;
pub use error::Error;
pub use event_stream::{Envelope, EventStreamHandle, FrameAssembler, ReconnectConfig, StreamEvent};
pub use local::{HubEndpoint, LocalHubClient};
pub use transport::{TlsMode, TransportConfig};
