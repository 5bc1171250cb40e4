//! Session, event synchronization and command engine between `arlo-api`
//! and its consumers (the `arlo` CLI, or any embedding program).
//!
//! - **[`Engine`]**: Facade owning the full lifecycle:
//!   [`login()`](Engine::login) runs the multi-factor handshake, opens the
//!   push stream, discovers devices on the first `connected` status and
//!   keeps hub subscriptions alive until [`logout()`](Engine::logout).
//!
//! - **[`AuthSession`]**: Login state machine. The only writer of the
//!   shared bearer token.
//!
//! - **[`DeviceRegistry`]**: Lock-free device index (`DashMap` plus a
//!   `watch` snapshot). Mutated only by discovery and push envelopes.
//!
//! - **[`CommandDispatcher`]**: Notify/stream/snapshot requests tagged with
//!   transaction ids. Refuses to send while the stream is down.
//!
//! - **[`LocalMediaChannel`]**: Certificate issuance and mutual-TLS access
//!   to recordings stored on the hub.
//!
//! - **Domain model** ([`model`]): `Device`, `Session`, and the tagged
//!   [`DomainEvent`] every consumer observes.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod local_media;
pub mod mailbox;
pub mod model;
pub mod registry;
pub mod session;
pub mod timers;

// ── Primary re-exports ──────────────────────────────────────────────
pub use dispatch::{CommandDispatcher, CommandResult, Intent, transaction_id};
pub use engine::{ConnectionState, DiscoveryStatus, Engine, EngineConfig, EngineDeps};
pub use error::{AuthError, CoreError, LocalChannelError, ProtocolError, TransportError};
pub use local_media::{CredentialStore, FileCredentialStore, LocalCredential, LocalMediaChannel, LocalMediaConfig};
pub use mailbox::{CodeRetry, MailboxConnection, OneTimeCodeSource};
pub use model::{Device, DeviceId, DeviceType, DomainEvent, Identity, MediaUrls, Session, SessionState};
pub use registry::{DeviceRegistry, LocalStorageAddress};
pub use session::{AuthFlow, AuthSession, Credentials};
pub use timers::TimerSet;

// Wire types consumers commonly need alongside the engine.
pub use arlo_api::models::Recording;
pub use arlo_api::{Endpoints, ReconnectConfig, TlsMode, TransportConfig};
