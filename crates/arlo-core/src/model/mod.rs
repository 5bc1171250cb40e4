// ── Domain model ──
//
// Canonical engine-side types. Wire shapes stay in `arlo_api::models`;
// these are what registry consumers and the CLI see.

pub mod device;
pub mod event;
pub mod session;

pub use device::{Device, DeviceId, DeviceType, MediaUrls};
pub use event::DomainEvent;
pub use session::{Identity, Session, SessionState};
