//! Loft realtime: keeps a session's unread badges in step with the server.
//!
//! Two paths feed the same counters:
//! - push: row-insert events from the change channel bump the counters
//!   immediately and raise toasts, desktop notifications and sounds
//! - pull: unread counts are re-fetched every 30s, on focus and when the
//!   connection comes back, overwriting whatever the push path left
//!
//! The pull path is authoritative; the push path only buys latency.

pub mod config;
pub mod conversations;
pub mod counts;
pub mod effects;
pub mod error;
pub mod events;
pub mod reconciler;
pub mod session;
pub mod sound;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, ReconnectPolicy, RealtimeConfig};
pub use counts::{CountSource, HttpCountSource};
pub use effects::{DesktopPermission, Presenter, TracingPresenter};
pub use error::{RealtimeError, Result};
pub use events::{AppEvent, RealtimeEvent};
pub use session::{CountsSnapshot, RealtimeSession, SessionDeps};
pub use sound::{AudioOutput, NullAudio, TracingAudio};
pub use subscription::{RealtimeTransport, SubscriptionState};
pub use transport::WsTransport;
