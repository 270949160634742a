//! SeqLog Notify
//!
//! "New record appended" notifications, multiplexed over many listeners
//! watching the same log.
//!
//! ## Components
//!
//! - [`ChangeNotifier`]: the registry; `subscribe` / `unsubscribe`
//! - [`SubscriptionHandle`]: one listener's registration (drop to unsubscribe)
//! - shared subscription: one per log, owning the handle, the single change
//!   wait and the watcher task
//! - [`ListenerRegistration`]: callback plus watermark
//!
//! ## Guarantees
//!
//! - Records present before `subscribe` returns are never delivered.
//! - Each listener sees increasing record numbers without gaps or
//!   duplicates, except for the restart at the oldest record after a clear.
//! - A failing or panicking callback affects neither other listeners nor
//!   its own watermark.
//! - After `unsubscribe` returns, at most one in-flight callback can still
//!   complete.

pub mod config;
pub mod error;
pub mod listener;
pub mod notifier;
mod subscription;

pub use config::NotifierConfig;
pub use error::{NotifyError, Result};
pub use listener::{ListenerCallback, ListenerRegistration};
pub use notifier::{ChangeNotifier, SubscriptionHandle};
pub use subscription::{PassOutcome, SubscriptionState};
