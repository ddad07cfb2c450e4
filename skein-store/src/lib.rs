//! # Skein Store
//!
//! Replicated key-value stores attached to the Skein event fabric.
//!
//! A store is a named collection of [`skein_core::Data`] entries owned by a
//! *master* actor and replicated to any number of *clone* actors over a
//! per-store command topic. Mutations emit self-describing events on
//! `store_events/<store_name>`; entries may carry expiries enforced by the
//! master's tick loop. Callers interact through the [`Store`] frontend
//! (awaitable queries, fire-and-forget modifiers) or the mailbox-based
//! [`Proxy`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actor;
pub mod backend;
pub mod command;
pub mod endpoint;
pub mod events;
pub mod frontend;
pub mod mailbox;
pub mod proxy;

mod flare;

pub use actor::StoreRole;
pub use backend::{
    make_backend, Backend, BackendOptions, BackendType, MemoryBackend, Snapshot, SqliteBackend,
};
pub use command::{Command, CommandMessage, Expiry};
pub use endpoint::StoreEndpoint;
pub use frontend::Store;
pub use mailbox::{Mailbox, Response};
pub use proxy::Proxy;
