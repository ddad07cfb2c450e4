//! # Skein Broker
//!
//! The in-process typed publish/subscribe hub of the Skein fabric.
//!
//! The hub is the consumed interface of the endpoint/transport layer: store
//! actors publish self-describing event values onto it and exchange their
//! replication commands over the same topic-addressed bus abstraction.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hub;

pub use hub::{DataMessage, Hub, HubState, Router};
