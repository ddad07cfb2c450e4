//! # Skein Core
//!
//! Core library for the Skein event-distribution fabric.
//!
//! This crate provides the building blocks shared by the hub and the store
//! subsystem:
//! - The self-describing [`Data`] value universe and its reshaping operations
//! - Endpoint, actor, and entity identifiers
//! - Hierarchical topic names
//! - The fabric-wide error taxonomy with its canonical data encoding
//! - Configuration loading and validation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod error;
pub mod topic;
pub mod types;

pub use config::{BrokerConfig, Config, StoreConfig};
pub use data::{Data, DataType, EnumValue, Port, PortProtocol, Subnet};
pub use error::{Error, ErrorKind, ErrorView, Result};
pub use topic::Topic;
pub use types::{
    ActorId, EndpointId, EndpointInfo, EntityId, NetworkInfo, RequestId, Timespan, Timestamp,
};

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::config::{Config, StoreConfig};
    pub use crate::data::{Data, DataType};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::topic::Topic;
    pub use crate::types::{EntityId, RequestId, Timespan, Timestamp};
}
