//! Hierarchical topic names for message routing.

use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The topic-hierarchy separator.
pub const SEPARATOR: char = '/';

/// Prefix of the per-store event topics.
pub const STORE_EVENTS: &str = "store_events";

/// Prefix of the per-store command topics.
pub const STORE_COMMANDS: &str = "store_commands";

/// A validated, hierarchical topic name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Create a new topic.
    ///
    /// # Errors
    /// Returns `invalid_topic_key` if the name is empty, overlong, or
    /// contains characters outside the topic alphabet.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::with_message(
                ErrorKind::InvalidTopicKey,
                "topic name cannot be empty",
            ));
        }
        if name.len() > 255 {
            return Err(Error::with_message(
                ErrorKind::InvalidTopicKey,
                "topic name cannot exceed 255 characters",
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == SEPARATOR)
        {
            return Err(Error::with_message(
                ErrorKind::InvalidTopicKey,
                format!("topic name contains invalid characters: {name:?}"),
            ));
        }
        Ok(Self(name))
    }

    /// The event topic of a store: `store_events/<store_name>`.
    pub fn store_events(store_name: &str) -> Result<Self, Error> {
        Self::new(format!("{STORE_EVENTS}{SEPARATOR}{store_name}"))
    }

    /// The command topic of a store: `store_commands/<store_name>`.
    pub fn store_commands(store_name: &str) -> Result<Self, Error> {
        Self::new(format!("{STORE_COMMANDS}{SEPARATOR}{store_name}"))
    }

    /// Append a sub-level to this topic.
    pub fn join(&self, suffix: &str) -> Result<Self, Error> {
        Self::new(format!("{}{SEPARATOR}{suffix}", self.0))
    }

    /// Get the topic name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to the owned name.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
