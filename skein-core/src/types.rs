//! Identifiers and time types used throughout the Skein fabric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use uuid::Uuid;

/// Globally unique identifier for an endpoint (a fabric process).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(Uuid);

impl EndpointId {
    /// Generate a fresh random endpoint id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an endpoint id from a UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an actor within one endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ActorId(pub u64);

impl ActorId {
    /// Create a new actor id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ActorId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifies the originator of a command or event: an actor on an endpoint.
///
/// The absent-endpoint sentinel is `endpoint: None`; such ids name purely
/// local or anonymous publishers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct EntityId {
    /// The endpoint hosting the actor, if known.
    pub endpoint: Option<EndpointId>,
    /// The actor on that endpoint.
    pub object: ActorId,
}

impl EntityId {
    /// Create an entity id for an actor on a known endpoint.
    pub const fn new(endpoint: EndpointId, object: ActorId) -> Self {
        Self { endpoint: Some(endpoint), object }
    }

    /// The sentinel id with no endpoint attached.
    pub const fn nil() -> Self {
        Self { endpoint: None, object: ActorId(0) }
    }

    /// Whether this is the absent-endpoint sentinel.
    pub const fn is_nil(&self) -> bool {
        self.endpoint.is_none()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.endpoint {
            Some(ep) => write!(f, "{}/{}", ep, self.object),
            None => write!(f, "nil/{}", self.object),
        }
    }
}

/// Correlates a proxy request with its response.
///
/// Ids are unique and monotonically increasing within one proxy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The next request id in sequence.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw id value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An absolute point in time, in nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    /// Create a timestamp from nanoseconds since the epoch.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Nanoseconds since the epoch.
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// The span from `earlier` to `self`.
    pub const fn since(self, earlier: Timestamp) -> Timespan {
        Timespan(self.0 - earlier.0)
    }
}

impl Add<Timespan> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timespan) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Timespan> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Timespan) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign<Timespan> for Timestamp {
    fn add_assign(&mut self, rhs: Timespan) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl SubAssign<Timespan> for Timestamp {
    fn sub_assign(&mut self, rhs: Timespan) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        match DateTime::<Utc>::from_timestamp(secs, nanos) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ns", self.0),
        }
    }
}

/// A signed duration, in nanoseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timespan(i64);

impl Timespan {
    /// The zero-length span.
    pub const ZERO: Self = Self(0);

    /// Create a span from nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a span from milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Create a span from whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Length in nanoseconds.
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Convert to a std `Duration`; negative spans clamp to zero.
    pub fn to_duration(self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.max(0) as u64)
    }
}

impl From<std::time::Duration> for Timespan {
    fn from(d: std::time::Duration) -> Self {
        Self(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }
}

impl Add for Timespan {
    type Output = Timespan;

    fn add(self, rhs: Timespan) -> Timespan {
        Timespan(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Timespan {
    type Output = Timespan;

    fn sub(self, rhs: Timespan) -> Timespan {
        Timespan(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Timespan {
    type Output = Timespan;

    fn neg(self) -> Timespan {
        Timespan(-self.0)
    }
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Network-level information about an endpoint, carried in error contexts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Hostname or address of the endpoint.
    pub address: String,
    /// Listening port of the endpoint.
    pub port: u16,
}

impl fmt::Display for NetworkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Identifying information about an endpoint, carried in error contexts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// The endpoint id, if known.
    pub id: Option<EndpointId>,
    /// Network coordinates, if known.
    pub network: Option<NetworkInfo>,
}

impl EndpointInfo {
    /// Create endpoint info from an id alone.
    pub const fn from_id(id: EndpointId) -> Self {
        Self { id: Some(id), network: None }
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.network) {
            (Some(id), Some(net)) => write!(f, "{} ({})", id, net),
            (Some(id), None) => write!(f, "{}", id),
            (None, Some(net)) => write!(f, "{}", net),
            (None, None) => write!(f, "unknown"),
        }
    }
}
