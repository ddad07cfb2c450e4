//! The caller-facing store handle.
//!
//! A [`Store`] is a thin, cheaply clonable frontend over a store actor's
//! request channel. Query methods await a dedicated reply with the
//! configured timeout and never block the actor; modifiers enqueue the
//! write and return immediately, surfacing failures only in the actor's
//! log.

use crate::actor::{QueryOp, ReplyTo, StoreRequest, WriteOp};
use crate::proxy::Proxy;
use skein_core::{Data, DataType, EntityId, Error, ErrorKind, Timespan};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A handle to a store hosted by a store actor.
#[derive(Clone)]
pub struct Store {
    name: String,
    tx: mpsc::UnboundedSender<StoreRequest>,
    frontend: EntityId,
    timeout: Duration,
}

impl Store {
    pub(crate) fn new(
        name: String,
        tx: mpsc::UnboundedSender<StoreRequest>,
        frontend: EntityId,
        timeout: Duration,
    ) -> Self {
        Self { name, tx, frontend, timeout }
    }

    /// The store's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The identity this frontend publishes writes under.
    pub fn frontend_id(&self) -> EntityId {
        self.frontend
    }

    /// The timeout applied to query methods.
    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a proxy for mailbox-based asynchronous requests against this
    /// store.
    pub fn proxy(&self) -> Result<Proxy, Error> {
        Proxy::new(self)
    }

    // -- queries -------------------------------------------------------------

    /// Whether a key exists, as a boolean value.
    pub async fn exists(&self, key: impl Into<Data>) -> Result<Data, Error> {
        self.request(QueryOp::Exists { key: key.into() }).await
    }

    /// The value under `key`.
    pub async fn get(&self, key: impl Into<Data>) -> Result<Data, Error> {
        self.request(QueryOp::Get { key: key.into() }).await
    }

    /// For container values, the value at `index` (for sets, a boolean
    /// membership value).
    pub async fn get_index_from_value(
        &self,
        key: impl Into<Data>,
        index: impl Into<Data>,
    ) -> Result<Data, Error> {
        self.request(QueryOp::GetIndexFromValue { key: key.into(), index: index.into() })
            .await
    }

    /// All keys of the store, as a set value.
    pub async fn keys(&self) -> Result<Data, Error> {
        self.request(QueryOp::Keys).await
    }

    /// Insert `value` only if `key` is absent. Returns boolean `true` when
    /// the insert happened, `false` when the key already existed.
    pub async fn put_unique(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        expiry: Option<Timespan>,
    ) -> Result<Data, Error> {
        self.request(QueryOp::PutUnique {
            key: key.into(),
            value: value.into(),
            expiry,
            publisher: self.frontend,
        })
        .await
    }

    async fn request(&self, op: QueryOp) -> Result<Data, Error> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StoreRequest::Query { op, reply: ReplyTo::Channel(tx) })
            .map_err(|_| Error::with_message(ErrorKind::Unspecified, "store terminated"))?;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => Err(Error::with_message(ErrorKind::Unspecified, "store terminated")),
            Err(_) => Err(Error::new(ErrorKind::RequestTimeout)),
        }
    }

    // -- modifiers -----------------------------------------------------------

    /// Insert or update an entry.
    pub fn put(&self, key: impl Into<Data>, value: impl Into<Data>, expiry: Option<Timespan>) {
        self.modify(WriteOp::Put { key: key.into(), value: value.into(), expiry });
    }

    /// Remove an entry.
    pub fn erase(&self, key: impl Into<Data>) {
        self.modify(WriteOp::Erase { key: key.into() });
    }

    /// Empty out the store.
    pub fn clear(&self) {
        self.modify(WriteOp::Clear);
    }

    /// Increment a value by `amount`. Supported for all numeric types as
    /// well as timestamps (with a timespan amount).
    pub fn increment(&self, key: impl Into<Data>, amount: Data, expiry: Option<Timespan>) {
        let init_type = match amount.ty() {
            DataType::Count => DataType::Count,
            DataType::Integer => DataType::Integer,
            DataType::Real => DataType::Real,
            DataType::Timespan => DataType::Timestamp,
            _ => DataType::None,
        };
        self.add(key.into(), amount, init_type, expiry);
    }

    /// Decrement a value by `amount`.
    pub fn decrement(&self, key: impl Into<Data>, amount: Data, expiry: Option<Timespan>) {
        self.subtract(key.into(), amount, expiry);
    }

    /// Append a string to the string under `key`.
    pub fn append(&self, key: impl Into<Data>, tail: impl Into<Data>, expiry: Option<Timespan>) {
        self.add(key.into(), tail.into(), DataType::String, expiry);
    }

    /// Insert an index into the set under `key`.
    pub fn insert_into(
        &self,
        key: impl Into<Data>,
        index: impl Into<Data>,
        expiry: Option<Timespan>,
    ) {
        self.add(key.into(), index.into(), DataType::Set, expiry);
    }

    /// Insert an index-value binding into the table under `key`.
    pub fn insert_into_table(
        &self,
        key: impl Into<Data>,
        index: impl Into<Data>,
        value: impl Into<Data>,
        expiry: Option<Timespan>,
    ) {
        self.add(
            key.into(),
            Data::Vector(vec![index.into(), value.into()]),
            DataType::Table,
            expiry,
        );
    }

    /// Remove an index from the set or table under `key`.
    pub fn remove_from(
        &self,
        key: impl Into<Data>,
        index: impl Into<Data>,
        expiry: Option<Timespan>,
    ) {
        self.subtract(key.into(), index.into(), expiry);
    }

    /// Append a value to the vector under `key`.
    pub fn push(&self, key: impl Into<Data>, value: impl Into<Data>, expiry: Option<Timespan>) {
        self.add(key.into(), value.into(), DataType::Vector, expiry);
    }

    /// Remove the last value of the vector under `key`.
    pub fn pop(&self, key: impl Into<Data>, expiry: Option<Timespan>) {
        // The backend removes the last element; the delta is irrelevant.
        self.subtract(key.into(), Data::None, expiry);
    }

    /// Detach the store, terminating its actor.
    pub fn detach(&self) {
        let _ = self.tx.send(StoreRequest::Detach);
    }

    fn add(&self, key: Data, value: Data, init_type: DataType, expiry: Option<Timespan>) {
        self.modify(WriteOp::Add { key, value, init_type, expiry });
    }

    fn subtract(&self, key: Data, value: Data, expiry: Option<Timespan>) {
        self.modify(WriteOp::Subtract { key, value, expiry });
    }

    fn modify(&self, op: WriteOp) {
        if self
            .tx
            .send(StoreRequest::Modify { op, publisher: self.frontend })
            .is_err()
        {
            debug!(store = %self.name, "dropping write to terminated store");
        }
    }

    pub(crate) fn request_channel(&self) -> mpsc::UnboundedSender<StoreRequest> {
        self.tx.clone()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("frontend", &self.frontend)
            .field("timeout", &self.timeout)
            .finish()
    }
}
