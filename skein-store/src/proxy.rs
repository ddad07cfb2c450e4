//! Mailbox-based asynchronous store requests.
//!
//! A [`Proxy`] decouples issuing a request from consuming its response:
//! each request returns a [`RequestId`] immediately, and the responses
//! accumulate in the proxy's mailbox in arrival order. The mailbox's file
//! descriptor lets external poll loops learn about pending responses
//! without dedicating a thread.

use crate::actor::{QueryOp, ReplyTo, StoreRequest};
use crate::frontend::Store;
use crate::mailbox::{Mailbox, Response};
use skein_core::{Data, EntityId, Error, ErrorKind, RequestId, Timespan};
use std::sync::Arc;
use tokio::sync::mpsc;

/// An asynchronous request handle over a store.
pub struct Proxy {
    tx: mpsc::UnboundedSender<StoreRequest>,
    mailbox: Arc<Mailbox>,
    next_id: RequestId,
    frontend: EntityId,
}

impl Proxy {
    pub(crate) fn new(store: &Store) -> Result<Self, Error> {
        let mailbox = Mailbox::new().map_err(|e| {
            Error::with_message(ErrorKind::CannotOpenFile, format!("cannot create flare: {e}"))
        })?;
        Ok(Self {
            tx: store.request_channel(),
            mailbox: Arc::new(mailbox),
            next_id: RequestId::default(),
            frontend: store.frontend_id(),
        })
    }

    /// The identity this proxy publishes writes under.
    pub fn frontend_id(&self) -> EntityId {
        self.frontend
    }

    /// The proxy's mailbox of responses.
    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    /// Request an existence check; the response is a boolean value.
    pub fn exists(&mut self, key: impl Into<Data>) -> RequestId {
        self.issue(|_| QueryOp::Exists { key: key.into() })
    }

    /// Request a value lookup.
    pub fn get(&mut self, key: impl Into<Data>) -> RequestId {
        self.issue(|_| QueryOp::Get { key: key.into() })
    }

    /// Request an insert-if-absent; the response is boolean `true` when the
    /// insert happened.
    pub fn put_unique(
        &mut self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        expiry: Option<Timespan>,
    ) -> RequestId {
        let publisher = self.frontend;
        self.issue(move |_| QueryOp::PutUnique {
            key: key.into(),
            value: value.into(),
            expiry,
            publisher,
        })
    }

    /// Request an index lookup within a container value.
    pub fn get_index_from_value(
        &mut self,
        key: impl Into<Data>,
        index: impl Into<Data>,
    ) -> RequestId {
        self.issue(|_| QueryOp::GetIndexFromValue { key: key.into(), index: index.into() })
    }

    /// Request the store's key set.
    pub fn keys(&mut self) -> RequestId {
        self.issue(|_| QueryOp::Keys)
    }

    /// Consume the next response, blocking until one arrives.
    pub fn receive(&self) -> Response {
        self.mailbox.pop()
    }

    /// Consume the next `n` responses, blocking until all have arrived.
    pub fn receive_n(&self, n: usize) -> Vec<Response> {
        (0..n).map(|_| self.mailbox.pop()).collect()
    }

    fn issue(&mut self, build: impl FnOnce(RequestId) -> QueryOp) -> RequestId {
        self.next_id = self.next_id.next();
        let id = self.next_id;
        let op = build(id);
        let reply = ReplyTo::Mailbox { id, mailbox: Arc::clone(&self.mailbox) };
        if self.tx.send(StoreRequest::Query { op, reply }).is_err() {
            // The actor is gone; synthesize the response so the id still
            // correlates with exactly one answer.
            self.mailbox.push(Response {
                id,
                answer: Err(Error::with_message(ErrorKind::Unspecified, "store terminated")),
            });
        }
        id
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("frontend", &self.frontend)
            .field("next_id", &self.next_id)
            .field("buffered", &self.mailbox.buffer_size())
            .finish()
    }
}
