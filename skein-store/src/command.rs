//! The command protocol linking a store's master with its clones.
//!
//! Every store has a command topic carrying [`CommandMessage`]s. Writes
//! travel the topic twice: once pre-commit (a frontend on a clone forwards
//! the write to the master, tagged seq 0) and once committed (the master
//! rebroadcasts the resulting state change under its next sequence number).
//! Snapshot exchange and attach acknowledgment use the same vocabulary.

use crate::backend::Snapshot;
use serde::{Deserialize, Serialize};
use skein_core::{Data, DataType, EntityId, RequestId, Timespan, Timestamp};

/// Expiry attached to a write command.
///
/// Relative until a master commits the write, absolute once replicated, so
/// clones store the exact instant the master chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// A span from commit time, as requested by a frontend.
    Relative(Timespan),
    /// An absolute instant chosen by the master.
    Absolute(Timestamp),
}

impl Expiry {
    /// Resolve to the absolute instant, anchoring relative spans at `now`.
    pub fn resolve(self, now: Timestamp) -> Timestamp {
        match self {
            Self::Relative(span) => now + span,
            Self::Absolute(instant) => instant,
        }
    }
}

impl From<Timespan> for Expiry {
    fn from(span: Timespan) -> Self {
        Self::Relative(span)
    }
}

impl From<Timestamp> for Expiry {
    fn from(instant: Timestamp) -> Self {
        Self::Absolute(instant)
    }
}

/// A store command payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Insert or overwrite an entry.
    Put {
        /// Entry key.
        key: Data,
        /// Entry value.
        value: Data,
        /// Optional expiry.
        expiry: Option<Expiry>,
        /// Originator of the write.
        publisher: EntityId,
    },
    /// Insert only if the key is absent; the master answers with
    /// [`Command::PutUniqueResult`].
    PutUnique {
        /// Entry key.
        key: Data,
        /// Entry value.
        value: Data,
        /// Optional expiry.
        expiry: Option<Expiry>,
        /// Originator of the write.
        publisher: EntityId,
        /// Correlates the result with the forwarding requester.
        req_id: RequestId,
    },
    /// The master's answer to a forwarded [`Command::PutUnique`].
    PutUniqueResult {
        /// The id from the originating request.
        req_id: RequestId,
        /// Whether the insert happened.
        inserted: bool,
        /// The actor that forwarded the request.
        requester: EntityId,
    },
    /// Remove an entry.
    Erase {
        /// Entry key.
        key: Data,
        /// Originator of the write.
        publisher: EntityId,
    },
    /// Remove an entry whose expiry passed (master-authored only).
    Expire {
        /// Entry key.
        key: Data,
        /// Originator (the master).
        publisher: EntityId,
    },
    /// Remove all entries.
    Clear {
        /// Originator of the write.
        publisher: EntityId,
    },
    /// Type-dispatched augmentation of an entry.
    Add {
        /// Entry key.
        key: Data,
        /// The delta to add.
        value: Data,
        /// Type to initialize an absent target with.
        init_type: DataType,
        /// Optional expiry.
        expiry: Option<Expiry>,
        /// Originator of the write.
        publisher: EntityId,
    },
    /// Type-dispatched diminution of an entry.
    Subtract {
        /// Entry key.
        key: Data,
        /// The delta to subtract.
        value: Data,
        /// Optional expiry.
        expiry: Option<Expiry>,
        /// Originator of the write.
        publisher: EntityId,
    },
    /// A clone asks its master for a full state transfer.
    SnapshotRequest {
        /// The requesting clone.
        clone_id: EntityId,
    },
    /// The master's full state at a sequence number.
    SnapshotReply {
        /// Sequence number the snapshot reflects.
        seq: u64,
        /// The entries and expiries of the store.
        snapshot: Snapshot,
    },
    /// The master confirms a clone's attach.
    AckClone {
        /// The attached clone.
        clone_id: EntityId,
    },
}

impl Command {
    /// Whether this payload mutates store state and therefore participates
    /// in the clone's in-order application discipline.
    pub const fn is_state_command(&self) -> bool {
        matches!(
            self,
            Self::Put { .. }
                | Self::Erase { .. }
                | Self::Expire { .. }
                | Self::Clear { .. }
                | Self::Add { .. }
                | Self::Subtract { .. }
        )
    }

    /// A short tag for diagnostics.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::PutUnique { .. } => "put_unique",
            Self::PutUniqueResult { .. } => "put_unique_result",
            Self::Erase { .. } => "erase",
            Self::Expire { .. } => "expire",
            Self::Clear { .. } => "clear",
            Self::Add { .. } => "add",
            Self::Subtract { .. } => "subtract",
            Self::SnapshotRequest { .. } => "snapshot_request",
            Self::SnapshotReply { .. } => "snapshot_reply",
            Self::AckClone { .. } => "ack_clone",
        }
    }
}

/// A command envelope on a store's command topic.
///
/// `seq` is the master's sequence number for committed state commands;
/// pre-commit forwards and snapshot requests carry seq 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    /// The sending actor.
    pub sender: EntityId,
    /// Sequence number, 0 for pre-commit traffic.
    pub seq: u64,
    /// The command payload.
    pub payload: Command,
}

impl CommandMessage {
    /// Create a command envelope.
    pub fn new(sender: EntityId, seq: u64, payload: Command) -> Self {
        Self { sender, seq, payload }
    }
}
