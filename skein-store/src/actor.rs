//! The store actor: one task owning one store.
//!
//! An actor processes exactly one request, command, or tick end-to-end
//! before taking the next, so its backend needs no locking. Masters apply
//! writes locally, rebroadcast the committed state change under a fresh
//! sequence number, and emit events; clones forward writes to their master
//! and apply the replayed commands strictly in sequence order, resyncing
//! via snapshot transfer whenever they observe a gap.

use crate::backend::Backend;
use crate::command::{Command, CommandMessage, Expiry};
use crate::endpoint::MasterRegistration;
use crate::events;
use crate::mailbox::{Mailbox, Response};
use skein_broker::{Hub, Router};
use skein_core::{
    Data, DataType, EntityId, Error, ErrorKind, RequestId, StoreConfig, Timespan, Timestamp, Topic,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The replication role of a store actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// The authoritative owner of the store's entries.
    Master,
    /// A read replica applying the master's command stream.
    Clone,
}

/// A read request served from the local backend.
#[derive(Debug)]
pub(crate) enum QueryOp {
    Exists { key: Data },
    Get { key: Data },
    GetIndexFromValue { key: Data, index: Data },
    Keys,
    PutUnique { key: Data, value: Data, expiry: Option<Timespan>, publisher: EntityId },
}

/// A fire-and-forget write.
#[derive(Debug)]
pub(crate) enum WriteOp {
    Put { key: Data, value: Data, expiry: Option<Timespan> },
    Erase { key: Data },
    Clear,
    Add { key: Data, value: Data, init_type: DataType, expiry: Option<Timespan> },
    Subtract { key: Data, value: Data, expiry: Option<Timespan> },
}

/// Where a request's single response goes.
pub(crate) enum ReplyTo {
    /// A frontend awaiting on a oneshot.
    Channel(oneshot::Sender<Result<Data, Error>>),
    /// A proxy mailbox.
    Mailbox { id: RequestId, mailbox: Arc<Mailbox> },
}

impl ReplyTo {
    fn deliver(self, answer: Result<Data, Error>) {
        match self {
            Self::Channel(tx) => {
                // A dropped receiver means the requester gave up; late
                // replies to cancelled requests are discarded.
                let _ = tx.send(answer);
            }
            Self::Mailbox { id, mailbox } => mailbox.push(Response { id, answer }),
        }
    }

    fn is_abandoned(&self) -> bool {
        match self {
            Self::Channel(tx) => tx.is_closed(),
            Self::Mailbox { .. } => false,
        }
    }
}

/// A message from a frontend or proxy into the actor.
pub(crate) enum StoreRequest {
    Query { op: QueryOp, reply: ReplyTo },
    Modify { op: WriteOp, publisher: EntityId },
    Detach,
}

pub(crate) struct StoreActor {
    name: String,
    id: EntityId,
    role: StoreRole,
    backend: Box<dyn Backend>,
    cfg: StoreConfig,
    hub: Arc<Hub>,
    commands: Arc<Router<CommandMessage>>,
    command_topic: Topic,
    event_topic: Topic,

    // Master state.
    seq: u64,
    expiry_mirror: HashMap<Data, Timestamp>,

    // Clone state.
    master: Option<EntityId>,
    expected_seq: u64,
    awaiting_resync: bool,
    buffered: Vec<CommandMessage>,
    pending_unique: HashMap<RequestId, (ReplyTo, Timestamp)>,
    next_forward_id: RequestId,

    _registration: Option<MasterRegistration>,
}

/// Start a store actor and return the channel its frontends talk to.
pub(crate) fn spawn_store_actor(
    name: String,
    id: EntityId,
    role: StoreRole,
    mut backend: Box<dyn Backend>,
    hub: Arc<Hub>,
    commands: Arc<Router<CommandMessage>>,
    cfg: StoreConfig,
    registration: Option<MasterRegistration>,
) -> Result<mpsc::UnboundedSender<StoreRequest>, Error> {
    let command_topic = Topic::store_commands(&name)?;
    let event_topic = Topic::store_events(&name)?;
    // Subscribe before the task starts so no command is missed.
    let commands_rx = commands.subscribe(&command_topic);

    let expiry_mirror = if role == StoreRole::Master {
        backend.expiries()?.into_iter().collect()
    } else {
        HashMap::new()
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let actor = StoreActor {
        name,
        id,
        role,
        backend,
        cfg,
        hub,
        commands,
        command_topic,
        event_topic,
        seq: 0,
        expiry_mirror,
        master: None,
        expected_seq: 1,
        awaiting_resync: role == StoreRole::Clone,
        buffered: Vec::new(),
        pending_unique: HashMap::new(),
        next_forward_id: RequestId::default(),
        _registration: registration,
    };
    tokio::spawn(actor.run(rx, commands_rx));
    Ok(tx)
}

impl StoreActor {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<StoreRequest>,
        mut commands_rx: broadcast::Receiver<CommandMessage>,
    ) {
        info!(store = %self.name, id = %self.id, role = ?self.role, "store actor started");
        let mut tick = tokio::time::interval(self.cfg.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.role == StoreRole::Clone {
            self.request_snapshot();
        }

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    None | Some(StoreRequest::Detach) => {
                        debug!(store = %self.name, "detach requested");
                        break;
                    }
                    Some(StoreRequest::Query { op, reply }) => self.handle_query(op, reply),
                    Some(StoreRequest::Modify { op, publisher }) => self.handle_modify(op, publisher),
                },
                command = commands_rx.recv() => match command {
                    Ok(message) => self.handle_command(message),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(store = %self.name, missed, "command subscription lagged");
                        if self.role == StoreRole::Clone {
                            self.begin_resync();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(store = %self.name, "command channel closed, terminating");
                        break;
                    }
                },
                _ = tick.tick() => self.handle_tick(),
            }
        }

        self.shutdown(requests);
    }

    fn shutdown(mut self, mut requests: mpsc::UnboundedReceiver<StoreRequest>) {
        requests.close();
        let reason = Error::with_message(ErrorKind::Unspecified, "store terminated");
        while let Ok(request) = requests.try_recv() {
            if let StoreRequest::Query { reply, .. } = request {
                reply.deliver(Err(reason.clone()));
            }
        }
        for (_, (reply, _)) in self.pending_unique.drain() {
            reply.deliver(Err(reason.clone()));
        }
        info!(store = %self.name, "store actor stopped");
    }

    // -- frontend requests ---------------------------------------------------

    fn handle_query(&mut self, op: QueryOp, reply: ReplyTo) {
        let answer = match op {
            QueryOp::Exists { key } => self.backend.exists(&key).map(Data::Boolean),
            QueryOp::Get { key } => self.backend.get(&key),
            QueryOp::GetIndexFromValue { key, index } => {
                self.backend.get(&key).and_then(|value| value.index_into(&index))
            }
            QueryOp::Keys => self.backend.keys(),
            QueryOp::PutUnique { key, value, expiry, publisher } => {
                self.handle_put_unique(key, value, expiry, publisher, reply);
                return;
            }
        };
        reply.deliver(answer);
    }

    fn handle_put_unique(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: EntityId,
        reply: ReplyTo,
    ) {
        match self.role {
            StoreRole::Master => {
                let answer = self.master_put_unique(key, value, expiry, publisher);
                reply.deliver(answer);
            }
            StoreRole::Clone => {
                // Forward to the master; the result comes back on the
                // command topic correlated by the forward id.
                self.next_forward_id = self.next_forward_id.next();
                let req_id = self.next_forward_id;
                let deadline = Timestamp::now() + Timespan::from(self.cfg.request_timeout);
                self.pending_unique.insert(req_id, (reply, deadline));
                self.publish_precommit(Command::PutUnique {
                    key,
                    value,
                    expiry: expiry.map(Expiry::Relative),
                    publisher,
                    req_id,
                });
            }
        }
    }

    /// Atomic check-then-insert on the master; serialized by the actor's
    /// single-threaded message loop.
    fn master_put_unique(
        &mut self,
        key: Data,
        value: Data,
        expiry: Option<Timespan>,
        publisher: EntityId,
    ) -> Result<Data, Error> {
        if self.backend.exists(&key)? {
            return Ok(Data::Boolean(false));
        }
        self.apply_master_write(WriteOp::Put { key, value, expiry }, publisher)?;
        Ok(Data::Boolean(true))
    }

    fn handle_modify(&mut self, op: WriteOp, publisher: EntityId) {
        match self.role {
            StoreRole::Master => {
                if let Err(error) = self.apply_master_write(op, publisher) {
                    // Fire-and-forget writes surface failures in the log only.
                    warn!(store = %self.name, %error, "write failed");
                }
            }
            StoreRole::Clone => self.forward_write(op, publisher),
        }
    }

    fn forward_write(&mut self, op: WriteOp, publisher: EntityId) {
        let payload = match op {
            WriteOp::Put { key, value, expiry } => Command::Put {
                key,
                value,
                expiry: expiry.map(Expiry::Relative),
                publisher,
            },
            WriteOp::Erase { key } => Command::Erase { key, publisher },
            WriteOp::Clear => Command::Clear { publisher },
            WriteOp::Add { key, value, init_type, expiry } => Command::Add {
                key,
                value,
                init_type,
                expiry: expiry.map(Expiry::Relative),
                publisher,
            },
            WriteOp::Subtract { key, value, expiry } => Command::Subtract {
                key,
                value,
                expiry: expiry.map(Expiry::Relative),
                publisher,
            },
        };
        self.publish_precommit(payload);
    }

    // -- master writes -------------------------------------------------------

    /// Apply a write to the backend, rebroadcast the committed state change
    /// to clones, and emit the corresponding event. Nothing is broadcast or
    /// emitted unless the backend mutation succeeded.
    fn apply_master_write(&mut self, op: WriteOp, publisher: EntityId) -> Result<(), Error> {
        let now = Timestamp::now();
        match op {
            WriteOp::Put { key, value, expiry } => {
                let absolute = expiry.map(|span| now + span);
                let old = self.pre_read(&key)?;
                self.backend.put(key.clone(), value.clone(), absolute)?;
                match absolute {
                    Some(instant) => {
                        self.expiry_mirror.insert(key.clone(), instant);
                    }
                    None => {
                        self.expiry_mirror.remove(&key);
                    }
                }
                self.broadcast(Command::Put {
                    key: key.clone(),
                    value: value.clone(),
                    expiry: absolute.map(Expiry::Absolute),
                    publisher,
                });
                self.emit_insert_or_update(&key, old, &value, expiry, publisher);
                Ok(())
            }
            WriteOp::Erase { key } => {
                self.backend.erase(&key)?;
                self.expiry_mirror.remove(&key);
                self.broadcast(Command::Erase { key: key.clone(), publisher });
                self.emit(events::erase(&self.name, &key, publisher));
                Ok(())
            }
            WriteOp::Clear => {
                self.backend.clear()?;
                self.expiry_mirror.clear();
                self.broadcast(Command::Clear { publisher });
                Ok(())
            }
            WriteOp::Add { key, value, init_type, expiry } => {
                let absolute = expiry.map(|span| now + span);
                let old = self.pre_read(&key)?;
                self.backend.add(&key, value, init_type, absolute)?;
                let new_value = self.backend.get(&key)?;
                let effective = self.refresh_mirror(&key, absolute);
                self.broadcast(Command::Put {
                    key: key.clone(),
                    value: new_value.clone(),
                    expiry: effective.map(Expiry::Absolute),
                    publisher,
                });
                self.emit_insert_or_update(&key, old, &new_value, expiry, publisher);
                Ok(())
            }
            WriteOp::Subtract { key, value, expiry } => {
                let absolute = expiry.map(|span| now + span);
                let old = self.pre_read(&key)?;
                self.backend.subtract(&key, &value, absolute)?;
                let new_value = self.backend.get(&key)?;
                let effective = self.refresh_mirror(&key, absolute);
                self.broadcast(Command::Put {
                    key: key.clone(),
                    value: new_value.clone(),
                    expiry: effective.map(Expiry::Absolute),
                    publisher,
                });
                self.emit_insert_or_update(&key, old, &new_value, expiry, publisher);
                Ok(())
            }
        }
    }

    /// Read the current value for update-event reporting, distinguishing
    /// insert from update.
    fn pre_read(&self, key: &Data) -> Result<Option<Data>, Error> {
        if self.backend.exists(key)? {
            self.backend.get(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Track the effective expiry of a key across refresh-on-provided
    /// semantics; returns the expiry the committed entry now carries.
    fn refresh_mirror(&mut self, key: &Data, provided: Option<Timestamp>) -> Option<Timestamp> {
        match provided {
            Some(instant) => {
                self.expiry_mirror.insert(key.clone(), instant);
                Some(instant)
            }
            None => self.expiry_mirror.get(key).copied(),
        }
    }

    // -- command handling ----------------------------------------------------

    fn handle_command(&mut self, message: CommandMessage) {
        if message.sender == self.id {
            return; // own broadcast echo
        }
        debug!(
            store = %self.name,
            sender = %message.sender,
            seq = message.seq,
            command = message.payload.tag(),
            "dispatching command"
        );
        match self.role {
            StoreRole::Master => self.handle_command_as_master(message),
            StoreRole::Clone => self.handle_command_as_clone(message),
        }
    }

    fn handle_command_as_master(&mut self, message: CommandMessage) {
        let now = Timestamp::now();
        match message.payload {
            Command::SnapshotRequest { clone_id } => match self.backend.snapshot() {
                Ok(snapshot) => {
                    debug!(store = %self.name, clone = %clone_id, "serving snapshot");
                    self.publish_committed(Command::AckClone { clone_id });
                    self.publish_committed(Command::SnapshotReply { seq: self.seq, snapshot });
                }
                Err(error) => {
                    warn!(store = %self.name, %error, "snapshot request failed");
                }
            },
            Command::PutUnique { key, value, expiry, publisher, req_id } => {
                let requester = message.sender;
                let inserted = match self.backend.exists(&key) {
                    Ok(true) => false,
                    Ok(false) => {
                        let expiry = expiry.map(|e| relative_expiry(e, now));
                        match self.apply_master_write(WriteOp::Put { key, value, expiry }, publisher)
                        {
                            Ok(()) => true,
                            Err(error) => {
                                warn!(store = %self.name, %error, "forwarded put_unique failed");
                                false
                            }
                        }
                    }
                    Err(error) => {
                        warn!(store = %self.name, %error, "forwarded put_unique failed");
                        false
                    }
                };
                self.publish_committed(Command::PutUniqueResult { req_id, inserted, requester });
            }
            payload if payload.is_state_command() && message.seq == 0 => {
                // A write forwarded by a clone's frontend.
                if let Some((op, publisher)) = write_op_from_command(payload, now) {
                    if let Err(error) = self.apply_master_write(op, publisher) {
                        warn!(store = %self.name, %error, "forwarded write failed");
                    }
                }
            }
            payload => {
                debug!(store = %self.name, command = payload.tag(), "master ignoring command");
            }
        }
    }

    fn handle_command_as_clone(&mut self, message: CommandMessage) {
        // Results for our own forwarded requests correlate by id and
        // requester, so they resolve even before the master is bound.
        if let Command::PutUniqueResult { req_id, inserted, requester } = &message.payload {
            if *requester == self.id {
                if let Some((reply, _)) = self.pending_unique.remove(req_id) {
                    reply.deliver(Ok(Data::Boolean(*inserted)));
                }
            }
            return;
        }

        // The first attach confirmation or snapshot binds the master; any
        // other sender's traffic (including sibling clones' pre-commit
        // forwards) is dropped.
        if self.master.is_none()
            && matches!(
                message.payload,
                Command::AckClone { .. } | Command::SnapshotReply { .. }
            )
        {
            self.master = Some(message.sender);
            info!(store = %self.name, master = %message.sender, "clone bound to master");
        }
        if self.master != Some(message.sender) {
            debug!(store = %self.name, sender = %message.sender, "dropping command from unknown sender");
            return;
        }

        match message.payload {
            Command::SnapshotReply { seq, snapshot } => self.install_snapshot(seq, snapshot),
            Command::AckClone { .. } => {}
            payload if payload.is_state_command() => {
                self.apply_sequenced(CommandMessage::new(message.sender, message.seq, payload));
            }
            payload => {
                debug!(store = %self.name, command = payload.tag(), "clone ignoring command");
            }
        }
    }

    fn apply_sequenced(&mut self, message: CommandMessage) {
        if self.awaiting_resync {
            self.buffer_command(message);
            return;
        }
        match message.seq.cmp(&self.expected_seq) {
            Ordering::Equal => {
                self.apply_replicated(message.payload);
                self.expected_seq += 1;
            }
            Ordering::Greater => {
                warn!(
                    store = %self.name,
                    expected = self.expected_seq,
                    received = message.seq,
                    "sequence gap, resyncing"
                );
                self.buffer_command(message);
                self.begin_resync();
            }
            Ordering::Less => {
                debug!(store = %self.name, seq = message.seq, "dropping duplicate command");
            }
        }
    }

    fn buffer_command(&mut self, message: CommandMessage) {
        if self.buffered.len() >= self.cfg.command_buffer {
            warn!(store = %self.name, "command buffer overflow, forcing resync");
            self.buffered.remove(0);
            self.begin_resync();
        }
        self.buffered.push(message);
    }

    fn begin_resync(&mut self) {
        self.awaiting_resync = true;
        self.request_snapshot();
    }

    fn request_snapshot(&self) {
        self.publish_precommit(Command::SnapshotRequest { clone_id: self.id });
    }

    fn install_snapshot(&mut self, seq: u64, snapshot: crate::backend::Snapshot) {
        // A reply that predates our applied state has nothing to offer.
        if !self.awaiting_resync && seq + 1 < self.expected_seq {
            debug!(store = %self.name, seq, "ignoring stale snapshot");
            return;
        }
        if let Err(error) = self.replace_contents(snapshot) {
            warn!(store = %self.name, %error, "snapshot installation failed");
            return;
        }
        self.expected_seq = seq + 1;
        self.awaiting_resync = false;
        info!(store = %self.name, seq, "snapshot installed");

        // Drain buffered commands the snapshot has not subsumed. Anything
        // that does not connect contiguously is dropped rather than kept: a
        // later snapshot always covers every command the master actually
        // issued, so one more resync converges where replaying cannot.
        let mut buffered = std::mem::take(&mut self.buffered);
        buffered.sort_by_key(|m| m.seq);
        buffered.dedup_by_key(|m| m.seq);
        let mut disconnected = false;
        for message in buffered {
            if message.seq < self.expected_seq {
                continue;
            }
            if !disconnected && message.seq == self.expected_seq {
                self.apply_replicated(message.payload);
                self.expected_seq += 1;
            } else {
                disconnected = true;
            }
        }
        if disconnected {
            self.begin_resync();
        }
    }

    fn replace_contents(&mut self, snapshot: crate::backend::Snapshot) -> Result<(), Error> {
        self.backend.clear()?;
        let expiries: HashMap<Data, Timestamp> = snapshot.expiries.into_iter().collect();
        for (key, value) in snapshot.entries {
            let expiry = expiries.get(&key).copied();
            self.backend.put(key, value, expiry)?;
        }
        Ok(())
    }

    /// Apply a committed command from the master to the local backend.
    ///
    /// Failures are logged and surfaced as a `stale_data` warning on the
    /// event topic; the clone keeps running.
    fn apply_replicated(&mut self, payload: Command) {
        let now = Timestamp::now();
        let result = match payload {
            Command::Put { key, value, expiry, publisher } => {
                let absolute = expiry.map(|e| e.resolve(now));
                let old = match self.backend.exists(&key) {
                    Ok(true) => self.backend.get(&key).ok(),
                    _ => None,
                };
                self.backend.put(key.clone(), value.clone(), absolute).map(|()| {
                    let span = absolute.map(|instant| instant.since(now));
                    self.emit_insert_or_update(&key, old, &value, span, publisher);
                })
            }
            Command::Erase { key, publisher } => self.backend.erase(&key).map(|()| {
                self.emit(events::erase(&self.name, &key, publisher));
            }),
            Command::Expire { key, publisher } => {
                // The master already decided the entry is due.
                self.backend.erase(&key).map(|()| {
                    self.emit(events::expire(&self.name, &key, publisher));
                })
            }
            Command::Clear { publisher: _ } => self.backend.clear(),
            payload => {
                debug!(store = %self.name, command = payload.tag(), "unexpected replicated command");
                Ok(())
            }
        };
        if let Err(error) = result {
            warn!(store = %self.name, %error, "failed to apply replicated command");
            let notice = Error::with_message(
                ErrorKind::StaleData,
                format!("clone failed to apply command: {error}"),
            );
            self.emit(notice.to_data());
        }
    }

    // -- ticks ---------------------------------------------------------------

    fn handle_tick(&mut self) {
        match self.role {
            StoreRole::Master => self.scan_expiries(),
            StoreRole::Clone => self.clone_housekeeping(),
        }
    }

    /// Erase every entry whose expiry passed, replicating and emitting an
    /// `expire` per entry, exactly once.
    fn scan_expiries(&mut self) {
        let now = Timestamp::now();
        let due: Vec<Data> = match self.backend.expiries() {
            Ok(expiries) => expiries
                .into_iter()
                .take_while(|(_, expiry)| *expiry <= now)
                .map(|(key, _)| key)
                .collect(),
            Err(error) => {
                warn!(store = %self.name, %error, "expiry scan failed");
                return;
            }
        };
        for key in due {
            match self.backend.expire(&key, now) {
                Ok(true) => {
                    self.expiry_mirror.remove(&key);
                    self.broadcast(Command::Expire { key: key.clone(), publisher: self.id });
                    self.emit(events::expire(&self.name, &key, self.id));
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(store = %self.name, %error, "expire failed");
                }
            }
        }
    }

    /// Clones run no expiry of their own; their tick garbage-collects
    /// timed-out or abandoned forwarded requests and retries the snapshot
    /// handshake while unbound.
    fn clone_housekeeping(&mut self) {
        let now = Timestamp::now();
        let timed_out: Vec<RequestId> = self
            .pending_unique
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in timed_out {
            if let Some((reply, _)) = self.pending_unique.remove(&id) {
                reply.deliver(Err(Error::new(ErrorKind::RequestTimeout)));
            }
        }
        self.pending_unique.retain(|_, (reply, _)| !reply.is_abandoned());

        if self.master.is_none() || self.awaiting_resync {
            self.request_snapshot();
        }
    }

    // -- outbound ------------------------------------------------------------

    /// Issue the next sequence number and broadcast a committed command.
    fn broadcast(&mut self, payload: Command) {
        self.seq += 1;
        let message = CommandMessage::new(self.id, self.seq, payload);
        self.commands.publish(&self.command_topic, message);
    }

    /// Broadcast under the current sequence number, without issuing a new
    /// one (snapshot traffic and request results).
    fn publish_committed(&self, payload: Command) {
        let message = CommandMessage::new(self.id, self.seq, payload);
        self.commands.publish(&self.command_topic, message);
    }

    /// Broadcast pre-commit traffic (seq 0).
    fn publish_precommit(&self, payload: Command) {
        let message = CommandMessage::new(self.id, 0, payload);
        self.commands.publish(&self.command_topic, message);
    }

    fn emit_insert_or_update(
        &self,
        key: &Data,
        old: Option<Data>,
        new_value: &Data,
        expiry: Option<Timespan>,
        publisher: EntityId,
    ) {
        let event = match old {
            Some(old_value) => {
                events::update(&self.name, key, &old_value, new_value, expiry, publisher)
            }
            None => events::insert(&self.name, key, new_value, expiry, publisher),
        };
        self.emit(event);
    }

    fn emit(&self, event: Data) {
        if let Err(error) = self.hub.publish(&self.event_topic, event) {
            warn!(store = %self.name, %error, "event emission failed");
        }
    }
}

fn relative_expiry(expiry: Expiry, now: Timestamp) -> Timespan {
    match expiry {
        Expiry::Relative(span) => span,
        Expiry::Absolute(instant) => instant.since(now),
    }
}

fn write_op_from_command(payload: Command, now: Timestamp) -> Option<(WriteOp, EntityId)> {
    match payload {
        Command::Put { key, value, expiry, publisher } => Some((
            WriteOp::Put { key, value, expiry: expiry.map(|e| relative_expiry(e, now)) },
            publisher,
        )),
        Command::Erase { key, publisher } => Some((WriteOp::Erase { key }, publisher)),
        Command::Clear { publisher } => Some((WriteOp::Clear, publisher)),
        Command::Add { key, value, init_type, expiry, publisher } => Some((
            WriteOp::Add {
                key,
                value,
                init_type,
                expiry: expiry.map(|e| relative_expiry(e, now)),
            },
            publisher,
        )),
        Command::Subtract { key, value, expiry, publisher } => Some((
            WriteOp::Subtract { key, value, expiry: expiry.map(|e| relative_expiry(e, now)) },
            publisher,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_expiry_anchors_absolute_instants() {
        let now = Timestamp::from_nanos(1_000);
        assert_eq!(
            relative_expiry(Expiry::Relative(Timespan::from_nanos(50)), now),
            Timespan::from_nanos(50)
        );
        assert_eq!(
            relative_expiry(Expiry::Absolute(Timestamp::from_nanos(1_300)), now),
            Timespan::from_nanos(300)
        );
    }

    #[test]
    fn forwarded_writes_translate_to_write_ops() {
        let now = Timestamp::from_nanos(0);
        let publisher = EntityId::nil();

        let put = Command::Put {
            key: Data::from("k"),
            value: Data::from(1i64),
            expiry: Some(Expiry::Relative(Timespan::from_secs(1))),
            publisher,
        };
        match write_op_from_command(put, now) {
            Some((WriteOp::Put { key, expiry, .. }, who)) => {
                assert_eq!(key, Data::from("k"));
                assert_eq!(expiry, Some(Timespan::from_secs(1)));
                assert_eq!(who, publisher);
            }
            other => panic!("unexpected translation: {other:?}"),
        }

        assert!(matches!(
            write_op_from_command(Command::Clear { publisher }, now),
            Some((WriteOp::Clear, _))
        ));
        assert!(write_op_from_command(
            Command::SnapshotRequest { clone_id: publisher },
            now
        )
        .is_none());
        assert!(write_op_from_command(
            Command::AckClone { clone_id: publisher },
            now
        )
        .is_none());
    }

    #[test]
    fn channel_reply_delivery_and_abandonment() {
        let (tx, mut rx) = oneshot::channel();
        let reply = ReplyTo::Channel(tx);
        assert!(!reply.is_abandoned());
        reply.deliver(Ok(Data::from(1i64)));
        assert_eq!(rx.try_recv().unwrap(), Ok(Data::from(1i64)));

        let (tx, rx) = oneshot::channel::<Result<Data, Error>>();
        drop(rx);
        let reply = ReplyTo::Channel(tx);
        assert!(reply.is_abandoned());
        // A late reply to a cancelled request is silently discarded.
        reply.deliver(Err(Error::new(ErrorKind::RequestTimeout)));
    }

    #[test]
    fn mailbox_reply_lands_in_queue() {
        let mailbox = Arc::new(Mailbox::new().unwrap());
        let reply = ReplyTo::Mailbox { id: RequestId::new(3), mailbox: Arc::clone(&mailbox) };
        assert!(!reply.is_abandoned());
        reply.deliver(Ok(Data::Boolean(true)));

        let response = mailbox.try_pop().unwrap();
        assert_eq!(response.id, RequestId::new(3));
        assert_eq!(response.answer, Ok(Data::Boolean(true)));
    }
}
