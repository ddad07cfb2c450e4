//! Store attachment: the consumed interface of the endpoint layer.
//!
//! A [`StoreEndpoint`] owns the hub connection and the command-plane router
//! shared by every store actor it spawns, hands out actor identities, and
//! tracks which stores have a local master so duplicate masters are
//! rejected at attach time.

use crate::actor::{spawn_store_actor, StoreRole};
use crate::backend::{make_backend, Backend, BackendOptions, BackendType, MemoryBackend};
use crate::command::CommandMessage;
use crate::frontend::Store;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use skein_broker::{Hub, Router};
use skein_core::{ActorId, EndpointId, EntityId, Error, ErrorKind, StoreConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Spawns and tracks the store actors of one endpoint.
///
/// Attach methods spawn a tokio task and must run inside a runtime.
pub struct StoreEndpoint {
    id: EndpointId,
    hub: Arc<Hub>,
    commands: Arc<Router<CommandMessage>>,
    masters: Arc<DashMap<String, EntityId>>,
    next_actor: AtomicU64,
    cfg: StoreConfig,
}

impl StoreEndpoint {
    /// Create an endpoint over a hub, with the given store settings.
    pub fn new(hub: Arc<Hub>, cfg: StoreConfig) -> Self {
        Self {
            id: EndpointId::random(),
            hub,
            commands: Arc::new(Router::new()),
            masters: Arc::new(DashMap::new()),
            next_actor: AtomicU64::new(0),
            cfg,
        }
    }

    /// This endpoint's id.
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// The hub this endpoint publishes events through.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The command-plane router shared by this endpoint's store actors.
    ///
    /// A transport bridging stores across processes forwards
    /// [`CommandMessage`]s between this router and its remote counterpart.
    pub fn commands(&self) -> Arc<Router<CommandMessage>> {
        Arc::clone(&self.commands)
    }

    /// Attach a master for `name` over a backend of the given type.
    ///
    /// # Errors
    /// Fails with `master_exists` if this endpoint already hosts a master
    /// for the store, or `invalid_topic_key` for an unusable store name.
    pub fn attach_master(
        &self,
        name: &str,
        backend_type: BackendType,
        options: &BackendOptions,
    ) -> Result<Store, Error> {
        // Persistent backends fall back to the configured path when the
        // options leave it out.
        let options = match (backend_type, options.get_str("path"), &self.cfg.path) {
            (BackendType::Sqlite, None, Some(path)) => options
                .clone()
                .with("path", path.to_string_lossy().into_owned()),
            _ => options.clone(),
        };
        self.attach_master_with(name, make_backend(backend_type, &options))
    }

    /// Attach a master for `name` over an explicit backend instance.
    pub fn attach_master_with(
        &self,
        name: &str,
        backend: Box<dyn Backend>,
    ) -> Result<Store, Error> {
        let id = self.next_entity();
        match self.masters.entry(name.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::with_message(
                    ErrorKind::MasterExists,
                    format!("store {name:?} already has a master on this endpoint"),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        let registration = MasterRegistration {
            registry: Arc::clone(&self.masters),
            name: name.to_string(),
            id,
        };
        let tx = spawn_store_actor(
            name.to_string(),
            id,
            StoreRole::Master,
            backend,
            Arc::clone(&self.hub),
            Arc::clone(&self.commands),
            self.cfg.clone(),
            Some(registration),
        )?;
        info!(store = name, actor = %id, "master attached");
        Ok(Store::new(name.to_string(), tx, self.next_entity(), self.cfg.request_timeout))
    }

    /// Attach a clone for `name`.
    ///
    /// Clones always run on the in-memory backend; the initial state arrives
    /// via snapshot transfer from the master, retried until one responds.
    pub fn attach_clone(&self, name: &str) -> Result<Store, Error> {
        let id = self.next_entity();
        let tx = spawn_store_actor(
            name.to_string(),
            id,
            StoreRole::Clone,
            Box::new(MemoryBackend::new()),
            Arc::clone(&self.hub),
            Arc::clone(&self.commands),
            self.cfg.clone(),
            None,
        )?;
        info!(store = name, actor = %id, "clone attached");
        Ok(Store::new(name.to_string(), tx, self.next_entity(), self.cfg.request_timeout))
    }

    /// Whether this endpoint currently hosts a master for `name`.
    pub fn has_master(&self, name: &str) -> bool {
        self.masters.contains_key(name)
    }

    fn next_entity(&self) -> EntityId {
        let object = self.next_actor.fetch_add(1, Ordering::Relaxed) + 1;
        EntityId::new(self.id, ActorId::new(object))
    }
}

impl std::fmt::Debug for StoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEndpoint")
            .field("id", &self.id)
            .field("masters", &self.masters.len())
            .finish()
    }
}

/// Removes a master's registry entry when its actor stops, whatever the
/// reason for the stop.
pub(crate) struct MasterRegistration {
    registry: Arc<DashMap<String, EntityId>>,
    name: String,
    id: EntityId,
}

impl Drop for MasterRegistration {
    fn drop(&mut self) {
        self.registry.remove_if(&self.name, |_, current| *current == self.id);
    }
}
