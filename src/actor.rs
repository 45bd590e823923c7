// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor references
//!
//! The `actor` module provides the `ActorRef` type, the uniform handle over
//! every placement variant, and the `ActorContext` passed to behavior
//! handlers. An `ActorRef` can be used to send messages to the actor, to
//! create children beneath it and to destroy it together with its subtree.
//!
//! Placement variants differ only in how messaging is realized; they plug
//! into `ActorRef` through the `ActorCell` seam.
//!

use crate::{
    behavior::BehaviorSpec, config::CreateOptions, system::ActorSystem,
    ActorId, Error,
};

use async_trait::async_trait;

use serde_json::Value;

use tracing::{debug, error, warn};

use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

/// Variant seam behind an `ActorRef`. Implemented by the in-memory actor,
/// the forked-parent proxy, the round-robin balancer and the stub.
#[async_trait]
pub(crate) trait ActorCell: Send + Sync + 'static {
    /// Fire-and-forget dispatch.
    async fn tell(&self, topic: &str, payload: Value) -> Result<(), Error>;

    /// Ask dispatch, optionally bounded by a deadline.
    async fn ask(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error>;

    /// Variant-specific teardown: runs the user destroy hook for an
    /// in-memory actor, the destroy handshake for a forked one.
    async fn destroy(&self) -> Result<(), Error>;

    /// True if the variant can no longer deliver messages. Used by the
    /// balancer to drop dead children from its rotation.
    fn is_closed(&self) -> bool {
        false
    }

    /// Notification that a child was attached beneath this actor.
    fn child_added(&self, _child: &ActorRef) {}
}

pub(crate) struct ActorShared {
    id: ActorId,
    name: String,
    parent: Option<Weak<ActorShared>>,
    children: Mutex<Vec<ActorRef>>,
    cell: Box<dyn ActorCell>,
    system: ActorSystem,
    destroying: AtomicBool,
}

/// Reference to an actor. Cheap to clone; all clones address the same
/// actor.
#[derive(Clone)]
pub struct ActorRef {
    shared: Arc<ActorShared>,
}

impl ActorRef {
    /// Creates a reference and attaches it beneath `parent` if given.
    pub(crate) fn new(
        id: ActorId,
        name: String,
        parent: Option<&ActorRef>,
        cell: Box<dyn ActorCell>,
        system: ActorSystem,
    ) -> Self {
        let actor = Self {
            shared: Arc::new(ActorShared {
                id,
                name,
                parent: parent.map(|parent| Arc::downgrade(&parent.shared)),
                children: Mutex::new(Vec::new()),
                cell,
                system,
                destroying: AtomicBool::new(false),
            }),
        };
        if let Some(parent) = parent {
            parent.adopt(&actor);
        }
        actor
    }

    /// The actor's unique identifier.
    pub fn id(&self) -> &ActorId {
        &self.shared.id
    }

    /// The actor's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The actor's parent, `None` for the root.
    pub fn parent(&self) -> Option<ActorRef> {
        self.shared
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|shared| ActorRef { shared })
    }

    /// The actor's current children.
    pub fn children(&self) -> Vec<ActorRef> {
        self.lock_children().clone()
    }

    /// The actor system this actor belongs to.
    pub fn system(&self) -> &ActorSystem {
        &self.shared.system
    }

    /// Sends a fire-and-forget message. Once destruction has begun the
    /// message is dropped with a warning.
    pub async fn tell(
        &self,
        topic: &str,
        payload: Value,
    ) -> Result<(), Error> {
        if self.is_destroying() {
            warn!(
                "Actor {} is being destroyed, dropping message '{}'.",
                self.shared.id, topic
            );
            return Ok(());
        }
        self.shared.cell.tell(topic, payload).await
    }

    /// Sends a message and awaits the reply.
    pub async fn ask(
        &self,
        topic: &str,
        payload: Value,
    ) -> Result<Value, Error> {
        self.ask_inner(topic, payload, None).await
    }

    /// Sends a message and awaits the reply, failing with `Error::Timeout`
    /// once the deadline expires.
    pub async fn ask_with_timeout(
        &self,
        topic: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, Error> {
        self.ask_inner(topic, payload, Some(timeout)).await
    }

    async fn ask_inner(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        if self.is_destroying() {
            return Err(Error::Destroyed(self.shared.id.clone()));
        }
        self.shared.cell.ask(topic, payload, timeout).await
    }

    /// Creates a child actor beneath this actor. Placement is resolved by
    /// the system from configuration and the given options.
    pub async fn create_child(
        &self,
        spec: BehaviorSpec,
        opts: CreateOptions,
    ) -> Result<ActorRef, Error> {
        if self.is_destroying() {
            return Err(Error::Destroyed(self.shared.id.clone()));
        }
        self.shared.system.create_actor(spec, self, opts).await
    }

    /// Destroys this actor: runs the variant teardown (user hook or remote
    /// handshake), then tears down all children, then detaches from the
    /// parent. Subsequent calls are no-ops.
    pub async fn destroy(&self) -> Result<(), Error> {
        self.destroy_boxed().await
    }

    fn destroy_boxed(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
        Box::pin(async move {
            if self.shared.destroying.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            debug!("Destroying actor {}.", self.shared.id);
            let hook = self.shared.cell.destroy().await;
            let children: Vec<ActorRef> =
                self.lock_children().drain(..).collect();
            for child in children {
                if let Err(err) = child.destroy_boxed().await {
                    error!(
                        "Failed to destroy child {}: {}",
                        child.id(),
                        err
                    );
                }
            }
            if let Some(parent) = self.parent() {
                parent.remove_child(self.id());
            }
            hook
        })
    }

    /// True once destruction has begun.
    pub fn is_destroying(&self) -> bool {
        self.shared.destroying.load(Ordering::SeqCst)
    }

    /// True if the underlying variant can no longer deliver messages.
    pub(crate) fn is_closed(&self) -> bool {
        self.shared.cell.is_closed()
    }

    pub(crate) fn adopt(&self, child: &ActorRef) {
        self.lock_children().push(child.clone());
        self.shared.cell.child_added(child);
    }

    pub(crate) fn remove_child(&self, id: &ActorId) {
        self.lock_children().retain(|child| child.id() != id);
    }

    fn lock_children(&self) -> std::sync::MutexGuard<'_, Vec<ActorRef>> {
        self.shared
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Debug for ActorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

/// Context handed to behavior hooks and handlers.
#[derive(Clone)]
pub struct ActorContext {
    actor: ActorRef,
    system: ActorSystem,
}

impl ActorContext {
    pub(crate) fn new(actor: ActorRef, system: ActorSystem) -> Self {
        Self { actor, system }
    }

    /// Id of the actor being handled.
    pub fn id(&self) -> &ActorId {
        self.actor.id()
    }

    /// Name of the actor being handled.
    pub fn name(&self) -> &str {
        self.actor.name()
    }

    /// Reference to the actor being handled.
    pub fn actor(&self) -> &ActorRef {
        &self.actor
    }

    /// The actor's parent, `None` for the root.
    pub fn parent(&self) -> Option<ActorRef> {
        self.actor.parent()
    }

    /// The actor system.
    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Creates a child actor beneath the one being handled.
    pub async fn create_child(
        &self,
        spec: BehaviorSpec,
        opts: CreateOptions,
    ) -> Result<ActorRef, Error> {
        self.actor.create_child(spec, opts).await
    }
}
