// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Behaviors
//!
//! The `behavior` module provides the `Behavior` trait that user code
//! implements, the `HandlerTable` convenience form built from per-topic
//! closures, and the `BehaviorRegistry` of named factories used to resolve
//! behaviors on either side of a fork.
//!
//! A behavior shipped to a worker is never serialized source. The
//! `create-actor` frame names a registered factory; both the parent and the
//! worker populate their registries explicitly, and the factory receives the
//! parameters carried in the frame. Behaviors that capture surrounding state
//! can only be placed in-process.
//!

use crate::{actor::ActorContext, Error};

use async_trait::async_trait;

use serde_json::Value;

use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::{Arc, RwLock},
};

/// What an actor does. Handlers are dispatched by topic and run one at a
/// time per actor.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Behavior name used for configuration lookup. Defaults to the bare
    /// type name.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_owned()
    }

    /// Called once before the actor processes any message. Messages received
    /// meanwhile are queued.
    async fn initialize(
        &mut self,
        _ctx: &ActorContext,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Handles one message. The returned value, if any, fulfills the reply
    /// of an ask; it is discarded for a tell.
    async fn handle(
        &mut self,
        topic: &str,
        payload: Value,
        ctx: &ActorContext,
    ) -> Result<Option<Value>, Error>;

    /// Called once when the actor is destroyed, before its children are
    /// torn down.
    async fn destroy(&mut self, _ctx: &ActorContext) -> Result<(), Error> {
        Ok(())
    }
}

/// Boxed per-topic handler future.
type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Option<Value>, Error>> + Send>>;

/// Boxed per-topic handler.
type Handler = Box<dyn FnMut(Value, ActorContext) -> HandlerFuture + Send>;

/// Boxed lifecycle hook future.
type HookFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// Boxed lifecycle hook.
type Hook = Box<dyn FnMut(ActorContext) -> HookFuture + Send>;

/// A behavior assembled from named handler closures, the data-record form
/// of a behavior, with optional initialize and destroy hooks.
///
/// ```ignore
/// let echo = HandlerTable::new("echo")
///     .handler("echo", |payload, _ctx| async move { Ok(Some(payload)) });
/// ```
pub struct HandlerTable {
    name: String,
    handlers: HashMap<String, Handler>,
    init: Option<Hook>,
    teardown: Option<Hook>,
}

impl HandlerTable {
    /// Creates an empty table with the given behavior name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            handlers: HashMap::new(),
            init: None,
            teardown: None,
        }
    }

    /// Registers a handler for a topic, replacing any previous one.
    pub fn handler<F, Fut>(mut self, topic: &str, mut handler: F) -> Self
    where
        F: FnMut(Value, ActorContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Value>, Error>> + Send + 'static,
    {
        self.handlers.insert(
            topic.to_owned(),
            Box::new(move |payload, ctx| Box::pin(handler(payload, ctx))),
        );
        self
    }

    /// Sets the initialize hook.
    pub fn on_initialize<F, Fut>(mut self, mut hook: F) -> Self
    where
        F: FnMut(ActorContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.init = Some(Box::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Sets the destroy hook.
    pub fn on_destroy<F, Fut>(mut self, mut hook: F) -> Self
    where
        F: FnMut(ActorContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.teardown = Some(Box::new(move |ctx| Box::pin(hook(ctx))));
        self
    }
}

impl Debug for HandlerTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("name", &self.name)
            .field("topics", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Behavior for HandlerTable {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn initialize(&mut self, ctx: &ActorContext) -> Result<(), Error> {
        match &mut self.init {
            Some(hook) => hook(ctx.clone()).await,
            None => Ok(()),
        }
    }

    async fn destroy(&mut self, ctx: &ActorContext) -> Result<(), Error> {
        match &mut self.teardown {
            Some(hook) => hook(ctx.clone()).await,
            None => Ok(()),
        }
    }

    async fn handle(
        &mut self,
        topic: &str,
        payload: Value,
        ctx: &ActorContext,
    ) -> Result<Option<Value>, Error> {
        match self.handlers.get_mut(topic) {
            Some(handler) => handler(payload, ctx.clone()).await,
            None => Err(Error::Handler(format!(
                "no handler for topic '{}'",
                topic
            ))),
        }
    }
}

/// Factory producing a behavior instance from free-form parameters.
pub type BehaviorFactory =
    dyn Fn(Value) -> Result<Box<dyn Behavior>, Error> + Send + Sync;

/// Named behavior factories, shared by an actor system and the workers it
/// forks. Both sides register the same names; the `create-actor` frame only
/// carries the name and the parameters.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<BehaviorFactory>>>>,
}

impl BehaviorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a name, replacing any previous one.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(Value) -> Result<Box<dyn Behavior>, Error>
            + Send
            + Sync
            + 'static,
    {
        let mut factories =
            self.factories.write().unwrap_or_else(|e| e.into_inner());
        factories.insert(name.to_owned(), Arc::new(factory));
    }

    /// True if a factory is registered under the name.
    pub fn contains(&self, name: &str) -> bool {
        let factories =
            self.factories.read().unwrap_or_else(|e| e.into_inner());
        factories.contains_key(name)
    }

    /// Builds a behavior instance from the named factory.
    pub fn resolve(
        &self,
        name: &str,
        params: Value,
    ) -> Result<Box<dyn Behavior>, Error> {
        let factory = {
            let factories =
                self.factories.read().unwrap_or_else(|e| e.into_inner());
            factories.get(name).cloned()
        };
        match factory {
            Some(factory) => factory(params),
            None => Err(Error::Create(format!(
                "behavior '{}' is not registered",
                name
            ))),
        }
    }
}

impl Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let factories =
            self.factories.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("BehaviorRegistry")
            .field("names", &factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Behavior argument accepted by `create_actor` and `create_child`.
///
/// A `Definition` carries a ready instance and can only be placed
/// in-process. A `Registered` spec names a factory known to the registry
/// and can be placed on either side of a fork.
pub enum BehaviorSpec {
    /// A ready behavior instance.
    Definition(Box<dyn Behavior>),
    /// A registry name plus factory parameters.
    Registered {
        /// Registered factory name.
        name: String,
        /// Parameters handed to the factory.
        params: Value,
    },
}

impl Debug for BehaviorSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Definition(behavior) => {
                write!(f, "Definition({})", behavior.name())
            }
            Self::Registered { name, .. } => {
                write!(f, "Registered({})", name)
            }
        }
    }
}

impl BehaviorSpec {
    /// Spec for a ready behavior instance.
    pub fn definition(behavior: impl Behavior) -> Self {
        Self::Definition(Box::new(behavior))
    }

    /// Spec naming a registered factory with no parameters.
    pub fn registered(name: &str) -> Self {
        Self::Registered {
            name: name.to_owned(),
            params: Value::Null,
        }
    }

    /// Spec naming a registered factory with parameters.
    pub fn registered_with(name: &str, params: Value) -> Self {
        Self::Registered {
            name: name.to_owned(),
            params,
        }
    }

    /// Resolves the behavior name used for configuration lookup.
    pub(crate) fn resolve_name(&self) -> String {
        match self {
            Self::Definition(behavior) => behavior.name(),
            Self::Registered { name, .. } => name.clone(),
        }
    }
}

/// Decapitalizes the first letter of a behavior name, producing its
/// configuration key.
pub(crate) fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            first.to_lowercase().collect::<String>() + chars.as_str()
        }
        None => String::new(),
    }
}
