// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type, responsible for
//! bootstrapping the root actor, resolving placement for every
//! `create_actor` call and wiring worker transports.
//!
//! Bootstrap order: context initialization, configuration load, root
//! construction, root initialization. The root is built exactly once; every
//! later `root_actor` call returns the same reference. A system built with
//! forked options is the worker side of a fork: its root hangs beneath a
//! stub of the parent-side actor.
//!

use crate::{
    actor::ActorRef,
    balancer,
    behavior::{self, Behavior, BehaviorRegistry, BehaviorSpec},
    config::{
        self, ConfigMap, ConfigSource, CreateOptions, Placement,
        MODE_FORKED, MODE_IN_MEMORY,
    },
    forked, runner, transport, worker, ActorId, Error,
};

use async_trait::async_trait;

use serde_json::{Map, Value};

use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio_util::sync::CancellationToken;

use tracing::{debug, level_filters::LevelFilter};

use std::sync::{
    atomic::{AtomicU16, Ordering},
    Arc, Mutex, OnceLock, RwLock,
};

/// Process-wide default system, initialized explicitly and exactly once.
static DEFAULT_SYSTEM: OnceLock<ActorSystem> = OnceLock::new();

/// Application hook run first during bootstrap.
#[async_trait]
pub trait SystemContext: Send + 'static {
    /// Called before configuration is loaded and the root is built.
    async fn initialize(
        &mut self,
        _system: &ActorSystem,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Marks a system as the worker side of a fork.
#[derive(Clone, Debug)]
pub struct ForkedOptions {
    /// Id of the parent-side actor that spawned this worker.
    pub id: ActorId,
}

/// Options accepted by `ActorSystem::new`.
#[derive(Default)]
pub struct SystemOptions {
    context: Option<Box<dyn SystemContext>>,
    root: Option<BehaviorSpec>,
    forked: Option<ForkedOptions>,
    config: ConfigSource,
    test: bool,
    debug: bool,
    registry: BehaviorRegistry,
    worker_command: Option<Vec<String>>,
}

impl SystemOptions {
    /// Sets the application context hook.
    pub fn with_context(mut self, context: impl SystemContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    /// Sets the root behavior. Absent, a neutral root is used.
    pub fn with_root(mut self, root: BehaviorSpec) -> Self {
        self.root = Some(root);
        self
    }

    /// Marks the system as a worker-side system.
    pub fn with_forked(mut self, forked: ForkedOptions) -> Self {
        self.forked = Some(forked);
        self
    }

    /// Sets the configuration source.
    pub fn with_config(mut self, config: ConfigSource) -> Self {
        self.config = config;
        self
    }

    /// Restricts logging to errors, for test runs.
    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    /// Enables debug logging. Overrides `test`.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the behavior registry shared with forked workers.
    pub fn with_registry(mut self, registry: BehaviorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the command used to fork workers. Defaults to the current
    /// executable re-invoked with the worker marker argument.
    pub fn with_worker_command(mut self, command: Vec<String>) -> Self {
        self.worker_command = Some(command);
        self
    }
}

struct SystemState {
    context: AsyncMutex<Option<Box<dyn SystemContext>>>,
    root_spec: Mutex<Option<BehaviorSpec>>,
    forked: Option<ForkedOptions>,
    config_source: ConfigSource,
    config: RwLock<ConfigMap>,
    root: OnceCell<ActorRef>,
    /// Keeps the worker-side stub of the remote parent alive.
    parent_stub: Mutex<Option<ActorRef>>,
    registry: BehaviorRegistry,
    debug_port_counter: AtomicU16,
    token: CancellationToken,
    test: bool,
    debug: bool,
    worker_command: Option<Vec<String>>,
}

/// The actor system. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct ActorSystem {
    state: Arc<SystemState>,
}

impl ActorSystem {
    /// Creates a new actor system. The root is built lazily on the first
    /// `root_actor` call.
    pub fn new(options: SystemOptions) -> Self {
        Self {
            state: Arc::new(SystemState {
                context: AsyncMutex::new(options.context),
                root_spec: Mutex::new(options.root),
                forked: options.forked,
                config_source: options.config,
                config: RwLock::new(ConfigMap::new()),
                root: OnceCell::new(),
                parent_stub: Mutex::new(None),
                registry: options.registry,
                debug_port_counter: AtomicU16::new(0),
                token: CancellationToken::new(),
                test: options.test,
                debug: options.debug,
                worker_command: options.worker_command,
            }),
        }
    }

    /// Initializes the process-wide default system. Fails if it already
    /// exists.
    pub fn init_default(options: SystemOptions) -> Result<ActorSystem, Error> {
        let system = ActorSystem::new(options);
        DEFAULT_SYSTEM.set(system.clone()).map_err(|_| {
            Error::Start("default system already initialized".to_owned())
        })?;
        Ok(system)
    }

    /// Returns the process-wide default system. Fails if `init_default`
    /// has not run.
    pub fn default_system() -> Result<ActorSystem, Error> {
        DEFAULT_SYSTEM.get().cloned().ok_or_else(|| {
            Error::Start("default system is not initialized".to_owned())
        })
    }

    /// Returns the root actor, bootstrapping the system on first use.
    pub async fn root_actor(&self) -> Result<ActorRef, Error> {
        self.state
            .root
            .get_or_try_init(|| self.bootstrap())
            .await
            .cloned()
    }

    async fn bootstrap(&self) -> Result<ActorRef, Error> {
        debug!("Bootstrapping actor system.");
        if let Some(mut context) = self.state.context.lock().await.take() {
            context.initialize(self).await.map_err(|err| {
                Error::Start(format!("context initialization failed: {}", err))
            })?;
            *self.state.context.lock().await = Some(context);
        }

        let entries = config::load(&self.state.config_source).await;
        *self.write_config() = entries;

        let spec = self
            .state
            .root_spec
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let (name, behavior) = match spec {
            Some(BehaviorSpec::Definition(behavior)) => {
                (behavior.name(), behavior)
            }
            Some(BehaviorSpec::Registered { name, params }) => {
                let behavior = self.state.registry.resolve(&name, params)?;
                (name, behavior)
            }
            None => (
                "root".to_owned(),
                Box::new(RootBehavior) as Box<dyn Behavior>,
            ),
        };
        let parent = self
            .state
            .forked
            .as_ref()
            .map(|forked| ActorRef::stub(self, forked.id.clone()));
        if let Some(stub) = &parent {
            *self
                .state
                .parent_stub
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(stub.clone());
        }
        let root =
            runner::spawn(self, behavior, name, parent.as_ref()).await?;
        debug!("Actor system is ready.");
        Ok(root)
    }

    /// Creates an actor beneath `parent`. This is the single placement
    /// dispatch point: configuration for the behavior's decapitalized name
    /// is merged under the caller options, cluster sizes above one insert a
    /// round-robin balancer, and the resulting mode picks the variant.
    pub async fn create_actor(
        &self,
        spec: BehaviorSpec,
        parent: &ActorRef,
        opts: CreateOptions,
    ) -> Result<ActorRef, Error> {
        let name = spec.resolve_name();
        let entry = {
            let config = self.read_config();
            config.get(&behavior::decapitalize(&name)).cloned()
        };
        let placement = config::resolve_placement(entry.as_ref(), &opts);
        debug!(
            "Creating actor '{}' with mode '{}' and cluster size {}.",
            name, placement.mode, placement.cluster_size
        );

        if placement.cluster_size > 1 {
            return self.create_cluster(spec, parent, placement).await;
        }
        self.place(spec, parent, &placement).await
    }

    /// Spawns a balancer plus `cluster_size` children beneath it.
    async fn create_cluster(
        &self,
        spec: BehaviorSpec,
        parent: &ActorRef,
        placement: Placement,
    ) -> Result<ActorRef, Error> {
        let display = spec.resolve_name();
        let BehaviorSpec::Registered { name, params } = spec else {
            return Err(Error::Create(format!(
                "cluster placement of '{}' requires a registered behavior",
                display
            )));
        };
        let balancer = balancer::spawn(self, &name, parent);
        let child_placement = Placement {
            mode: placement.mode.clone(),
            cluster_size: 1,
            params: placement.params.clone(),
        };
        for _ in 0..placement.cluster_size {
            let child_spec = BehaviorSpec::Registered {
                name: name.clone(),
                params: params.clone(),
            };
            self.place(child_spec, &balancer, &child_placement).await?;
        }
        Ok(balancer)
    }

    /// Builds one actor with an already resolved placement.
    async fn place(
        &self,
        spec: BehaviorSpec,
        parent: &ActorRef,
        placement: &Placement,
    ) -> Result<ActorRef, Error> {
        match placement.mode.as_str() {
            MODE_IN_MEMORY => {
                let name = spec.resolve_name();
                let behavior = match spec {
                    BehaviorSpec::Definition(behavior) => behavior,
                    BehaviorSpec::Registered { name, params } => {
                        self.state.registry.resolve(
                            &name,
                            merge_params(params, &placement.params),
                        )?
                    }
                };
                runner::spawn(self, behavior, name, Some(parent)).await
            }
            MODE_FORKED => {
                let display = spec.resolve_name();
                let BehaviorSpec::Registered { name, params } = spec else {
                    return Err(Error::Create(format!(
                        "behavior '{}' is not registered for forked \
                         placement",
                        display
                    )));
                };
                forked::spawn(
                    self,
                    &name,
                    merge_params(params, &placement.params),
                    parent,
                )
                .await
            }
            other => Err(Error::UnknownMode(other.to_owned())),
        }
    }

    /// Produces a fresh unique actor id.
    pub fn generate_actor_id(&self) -> ActorId {
        ActorId::generate()
    }

    /// Destroys the root and all of its descendants, then cancels the
    /// system token. Workers started by the system do not survive this.
    pub async fn destroy(&self) -> Result<(), Error> {
        debug!("Destroying actor system.");
        let result = match self.state.root.get() {
            Some(root) => root.destroy().await,
            None => Ok(()),
        };
        self.state.token.cancel();
        result
    }

    /// Token cancelled when the system shuts down. Launchers can await it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.token.clone()
    }

    /// Blocks until SIGINT or SIGTERM arrives (or the system is destroyed
    /// from elsewhere), then tears the actor tree down. Worker processes do
    /// not survive the teardown.
    pub async fn run_until_shutdown(&self) -> Result<(), Error> {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )
            .map_err(|err| Error::Start(err.to_string()))?;
            tokio::select! {
                _ = ctrl_c => {
                    tracing::warn!("Received interrupt, shutting down.");
                }
                _ = terminate.recv() => {
                    tracing::warn!("Received terminate, shutting down.");
                }
                _ = self.state.token.cancelled() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = ctrl_c => {
                    tracing::warn!("Received interrupt, shutting down.");
                }
                _ = self.state.token.cancelled() => {}
            }
        }
        self.destroy().await
    }

    /// Log level selected by the system options: errors only under `test`,
    /// debug under `debug`, info otherwise.
    pub fn log_level(&self) -> LevelFilter {
        if self.state.debug {
            LevelFilter::DEBUG
        } else if self.state.test {
            LevelFilter::ERROR
        } else {
            LevelFilter::INFO
        }
    }

    /// The behavior registry shared with forked workers.
    pub fn registry(&self) -> &BehaviorRegistry {
        &self.state.registry
    }

    pub(crate) fn is_test(&self) -> bool {
        self.state.test
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.state.debug
    }

    /// Snapshot of the loaded configuration, forwarded to workers.
    pub(crate) fn config_snapshot(&self) -> ConfigMap {
        self.read_config().clone()
    }

    /// Command used to fork a worker.
    pub(crate) fn worker_command(&self) -> Result<Vec<String>, Error> {
        match &self.state.worker_command {
            Some(command) if !command.is_empty() => Ok(command.clone()),
            Some(_) => Err(Error::Spawn("empty worker command".to_owned())),
            None => {
                let exe = std::env::current_exe().map_err(|err| {
                    Error::Spawn(format!(
                        "cannot locate worker executable: {}",
                        err
                    ))
                })?;
                Ok(vec![
                    exe.to_string_lossy().into_owned(),
                    worker::WORKER_ARG.to_owned(),
                ])
            }
        }
    }

    /// Extra arguments for a fresh worker: the current process's debug
    /// flags with per-child port rewrite, plus the forwarded log flags.
    pub(crate) fn worker_flags(&self) -> Vec<String> {
        let offset = self
            .state
            .debug_port_counter
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1);
        let mut flags =
            transport::forward_debug_args(std::env::args().skip(1), offset);
        if self.state.test {
            flags.push(worker::TEST_ARG.to_owned());
        }
        if self.state.debug {
            flags.push(worker::DEBUG_ARG.to_owned());
        }
        flags
    }

    fn read_config(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, ConfigMap> {
        self.state.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_config(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, ConfigMap> {
        self.state.config.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Neutral root used when no root behavior is given.
struct RootBehavior;

#[async_trait]
impl Behavior for RootBehavior {
    fn name(&self) -> String {
        "root".to_owned()
    }

    async fn handle(
        &mut self,
        topic: &str,
        _payload: Value,
        _ctx: &crate::actor::ActorContext,
    ) -> Result<Option<Value>, Error> {
        Err(Error::Handler(format!("no handler for topic '{}'", topic)))
    }
}

/// Merges free-form placement parameters over the spec's own parameters.
fn merge_params(base: Value, extra: &Map<String, Value>) -> Value {
    if extra.is_empty() {
        return base;
    }
    let mut merged = match base {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in extra {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::behavior::HandlerTable;

    use serde_json::json;

    fn echo_registry() -> BehaviorRegistry {
        let registry = BehaviorRegistry::new();
        registry.register("echo", |params| {
            let table = HandlerTable::new("echo")
                .handler("echo", |payload, _ctx| async move {
                    Ok(Some(payload))
                })
                .handler("params", move |_payload, _ctx| {
                    let params = params.clone();
                    async move { Ok(Some(params)) }
                });
            Ok(Box::new(table) as Box<dyn Behavior>)
        });
        registry
    }

    #[tokio::test]
    async fn test_unknown_mode_fails() {
        let system = ActorSystem::new(SystemOptions::default());
        let root = system.root_actor().await.unwrap();
        let result = system
            .create_actor(
                BehaviorSpec::definition(HandlerTable::new("noop")),
                &root,
                CreateOptions {
                    mode: Some("quantum".to_owned()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(result.err(), Some(Error::UnknownMode("quantum".to_owned())));
    }

    #[tokio::test]
    async fn test_config_entry_drives_placement_and_params() {
        let mut entries = ConfigMap::new();
        entries.insert(
            "echo".to_owned(),
            json!({"mode": "in-memory", "tag": "blue"}),
        );
        let system = ActorSystem::new(
            SystemOptions::default()
                .with_registry(echo_registry())
                .with_config(ConfigSource::Inline(entries)),
        );
        let root = system.root_actor().await.unwrap();
        let actor = root
            .create_child(
                BehaviorSpec::registered("echo"),
                CreateOptions::default(),
            )
            .await
            .unwrap();
        let params = actor.ask("params", Value::Null).await.unwrap();
        assert_eq!(params, json!({"tag": "blue"}));
    }

    #[tokio::test]
    async fn test_forked_placement_requires_registration() {
        let system = ActorSystem::new(SystemOptions::default());
        let root = system.root_actor().await.unwrap();
        let result = system
            .create_actor(
                BehaviorSpec::definition(HandlerTable::new("oneOff")),
                &root,
                CreateOptions::forked(),
            )
            .await;
        assert_eq!(
            result.err(),
            Some(Error::Create(
                "behavior 'oneOff' is not registered for forked placement"
                    .to_owned()
            ))
        );
    }

    #[tokio::test]
    async fn test_root_is_built_once() {
        let system = ActorSystem::new(SystemOptions::default());
        let first = system.root_actor().await.unwrap();
        let second = system.root_actor().await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_default_system_initializes_once() {
        let first =
            ActorSystem::init_default(SystemOptions::default()).unwrap();
        let again = ActorSystem::default_system().unwrap();
        assert!(Arc::ptr_eq(&first.state, &again.state));
        assert!(ActorSystem::init_default(SystemOptions::default()).is_err());
    }

    #[test]
    fn test_merge_params_prefers_spec_values() {
        let mut extra = Map::new();
        extra.insert("a".to_owned(), json!(1));
        extra.insert("b".to_owned(), json!(2));
        let merged = merge_params(json!({"a": 10}), &extra);
        assert_eq!(merged, json!({"a": 10, "b": 2}));
    }
}
