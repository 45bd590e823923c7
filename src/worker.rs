// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Worker entry point
//!
//! A forked worker speaks the actor protocol over its standard streams:
//! it receives `create-actor`, resolves the named behavior from its
//! registry, builds an actor system whose root hangs beneath a stub of the
//! parent-side actor, acknowledges with `actor-created` and then services
//! message traffic until the parent goes away.
//!
//! The launcher binary is not part of this crate. An application binary
//! routes itself here when it detects the worker marker argument:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() {
//!     let registry = build_registry();
//!     if troupe::worker::is_worker_invocation() {
//!         troupe::worker::main(registry).await.ok();
//!         return;
//!     }
//!     // normal application startup
//! }
//! ```
//!

use crate::{
    actor::ActorRef,
    behavior::{BehaviorRegistry, BehaviorSpec},
    config::ConfigSource,
    frame::{ActorCreatedBody, CreateActorBody, Frame, FrameType, MessageBody},
    system::{ActorSystem, ForkedOptions, SystemOptions},
    transport::{self, TransportHandle},
    Error,
};

use tokio::sync::mpsc;

use tracing::{debug, warn};

/// Marker argument the system appends when forking a worker.
pub const WORKER_ARG: &str = "--troupe-worker";

/// Forwarded flag restricting worker logging to errors.
pub const TEST_ARG: &str = "--troupe-test";

/// Forwarded flag enabling worker debug logging.
pub const DEBUG_ARG: &str = "--troupe-debug";

/// True if the current process was started as a worker.
pub fn is_worker_invocation() -> bool {
    std::env::args().any(|arg| arg == WORKER_ARG)
}

/// Runs the worker protocol over the process's standard streams. Logging
/// goes to stderr; stdout belongs to the protocol.
pub async fn main(registry: BehaviorRegistry) -> Result<(), Error> {
    let level = if std::env::args().any(|arg| arg == TEST_ARG) {
        tracing::level_filters::LevelFilter::ERROR
    } else if std::env::args().any(|arg| arg == DEBUG_ARG) {
        tracing::level_filters::LevelFilter::DEBUG
    } else {
        tracing::level_filters::LevelFilter::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();

    serve(tokio::io::stdin(), tokio::io::stdout(), registry).await
}

/// Runs the worker protocol over an arbitrary byte stream pair.
pub async fn serve<R, W>(
    read: R,
    write: W,
    registry: BehaviorRegistry,
) -> Result<(), Error>
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let (transport, mut inbound) = transport::connect(read, write);

    let Some(frame) = inbound.recv().await else {
        return Err(Error::TransportClosed);
    };
    if frame.frame_type != FrameType::CreateActor {
        let error = format!(
            "expected create-actor, got {:?}",
            frame.frame_type
        );
        let _ = transport
            .send(Frame::new(FrameType::ActorCreated).with_error(&error))
            .await;
        return Err(Error::Protocol(error));
    }
    let body: CreateActorBody = match frame
        .body
        .ok_or_else(|| "create-actor carried no body".to_owned())
        .and_then(|body| {
            serde_json::from_value(body).map_err(|err| err.to_string())
        }) {
        Ok(body) => body,
        Err(error) => {
            let _ = transport
                .send(Frame::new(FrameType::ActorCreated).with_error(&error))
                .await;
            return Err(Error::Protocol(error));
        }
    };
    debug!("Creating worker root for behavior '{}'.", body.behavior);

    let options = SystemOptions::default()
        .with_root(BehaviorSpec::registered_with(&body.behavior, body.params))
        .with_forked(ForkedOptions {
            id: body.parent.id,
        })
        .with_config(ConfigSource::Inline(body.config))
        .with_registry(registry)
        .with_test(body.test)
        .with_debug(body.debug);
    let system = ActorSystem::new(options);

    let root = match system.root_actor().await {
        Ok(root) => root,
        Err(err) => {
            let _ = transport
                .send(
                    Frame::new(FrameType::ActorCreated)
                        .with_error(err.to_string()),
                )
                .await;
            return Err(err);
        }
    };

    let created = serde_json::to_value(ActorCreatedBody {
        id: root.id().clone(),
    })
    .map_err(|err| Error::Protocol(err.to_string()))?;
    transport
        .send(Frame::new(FrameType::ActorCreated).with_body(created))
        .await?;

    ForkedActorChild::new(transport, root).serve(inbound).await;
    Ok(())
}

/// Worker-side wrapper around the root actor: forwards inbound frames to
/// the in-memory actor beneath it and writes replies back.
pub(crate) struct ForkedActorChild {
    transport: TransportHandle,
    inner: ActorRef,
}

impl ForkedActorChild {
    pub(crate) fn new(transport: TransportHandle, inner: ActorRef) -> Self {
        Self { transport, inner }
    }

    /// Services the transport until the parent destroys the actor or goes
    /// away. Frames are forwarded in arrival order, which preserves the
    /// pairwise FIFO guarantee end to end.
    pub(crate) async fn serve(self, mut inbound: mpsc::Receiver<Frame>) {
        while let Some(frame) = inbound.recv().await {
            match frame.frame_type {
                FrameType::ActorMessage => {
                    self.dispatch(frame.id, frame.body).await;
                }
                FrameType::Destroy => {
                    debug!("Parent destroyed actor {}.", self.inner.id());
                    if let Err(err) = self.inner.destroy().await {
                        warn!(
                            "Destroy of actor {} failed: {}",
                            self.inner.id(),
                            err
                        );
                    }
                    let _ = self
                        .transport
                        .send(Frame::new(FrameType::Destroyed))
                        .await;
                    break;
                }
                other => {
                    warn!("Unexpected frame {:?} from parent.", other);
                }
            }
        }
        // Parent gone or told us to stop; tear the subtree down.
        if !self.inner.is_destroying() {
            debug!("Parent went away, destroying actor {}.", self.inner.id());
            let _ = self.inner.destroy().await;
        }
        self.transport.close();
    }

    async fn dispatch(
        &self,
        correlation: Option<u64>,
        body: Option<serde_json::Value>,
    ) {
        let message: Option<MessageBody> =
            body.and_then(|body| serde_json::from_value(body).ok());
        let Some(message) = message else {
            warn!("Dropping actor-message with a malformed body.");
            if let Some(correlation) = correlation {
                let _ = self
                    .transport
                    .send(
                        Frame::new(FrameType::ActorResponse)
                            .with_id(correlation)
                            .with_error("malformed actor-message body"),
                    )
                    .await;
            }
            return;
        };
        match correlation {
            Some(correlation) => {
                let reply = match self
                    .inner
                    .ask(&message.topic, message.payload)
                    .await
                {
                    Ok(value) => Frame::new(FrameType::ActorResponse)
                        .with_id(correlation)
                        .with_body(value),
                    Err(err) => Frame::new(FrameType::ActorResponse)
                        .with_id(correlation)
                        .with_error(err.to_string()),
                };
                let _ = self.transport.send(reply).await;
            }
            None => {
                if let Err(err) =
                    self.inner.tell(&message.topic, message.payload).await
                {
                    warn!(
                        "Failed to deliver message '{}' to actor {}: {}",
                        message.topic,
                        self.inner.id(),
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::{
        behavior::{Behavior, HandlerTable},
        forked, ActorId,
    };

    use serde_json::{json, Value};

    use tokio::io::{duplex, split};

    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    async fn parent_system() -> (ActorSystem, ActorRef) {
        let system = ActorSystem::new(SystemOptions::default());
        let root = system.root_actor().await.unwrap();
        (system, root)
    }

    fn echo_registry() -> BehaviorRegistry {
        let registry = BehaviorRegistry::new();
        registry.register("echo", |_params| {
            let table = HandlerTable::new("echo").handler(
                "echo",
                |payload, _ctx| async move { Ok(Some(payload)) },
            );
            Ok(Box::new(table) as Box<dyn Behavior>)
        });
        registry
    }

    #[tokio::test]
    async fn test_echo_across_the_wire() {
        let (parent_io, worker_io) = duplex(64 * 1024);
        let (worker_read, worker_write) = split(worker_io);
        let server =
            tokio::spawn(serve(worker_read, worker_write, echo_registry()));

        let (system, root) = parent_system().await;
        let (parent_read, parent_write) = split(parent_io);
        let (link, frames) = transport::connect(parent_read, parent_write);
        let actor = forked::attach(
            &system,
            link,
            frames,
            None,
            "echo",
            Value::Null,
            &root,
        )
        .await
        .unwrap();

        assert_eq!(actor.ask("echo", json!("hi")).await, Ok(json!("hi")));
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].id(), actor.id());

        actor.destroy().await.unwrap();
        assert!(server.await.unwrap().is_ok());
        assert!(root.children().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_behavior_fails_the_spawn() {
        let (parent_io, worker_io) = duplex(64 * 1024);
        let (worker_read, worker_write) = split(worker_io);
        let server = tokio::spawn(serve(
            worker_read,
            worker_write,
            BehaviorRegistry::new(),
        ));

        let (system, root) = parent_system().await;
        let (parent_read, parent_write) = split(parent_io);
        let (link, frames) = transport::connect(parent_read, parent_write);
        let result = forked::attach(
            &system,
            link,
            frames,
            None,
            "stranger",
            Value::Null,
            &root,
        )
        .await;

        match result {
            Err(Error::Spawn(message)) => {
                assert!(message.contains("not registered"));
            }
            other => panic!("expected spawn failure, got {:?}", other),
        }
        assert!(server.await.unwrap().is_err());
        assert!(root.children().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_first_frame_is_a_protocol_error() {
        let (parent_io, worker_io) = duplex(64 * 1024);

        // Fake worker answering the handshake with the wrong frame.
        tokio::spawn(async move {
            let (read, write) = split(worker_io);
            let (link, mut frames) = transport::connect(read, write);
            let first = frames.recv().await.unwrap();
            assert_eq!(first.frame_type, FrameType::CreateActor);
            link.send(Frame::new(FrameType::Destroyed)).await.unwrap();
        });

        let (system, root) = parent_system().await;
        let (parent_read, parent_write) = split(parent_io);
        let (link, frames) = transport::connect(parent_read, parent_write);
        let result = forked::attach(
            &system,
            link,
            frames,
            None,
            "echo",
            Value::Null,
            &root,
        )
        .await;

        assert_eq!(
            result.err(),
            Some(Error::Protocol(
                "Unexpected response for create-actor.".to_owned()
            ))
        );
    }

    #[tokio::test]
    async fn test_worker_exit_fails_pending_and_later_asks() {
        let (parent_io, worker_io) = duplex(64 * 1024);

        // Fake worker that acknowledges creation, swallows one ask and
        // then goes away.
        tokio::spawn(async move {
            let (read, write) = split(worker_io);
            let (link, mut frames) = transport::connect(read, write);
            let _create = frames.recv().await.unwrap();
            link.send(
                Frame::new(FrameType::ActorCreated)
                    .with_body(json!({"id": "w1"})),
            )
            .await
            .unwrap();
            let _swallowed = frames.recv().await.unwrap();
            link.close();
        });

        let (system, root) = parent_system().await;
        let (parent_read, parent_write) = split(parent_io);
        let (link, frames) = transport::connect(parent_read, parent_write);
        let actor = forked::attach(
            &system,
            link,
            frames,
            None,
            "echo",
            Value::Null,
            &root,
        )
        .await
        .unwrap();
        assert_eq!(actor.id(), &ActorId::from("w1"));

        assert_eq!(
            actor.ask("hang", Value::Null).await,
            Err(Error::TransportClosed)
        );
        assert_eq!(
            actor.ask("after", Value::Null).await,
            Err(Error::TransportClosed)
        );
    }

    #[tokio::test]
    async fn test_destroy_runs_the_worker_side_hook() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let registry = BehaviorRegistry::new();
        let flag = destroyed.clone();
        registry.register("flagger", move |_params| {
            let flag = flag.clone();
            let table = HandlerTable::new("flagger")
                .handler("noop", |_payload, _ctx| async move { Ok(None) })
                .on_destroy(move |_ctx| {
                    let flag = flag.clone();
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                });
            Ok(Box::new(table) as Box<dyn Behavior>)
        });

        let (parent_io, worker_io) = duplex(64 * 1024);
        let (worker_read, worker_write) = split(worker_io);
        let server =
            tokio::spawn(serve(worker_read, worker_write, registry));

        let (system, root) = parent_system().await;
        let (parent_read, parent_write) = split(parent_io);
        let (link, frames) = transport::connect(parent_read, parent_write);
        let actor = forked::attach(
            &system,
            link,
            frames,
            None,
            "flagger",
            Value::Null,
            &root,
        )
        .await
        .unwrap();

        actor.destroy().await.unwrap();
        assert!(server.await.unwrap().is_ok());
        assert!(destroyed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_tells_keep_their_order_across_the_wire() {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let registry = BehaviorRegistry::new();
        let sink = recorded.clone();
        registry.register("recorder", move |_params| {
            let sink = sink.clone();
            let snapshot = sink.clone();
            let table = HandlerTable::new("recorder")
                .handler("record", move |payload, _ctx| {
                    sink.lock().unwrap().push(payload);
                    async move { Ok(None) }
                })
                .handler("snapshot", move |_payload, _ctx| {
                    let entries = snapshot.lock().unwrap().clone();
                    async move { Ok(Some(Value::Array(entries))) }
                });
            Ok(Box::new(table) as Box<dyn Behavior>)
        });

        let (parent_io, worker_io) = duplex(64 * 1024);
        let (worker_read, worker_write) = split(worker_io);
        tokio::spawn(serve(worker_read, worker_write, registry));

        let (system, root) = parent_system().await;
        let (parent_read, parent_write) = split(parent_io);
        let (link, frames) = transport::connect(parent_read, parent_write);
        let actor = forked::attach(
            &system,
            link,
            frames,
            None,
            "recorder",
            Value::Null,
            &root,
        )
        .await
        .unwrap();

        for n in 0..32 {
            actor.tell("record", json!(n)).await.unwrap();
        }
        let snapshot = actor.ask("snapshot", Value::Null).await.unwrap();
        let expected: Vec<Value> = (0..32).map(|n| json!(n)).collect();
        assert_eq!(snapshot, Value::Array(expected));
    }
}
