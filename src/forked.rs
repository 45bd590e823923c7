// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Forked actors, parent side
//!
//! A forked actor lives in a worker process; in the parent it is
//! represented by a proxy cell that writes `actor-message` frames to the
//! worker transport and correlates `actor-response` frames back to pending
//! asks. Spawning performs the `create-actor` handshake: the first frame
//! from the worker either acknowledges creation, carries an error, or fails
//! the spawn as a protocol violation.
//!

use crate::{
    actor::{ActorCell, ActorRef},
    frame::{
        ActorCreatedBody, CreateActorBody, Frame, FrameType, MessageBody,
        ParentRef,
    },
    mailbox::ReplySender,
    system::ActorSystem,
    transport::{self, SpawnedWorker, TransportHandle, WorkerProcess},
    ActorId, Error,
};

use async_trait::async_trait;

use serde_json::Value;

use tokio::sync::{mpsc, oneshot};

use tracing::{debug, warn};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Bound on the wait for `actor-created`.
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on the wait for `destroyed` before the worker is killed anyway.
const DESTROY_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Mutex<HashMap<u64, ReplySender>>;
type DestroyedSlot = Mutex<Option<oneshot::Sender<()>>>;

/// Forks a worker for the named behavior and performs the create-actor
/// handshake.
pub(crate) async fn spawn(
    system: &ActorSystem,
    name: &str,
    params: Value,
    parent: &ActorRef,
) -> Result<ActorRef, Error> {
    let command = system.worker_command()?;
    let SpawnedWorker {
        transport,
        inbound,
        process,
    } = transport::spawn_worker(&command, system.worker_flags())?;
    attach(
        system,
        transport,
        inbound,
        Some(process),
        name,
        params,
        parent,
    )
    .await
}

/// Performs the create-actor handshake over an established transport and
/// wraps the remote actor in a parent-side proxy.
pub(crate) async fn attach(
    system: &ActorSystem,
    transport: TransportHandle,
    mut inbound: mpsc::Receiver<Frame>,
    process: Option<WorkerProcess>,
    name: &str,
    params: Value,
    parent: &ActorRef,
) -> Result<ActorRef, Error> {
    let body = CreateActorBody {
        behavior: name.to_owned(),
        params,
        config: system.config_snapshot(),
        test: system.is_test(),
        debug: system.is_debug(),
        parent: ParentRef {
            id: parent.id().clone(),
        },
    };
    let frame = Frame::new(FrameType::CreateActor).with_body(
        serde_json::to_value(body)
            .map_err(|err| Error::Spawn(err.to_string()))?,
    );
    if transport.send(frame).await.is_err() {
        abort(&transport, &process);
        return Err(Error::Spawn(
            "worker exited before create-actor could be sent".to_owned(),
        ));
    }

    let frame = match tokio::time::timeout(CREATE_TIMEOUT, inbound.recv())
        .await
    {
        Err(_) => {
            abort(&transport, &process);
            return Err(Error::Spawn(
                "worker did not answer create-actor in time".to_owned(),
            ));
        }
        Ok(None) => {
            abort(&transport, &process);
            return Err(Error::Spawn(
                "worker exited before the actor was created".to_owned(),
            ));
        }
        Ok(Some(frame)) => frame,
    };

    if let Some(error) = frame.error {
        abort(&transport, &process);
        return Err(Error::Spawn(error));
    }
    let created: Option<ActorCreatedBody> = (frame.frame_type
        == FrameType::ActorCreated)
        .then(|| frame.body)
        .flatten()
        .and_then(|body| serde_json::from_value(body).ok());
    let Some(created) = created else {
        abort(&transport, &process);
        return Err(Error::Protocol(
            "Unexpected response for create-actor.".to_owned(),
        ));
    };
    debug!("Worker acknowledged actor {} creation.", created.id);

    let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
    let destroyed_slot: Arc<DestroyedSlot> = Arc::new(Mutex::new(None));
    tokio::spawn(route(inbound, pending.clone(), destroyed_slot.clone()));

    let cell = ForkedParentCell {
        id: created.id.clone(),
        transport,
        pending,
        correlation: AtomicU64::new(0),
        process,
        destroyed_slot,
    };
    Ok(ActorRef::new(
        created.id,
        name.to_owned(),
        Some(parent),
        Box::new(cell),
        system.clone(),
    ))
}

fn abort(transport: &TransportHandle, process: &Option<WorkerProcess>) {
    transport.close();
    if let Some(process) = process {
        process.kill();
    }
}

/// Routes inbound frames: replies to pending asks by correlation id, the
/// destroy acknowledgement to its waiter. When the transport closes, every
/// outstanding ask fails with `TransportClosed`.
async fn route(
    mut inbound: mpsc::Receiver<Frame>,
    pending: Arc<PendingMap>,
    destroyed_slot: Arc<DestroyedSlot>,
) {
    while let Some(frame) = inbound.recv().await {
        match frame.frame_type {
            FrameType::ActorResponse => {
                let Some(correlation) = frame.id else {
                    warn!("Dropping reply without correlation id.");
                    continue;
                };
                let entry = lock(&pending).remove(&correlation);
                match entry {
                    Some(reply) => {
                        let result = match frame.error {
                            Some(error) => Err(Error::Handler(error)),
                            None => Ok(frame.body.unwrap_or(Value::Null)),
                        };
                        let _ = reply.send(result);
                    }
                    None => {
                        warn!(
                            "Dropping reply with unknown correlation id {}.",
                            correlation
                        );
                    }
                }
            }
            FrameType::Destroyed => {
                if let Some(ack) =
                    destroyed_slot.lock().unwrap_or_else(|e| e.into_inner()).take()
                {
                    let _ = ack.send(());
                }
            }
            other => {
                warn!("Unexpected frame {:?} from worker.", other);
            }
        }
    }
    debug!("Worker transport closed, failing outstanding asks.");
    let entries: Vec<ReplySender> =
        lock(&pending).drain().map(|(_, reply)| reply).collect();
    for reply in entries {
        let _ = reply.send(Err(Error::TransportClosed));
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<u64, ReplySender>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Parent-side proxy for an actor hosted in a worker process.
struct ForkedParentCell {
    id: ActorId,
    transport: TransportHandle,
    pending: Arc<PendingMap>,
    correlation: AtomicU64,
    process: Option<WorkerProcess>,
    destroyed_slot: Arc<DestroyedSlot>,
}

impl ForkedParentCell {
    fn message_frame(
        topic: &str,
        payload: Value,
    ) -> Result<Frame, Error> {
        let body = serde_json::to_value(MessageBody {
            topic: topic.to_owned(),
            payload,
        })
        .map_err(|err| Error::Send(err.to_string()))?;
        Ok(Frame::new(FrameType::ActorMessage).with_body(body))
    }
}

#[async_trait]
impl ActorCell for ForkedParentCell {
    async fn tell(&self, topic: &str, payload: Value) -> Result<(), Error> {
        self.transport
            .send(Self::message_frame(topic, payload)?)
            .await
    }

    async fn ask(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let correlation = self.correlation.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply_sender, reply_receiver) = oneshot::channel();
        lock(&self.pending).insert(correlation, reply_sender);

        let frame = Self::message_frame(topic, payload)?.with_id(correlation);
        if let Err(err) = self.transport.send(frame).await {
            lock(&self.pending).remove(&correlation);
            return Err(err);
        }

        let reply = match timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, reply_receiver).await {
                    Ok(reply) => reply,
                    Err(_) => {
                        lock(&self.pending).remove(&correlation);
                        return Err(Error::Timeout);
                    }
                }
            }
            None => reply_receiver.await,
        };
        reply.map_err(|_| Error::TransportClosed)?
    }

    async fn destroy(&self) -> Result<(), Error> {
        debug!("Destroying forked actor {}.", self.id);
        let (ack_sender, ack_receiver) = oneshot::channel();
        *self
            .destroyed_slot
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(ack_sender);
        if self.transport.send(Frame::new(FrameType::Destroy)).await.is_ok()
        {
            match tokio::time::timeout(DESTROY_TIMEOUT, ack_receiver).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(
                        "Worker for actor {} did not acknowledge destroy in \
                         time.",
                        self.id
                    );
                }
            }
        }
        self.transport.close();
        if let Some(process) = &self.process {
            process.kill();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}
