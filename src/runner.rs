// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # In-memory actor runner
//!
//! One runner task per in-memory actor drains its mailbox. The behavior's
//! initialize hook runs before the first message is dequeued; messages
//! arriving meanwhile queue up. Handlers run one at a time, so handler
//! execution is serialized per actor and messages from a single sender are
//! processed in send order.
//!

use crate::{
    actor::{ActorCell, ActorContext, ActorRef},
    behavior::Behavior,
    mailbox::{mailbox, Envelope, MailboxHandle, MailboxReceiver, ReplySender},
    system::ActorSystem,
    ActorId, Error,
};

use async_trait::async_trait;

use serde_json::Value;

use tokio::{select, sync::oneshot};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, warn};

use std::time::Duration;

/// Creates an in-memory actor beneath `parent` and waits until its
/// initialize hook has completed.
pub(crate) async fn spawn(
    system: &ActorSystem,
    behavior: Box<dyn Behavior>,
    name: String,
    parent: Option<&ActorRef>,
) -> Result<ActorRef, Error> {
    let id = system.generate_actor_id();
    let (sender, receiver) = mailbox();
    let token = CancellationToken::new();
    let cell = InMemoryCell {
        id: id.clone(),
        handle: MailboxHandle::new(sender),
        token: token.clone(),
    };
    let actor =
        ActorRef::new(id, name.clone(), parent, Box::new(cell), system.clone());
    let ctx = ActorContext::new(actor.clone(), system.clone());
    let runner = ActorRunner::new(behavior, receiver, token, ctx);

    let (ready_sender, ready_receiver) = oneshot::channel();
    tokio::spawn(async move {
        runner.init(ready_sender).await;
    });

    match ready_receiver.await {
        Ok(Ok(())) => Ok(actor),
        Ok(Err(err)) => {
            if let Some(parent) = parent {
                parent.remove_child(actor.id());
            }
            Err(Error::Create(format!(
                "actor '{}' failed to initialize: {}",
                name, err
            )))
        }
        Err(_) => Err(Error::Start(format!(
            "runner for actor '{}' went away before it was ready",
            name
        ))),
    }
}

/// Cell of a purely local actor: a mailbox handle plus the runner's
/// cancellation token.
struct InMemoryCell {
    id: ActorId,
    handle: MailboxHandle,
    token: CancellationToken,
}

#[async_trait]
impl ActorCell for InMemoryCell {
    async fn tell(&self, topic: &str, payload: Value) -> Result<(), Error> {
        self.handle.tell(topic, payload)
    }

    async fn ask(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        self.handle.ask(topic, payload, timeout).await
    }

    async fn destroy(&self) -> Result<(), Error> {
        let result = self.handle.stop().await;
        self.token.cancel();
        if let Err(err) = &result {
            warn!("Destroy hook of actor {} failed: {}", self.id, err);
        }
        result
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed() || self.token.is_cancelled()
    }
}

/// Event loop of an in-memory actor.
pub(crate) struct ActorRunner {
    behavior: Box<dyn Behavior>,
    receiver: MailboxReceiver,
    token: CancellationToken,
    ctx: ActorContext,
}

impl ActorRunner {
    pub(crate) fn new(
        behavior: Box<dyn Behavior>,
        receiver: MailboxReceiver,
        token: CancellationToken,
        ctx: ActorContext,
    ) -> Self {
        debug!("Creating new actor runner.");
        Self {
            behavior,
            receiver,
            token,
            ctx,
        }
    }

    /// Runs the initialize hook, reports readiness, then drains the mailbox
    /// until the actor stops.
    pub(crate) async fn init(
        mut self,
        ready: oneshot::Sender<Result<(), Error>>,
    ) {
        debug!("Initializing actor {} runner.", self.ctx.id());
        match self.behavior.initialize(&self.ctx).await {
            Ok(()) => {
                if ready.send(Ok(())).is_err() {
                    debug!(
                        "Creation of actor {} was abandoned.",
                        self.ctx.id()
                    );
                    return;
                }
            }
            Err(err) => {
                error!(
                    "Actor {} failed to initialize: {:?}",
                    self.ctx.id(),
                    err
                );
                let _ = ready.send(Err(err));
                return;
            }
        }
        self.run().await;
        debug!("Actor {} runner terminated.", self.ctx.id());
    }

    /// Main loop of the actor. Runs until the mailbox closes, a stop
    /// envelope arrives or the token is cancelled.
    async fn run(&mut self) {
        loop {
            select! {
                envelope = self.receiver.recv() => {
                    match envelope {
                        Some(Envelope::Message { topic, payload, rsvp }) => {
                            self.dispatch(topic, payload, rsvp).await;
                        }
                        Some(Envelope::Stop { ack }) => {
                            debug!("Actor {} is stopping.", self.ctx.id());
                            let result =
                                self.behavior.destroy(&self.ctx).await;
                            if ack.send(result).is_err() {
                                error!("Failed to acknowledge actor stop!");
                            }
                            break;
                        }
                        None => {
                            debug!("Actor {} mailbox closed.", self.ctx.id());
                            break;
                        }
                    }
                }
                _ = self.token.cancelled() => {
                    debug!("Actor {} is cancelled.", self.ctx.id());
                    break;
                }
            }
        }
        self.receiver.close();
        // Fail asks that were still queued behind the stop.
        while let Ok(envelope) = self.receiver.try_recv() {
            if let Envelope::Message {
                rsvp: Some(rsvp), ..
            } = envelope
            {
                let _ =
                    rsvp.send(Err(Error::Destroyed(self.ctx.id().clone())));
            }
        }
    }

    /// Dispatches one message to the behavior. Handler errors reach the
    /// asker; for a tell they are logged and dropped.
    async fn dispatch(
        &mut self,
        topic: String,
        payload: Value,
        rsvp: Option<ReplySender>,
    ) {
        let result = self.behavior.handle(&topic, payload, &self.ctx).await;
        match rsvp {
            Some(rsvp) => {
                let reply =
                    result.map(|value| value.unwrap_or(Value::Null));
                if rsvp.send(reply).is_err() {
                    debug!("Reply of actor {} was dropped.", self.ctx.id());
                }
            }
            None => {
                if let Err(err) = result {
                    warn!(
                        "Handler for topic '{}' on actor {} failed: {}",
                        topic,
                        self.ctx.id(),
                        err
                    );
                }
            }
        }
    }
}
