// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailboxes
//!
//! Envelope and channel types backing in-memory actors. A mailbox is an
//! ordered, unbounded queue drained by a single runner task, which keeps
//! handler execution serialized per actor and preserves send order per
//! sender.
//!

use crate::Error;

use serde_json::Value;

use tokio::sync::{mpsc, oneshot};

use tracing::debug;

use std::time::Duration;

/// Reply channel of an ask.
pub(crate) type ReplySender = oneshot::Sender<Result<Value, Error>>;

/// One queued unit of work for an in-memory actor.
pub(crate) enum Envelope {
    /// A message to dispatch. `rsvp` is present for ask-style traffic.
    Message {
        topic: String,
        payload: Value,
        rsvp: Option<ReplySender>,
    },
    /// Run the behavior's destroy hook and stop draining. `ack` resolves
    /// when the hook has finished.
    Stop {
        ack: oneshot::Sender<Result<(), Error>>,
    },
}

/// Mailbox receiver.
pub(crate) type MailboxReceiver = mpsc::UnboundedReceiver<Envelope>;

/// Mailbox sender.
pub(crate) type MailboxSender = mpsc::UnboundedSender<Envelope>;

/// Mailbox factory.
pub(crate) fn mailbox() -> (MailboxSender, MailboxReceiver) {
    mpsc::unbounded_channel()
}

/// Handle used to enqueue work into a mailbox.
pub(crate) struct MailboxHandle {
    sender: MailboxSender,
}

impl MailboxHandle {
    pub(crate) fn new(sender: MailboxSender) -> Self {
        Self { sender }
    }

    /// Enqueues a fire-and-forget message.
    pub(crate) fn tell(
        &self,
        topic: &str,
        payload: Value,
    ) -> Result<(), Error> {
        let envelope = Envelope::Message {
            topic: topic.to_owned(),
            payload,
            rsvp: None,
        };
        self.sender
            .send(envelope)
            .map_err(|error| Error::Send(error.to_string()))
    }

    /// Enqueues an ask and returns the reply channel. Enqueueing is
    /// synchronous, so two asks from one task keep their order.
    pub(crate) fn ask_enqueue(
        &self,
        topic: &str,
        payload: Value,
    ) -> Result<oneshot::Receiver<Result<Value, Error>>, Error> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        let envelope = Envelope::Message {
            topic: topic.to_owned(),
            payload,
            rsvp: Some(reply_sender),
        };
        self.sender
            .send(envelope)
            .map_err(|error| Error::Send(error.to_string()))?;
        Ok(reply_receiver)
    }

    /// Enqueues an ask and awaits the reply, optionally bounded by a
    /// deadline.
    pub(crate) async fn ask(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let receiver = self.ask_enqueue(topic, payload)?;
        let reply = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, receiver)
                .await
                .map_err(|_| Error::Timeout)?,
            None => receiver.await,
        };
        reply.map_err(|error| Error::Send(error.to_string()))?
    }

    /// Enqueues the stop envelope and awaits the destroy hook.
    pub(crate) async fn stop(&self) -> Result<(), Error> {
        debug!("Stopping actor from mailbox handle.");
        let (ack_sender, ack_receiver) = oneshot::channel();
        if self.sender.send(Envelope::Stop { ack: ack_sender }).is_err() {
            // Runner already gone, nothing left to stop.
            return Ok(());
        }
        ack_receiver.await.unwrap_or(Ok(()))
    }

    /// True if the runner has stopped draining.
    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Clone for MailboxHandle {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
