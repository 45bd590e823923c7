// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Round-robin balancer
//!
//! A balancer actor fronts a set of equivalent children and forwards each
//! message to the next one in rotation. Children whose transports have
//! closed are dropped from the rotation; destruction cascades to every
//! child.
//!

use crate::{
    actor::{ActorCell, ActorRef},
    system::ActorSystem,
    Error,
};

use async_trait::async_trait;

use serde_json::Value;

use tracing::debug;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

/// Creates an empty balancer beneath `parent`. Children attached to it
/// afterwards join the rotation.
pub(crate) fn spawn(
    system: &ActorSystem,
    name: &str,
    parent: &ActorRef,
) -> ActorRef {
    let cell = RoundRobinBalancerCell {
        rotation: Mutex::new(Vec::new()),
        cursor: AtomicUsize::new(0),
    };
    ActorRef::new(
        system.generate_actor_id(),
        name.to_owned(),
        Some(parent),
        Box::new(cell),
        system.clone(),
    )
}

/// Cell multiplexing traffic round-robin across child actors.
struct RoundRobinBalancerCell {
    rotation: Mutex<Vec<ActorRef>>,
    cursor: AtomicUsize,
}

impl RoundRobinBalancerCell {
    /// Picks the next healthy child, dropping dead ones from the rotation.
    fn next_child(&self) -> Result<ActorRef, Error> {
        let mut rotation =
            self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        rotation.retain(|child| {
            !child.is_destroying() && !child.is_closed()
        });
        if rotation.is_empty() {
            return Err(Error::TransportClosed);
        }
        let index =
            self.cursor.fetch_add(1, Ordering::Relaxed) % rotation.len();
        Ok(rotation[index].clone())
    }
}

#[async_trait]
impl ActorCell for RoundRobinBalancerCell {
    async fn tell(&self, topic: &str, payload: Value) -> Result<(), Error> {
        self.next_child()?.tell(topic, payload).await
    }

    async fn ask(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let child = self.next_child()?;
        match timeout {
            Some(timeout) => {
                child.ask_with_timeout(topic, payload, timeout).await
            }
            None => child.ask(topic, payload).await,
        }
    }

    async fn destroy(&self) -> Result<(), Error> {
        // Children are torn down by the reference cascade; only the
        // rotation needs clearing.
        let mut rotation =
            self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        rotation.clear();
        Ok(())
    }

    fn child_added(&self, child: &ActorRef) {
        debug!("Balancer adds {} to the rotation.", child.id());
        let mut rotation =
            self.rotation.lock().unwrap_or_else(|e| e.into_inner());
        rotation.push(child.clone());
    }
}
