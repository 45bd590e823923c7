// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor stubs
//!
//! A stub references an actor by id before its full binding is known
//! locally. Workers use one for their parent-side actor: the id arrives in
//! the `create-actor` frame, the binding may be supplied later. Operations
//! on an unresolved stub fail with `Error::StubUnresolved`.
//!

use crate::{
    actor::{ActorCell, ActorRef},
    system::ActorSystem,
    ActorId, Error,
};

use async_trait::async_trait;

use serde_json::Value;

use std::{sync::OnceLock, time::Duration};

impl ActorRef {
    /// Creates a stub reference for an actor known only by id.
    pub(crate) fn stub(system: &ActorSystem, id: ActorId) -> ActorRef {
        let cell = StubCell {
            id: id.clone(),
            target: OnceLock::new(),
        };
        ActorRef::new(
            id.clone(),
            format!("stub-{}", id),
            None,
            Box::new(cell),
            system.clone(),
        )
    }
}

/// Cell of an unresolved forward reference.
pub(crate) struct StubCell {
    id: ActorId,
    target: OnceLock<ActorRef>,
}

impl StubCell {
    fn resolved(&self) -> Result<&ActorRef, Error> {
        self.target
            .get()
            .ok_or_else(|| Error::StubUnresolved(self.id.clone()))
    }

    /// Binds the stub to its target. Later bindings are ignored.
    #[allow(dead_code)]
    pub(crate) fn resolve(&self, target: ActorRef) {
        let _ = self.target.set(target);
    }
}

#[async_trait]
impl ActorCell for StubCell {
    async fn tell(&self, topic: &str, payload: Value) -> Result<(), Error> {
        self.resolved()?.tell(topic, payload).await
    }

    async fn ask(
        &self,
        topic: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let target = self.resolved()?;
        match timeout {
            Some(timeout) => {
                target.ask_with_timeout(topic, payload, timeout).await
            }
            None => target.ask(topic, payload).await,
        }
    }

    async fn destroy(&self) -> Result<(), Error> {
        Ok(())
    }
}
