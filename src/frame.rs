// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Wire frames
//!
//! The `frame` module defines the framed records exchanged between a parent
//! process and a forked worker. Frames are JSON encoded, one frame per line
//! on the worker's standard streams. Every frame carries a `type`, an
//! optional correlation `id`, an optional `body` and an optional top level
//! `error` used to signal protocol failures.
//!

use crate::{config::ConfigMap, ActorId};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a wire frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameType {
    /// Parent → worker: resolve a behavior and build the worker root.
    CreateActor,
    /// Worker → parent: the root actor is ready, body carries its id.
    ActorCreated,
    /// Message dispatch in either direction. An `id` marks an ask.
    ActorMessage,
    /// Reply to an ask, correlated by `id`.
    ActorResponse,
    /// Parent → worker: tear the worker root down.
    Destroy,
    /// Worker → parent: teardown finished.
    Destroyed,
}

/// A single frame on the parent ↔ worker channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    /// Frame kind.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Correlation id for ask-style traffic.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<u64>,
    /// Frame payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Value>,
    /// Protocol error text.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Frame {
    /// Creates a frame of the given kind with no id, body or error.
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            id: None,
            body: None,
            error: None,
        }
    }

    /// Attaches a correlation id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attaches a body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attaches a top level error.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Body of a `create-actor` frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateActorBody {
    /// Registered behavior name to resolve on the worker side.
    pub behavior: String,
    /// Parameters handed to the behavior factory.
    #[serde(default)]
    pub params: Value,
    /// Snapshot of the parent system's placement configuration.
    #[serde(default)]
    pub config: ConfigMap,
    /// Restrict logging to errors.
    #[serde(default)]
    pub test: bool,
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,
    /// Reference to the actor that spawned the worker.
    pub parent: ParentRef,
}

/// Upward reference carried in `create-actor`, resolved on the worker side
/// as an actor stub.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParentRef {
    /// Id of the parent-side actor.
    pub id: ActorId,
}

/// Body of an `actor-created` frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorCreatedBody {
    /// Id of the worker root. The parent-side proxy adopts it.
    pub id: ActorId,
}

/// Body of an `actor-message` frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageBody {
    /// Message topic.
    pub topic: String,
    /// Message payload.
    #[serde(default)]
    pub payload: Value,
}
