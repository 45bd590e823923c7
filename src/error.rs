// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Error types
//!
//! The `error` module defines all error conditions that can occur during actor
//! lifecycle management, placement, message passing and worker transport.
//!

use crate::ActorId;

use thiserror::Error;

/// Errors surfaced by the actor runtime.
///
/// Configuration errors are always recovered locally with a warning and never
/// reach callers. Spawn and protocol errors propagate to the originating
/// `create_actor`/`ask` call. Handler errors propagate only to `ask` callers;
/// for `tell` they are logged at warn level and dropped.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Placement mode not recognized. Surfaced synchronously from `create_actor`.
    #[error("Unknown placement mode: {0}.")]
    UnknownMode(String),

    /// Fork or early worker failure before the worker acknowledged creation.
    #[error("An error occurred while spawning a worker: {0}.")]
    Spawn(String),

    /// Unexpected frame shape or out-of-order reply on a worker transport.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Worker exited or the channel to it closed. All pending replies on the
    /// affected transport fail with this.
    #[error("Transport closed.")]
    TransportClosed,

    /// An `ask` exceeded its deadline.
    #[error("Request timed out.")]
    Timeout,

    /// Operation on an actor stub that has not been resolved yet.
    #[error("Actor stub {0} is not resolved.")]
    StubUnresolved(ActorId),

    /// A behavior handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Malformed configuration input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An error occurred while delivering a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),

    /// An error occurred while creating an actor.
    #[error("An error occurred while creating an actor: {0}.")]
    Create(String),

    /// An error occurred while starting the actor system.
    #[error("An error occurred while starting the actor system: {0}")]
    Start(String),

    /// The actor is being destroyed and no longer accepts requests.
    #[error("Actor {0} is being destroyed.")]
    Destroyed(ActorId),
}
