// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Troupe actor runtime
//!
//! This crate provides an actor runtime whose actors may live either in the
//! current process or in forked worker processes, behind one uniform
//! message-passing surface.
//!
//! Applications define behaviors (a handler table or any `Behavior`
//! implementation), spawn them as a hierarchy beneath the system root, and
//! let the runtime decide placement: per-call options override the
//! `actors.json` configuration entry for the behavior's name, which
//! overrides the in-memory default. A cluster size above one inserts a
//! round-robin balancer over equivalent children.
//!
//! Behaviors crossing a process boundary are never serialized: both sides
//! of a fork register named factories in a [`BehaviorRegistry`], and the
//! wire only carries the name plus parameters.
//!
//! ```ignore
//! let registry = BehaviorRegistry::new();
//! registry.register("echo", |_params| {
//!     Ok(Box::new(HandlerTable::new("echo")
//!         .handler("echo", |payload, _ctx| async move { Ok(Some(payload)) })))
//! });
//!
//! let system = ActorSystem::new(
//!     SystemOptions::default().with_registry(registry),
//! );
//! let root = system.root_actor().await?;
//! let echo = root
//!     .create_child(BehaviorSpec::registered("echo"), CreateOptions::forked())
//!     .await?;
//! let reply = echo.ask("echo", json!("hi")).await?;
//! ```
//!

mod actor;
mod balancer;
mod behavior;
mod config;
mod error;
mod forked;
mod frame;
mod id;
mod mailbox;
mod runner;
mod stub;
mod system;
mod transport;
pub mod worker;

pub use actor::{ActorContext, ActorRef};
pub use behavior::{Behavior, BehaviorRegistry, BehaviorSpec, HandlerTable};
pub use config::{
    ConfigMap, ConfigSource, CreateOptions, MODE_FORKED, MODE_IN_MEMORY,
};
pub use error::Error;
pub use frame::{
    ActorCreatedBody, CreateActorBody, Frame, FrameType, MessageBody,
    ParentRef,
};
pub use id::ActorId;
pub use system::{ActorSystem, ForkedOptions, SystemContext, SystemOptions};
