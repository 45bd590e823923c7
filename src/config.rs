// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Placement configuration
//!
//! The `config` module provides the placement options accepted by
//! `create_actor`, the configuration file loader and the merge rules between
//! the two. Placement is resolved per actor name with the precedence
//! caller options over configuration entry over the in-memory default.
//!
//! Configuration loading never fails the system: every unreadable or
//! malformed source logs a warning and degrades to the next fallback.
//!

use serde_json::{Map, Value};

use tracing::{debug, warn};

use std::{collections::HashMap, path::PathBuf};

/// In-process placement mode.
pub const MODE_IN_MEMORY: &str = "in-memory";

/// Forked worker placement mode.
pub const MODE_FORKED: &str = "forked";

/// File name probed at the application root when no source is given.
const DEFAULT_CONFIG_FILE: &str = "actors.json";

/// Per-actor configuration entries, keyed by decapitalized actor name.
/// Entries are kept as raw JSON objects so that free-form keys pass through
/// to behavior factories untouched.
pub type ConfigMap = HashMap<String, Value>;

/// Where the system reads its placement configuration from.
#[derive(Clone, Debug, Default)]
pub enum ConfigSource {
    /// Use the given entries directly.
    Inline(ConfigMap),
    /// Read the file at the given path and parse it as JSON.
    Path(PathBuf),
    /// Probe `actors.json` at the application root.
    #[default]
    Default,
}

/// Placement options for a single `create_actor` call.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Placement mode override. `None` defers to configuration.
    pub mode: Option<String>,
    /// Cluster size override. Values above one spawn a round-robin balancer.
    pub cluster_size: Option<usize>,
    /// Free-form parameters handed to the behavior factory.
    pub params: Map<String, Value>,
}

impl CreateOptions {
    /// Options requesting in-process placement.
    pub fn in_memory() -> Self {
        Self {
            mode: Some(MODE_IN_MEMORY.to_owned()),
            ..Default::default()
        }
    }

    /// Options requesting forked worker placement.
    pub fn forked() -> Self {
        Self {
            mode: Some(MODE_FORKED.to_owned()),
            ..Default::default()
        }
    }

    /// Sets the cluster size.
    pub fn with_cluster_size(mut self, size: usize) -> Self {
        self.cluster_size = Some(size);
        self
    }

    /// Adds a free-form parameter.
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_owned(), value);
        self
    }
}

/// Fully resolved placement for one actor.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Placement {
    pub mode: String,
    pub cluster_size: usize,
    pub params: Map<String, Value>,
}

/// Merges the default placement, the configuration entry for the actor and
/// the caller options, in increasing precedence.
pub(crate) fn resolve_placement(
    entry: Option<&Value>,
    opts: &CreateOptions,
) -> Placement {
    let mut mode = MODE_IN_MEMORY.to_owned();
    let mut cluster_size = 1;
    let mut params = Map::new();

    if let Some(Value::Object(entry)) = entry {
        for (key, value) in entry {
            match key.as_str() {
                "mode" => {
                    if let Value::String(value) = value {
                        mode = value.clone();
                    }
                }
                "clusterSize" => {
                    if let Some(value) = value.as_u64() {
                        cluster_size = value as usize;
                    }
                }
                _ => {
                    params.insert(key.clone(), value.clone());
                }
            }
        }
    }

    if let Some(value) = &opts.mode {
        mode = value.clone();
    }
    if let Some(value) = opts.cluster_size {
        cluster_size = value;
    }
    for (key, value) in &opts.params {
        params.insert(key.clone(), value.clone());
    }

    Placement {
        mode,
        cluster_size: cluster_size.max(1),
        params,
    }
}

/// Loads the configuration from the given source.
///
/// Fallback order: inline entries, explicit path, the default path, empty.
/// Any failure to read or parse logs a warning and degrades to the next
/// fallback; loading never fails.
pub(crate) async fn load(source: &ConfigSource) -> ConfigMap {
    match source {
        ConfigSource::Inline(entries) => entries.clone(),
        ConfigSource::Path(path) => match read_entries(path).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    "Failed to load configuration from {}: {} Falling back \
                     to the default path.",
                    path.display(),
                    error
                );
                load_default().await
            }
        },
        ConfigSource::Default => load_default().await,
    }
}

/// Probes the default configuration path. A missing or unreadable file
/// yields an empty configuration.
async fn load_default() -> ConfigMap {
    let path = default_path();
    match read_entries(&path).await {
        Ok(entries) => entries,
        Err(error) => {
            warn!(
                "No usable configuration at {}: {} Starting with an empty \
                 configuration.",
                path.display(),
                error
            );
            ConfigMap::new()
        }
    }
}

fn default_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_CONFIG_FILE)
}

async fn read_entries(path: &PathBuf) -> Result<ConfigMap, String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|error| error.to_string())?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|error| error.to_string())?;
    match value {
        Value::Object(entries) => {
            debug!(
                "Loaded {} configuration entries from {}.",
                entries.len(),
                path.display()
            );
            Ok(entries.into_iter().collect())
        }
        _ => Err("configuration root is not an object".to_owned()),
    }
}
