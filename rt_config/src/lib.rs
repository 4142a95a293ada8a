// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! The handful of knobs this kernel exposes: worker thread count, the default
//! `blockParent`/`ignoreChildErrors` policy new tasks pick up when a caller does not override
//! them, and a diagnostic-only supervision depth. Scoped down from the teacher's `options` crate,
//! which resolves an entire CLI/TOML/env precedence chain for an external build tool — this
//! kernel only ever reads an optional TOML file.

use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Runtime-wide defaults. Per-task `TaskOptions` always win when a caller sets them explicitly;
/// these only apply when a caller leaves a field at its Rust default.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_threads: usize,
    pub default_block_parent: bool,
    pub default_ignore_child_errors: bool,
    /// Logged as a warning once a supervision tree exceeds this depth; never enforced as a hard
    /// limit (§2 ambient stack table: "diagnostic only, not enforced as a hard limit").
    pub max_supervision_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            worker_threads: 4,
            default_block_parent: false,
            default_ignore_child_errors: false,
            max_supervision_depth: 64,
        }
    }
}

impl RuntimeConfig {
    /// Parses a config from TOML text, falling back to any field it does not mention.
    pub fn parse(toml_text: &str) -> Result<RuntimeConfig, String> {
        toml::from_str(toml_text).map_err(|e| format!("failed to parse runtime config: {e}"))
    }

    /// Reads and parses a config file, or `RuntimeConfig::default()` if `path` does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RuntimeConfig, String> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(RuntimeConfig::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("failed to read runtime config {}: {e}", path.display()))?;
        RuntimeConfig::parse(&contents)
    }

    /// Warns (once, by the caller logging the result) if `depth` exceeds the configured
    /// diagnostic ceiling. Returns whether the ceiling was exceeded so callers can decide how
    /// loudly to log it.
    pub fn exceeds_supervision_depth(&self, depth: usize) -> bool {
        depth > self.max_supervision_depth
    }
}

#[cfg(test)]
mod tests;
