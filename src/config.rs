//! Process configuration: CLI flags (§6 "Process surface") layered with an
//! optional `--config` YAML file, following the teacher's use of
//! `serde_yaml` for declarative config.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_workers() -> usize {
    4
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_metrics_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

/// Fields overridable by an optional YAML file; CLI flags always win when
/// both are present (`Config::merge_cli`).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub enable_leader_election: Option<bool>,
    pub workers: Option<usize>,
    pub namespace: Option<String>,
    pub metrics_addr: Option<String>,
    pub shutdown_timeout_seconds: Option<u64>,
}

pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct Config {
    pub enable_leader_election: bool,
    pub workers: usize,
    pub namespace: String,
    pub metrics_addr: String,
    pub shutdown_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_leader_election: true,
            workers: default_workers(),
            namespace: default_namespace(),
            metrics_addr: default_metrics_addr(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

impl Config {
    /// Applies a parsed file config on top of defaults, then lets CLI-level
    /// `Some(_)` overrides win over either.
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(value) = file.enable_leader_election {
            self.enable_leader_election = value;
        }
        if let Some(value) = file.workers {
            self.workers = value;
        }
        if let Some(value) = file.namespace {
            self.namespace = value;
        }
        if let Some(value) = file.metrics_addr {
            self.metrics_addr = value;
        }
        if let Some(value) = file.shutdown_timeout_seconds {
            self.shutdown_timeout_seconds = value;
        }
        self
    }
}
