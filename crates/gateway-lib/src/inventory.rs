//! Static inventory: the VM registry and SSH identities
//!
//! Everything here is loaded once at startup and handed to components at
//! construction. Nothing is mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default SSH port for bastion and VMs
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default login user on the bastion and the VMs
pub const DEFAULT_SSH_USER: &str = "cc";

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

/// Ordered, read-only mapping from logical VM name to host address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmRegistry {
    hosts: BTreeMap<String, String>,
}

impl VmRegistry {
    pub fn new(hosts: BTreeMap<String, String>) -> Self {
        Self { hosts }
    }

    /// Resolve a logical VM name to its host address
    pub fn resolve(&self, vm: &str) -> Option<&str> {
        self.hosts.get(vm).map(String::as_str)
    }

    /// VM names in registry order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hosts.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VmRegistry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            hosts: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// How to reach and authenticate to the bastion host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BastionConfig {
    /// Public address of the bastion
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Private key used for the bastion leg, read at connect time
    pub identity_file: PathBuf,
}

impl BastionConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How to authenticate to the VMs behind the bastion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmAccessConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// SSH port the forward targets on every VM
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key used for the VM leg, read at connect time
    pub identity_file: PathBuf,
}

/// Deadlines for each suspension point of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_exec_secs")]
    pub exec_secs: u64,
    #[serde(default = "default_score_secs")]
    pub score_secs: u64,
}

fn default_connect_secs() -> u64 {
    15
}

fn default_exec_secs() -> u64 {
    60
}

fn default_score_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            exec_secs: default_exec_secs(),
            score_secs: default_score_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn exec(&self) -> Duration {
        Duration::from_secs(self.exec_secs)
    }

    pub fn score(&self) -> Duration {
        Duration::from_secs(self.score_secs)
    }
}
