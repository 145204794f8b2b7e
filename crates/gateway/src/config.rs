//! Gateway configuration
//!
//! Layered: optional TOML file, then `GATEWAY__*` environment variables
//! (`GATEWAY__BASTION__HOST`, `GATEWAY__VMS__VM1`, ...).

use anyhow::{bail, Context, Result};
use gateway_lib::{BastionConfig, SubprocessScorer, TimeoutConfig, VmAccessConfig, VmRegistry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "HOP_GATEWAY_CONFIG";

/// Config file used when `HOP_GATEWAY_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "hop-gateway.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    pub bastion: BastionConfig,

    pub vm_access: VmAccessConfig,

    /// Logical VM name → private address
    #[serde(default)]
    pub vms: VmRegistry,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub scorer: ScorerConfig,
}

/// External anomaly scoring process
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScorerConfig {
    #[serde(default = "default_scorer_program")]
    pub program: String,

    #[serde(default = "default_scorer_args")]
    pub args: Vec<String>,

    /// Directory the scorer runs in, so relative model paths resolve
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            program: default_scorer_program(),
            args: default_scorer_args(),
            working_dir: None,
        }
    }
}

impl ScorerConfig {
    pub fn build(&self, timeout: Duration) -> SubprocessScorer {
        let scorer = SubprocessScorer::new(&self.program, self.args.clone()).with_timeout(timeout);
        match &self.working_dir {
            Some(dir) => scorer.with_working_dir(dir),
            None => scorer,
        }
    }
}

fn default_api_port() -> u16 {
    3000
}

fn default_scorer_program() -> String {
    "python3".to_string()
}

fn default_scorer_args() -> Vec<String> {
    vec!["predict.py".to_string()]
}

impl GatewayConfig {
    /// Load from `$HOP_GATEWAY_CONFIG` (or `hop-gateway.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Load from `path` if it exists, overridden by `GATEWAY__*` variables
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("Invalid gateway configuration")
    }

    /// Reject configurations the gateway cannot run with
    ///
    /// Missing key files only warn: keys are read at connect time and may
    /// be mounted after startup.
    pub fn validate(&self) -> Result<()> {
        if self.vms.is_empty() {
            bail!("No VMs configured");
        }
        if self.bastion.host.trim().is_empty() {
            bail!("bastion.host must not be empty");
        }
        if self.timeouts.connect_secs == 0
            || self.timeouts.exec_secs == 0
            || self.timeouts.score_secs == 0
        {
            bail!("timeouts must be at least one second");
        }
        if self.scorer.program.trim().is_empty() {
            bail!("scorer.program must not be empty");
        }
        if let Some((vm, _)) = self.vms.iter().find(|(_, host)| host.trim().is_empty()) {
            bail!("VM {} has no host address", vm);
        }

        for (leg, key) in [
            ("bastion", &self.bastion.identity_file),
            ("vm_access", &self.vm_access.identity_file),
        ] {
            if !key.exists() {
                warn!(leg = leg, identity_file = %key.display(), "Identity file not found");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const FULL: &str = r#"
api_port = 4000

[bastion]
host = "bastion.example.org"
identity_file = "/keys/bastion.pem"

[vm_access]
identity_file = "/keys/vm.pem"

[vms]
vm1 = "192.168.5.50"
vm2 = "192.168.5.27"

[timeouts]
exec_secs = 30

[scorer]
program = "/opt/venv/bin/python"
working_dir = "/opt/scorer"
"#;

    #[test]
    fn test_load_from_file_with_defaults() {
        let file = write_config(FULL);
        let config = GatewayConfig::load_from(file.path()).unwrap();

        assert_eq!(config.api_port, 4000);
        assert_eq!(config.bastion.port, 22);
        assert_eq!(config.bastion.user, "cc");
        assert_eq!(config.vm_access.user, "cc");
        assert_eq!(config.vms.resolve("vm2"), Some("192.168.5.27"));
        assert_eq!(config.timeouts.exec_secs, 30);
        assert_eq!(config.timeouts.connect_secs, 15);
        assert_eq!(config.scorer.args, vec!["predict.py"]);
        assert_eq!(config.scorer.working_dir, Some(PathBuf::from("/opt/scorer")));
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_bastion_is_an_error() {
        let file = write_config("api_port = 3000\n");
        assert!(GatewayConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_registry() {
        let file = write_config(
            r#"
[bastion]
host = "bastion.example.org"
identity_file = "/keys/bastion.pem"

[vm_access]
identity_file = "/keys/vm.pem"
"#,
        );
        let config = GatewayConfig::load_from(file.path()).unwrap();
        assert!(config.vms.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let file = write_config(FULL);
        let mut config = GatewayConfig::load_from(file.path()).unwrap();
        config.timeouts.score_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scorer_defaults() {
        let scorer = ScorerConfig::default();
        assert_eq!(scorer.program, "python3");
        assert_eq!(scorer.build(Duration::from_secs(10)).program(), "python3");
    }
}
