//! Docker operations on a remote VM
//!
//! Every operation validates its arguments, then opens a tunnel, runs one
//! command, decodes the output and closes the tunnel.

pub mod command;

use crate::decode::{decode_document, decode_lines};
use crate::error::{CommandError, GatewayError};
use crate::exec::CommandRunner;
use crate::models::{CommandResult, ImageRecord, VolumeRecord};
use crate::observability::GatewayMetrics;
use crate::tunnel::SshTransport;
use command::RemoteCommand;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Container and image management over the tunnel
pub struct DockerOps<T: SshTransport> {
    runner: CommandRunner<T>,
    metrics: GatewayMetrics,
}

impl<T: SshTransport> Clone for DockerOps<T> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: SshTransport> DockerOps<T> {
    pub fn new(runner: CommandRunner<T>) -> Self {
        Self {
            runner,
            metrics: GatewayMetrics::new(),
        }
    }

    pub fn runner(&self) -> &CommandRunner<T> {
        &self.runner
    }

    async fn run(&self, vm: &str, command: RemoteCommand) -> Result<CommandResult, GatewayError> {
        let line = command.render();
        debug!(vm = %vm, command = %line, "Running docker command");
        self.runner.run(vm, &line).await
    }

    async fn run_lines<R: DeserializeOwned>(
        &self,
        vm: &str,
        command: RemoteCommand,
    ) -> Result<Vec<R>, GatewayError> {
        let output = self.run(vm, command).await?;
        let decoded = decode_lines(&output.stdout);
        self.metrics.add_decode_dropped_lines(decoded.malformed as u64);
        Ok(decoded.records)
    }

    async fn run_document<R: DeserializeOwned>(
        &self,
        vm: &str,
        command: RemoteCommand,
    ) -> Result<R, GatewayError> {
        let output = self.run(vm, command).await?;
        rejected(&output)?;
        Ok(decode_document(&output.stdout)?)
    }

    /// Run a mutating command, returning its trimmed stdout
    async fn run_mutation(&self, vm: &str, command: RemoteCommand) -> Result<String, GatewayError> {
        let output = self.run(vm, command).await?;
        rejected(&output)?;
        Ok(output.stdout_lossy().trim().to_string())
    }

    pub async fn list_images(&self, vm: &str) -> Result<Vec<ImageRecord>, GatewayError> {
        self.run_lines(vm, command::list_images()).await
    }

    pub async fn remove_image(&self, vm: &str, image: &str) -> Result<String, GatewayError> {
        let command = command::remove_image(image)?;
        self.run_mutation(vm, command).await
    }

    pub async fn list_volumes(&self, vm: &str) -> Result<Vec<VolumeRecord>, GatewayError> {
        self.run_lines(vm, command::list_volumes()).await
    }

    pub async fn remove_volume(&self, vm: &str, volume: &str) -> Result<String, GatewayError> {
        let command = command::remove_volume(volume)?;
        self.run_mutation(vm, command).await
    }

    /// `KEY=value` entries of the container's configured environment
    pub async fn env_vars(&self, vm: &str, container: &str) -> Result<Vec<String>, GatewayError> {
        let command = command::container_env(container)?;
        // Docker prints `null` for a container without environment.
        let vars: Option<Vec<String>> = self.run_document(vm, command).await?;
        Ok(vars.unwrap_or_default())
    }

    /// Export `key=value` in a one-off shell in the container
    ///
    /// The variable only lives as long as that shell; the container's
    /// configuration is unchanged.
    pub async fn set_env_var(
        &self,
        vm: &str,
        container: &str,
        key: &str,
        value: &str,
    ) -> Result<(), GatewayError> {
        let command = command::set_env(container, key, value)?;
        self.run_mutation(vm, command).await?;
        Ok(())
    }

    /// Last lines of the container log, stdout followed by stderr
    pub async fn logs(&self, vm: &str, container: &str) -> Result<String, GatewayError> {
        let command = command::logs(container)?;
        let output = self.run(vm, command).await?;
        let mut logs = output.stdout_lossy();
        logs.push_str(&output.stderr_lossy());
        Ok(logs)
    }

    pub async fn stop(&self, vm: &str, container: &str) -> Result<String, GatewayError> {
        let command = command::stop(container)?;
        self.run_mutation(vm, command).await
    }

    pub async fn restart(&self, vm: &str, container: &str) -> Result<String, GatewayError> {
        let command = command::restart(container)?;
        self.run_mutation(vm, command).await
    }

    /// Run `command` inside the container, returning stdout followed by stderr
    ///
    /// A command writing only to stderr still succeeds: the output belongs
    /// to the caller's command, not to Docker.
    pub async fn exec(&self, vm: &str, container: &str, command: &str) -> Result<String, GatewayError> {
        let command = command::exec(container, command)?;
        let output = self.run(vm, command).await?;
        let mut combined = output.stdout_lossy();
        combined.push_str(&output.stderr_lossy());
        Ok(combined)
    }

    pub async fn bridge_network(&self, vm: &str) -> Result<Value, GatewayError> {
        self.run_document(vm, command::bridge_network()).await
    }

    /// Low-level details of one container
    pub async fn inspect_container(&self, vm: &str, container: &str) -> Result<Value, GatewayError> {
        let command = command::inspect(container)?;
        let mut details: Vec<Value> = self.run_document(vm, command).await?;
        if details.is_empty() {
            return Err(CommandError::Rejected {
                stderr: format!("No such container: {}", container),
            }
            .into());
        }
        Ok(details.swap_remove(0))
    }

    /// Start `image` detached as `name`, returning the new container ID
    pub async fn deploy(&self, vm: &str, image: &str, name: &str) -> Result<String, GatewayError> {
        let command = command::run_detached(image, name)?;
        self.run_mutation(vm, command).await
    }
}

/// Docker reports refusals on stderr with nothing on stdout
fn rejected(output: &CommandResult) -> Result<(), CommandError> {
    let stderr = output.stderr_lossy();
    if output.stdout_lossy().trim().is_empty() && !stderr.trim().is_empty() {
        return Err(CommandError::Rejected {
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(())
}
