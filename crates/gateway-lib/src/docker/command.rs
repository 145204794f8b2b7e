//! Docker command lines built from argument vectors
//!
//! Caller-supplied names are validated, then every argument is rendered with
//! POSIX single-quote quoting when it contains anything outside a safe set.
//! The `exec` command tail is the one argument passed through raw: shell
//! features there are part of the contract.

use crate::error::CommandError;
use std::fmt;

/// Longest name accepted for containers, images and volumes
pub const MAX_NAME_LEN: usize = 255;

/// Lines of container log returned
pub const LOG_TAIL_LINES: u32 = 200;

const JSON_FORMAT: &str = "{{json .}}";

/// A remote command line, rendered once with [`RemoteCommand::render`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    args: Vec<String>,
    raw_tail: Option<String>,
}

impl RemoteCommand {
    /// `docker ...`
    pub fn docker() -> Self {
        Self {
            args: vec!["docker".to_string()],
            raw_tail: None,
        }
    }

    /// `sudo docker ...`
    pub fn sudo_docker() -> Self {
        Self {
            args: vec!["sudo".to_string(), "docker".to_string()],
            raw_tail: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `tail` unquoted after every other argument
    pub fn raw(mut self, tail: impl Into<String>) -> Self {
        self.raw_tail = Some(tail.into());
        self
    }

    pub fn render(&self) -> String {
        let mut line = self
            .args
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(tail) = &self.raw_tail {
            line.push(' ');
            line.push_str(tail);
        }
        line
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
}

/// Quote `arg` for a POSIX shell
///
/// Safe words are left as they are; anything else is wrapped in single
/// quotes with embedded quotes written as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_shell_safe) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn check_name(
    field: &'static str,
    value: &str,
    allowed: impl Fn(char) -> bool,
) -> Result<(), CommandError> {
    let invalid = |reason: &str| CommandError::InvalidArgument {
        field,
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(CommandError::MissingArgument(field));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(invalid("too long"));
    }
    if !value.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid("must start with a letter or digit"));
    }
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(invalid(&format!("character {:?} is not allowed", bad)));
    }
    Ok(())
}

/// Container and volume names: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`
pub fn validate_container_name(name: &str) -> Result<(), CommandError> {
    check_name("container name", name, |c| {
        c.is_ascii_alphanumeric() || "_.-".contains(c)
    })
}

pub fn validate_volume_name(name: &str) -> Result<(), CommandError> {
    check_name("volume name", name, |c| {
        c.is_ascii_alphanumeric() || "_.-".contains(c)
    })
}

/// Image references and IDs: registry, path, tag and digest characters
pub fn validate_image_ref(image: &str) -> Result<(), CommandError> {
    check_name("image", image, |c| {
        c.is_ascii_alphanumeric() || "_.-/:@".contains(c)
    })
}

/// Environment keys must be shell identifiers
pub fn validate_env_key(key: &str) -> Result<(), CommandError> {
    if key.is_empty() {
        return Err(CommandError::MissingArgument("key"));
    }
    let mut chars = key.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CommandError::InvalidArgument {
            field: "key",
            reason: "must be a shell identifier".to_string(),
        });
    }
    Ok(())
}

pub fn stats() -> RemoteCommand {
    RemoteCommand::sudo_docker().args(["stats", "--no-stream", "--format", JSON_FORMAT])
}

pub fn list_images() -> RemoteCommand {
    RemoteCommand::docker().args(["images", "--format", JSON_FORMAT])
}

pub fn remove_image(image: &str) -> Result<RemoteCommand, CommandError> {
    validate_image_ref(image)?;
    Ok(RemoteCommand::docker().args(["rmi", image]))
}

pub fn list_volumes() -> RemoteCommand {
    RemoteCommand::docker().args(["volume", "ls", "--format", JSON_FORMAT])
}

pub fn remove_volume(volume: &str) -> Result<RemoteCommand, CommandError> {
    validate_volume_name(volume)?;
    Ok(RemoteCommand::docker().args(["volume", "rm", volume]))
}

pub fn container_env(container: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    Ok(RemoteCommand::docker().args(["inspect", "--format", "{{json .Config.Env}}", container]))
}

/// Export `key=value` in a one-off shell inside the container
pub fn set_env(container: &str, key: &str, value: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    validate_env_key(key)?;
    if value.is_empty() {
        return Err(CommandError::MissingArgument("value"));
    }
    let script = format!("export {}={}", key, shell_quote(value));
    Ok(RemoteCommand::docker().args(["exec", container, "bash", "-c", script.as_str()]))
}

pub fn logs(container: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    Ok(RemoteCommand::sudo_docker()
        .args(["logs", "--tail"])
        .arg(LOG_TAIL_LINES.to_string())
        .arg(container))
}

pub fn stop(container: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    Ok(RemoteCommand::sudo_docker().args(["stop", container]))
}

pub fn restart(container: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    Ok(RemoteCommand::sudo_docker().args(["restart", container]))
}

/// `sudo docker exec <container> <command>` with `command` left raw
pub fn exec(container: &str, command: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    let command = command.trim();
    if command.is_empty() {
        return Err(CommandError::MissingArgument("command"));
    }
    Ok(RemoteCommand::sudo_docker()
        .args(["exec", container])
        .raw(command))
}

pub fn bridge_network() -> RemoteCommand {
    RemoteCommand::docker().args(["network", "inspect", "bridge"])
}

pub fn inspect(container: &str) -> Result<RemoteCommand, CommandError> {
    validate_container_name(container)?;
    Ok(RemoteCommand::docker().args(["inspect", container]))
}

/// `docker run -d --name <name> <image>`
pub fn run_detached(image: &str, name: &str) -> Result<RemoteCommand, CommandError> {
    validate_image_ref(image)?;
    validate_container_name(name)?;
    Ok(RemoteCommand::docker().args(["run", "-d", "--name", name, image]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("nginx:1.25"), "nginx:1.25");
        assert_eq!(shell_quote("{{json .}}"), "'{{json .}}'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }

    #[test]
    fn test_rendered_commands() {
        assert_eq!(
            stats().render(),
            "sudo docker stats --no-stream --format '{{json .}}'"
        );
        assert_eq!(list_images().render(), "docker images --format '{{json .}}'");
        assert_eq!(list_volumes().render(), "docker volume ls --format '{{json .}}'");
        assert_eq!(
            container_env("web").unwrap().render(),
            "docker inspect --format '{{json .Config.Env}}' web"
        );
        assert_eq!(logs("web").unwrap().render(), "sudo docker logs --tail 200 web");
        assert_eq!(stop("web").unwrap().render(), "sudo docker stop web");
        assert_eq!(restart("web").unwrap().render(), "sudo docker restart web");
        assert_eq!(remove_image("sha256:9c7a54a9a43c").unwrap().render(), "docker rmi sha256:9c7a54a9a43c");
        assert_eq!(remove_volume("pgdata").unwrap().render(), "docker volume rm pgdata");
        assert_eq!(bridge_network().render(), "docker network inspect bridge");
        assert_eq!(inspect("web").unwrap().render(), "docker inspect web");
        assert_eq!(
            run_detached("nginx:latest", "web").unwrap().render(),
            "docker run -d --name web nginx:latest"
        );
    }

    #[test]
    fn test_set_env_quotes_value_twice() {
        let command = set_env("web", "GREETING", "hi 'there'").unwrap();
        assert_eq!(
            command.render(),
            r#"docker exec web bash -c 'export GREETING='\''hi '\''\'\'''\''there'\''\'\'''\'''\'''"#
        );
    }

    #[test]
    fn test_set_env_simple_value() {
        let command = set_env("web", "MODE", "prod").unwrap();
        assert_eq!(command.render(), "docker exec web bash -c 'export MODE=prod'");
    }

    #[test]
    fn test_exec_tail_is_raw() {
        let command = exec("web", "  sh -c 'ls /tmp | wc -l'  ").unwrap();
        assert_eq!(command.render(), "sudo docker exec web sh -c 'ls /tmp | wc -l'");
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(matches!(exec("web", "   "), Err(CommandError::MissingArgument("command"))));
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_container_name("web_1.blue-green").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("-rm").is_err());
        assert!(validate_container_name("web;reboot").is_err());
        assert!(validate_container_name("web name").is_err());
        assert!(validate_container_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());

        assert!(validate_image_ref("registry.example.org:5000/team/app:1.2").is_ok());
        assert!(validate_image_ref("alpine@sha256:abcdef").is_ok());
        assert!(validate_image_ref("alpine$(id)").is_err());

        assert!(matches!(
            validate_volume_name("../etc"),
            Err(CommandError::InvalidArgument { field: "volume name", .. })
        ));
    }

    #[test]
    fn test_env_key_validation() {
        assert!(validate_env_key("_PATH2").is_ok());
        assert!(validate_env_key("2FAST").is_err());
        assert!(validate_env_key("A-B").is_err());
        assert!(matches!(validate_env_key(""), Err(CommandError::MissingArgument("key"))));
    }

    #[test]
    fn test_set_env_requires_value() {
        assert!(matches!(
            set_env("web", "KEY", ""),
            Err(CommandError::MissingArgument("value"))
        ));
    }
}
