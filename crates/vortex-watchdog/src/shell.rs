//! Shell-command collaborators
//!
//! Probes and recovery actions are operator-supplied command templates run
//! through `/bin/sh -c`. Templates may use `{name}`, `{tunnel_id}`,
//! `{interface}` and `{port}`; string values are shell-quoted, numbers are
//! substituted as-is.
//!
//! ```toml
//! [commands]
//! tunnel_delete = "vortexl2 down {name}"
//! tunnel_create = "vortexl2 up {name}"
//! forward_remove = "vortexl2 forward remove {name} {port}"
//! forward_create = "vortexl2 forward add {name} {port}"
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use vortex_core::config::{CommandTemplates, TunnelConfig, WatchdogConfig};
use vortex_core::traits::{HealthProbe, PortForwarder, TunnelLifecycle};
use vortex_core::ActionOutcome;

use crate::source::FileConfigSource;
use crate::watchdog::Collaborators;

/// Quote a string for use inside a shell command.
///
/// Wraps in double quotes and escapes `$`, `` ` ``, `"`, `\` and newline.
pub fn shellquote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if matches!(c, '$' | '`' | '"' | '\\' | '\n') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Values available to a command template
#[derive(Debug, Default, Clone, Copy)]
struct Vars<'a> {
    name: Option<&'a str>,
    tunnel_id: Option<u32>,
    interface: Option<&'a str>,
    port: Option<u16>,
}

impl<'a> Vars<'a> {
    fn tunnel(tunnel: &'a TunnelConfig) -> Self {
        Self {
            name: Some(&tunnel.name),
            tunnel_id: tunnel.tunnel_id,
            interface: tunnel.interface.as_deref(),
            port: None,
        }
    }
}

/// Substitute placeholders. Placeholders without a value are left in place.
fn render(template: &str, vars: Vars<'_>) -> String {
    let mut command = template.to_string();
    if let Some(name) = vars.name {
        command = command.replace("{name}", &shellquote(name));
    }
    if let Some(interface) = vars.interface {
        command = command.replace("{interface}", &shellquote(interface));
    }
    if let Some(tunnel_id) = vars.tunnel_id {
        command = command.replace("{tunnel_id}", &tunnel_id.to_string());
    }
    if let Some(port) = vars.port {
        command = command.replace("{port}", &port.to_string());
    }
    command
}

/// Result of a shell command execution
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code, -1 when killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Exit code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined for diagnostics
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Run a command through `/bin/sh -c`, killing it if `timeout` expires
pub async fn exec(cmd: &str, timeout: Duration) -> std::io::Result<ExecResult> {
    tracing::trace!(command = %cmd, "Executing shell command");

    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("command timed out after {:?}", timeout),
            )
        })??;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };
    tracing::trace!(
        command = %cmd,
        exit_code = result.exit_code,
        output = %result.combined_output(),
        "Command finished"
    );
    Ok(result)
}

/// Probe, tunnel lifecycle and port forwarder backed by command templates
#[derive(Debug, Clone)]
pub struct ShellCollaborator {
    commands: CommandTemplates,
    timeout: Duration,
}

impl ShellCollaborator {
    /// `timeout` bounds every command this collaborator runs
    pub fn new(commands: CommandTemplates, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    async fn probe(&self, template: &str, vars: Vars<'_>) -> bool {
        let cmd = render(template, vars);
        match exec(&cmd, self.timeout).await {
            Ok(result) => result.success(),
            Err(e) => {
                tracing::warn!("Probe command failed to run: {}: {}", cmd, e);
                false
            }
        }
    }

    async fn act(&self, field: &str, template: Option<&str>, vars: Vars<'_>) -> ActionOutcome {
        let Some(template) = template else {
            return ActionOutcome::failure(format!("commands.{} is not configured", field));
        };
        let cmd = render(template, vars);
        match exec(&cmd, self.timeout).await {
            Ok(result) if result.success() => ActionOutcome::success(result.combined_output()),
            Ok(result) => ActionOutcome::failure(format!(
                "exit code {}: {}",
                result.exit_code,
                result.combined_output()
            )),
            Err(e) => ActionOutcome::failure(e.to_string()),
        }
    }
}

/// Shell-backed collaborators plus the file inventory named by `config`.
///
/// Probes run under `probe_timeout`, recovery actions under `action_timeout`.
pub fn collaborators(config: &WatchdogConfig) -> Collaborators {
    let probe = Arc::new(ShellCollaborator::new(
        config.commands.clone(),
        config.probe_timeout,
    ));
    let actions = Arc::new(ShellCollaborator::new(
        config.commands.clone(),
        config.action_timeout,
    ));

    Collaborators {
        probe,
        lifecycle: actions.clone(),
        forwarder: actions,
        source: Arc::new(FileConfigSource::new(config.tunnels_path.clone())),
    }
}

#[async_trait]
impl HealthProbe for ShellCollaborator {
    async fn interface_up(&self, interface: &str) -> bool {
        let vars = Vars {
            interface: Some(interface),
            ..Vars::default()
        };
        self.probe(&self.commands.interface_up, vars).await
    }

    async fn tunnel_active(&self, tunnel_id: u32) -> bool {
        let vars = Vars {
            tunnel_id: Some(tunnel_id),
            ..Vars::default()
        };
        self.probe(&self.commands.tunnel_active, vars).await
    }

    async fn port_listening(&self, port: u16) -> bool {
        let vars = Vars {
            port: Some(port),
            ..Vars::default()
        };
        self.probe(&self.commands.port_listening, vars).await
    }
}

#[async_trait]
impl TunnelLifecycle for ShellCollaborator {
    async fn delete(&self, tunnel: &TunnelConfig) -> ActionOutcome {
        self.act(
            "tunnel_delete",
            self.commands.tunnel_delete.as_deref(),
            Vars::tunnel(tunnel),
        )
        .await
    }

    async fn create(&self, tunnel: &TunnelConfig) -> ActionOutcome {
        self.act(
            "tunnel_create",
            self.commands.tunnel_create.as_deref(),
            Vars::tunnel(tunnel),
        )
        .await
    }
}

#[async_trait]
impl PortForwarder for ShellCollaborator {
    async fn remove(&self, tunnel: &TunnelConfig, port: u16) -> ActionOutcome {
        let vars = Vars {
            port: Some(port),
            ..Vars::tunnel(tunnel)
        };
        self.act("forward_remove", self.commands.forward_remove.as_deref(), vars)
            .await
    }

    async fn create(&self, tunnel: &TunnelConfig, port: u16) -> ActionOutcome {
        let vars = Vars {
            port: Some(port),
            ..Vars::tunnel(tunnel)
        };
        self.act("forward_create", self.commands.forward_create.as_deref(), vars)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collaborator(commands: CommandTemplates) -> ShellCollaborator {
        ShellCollaborator::new(commands, Duration::from_secs(5))
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("simple"), "\"simple\"");
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_render_substitutes_known_values() {
        let tunnel = TunnelConfig::new("edge-1", 1000, "l2tpeth0");
        let vars = Vars {
            port: Some(443),
            ..Vars::tunnel(&tunnel)
        };
        assert_eq!(
            render("fwd {name} {tunnel_id} {interface} {port}", vars),
            "fwd \"edge-1\" 1000 \"l2tpeth0\" 443"
        );
        assert_eq!(render("probe {port}", Vars::default()), "probe {port}");
    }

    #[test]
    fn test_exec_result_combined_output() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "out".into(),
            stderr: "err".into(),
        };
        assert!(!result.success());
        assert_eq!(result.combined_output(), "out\nerr");
    }

    #[tokio::test]
    async fn test_exec_reports_exit_code_and_output() {
        let ok = exec("echo hello", Duration::from_secs(5)).await.unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout, "hello");

        let failed = exec("echo oops >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(failed.exit_code, 3);
        assert_eq!(failed.stderr, "oops");
    }

    #[tokio::test]
    async fn test_exec_times_out() {
        let err = exec("sleep 5", Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_probe_follows_exit_status() {
        let shell = collaborator(CommandTemplates {
            interface_up: "test {interface} = \"up0\"".into(),
            tunnel_active: "test {tunnel_id} -eq 7".into(),
            port_listening: "false".into(),
            ..CommandTemplates::default()
        });

        assert!(shell.interface_up("up0").await);
        assert!(!shell.interface_up("down0").await);
        assert!(shell.tunnel_active(7).await);
        assert!(!shell.tunnel_active(8).await);
        assert!(!shell.port_listening(80).await);
    }

    #[tokio::test]
    async fn test_missing_template_is_failed_action() {
        let shell = collaborator(CommandTemplates::default());
        let tunnel = TunnelConfig::new("edge-1", 1, "l2tpeth0");

        let outcome = TunnelLifecycle::create(&shell, &tunnel).await;
        assert!(!outcome.ok);
        assert!(outcome.message.contains("commands.tunnel_create"));
    }

    #[tokio::test]
    async fn test_collaborators_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let tunnels_path = dir.path().join("tunnels.toml");
        std::fs::write(
            &tunnels_path,
            "[[tunnels]]\nname = \"edge-1\"\ntunnel_id = 1\ninterface = \"l2tpeth0\"\n",
        )
        .unwrap();
        let config = WatchdogConfig {
            tunnels_path,
            commands: CommandTemplates {
                port_listening: "test {port} -eq 443".into(),
                forward_create: Some("echo added {port}".into()),
                ..CommandTemplates::default()
            },
            ..WatchdogConfig::default()
        };

        let wired = collaborators(&config);
        let tunnels = wired.source.list_tunnels().unwrap();
        assert_eq!(tunnels.len(), 1);

        assert!(wired.probe.port_listening(443).await);
        assert!(!wired.probe.port_listening(80).await);

        let created = wired.forwarder.create(&tunnels[0], 8443).await;
        assert_eq!(created.message, "added 8443");
        let recreated = wired.lifecycle.create(&tunnels[0]).await;
        assert!(recreated.message.contains("commands.tunnel_create"));
    }

    #[tokio::test]
    async fn test_action_outcome_carries_output() {
        let shell = collaborator(CommandTemplates {
            forward_remove: Some("echo Port {port} not in forwarded list; exit 1".into()),
            forward_create: Some("echo forwarding {port} via {name}".into()),
            ..CommandTemplates::default()
        });
        let tunnel = TunnelConfig::new("edge-1", 1, "l2tpeth0");

        let removed = shell.remove(&tunnel, 8443).await;
        assert!(removed.failed_as_absent("not in forwarded list"));

        let created = PortForwarder::create(&shell, &tunnel, 8443).await;
        assert!(created.ok);
        assert_eq!(created.message, "forwarding 8443 via edge-1");
    }
}
