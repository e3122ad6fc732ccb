//! Transport over the system `ssh` client.
//!
//! `connect` starts a ControlMaster process for the target; every command then
//! runs as a short-lived `ssh` multiplexed over that master's socket. Password
//! targets start the master through `sshpass -e`, so the password travels in
//! the child's environment and never on a command line.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sshtop_engine::transport::{Session, Transport};
use sshtop_engine::{Auth, CommandError, ConnectionError, SessionError, TargetConfig};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{debug, warn};

const CHECK_INTERVAL: Duration = Duration::from_millis(100);

// exit code sshpass uses for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

pub struct OpenSshTransport {
    control_dir: PathBuf,
    next_id: AtomicU64,
}

impl OpenSshTransport {
    /// Control sockets are created in `control_dir`.
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            next_id: AtomicU64::new(0),
        }
    }

    fn control_path(&self) -> PathBuf {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.control_dir
            .join(format!("sshtop-{}-{id}.sock", std::process::id()))
    }

    /// The ControlMaster command for `target`.
    pub fn master_command(
        &self,
        target: &TargetConfig,
        control: &Path,
    ) -> Result<Command, ConnectionError> {
        let mut cmd = match &target.auth {
            Auth::Key { path } => {
                let mut cmd = Command::new("ssh");
                cmd.arg("-i").arg(path);
                cmd.args(["-o", "BatchMode=yes", "-o", "IdentitiesOnly=yes"]);
                cmd
            }
            Auth::Password { secret } => {
                let secret = secret.secret()?;
                let mut cmd = Command::new("sshpass");
                cmd.env("SSHPASS", secret.expose());
                cmd.args(["-e", "ssh"]);
                cmd.args([
                    "-o",
                    "PubkeyAuthentication=no",
                    "-o",
                    "PreferredAuthentications=password,keyboard-interactive",
                    "-o",
                    "NumberOfPasswordPrompts=1",
                ]);
                cmd
            }
        };
        cmd.args(common_args(target, control))
            .args(["-o", "ControlMaster=yes", "-N"])
            .arg(&target.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    async fn master_ready(target: &TargetConfig, control: &Path) -> bool {
        let status = Command::new("ssh")
            .args(common_args(target, control))
            .args(["-O", "check"])
            .arg(&target.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        matches!(status, Ok(s) if s.success())
    }
}

fn common_args(target: &TargetConfig, control: &Path) -> Vec<OsString> {
    let connect_secs = target.connection_timeout.as_secs().max(1);
    let mut control_opt = OsString::from("ControlPath=");
    control_opt.push(control);
    vec![
        "-p".into(),
        target.port.to_string().into(),
        "-l".into(),
        target.username.clone().into(),
        "-o".into(),
        control_opt,
        "-o".into(),
        format!("ConnectTimeout={connect_secs}").into(),
        "-o".into(),
        "ServerAliveInterval=15".into(),
        "-o".into(),
        "ServerAliveCountMax=2".into(),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
    ]
}

/// Map a failed master start to a connection error.
pub fn classify_failure(code: Option<i32>, stderr: &str) -> ConnectionError {
    let detail = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| match code {
            Some(c) => format!("ssh exited with status {c}"),
            None => "ssh was terminated".into(),
        });
    let auth = code == Some(SSHPASS_BAD_PASSWORD)
        || ["Permission denied", "Authentication failed", "Host key verification failed"]
            .iter()
            .any(|needle| stderr.contains(needle));
    if auth {
        ConnectionError::AuthFailure(detail)
    } else {
        ConnectionError::Unreachable(detail)
    }
}

async fn drain_stderr(child: &mut Child) -> String {
    let mut buf = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut buf).await;
    }
    buf
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn connect(&self, target: &TargetConfig) -> Result<Box<dyn Session>, ConnectionError> {
        let control = self.control_path();
        let mut master = self
            .master_command(target, &control)?
            .spawn()
            .map_err(|e| ConnectionError::Unreachable(format!("cannot start ssh: {e}")))?;

        // the caller bounds this loop with the connection timeout
        loop {
            match master.try_wait() {
                Ok(Some(status)) => {
                    let stderr = drain_stderr(&mut master).await;
                    return Err(classify_failure(status.code(), &stderr));
                }
                Ok(None) => {}
                Err(e) => return Err(ConnectionError::Unreachable(e.to_string())),
            }
            if Self::master_ready(target, &control).await {
                break;
            }
            sleep(CHECK_INTERVAL).await;
        }
        debug!(server = %target.name, control = %control.display(), "control master up");
        Ok(Box::new(OpenSshSession {
            name: target.name.clone(),
            host: target.host.clone(),
            common: common_args(target, &control),
            control,
            master,
        }))
    }
}

struct OpenSshSession {
    name: String,
    host: String,
    common: Vec<OsString>,
    control: PathBuf,
    master: Child,
}

impl OpenSshSession {
    fn master_exited(&mut self) -> Option<ExitStatus> {
        self.master.try_wait().ok().flatten()
    }
}

#[async_trait]
impl Session for OpenSshSession {
    async fn run(&mut self, command: &str) -> Result<String, SessionError> {
        if let Some(status) = self.master_exited() {
            return Err(SessionError::ConnectionLost(format!(
                "ssh control master exited ({status})"
            )));
        }
        let out = Command::new("ssh")
            .args(&self.common)
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"])
            .arg(&self.host)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::ConnectionLost(format!("cannot run ssh: {e}")))?;

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        match out.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&out.stdout).into_owned()),
            // 255 is ssh's own failure, as opposed to the remote command's
            Some(255) | None => Err(SessionError::ConnectionLost(if stderr.is_empty() {
                "ssh exited with status 255".into()
            } else {
                stderr
            })),
            Some(code) => Err(CommandError {
                command: command.to_string(),
                status: Some(code),
                stderr,
            }
            .into()),
        }
    }

    async fn close(&mut self) {
        let exit = Command::new("ssh")
            .args(&self.common)
            .args(["-O", "exit"])
            .arg(&self.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        if !matches!(exit, Ok(s) if s.success()) {
            warn!(server = %self.name, "control master did not exit cleanly, killing it");
        }
        let _ = self.master.kill().await;
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.control);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshtop_engine::{MonitorSettings, Secret, StaticSecret};
    use std::sync::Arc;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn key_master_uses_batch_mode_and_control_socket() {
        let t = OpenSshTransport::new("/tmp");
        let target = TargetConfig::new(
            "web",
            "10.0.0.5",
            "ops",
            Auth::Key {
                path: "/home/ops/.ssh/id_ed25519".into(),
            },
            &MonitorSettings::default(),
        )
        .with_port(2222);
        let control = t.control_path();
        let cmd = t.master_command(&target, &control).unwrap();
        assert_eq!(cmd.as_std().get_program(), "ssh");
        let args = args_of(&cmd);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ControlMaster=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&format!("ControlPath={}", control.display())));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.5"));
    }

    #[test]
    fn password_goes_through_env_not_args() {
        let t = OpenSshTransport::new("/tmp");
        let target = TargetConfig::new(
            "db",
            "db.internal",
            "ops",
            Auth::Password {
                secret: Arc::new(StaticSecret::new(Secret::new("s3cret"))),
            },
            &MonitorSettings::default(),
        );
        let cmd = t.master_command(&target, Path::new("/tmp/x.sock")).unwrap();
        assert_eq!(cmd.as_std().get_program(), "sshpass");
        assert!(args_of(&cmd).iter().all(|a| !a.contains("s3cret")));
        let env: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(env
            .iter()
            .any(|(k, v)| *k == "SSHPASS" && v.map(|v| v == "s3cret").unwrap_or(false)));
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            classify_failure(Some(255), "ops@db: Permission denied (publickey).\n"),
            ConnectionError::AuthFailure(_)
        ));
        assert!(matches!(
            classify_failure(Some(SSHPASS_BAD_PASSWORD), ""),
            ConnectionError::AuthFailure(_)
        ));
        assert_eq!(
            classify_failure(Some(255), "ssh: connect to host x port 22: No route to host\n"),
            ConnectionError::Unreachable("ssh: connect to host x port 22: No route to host".into())
        );
        assert_eq!(
            classify_failure(Some(1), ""),
            ConnectionError::Unreachable("ssh exited with status 1".into())
        );
    }
}
