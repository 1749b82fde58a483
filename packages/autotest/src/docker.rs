use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use common::config::DockerConfig;

use crate::error::{AutotestError, Result};

/// Outcome of one container run.
#[derive(Debug)]
pub struct ContainerRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ContainerRun {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Handle on the container daemon, shared read-only across grading jobs.
///
/// Drives the `docker` CLI. With a configured remote host the daemon is
/// reached over TCP, with TLS when the host carries an `http`/`https`/`tcp`
/// scheme; otherwise the local socket is used.
#[derive(Debug, Clone, Default)]
pub struct DockerRuntime {
    host: Option<String>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

impl DockerRuntime {
    pub fn from_config(cfg: &DockerConfig) -> Self {
        let tls = cfg.wants_tls();
        Self {
            // The CLI only speaks tcp://; normalize the http(s) spellings.
            host: cfg.host.as_deref().map(|h| {
                h.replace("https://", "tcp://")
                    .replace("http://", "tcp://")
            }),
            tls_cert: if tls { cfg.ssl_cert_path.clone() } else { None },
            tls_key: if tls { cfg.ssl_key_path.clone() } else { None },
        }
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.push("-H".to_string());
            args.push(host.clone());
        }
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            args.push("--tlsverify".to_string());
            args.push(format!("--tlscert={cert}"));
            args.push(format!("--tlskey={key}"));
        }
        args
    }

    /// Run a grading container to completion under a wall-clock timeout.
    ///
    /// The workspace's `assn/` (checked-out submission) and `output/`
    /// (report destination) directories are bind-mounted. On timeout the
    /// container is killed and a `timed_out` run is returned; this is not
    /// an error at this layer.
    pub async fn run_container(
        &self,
        name: &str,
        image: &str,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<ContainerRun> {
        let assn = workspace.join("assn");
        let output = workspace.join("output");

        let mut args = self.connection_args();
        args.push("run".to_string());
        args.push("--rm".to_string());
        args.push(format!("--name={name}"));
        args.push(format!("-v={}:/assn:ro", assn.display()));
        args.push(format!("-v={}:/output", output.display()));
        args.push(image.to_string());

        info!(container = %name, image = %image, "Starting grading container");

        let child = Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AutotestError::Docker(format!("failed to spawn docker: {e}")))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => Ok(ContainerRun {
                exit_code: out.status.code(),
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(AutotestError::Docker(format!("docker run failed: {e}"))),
            Err(_elapsed) => {
                warn!(container = %name, timeout_secs = timeout.as_secs(), "Grading container timed out");
                self.kill(name).await;
                Ok(ContainerRun {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                })
            }
        }
    }

    /// Best-effort kill of a runaway container.
    async fn kill(&self, name: &str) {
        let mut args = self.connection_args();
        args.push("kill".to_string());
        args.push(name.to_string());
        if let Err(e) = Command::new("docker").args(&args).output().await {
            warn!(container = %name, error = %e, "Failed to kill timed-out container");
        }
    }
}
