use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::error::ProxyError;

/// Owned handle to a spawned collaborator process (`RawProxySource`,
/// `LivenessProber`, `RotatingProxyBinary` — §6). The child is placed in its
/// own process group (`setsid`) so SIGTERM/SIGKILL escalation reaches any
/// grandchildren it forks, matching
/// `original_source/proxies/mubeng_manager.py`'s process-group handling.
/// stdout/stderr are tee'd into a log file rather than read from a pipe while
/// this handle may be blocked elsewhere (§9).
pub struct ExternalProcess {
    child: tokio::process::Child,
    pgid: Pid,
    log_path: PathBuf,
}

impl ExternalProcess {
    pub async fn spawn(program: &str, args: &[String], log_path: impl Into<PathBuf>) -> Result<Self, ProxyError> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout_file = std::fs::File::create(&log_path)?;
        let stderr_file = stdout_file.try_clone()?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(stdout_file)
            .stderr(stderr_file);

        // SAFETY: setsid() is async-signal-safe and only called in the child
        // between fork and exec, as `pre_exec` requires.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| ProxyError::Process("spawned process exited before its pid could be read".into()))?;

        info!(program, pid, log_path = %log_path.display(), "spawned external process");
        Ok(Self {
            child,
            pgid: Pid::from_raw(pid as i32),
            log_path,
        })
    }

    /// Wraps the command in a pseudo-terminal via `script`, for collaborators
    /// that refuse to run without one (§6: the `LivenessProber` contract).
    pub async fn spawn_ptywrapped(
        program: &str,
        args: &[String],
        log_path: impl Into<PathBuf>,
    ) -> Result<Self, ProxyError> {
        let inner = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        let wrapped_args = vec!["-qefc".to_string(), inner, "/dev/null".to_string()];
        Self::spawn("script", &wrapped_args, log_path).await
    }

    pub fn pid(&self) -> u32 {
        self.pgid.as_raw() as u32
    }

    pub fn log_path(&self) -> &std::path::Path {
        &self.log_path
    }

    /// Waits up to `timeout` for natural exit. `Ok(None)` means still running.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<std::process::ExitStatus>, ProxyError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Ok(Some(status)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }

    /// Process-group alive check, used by the Orchestrator's restart policy.
    pub async fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM the process group, escalating to SIGKILL after `grace`.
    pub async fn terminate(&mut self, grace: Duration) {
        if let Err(e) = killpg(self.pgid, Signal::SIGTERM) {
            warn!(pid = self.pid(), error = %e, "SIGTERM delivery failed, process may already be gone");
        }

        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            warn!(pid = self.pid(), "process did not exit within grace period, sending SIGKILL");
            let _ = killpg(self.pgid, Signal::SIGKILL);
            let _ = self.child.wait().await;
        }
    }
}
