// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! UI process lifecycle management.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::core::config::ChildConfig;
use crate::core::{LinkError, Result};

/// Descriptor number of the event stream inside the child.
pub const CHANNEL_FD: RawFd = 3;

/// Environment variable announcing [`CHANNEL_FD`] to the child.
pub const CHANNEL_FD_ENV: &str = "SURFACELINK_CHANNEL_FD";

/// Configuration for launching the UI process.
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub executable: PathBuf,
    /// Appended after the launch arguments.
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Time the child gets to exit after its stream is shut down.
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

impl SubprocessConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            grace_period: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }

    pub fn from_child_config(executable: impl Into<PathBuf>, child: &ChildConfig) -> Self {
        Self {
            executable: executable.into(),
            args: child.args.clone(),
            env: child.env.clone(),
            working_dir: child.working_dir.clone(),
            grace_period: Duration::from_millis(child.grace_period_ms),
            poll_interval: Duration::from_millis(child.poll_interval_ms.max(1)),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn name(&self) -> String {
        self.executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.display().to_string())
    }
}

/// Handle to the running UI process and the host end of its event stream.
pub struct ChildProcess {
    child: Option<Child>,
    pid: u32,
    name: String,
    launch_args: Vec<String>,
    stream: Option<UnixStream>,
    grace_period: Duration,
    poll_interval: Duration,
}

impl ChildProcess {
    /// Spawn the child with `launch_args` followed by the configured extra
    /// arguments. The child's end of a fresh stream pair is installed as
    /// descriptor [`CHANNEL_FD`]. Returns as soon as the process exists.
    pub fn launch(config: &SubprocessConfig, launch_args: Vec<String>) -> Result<Self> {
        let name = config.name();
        verify_executable(&config.executable)?;

        let (host_end, child_end) = UnixStream::pair()?;
        let child_fd = child_end.as_raw_fd();

        let mut command = Command::new(&config.executable);
        command
            .args(&launch_args)
            .args(&config.args)
            .envs(&config.env)
            .env(CHANNEL_FD_ENV, CHANNEL_FD.to_string())
            .stdin(Stdio::null());
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            command.pre_exec(move || install_channel_fd(child_fd));
        }

        let child = command.spawn().map_err(|e| {
            LinkError::Process(format!("Failed to spawn '{}': {}", name, e))
        })?;
        drop(child_end);

        let pid = child.id();
        tracing::info!("[ChildProcess] Spawned '{}' with PID {}", name, pid);
        tracing::debug!("[ChildProcess] Launch args: {:?} {:?}", launch_args, config.args);

        let mut all_args = launch_args;
        all_args.extend(config.args.iter().cloned());

        Ok(Self {
            child: Some(child),
            pid,
            name,
            launch_args: all_args,
            stream: Some(host_end),
            grace_period: config.grace_period,
            poll_interval: config.poll_interval.max(Duration::from_millis(1)),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every argument the child was started with.
    pub fn launch_args(&self) -> &[String] {
        &self.launch_args
    }

    /// Host end of the event stream, until [`stop`](Self::stop).
    pub fn stream(&self) -> Option<&UnixStream> {
        self.stream.as_ref()
    }

    pub fn try_clone_stream(&self) -> Result<UnixStream> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| LinkError::InvalidState(format!("'{}' has been stopped", self.name)))?;
        Ok(stream.try_clone()?)
    }

    /// Whether the process still runs. Does not reap it.
    pub fn is_running(&self) -> bool {
        if self.child.is_none() {
            return false;
        }
        let pid = self.pid as libc::pid_t;

        // SAFETY: signal 0 performs only the existence and permission check.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }

        // kill() succeeds on zombies; peek at the exit state without reaping.
        // SAFETY: waitid writes only into the zeroed siginfo.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        // SAFETY: si_pid is valid for WEXITED results and zero otherwise.
        rc != 0 || unsafe { info.si_pid() } == 0
    }

    /// Shut the stream down so the child sees EOF, give it the grace period
    /// to exit, then SIGKILL and reap. Idempotent; returns the exit status
    /// the first time.
    pub fn stop(&mut self) -> Result<Option<ExitStatus>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!("[ChildProcess] '{}' exited with {}", self.name, status);
                    return Ok(Some(status));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("[ChildProcess] Failed to poll '{}': {}", self.name, e);
                    break;
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.grace_period {
                break;
            }
            std::thread::sleep(self.poll_interval.min(self.grace_period - elapsed));
        }

        tracing::warn!(
            "[ChildProcess] '{}' did not exit within {:?}, force killing",
            self.name,
            self.grace_period
        );
        if let Err(e) = child.kill() {
            tracing::debug!("[ChildProcess] kill of '{}' failed: {}", self.name, e);
        }
        let status = child.wait().map_err(|e| {
            LinkError::Process(format!("Failed to reap '{}': {}", self.name, e))
        })?;
        tracing::info!("[ChildProcess] '{}' killed ({})", self.name, status);
        Ok(Some(status))
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            tracing::debug!("[ChildProcess] '{}' dropped while running, stopping", self.name);
            if let Err(e) = self.stop() {
                tracing::warn!("[ChildProcess] {}", e);
            }
        }
    }
}

fn verify_executable(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        LinkError::Process(format!("Executable {} not found: {}", path.display(), e))
    })?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(LinkError::Process(format!(
            "{} is not an executable file",
            path.display()
        )));
    }
    Ok(())
}

/// Runs in the forked child before exec.
fn install_channel_fd(fd: RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl and dup2 are async-signal-safe.
    unsafe {
        if fd == CHANNEL_FD {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        } else if libc::dup2(fd, CHANNEL_FD) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
